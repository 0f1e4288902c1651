// SPDX-License-Identifier: Apache-2.0
//
// Shared application state, route table and accept loop.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use axum::ServiceExt;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tracing::{error, info, warn};

use crate::args::{RuntimeConfig, ScreenSelector};
use crate::handlers;
use crate::input::InputBackend;
use crate::screen::{flip, FrameCache, ScreenBackend};

pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Everything a session needs, cloned into each handler invocation.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<RuntimeConfig>,
    pub input: Arc<InputBackend>,
    /// Lazily probed on the first screen request; `None` once probing has
    /// failed, so later requests fail fast.
    screen: Arc<OnceCell<Option<Arc<ScreenBackend>>>>,
    pub cache: FrameCache,
}

impl AppState {
    pub fn new(cfg: RuntimeConfig, input: InputBackend) -> Self {
        AppState {
            cfg: Arc::new(cfg),
            input: Arc::new(input),
            screen: Arc::new(OnceCell::new()),
            cache: FrameCache::default(),
        }
    }
}

pub async fn get_screen(app: &AppState) -> Option<Arc<ScreenBackend>> {
    app.screen
        .get_or_init(|| async {
            let cfg = app.cfg.clone();
            let cache = app.cache.clone();
            match tokio::task::spawn_blocking(move || ScreenBackend::create(&cfg, cache)).await {
                Ok(Some(backend)) => Some(Arc::new(backend)),
                Ok(None) => {
                    warn!("no usable screen backend found");
                    None
                }
                Err(err) => {
                    error!("screen backend probe did not finish: {err}");
                    None
                }
            }
        })
        .await
        .clone()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/move", post(handlers::move_pointer).options(handlers::post_options))
        .route("/button", post(handlers::button).options(handlers::post_options))
        .route("/touch", post(handlers::touch).options(handlers::post_options))
        .route("/swipe", post(handlers::swipe).options(handlers::post_options))
        .route("/key", post(handlers::key).options(handlers::post_options))
        .route("/text", post(handlers::text).options(handlers::post_options))
        .route("/screen", get(handlers::screen_list).options(handlers::get_options))
        .route(
            "/screen/{screen_number}",
            get(handlers::screenshot).options(handlers::get_options),
        )
        .fallback(handlers::fallback)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(middleware::from_fn(handlers::decorate))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Routing ignores trailing slashes, so `/touch/` and `/touch` dispatch to
/// the same handler.
pub fn into_service(router: Router) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(router)
}

pub async fn run(cfg: RuntimeConfig, input: InputBackend) -> anyhow::Result<()> {
    let state = AppState::new(cfg, input);

    if state.cfg.screen_backend == ScreenSelector::Kms {
        tokio::spawn(flip::run(state.cfg.kms_cards.clone(), state.cache.clone()));
    }

    let port = state.cfg.port;
    let app = into_service(build_router(state));
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("could not bind 0.0.0.0:{port}"))?;
    info!("server running on 0.0.0.0:{port}");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .await
        .context("server terminated")?;
    Ok(())
}


#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::args::InputSelector;
    use crate::input::discover::DeviceMapping;
    use crate::input::EvdevBackend;
    use std::path::Path;

    /// State backed by an evdev backend rooted in a scratch directory, so
    /// written event streams can be read back as plain files.
    pub(crate) fn test_state(
        dev_root: &Path,
        devices: Option<Vec<DeviceMapping>>,
    ) -> AppState {
        let cfg = RuntimeConfig {
            port: 0,
            input_backend: InputSelector::Evdev,
            screen_backend: ScreenSelector::Kms,
            kms_cards: Vec::new(),
            kms_format_rgb: false,
            devices,
            verbose: false,
        };
        AppState::new(cfg, InputBackend::Evdev(EvdevBackend::with_root(dev_root)))
    }

    pub(crate) fn test_app(state: AppState) -> NormalizePath<Router> {
        into_service(build_router(state))
    }
}
