// SPDX-License-Identifier: Apache-2.0
//
// uiprobe: HTTP/JSON daemon for driving hardware UI tests, exposing input
// injection over evdev/uinput and framebuffer capture over KMS.

mod args;
mod error;
mod handlers;
mod input;
mod screen;
mod server;
mod websocket;

use anyhow::bail;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, InputSelector, RuntimeConfig, ScreenSelector};
use crate::input::{discover, EvdevBackend, InputBackend, UinputBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("uiprobe {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let default_filter = if cli.verbose {
        "uiprobe=debug"
    } else {
        "uiprobe=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut cfg = RuntimeConfig::from_cli(&cli);
    if cfg.screen_backend == ScreenSelector::Ilm {
        bail!("selected screen backend is not available in this build");
    }

    cfg.devices = match cfg.input_backend {
        InputSelector::Uinput => Some(discover::builtin_uinput_table()),
        InputSelector::Evdev if cli.guess_devices => discover::load_evdev_table(),
        InputSelector::Evdev => None,
    };
    if cfg.verbose {
        if let Some(devices) = &cfg.devices {
            discover::log_table(devices);
        }
    }

    let input = match cfg.input_backend {
        InputSelector::Uinput => InputBackend::Uinput(UinputBackend::new()?),
        InputSelector::Evdev => InputBackend::Evdev(EvdevBackend::new()),
    };
    info!("input backend ready ({:?})", cfg.input_backend);

    server::run(cfg, input).await
}
