// SPDX-License-Identifier: Apache-2.0
//
// Screen backends and the shared freshest-frame cache.

pub mod flip;
pub mod image;
pub mod kms;

use std::sync::{Arc, Mutex};

use crate::args::RuntimeConfig;
use crate::error::Error;

pub use image::{ImageData, ImageEncoding};
pub use kms::KmsScreen;

/// One raw frame as scanned out: `pitch` bytes per row, `bpp` bits per
/// pixel.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
}

/// Freshest-frame cell shared between the streamer and request handlers.
#[derive(Clone, Default)]
pub struct FrameCache(Arc<Mutex<Option<CapturedFrame>>>);

impl FrameCache {
    pub fn store(&self, frame: CapturedFrame) {
        *self.0.lock().expect("frame cache poisoned") = Some(frame);
    }

    pub fn snapshot(&self) -> Option<CapturedFrame> {
        self.0.lock().expect("frame cache poisoned").clone()
    }
}

/// The process owns at most one screen backend. KMS is the only backend in
/// this build; the IVI layer-manager backend lives behind the same seam in
/// builds that carry it.
pub enum ScreenBackend {
    Kms(KmsScreen),
}

impl ScreenBackend {
    pub fn create(cfg: &RuntimeConfig, cache: FrameCache) -> Option<ScreenBackend> {
        KmsScreen::select(&cfg.kms_cards, cfg.kms_format_rgb, cache).map(ScreenBackend::Kms)
    }

    pub fn list_screens(&self) -> Result<String, Error> {
        match self {
            ScreenBackend::Kms(screen) => screen.list_screens(),
        }
    }

    pub fn grab(&self, screen_id: u32) -> Result<ImageData, Error> {
        match self {
            ScreenBackend::Kms(screen) => screen.grab(screen_id),
        }
    }
}
