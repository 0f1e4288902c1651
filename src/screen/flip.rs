// SPDX-License-Identifier: Apache-2.0
//
// Page-flip streamer: keeps a double-buffered scan-out flipping so the
// freshest completed frame is always available from the shared cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::{connector, crtc, framebuffer, dumbbuffer::DumbBuffer, Device as ControlDevice};
use drm::control::{Event as DrmEvent, Mode, PageFlipFlags};
use drm::{Device, DriverCapability};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::screen::kms::{self, Card, DumbMap};
use crate::screen::{CapturedFrame, FrameCache};

/// Re-arms the fd wait even when the display never wakes it.
const KEEPALIVE: Duration = Duration::from_secs(600);
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const BPP: u32 = 32;
const DEPTH: u32 = 24;

/// Brings the streamer up on the first candidate card that cooperates.
/// Every failure degrades: first to the next card, then to timed sampling,
/// never to process exit.
pub async fn run(cards: Vec<String>, cache: FrameCache) {
    for name in &cards {
        let path = Path::new(kms::DRI_DIR).join(name);
        match Streamer::bring_up(&path) {
            Ok((card, streamer)) => {
                info!("page-flip streamer running on {}", path.display());
                streamer.flip_loop(card, cache).await;
                return;
            }
            Err(err) => {
                warn!("page-flip bring-up failed on {}: {err}", path.display());
                if let Ok(crtc_id) = kms::first_usable_crtc(&path) {
                    sample_loop(path, crtc_id, cache).await;
                    return;
                }
            }
        }
    }
    debug!("no DRM card available for screen streaming");
}

struct Frame {
    buffer: Option<DumbBuffer>,
    fb: framebuffer::Handle,
    map: DumbMap,
    pitch: u32,
}

struct Streamer {
    crtc: crtc::Handle,
    width: u32,
    height: u32,
    frames: [Frame; 2],
    /// Index of the frame whose flip is pending.
    active: usize,
}

impl Streamer {
    fn bring_up(path: &Path) -> Result<(Card, Streamer), Error> {
        let card = Card::open(path)?;

        if card
            .get_driver_capability(DriverCapability::DumbBuffer)
            .unwrap_or(0)
            == 0
        {
            return Err(Error::Unsupported(
                "DRM device cannot allocate dumb buffers".into(),
            ));
        }

        let (conn, mode) = pick_connector(&card)?;
        let crtc_handle = pick_crtc(&card, &conn)?;
        let (width, height) = (mode.size().0 as u32, mode.size().1 as u32);

        let first = create_frame(&card, width, height)?;
        let second = match create_frame(&card, width, height) {
            Ok(frame) => frame,
            Err(err) => {
                destroy_frame(&card, first);
                return Err(err);
            }
        };
        let mut streamer = Streamer {
            crtc: crtc_handle,
            width,
            height,
            frames: [first, second],
            active: 0,
        };

        if let Err(err) = show_first_frame(&card, &streamer, conn.handle(), mode) {
            streamer.teardown(&card);
            return Err(err);
        }

        Ok((card, streamer))
    }

    async fn flip_loop(mut self, card: Card, cache: FrameCache) {
        let card = match AsyncFd::with_interest(card, Interest::READABLE) {
            Ok(card) => card,
            Err(err) => {
                // The fd was dropped with the failed registration; the
                // kernel reclaims its framebuffers on close.
                error!("could not register DRM fd with the reactor: {err}");
                return;
            }
        };

        loop {
            let guard = match tokio::time::timeout(KEEPALIVE, card.readable()).await {
                Err(_) => continue, // keep-alive tick, nothing pending
                Ok(Err(err)) => {
                    error!("DRM fd wait failed: {err}");
                    break;
                }
                Ok(Ok(guard)) => guard,
            };

            let mut flipped = false;
            match card.get_ref().receive_events() {
                Ok(events) => {
                    for event in events {
                        if let DrmEvent::PageFlip(_) = event {
                            flipped = true;
                        }
                    }
                }
                Err(err) => {
                    error!("could not read DRM events: {err}");
                    break;
                }
            }
            let mut guard = guard;
            guard.clear_ready();

            if flipped {
                if let Err(err) = self.on_flip(card.get_ref(), &cache) {
                    error!("page flipping stopped: {err}");
                    break;
                }
            }
        }

        let inner = card.into_inner();
        self.teardown(&inner);
    }

    /// The pending flip completed: its target is scanning out now. Publish
    /// it and queue the other buffer.
    fn on_flip(&mut self, card: &Card, cache: &FrameCache) -> Result<(), Error> {
        let completed = &self.frames[self.active];
        cache.store(CapturedFrame {
            pixels: completed.map.as_slice().to_vec(),
            width: self.width,
            height: self.height,
            pitch: completed.pitch,
            bpp: BPP,
        });

        self.active ^= 1;
        card.page_flip(
            self.crtc,
            self.frames[self.active].fb,
            PageFlipFlags::EVENT,
            None,
        )
        .map_err(|err| Error::io(format!("page flip failed: {err}")))
    }

    fn teardown(&mut self, card: &Card) {
        for frame in &mut self.frames {
            if let Err(err) = card.destroy_framebuffer(frame.fb) {
                debug!("could not remove framebuffer: {err}");
            }
            if let Some(buffer) = frame.buffer.take() {
                if let Err(err) = card.destroy_dumb_buffer(buffer) {
                    debug!("could not destroy dumb buffer: {err}");
                }
            }
        }
    }
}

/// First connected connector that advertises at least one mode; its
/// preferred (first) mode drives the streamer.
fn pick_connector(card: &Card) -> Result<(connector::Info, Mode), Error> {
    let resources = card
        .resource_handles()
        .map_err(|err| Error::io(format!("could not read display resources: {err}")))?;

    for &handle in resources.connectors() {
        let Ok(info) = card.get_connector(handle, false) else {
            continue;
        };
        if info.state() == connector::State::Connected && !info.modes().is_empty() {
            let mode = info.modes()[0];
            return Ok((info, mode));
        }
    }
    Err(Error::Unsupported("no connected display connector".into()))
}

/// Prefers the CRTC already driving the connector, otherwise scans every
/// encoder's possible CRTCs for one with a valid mode.
fn pick_crtc(card: &Card, conn: &connector::Info) -> Result<crtc::Handle, Error> {
    if let Some(enc_handle) = conn.current_encoder() {
        if let Ok(encoder) = card.get_encoder(enc_handle) {
            if let Some(crtc_handle) = encoder.crtc() {
                if crtc_is_usable(card, crtc_handle) {
                    return Ok(crtc_handle);
                }
            }
        }
    }

    let resources = card
        .resource_handles()
        .map_err(|err| Error::io(format!("could not read display resources: {err}")))?;
    for &enc_handle in conn.encoders() {
        let Ok(encoder) = card.get_encoder(enc_handle) else {
            continue;
        };
        for crtc_handle in resources.filter_crtcs(encoder.possible_crtcs()) {
            if crtc_is_usable(card, crtc_handle) {
                return Ok(crtc_handle);
            }
        }
    }
    Err(Error::Unsupported(
        "no CRTC available for the connected display".into(),
    ))
}

fn crtc_is_usable(card: &Card, handle: crtc::Handle) -> bool {
    card.get_crtc(handle)
        .map(|info| info.mode().is_some())
        .unwrap_or(false)
}

fn create_frame(card: &Card, width: u32, height: u32) -> Result<Frame, Error> {
    let buffer = card
        .create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, BPP)
        .map_err(|err| Error::io(format!("could not create dumb buffer: {err}")))?;

    let fb = match card.add_framebuffer(&buffer, DEPTH, BPP) {
        Ok(fb) => fb,
        Err(err) => {
            let _ = card.destroy_dumb_buffer(buffer);
            return Err(Error::io(format!("could not add framebuffer: {err}")));
        }
    };

    let pitch = buffer.pitch();
    let len = pitch as usize * height as usize;
    let mut map = match DumbMap::map(card, u32::from(buffer.handle()), len, true) {
        Ok(map) => map,
        Err(err) => {
            let _ = card.destroy_framebuffer(fb);
            let _ = card.destroy_dumb_buffer(buffer);
            return Err(err);
        }
    };
    map.zero();

    Ok(Frame { buffer: Some(buffer), fb, map, pitch })
}

fn destroy_frame(card: &Card, mut frame: Frame) {
    let _ = card.destroy_framebuffer(frame.fb);
    if let Some(buffer) = frame.buffer.take() {
        let _ = card.destroy_dumb_buffer(buffer);
    }
}

/// Master is needed only for the initial mode set; page flips run without
/// it.
fn show_first_frame(
    card: &Card,
    streamer: &Streamer,
    conn: connector::Handle,
    mode: Mode,
) -> Result<(), Error> {
    card.acquire_master_lock()
        .map_err(|err| Error::io(format!("could not become DRM master: {err}")))?;
    let shown = card.set_crtc(
        streamer.crtc,
        Some(streamer.frames[0].fb),
        (0, 0),
        &[conn],
        Some(mode),
    );
    if let Err(err) = card.release_master_lock() {
        warn!("could not drop DRM master: {err}");
    }
    shown.map_err(|err| Error::io(format!("could not set CRTC mode: {err}")))?;

    card.page_flip(
        streamer.crtc,
        streamer.frames[0].fb,
        PageFlipFlags::EVENT,
        None,
    )
    .map_err(|err| Error::io(format!("initial page flip failed: {err}")))
}

/// Same cache contract as the flip loop, without page flips: re-capture the
/// CRTC's current scan-out once a second.
async fn sample_loop(path: PathBuf, crtc_id: u32, cache: FrameCache) {
    info!(
        "falling back to timed screen sampling on {} (CRTC {crtc_id})",
        path.display()
    );
    let mut tick = tokio::time::interval(SAMPLE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let sample_path = path.clone();
        match tokio::task::spawn_blocking(move || kms::capture_raw(&sample_path, crtc_id)).await {
            Ok(Ok(frame)) => cache.store(frame),
            Ok(Err(err)) => debug!("timed sample failed: {err}"),
            Err(err) => {
                error!("timed sampler worker failed: {err}");
                break;
            }
        }
    }
}
