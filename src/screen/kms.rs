// SPDX-License-Identifier: Apache-2.0
//
// KMS screen backend: CRTC enumeration and dumb-buffer framebuffer capture.

use std::fs::{File, OpenOptions};
use std::num::{NonZeroU32, NonZeroUsize};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use drm::control::{crtc, Device as ControlDevice};
use drm::Device;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::screen::image::{self, ImageData};
use crate::screen::{CapturedFrame, FrameCache};

pub const DRI_DIR: &str = "/dev/dri";

/// A DRM device node. Implementing `AsFd` is all the drm traits need.
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for Card {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

impl Card {
    pub fn open(path: &Path) -> Result<Self, Error> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map(Card)
            .map_err(|err| Error::io(format!("could not open {}: {err}", path.display())))
    }
}

pub struct KmsScreen {
    card_path: PathBuf,
    rgb_order: bool,
    cache: FrameCache,
}

impl KmsScreen {
    /// Probes the candidate cards in order and keeps the first one whose
    /// first mode-valid CRTC yields a working capture.
    pub fn select(cards: &[String], rgb_order: bool, cache: FrameCache) -> Option<KmsScreen> {
        for name in cards {
            let path = Path::new(DRI_DIR).join(name);
            match probe_card(&path) {
                Ok(crtc_id) => {
                    info!("using KMS card {} (CRTC {crtc_id})", path.display());
                    return Some(KmsScreen { card_path: path, rgb_order, cache });
                }
                Err(err) => debug!("skipping {}: {err}", path.display()),
            }
        }
        None
    }

    /// One line per CRTC, usable or not.
    pub fn list_screens(&self) -> Result<String, Error> {
        let card = Card::open(&self.card_path)?;
        Ok(format_screen_list(&enumerate_crtcs(&card)?))
    }

    /// Serves the streamer's freshest frame when one is cached, otherwise
    /// maps the scan-out buffer of the requested CRTC.
    pub fn grab(&self, screen_id: u32) -> Result<ImageData, Error> {
        let frame = match self.cache.snapshot() {
            Some(frame) => frame,
            None => capture_raw(&self.card_path, screen_id)?,
        };
        image::encode_png(
            &frame.pixels,
            frame.width,
            frame.height,
            frame.pitch,
            frame.bpp,
            self.rgb_order,
        )
    }
}

pub(crate) struct CrtcLine {
    pub id: u32,
    pub mode_valid: bool,
}

fn enumerate_crtcs(card: &Card) -> Result<Vec<CrtcLine>, Error> {
    let resources = card
        .resource_handles()
        .map_err(|err| Error::io(format!("could not read display resources: {err}")))?;

    let mut screens = Vec::new();
    for &handle in resources.crtcs() {
        match card.get_crtc(handle) {
            Ok(info) => screens.push(CrtcLine {
                id: u32::from(handle),
                mode_valid: info.mode().is_some(),
            }),
            Err(err) => warn!("could not read CRTC {}: {err}", u32::from(handle)),
        }
    }
    Ok(screens)
}

pub(crate) fn format_screen_list(screens: &[CrtcLine]) -> String {
    let mut reply = String::new();
    for screen in screens {
        reply.push_str(&format!(
            "CRTC: ID={}, mode_valid={}\n",
            screen.id, screen.mode_valid as u8
        ));
    }
    reply
}

/// First CRTC with a valid mode on the card, used for probing and for the
/// timed sampling fallback.
pub(crate) fn first_usable_crtc(path: &Path) -> Result<u32, Error> {
    let card = Card::open(path)?;
    enumerate_crtcs(&card)?
        .iter()
        .find(|screen| screen.mode_valid)
        .map(|screen| screen.id)
        .ok_or_else(|| Error::io(format!("no usable CRTC on {}", path.display())))
}

fn probe_card(path: &Path) -> Result<u32, Error> {
    let crtc_id = first_usable_crtc(path)?;
    capture_raw(path, crtc_id)?;
    Ok(crtc_id)
}

/// Maps the framebuffer currently bound to `screen_id` and copies it out.
/// Card, CRTC, framebuffer and mapping are all released on every path.
pub(crate) fn capture_raw(path: &Path, screen_id: u32) -> Result<CapturedFrame, Error> {
    let card = Card::open(path)?;

    let handle: crtc::Handle = NonZeroU32::new(screen_id)
        .ok_or_else(|| Error::io("invalid CRTC id"))?
        .into();
    let crtc_info = card
        .get_crtc(handle)
        .map_err(|err| Error::io(format!("could not read CRTC {screen_id}: {err}")))?;
    let fb_handle = crtc_info
        .framebuffer()
        .ok_or_else(|| Error::io(format!("no framebuffer bound to CRTC {screen_id}")))?;
    let fb = card
        .get_framebuffer(fb_handle)
        .map_err(|err| Error::io(format!("could not read framebuffer: {err}")))?;

    let (width, height) = fb.size();
    let pitch = fb.pitch();
    let bpp = fb.bpp();
    let buffer = fb
        .buffer()
        .ok_or_else(|| Error::io("framebuffer has no mappable buffer handle"))?;

    let len = pitch as usize * height as usize;
    let map = DumbMap::map(&card, u32::from(buffer), len, false)?;

    Ok(CapturedFrame {
        pixels: map.as_slice().to_vec(),
        width,
        height,
        pitch,
        bpp,
    })
}

#[repr(C)]
#[derive(Default)]
struct DrmModeMapDumb {
    handle: u32,
    pad: u32,
    offset: u64,
}

mod ioctl {
    use nix::ioctl_readwrite;

    ioctl_readwrite!(mode_map_dumb, b'd', 0xb3, super::DrmModeMapDumb);
}

/// A mapped dumb buffer; unmapped on drop.
pub(crate) struct DumbMap {
    ptr: NonNull<libc::c_void>,
    len: usize,
}

// The mapping is only ever touched by the task that created it.
unsafe impl Send for DumbMap {}

impl DumbMap {
    pub(crate) fn map(
        card: &Card,
        handle: u32,
        len: usize,
        writable: bool,
    ) -> Result<DumbMap, Error> {
        let mut arg = DrmModeMapDumb { handle, ..Default::default() };
        unsafe { ioctl::mode_map_dumb(card.as_raw_fd(), &mut arg) }
            .map_err(|err| Error::io(format!("could not map dumb buffer: {err}")))?;

        let length = NonZeroUsize::new(len).ok_or_else(|| Error::io("zero-sized framebuffer"))?;
        let prot = if writable {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        };
        let ptr = unsafe {
            mman::mmap(None, length, prot, MapFlags::MAP_SHARED, card, arg.offset as libc::off_t)
        }
        .map_err(|err| Error::io(format!("mmap failed: {err}")))?;

        Ok(DumbMap { ptr, len })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }

    pub(crate) fn zero(&mut self) {
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut u8, self.len).fill(0);
        }
    }
}

impl Drop for DumbMap {
    fn drop(&mut self) {
        if let Err(err) = unsafe { mman::munmap(self.ptr, self.len) } {
            warn!("munmap failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_list_formatting() {
        let screens = vec![CrtcLine { id: 42, mode_valid: true }];
        assert_eq!(format_screen_list(&screens), "CRTC: ID=42, mode_valid=1\n");
    }

    #[test]
    fn screen_list_covers_unusable_crtcs() {
        let screens = vec![
            CrtcLine { id: 33, mode_valid: false },
            CrtcLine { id: 34, mode_valid: true },
        ];
        assert_eq!(
            format_screen_list(&screens),
            "CRTC: ID=33, mode_valid=0\nCRTC: ID=34, mode_valid=1\n"
        );
    }

    #[test]
    fn empty_card_list_selects_nothing() {
        assert!(KmsScreen::select(&[], false, FrameCache::default()).is_none());
    }

    #[test]
    fn missing_card_is_skipped() {
        let cards = vec!["card-does-not-exist".to_string()];
        assert!(KmsScreen::select(&cards, false, FrameCache::default()).is_none());
    }
}
