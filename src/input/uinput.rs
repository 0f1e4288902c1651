// SPDX-License-Identifier: Apache-2.0
//
// uinput backend: three virtual devices registered once at startup.

use std::fs::{File, OpenOptions};
use std::mem;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Error;
use crate::input::events::{self, codes};

const UINPUT_NODE: &str = "/dev/uinput";
const VENDOR_ID: u16 = 0x1234;
const PRODUCT_ID: u16 = 0x5678;

/// Virtual axes span the whole touch surface; clients address it in
/// absolute device units.
const AXIS_MAX: i32 = 32767;
const PRESSURE_MAX: i32 = 100;
const SLOT_MAX: i32 = 9;
const TRACKING_MAX: i32 = 65535;

mod ioctl {
    use nix::{ioctl_none, ioctl_write_int, ioctl_write_ptr};

    ioctl_none!(ui_dev_create, b'U', 1);
    ioctl_none!(ui_dev_destroy, b'U', 2);
    ioctl_write_ptr!(ui_dev_setup, b'U', 3, libc::uinput_setup);
    ioctl_write_ptr!(ui_abs_setup, b'U', 4, libc::uinput_abs_setup);
    ioctl_write_int!(ui_set_evbit, b'U', 100);
    ioctl_write_int!(ui_set_keybit, b'U', 101);
    ioctl_write_int!(ui_set_relbit, b'U', 102);
    ioctl_write_int!(ui_set_absbit, b'U', 103);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceSlot {
    Mouse,
    Keyboard,
    Touchscreen,
}

impl DeviceSlot {
    /// Logical device ids are fixed: mouse 0, keyboard 1, touchscreen 2.
    pub(crate) fn from_event(event: i32) -> Result<Self, Error> {
        match event {
            0 => Ok(DeviceSlot::Mouse),
            1 => Ok(DeviceSlot::Keyboard),
            2 => Ok(DeviceSlot::Touchscreen),
            _ => Err(Error::bad_request("event not found")),
        }
    }
}

struct VirtualDevice {
    file: File,
    /// Serializes multi-record sequences targeting this device.
    gesture: Mutex<()>,
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        if let Err(err) = unsafe { ioctl::ui_dev_destroy(self.file.as_raw_fd()) } {
            warn!("could not destroy virtual device: {err}");
        }
    }
}

pub struct UinputBackend {
    mouse: VirtualDevice,
    keyboard: VirtualDevice,
    touchscreen: VirtualDevice,
}

impl UinputBackend {
    pub fn new() -> Result<Self, Error> {
        let backend = UinputBackend {
            mouse: create_mouse()?,
            keyboard: create_keyboard()?,
            touchscreen: create_touchscreen()?,
        };
        info!("virtual mouse, keyboard and touchscreen registered");
        Ok(backend)
    }

    fn device(&self, slot: DeviceSlot) -> &VirtualDevice {
        match slot {
            DeviceSlot::Mouse => &self.mouse,
            DeviceSlot::Keyboard => &self.keyboard,
            DeviceSlot::Touchscreen => &self.touchscreen,
        }
    }

    pub async fn move_to(&self, x: i32, y: i32, event: i32) -> Result<(), Error> {
        let device = self.device(DeviceSlot::from_event(event)?);
        let _gesture = device.gesture.lock().await;
        events::send_pos_mt(x, y, &device.file)?;
        events::send_syn(&device.file)?;
        Ok(())
    }

    pub async fn button(&self, value: i32, event: i32) -> Result<(), Error> {
        let device = self.device(DeviceSlot::from_event(event)?);
        let _gesture = device.gesture.lock().await;
        let tracking = if value == 0 {
            events::TRACKING_END
        } else {
            events::TRACKING_START
        };
        events::send_tracking(tracking, &device.file)?;
        events::send_button(value, &device.file)?;
        events::send_syn(&device.file)?;
        Ok(())
    }

    pub async fn touch(&self, x: i32, y: i32, duration: i32, event: i32) -> Result<(), Error> {
        let device = self.device(DeviceSlot::from_event(event)?);
        let _gesture = device.gesture.lock().await;
        events::send_touch(x, y, duration, &device.file).await?;
        Ok(())
    }

    pub async fn swipe(
        &self,
        x: i32,
        y: i32,
        x2: i32,
        y2: i32,
        velocity: i32,
        event: i32,
    ) -> Result<(), Error> {
        let device = self.device(DeviceSlot::from_event(event)?);
        let _gesture = device.gesture.lock().await;
        events::send_swipe(x, y, x2, y2, velocity, &device.file).await?;
        Ok(())
    }

    pub async fn key(&self, key: u16, event: i32) -> Result<(), Error> {
        let device = self.device(DeviceSlot::from_event(event)?);
        let _gesture = device.gesture.lock().await;
        events::send_key(key, &device.file)?;
        events::send_syn(&device.file)?;
        Ok(())
    }

    pub async fn text(&self, keys: &[u16], event: i32) -> Result<(), Error> {
        let device = self.device(DeviceSlot::from_event(event)?);
        let _gesture = device.gesture.lock().await;
        events::send_text(keys, &device.file).await?;
        Ok(())
    }
}

fn open_uinput() -> Result<File, Error> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(UINPUT_NODE)
        .map_err(|err| Error::io(format!("could not open {UINPUT_NODE}: {err}")))
}

fn device_setup(name: &str) -> libc::uinput_setup {
    let mut setup: libc::uinput_setup = unsafe { mem::zeroed() };
    setup.id.bustype = codes::BUS_USB;
    setup.id.vendor = VENDOR_ID;
    setup.id.product = PRODUCT_ID;
    for (dst, src) in setup.name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    setup
}

fn abs_axis(fd: i32, code: u16, minimum: i32, maximum: i32) -> Result<(), Error> {
    unsafe {
        ioctl::ui_set_absbit(fd, code as libc::c_ulong)?;
    }
    let mut setup: libc::uinput_abs_setup = unsafe { mem::zeroed() };
    setup.code = code;
    setup.absinfo.minimum = minimum;
    setup.absinfo.maximum = maximum;
    unsafe {
        ioctl::ui_abs_setup(fd, &setup)?;
    }
    Ok(())
}

fn create_mouse() -> Result<VirtualDevice, Error> {
    let file = open_uinput()?;
    let fd = file.as_raw_fd();
    unsafe {
        ioctl::ui_set_evbit(fd, codes::EV_KEY as libc::c_ulong)?;
        ioctl::ui_set_keybit(fd, codes::BTN_LEFT as libc::c_ulong)?;
        ioctl::ui_set_keybit(fd, codes::BTN_RIGHT as libc::c_ulong)?;
        ioctl::ui_set_evbit(fd, codes::EV_REL as libc::c_ulong)?;
        ioctl::ui_set_relbit(fd, codes::REL_X as libc::c_ulong)?;
        ioctl::ui_set_relbit(fd, codes::REL_Y as libc::c_ulong)?;
        ioctl::ui_dev_setup(fd, &device_setup("uiprobe mouse device"))?;
        ioctl::ui_dev_create(fd)?;
    }
    Ok(VirtualDevice { file, gesture: Mutex::new(()) })
}

fn create_keyboard() -> Result<VirtualDevice, Error> {
    let file = open_uinput()?;
    let fd = file.as_raw_fd();
    unsafe {
        ioctl::ui_set_evbit(fd, codes::EV_KEY as libc::c_ulong)?;
        for key in codes::KEY_ESC..=codes::KEY_RIGHT {
            ioctl::ui_set_keybit(fd, key as libc::c_ulong)?;
        }
        ioctl::ui_dev_setup(fd, &device_setup("uiprobe keyboard device"))?;
        ioctl::ui_dev_create(fd)?;
    }
    Ok(VirtualDevice { file, gesture: Mutex::new(()) })
}

// The name contains "touchinput" so the device classifies as a touchscreen
// in its own discovery pass.
fn create_touchscreen() -> Result<VirtualDevice, Error> {
    let file = open_uinput()?;
    let fd = file.as_raw_fd();
    unsafe {
        ioctl::ui_set_evbit(fd, codes::EV_ABS as libc::c_ulong)?;
        ioctl::ui_set_evbit(fd, codes::EV_KEY as libc::c_ulong)?;
        ioctl::ui_set_keybit(fd, codes::BTN_TOUCH as libc::c_ulong)?;
    }
    abs_axis(fd, codes::ABS_X, 0, AXIS_MAX)?;
    abs_axis(fd, codes::ABS_Y, 0, AXIS_MAX)?;
    abs_axis(fd, codes::ABS_MT_POSITION_X, 0, AXIS_MAX)?;
    abs_axis(fd, codes::ABS_MT_POSITION_Y, 0, AXIS_MAX)?;
    abs_axis(fd, codes::ABS_MT_PRESSURE, 0, PRESSURE_MAX)?;
    abs_axis(fd, codes::ABS_MT_SLOT, 0, SLOT_MAX)?;
    abs_axis(fd, codes::ABS_MT_TRACKING_ID, 0, TRACKING_MAX)?;
    unsafe {
        ioctl::ui_dev_setup(fd, &device_setup("uiprobe touchinput device"))?;
        ioctl::ui_dev_create(fd)?;
    }
    Ok(VirtualDevice { file, gesture: Mutex::new(()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_map_to_fixed_slots() {
        assert_eq!(DeviceSlot::from_event(0).unwrap(), DeviceSlot::Mouse);
        assert_eq!(DeviceSlot::from_event(1).unwrap(), DeviceSlot::Keyboard);
        assert_eq!(DeviceSlot::from_event(2).unwrap(), DeviceSlot::Touchscreen);
    }

    #[test]
    fn unknown_event_id_is_rejected() {
        let err = DeviceSlot::from_event(3).unwrap_err();
        assert_eq!(err.to_string(), "event not found");
        assert!(DeviceSlot::from_event(-1).is_err());
    }

    #[test]
    fn setup_name_fits_the_fixed_buffer() {
        let setup = device_setup("uiprobe touchinput device");
        assert_eq!(setup.id.vendor, VENDOR_ID);
        assert_eq!(setup.id.product, PRODUCT_ID);
        let name: Vec<u8> = setup
            .name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        assert_eq!(name, b"uiprobe touchinput device");
    }
}
