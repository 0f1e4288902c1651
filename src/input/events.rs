// SPDX-License-Identifier: Apache-2.0
//
// Kernel input_event writer: single-record primitives and the composite
// gesture sequences built from them.

use std::fs::File;
use std::io::{self, Write};
use std::mem;
use std::slice;
use std::time::Duration;

/// Event type, code and bus constants from linux/input-event-codes.h.
pub mod codes {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_REL: u16 = 0x02;
    pub const EV_ABS: u16 = 0x03;

    pub const SYN_REPORT: u16 = 0;

    pub const KEY_ESC: u16 = 1;
    pub const KEY_RIGHT: u16 = 106;

    pub const BTN_LEFT: u16 = 0x110;
    pub const BTN_RIGHT: u16 = 0x111;
    pub const BTN_TOUCH: u16 = 0x14a;

    pub const REL_X: u16 = 0x00;
    pub const REL_Y: u16 = 0x01;

    pub const ABS_X: u16 = 0x00;
    pub const ABS_Y: u16 = 0x01;
    pub const ABS_MT_SLOT: u16 = 0x2f;
    pub const ABS_MT_TOUCH_MAJOR: u16 = 0x30;
    pub const ABS_MT_WIDTH_MAJOR: u16 = 0x32;
    pub const ABS_MT_POSITION_X: u16 = 0x35;
    pub const ABS_MT_POSITION_Y: u16 = 0x36;
    pub const ABS_MT_TRACKING_ID: u16 = 0x39;
    pub const ABS_MT_PRESSURE: u16 = 0x3a;

    pub const BUS_USB: u16 = 0x03;
}

use codes::*;

/// Tracking id assigned while a contact is down; -1 ends the contact.
pub const TRACKING_START: i32 = 100;
pub const TRACKING_END: i32 = -1;

const SWIPE_PRESSURE: i32 = 50;
const KEY_DELAY: Duration = Duration::from_millis(1000);
const SWIPE_STEP_DELAY: Duration = Duration::from_millis(500);

/// Writes one record with a zeroed timestamp; the kernel stamps it on
/// delivery. A short or failed write(2) surfaces as the io error.
fn write_record(mut fd: &File, kind: u16, code: u16, value: i32) -> io::Result<()> {
    let record = libc::input_event {
        time: libc::timeval { tv_sec: 0, tv_usec: 0 },
        type_: kind,
        code,
        value,
    };
    let bytes = unsafe {
        slice::from_raw_parts(
            &record as *const libc::input_event as *const u8,
            mem::size_of::<libc::input_event>(),
        )
    };
    fd.write_all(bytes)
}

/// Commits everything written since the previous report.
pub fn send_syn(fd: &File) -> io::Result<()> {
    write_record(fd, EV_SYN, SYN_REPORT, 0)
}

pub fn send_button(value: i32, fd: &File) -> io::Result<()> {
    write_record(fd, EV_KEY, BTN_TOUCH, value)
}

/// Press followed by release; the caller commits with [`send_syn`].
pub fn send_key(key: u16, fd: &File) -> io::Result<()> {
    write_record(fd, EV_KEY, key, 1)?;
    write_record(fd, EV_KEY, key, 0)
}

pub fn send_pressure(value: i32, fd: &File) -> io::Result<()> {
    write_record(fd, EV_ABS, ABS_MT_PRESSURE, value)
}

pub fn send_major(value: i32, fd: &File) -> io::Result<()> {
    write_record(fd, EV_ABS, ABS_MT_TOUCH_MAJOR, value)?;
    write_record(fd, EV_ABS, ABS_MT_WIDTH_MAJOR, value)
}

pub fn send_pos_abs(x: i32, y: i32, fd: &File) -> io::Result<()> {
    write_record(fd, EV_ABS, ABS_X, x)?;
    write_record(fd, EV_ABS, ABS_Y, y)
}

pub fn send_pos_mt(x: i32, y: i32, fd: &File) -> io::Result<()> {
    write_record(fd, EV_ABS, ABS_MT_POSITION_X, x)?;
    write_record(fd, EV_ABS, ABS_MT_POSITION_Y, y)
}

pub fn send_tracking(value: i32, fd: &File) -> io::Result<()> {
    write_record(fd, EV_ABS, ABS_MT_TRACKING_ID, value)
}

/// Types a sequence of key codes, one committed press/release per second.
pub async fn send_text(keys: &[u16], fd: &File) -> io::Result<()> {
    for &key in keys {
        send_key(key, fd)?;
        send_syn(fd)?;
        tokio::time::sleep(KEY_DELAY).await;
    }
    Ok(())
}

/// Puts a contact down at (x, y), holds it for `duration` seconds and lifts
/// it again.
pub async fn send_touch(x: i32, y: i32, duration: i32, fd: &File) -> io::Result<()> {
    send_tracking(TRACKING_START, fd)?;
    send_pos_mt(x, y, fd)?;
    send_button(1, fd)?;
    send_pos_abs(x, y, fd)?;
    send_syn(fd)?;

    if duration > 0 {
        tokio::time::sleep(Duration::from_secs(duration as u64)).await;
    }

    send_tracking(TRACKING_END, fd)?;
    send_button(0, fd)?;
    send_syn(fd)
}

/// Drags a contact from (x, y) to (x2, y2) in `velocity` steps, 500 ms
/// apart. Emits `velocity + 2` reports: the initial contact, one per step,
/// and a final report that commits the end position together with the
/// release.
pub async fn send_swipe(
    mut x: i32,
    mut y: i32,
    x2: i32,
    y2: i32,
    velocity: i32,
    fd: &File,
) -> io::Result<()> {
    let step_x = if velocity != 0 { (x2 - x) / velocity } else { 0 };
    let step_y = if velocity != 0 { (y2 - y) / velocity } else { 0 };
    let mut major = 2;

    send_major(major, fd)?;
    send_pressure(SWIPE_PRESSURE, fd)?;
    send_pos_mt(x, y, fd)?;
    send_tracking(TRACKING_START, fd)?;
    send_button(1, fd)?;
    send_syn(fd)?;

    for _ in 0..velocity {
        major += 1;
        send_major(major, fd)?;
        send_pressure(SWIPE_PRESSURE, fd)?;
        send_tracking(TRACKING_START, fd)?;
        send_pos_mt(x, y, fd)?;
        send_syn(fd)?;
        tokio::time::sleep(SWIPE_STEP_DELAY).await;
        x += step_x;
        y += step_y;
    }

    send_pos_mt(x2, y2, fd)?;
    send_major(0, fd)?;
    send_pressure(0, fd)?;
    send_tracking(TRACKING_END, fd)?;
    send_button(0, fd)?;
    send_syn(fd)
}
