// SPDX-License-Identifier: Apache-2.0
//
// Input device discovery: maps logical device kinds to event node ids.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Touchscreen,
    Trackpad,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Keyboard => "Keyboard",
            DeviceKind::Mouse => "Mouse",
            DeviceKind::Touchscreen => "Touch",
            DeviceKind::Trackpad => "Trackpad",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceMapping {
    pub event_number: i32,
    /// 1 for the first device of a kind, 2 for the second, and so on.
    pub relevance: i32,
    pub kind: DeviceKind,
}

/// The uinput backend registers its virtual devices at fixed ids.
pub fn builtin_uinput_table() -> Vec<DeviceMapping> {
    vec![
        DeviceMapping { event_number: 0, relevance: 1, kind: DeviceKind::Mouse },
        DeviceMapping { event_number: 1, relevance: 1, kind: DeviceKind::Keyboard },
        DeviceMapping { event_number: 2, relevance: 1, kind: DeviceKind::Touchscreen },
    ]
}

/// Reads the kernel's input device table; `None` when nothing recognizable
/// was found, so handlers fall back to explicit `event` fields.
pub fn load_evdev_table() -> Option<Vec<DeviceMapping>> {
    let text = match std::fs::read_to_string("/proc/bus/input/devices") {
        Ok(text) => text,
        Err(err) => {
            debug!("could not read /proc/bus/input/devices: {err}");
            return None;
        }
    };
    let table = parse_proc_devices(&text);
    if table.is_empty() {
        None
    } else {
        Some(table)
    }
}

/// Parses `/proc/bus/input/devices` content. Each block contributes one
/// entry when its `N: Name` classifies to a known kind and its `S: Sysfs`
/// path ends in an `input<K>` segment.
pub fn parse_proc_devices(text: &str) -> Vec<DeviceMapping> {
    let mut name: Option<String> = None;
    let mut sysfs: Option<String> = None;
    let mut relevance: HashMap<DeviceKind, i32> = HashMap::new();
    let mut table = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("N:") {
            name = field_value(rest, "Name");
        } else if let Some(rest) = line.strip_prefix("S:") {
            sysfs = field_value(rest, "Sysfs");
        }

        if let (Some(device_name), Some(path)) = (&name, &sysfs) {
            if let (Some(kind), Some(event_number)) =
                (classify(device_name), event_number_of(path))
            {
                let count = relevance.entry(kind).or_insert(0);
                *count += 1;
                table.push(DeviceMapping { event_number, relevance: *count, kind });
            }
            name = None;
            sysfs = None;
        }
    }

    table.sort_by_key(|entry| (entry.event_number, entry.relevance));
    table
}

/// Returns the event id of the first device of `kind`, in table order.
pub fn event_id_for(table: &[DeviceMapping], kind: DeviceKind) -> Option<i32> {
    table
        .iter()
        .find(|entry| entry.kind == kind)
        .map(|entry| entry.event_number)
}

pub fn log_table(table: &[DeviceMapping]) {
    for entry in table {
        info!("'{}' event on id '{}'", entry.kind, entry.event_number);
    }
}

fn field_value(rest: &str, key: &str) -> Option<String> {
    let (found_key, value) = rest.split_once('=')?;
    if found_key.trim() != key {
        return None;
    }
    Some(value.trim().trim_matches('"').trim().to_string())
}

fn classify(name: &str) -> Option<DeviceKind> {
    let name = name.to_lowercase();
    if name.contains("keyboard") {
        Some(DeviceKind::Keyboard)
    } else if name.contains("mouse") {
        Some(DeviceKind::Mouse)
    } else if name.contains("touchpad") {
        Some(DeviceKind::Trackpad)
    } else if name.contains("touchinput") {
        Some(DeviceKind::Touchscreen)
    } else {
        None
    }
}

/// The trailing `input<K>` path segment carries the event id.
fn event_number_of(sysfs: &str) -> Option<i32> {
    sysfs
        .rsplit('/')
        .find(|segment| !segment.is_empty())?
        .strip_prefix("input")?
        .parse()
        .ok()
}
