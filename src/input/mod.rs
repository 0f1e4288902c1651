// SPDX-License-Identifier: Apache-2.0
//
// Input backends and device discovery.

pub mod discover;
pub mod evdev;
pub mod events;
pub mod uinput;

use crate::error::Error;

pub use evdev::EvdevBackend;
pub use uinput::UinputBackend;

/// The process owns exactly one input backend, selected at startup.
pub enum InputBackend {
    Evdev(EvdevBackend),
    Uinput(UinputBackend),
}

impl InputBackend {
    pub async fn move_to(&self, x: i32, y: i32, event: i32) -> Result<(), Error> {
        match self {
            InputBackend::Evdev(backend) => backend.move_to(x, y, event).await,
            InputBackend::Uinput(backend) => backend.move_to(x, y, event).await,
        }
    }

    pub async fn button(&self, value: i32, event: i32) -> Result<(), Error> {
        match self {
            InputBackend::Evdev(backend) => backend.button(value, event).await,
            InputBackend::Uinput(backend) => backend.button(value, event).await,
        }
    }

    pub async fn touch(&self, x: i32, y: i32, duration: i32, event: i32) -> Result<(), Error> {
        match self {
            InputBackend::Evdev(backend) => backend.touch(x, y, duration, event).await,
            InputBackend::Uinput(backend) => backend.touch(x, y, duration, event).await,
        }
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
        match self {
            InputBackend::Evdev(backend) => backend.swipe(x, y, x2, y2, velocity, event).await,
            InputBackend::Uinput(backend) => backend.swipe(x, y, x2, y2, velocity, event).await,
        }
    }

    pub async fn key(&self, key: u16, event: i32) -> Result<(), Error> {
        match self {
            InputBackend::Evdev(backend) => backend.key(key, event).await,
            InputBackend::Uinput(backend) => backend.key(key, event).await,
        }
    }

    pub async fn text(&self, keys: &[u16], event: i32) -> Result<(), Error> {
        match self {
            InputBackend::Evdev(backend) => backend.text(keys, event).await,
            InputBackend::Uinput(backend) => backend.text(keys, event).await,
        }
    }
}
