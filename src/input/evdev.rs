// SPDX-License-Identifier: Apache-2.0
//
// evdev input backend: opens /dev/input/event<N> per operation.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::error::Error;
use crate::input::events;

pub struct EvdevBackend {
    dev_root: PathBuf,
    /// One lock per event id so a gesture in flight is never interleaved
    /// with another sequence on the same node.
    gestures: StdMutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl EvdevBackend {
    pub fn new() -> Self {
        Self::with_root("/dev/input")
    }

    pub fn with_root(dev_root: impl AsRef<Path>) -> Self {
        EvdevBackend {
            dev_root: dev_root.as_ref().to_path_buf(),
            gestures: StdMutex::new(HashMap::new()),
        }
    }

    fn open_event(&self, event: i32) -> Result<File, Error> {
        let path = self.dev_root.join(format!("event{event}"));
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(format!("could not open {}: {err}", path.display())))
    }

    fn gesture_lock(&self, event: i32) -> Arc<Mutex<()>> {
        let mut gestures = self.gestures.lock().expect("gesture table poisoned");
        gestures.entry(event).or_default().clone()
    }

    pub async fn move_to(&self, x: i32, y: i32, event: i32) -> Result<(), Error> {
        let lock = self.gesture_lock(event);
        let _gesture = lock.lock().await;
        let fd = self.open_event(event)?;
        events::send_pos_mt(x, y, &fd)?;
        events::send_syn(&fd)?;
        Ok(())
    }

    pub async fn button(&self, value: i32, event: i32) -> Result<(), Error> {
        let lock = self.gesture_lock(event);
        let _gesture = lock.lock().await;
        let fd = self.open_event(event)?;
        let tracking = if value == 0 {
            events::TRACKING_END
        } else {
            events::TRACKING_START
        };
        events::send_tracking(tracking, &fd)?;
        events::send_button(value, &fd)?;
        events::send_syn(&fd)?;
        Ok(())
    }

    pub async fn touch(&self, x: i32, y: i32, duration: i32, event: i32) -> Result<(), Error> {
        let lock = self.gesture_lock(event);
        let _gesture = lock.lock().await;
        let fd = self.open_event(event)?;
        events::send_touch(x, y, duration, &fd).await?;
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
        let lock = self.gesture_lock(event);
        let _gesture = lock.lock().await;
        let fd = self.open_event(event)?;
        events::send_swipe(x, y, x2, y2, velocity, &fd).await?;
        Ok(())
    }

    pub async fn key(&self, key: u16, event: i32) -> Result<(), Error> {
        let lock = self.gesture_lock(event);
        let _gesture = lock.lock().await;
        let fd = self.open_event(event)?;
        events::send_key(key, &fd)?;
        events::send_syn(&fd)?;
        Ok(())
    }

    pub async fn text(&self, keys: &[u16], event: i32) -> Result<(), Error> {
        let lock = self.gesture_lock(event);
        let _gesture = lock.lock().await;
        let fd = self.open_event(event)?;
        events::send_text(keys, &fd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::events::codes::*;
    use crate::input::events::tests::read_records;

    fn scratch_backend(event: i32) -> (tempfile::TempDir, EvdevBackend) {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join(format!("event{event}"))).unwrap();
        let backend = EvdevBackend::with_root(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn button_down_assigns_tracking_id() {
        let (dir, backend) = scratch_backend(2);
        backend.button(1, 2).await.unwrap();

        let records = read_records(&dir.path().join("event2"));
        assert_eq!(
            records,
            vec![
                (EV_ABS, ABS_MT_TRACKING_ID, 100),
                (EV_KEY, BTN_TOUCH, 1),
                (EV_SYN, SYN_REPORT, 0),
            ]
        );
    }

    #[tokio::test]
    async fn button_up_ends_tracking() {
        let (dir, backend) = scratch_backend(2);
        backend.button(0, 2).await.unwrap();

        let records = read_records(&dir.path().join("event2"));
        assert_eq!(records[0], (EV_ABS, ABS_MT_TRACKING_ID, -1));
        assert_eq!(records[1], (EV_KEY, BTN_TOUCH, 0));
    }

    #[tokio::test]
    async fn missing_node_reports_the_path() {
        let (_dir, backend) = scratch_backend(0);
        let err = backend.move_to(1, 1, 42).await.unwrap_err();
        assert!(err.to_string().contains("could not open"));
        assert!(err.to_string().contains("event42"));
    }
}
