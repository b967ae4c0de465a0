//! In-memory device doubles shared by the device and render tests.

use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures_util::future::BoxFuture;

use super::{Connector, DeviceControl, DeviceInfo, STATUS_OK};
use crate::{
    frame::FrameShape,
    layout::{Coordinate, LightLayout},
    Result, StarsError,
};

pub(crate) struct FakeControl {
    info: DeviceInfo,
    status: AtomicI64,
    fail_status: AtomicBool,
    fail_sends: AtomicBool,
    status_polls: AtomicUsize,
    send_attempts: AtomicUsize,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl FakeControl {
    pub(crate) fn new(shape: FrameShape) -> Self {
        Self {
            info: DeviceInfo {
                name: "Twinkly_TEST".to_string(),
                address: "127.0.0.1".to_string(),
                shape,
            },
            status: AtomicI64::new(STATUS_OK),
            fail_status: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            status_polls: AtomicUsize::new(0),
            send_attempts: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_status(&self, code: i64) {
        self.status.store(code, Ordering::SeqCst);
    }

    pub(crate) fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub(crate) fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn sent_frames(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub(crate) fn last_frame(&self) -> Option<Vec<u8>> {
        self.frames.lock().unwrap().last().cloned()
    }
}

impl DeviceControl for FakeControl {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn status(&self) -> BoxFuture<'_, Result<i64>> {
        Box::pin(async move {
            self.status_polls.fetch_add(1, Ordering::SeqCst);
            if self.fail_status.load(Ordering::SeqCst) {
                return Err(StarsError::msg("status request failed"));
            }
            Ok(self.status.load(Ordering::SeqCst))
        })
    }

    fn send_frame<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.send_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(StarsError::msg("frame send failed"));
            }
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        })
    }

    fn layout(&self) -> BoxFuture<'_, Result<LightLayout>> {
        let leds = self.info.shape.leds;
        Box::pin(async move {
            let coordinates = (0..leds)
                .map(|i| Coordinate {
                    x: i as f32,
                    y: (leds - i) as f32,
                    z: 0.0,
                })
                .collect();
            Ok(LightLayout { coordinates })
        })
    }
}

pub(crate) struct FakeConnector {
    control: Arc<FakeControl>,
    timeout: AtomicBool,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn new(control: Arc<FakeControl>) -> Self {
        Self {
            control,
            timeout: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_timeout(&self, timeout: bool) {
        self.timeout.store(timeout, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        device_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Arc<dyn DeviceControl>>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.timeout.load(Ordering::SeqCst) {
                return Err(StarsError::DiscoveryTimeout {
                    device_id: device_id.unwrap_or("any").to_string(),
                    timeout: std::time::Duration::from_millis(10),
                });
            }
            Ok(self.control.clone() as Arc<dyn DeviceControl>)
        })
    }
}
