//! Connection to the physical light device.
//!
//! [`DeviceHandle`] tracks whether the device is reachable, polls its health
//! in the background, and reconnects when it drops. Pushing a frame never
//! waits for a reconnect: a disconnected handle fails straight away and the
//! caller skips that frame.

pub mod twinkly;

#[cfg(test)]
pub(crate) mod testing;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    frame::{FrameShape, PixelFrame},
    layout::LightLayout,
    Result, StarsError,
};

/// Status code a healthy device reports.
pub const STATUS_OK: i64 = 1000;

/// Facts learned about a device while connecting.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub address: String,
    pub shape: FrameShape,
}

/// Control channel to a connected device.
pub trait DeviceControl: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Polls the device's status endpoint and returns its status code.
    fn status(&self) -> BoxFuture<'_, Result<i64>>;

    /// Transmits one frame of row-major bytes.
    fn send_frame<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Reads the spatial layout stored on the device.
    fn layout(&self) -> BoxFuture<'_, Result<LightLayout>>;
}

/// Locates a device and initialises it for real-time frames.
pub trait Connector: Send + Sync {
    /// `device_id` of `None` accepts whichever device answers first.
    fn connect<'a>(&'a self, device_id: Option<&'a str>)
        -> BoxFuture<'a, Result<Arc<dyn DeviceControl>>>;
}

/// Shared handle to the render device.
pub struct DeviceHandle {
    inner: Arc<DeviceInner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

struct DeviceInner {
    device_id: Option<String>,
    connector: Arc<dyn Connector>,
    connected: AtomicBool,
    control: RwLock<Arc<dyn DeviceControl>>,
    monitor_interval: Duration,
    stop: watch::Sender<bool>,
}

impl DeviceHandle {
    /// Discovers and initialises the device. The handle starts out connected.
    pub async fn connect(
        device_id: Option<String>,
        connector: Arc<dyn Connector>,
        monitor_interval: Duration,
    ) -> Result<Self> {
        let control = connector.connect(device_id.as_deref()).await?;
        let info = control.info();
        info!(name = %info.name, address = %info.address, shape = %info.shape, "device connected");
        let (stop, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(DeviceInner {
                device_id,
                connector,
                connected: AtomicBool::new(true),
                control: RwLock::new(control),
                monitor_interval,
                stop,
            }),
            monitor: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> Result<DeviceInfo> {
        Ok(self.inner.control()?.info().clone())
    }

    pub fn shape(&self) -> Result<FrameShape> {
        Ok(self.inner.control()?.info().shape)
    }

    /// Pushes one frame to the device.
    ///
    /// Fails without any I/O when the handle is disconnected or the frame's
    /// shape differs from the device's. A failed transmission marks the
    /// handle disconnected; the health monitor brings it back.
    pub async fn set_frame_array(&self, frame: &PixelFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(StarsError::DeviceDisconnected);
        }
        let control = self.inner.control()?;
        let expected = control.info().shape;
        if frame.shape() != expected {
            return Err(StarsError::FrameShape {
                expected,
                actual: frame.shape(),
            });
        }
        if let Err(e) = control.send_frame(frame.as_bytes()).await {
            self.inner.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Reads the light layout stored on the device.
    pub async fn layout(&self) -> Result<LightLayout> {
        if !self.is_connected() {
            return Err(StarsError::DeviceDisconnected);
        }
        let control = self.inner.control()?;
        control.layout().await
    }

    /// Runs one health check: polls status while connected, otherwise
    /// attempts to reconnect.
    pub async fn check_health(&self) {
        self.inner.check_health().await;
    }

    /// Starts the background health monitor. Does nothing if it is running.
    pub fn start_monitor(&self) {
        let Ok(mut monitor) = self.monitor.lock() else {
            error!("device monitor slot has been poisoned");
            return;
        };
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.inner.stop.send_replace(false);
        let inner = self.inner.clone();
        *monitor = Some(tokio::spawn(async move { inner.run_monitor().await }));
    }

    pub fn stop_monitor(&self) {
        self.inner.stop.send_replace(true);
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device_id", &self.inner.device_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl DeviceInner {
    fn control(&self) -> Result<Arc<dyn DeviceControl>> {
        self.control
            .read()
            .map(|control| control.clone())
            .map_err(|_| StarsError::msg("device control has been poisoned"))
    }

    async fn run_monitor(&self) {
        let mut stop = self.stop.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.monitor_interval) => {}
                _ = stop.changed() => {}
            }
            if *stop.borrow() {
                break;
            }
            self.check_health().await;
        }
        debug!("device monitor stopped");
    }

    async fn check_health(&self) {
        if self.connected.load(Ordering::SeqCst) {
            let control = match self.control() {
                Ok(control) => control,
                Err(e) => {
                    error!(error = %e, "device check failed");
                    return;
                }
            };
            match control.status().await {
                Ok(STATUS_OK) => debug!("device status nominal"),
                Ok(code) => {
                    warn!(code, "device reported unexpected status");
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(e) => {
                    error!(error = %e, "device check failed");
                    self.connected.store(false, Ordering::SeqCst);
                }
            }
            return;
        }

        match self.connector.connect(self.device_id.as_deref()).await {
            Ok(control) => {
                info!(name = %control.info().name, "device reconnected");
                match self.control.write() {
                    Ok(mut slot) => {
                        *slot = control;
                        self.connected.store(true, Ordering::SeqCst);
                    }
                    Err(_) => error!("device control has been poisoned"),
                }
            }
            Err(e) if e.is_discovery_timeout() => warn!("device not found, retrying later"),
            Err(e) => error!(error = %e, "device reconnect failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeConnector, FakeControl};
    use super::*;
    use crate::frame::ChannelLayout;

    const SHAPE: FrameShape = FrameShape {
        leds: 4,
        layout: ChannelLayout::Wrgb,
    };

    async fn connected_handle() -> (DeviceHandle, Arc<FakeControl>, Arc<FakeConnector>) {
        let control = Arc::new(FakeControl::new(SHAPE));
        let connector = Arc::new(FakeConnector::new(control.clone()));
        let handle = DeviceHandle::connect(
            Some("Twinkly_TEST".to_string()),
            connector.clone(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        (handle, control, connector)
    }

    #[tokio::test]
    async fn pushes_frames_while_connected() {
        let (handle, control, _) = connected_handle().await;
        assert!(handle.is_connected());

        let mut frame = PixelFrame::new(SHAPE);
        frame.set_rgb(0, [1, 2, 3]);
        handle.set_frame_array(&frame).await.unwrap();

        assert_eq!(control.sent_frames(), 1);
        assert_eq!(control.last_frame().unwrap()[..4], [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn wrong_shape_fails_before_io() {
        let (handle, control, _) = connected_handle().await;

        let too_few = PixelFrame::new(FrameShape::new(3, ChannelLayout::Wrgb));
        let wrong_channels = PixelFrame::new(FrameShape::new(4, ChannelLayout::Rgb));
        for frame in [too_few, wrong_channels] {
            assert!(matches!(
                handle.set_frame_array(&frame).await,
                Err(StarsError::FrameShape { .. })
            ));
        }
        assert_eq!(control.sent_frames(), 0);
    }

    #[tokio::test]
    async fn bad_status_disconnects_and_blocks_frames() {
        let (handle, control, _) = connected_handle().await;
        control.set_status(500);

        handle.check_health().await;
        assert!(!handle.is_connected());

        let result = handle.set_frame_array(&PixelFrame::new(SHAPE)).await;
        assert!(matches!(result, Err(StarsError::DeviceDisconnected)));
        assert_eq!(control.sent_frames(), 0);
    }

    #[tokio::test]
    async fn status_error_disconnects() {
        let (handle, control, _) = connected_handle().await;
        control.fail_status(true);
        handle.check_health().await;
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn reconnects_on_next_check() {
        let (handle, control, connector) = connected_handle().await;
        control.set_status(500);
        handle.check_health().await;
        assert!(!handle.is_connected());

        connector.set_timeout(true);
        handle.check_health().await;
        assert!(!handle.is_connected());

        connector.set_timeout(false);
        control.set_status(STATUS_OK);
        handle.check_health().await;
        assert!(handle.is_connected());
        assert_eq!(connector.connects(), 3);

        handle.set_frame_array(&PixelFrame::new(SHAPE)).await.unwrap();
        assert_eq!(control.sent_frames(), 1);
    }

    #[tokio::test]
    async fn failed_push_marks_disconnected() {
        let (handle, control, _) = connected_handle().await;
        control.fail_sends(true);

        assert!(handle.set_frame_array(&PixelFrame::new(SHAPE)).await.is_err());
        assert!(!handle.is_connected());
        assert!(matches!(
            handle.set_frame_array(&PixelFrame::new(SHAPE)).await,
            Err(StarsError::DeviceDisconnected)
        ));
        assert_eq!(control.send_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_polls_in_background() {
        let (handle, control, _) = connected_handle().await;
        handle.start_monitor();
        control.set_status(500);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!handle.is_connected());
        assert_eq!(control.status_polls(), 1);

        handle.stop_monitor();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(control.status_polls(), 1);
    }

    #[tokio::test]
    async fn layout_requires_connection() {
        let (handle, control, _) = connected_handle().await;
        assert_eq!(handle.layout().await.unwrap().len(), 4);

        control.set_status(500);
        handle.check_health().await;
        assert!(matches!(handle.layout().await, Err(StarsError::DeviceDisconnected)));
    }
}
