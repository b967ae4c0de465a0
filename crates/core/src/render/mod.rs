//! Fixed-rate render loop and the supervisory pipeline around it.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    device::{Connector, DeviceHandle},
    scene::{Activity, FrameGenerator, FrameInput, Scene, SceneContext},
    subscription::{Subscription, SubscriptionConfig},
    timeline::{next_tick, FrameClock},
    Result, StarsError,
};

/// Drives one generator against one device at a fixed period.
///
/// Nothing that happens inside a tick ends the loop: generator failures,
/// dropped frames and failed server calls are logged and the next tick runs
/// on schedule.
pub struct RenderLoop<'a> {
    device: &'a DeviceHandle,
    subscription: &'a Subscription,
    clock: FrameClock,
    tick: u64,
}

impl<'a> RenderLoop<'a> {
    pub fn new(device: &'a DeviceHandle, subscription: &'a Subscription, period: Duration) -> Self {
        Self {
            device,
            subscription,
            clock: FrameClock::new(period),
            tick: 0,
        }
    }

    /// Index of the next tick to render.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Renders and pushes a single frame.
    pub async fn step<G>(&mut self, scene: &mut G)
    where
        G: FrameGenerator + ?Sized,
    {
        let started = Instant::now();
        let tick = self.tick;
        let state = self.subscription.state();
        let input = FrameInput {
            state: &state,
            tick,
            now: started,
            device_connected: self.device.is_connected(),
        };

        match scene.render(&input) {
            Ok(frame) => match self.device.set_frame_array(&frame).await {
                Ok(()) => {}
                Err(StarsError::DeviceDisconnected) => {
                    info!(tick, "device disconnected, frame skipped")
                }
                Err(e) => error!(tick, error = %e, "frame push failed"),
            },
            Err(e) => error!(tick, error = %e, "frame generator failed"),
        }

        for call in scene.drain_calls() {
            if let Err(e) = self.subscription.cast(&call.method, call.params) {
                info!(method = %call.method, error = %e, "server call not sent");
            }
        }

        debug!(
            tick,
            render_ms = started.elapsed().as_secs_f64() * 1000.0,
            "frame rendered"
        );
        self.tick = next_tick(tick);
    }

    /// Runs until the surrounding future is dropped.
    pub async fn run<G>(&mut self, scene: &mut G)
    where
        G: FrameGenerator + ?Sized,
    {
        info!(period_ms = self.clock.period().as_millis() as u64, "render loop started");
        loop {
            self.clock.tick().await;
            self.step(scene).await;
        }
    }
}

/// Outer restart loop around one activity.
///
/// Every attempt starts from scratch: a fresh subscription, a fresh device
/// handle and a freshly built scene. Whatever ends an attempt is logged and
/// the next one begins after the restart cooldown.
pub struct Pipeline {
    config: AppConfig,
    activity: Activity,
    connector: Arc<dyn Connector>,
}

impl Pipeline {
    pub fn new(config: AppConfig, activity: Activity, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            activity,
            connector,
        }
    }

    /// Runs attempts until `shutdown` completes. Resources of the attempt in
    /// flight are released when it is dropped.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future,
    {
        tokio::pin!(shutdown);
        let cooldown = self.config.render.restart_cooldown();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.run_once() => match result {
                    Ok(()) => info!(activity = %self.activity, "activity finished"),
                    Err(e) if e.is_discovery_timeout() => {
                        warn!(activity = %self.activity, "device not found, retrying")
                    }
                    Err(e) => error!(activity = %self.activity, error = %e, "activity failed"),
                },
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(cooldown) => {}
            }
        }
        info!(activity = %self.activity, "shutting down");
    }

    async fn run_once(&self) -> Result<()> {
        let server = &self.config.server;
        let mut sub_config =
            SubscriptionConfig::new(server.websocket_url(), self.activity.collection());
        sub_config.params = self.activity.subscription_params(server.token.as_deref());
        sub_config.token = server.token.clone();
        let subscription = Subscription::new(sub_config, self.config.reconnect.clone());
        subscription.start();

        let device = DeviceHandle::connect(
            self.config.device.device_id.clone(),
            self.connector.clone(),
            self.config.device.monitor_interval(),
        )
        .await?;
        device.start_monitor();

        let mut scene = Scene::build(
            self.activity,
            SceneContext {
                device: &device,
                subscription: &subscription,
                layout_path: &self.config.render.layout_path,
            },
        )
        .await?;

        RenderLoop::new(&device, &subscription, self.activity.frame_period())
            .run(&mut scene)
            .await;
        Ok(())
    }
}
