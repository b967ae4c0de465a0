//! Frame generators, one per activity.
//!
//! Every generator turns the current snapshot of its subscribed collection
//! into one [`PixelFrame`] per tick. They share the scheduler contract in
//! [`crate::render`], so swapping activities never touches the render loop.

pub mod blocks;
pub mod colour;
pub mod lights;
pub mod paint;
pub mod presence;

use std::{fmt, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::info;

use crate::{
    device::DeviceHandle,
    frame::{FrameShape, PixelFrame},
    layout::LightLayout,
    subscription::{Collection, Subscription},
    Result, StarsError,
};

pub use blocks::BlocksScene;
pub use lights::AmbientLights;
pub use paint::PaintScene;
pub use presence::PresenceScene;

/// Selectable operating mode of the sculpture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Lights,
    Blocks,
    Paint,
    Presence,
}

impl Activity {
    pub const ALL: [Activity; 4] = [Self::Lights, Self::Blocks, Self::Paint, Self::Presence];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lights => "lights",
            Self::Blocks => "blocks",
            Self::Paint => "paint",
            Self::Presence => "presence",
        }
    }

    /// Publication (and collection) the activity mirrors.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Lights => "lights",
            Self::Blocks => "blocksInputs",
            Self::Paint => "paint",
            Self::Presence => "presence",
        }
    }

    pub fn frame_period(self) -> Duration {
        match self {
            Self::Lights => Duration::from_millis(500),
            Self::Blocks => Duration::from_millis(200),
            Self::Paint | Self::Presence => Duration::from_millis(100),
        }
    }

    /// Subscription parameters. Presence is only published to controllers
    /// holding a token.
    pub fn subscription_params(self, token: Option<&str>) -> Option<Vec<Value>> {
        match (self, token) {
            (Self::Presence, Some(token)) => Some(vec![json!(token)]),
            _ => None,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activity {
    type Err = StarsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|activity| activity.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StarsError::msg(format!("unknown activity `{s}`")))
    }
}

/// Everything a generator may look at during one tick.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub state: &'a Collection,
    pub tick: u64,
    pub now: Instant,
    pub device_connected: bool,
}

/// Fire-and-forget method call a generator wants sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl RemoteCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Per-tick frame computation.
pub trait FrameGenerator {
    /// Shape of every frame this generator returns.
    fn shape(&self) -> FrameShape;

    fn render(&mut self, input: &FrameInput<'_>) -> Result<PixelFrame>;

    /// Calls queued during the last render.
    fn drain_calls(&mut self) -> Vec<RemoteCall> {
        Vec::new()
    }
}

/// What a scene needs from the running pipeline while it is being built.
pub struct SceneContext<'a> {
    pub device: &'a DeviceHandle,
    pub subscription: &'a Subscription,
    pub layout_path: &'a Path,
}

/// The generator for the selected activity.
pub enum Scene {
    Lights(AmbientLights),
    Blocks(BlocksScene),
    Paint(PaintScene),
    Presence(PresenceScene),
}

impl Scene {
    /// Prepares the generator for `activity`. Presence waits for the server
    /// configuration and the device layout before returning.
    pub async fn build(activity: Activity, ctx: SceneContext<'_>) -> Result<Self> {
        let device_shape = ctx.device.shape()?;
        let scene = match activity {
            Activity::Lights => Self::Lights(AmbientLights::new(device_shape)),
            Activity::Blocks => Self::Blocks(BlocksScene::new(
                device_shape.layout,
                ctx.subscription.token().map(str::to_string),
            )?),
            Activity::Paint => {
                let layout = LightLayout::load(ctx.layout_path)?;
                let scene = PaintScene::new(&layout, device_shape.layout);
                if scene.shape() != device_shape {
                    return Err(StarsError::FrameShape {
                        expected: device_shape,
                        actual: scene.shape(),
                    });
                }
                Self::Paint(scene)
            }
            Activity::Presence => {
                let config = presence::fetch_config(ctx.subscription).await?;
                let layout = presence::wait_for_layout(ctx.device).await;
                Self::Presence(PresenceScene::new(&layout, device_shape.layout, &config))
            }
        };
        info!(%activity, shape = %scene.shape(), "scene ready");
        Ok(scene)
    }

    fn generator(&mut self) -> &mut dyn FrameGenerator {
        match self {
            Self::Lights(scene) => scene,
            Self::Blocks(scene) => scene,
            Self::Paint(scene) => scene,
            Self::Presence(scene) => scene,
        }
    }
}

impl FrameGenerator for Scene {
    fn shape(&self) -> FrameShape {
        match self {
            Self::Lights(scene) => scene.shape(),
            Self::Blocks(scene) => scene.shape(),
            Self::Paint(scene) => scene.shape(),
            Self::Presence(scene) => scene.shape(),
        }
    }

    fn render(&mut self, input: &FrameInput<'_>) -> Result<PixelFrame> {
        self.generator().render(input)
    }

    fn drain_calls(&mut self) -> Vec<RemoteCall> {
        self.generator().drain_calls()
    }
}
