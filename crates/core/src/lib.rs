//! Core library for the Shooting Stars light sculpture controller.
//!
//! The controller mirrors a server-side collection over a DDP websocket,
//! turns it into LED frames with one generator per activity, and streams the
//! frames to a networked LED device at a fixed rate. Each module owns one of
//! those subsystems; [`render::Pipeline`] ties them together.

pub mod config;
pub mod ddp;
pub mod device;
pub mod error;
pub mod frame;
pub mod layout;
pub mod render;
pub mod scene;
pub mod subscription;
pub mod timeline;

pub use config::{AppConfig, DeviceConfig, ReconnectPolicy, RenderConfig, ServerConfig};
pub use device::{
    twinkly::TwinklyConnector, Connector, DeviceControl, DeviceHandle, DeviceInfo,
};
pub use error::{Result, StarsError};
pub use frame::{ChannelLayout, FrameShape, PixelFrame};
pub use layout::LightLayout;
pub use render::{Pipeline, RenderLoop};
pub use scene::{Activity, FrameGenerator, FrameInput, Scene};
pub use subscription::{Collection, PendingCall, Subscription, SubscriptionConfig};
pub use timeline::{FrameClock, Watermark};
