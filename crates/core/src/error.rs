use std::time::Duration;

use crate::frame::FrameShape;

/// Result alias that carries the custom [`StarsError`] type.
pub type Result<T> = std::result::Result<T, StarsError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum StarsError {
    /// Free-form error for failures that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The subscription currently has no open connection to send on.
    #[error("subscription is not connected")]
    NotConnected,
    /// The render device is marked disconnected; nothing was sent.
    #[error("device disconnected")]
    DeviceDisconnected,
    /// No device answered discovery within the allotted time.
    #[error("no device `{device_id}` found within {timeout:?}")]
    DiscoveryTimeout { device_id: String, timeout: Duration },
    #[error("discovery failed: {0}")]
    Discovery(String),
    /// A frame did not match the layout the device expects.
    #[error("frame shape {actual} does not match device shape {expected}")]
    FrameShape {
        expected: FrameShape,
        actual: FrameShape,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The server answered a method call with an error payload.
    #[error("remote call `{method}` failed: {error}")]
    RemoteCall {
        method: String,
        error: serde_json::Value,
    },
    /// The subscription was dropped before the call was answered.
    #[error("remote call abandoned before a result arrived")]
    CallAbandoned,
    #[error("layout error: {0}")]
    Layout(String),
}

impl StarsError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Discovery timeouts are expected while a device is powered off and are
    /// logged without a full error report.
    pub fn is_discovery_timeout(&self) -> bool {
        matches!(self, Self::DiscoveryTimeout { .. })
    }
}

impl From<&str> for StarsError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for StarsError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
