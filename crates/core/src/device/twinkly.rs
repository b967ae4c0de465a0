//! Driver for Twinkly LED controllers.
//!
//! Devices are found by UDP broadcast, configured over their local REST API
//! and fed frames as real-time UDP datagrams.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{Connector, DeviceControl, DeviceInfo, STATUS_OK};
use crate::{
    config::DeviceConfig,
    frame::{ChannelLayout, FrameShape},
    layout::LightLayout,
    Result, StarsError,
};

/// Datagram broadcast to find controllers on the local network.
pub const DISCOVERY_PAYLOAD: &[u8] = b"\x01discover";

/// Largest payload carried by a single real-time datagram.
pub const FRAGMENT_SIZE: usize = 900;
/// Most datagrams one frame can span.
pub const MAX_FRAGMENTS: usize = 256;

const RT_PROTOCOL_VERSION: u8 = 3;
const AUTH_HEADER: &str = "X-Auth-Token";

/// A controller that answered discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: Ipv4Addr,
}

/// Decodes a discovery reply: the address in reversed byte order, `OK`,
/// then the NUL-terminated device name.
pub fn parse_discovery_reply(reply: &[u8]) -> Option<DiscoveredDevice> {
    if reply.len() < 7 || &reply[4..6] != b"OK" {
        return None;
    }
    let address = Ipv4Addr::new(reply[3], reply[2], reply[1], reply[0]);
    let name = reply[6..].split(|&b| b == 0).next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some(DiscoveredDevice {
        name: String::from_utf8_lossy(name).into_owned(),
        address,
    })
}

/// Splits a frame into real-time datagrams.
///
/// Each datagram is the protocol version, the 8-byte session token, two
/// zero bytes and the fragment index, followed by at most
/// [`FRAGMENT_SIZE`] bytes of frame data. The index is a single byte, so a
/// frame needing more than [`MAX_FRAGMENTS`] datagrams is rejected.
pub fn rt_packets(token: &[u8], frame: &[u8]) -> Result<Vec<Vec<u8>>> {
    frame
        .chunks(FRAGMENT_SIZE)
        .enumerate()
        .map(|(index, chunk)| -> Result<Vec<u8>> {
            let index = u8::try_from(index).map_err(|_| {
                StarsError::Protocol(format!(
                    "frame of {} bytes needs more than {MAX_FRAGMENTS} fragments",
                    frame.len()
                ))
            })?;
            let mut packet = Vec::with_capacity(1 + token.len() + 3 + chunk.len());
            packet.push(RT_PROTOCOL_VERSION);
            packet.extend_from_slice(token);
            packet.extend_from_slice(&[0, 0, index]);
            packet.extend_from_slice(chunk);
            Ok(packet)
        })
        .collect()
}

/// Finds a device by name.
pub trait Discovery: Send + Sync {
    fn discover<'a>(&'a self, device_id: Option<&'a str>)
        -> BoxFuture<'a, Result<DiscoveredDevice>>;
}

/// Broadcast discovery bounded by a timeout.
#[derive(Debug, Clone)]
pub struct UdpDiscovery {
    target: SocketAddr,
    timeout: Duration,
}

impl UdpDiscovery {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self::with_target(SocketAddr::from((Ipv4Addr::BROADCAST, port)), timeout)
    }

    /// Sends discovery requests to `target` instead of the broadcast address.
    pub fn with_target(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

impl Discovery for UdpDiscovery {
    fn discover<'a>(
        &'a self,
        device_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<DiscoveredDevice>> {
        Box::pin(async move {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
            socket.set_broadcast(true)?;
            match tokio::time::timeout(self.timeout, search(&socket, self.target, device_id)).await
            {
                Ok(found) => found,
                Err(_) => Err(StarsError::DiscoveryTimeout {
                    device_id: device_id.unwrap_or("any").to_string(),
                    timeout: self.timeout,
                }),
            }
        })
    }
}

/// Repeats the discovery request every second until a matching device answers.
async fn search(
    socket: &UdpSocket,
    target: SocketAddr,
    device_id: Option<&str>,
) -> Result<DiscoveredDevice> {
    let mut resend = tokio::time::interval(Duration::from_secs(1));
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = resend.tick() => {
                socket.send_to(DISCOVERY_PAYLOAD, target).await?;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                match parse_discovery_reply(&buf[..len]) {
                    Some(device) if device_id.map_or(true, |id| id == device.name) => {
                        return Ok(device);
                    }
                    Some(device) => debug!(name = %device.name, "ignoring other device"),
                    None => debug!(%from, "ignoring malformed discovery reply"),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    authentication_token: String,
    #[serde(rename = "challenge-response")]
    challenge_response: String,
    code: i64,
}

#[derive(Debug, Deserialize)]
struct Gestalt {
    number_of_led: usize,
    led_profile: String,
    #[serde(default)]
    device_name: Option<String>,
}

fn check_code(code: i64, what: &str) -> Result<()> {
    if code == STATUS_OK {
        Ok(())
    } else {
        Err(StarsError::Protocol(format!("{what} returned code {code}")))
    }
}

/// Authenticated session with one controller in real-time mode.
pub struct TwinklyControl {
    info: DeviceInfo,
    base_url: String,
    http: reqwest::Client,
    auth_token: String,
    session_token: Vec<u8>,
    frames: UdpSocket,
    frame_target: SocketAddr,
}

impl TwinklyControl {
    /// Logs in, switches the device to real-time mode and reads its shape.
    pub async fn open(device: DiscoveredDevice, http: reqwest::Client, frame_port: u16) -> Result<Self> {
        let base_url = format!("http://{}/xled/v1", device.address);

        let challenge: [u8; 32] = rand::random();
        let login: LoginResponse = http
            .post(format!("{base_url}/login"))
            .json(&json!({ "challenge": STANDARD.encode(challenge) }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_code(login.code, "login")?;
        let session_token = STANDARD.decode(&login.authentication_token)?;

        let mut control = Self {
            info: DeviceInfo {
                name: device.name,
                address: device.address.to_string(),
                shape: FrameShape::new(0, ChannelLayout::Rgb),
            },
            base_url,
            http,
            auth_token: login.authentication_token,
            session_token,
            frames: UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?,
            frame_target: SocketAddr::from((device.address, frame_port)),
        };

        let verify: CodeResponse = control
            .post("verify", &json!({ "challenge-response": login.challenge_response }))
            .await?;
        check_code(verify.code, "verify")?;

        let mode: CodeResponse = control.post("led/mode", &json!({ "mode": "rt" })).await?;
        check_code(mode.code, "led/mode")?;

        let gestalt: Gestalt = control.get("gestalt").await?;
        let layout = ChannelLayout::from_profile(&gestalt.led_profile).ok_or_else(|| {
            StarsError::Protocol(format!("unsupported led profile {}", gestalt.led_profile))
        })?;
        control.info.shape = FrameShape::new(gestalt.number_of_led, layout);
        if let Some(name) = gestalt.device_name {
            debug!(device_name = %name, "gestalt read");
        }
        info!(address = %control.info.address, shape = %control.info.shape, "device in real-time mode");
        Ok(control)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self
            .http
            .get(format!("{}/{path}", self.base_url))
            .header(AUTH_HEADER, &self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        Ok(self
            .http
            .post(format!("{}/{path}", self.base_url))
            .header(AUTH_HEADER, &self.auth_token)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

impl DeviceControl for TwinklyControl {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn status(&self) -> BoxFuture<'_, Result<i64>> {
        Box::pin(async move {
            let status: CodeResponse = self.get("status").await?;
            Ok(status.code)
        })
    }

    fn send_frame<'a>(&'a self, frame: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for packet in rt_packets(&self.session_token, frame)? {
                self.frames.send_to(&packet, self.frame_target).await?;
            }
            Ok(())
        })
    }

    fn layout(&self) -> BoxFuture<'_, Result<LightLayout>> {
        Box::pin(async move { self.get("led/layout/full").await })
    }
}

/// Discovers a controller and opens a real-time session with it.
pub struct TwinklyConnector {
    discovery: Box<dyn Discovery>,
    http: reqwest::Client,
    frame_port: u16,
}

impl TwinklyConnector {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let discovery = UdpDiscovery::new(config.discovery_port, config.discovery_timeout());
        Self::with_discovery(Box::new(discovery), config)
    }

    pub fn with_discovery(discovery: Box<dyn Discovery>, config: &DeviceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            discovery,
            http,
            frame_port: config.frame_port,
        })
    }
}

impl Connector for TwinklyConnector {
    fn connect<'a>(
        &'a self,
        device_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Arc<dyn DeviceControl>>> {
        Box::pin(async move {
            let found = self.discovery.discover(device_id).await?;
            info!(name = %found.name, address = %found.address, "device discovered");
            let control = TwinklyControl::open(found, self.http.clone(), self.frame_port).await?;
            Ok(Arc::new(control) as Arc<dyn DeviceControl>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(ip: [u8; 4], name: &str) -> Vec<u8> {
        let mut bytes: Vec<u8> = ip.iter().rev().copied().collect();
        bytes.extend_from_slice(b"OK");
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes
    }

    #[test]
    fn parses_discovery_reply() {
        let device = parse_discovery_reply(&reply([192, 168, 4, 20], "Twinkly_33AC5C")).unwrap();
        assert_eq!(device.address, Ipv4Addr::new(192, 168, 4, 20));
        assert_eq!(device.name, "Twinkly_33AC5C");
    }

    #[test]
    fn rejects_malformed_replies() {
        assert!(parse_discovery_reply(DISCOVERY_PAYLOAD).is_none());
        assert!(parse_discovery_reply(b"\x01\x02\x03\x04NOname").is_none());
        assert!(parse_discovery_reply(b"\x01\x02\x03\x04OK\x00").is_none());
    }

    #[test]
    fn splits_frames_into_fragments() {
        let token = [7u8; 8];
        let frame: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
        let packets = rt_packets(&token, &frame).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].len(), 12 + FRAGMENT_SIZE);
        assert_eq!(packets[2].len(), 12 + 200);
        for (index, packet) in packets.iter().enumerate() {
            assert_eq!(packet[0], 3);
            assert_eq!(&packet[1..9], &token);
            assert_eq!(&packet[9..12], &[0, 0, index as u8]);
        }
        let joined: Vec<u8> = packets.iter().flat_map(|p| p[12..].to_vec()).collect();
        assert_eq!(joined, frame);
    }

    #[test]
    fn rejects_frames_beyond_the_fragment_index() {
        let token = [7u8; 8];
        let largest = vec![0u8; FRAGMENT_SIZE * MAX_FRAGMENTS];
        let packets = rt_packets(&token, &largest).unwrap();
        assert_eq!(packets.len(), MAX_FRAGMENTS);
        assert_eq!(packets[MAX_FRAGMENTS - 1][11], 255);

        let oversized = vec![0u8; FRAGMENT_SIZE * MAX_FRAGMENTS + 1];
        assert!(matches!(
            rt_packets(&token, &oversized),
            Err(StarsError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn discovers_matching_device() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], DISCOVERY_PAYLOAD);
            responder.send_to(&reply([127, 0, 0, 1], "Twinkly_OTHER"), from).await.unwrap();
            responder.send_to(&reply([127, 0, 0, 1], "Twinkly_TEST"), from).await.unwrap();
        });

        let discovery = UdpDiscovery::with_target(target, Duration::from_secs(5));
        let device = discovery.discover(Some("Twinkly_TEST")).await.unwrap();
        assert_eq!(device.name, "Twinkly_TEST");
        assert_eq!(device.address, Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn discovery_times_out_with_distinct_error() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let discovery =
            UdpDiscovery::with_target(silent.local_addr().unwrap(), Duration::from_millis(100));

        let err = discovery.discover(Some("Twinkly_TEST")).await.unwrap_err();
        assert!(err.is_discovery_timeout());
    }
}
