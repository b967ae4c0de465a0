//! Presence sharing between sculptures.
//!
//! Every remote sculpture publishes small motion maps; this generator plays
//! them back on the local lights, one map per remote per tick, in the blue
//! channel over a dim white glow.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::Duration,
};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{FrameGenerator, FrameInput};
use crate::{
    device::DeviceHandle,
    frame::{ChannelLayout, FrameShape, PixelFrame},
    layout::LightLayout,
    subscription::Subscription,
    timeline::Watermark,
    Result, StarsError,
};

/// Maps kept per remote; older ones are dropped first.
pub const MAX_QUEUED_MAPS: usize = 10;
const BASELINE_WHITE: u8 = 10;
const LAYOUT_RETRY: Duration = Duration::from_secs(1);

type PresenceMap = Vec<Vec<u8>>;

#[derive(Debug, Deserialize)]
struct RemoteRecord {
    id: Value,
    #[serde(rename = "presenceEvents", default)]
    events: Vec<PresenceEvent>,
}

#[derive(Debug, Deserialize)]
struct PresenceEvent {
    #[serde(rename = "presenceMap")]
    map: PresenceMap,
    timestamp: f64,
}

#[derive(Debug)]
struct Remote {
    watermark: Watermark,
    maps: VecDeque<PresenceMap>,
}

/// Asks the server which presence id this controller's token belongs to.
/// Waits for the subscription first; the answer itself is awaited without a
/// time limit.
pub async fn fetch_config(subscription: &Subscription) -> Result<Value> {
    subscription.wait_ready().await?;
    let token = subscription
        .token()
        .ok_or_else(|| StarsError::msg("presence needs a controller token"))?;
    let config = subscription
        .call("presence.getConfig", vec![json!(token)])?
        .await_result()
        .await?;
    info!(%config, "presence config received");
    Ok(config)
}

/// Reads the light layout from the device, retrying until it is connected.
pub async fn wait_for_layout(device: &DeviceHandle) -> LightLayout {
    loop {
        if device.is_connected() {
            match device.layout().await {
                Ok(layout) => return layout,
                Err(e) => warn!(error = %e, "layout request failed"),
            }
        }
        info!("waiting for layout");
        tokio::time::sleep(LAYOUT_RETRY).await;
    }
}

fn remote_key(id: &Value) -> String {
    match id {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

/// Presence generator.
pub struct PresenceScene {
    shape: FrameShape,
    layout: LightLayout,
    own_id: Option<Value>,
    remotes: BTreeMap<String, Remote>,
    indexes: HashMap<(usize, usize), Vec<(usize, usize)>>,
}

impl PresenceScene {
    pub fn new(layout: &LightLayout, channels: ChannelLayout, config: &Value) -> Self {
        Self {
            shape: FrameShape::new(layout.len(), channels),
            layout: layout.clone(),
            own_id: config.get("id").cloned(),
            remotes: BTreeMap::new(),
            indexes: HashMap::new(),
        }
    }

    fn update_remotes(&mut self, input: &FrameInput<'_>) {
        for fields in input.state.records() {
            let record: RemoteRecord = match serde_json::from_value(Value::Object(fields.clone())) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "skipping malformed presence record");
                    continue;
                }
            };
            if self.own_id.as_ref() == Some(&record.id) {
                continue;
            }
            let remote = self.remotes.entry(remote_key(&record.id)).or_insert_with(|| {
                let newest = record
                    .events
                    .iter()
                    .map(|event| event.timestamp)
                    .fold(0.0, f64::max);
                Remote {
                    watermark: Watermark::starting_at(newest),
                    maps: VecDeque::with_capacity(MAX_QUEUED_MAPS),
                }
            });
            for event in remote.watermark.fresh(record.events, |event| event.timestamp) {
                if remote.maps.len() == MAX_QUEUED_MAPS {
                    remote.maps.pop_front();
                }
                remote.maps.push_back(event.map);
            }
        }
    }

    /// Map cell under each light for a `rows x cols` map.
    fn cells(&mut self, rows: usize, cols: usize) -> &[(usize, usize)] {
        let layout = &self.layout;
        self.indexes
            .entry((rows, cols))
            .or_insert_with(|| layout.map_indexes(rows, cols))
    }
}

impl FrameGenerator for PresenceScene {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn render(&mut self, input: &FrameInput<'_>) -> Result<PixelFrame> {
        self.update_remotes(input);

        let maps: Vec<PresenceMap> = self
            .remotes
            .values_mut()
            .filter_map(|remote| remote.maps.pop_front())
            .collect();

        let mut blue = vec![0u8; self.shape.leds];
        for map in &maps {
            let rows = map.len();
            let cols = map.first().map_or(0, Vec::len);
            if rows == 0 || cols == 0 {
                continue;
            }
            for (light, (row, col)) in self.cells(rows, cols).iter().enumerate() {
                let value = map.get(*row).and_then(|r| r.get(*col)).copied().unwrap_or(0);
                if let Some(level) = blue.get_mut(light) {
                    *level = (*level).max(value);
                }
            }
        }

        let mut frame = PixelFrame::new(self.shape);
        for (index, level) in blue.into_iter().enumerate() {
            match self.shape.layout {
                ChannelLayout::Wrgb => {
                    frame.set_white(index, BASELINE_WHITE);
                    frame.set_rgb(index, [0, 0, level]);
                }
                ChannelLayout::Rgb => {
                    frame.set_rgb(index, [BASELINE_WHITE, BASELINE_WHITE, level.max(BASELINE_WHITE)]);
                }
            }
        }
        Ok(frame)
    }
}
