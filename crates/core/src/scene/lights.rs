use std::{f32::consts::TAU, ops::Range};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    colour::{hsv_to_rgb, scale},
    FrameGenerator, FrameInput,
};
use crate::{
    frame::{FrameShape, PixelFrame},
    Result,
};

/// Number of independently controlled light segments.
pub const LIGHT_COUNT: usize = 10;

const GRADUAL_HUE_STEP: f32 = 0.01;
const TWINKLE_CHANCE: f64 = 0.1;
const TWINKLE_DECAY: f32 = 0.6;
const TWINKLE_FLOOR: f32 = 0.3;
const RAIN_TRAIL: f32 = 4.0;
const RAIN_FLOOR: f32 = 0.05;
const WAVE_SPEED: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColourMode {
    White,
    Colour,
    Rainbow,
    Gradual,
}

impl ColourMode {
    fn from_name(name: &str) -> Self {
        match name {
            "white" => Self::White,
            "rainbow" => Self::Rainbow,
            "gradual" => Self::Gradual,
            _ => Self::Colour,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Animation {
    Static,
    Twinkle,
    Rain,
    Wave,
}

impl Animation {
    fn from_name(name: &str) -> Self {
        match name {
            "twinkle" => Self::Twinkle,
            "rain" => Self::Rain,
            "wave" => Self::Wave,
            _ => Self::Static,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LightRecord {
    idx: usize,
    #[serde(default)]
    colour_mode: String,
    #[serde(default)]
    colour_hue: f32,
    #[serde(default)]
    colour_saturation: f32,
    #[serde(default)]
    animation: String,
}

/// Ambient lighting: the strip is split into [`LIGHT_COUNT`] segments, each
/// coloured and animated by the record with the matching `idx`.
pub struct AmbientLights {
    shape: FrameShape,
    sparkle: Vec<f32>,
    rng: StdRng,
}

impl AmbientLights {
    pub fn new(shape: FrameShape) -> Self {
        Self::with_rng(shape, StdRng::from_entropy())
    }

    pub fn with_rng(shape: FrameShape, rng: StdRng) -> Self {
        Self {
            shape,
            sparkle: vec![0.0; shape.leds],
            rng,
        }
    }

    fn segment(&self, idx: usize) -> Range<usize> {
        let leds = self.shape.leds;
        idx * leds / LIGHT_COUNT..(idx + 1) * leds / LIGHT_COUNT
    }

    fn paint_segment(&mut self, frame: &mut PixelFrame, light: &LightRecord, tick: u64) {
        let segment = self.segment(light.idx);
        let len = segment.len().max(1) as f32;
        let mode = ColourMode::from_name(&light.colour_mode);
        let animation = Animation::from_name(&light.animation);

        for (offset, index) in segment.enumerate() {
            let position = offset as f32 / len;
            let level = match animation {
                Animation::Static => 1.0,
                Animation::Twinkle => {
                    let spark = &mut self.sparkle[index];
                    *spark *= TWINKLE_DECAY;
                    if self.rng.gen_bool(TWINKLE_CHANCE) {
                        *spark = 1.0;
                    }
                    TWINKLE_FLOOR + (1.0 - TWINKLE_FLOOR) * *spark
                }
                Animation::Rain => {
                    let drop = (tick % len as u64) as f32;
                    let behind = (drop - offset as f32).rem_euclid(len);
                    (1.0 - behind / RAIN_TRAIL).max(RAIN_FLOOR)
                }
                Animation::Wave => 0.5 + 0.5 * (TAU * (position - tick as f32 * WAVE_SPEED)).sin(),
            };

            match mode {
                ColourMode::White => frame.set_white(index, (255.0 * level).round() as u8),
                ColourMode::Colour => {
                    let rgb = hsv_to_rgb(light.colour_hue, light.colour_saturation, 1.0);
                    frame.set_rgb(index, scale(rgb, level));
                }
                ColourMode::Rainbow => {
                    let rgb = hsv_to_rgb(light.colour_hue + position, light.colour_saturation, 1.0);
                    frame.set_rgb(index, scale(rgb, level));
                }
                ColourMode::Gradual => {
                    let hue = light.colour_hue + tick as f32 * GRADUAL_HUE_STEP;
                    let rgb = hsv_to_rgb(hue, light.colour_saturation, 1.0);
                    frame.set_rgb(index, scale(rgb, level));
                }
            }
        }
    }
}

impl FrameGenerator for AmbientLights {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn render(&mut self, input: &FrameInput<'_>) -> Result<PixelFrame> {
        let mut frame = PixelFrame::new(self.shape);
        for fields in input.state.records() {
            let light: LightRecord = match serde_json::from_value(Value::Object(fields.clone())) {
                Ok(light) => light,
                Err(e) => {
                    debug!(error = %e, "skipping malformed light record");
                    continue;
                }
            };
            if light.idx >= LIGHT_COUNT {
                debug!(idx = light.idx, "light index out of range");
                continue;
            }
            self.paint_segment(&mut frame, &light, input.tick);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ddp::Fields, frame::ChannelLayout, subscription::Collection};
    use serde_json::json;
    use tokio::time::Instant;

    const SHAPE: FrameShape = FrameShape {
        leds: 190,
        layout: ChannelLayout::Wrgb,
    };

    fn lights(records: Vec<Value>) -> Collection {
        let mut collection = Collection::new();
        for (i, record) in records.into_iter().enumerate() {
            let Value::Object(fields) = record else {
                panic!("record must be an object");
            };
            collection.added(format!("light-{i}"), fields);
        }
        collection
    }

    fn render(scene: &mut AmbientLights, state: &Collection, tick: u64) -> PixelFrame {
        let input = FrameInput {
            state,
            tick,
            now: Instant::now(),
            device_connected: true,
        };
        scene.render(&input).unwrap()
    }

    #[test]
    fn colours_only_the_configured_segment() {
        let state = lights(vec![json!({
            "idx": 2, "colourMode": "colour", "colourHue": 0.0,
            "colourSaturation": 1.0, "animation": "static"
        })]);
        let mut scene = AmbientLights::with_rng(SHAPE, StdRng::seed_from_u64(1));
        let frame = render(&mut scene, &state, 0);

        assert_eq!(frame.pixel(37), &[0, 0, 0, 0]);
        assert_eq!(frame.pixel(38), &[0, 255, 0, 0]);
        assert_eq!(frame.pixel(56), &[0, 255, 0, 0]);
        assert_eq!(frame.pixel(57), &[0, 0, 0, 0]);
    }

    #[test]
    fn white_mode_uses_white_channel() {
        let state = lights(vec![json!({"idx": 0, "colourMode": "white", "animation": "static"})]);
        let mut scene = AmbientLights::with_rng(SHAPE, StdRng::seed_from_u64(1));
        let frame = render(&mut scene, &state, 0);
        assert_eq!(frame.pixel(0), &[255, 0, 0, 0]);
    }

    #[test]
    fn unknown_modes_fall_back_to_static_colour() {
        let state = lights(vec![json!({
            "idx": 0, "colourMode": "disco", "colourHue": 2.0 / 3.0,
            "colourSaturation": 1.0, "animation": "strobe"
        })]);
        let mut scene = AmbientLights::with_rng(SHAPE, StdRng::seed_from_u64(1));
        let first = render(&mut scene, &state, 0);
        let later = render(&mut scene, &state, 7);
        assert_eq!(first.pixel(5), &[0, 0, 0, 255]);
        assert_eq!(first, later);
    }

    #[test]
    fn gradual_mode_shifts_hue_over_time() {
        let state = lights(vec![json!({
            "idx": 0, "colourMode": "gradual", "colourHue": 0.0,
            "colourSaturation": 1.0, "animation": "static"
        })]);
        let mut scene = AmbientLights::with_rng(SHAPE, StdRng::seed_from_u64(1));
        let start = render(&mut scene, &state, 0);
        let later = render(&mut scene, &state, 30);
        assert_ne!(start.pixel(0), later.pixel(0));
    }

    #[test]
    fn rain_drop_moves_down_the_segment() {
        let state = lights(vec![json!({
            "idx": 0, "colourMode": "white", "animation": "rain"
        })]);
        let mut scene = AmbientLights::with_rng(SHAPE, StdRng::seed_from_u64(1));
        let frame = render(&mut scene, &state, 3);
        assert_eq!(frame.pixel(3)[0], 255);
        assert!(frame.pixel(2)[0] < 255);
        assert!(frame.pixel(10)[0] < frame.pixel(2)[0]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let mut state = lights(vec![json!({"idx": 1, "colourMode": "white"})]);
        let mut bad = Fields::new();
        bad.insert("idx".to_string(), json!("first"));
        state.added("bad".to_string(), bad);

        let mut scene = AmbientLights::with_rng(SHAPE, StdRng::seed_from_u64(1));
        let frame = render(&mut scene, &state, 0);
        assert_eq!(frame.pixel(19)[0], 255);
        assert_eq!(frame.pixel(0)[0], 0);
    }
}
