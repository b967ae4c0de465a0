//! Directional painting: each web painter steers a point of light through
//! the sculpture, leaving a fading trail.

use std::collections::{BTreeMap, VecDeque};

use serde::Deserialize;
use tracing::warn;

use super::{colour::hsv_to_rgb, FrameGenerator, FrameInput};
use crate::{
    frame::{ChannelLayout, FrameShape, PixelFrame},
    layout::LightLayout,
    timeline::Watermark,
    Result,
};

const VELOCITY_MAGNITUDE: f32 = 0.01;
const ILLUMINATION_FALLOFF: f32 = 10.0;
const TRAIL_DECAY: f32 = 0.1;
/// Longest backlog of steps kept per painter.
pub const MAX_QUEUED_STEPS: usize = 100;

type Vec3 = [f32; 3];

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
struct Colour {
    hue: f32,
    saturation: f32,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct Movement {
    timestamp: f64,
    colour: Colour,
    #[serde(default)]
    velocities: Vec<Velocity>,
}

#[derive(Debug, Clone, Copy)]
struct Step {
    colour: Colour,
    velocity: Vec3,
}

#[derive(Debug, Clone, Default)]
struct Painter {
    colour: Colour,
    velocity: Vec3,
    position: Vec3,
    steps: VecDeque<Step>,
}

impl Painter {
    /// Expands a movement into steps. A painter with nothing queued first
    /// takes on the movement's colour in a standing step; otherwise the
    /// colour blends from the last queued step.
    fn queue(&mut self, movement: &Movement) {
        let colour = movement.colour;
        if self.steps.is_empty() {
            self.push(Step {
                colour,
                velocity: [0.0; 3],
            });
        }
        let from = self.steps.back().map_or(colour, |step| step.colour);

        let count = movement.velocities.len();
        for (i, velocity) in movement.velocities.iter().enumerate() {
            let step_colour = if colour == from {
                colour
            } else {
                interpolate(from, colour, i, count)
            };
            self.push(Step {
                colour: step_colour,
                velocity: [velocity.x, velocity.y, velocity.z],
            });
        }
    }

    fn push(&mut self, step: Step) {
        if self.steps.len() == MAX_QUEUED_STEPS {
            self.steps.pop_front();
        }
        self.steps.push_back(step);
    }

    /// Consumes one step and hops to the nearest light ahead.
    fn advance(&mut self, lights: &[Vec3]) {
        if let Some(step) = self.steps.pop_front() {
            self.colour = step.colour;
            if norm(step.velocity) > 0.0 {
                self.velocity = step.velocity;
            }
        }
        let speed = norm(self.velocity);
        if speed <= 0.0 {
            return;
        }
        let target = add(self.position, scaled(self.velocity, VELOCITY_MAGNITUDE / speed));
        let nearest = lights
            .iter()
            .filter(|light| dot(sub(**light, self.position), self.velocity) > 0.0)
            .map(|light| (*light, norm(sub(*light, target))))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((light, _)) = nearest {
            self.position = light;
        }
    }
}

/// Colour `i` of `count` evenly spaced from `from` to `to`, both inclusive.
fn interpolate(from: Colour, to: Colour, i: usize, count: usize) -> Colour {
    if count <= 1 {
        return to;
    }
    let t = i as f32 / (count - 1) as f32;
    Colour {
        hue: from.hue + (to.hue - from.hue) * t,
        saturation: from.saturation + (to.saturation - from.saturation) * t,
    }
}

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scaled(a: Vec3, k: f32) -> Vec3 {
    a.map(|x| x * k)
}

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: Vec3) -> f32 {
    dot(a, a).sqrt()
}

/// Directional paint generator.
pub struct PaintScene {
    shape: FrameShape,
    lights: Vec<Vec3>,
    painters: BTreeMap<String, Painter>,
    movements: Watermark,
    levels: Vec<[f32; 3]>,
}

impl PaintScene {
    pub fn new(layout: &LightLayout, channels: ChannelLayout) -> Self {
        let lights = layout.normalised_zxy();
        Self {
            shape: FrameShape::new(lights.len(), channels),
            levels: vec![[0.0; 3]; lights.len()],
            lights,
            painters: BTreeMap::new(),
            movements: Watermark::new(),
        }
    }

    fn add_movements(&mut self, input: &FrameInput<'_>) {
        let Some(record) = input.state.first() else {
            return;
        };
        let Some(by_painter) = record.get("painterMovements") else {
            return;
        };
        let by_painter: BTreeMap<String, Vec<Movement>> =
            match serde_json::from_value(by_painter.clone()) {
                Ok(by_painter) => by_painter,
                Err(e) => {
                    warn!(error = %e, "ignoring malformed painter movements");
                    return;
                }
            };

        let all: Vec<(String, Movement)> = by_painter
            .into_iter()
            .flat_map(|(id, movements)| movements.into_iter().map(move |m| (id.clone(), m)))
            .collect();
        if all.is_empty() && self.movements.last().is_none() {
            self.movements = Watermark::starting_at(0.0);
        }
        for (id, movement) in self.movements.fresh(all, |(_, m)| m.timestamp) {
            self.painters.entry(id).or_default().queue(&movement);
        }
    }

    fn draw(&mut self) -> PixelFrame {
        for level in &mut self.levels {
            *level = level.map(|c| c * TRAIL_DECAY);
        }
        for painter in self.painters.values() {
            let rgb = hsv_to_rgb(painter.colour.hue, painter.colour.saturation, 1.0);
            for (level, light) in self.levels.iter_mut().zip(&self.lights) {
                let weight = 1.0 - norm(sub(*light, painter.position)) * ILLUMINATION_FALLOFF;
                for channel in 0..3 {
                    level[channel] += weight * rgb[channel] as f32;
                }
            }
        }

        let mut frame = PixelFrame::new(self.shape);
        for (index, level) in self.levels.iter_mut().enumerate() {
            *level = level.map(|c| c.clamp(0.0, 255.0).round());
            frame.set_rgb(index, level.map(|c| c as u8));
        }
        frame
    }
}

impl FrameGenerator for PaintScene {
    fn shape(&self) -> FrameShape {
        self.shape
    }

    fn render(&mut self, input: &FrameInput<'_>) -> Result<PixelFrame> {
        self.add_movements(input);
        for painter in self.painters.values_mut() {
            painter.advance(&self.lights);
        }
        Ok(self.draw())
    }
}
