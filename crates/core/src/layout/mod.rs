use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, StarsError};

/// Position of one light. Flat (2-D) layouts leave `z` at zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

/// Spatial layout of the lights, one coordinate per light in wire order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightLayout {
    pub coordinates: Vec<Coordinate>,
}

impl LightLayout {
    /// Loads a layout file of the form `{"coordinates": [{"x", "y", "z"}, ...]}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StarsError::Layout(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let layout: Self = serde_json::from_str(text)?;
        if layout.coordinates.is_empty() {
            return Err(StarsError::Layout("layout has no coordinates".to_string()));
        }
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Points in (z, x, y) order with every axis scaled into [0, 1].
    pub fn normalised_zxy(&self) -> Vec<[f32; 3]> {
        let points: Vec<[f32; 3]> = self.coordinates.iter().map(|c| [c.z, c.x, c.y]).collect();
        normalise(&points)
    }

    /// Points in (y, x) order with both axes scaled into [0, 1].
    pub fn normalised_yx(&self) -> Vec<[f32; 2]> {
        let points: Vec<[f32; 2]> = self.coordinates.iter().map(|c| [c.y, c.x]).collect();
        normalise(&points)
    }

    /// For a `rows x cols` map, the cell each light falls into.
    pub fn map_indexes(&self, rows: usize, cols: usize) -> Vec<(usize, usize)> {
        let max_row = rows.saturating_sub(1) as f32;
        let max_col = cols.saturating_sub(1) as f32;
        self.normalised_yx()
            .into_iter()
            .map(|[row, col]| ((row * max_row).floor() as usize, (col * max_col).floor() as usize))
            .collect()
    }
}

/// Scales each axis independently into [0, 1]. Axes with no extent map to 0.
fn normalise<const N: usize>(points: &[[f32; N]]) -> Vec<[f32; N]> {
    let mut min = [f32::INFINITY; N];
    let mut max = [f32::NEG_INFINITY; N];
    for point in points {
        for axis in 0..N {
            min[axis] = min[axis].min(point[axis]);
            max[axis] = max[axis].max(point[axis]);
        }
    }
    points
        .iter()
        .map(|point| {
            let mut scaled = [0.0; N];
            for axis in 0..N {
                let range = max[axis] - min[axis];
                if range > 0.0 {
                    scaled[axis] = (point[axis] - min[axis]) / range;
                }
            }
            scaled
        })
        .collect()
}
