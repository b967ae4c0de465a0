use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, StarsError};

/// Byte layout of a single light on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Red, green, blue.
    Rgb,
    /// White first, then red, green, blue.
    Wrgb,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Wrgb => 4,
        }
    }

    /// Maps a device LED profile string (`RGB`, `RGBW`) to a layout.
    pub fn from_profile(profile: &str) -> Option<Self> {
        match profile.to_ascii_uppercase().as_str() {
            "RGB" => Some(Self::Rgb),
            "RGBW" | "WRGB" => Some(Self::Wrgb),
            _ => None,
        }
    }

    fn rgb_offset(self) -> usize {
        match self {
            Self::Rgb => 0,
            Self::Wrgb => 1,
        }
    }
}

/// Rows (lights) and columns (channels) of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameShape {
    pub leds: usize,
    pub layout: ChannelLayout,
}

impl FrameShape {
    pub fn new(leds: usize, layout: ChannelLayout) -> Self {
        Self { leds, layout }
    }

    pub fn byte_len(&self) -> usize {
        self.leds * self.layout.channels()
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.leds, self.layout.channels())
    }
}

/// One complete image for the light hardware: a row per light, a column per
/// colour channel, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFrame {
    shape: FrameShape,
    data: Vec<u8>,
}

impl PixelFrame {
    /// Creates an all-dark frame.
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            data: vec![0; shape.byte_len()],
        }
    }

    /// Wraps raw row-major bytes, checking the length against the shape.
    pub fn from_bytes(shape: FrameShape, data: Vec<u8>) -> Result<Self> {
        if data.len() != shape.byte_len() {
            return Err(StarsError::msg(format!(
                "frame of shape {shape} needs {} bytes, got {}",
                shape.byte_len(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn leds(&self) -> usize {
        self.shape.leds
    }

    pub fn channels(&self) -> usize {
        self.shape.layout.channels()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, index: usize) -> &[u8] {
        let channels = self.channels();
        &self.data[index * channels..(index + 1) * channels]
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Sets the colour channels of one light. Out of range indexes are ignored.
    pub fn set_rgb(&mut self, index: usize, rgb: [u8; 3]) {
        if index >= self.shape.leds {
            return;
        }
        let start = index * self.channels() + self.shape.layout.rgb_offset();
        self.data[start..start + 3].copy_from_slice(&rgb);
    }

    /// Sets the white level of one light. RGB devices get an equal mix.
    pub fn set_white(&mut self, index: usize, level: u8) {
        if index >= self.shape.leds {
            return;
        }
        match self.shape.layout {
            ChannelLayout::Wrgb => self.data[index * 4] = level,
            ChannelLayout::Rgb => self.set_rgb(index, [level; 3]),
        }
    }

    pub fn fill_rgb(&mut self, rgb: [u8; 3]) {
        for index in 0..self.shape.leds {
            self.set_rgb(index, rgb);
        }
    }

    pub fn fill_white(&mut self, level: u8) {
        for index in 0..self.shape.leds {
            self.set_white(index, level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_colour_after_white_channel() {
        let mut frame = PixelFrame::new(FrameShape::new(2, ChannelLayout::Wrgb));
        frame.set_rgb(1, [1, 2, 3]);
        frame.set_white(1, 9);

        assert_eq!(frame.pixel(0), &[0, 0, 0, 0]);
        assert_eq!(frame.pixel(1), &[9, 1, 2, 3]);
        assert_eq!(frame.as_bytes(), &[0, 0, 0, 0, 9, 1, 2, 3]);
    }

    #[test]
    fn white_on_rgb_devices_is_grey() {
        let mut frame = PixelFrame::new(FrameShape::new(1, ChannelLayout::Rgb));
        frame.set_white(0, 40);
        assert_eq!(frame.pixel(0), &[40, 40, 40]);
    }

    #[test]
    fn ignores_out_of_range_lights() {
        let mut frame = PixelFrame::new(FrameShape::new(1, ChannelLayout::Rgb));
        frame.set_rgb(5, [255, 255, 255]);
        assert_eq!(frame.as_bytes(), &[0, 0, 0]);
    }

    #[test]
    fn rejects_wrong_byte_count() {
        let shape = FrameShape::new(3, ChannelLayout::Rgb);
        assert!(PixelFrame::from_bytes(shape, vec![0; 8]).is_err());
        assert!(PixelFrame::from_bytes(shape, vec![0; 9]).is_ok());
    }

    #[test]
    fn parses_led_profiles() {
        assert_eq!(ChannelLayout::from_profile("RGBW"), Some(ChannelLayout::Wrgb));
        assert_eq!(ChannelLayout::from_profile("rgb"), Some(ChannelLayout::Rgb));
        assert_eq!(ChannelLayout::from_profile("RGBA"), None);
    }
}
