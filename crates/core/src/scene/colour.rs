/// Converts HSV (each component in [0, 1]) to 8-bit RGB. Hue wraps.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [u8; 3] {
    let saturation = saturation.clamp(0.0, 1.0);
    let value = value.clamp(0.0, 1.0);
    if saturation == 0.0 {
        return [to_byte(value); 3];
    }
    let scaled = hue.rem_euclid(1.0) * 6.0;
    let sector = scaled.floor();
    let f = scaled - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * f);
    let t = value * (1.0 - saturation * (1.0 - f));
    let (r, g, b) = match sector as u8 % 6 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };
    [to_byte(r), to_byte(g), to_byte(b)]
}

/// Scales every channel by `level` in [0, 1].
pub fn scale(rgb: [u8; 3], level: f32) -> [u8; 3] {
    rgb.map(|c| to_byte(c as f32 / 255.0 * level))
}

fn to_byte(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}
