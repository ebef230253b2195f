//! Color conversions for LED rendering.
//!
//! The animation engine works in degree-based HSV so a rainbow can be spread
//! evenly over a strip of any length, then scaled to the per-group brightness
//! budget before anything reaches the wire.
//!
//! # Example
//! ```rust
//! use ttb_core::utils::math::color;
//! let red = color::hsv_to_rgb(0.0, 1.0, 1.0);
//! assert_eq!((red.r, red.g, red.b), (255, 0, 0));
//! ```

use smart_leds_trait::RGB8;

/// Convert a degree-based HSV triple to RGB.
///
/// `hue` may be any finite value and is wrapped into `[0, 360)`; `saturation`
/// and `value` are expected in `[0.0, 1.0]`.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> RGB8 {
    let h = ((hue % 360.0) + 360.0) % 360.0;
    let c = value * saturation;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = value - c;

    let (r, g, b) = match (h / 60.0) as u8 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    RGB8 {
        r: channel_to_u8(r + m),
        g: channel_to_u8(g + m),
        b: channel_to_u8(b + m),
    }
}

/// Scale a color by a brightness multiplier in `[0.0, 1.0]`.
pub fn scale(color: RGB8, brightness: f32) -> RGB8 {
    let s = brightness.clamp(0.0, 1.0);
    RGB8 {
        r: channel_to_u8(color.r as f32 / 255.0 * s),
        g: channel_to_u8(color.g as f32 / 255.0 * s),
        b: channel_to_u8(color.b as f32 / 255.0 * s),
    }
}

fn channel_to_u8(unit: f32) -> u8 {
    libm::roundf(unit.clamp(0.0, 1.0) * 255.0) as u8
}
