//! Colour patterns for an LED strip.

use core::ops::Shr;

/// One LED's colour.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Fixed-point scale for hues: one degree is this many units.
const HUE_DEGREE: i64 = 512;
const SECTOR: i64 = 60 * HUE_DEGREE;

/// Hues wrap back to zero when they reach this.
pub const HUE_WRAP: u16 = 359;

/// Convert a colour from HSV to RGB with integer arithmetic.
///
/// `hue` is in degrees (`0..360`); saturation and value are full scale at
/// 255.
#[must_use]
pub fn hsv_to_rgb(hue: u16, sat: u8, val: u8) -> Rgb {
    if sat == 0 {
        return Rgb {
            r: val,
            g: val,
            b: val,
        };
    }

    let h = (hue % 360) as i64 * HUE_DEGREE;
    let s = sat as i64;
    let v = val as i64;
    let sector = h / SECTOR;
    let p = (256 * v - s * v) / 256;
    // Falling (odd sectors) or rising (even sectors) component.
    let q = (256 * SECTOR * v - h * s * v + SECTOR * s * v * sector) / (256 * SECTOR);
    let t = (256 * SECTOR * v + h * s * v - SECTOR * s * v * (sector + 1)) / (256 * SECTOR);

    let (r, g, b) = match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb {
        r: r.clamp(0, 255) as u8,
        g: g.clamp(0, 255) as u8,
        b: b.clamp(0, 255) as u8,
    }
}

/// A rainbow that drifts along the strip.
///
/// Every frame advances the hue by one degree. Each LED shows that hue dimmed
/// by a right shift of 0 to 7, the shift rotating from one LED to the next
/// and moving on by one more every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    hue: u16,
    shift: u8,
}

impl Pattern {
    #[must_use]
    pub const fn new() -> Self {
        Self { hue: 0, shift: 0 }
    }

    #[must_use]
    pub fn hue(&self) -> u16 {
        self.hue
    }

    /// Fill `leds` with the next frame.
    pub fn next_frame(&mut self, leds: &mut [Rgb]) {
        self.hue += 1;
        if self.hue >= HUE_WRAP {
            self.hue = 0;
        }

        let colour = hsv_to_rgb(self.hue, 0xff, 0xff);
        for led in leds {
            *led = colour >> self.shift;
            self.advance_shift();
        }
        self.advance_shift();
    }

    fn advance_shift(&mut self) {
        self.shift = (self.shift + 1) % 8;
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new()
    }
}

impl Shr<u8> for Rgb {
    type Output = Self;
    fn shr(self, shift: u8) -> Self {
        Self {
            r: self.r >> shift,
            g: self.g >> shift,
            b: self.b >> shift,
        }
    }
}
