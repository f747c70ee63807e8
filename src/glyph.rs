//! Luminance to glyph mapping.

use anyhow::{anyhow, Result};
use image::Rgb;

/// Default ramp, emptiest to densest.
pub const DEFAULT_GLYPH_RAMP: &str = " .:;+=xX$&";

/// Ordered set of glyphs from the lightest visual weight to the heaviest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphRamp {
    chars: Vec<char>,
}

impl GlyphRamp {
    pub fn new(ramp: &str) -> Result<Self> {
        if ramp.is_empty() {
            return Err(anyhow!("glyph ramp cannot be empty"));
        }
        if !ramp.is_ascii() {
            return Err(anyhow!(
                "glyph ramp {:?} contains non-ASCII characters. Please use only ASCII characters.",
                ramp
            ));
        }
        Ok(Self {
            chars: ramp.chars().collect(),
        })
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Ramp index for a luminance in `[0, 1]`. Out-of-range input is clamped
    /// and NaN counts as black.
    pub fn index_for(&self, luminance: f32) -> usize {
        let l = if luminance.is_nan() {
            0.0
        } else {
            luminance.clamp(0.0, 1.0)
        };
        let last = self.chars.len() - 1;
        ((l * last as f32).floor() as usize).min(last)
    }

    pub fn map_luminance(&self, luminance: f32) -> char {
        self.chars[self.index_for(luminance)]
    }
}

impl Default for GlyphRamp {
    fn default() -> Self {
        Self {
            chars: DEFAULT_GLYPH_RAMP.chars().collect(),
        }
    }
}

/// HSL lightness of a pixel: the mean of its brightest and darkest channel,
/// normalized to `[0, 1]`.
pub fn brightness(px: Rgb<u8>) -> f32 {
    let [r, g, b] = px.0;
    let max = r.max(g).max(b) as f32;
    let min = r.min(g).min(b) as f32;
    (max + min) / 510.0
}
