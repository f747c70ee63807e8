//! Glyph bitmaps used by the frame renderer.
//!
//! Every glyph of the ramp is turned into a 1-bit mask exactly once, before
//! any frame is rendered. The resulting [`GlyphAtlas`] is immutable and is
//! shared between workers behind an `Arc`, so rendering never touches a font
//! rasterizer concurrently.
//!
//! Two sources are supported:
//!
//! - a built-in 8×12 bitmap font covering [`DEFAULT_GLYPH_RAMP`](crate::glyph::DEFAULT_GLYPH_RAMP)
//! - any TrueType/OpenType font, rasterized with `ab_glyph` and thresholded
//!   so strokes stay crisp

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::glyph::GlyphRamp;

pub const BUILTIN_CELL_WIDTH: u32 = 8;
pub const BUILTIN_CELL_HEIGHT: u32 = 12;

/// Largest accepted glyph cell side, in pixels.
pub const MAX_CELL_SIZE: u32 = 1024;

/// Coverage at or above this becomes an "on" pixel.
const COVERAGE_THRESHOLD: f32 = 0.5;

/// Rows are top to bottom, the most significant bit is the leftmost column.
const BUILTIN_GLYPHS: &[(char, [u8; 12])] = &[
    (' ', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
    ('.', [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00]),
    (':', [0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00]),
    (';', [0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x10]),
    ('+', [0x00, 0x00, 0x00, 0x18, 0x18, 0x7E, 0x7E, 0x18, 0x18, 0x00, 0x00, 0x00]),
    ('=', [0x00, 0x00, 0x00, 0x00, 0x7E, 0x00, 0x00, 0x7E, 0x00, 0x00, 0x00, 0x00]),
    ('x', [0x00, 0x00, 0x00, 0x00, 0x66, 0x3C, 0x18, 0x18, 0x3C, 0x66, 0x00, 0x00]),
    ('X', [0x00, 0x66, 0x66, 0x3C, 0x3C, 0x18, 0x18, 0x3C, 0x3C, 0x66, 0x66, 0x00]),
    ('$', [0x00, 0x18, 0x3E, 0x60, 0x60, 0x3C, 0x06, 0x06, 0x7C, 0x18, 0x00, 0x00]),
    ('&', [0x00, 0x38, 0x6C, 0x6C, 0x38, 0x76, 0xDC, 0xCC, 0xCC, 0x76, 0x00, 0x00]),
];

/// A 1-bit glyph image anchored at the top-left corner of its cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl GlyphMask {
    fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    fn from_rows(rows: &[u8; 12]) -> Self {
        let mut mask = Self::empty(BUILTIN_CELL_WIDTH, BUILTIN_CELL_HEIGHT);
        for (y, row) in rows.iter().enumerate() {
            for x in 0..BUILTIN_CELL_WIDTH {
                if row & (0x80 >> x) != 0 {
                    mask.set(x, y as u32);
                }
            }
        }
        mask
    }

    fn set(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = true;
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[y as usize * self.width as usize + x as usize]
    }

    /// Number of "on" pixels.
    pub fn weight(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Offsets of every "on" pixel, row-major.
    pub fn lit_pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(move |(i, _)| {
                let w = self.width as usize;
                ((i % w) as u32, (i / w) as u32)
            })
    }
}

/// Immutable set of glyph masks, one per ramp character.
#[derive(Debug, Clone)]
pub struct GlyphAtlas {
    cell_width: u32,
    cell_height: u32,
    masks: HashMap<char, GlyphMask>,
}

impl GlyphAtlas {
    /// Atlas from the built-in 8×12 bitmap font.
    pub fn builtin(ramp: &GlyphRamp) -> Result<Self> {
        let mut masks = HashMap::with_capacity(ramp.len());
        for &ch in ramp.chars() {
            let rows = BUILTIN_GLYPHS
                .iter()
                .find(|(c, _)| *c == ch)
                .map(|(_, rows)| rows)
                .ok_or_else(|| {
                    anyhow!(
                        "the built-in glyph font has no '{}'; configure font_path to use a custom ramp",
                        ch
                    )
                })?;
            masks.insert(ch, GlyphMask::from_rows(rows));
        }
        Ok(Self {
            cell_width: BUILTIN_CELL_WIDTH,
            cell_height: BUILTIN_CELL_HEIGHT,
            masks,
        })
    }

    /// Rasterize the ramp from a font file.
    pub fn from_font_file(path: &Path, px: f32, ramp: &GlyphRamp, cell: (u32, u32)) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
        Self::from_font_bytes(bytes, px, ramp, cell)
            .with_context(|| format!("loading font {}", path.display()))
    }

    /// Rasterize the ramp from raw TrueType/OpenType bytes.
    ///
    /// Each glyph is laid out with its baseline at the font ascent and clipped
    /// to a `cell` sized box. Partial coverage is thresholded, never blended.
    pub fn from_font_bytes(bytes: Vec<u8>, px: f32, ramp: &GlyphRamp, cell: (u32, u32)) -> Result<Self> {
        let (cell_width, cell_height) = cell;
        if cell_width == 0 || cell_height == 0 || cell_width > MAX_CELL_SIZE || cell_height > MAX_CELL_SIZE {
            return Err(anyhow!(
                "glyph cell must be within 1x1..={}x{}, got {}x{}",
                MAX_CELL_SIZE,
                MAX_CELL_SIZE,
                cell_width,
                cell_height
            ));
        }
        let font = FontVec::try_from_vec(bytes).map_err(|e| anyhow!("invalid font data: {}", e))?;
        let scale = PxScale::from(px);
        let ascent = font.as_scaled(scale).ascent();

        let mut masks = HashMap::with_capacity(ramp.len());
        for &ch in ramp.chars() {
            let mut mask = GlyphMask::empty(cell_width, cell_height);
            let glyph = font
                .glyph_id(ch)
                .with_scale_and_position(scale, point(0.0, ascent));
            // Whitespace has no outline and stays empty.
            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|x, y, coverage| {
                    if coverage < COVERAGE_THRESHOLD {
                        return;
                    }
                    let gx = bounds.min.x as i32 + x as i32;
                    let gy = bounds.min.y as i32 + y as i32;
                    if gx >= 0 && gy >= 0 {
                        mask.set(gx as u32, gy as u32);
                    }
                });
            }
            masks.insert(ch, mask);
        }
        Ok(Self {
            cell_width,
            cell_height,
            masks,
        })
    }

    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    pub fn mask(&self, ch: char) -> Option<&GlyphMask> {
        self.masks.get(&ch)
    }
}
