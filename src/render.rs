//! Per-frame ASCII rendering.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;

use crate::atlas::GlyphAtlas;
use crate::glyph::{brightness, GlyphRamp};

/// Turns one frame into its ASCII-styled counterpart.
///
/// The source is sampled on a grid whose stride equals the atlas cell size.
/// Each sample picks a glyph by brightness and stamps it, in the sampled
/// color, onto a black canvas of the same size as the source.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    ramp: GlyphRamp,
    atlas: Arc<GlyphAtlas>,
}

impl FrameRenderer {
    pub fn new(ramp: GlyphRamp, atlas: Arc<GlyphAtlas>) -> Self {
        Self { ramp, atlas }
    }

    /// Renderer with the default ramp and the built-in glyphs.
    pub fn builtin() -> Result<Self> {
        let ramp = GlyphRamp::default();
        let atlas = GlyphAtlas::builtin(&ramp)?;
        Ok(Self::new(ramp, Arc::new(atlas)))
    }

    pub fn ramp(&self) -> &GlyphRamp {
        &self.ramp
    }

    pub fn stride(&self) -> (u32, u32) {
        (self.atlas.cell_width(), self.atlas.cell_height())
    }

    pub fn render(&self, source: &RgbImage) -> RgbImage {
        let (width, height) = source.dimensions();
        let mut out = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        let (step_x, step_y) = self.stride();

        for i in (0..width).step_by(step_x as usize) {
            for j in (0..height).step_by(step_y as usize) {
                let color = *source.get_pixel(i, j);
                let glyph = self.ramp.map_luminance(brightness(color));
                self.stamp(&mut out, glyph, i, j, color);
            }
        }
        out
    }

    fn stamp(&self, out: &mut RgbImage, glyph: char, x0: u32, y0: u32, color: Rgb<u8>) {
        let Some(mask) = self.atlas.mask(glyph) else {
            return;
        };
        let (width, height) = out.dimensions();
        for (dx, dy) in mask.lit_pixels() {
            let (x, y) = (x0 + dx, y0 + dy);
            if x < width && y < height {
                out.put_pixel(x, y, color);
            }
        }
    }

    /// Render the image at `path` and write the result back over it.
    pub fn render_file(&self, path: &Path) -> Result<()> {
        let source = image::open(path)
            .with_context(|| format!("opening {}", path.display()))?
            .to_rgb8();
        let rendered = self.render(&source);
        rendered
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> FrameRenderer {
        FrameRenderer::builtin().unwrap()
    }

    #[test]
    fn output_keeps_input_dimensions() {
        let r = renderer();
        for (w, h) in [(1, 1), (2, 2), (7, 13), (64, 36), (100, 1)] {
            let src = RgbImage::from_pixel(w, h, Rgb([200, 120, 40]));
            assert_eq!(r.render(&src).dimensions(), (w, h));
        }
    }

    #[test]
    fn black_frame_stays_black() {
        let src = RgbImage::from_pixel(32, 24, Rgb([0, 0, 0]));
        let out = renderer().render(&src);
        assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn white_sample_draws_densest_glyph_in_its_cell_only() {
        let mut src = RgbImage::from_pixel(16, 12, Rgb([0, 0, 0]));
        src.put_pixel(0, 0, Rgb([255, 255, 255]));
        let out = renderer().render(&src);

        let atlas = GlyphAtlas::builtin(&GlyphRamp::default()).unwrap();
        let amp = atlas.mask('&').unwrap();
        for y in 0..12 {
            for x in 0..16 {
                let expected = if x < 8 && amp.is_set(x, y) {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([0, 0, 0])
                };
                assert_eq!(*out.get_pixel(x, y), expected, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn glyphs_use_the_sampled_color() {
        let src = RgbImage::from_pixel(8, 12, Rgb([250, 10, 10]));
        let out = renderer().render(&src);
        let lit: Vec<&Rgb<u8>> = out.pixels().filter(|p| **p != Rgb([0, 0, 0])).collect();
        assert!(!lit.is_empty());
        assert!(lit.iter().all(|p| **p == Rgb([250, 10, 10])));
    }

    #[test]
    fn only_grid_points_are_sampled() {
        let r = renderer();
        let mut a = RgbImage::from_pixel(16, 24, Rgb([0, 0, 0]));
        let b = a.clone();
        // Off-grid pixels never influence the result.
        a.put_pixel(3, 5, Rgb([255, 255, 255]));
        a.put_pixel(9, 13, Rgb([255, 255, 255]));
        assert_eq!(r.render(&a), r.render(&b));
    }

    /// White source: every cell holds `&`, cut off where the image ends.
    fn clipped_amp_canvas(width: u32, height: u32) -> RgbImage {
        let atlas = GlyphAtlas::builtin(&GlyphRamp::default()).unwrap();
        let amp = atlas.mask('&').unwrap();
        RgbImage::from_fn(width, height, |x, y| {
            if amp.is_set(x % 8, y % 12) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn glyphs_are_clipped_at_the_border() {
        let src = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let out = renderer().render(&src);
        assert_eq!(out, clipped_amp_canvas(2, 2));
        // The top-left 2x2 corner of `&` is empty.
        assert!(out.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn partial_cells_keep_their_visible_strokes() {
        let src = RgbImage::from_pixel(10, 13, Rgb([255, 255, 255]));
        let out = renderer().render(&src);
        assert_eq!(out, clipped_amp_canvas(10, 13));
        // Left two columns of `&` in the clipped right-hand cell.
        let lit: Vec<(u32, u32)> = (0..12)
            .flat_map(|y| (8..10).map(move |x| (x, y)))
            .filter(|&(x, y)| *out.get_pixel(x, y) != Rgb([0, 0, 0]))
            .collect();
        assert_eq!(
            lit,
            vec![(9, 2), (9, 3), (9, 5), (8, 6), (9, 6), (8, 7), (9, 7), (8, 8), (9, 8), (9, 9)]
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut src = RgbImage::new(40, 30);
        for (x, y, p) in src.enumerate_pixels_mut() {
            *p = Rgb([(x * 6) as u8, (y * 8) as u8, ((x + y) * 3) as u8]);
        }
        let r = renderer();
        assert_eq!(r.render(&src).into_raw(), r.render(&src).into_raw());
    }

    #[test]
    fn render_file_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000001.png");
        let src = RgbImage::from_pixel(16, 12, Rgb([255, 255, 255]));
        src.save(&path).unwrap();

        let r = renderer();
        r.render_file(&path).unwrap();

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written, r.render(&src));
    }

    #[test]
    fn render_file_reports_the_path_on_failure() {
        let err = renderer()
            .render_file(Path::new("/nonexistent/00000001.png"))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("00000001.png"));
    }
}
