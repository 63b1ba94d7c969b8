use unicode_width::UnicodeWidthChar;

use crate::protocol::FontSpec;

/// Coverage mask for a single character, positioned relative to the pen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub width: u32,
    pub height: u32,
    /// Distance from the top row of the mask to the baseline.
    pub ascent: i32,
    pub advance: i32,
    /// Row-major, one byte of coverage per pixel.
    pub coverage: Vec<u8>,
}

impl Glyph {
    pub fn empty(advance: i32) -> Self {
        Self {
            width: 0,
            height: 0,
            ascent: 0,
            advance,
            coverage: Vec::new(),
        }
    }

    pub fn coverage_at(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.coverage[(y * self.width + x) as usize]
    }
}

/// Turns characters into coverage masks. Real font rendering lives with the
/// embedding host; the replay core only needs advances and masks.
pub trait GlyphRasterizer: Send + Sync {
    fn advance(&self, ch: char, font: FontSpec) -> i32;
    fn rasterize(&self, ch: char, font: FontSpec) -> Glyph;

    fn measure(&self, text: &str, font: FontSpec) -> i32 {
        text.chars().map(|ch| self.advance(ch, font)).sum()
    }
}

/// Placeholder rasterizer drawing every visible character as an outlined
/// box sized from the font size and the character's column width.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxGlyphs;

impl BoxGlyphs {
    /// Ceiling of 0.6 em.
    fn cell_width(font: FontSpec) -> i32 {
        ((font.size as i32 * 3 + 4) / 5).max(1)
    }

    /// Ceiling of 0.7 em.
    fn cap_height(font: FontSpec) -> i32 {
        ((font.size as i32 * 7 + 9) / 10).max(1)
    }
}

impl GlyphRasterizer for BoxGlyphs {
    fn advance(&self, ch: char, font: FontSpec) -> i32 {
        let columns = ch.width().unwrap_or(0) as i32;
        Self::cell_width(font) * columns
    }

    fn rasterize(&self, ch: char, font: FontSpec) -> Glyph {
        let advance = self.advance(ch, font);
        if advance <= 1 || ch.is_whitespace() {
            return Glyph::empty(advance);
        }
        let width = (advance - 1) as u32;
        let height = Self::cap_height(font) as u32;
        let mut coverage = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                    coverage[(y * width + x) as usize] = u8::MAX;
                }
            }
        }
        Glyph {
            width,
            height,
            ascent: height as i32,
            advance,
            coverage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn advance_tracks_column_width() {
        let font = FontSpec {
            font_id: 0,
            size: 10,
        };
        assert_eq!(BoxGlyphs.advance('a', font), 6);
        assert_eq!(BoxGlyphs.advance('漢', font), 12);
        assert_eq!(BoxGlyphs.advance('\u{301}', font), 0);
        assert_eq!(BoxGlyphs.measure("ab", font), 12);
    }

    #[test_timeout::timeout]
    fn box_outline_leaves_interior_empty() {
        let font = FontSpec {
            font_id: 0,
            size: 20,
        };
        let glyph = BoxGlyphs.rasterize('x', font);
        assert_eq!(glyph.width, 11);
        assert_eq!(glyph.height, 14);
        assert_eq!(glyph.coverage_at(0, 0), 255);
        assert_eq!(glyph.coverage_at(5, 5), 0);
        assert!(BoxGlyphs.rasterize(' ', font).coverage.is_empty());
    }
}
