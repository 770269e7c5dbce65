use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{Rgba, RgbaImage};

/// Width of a glyph cell relative to its height. The 8x8 font is square,
/// which reads too wide for a one-line stamp.
const CELL_ASPECT: f32 = 0.6;

/// Sub-pixel sample offsets used for coverage (2x2 grid).
const SAMPLES: [(f32, f32); 4] = [(0.25, 0.25), (0.75, 0.25), (0.25, 0.75), (0.75, 0.75)];

/// A line of text laid out in the embedded bitmap font.
pub struct TextLine {
    glyphs: Vec<[u8; 8]>,
    /// Glyph height in pixels.
    size: f32,
}

impl TextLine {
    pub fn new(text: &str, size: f32) -> Self {
        let fallback = BASIC_FONTS.get('?').unwrap_or([0; 8]);
        let glyphs = text
            .chars()
            .map(|c| BASIC_FONTS.get(c).unwrap_or(fallback))
            .collect();
        Self {
            glyphs,
            size: size.max(1.0),
        }
    }

    /// Largest glyph height at which `text` spans at most `max_width` pixels.
    pub fn size_to_fit(text: &str, preferred: f32, max_width: f32) -> f32 {
        let chars = text.chars().count().max(1) as f32;
        preferred.min(max_width / (chars * CELL_ASPECT)).max(1.0)
    }

    pub fn width(&self) -> f32 {
        self.glyphs.len() as f32 * self.size * CELL_ASPECT
    }

    pub fn height(&self) -> f32 {
        self.size
    }

    /// Whether the point `(x, y)` of the unrotated text box is inked.
    fn covers(&self, x: f32, y: f32) -> bool {
        if x < 0.0 || y < 0.0 || x >= self.width() || y >= self.height() {
            return false;
        }
        let cell_width = self.size * CELL_ASPECT;
        let index = (x / cell_width) as usize;
        let Some(glyph) = self.glyphs.get(index) else {
            return false;
        };
        let col = (((x - index as f32 * cell_width) / cell_width) * 8.0) as usize;
        let row = ((y / self.size) * 8.0) as usize;
        // font8x8 stores each row with the leftmost pixel in bit 0.
        row < 8 && col < 8 && (glyph[row] >> col) & 1 == 1
    }

    /// Alpha-blends the text onto `img`.
    ///
    /// The centre of the text box is placed at `center` and the box is
    /// rotated clockwise (screen coordinates) by `angle_deg` around it.
    pub fn draw(&self, img: &mut RgbaImage, center: (f32, f32), angle_deg: f32, color: [u8; 3], opacity: f32) {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let half_w = self.width() / 2.0;
        let half_h = self.height() / 2.0;

        // Destination bounding box of the rotated text box.
        let extent_x = half_w * cos.abs() + half_h * sin.abs();
        let extent_y = half_w * sin.abs() + half_h * cos.abs();
        let (img_w, img_h) = img.dimensions();
        let x0 = (center.0 - extent_x).floor().max(0.0) as u32;
        let y0 = (center.1 - extent_y).floor().max(0.0) as u32;
        let x1 = ((center.0 + extent_x).ceil().max(0.0) as u32).min(img_w);
        let y1 = ((center.1 + extent_y).ceil().max(0.0) as u32).min(img_h);

        for py in y0..y1 {
            for px in x0..x1 {
                let hits = SAMPLES
                    .iter()
                    .filter(|(sx, sy)| {
                        let dx = px as f32 + sx - center.0;
                        let dy = py as f32 + sy - center.1;
                        // Inverse rotation back into text-box space.
                        let lx = dx * cos + dy * sin + half_w;
                        let ly = -dx * sin + dy * cos + half_h;
                        self.covers(lx, ly)
                    })
                    .count();
                if hits == 0 {
                    continue;
                }

                let alpha = opacity * hits as f32 / SAMPLES.len() as f32;
                blend(img.get_pixel_mut(px, py), color, alpha);
            }
        }
    }
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for (channel, ink) in pixel.0.iter_mut().take(3).zip(color) {
        let mixed = *channel as f32 * (1.0 - alpha) + ink as f32 * alpha;
        *channel = mixed.round() as u8;
    }
    let dst_alpha = pixel.0[3] as f32;
    pixel.0[3] = (dst_alpha + (255.0 - dst_alpha) * alpha).round() as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitting_shrinks_long_text() {
        assert_eq!(TextLine::size_to_fit("ab", 20.0, 1_000.0), 20.0);
        let size = TextLine::size_to_fit(&"x".repeat(100), 20.0, 300.0);
        assert!(TextLine::new(&"x".repeat(100), size).width() <= 300.01);
    }

    #[test]
    fn drawing_inks_pixels_inside_the_box_only() {
        let mut img = RgbaImage::from_pixel(200, 60, Rgba([0, 0, 0, 255]));
        let line = TextLine::new("HELLO", 20.0);
        line.draw(&mut img, (100.0, 30.0), 0.0, [255, 255, 255], 1.0);

        let inked = img.pixels().filter(|p| p.0[0] > 0).count();
        assert!(inked > 0);
        // Nothing left of the text box.
        let left_edge = 100 - (line.width() / 2.0) as u32 - 1;
        assert!((0..60).all(|y| img.get_pixel(left_edge.saturating_sub(1), y).0[0] == 0));
    }

    #[test]
    fn unknown_characters_fall_back_to_question_mark() {
        let line = TextLine::new("\u{1F512}", 8.0);
        assert_eq!(line.glyphs[0], BASIC_FONTS.get('?').unwrap());
    }
}
