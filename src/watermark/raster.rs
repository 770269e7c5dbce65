use std::io::Cursor;

use image::{DynamicImage, ImageReader, RgbaImage, codecs::jpeg::JpegEncoder};

use super::{RasterFormat, WatermarkResult, glyphs::TextLine};

const LABEL_ANGLE_DEG: f32 = 45.0;
const LABEL_OPACITY: f32 = 0.5;
const FOOTER_OPACITY: f32 = 0.8;
const FOOTER_SIZE_PX: f32 = 20.0;
const FOOTER_MARGIN_X: f32 = 10.0;
const FOOTER_BASELINE_FROM_BOTTOM: f32 = 20.0;
const INK: [u8; 3] = [255, 255, 255];
const JPEG_QUALITY: u8 = 90;

/// Stamps a raster image and re-encodes it at its original resolution.
///
/// A large label is drawn diagonally through the centre, sized from
/// `min(width, height) / 10`, and a small footer sits in the bottom-left
/// corner.
pub fn stamp(source: &[u8], text: &str, format: RasterFormat) -> WatermarkResult<Vec<u8>> {
    // Sniff rather than trust the extension; the output keeps the
    // extension's encoding so it matches the advertised content type.
    let decoded = ImageReader::new(Cursor::new(source))
        .with_guessed_format()?
        .decode()?;

    let mut canvas = decoded.to_rgba8();
    overlay(&mut canvas, text);
    encode(canvas, format)
}

/// Draws the diagonal label and the footer onto `canvas`.
pub fn overlay(canvas: &mut RgbaImage, text: &str) {
    let (width, height) = canvas.dimensions();
    let (w, h) = (width as f32, height as f32);

    let diagonal = (w * w + h * h).sqrt();
    let label_size = TextLine::size_to_fit(text, w.min(h) / 10.0, diagonal * 0.9);
    let label = TextLine::new(text, label_size);
    label.draw(canvas, (w / 2.0, h / 2.0), LABEL_ANGLE_DEG, INK, LABEL_OPACITY);

    let footer_size = TextLine::size_to_fit(text, FOOTER_SIZE_PX, w - 2.0 * FOOTER_MARGIN_X);
    let footer = TextLine::new(text, footer_size);
    let center = (
        FOOTER_MARGIN_X + footer.width() / 2.0,
        h - FOOTER_BASELINE_FROM_BOTTOM - footer.height() / 2.0,
    );
    footer.draw(canvas, center, 0.0, INK, FOOTER_OPACITY);
}

fn encode(canvas: RgbaImage, format: RasterFormat) -> WatermarkResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    match format {
        RasterFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)?;
        }
        RasterFormat::Png | RasterFormat::Webp => {
            DynamicImage::ImageRgba8(canvas).write_to(&mut out, format.image_format())?;
        }
    }
    Ok(out.into_inner())
}
