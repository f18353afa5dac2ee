use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// An encoded JPEG display variant
#[derive(Debug, Clone)]
pub struct RenderedVariant {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Largest size that fits inside `max_w` x `max_h` with the same aspect
/// ratio. Never upscales; both sides stay at least 1.
pub fn fit_inside(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = (max_w as f64 / width as f64)
        .min(max_h as f64 / height as f64)
        .min(1.0);
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_w.max(1));
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_h.max(1));
    (w, h)
}

/// Decode an original and rotate it upright according to its EXIF orientation
pub fn decode(bytes: &[u8], orientation: Option<u16>) -> Result<DynamicImage> {
    let mut img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    if let Some(orientation) = orientation.and_then(|o| Orientation::from_exif(o as u8)) {
        img.apply_orientation(orientation);
    }
    Ok(img)
}

/// Resize `img` to fit inside `max` x `max` and encode it as JPEG
pub fn render(img: &DynamicImage, max: u32, quality: u8) -> Result<RenderedVariant> {
    if max == 0 {
        return Err(AppError::Internal("Variant bound must be positive".to_string()));
    }
    let (width, height) = fit_inside(img.width(), img.height(), max, max);
    let resized = if (width, height) == (img.width(), img.height()) {
        img.clone()
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    let rgb = flatten(&resized);
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100)).encode_image(&rgb)?;

    Ok(RenderedVariant {
        width: rgb.width(),
        height: rgb.height(),
        data,
    })
}

/// Composite any alpha channel over white
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
