use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value as ExifValue};
use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// Descriptive metadata stored with each photo, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaMetadata {
    Photo {
        camera: Option<Camera>,
        settings: Option<Exposure>,
        location: Option<Location>,
        orientation: Option<u16>,
    },
    Video {
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Other {
        format: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exposure {
    pub iso: Option<u32>,
    pub aperture: Option<f64>,
    /// Seconds
    pub shutter_speed: Option<f64>,
    /// Millimetres
    pub focal_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Where a capture time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakenAtSource {
    Exif,
    /// Wall-clock time at processing, not authoritative
    Fallback,
}

impl TakenAtSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakenAtSource::Exif => "exif",
            TakenAtSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub taken_at: DateTime<Utc>,
    pub taken_at_source: TakenAtSource,
    pub metadata: MediaMetadata,
}

/// Inspect an uploaded image: dimensions from the header, everything else
/// from EXIF when present. Dimensions are reported as displayed, after the
/// EXIF orientation is applied.
pub fn extract(bytes: &[u8]) -> Result<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| AppError::BadRequest("Unsupported image data".to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|_| AppError::BadRequest("Unsupported image data".to_string()))?;

    let format = format_name(format);
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok();

    let (taken_at, metadata) = match &exif {
        Some(exif) => (capture_time(exif), photo_metadata(exif)),
        None => (None, MediaMetadata::Other { format: format.clone() }),
    };

    let (taken_at, taken_at_source) = match taken_at {
        Some(at) => (at, TakenAtSource::Exif),
        None => (Utc::now(), TakenAtSource::Fallback),
    };

    // Orientations 5..=8 rotate by a quarter turn
    let quarter_turn = exif
        .as_ref()
        .and_then(|exif| exif.get_field(Tag::Orientation, In::PRIMARY))
        .and_then(|f| int_value(&f.value))
        .is_some_and(|v| (5..=8).contains(&v));
    let (width, height) = if quarter_turn { (height, width) } else { (width, height) };

    Ok(ImageMetadata {
        width,
        height,
        format,
        taken_at,
        taken_at_source,
        metadata,
    })
}

/// EXIF orientation tag (1..=8), if any
pub fn orientation(bytes: &[u8]) -> Option<u16> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| int_value(&f.value))
        .map(|v| v as u16)
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

fn capture_time(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, In::PRIMARY))
        .find_map(|field| parse_exif_datetime(&field.value))
}

fn photo_metadata(exif: &exif::Exif) -> MediaMetadata {
    let string = |tag| exif.get_field(tag, In::PRIMARY).and_then(|f| exif_string(&f.value));
    let rational = |tag| exif.get_field(tag, In::PRIMARY).and_then(|f| rational_value(&f.value));
    let int = |tag| exif.get_field(tag, In::PRIMARY).and_then(|f| int_value(&f.value));
    let triple = |tag| exif.get_field(tag, In::PRIMARY).and_then(|f| rational_triple(&f.value));

    let camera = Camera {
        make: string(Tag::Make),
        model: string(Tag::Model),
        lens: string(Tag::LensModel),
    };
    let settings = Exposure {
        iso: int(Tag::PhotographicSensitivity).map(|v| v as u32),
        aperture: rational(Tag::FNumber),
        shutter_speed: rational(Tag::ExposureTime),
        focal_length: rational(Tag::FocalLength),
    };

    let latitude = gps_coordinate(triple(Tag::GPSLatitude), string(Tag::GPSLatitudeRef).as_deref());
    let longitude = gps_coordinate(triple(Tag::GPSLongitude), string(Tag::GPSLongitudeRef).as_deref());
    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Location {
            latitude,
            longitude,
            altitude: gps_altitude(rational(Tag::GPSAltitude), int(Tag::GPSAltitudeRef)),
        }),
        _ => None,
    };

    let has_camera = camera.make.is_some() || camera.model.is_some() || camera.lens.is_some();
    let has_settings = settings.iso.is_some()
        || settings.aperture.is_some()
        || settings.shutter_speed.is_some()
        || settings.focal_length.is_some();

    MediaMetadata::Photo {
        camera: has_camera.then_some(camera),
        settings: has_settings.then_some(settings),
        location,
        orientation: int(Tag::Orientation).map(|v| v as u16),
    }
}

fn exif_string(value: &ExifValue) -> Option<String> {
    match value {
        ExifValue::Ascii(values) => values
            .first()
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(|s| s.trim_matches('\u{0}').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn parse_exif_datetime(value: &ExifValue) -> Option<DateTime<Utc>> {
    let raw = exif_string(value)?;
    NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn rational_value(value: &ExifValue) -> Option<f64> {
    match value {
        ExifValue::Rational(values) => values.first().map(|v| v.to_f64()),
        ExifValue::SRational(values) => values.first().map(|v| v.to_f64()),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn rational_triple(value: &ExifValue) -> Option<[f64; 3]> {
    match value {
        ExifValue::Rational(values) if values.len() >= 3 => {
            Some([values[0].to_f64(), values[1].to_f64(), values[2].to_f64()])
        }
        _ => None,
    }
}

fn int_value(value: &ExifValue) -> Option<i64> {
    match value {
        ExifValue::Byte(values) => values.first().map(|v| *v as i64),
        ExifValue::Short(values) => values.first().map(|v| *v as i64),
        ExifValue::Long(values) => values.first().map(|v| *v as i64),
        ExifValue::SShort(values) => values.first().map(|v| *v as i64),
        ExifValue::SLong(values) => values.first().map(|v| *v as i64),
        _ => None,
    }
}

fn gps_coordinate(values: Option<[f64; 3]>, reference: Option<&str>) -> Option<f64> {
    let [degrees, minutes, seconds] = values?;
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    if !value.is_finite() {
        return None;
    }
    match reference.map(|r| r.trim().to_ascii_uppercase()) {
        Some(r) if r == "S" || r == "W" => Some(-value),
        _ => Some(value),
    }
}

fn gps_altitude(value: Option<f64>, reference: Option<i64>) -> Option<f64> {
    let value = value?;
    // Ref 1 means below sea level
    Some(if reference == Some(1) { -value } else { value })
}
