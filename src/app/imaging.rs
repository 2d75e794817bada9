//! Image metadata extraction: dimensions, aspect ratio, the inline blurred
//! placeholder (LQIP) and a structured subset of EXIF.
//!
//! Only pixel dimensions are mandatory. EXIF is best effort: anything absent
//! or malformed is dropped field by field, and the `exif` / `location`
//! objects are omitted entirely when nothing survived.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use exif::{Exif, In, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use std::io::Cursor;
use thiserror::Error;
use time::macros::format_description;
use time::{Date, Month, PrimitiveDateTime, Time};

use crate::domain::media::{ExifData, GeoLocation, ImageMetadata};

const LQIP_BOUND: u32 = 20;
const LQIP_QUALITY: u8 = 20;
const LQIP_BLUR_SIGMA: f32 = 1.5;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
    #[error("failed to encode placeholder: {0}")]
    Placeholder(image::ImageError),
}

pub fn extract_image_metadata(bytes: &[u8]) -> Result<ImageMetadata, MetadataError> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(MetadataError::Empty);
    }

    let lqip = generate_lqip(&image)?;
    let (exif, location) = parse_exif(bytes);

    Ok(ImageMetadata {
        width,
        height,
        aspect_ratio: aspect_ratio(width, height),
        lqip,
        exif,
        location,
    })
}

pub fn aspect_ratio(width: u32, height: u32) -> f64 {
    round_to(f64::from(width) / f64::from(height), 4)
}

/// Fits the image inside a small square, blurs it and embeds a low quality
/// JPEG as a data URI.
pub fn generate_lqip(image: &DynamicImage) -> Result<String, MetadataError> {
    let small = image.thumbnail(LQIP_BOUND, LQIP_BOUND).to_rgb8();
    let blurred = image::imageops::blur(&small, LQIP_BLUR_SIGMA);

    let mut encoded = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded, LQIP_QUALITY);
    DynamicImage::ImageRgb8(blurred)
        .write_with_encoder(encoder)
        .map_err(MetadataError::Placeholder)?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&encoded)))
}

/// Never fails: unreadable EXIF is the same as no EXIF.
pub fn parse_exif(bytes: &[u8]) -> (Option<ExifData>, Option<GeoLocation>) {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(err) => {
            tracing::debug!(error = %err, "no usable EXIF segment");
            return (None, None);
        }
    };

    let data = ExifData {
        date_time: exif_date_time(&exif, Tag::DateTimeOriginal)
            .or_else(|| exif_date_time(&exif, Tag::DateTime)),
        camera_make: ascii_field(&exif, Tag::Make),
        camera_model: ascii_field(&exif, Tag::Model),
        lens_make: ascii_field(&exif, Tag::LensMake),
        lens_model: ascii_field(&exif, Tag::LensModel),
        focal_length: rational_field(&exif, Tag::FocalLength).map(|v| round_to(v, 2)),
        aperture: rational_field(&exif, Tag::FNumber).map(|v| round_to(v, 2)),
        iso: exif
            .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .filter(|iso| *iso > 0),
        exposure_time: rational_field(&exif, Tag::ExposureTime).and_then(format_exposure_time),
    };

    let data = (!data.is_empty()).then_some(data);
    (data, gps_location(&exif))
}

/// `"{n}s"` for a second or longer, otherwise `"1/{round(1/n)}"`.
pub fn format_exposure_time(seconds: f64) -> Option<String> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    if seconds >= 1.0 {
        Some(format!("{}s", round_to(seconds, 2)))
    } else {
        Some(format!("1/{}", (1.0 / seconds).round() as u64))
    }
}

/// Degrees/minutes/seconds to signed decimal degrees; S and W are negative.
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: &str) -> f64 {
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    match reference.trim().chars().next() {
        Some('S' | 's' | 'W' | 'w') => -decimal,
        _ => decimal,
    }
}

fn gps_location(exif: &Exif) -> Option<GeoLocation> {
    let lat = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let lon = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return None;
    }

    let alt = rational_field(exif, Tag::GPSAltitude).map(|alt| {
        let below_sea_level = exif
            .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            == Some(1);
        round_to(if below_sea_level { -alt } else { alt }, 2)
    });

    Some(GeoLocation {
        lat: round_to(lat, 6),
        lon: round_to(lon, 6),
        alt,
    })
}

fn gps_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let parts = match &field.value {
        Value::Rational(parts) if parts.len() >= 3 => parts,
        _ => return None,
    };
    let degrees = parts[0].to_f64();
    let minutes = parts[1].to_f64();
    let seconds = parts[2].to_f64();
    if ![degrees, minutes, seconds].iter().all(|v| v.is_finite()) {
        return None;
    }
    let reference = ascii_field(exif, ref_tag).unwrap_or_default();
    Some(dms_to_decimal(degrees, minutes, seconds, &reference))
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(ref values) = field.value else {
        return None;
    };
    let raw = values.first()?;
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

fn rational_field(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let value = match &field.value {
        Value::Rational(values) => values.first()?.to_f64(),
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// EXIF stores `YYYY:MM:DD HH:MM:SS`; returned as ISO-8601 local time.
fn exif_date_time(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(ref values) = field.value else {
        return None;
    };
    let parsed = exif::DateTime::from_ascii(values.first()?).ok()?;

    let month = Month::try_from(parsed.month).ok()?;
    let date = Date::from_calendar_date(i32::from(parsed.year), month, parsed.day).ok()?;
    let time = Time::from_hms(parsed.hour, parsed.minute, parsed.second).ok()?;
    PrimitiveDateTime::new(date, time)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]"
        ))
        .ok()
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
