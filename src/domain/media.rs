use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn area(&self) -> StorageArea {
        match self {
            MediaKind::Image => StorageArea::Images,
            MediaKind::Video => StorageArea::Videos,
        }
    }

    /// Accepts both the singular kind and the plural directory name.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "image" | "images" => Some(MediaKind::Image),
            "video" | "videos" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Publicly served subdirectories of the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Images,
    Videos,
    Thumbnails,
}

impl StorageArea {
    pub const ALL: [StorageArea; 3] = [
        StorageArea::Images,
        StorageArea::Videos,
        StorageArea::Thumbnails,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            StorageArea::Images => "images",
            StorageArea::Videos => "videos",
            StorageArea::Thumbnails => "thumbnails",
        }
    }

    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "thumbnail" | "thumbnails" => Some(StorageArea::Thumbnails),
            other => MediaKind::from_param(other).map(|kind| kind.area()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
    pub path: String,
    pub url: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
    pub lqip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<ExifData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<String>,
}

impl ExifData {
    pub fn is_empty(&self) -> bool {
        *self == ExifData::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoOrientation {
    Horizontal,
    Vertical,
}

impl VideoOrientation {
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width >= height {
            VideoOrientation::Horizontal
        } else {
            VideoOrientation::Vertical
        }
    }
}

/// The MIME type is carried by the surrounding response, not repeated here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<VideoOrientation>,
    pub transcoded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lqip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaMetadata {
    Image(ImageMetadata),
    Video(VideoMetadata),
}

impl MediaMetadata {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaMetadata::Image(_) => MediaKind::Image,
            MediaMetadata::Video(_) => MediaKind::Video,
        }
    }
}
