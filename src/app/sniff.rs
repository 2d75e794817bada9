use image::ImageFormat;

use crate::domain::media::MediaKind;

/// A content type detected from the payload's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentType {
    pub mime: &'static str,
    pub extension: &'static str,
    pub kind: MediaKind,
}

impl ContentType {
    const fn image(mime: &'static str, extension: &'static str) -> Self {
        Self {
            mime,
            extension,
            kind: MediaKind::Image,
        }
    }

    const fn video(mime: &'static str, extension: &'static str) -> Self {
        Self {
            mime,
            extension,
            kind: MediaKind::Video,
        }
    }
}

pub const MP4: ContentType = ContentType::video("video/mp4", "mp4");
pub const M4V: ContentType = ContentType::video("video/x-m4v", "m4v");

impl ContentType {
    /// MP4 and its M4V brands, the containers browsers play without re-encoding.
    pub fn is_mp4_family(&self) -> bool {
        *self == MP4 || *self == M4V
    }
}

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Image-only or audio-only ISO-BMFF brands.
const REJECTED_BRANDS: &[&[u8; 4]] = &[
    b"avif", b"avis", b"heic", b"heix", b"heim", b"heis", b"hevc", b"mif1", b"msf1", b"M4A ",
    b"M4B ", b"M4P ",
];

/// Detects an allowed image or video type. Returns `None` for anything else.
pub fn sniff(bytes: &[u8]) -> Option<ContentType> {
    sniff_image(bytes).or_else(|| sniff_video(bytes))
}

fn sniff_image(bytes: &[u8]) -> Option<ContentType> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some(ContentType::image("image/jpeg", "jpg")),
        ImageFormat::Png => Some(ContentType::image("image/png", "png")),
        ImageFormat::Gif => Some(ContentType::image("image/gif", "gif")),
        ImageFormat::WebP => Some(ContentType::image("image/webp", "webp")),
        _ => None,
    }
}

fn sniff_video(bytes: &[u8]) -> Option<ContentType> {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand: &[u8; 4] = bytes[8..12].try_into().ok()?;
        if REJECTED_BRANDS.contains(&brand) {
            return None;
        }
        return Some(match brand {
            b"qt  " => ContentType::video("video/quicktime", "mov"),
            b"M4V " | b"M4VH" | b"M4VP" => M4V,
            _ if brand.starts_with(b"3gp") || brand.starts_with(b"3g2") => {
                ContentType::video("video/3gpp", "3gp")
            }
            _ => MP4,
        });
    }

    if bytes.starts_with(&EBML_MAGIC) {
        let header = &bytes[..bytes.len().min(64)];
        let is_webm = header.windows(4).any(|window| window == b"webm");
        return Some(if is_webm {
            ContentType::video("video/webm", "webm")
        } else {
            ContentType::video("video/x-matroska", "mkv")
        });
    }

    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"AVI " {
        return Some(ContentType::video("video/x-msvideo", "avi"));
    }

    None
}
