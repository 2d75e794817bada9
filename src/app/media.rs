use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use ulid::Ulid;

use crate::app::hasher::content_hash;
use crate::app::imaging::{self, MetadataError};
use crate::app::sniff::{self, ContentType, MP4};
use crate::app::video::VideoProcessor;
use crate::domain::index::IndexEntry;
use crate::domain::media::{MediaKind, MediaMetadata, StorageArea, StoredFile, VideoMetadata};
use crate::infra::disk::DiskGuard;
use crate::infra::index::DuplicateIndex;
use crate::infra::process::CommandError;
use crate::infra::storage::{file_stem, sanitize_filename, AreaUsage, LocalStorage};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file type")]
    UnsupportedType,
    #[error("upload is empty")]
    EmptyUpload,
    #[error("insufficient storage space ({required} bytes required)")]
    InsufficientStorage { required: u64 },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("video transcoding failed: {0}")]
    Transcode(#[source] CommandError),
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to update duplicate index: {0}")]
    Index(#[source] io::Error),
}

/// A received upload: the raw bytes plus whatever name the client sent.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_filename: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub id: String,
    pub url: String,
    pub original_filename: Option<String>,
    pub mime_type: String,
    pub size: u64,
    #[serde(flatten)]
    pub metadata: MediaMetadata,
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    pub success: bool,
    pub id: String,
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(flatten)]
    pub metadata: MediaMetadata,
}

#[derive(Debug, Serialize)]
pub struct FileListing {
    pub images: Vec<StoredFile>,
    pub videos: Vec<StoredFile>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StorageStats {
    pub success: bool,
    pub disk: DiskStats,
    pub images: AreaStats,
    pub videos: AreaStats,
    pub thumbnails: AreaStats,
    pub limits: Limits,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
    pub total_formatted: String,
    pub free_formatted: String,
    pub used_formatted: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaStats {
    pub count: u64,
    pub size: u64,
    pub size_formatted: String,
}

impl From<AreaUsage> for AreaStats {
    fn from(usage: AreaUsage) -> Self {
        Self {
            count: usage.count,
            size: usage.bytes,
            size_formatted: format_bytes(usage.bytes),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_file_size: u64,
    pub max_file_size_formatted: String,
    pub min_free_space: u64,
    pub min_free_space_formatted: String,
    pub video_space_multiplier: f64,
}

/// What was derived for a file already sitting in storage.
struct Described {
    mime_type: String,
    size: u64,
    metadata: MediaMetadata,
}

struct Stored {
    filename: String,
    mime_type: String,
    size: u64,
    metadata: MediaMetadata,
}

/// Orchestrates one upload: sniff, hash, dedup, admit, process, persist, index.
#[derive(Clone)]
pub struct MediaService {
    storage: LocalStorage,
    index: DuplicateIndex,
    disk: DiskGuard,
    video: VideoProcessor,
    video_space_multiplier: f64,
}

impl MediaService {
    pub fn new(
        storage: LocalStorage,
        index: DuplicateIndex,
        disk: DiskGuard,
        video: VideoProcessor,
        video_space_multiplier: f64,
    ) -> Self {
        Self {
            storage,
            index,
            disk,
            video,
            video_space_multiplier,
        }
    }

    pub async fn ingest(&self, upload: Upload) -> Result<UploadResponse, IngestError> {
        if upload.bytes.is_empty() {
            return Err(IngestError::EmptyUpload);
        }
        let content_type = sniff::sniff(&upload.bytes).ok_or(IngestError::UnsupportedType)?;

        let hashed = upload.bytes.clone();
        let hash = tokio::task::spawn_blocking(move || content_hash(&hashed))
            .await
            .map_err(|err| IngestError::Io(io::Error::other(err)))?;

        let _claim = self.index.claim(&hash).await;

        if let Some(entry) = self.index.lookup(&hash).await {
            if let Some(described) = self.describe(entry.kind, &entry.filename).await? {
                tracing::info!(hash = %hash, filename = %entry.filename, "duplicate upload");
                return Ok(UploadResponse {
                    success: true,
                    id: file_stem(&entry.filename).to_string(),
                    url: entry.url,
                    original_filename: upload.original_filename,
                    mime_type: described.mime_type,
                    size: described.size,
                    metadata: described.metadata,
                    duplicate: true,
                });
            }

            tracing::warn!(hash = %hash, filename = %entry.filename, "indexed file is missing, ingesting again");
            if let Err(err) = self.index.remove_by_hash(&hash).await {
                tracing::warn!(error = ?err, hash = %hash, "failed to drop stale index entry");
            }
        }

        let required = self.required_space(content_type.kind, upload.bytes.len() as u64);
        if !self.disk.has_capacity(required).await {
            tracing::warn!(required, kind = content_type.kind.as_str(), "rejecting upload, disk floor reached");
            return Err(IngestError::InsufficientStorage { required });
        }

        let id = new_id();
        let stored = match content_type.kind {
            MediaKind::Image => self.store_image(&id, content_type, upload.bytes).await?,
            MediaKind::Video => self.store_video(&id, content_type, &upload.bytes).await?,
        };

        let kind = stored.metadata.kind();
        let url = self.storage.url_for(kind.area(), &stored.filename);
        let entry = IndexEntry {
            hash: hash.clone(),
            filename: stored.filename.clone(),
            kind,
            url: url.clone(),
        };
        if let Err(err) = self.index.upsert(entry).await {
            tracing::error!(error = ?err, hash = %hash, filename = %stored.filename, "file stored but not indexed");
            return Err(IngestError::Index(err));
        }

        tracing::info!(
            id = %id,
            hash = %hash,
            kind = kind.as_str(),
            size = stored.size,
            "upload stored"
        );

        Ok(UploadResponse {
            success: true,
            id,
            url,
            original_filename: upload.original_filename,
            mime_type: stored.mime_type,
            size: stored.size,
            metadata: stored.metadata,
            duplicate: false,
        })
    }

    /// Video needs room for the original and the transcoded copy at once.
    fn required_space(&self, kind: MediaKind, upload_bytes: u64) -> u64 {
        match kind {
            MediaKind::Image => upload_bytes,
            MediaKind::Video => (upload_bytes as f64 * self.video_space_multiplier).ceil() as u64,
        }
    }

    async fn store_image(
        &self,
        id: &str,
        content_type: ContentType,
        bytes: Bytes,
    ) -> Result<Stored, IngestError> {
        let decoded = bytes.clone();
        let metadata = tokio::task::spawn_blocking(move || imaging::extract_image_metadata(&decoded))
            .await
            .map_err(|err| IngestError::Io(io::Error::other(err)))??;

        let filename = format!("{}.{}", id, content_type.extension);
        self.storage
            .write_atomic(StorageArea::Images, &filename, &bytes)
            .await?;

        Ok(Stored {
            filename,
            mime_type: content_type.mime.to_string(),
            size: bytes.len() as u64,
            metadata: MediaMetadata::Image(metadata),
        })
    }

    async fn store_video(
        &self,
        id: &str,
        content_type: ContentType,
        bytes: &[u8],
    ) -> Result<Stored, IngestError> {
        let staged = self
            .storage
            .temp_file(&format!("{}.upload.{}", id, content_type.extension));
        fs::write(staged.path(), bytes).await?;

        let analysis = self.video.analyze(staged.path(), content_type).await;

        let (final_file, final_type, report, transcode) = if analysis.is_web_compatible {
            (staged, content_type, analysis.report, None)
        } else {
            let output = self.storage.temp_file(&format!("{}.transcode.mp4", id));
            let mut outcome = self
                .video
                .transcode(staged.path(), output.path())
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, id = %id, "transcode failed");
                    IngestError::Transcode(err)
                })?;
            // The staged original gets one more removal attempt; report what is left.
            if outcome.original_deleted {
                staged.disarm();
            } else {
                outcome.original_deleted = staged.discard().await;
            }

            let report = match self.video.probe(output.path()).await {
                Ok(report) => Some(report),
                Err(err) => {
                    tracing::warn!(error = %err, id = %id, "failed to probe transcoded video");
                    None
                }
            };
            (output, MP4, report, Some(outcome))
        };

        let filename = format!("{}.{}", id, final_type.extension);
        let path = self
            .storage
            .promote(final_file, StorageArea::Videos, &filename)
            .await?;
        let size = fs::metadata(&path).await?.len();

        let mut metadata = report.map(|report| report.to_metadata()).unwrap_or_default();
        if let Some(outcome) = transcode {
            metadata.transcoded = true;
            metadata.original_mime_type = Some(content_type.mime.to_string());
            metadata.original_deleted = Some(outcome.original_deleted);
        }
        self.attach_poster(id, &path, &mut metadata).await;

        Ok(Stored {
            filename,
            mime_type: final_type.mime.to_string(),
            size,
            metadata: MediaMetadata::Video(metadata),
        })
    }

    /// Poster and placeholder are optional; failures only cost the fields.
    async fn attach_poster(&self, id: &str, video: &Path, metadata: &mut VideoMetadata) {
        let staged = self.storage.temp_file(&format!("{}.poster.jpg", id));
        if let Err(err) = self
            .video
            .extract_poster(video, staged.path(), metadata.duration)
            .await
        {
            tracing::warn!(error = %err, id = %id, "failed to extract poster frame");
            return;
        }

        let poster = match fs::read(staged.path()).await {
            Ok(poster) if !poster.is_empty() => poster,
            Ok(_) => {
                tracing::warn!(id = %id, "poster frame is empty");
                return;
            }
            Err(err) => {
                tracing::warn!(error = ?err, id = %id, "failed to read poster frame");
                return;
            }
        };

        let thumbnail = format!("{}.jpg", id);
        match self
            .storage
            .promote(staged, StorageArea::Thumbnails, &thumbnail)
            .await
        {
            Ok(_) => {
                metadata.thumbnail_url = Some(self.storage.url_for(StorageArea::Thumbnails, &thumbnail));
                metadata.lqip = poster_lqip(poster).await;
            }
            Err(err) => tracing::warn!(error = ?err, id = %id, "failed to store poster frame"),
        }
    }

    /// Re-derives metadata for a stored file without re-uploading it.
    /// `Ok(None)` when the file does not exist.
    async fn describe(&self, kind: MediaKind, filename: &str) -> Result<Option<Described>, IngestError> {
        let Some(path) = self.storage.resolve(kind.area(), filename) else {
            return Ok(None);
        };
        let size = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mime_type = mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream");

        let metadata = match kind {
            MediaKind::Image => {
                let bytes = fs::read(&path).await?;
                let metadata = tokio::task::spawn_blocking(move || imaging::extract_image_metadata(&bytes))
                    .await
                    .map_err(|err| IngestError::Io(io::Error::other(err)))??;
                MediaMetadata::Image(metadata)
            }
            MediaKind::Video => {
                let mut metadata = match self.video.probe(&path).await {
                    Ok(report) => report.to_metadata(),
                    Err(err) => {
                        tracing::warn!(error = %err, filename = %filename, "failed to probe stored video");
                        VideoMetadata::default()
                    }
                };
                let thumbnail = format!("{}.jpg", file_stem(filename));
                if let Some(thumbnail_path) = self.storage.resolve(StorageArea::Thumbnails, &thumbnail) {
                    if let Ok(poster) = fs::read(&thumbnail_path).await {
                        metadata.thumbnail_url =
                            Some(self.storage.url_for(StorageArea::Thumbnails, &thumbnail));
                        metadata.lqip = poster_lqip(poster).await;
                    }
                }
                MediaMetadata::Video(metadata)
            }
        };

        Ok(Some(Described {
            mime_type: mime_type.to_string(),
            size,
            metadata,
        }))
    }

    /// Metadata for a file referenced by its public URL (or bare filename).
    pub async fn metadata_for_url(
        &self,
        url: &str,
        kind: MediaKind,
    ) -> Result<Option<MetadataResponse>, IngestError> {
        let Some(filename) = filename_from_url(url) else {
            return Ok(None);
        };
        let Some(described) = self.describe(kind, &filename).await? else {
            return Ok(None);
        };
        Ok(Some(MetadataResponse {
            success: true,
            id: file_stem(&filename).to_string(),
            url: self.storage.url_for(kind.area(), &filename),
            filename,
            mime_type: described.mime_type,
            size: described.size,
            metadata: described.metadata,
        }))
    }

    pub async fn list(&self) -> Result<FileListing> {
        let (images, videos) = futures::future::try_join(
            self.storage.list(MediaKind::Image),
            self.storage.list(MediaKind::Video),
        )
        .await?;
        let total = images.len() + videos.len();
        Ok(FileListing {
            images,
            videos,
            total,
        })
    }

    pub async fn stats(&self, upload_max_bytes: u64) -> Result<StorageStats> {
        let (images, videos, thumbnails) = futures::future::try_join3(
            self.storage.usage(StorageArea::Images),
            self.storage.usage(StorageArea::Videos),
            self.storage.usage(StorageArea::Thumbnails),
        )
        .await?;
        let disk = self.disk.usage().await;
        let used_percent = if disk.total == 0 {
            0.0
        } else {
            imaging::round_to(disk.used() as f64 / disk.total as f64 * 100.0, 2)
        };

        Ok(StorageStats {
            success: true,
            disk: DiskStats {
                total: disk.total,
                free: disk.free,
                used: disk.used(),
                used_percent,
                total_formatted: format_bytes(disk.total),
                free_formatted: format_bytes(disk.free),
                used_formatted: format_bytes(disk.used()),
            },
            images: AreaStats::from(images),
            videos: AreaStats::from(videos),
            thumbnails: AreaStats::from(thumbnails),
            limits: Limits {
                max_file_size: upload_max_bytes,
                max_file_size_formatted: format_bytes(upload_max_bytes),
                min_free_space: self.disk.min_free_bytes(),
                min_free_space_formatted: format_bytes(self.disk.min_free_bytes()),
                video_space_multiplier: self.video_space_multiplier,
            },
        })
    }

    /// Returns `false` when there was no such file. The index entry (and for
    /// videos the poster) are removed best effort.
    pub async fn delete(&self, kind: MediaKind, filename: &str) -> Result<bool> {
        let deleted = self.storage.remove(kind.area(), filename).await?;
        if !deleted {
            return Ok(false);
        }

        if kind == MediaKind::Video {
            let thumbnail = format!("{}.jpg", file_stem(filename));
            if let Err(err) = self.storage.remove(StorageArea::Thumbnails, &thumbnail).await {
                tracing::warn!(error = ?err, filename = %thumbnail, "failed to delete poster frame");
            }
        }

        match self.index.remove_by_filename(filename).await {
            Ok(Some(entry)) => tracing::debug!(hash = %entry.hash, "index entry removed"),
            Ok(None) => tracing::debug!(filename = %filename, "no index entry for deleted file"),
            Err(err) => {
                tracing::warn!(error = ?err, filename = %filename, "failed to remove index entry")
            }
        }

        tracing::info!(kind = kind.as_str(), filename = %filename, "file deleted");
        Ok(true)
    }
}

async fn poster_lqip(poster: Vec<u8>) -> Option<String> {
    let result = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&poster).map_err(MetadataError::Decode)?;
        imaging::generate_lqip(&image)
    })
    .await;
    match result {
        Ok(Ok(lqip)) => Some(lqip),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "failed to build poster placeholder");
            None
        }
        Err(err) => {
            tracing::warn!(error = ?err, "poster placeholder task failed");
            None
        }
    }
}

/// 1024-based, at most two decimals: `1536` -> `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{} {}", imaging::round_to(value, 2), UNITS[unit])
}

fn new_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

/// Last path segment of an absolute URL or a relative path, if it is a safe filename.
pub fn filename_from_url(value: &str) -> Option<String> {
    let path = match url::Url::parse(value) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => value.split(|c| c == '?' || c == '#').next().unwrap_or_default().to_string(),
    };
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    sanitize_filename(last).map(str::to_string)
}
