pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use anyhow::Result;
use std::sync::Arc;

use crate::app::media::MediaService;
use crate::app::rate_limiter::RateLimiter;
use crate::app::video::VideoProcessor;
use crate::config::AppConfig;
use crate::infra::disk::{DiskGuard, FsSpaceProbe};
use crate::infra::index::DuplicateIndex;
use crate::infra::storage::LocalStorage;

pub const INDEX_FILENAME: &str = "hash-index.json";

#[derive(Clone)]
pub struct AppState {
    pub storage: LocalStorage,
    pub index: DuplicateIndex,
    pub disk: DiskGuard,
    pub video: VideoProcessor,
    pub rate_limiter: RateLimiter,
    pub api_key: Option<String>,
    pub upload_max_bytes: u64,
    pub video_space_multiplier: f64,
    pub cors_allowed_origins: Vec<String>,
}

impl AppState {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let storage = LocalStorage::new(&config.storage_root, &config.public_base_url).await?;
        let index = DuplicateIndex::load(config.storage_root.join(INDEX_FILENAME)).await?;
        let disk = DiskGuard::new(
            Arc::new(FsSpaceProbe::new(&config.storage_root)),
            config.min_free_space_bytes,
        );

        Ok(Self {
            storage,
            index,
            disk,
            video: VideoProcessor::new(config.video.clone()),
            rate_limiter: RateLimiter::new(config.upload_rate_limit),
            api_key: config.api_key.clone(),
            upload_max_bytes: config.upload_max_bytes,
            video_space_multiplier: config.video_space_multiplier,
            cors_allowed_origins: config.cors_allowed_origins.clone(),
        })
    }

    pub fn media_service(&self) -> MediaService {
        MediaService::new(
            self.storage.clone(),
            self.index.clone(),
            self.disk.clone(),
            self.video.clone(),
            self.video_space_multiplier,
        )
    }
}
