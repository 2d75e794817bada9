pub mod rate_limits;

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::config::rate_limits::UploadRateLimit;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub storage_root: PathBuf,
    pub public_base_url: String,
    pub api_key: Option<String>,
    pub upload_max_bytes: u64,
    pub min_free_space_bytes: u64,
    pub video_space_multiplier: f64,
    pub upload_rate_limit: UploadRateLimit,
    pub cors_allowed_origins: Vec<String>,
    pub video: VideoToolConfig,
}

/// External tool locations, bounds and fixed encoding parameters for video.
#[derive(Clone, Debug)]
pub struct VideoToolConfig {
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    pub probe_timeout: Duration,
    pub transcode_timeout: Duration,
    pub crf: u8,
    pub preset: String,
    pub audio_bitrate: String,
}

impl Default for VideoToolConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            probe_timeout: Duration::from_secs(30),
            transcode_timeout: Duration::from_secs(1800),
            crf: 23,
            preset: "medium".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let mut parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        if let Ok(port) = std::env::var("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|err| anyhow!("invalid PORT: {}", err))?;
            parsed_http_addr.set_port(port);
            http_addr = parsed_http_addr.to_string();
        }

        let public_base_url = env_or("PUBLIC_BASE_URL", "http://localhost:8080");
        url::Url::parse(&public_base_url)
            .map_err(|err| anyhow!("invalid PUBLIC_BASE_URL: {}", err))?;

        let video_space_multiplier: f64 = env_or_parse("VIDEO_SPACE_MULTIPLIER", "3.0")?;
        if !(video_space_multiplier >= 1.0) {
            return Err(anyhow!("invalid VIDEO_SPACE_MULTIPLIER: must be at least 1.0"));
        }

        let upload_rate_limit = UploadRateLimit {
            max_uploads: env_or_parse("UPLOAD_RATE_LIMIT", "100")?,
            window_seconds: env_or_parse("UPLOAD_RATE_WINDOW_SECONDS", "900")?,
        };
        if upload_rate_limit.max_uploads == 0 {
            return Err(anyhow!("invalid UPLOAD_RATE_LIMIT: must be positive"));
        }
        if upload_rate_limit.window_seconds == 0 {
            return Err(anyhow!("invalid UPLOAD_RATE_WINDOW_SECONDS: must be positive"));
        }

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            http_addr,
            storage_root: PathBuf::from(env_or("STORAGE_ROOT", "./uploads")),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("API_KEY").ok().filter(|key| !key.is_empty()),
            upload_max_bytes: env_or_parse("UPLOAD_MAX_BYTES", "524288000")?,
            min_free_space_bytes: env_or_parse("MIN_FREE_SPACE_BYTES", "1073741824")?,
            video_space_multiplier,
            upload_rate_limit,
            cors_allowed_origins,
            video: VideoToolConfig {
                ffprobe_path: env_or("FFPROBE_PATH", "ffprobe"),
                ffmpeg_path: env_or("FFMPEG_PATH", "ffmpeg"),
                probe_timeout: Duration::from_secs(env_or_parse("PROBE_TIMEOUT_SECONDS", "30")?),
                transcode_timeout: Duration::from_secs(env_or_parse(
                    "TRANSCODE_TIMEOUT_SECONDS",
                    "1800",
                )?),
                crf: env_or_parse("TRANSCODE_CRF", "23")?,
                preset: env_or("TRANSCODE_PRESET", "medium"),
                audio_bitrate: env_or("TRANSCODE_AUDIO_BITRATE", "128k"),
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}
