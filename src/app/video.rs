use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use thiserror::Error;

use crate::app::imaging::round_to;
use crate::app::sniff::ContentType;
use crate::config::VideoToolConfig;
use crate::domain::media::{VideoMetadata, VideoOrientation};
use crate::infra::process::{self, CommandError};

const WEB_VIDEO_CODECS: &[&str] = &["h264", "avc1"];
const WEB_AUDIO_CODECS: &[&str] = &["aac", "mp4a"];
const POSTER_MAX_WIDTH: u32 = 640;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("unreadable ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What the probing tool reported about a video file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub format_name: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    pub frame_rate: Option<f64>,
}

impl ProbeReport {
    /// MP4-family container, H.264 video, and AAC or no audio.
    pub fn is_web_compatible(&self) -> bool {
        let container_ok = self
            .format_name
            .as_deref()
            .map(|name| name.split(',').any(|part| part.trim() == "mp4"))
            .unwrap_or(false);
        let video_ok = self
            .video_codec
            .as_deref()
            .map(|codec| WEB_VIDEO_CODECS.contains(&codec))
            .unwrap_or(false);
        let audio_ok = self
            .audio_codec
            .as_deref()
            .map(|codec| WEB_AUDIO_CODECS.contains(&codec))
            .unwrap_or(true);
        container_ok && video_ok && audio_ok
    }

    pub fn to_metadata(&self) -> VideoMetadata {
        VideoMetadata {
            width: self.width,
            height: self.height,
            duration: self.duration,
            codec: self.video_codec.clone(),
            frame_rate: self.frame_rate,
            orientation: match (self.width, self.height) {
                (Some(width), Some(height)) => Some(VideoOrientation::from_dimensions(width, height)),
                _ => None,
            },
            ..VideoMetadata::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodecAnalysis {
    pub report: Option<ProbeReport>,
    pub is_web_compatible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOutcome {
    pub original_deleted: bool,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

/// Parses `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(raw: &[u8]) -> Result<ProbeReport, serde_json::Error> {
    let output: FfprobeOutput = serde_json::from_slice(raw)?;
    let video = output
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));
    let audio = output
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"));

    let (mut width, mut height) = (
        video.and_then(|stream| stream.width),
        video.and_then(|stream| stream.height),
    );
    if video.map(is_rotated_quarter_turn).unwrap_or(false) {
        std::mem::swap(&mut width, &mut height);
    }

    let duration = output
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .or_else(|| video.and_then(|stream| stream.duration.as_deref()))
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0);

    let frame_rate = video.and_then(|stream| {
        stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| stream.avg_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    Ok(ProbeReport {
        format_name: output.format.and_then(|format| format.format_name),
        video_codec: video.and_then(|stream| stream.codec_name.clone()),
        audio_codec: audio.and_then(|stream| stream.codec_name.clone()),
        width,
        height,
        duration,
        frame_rate,
    })
}

/// `"30000/1001"` -> `29.97`. A zero denominator or numerator yields `None`.
pub fn parse_frame_rate(value: &str) -> Option<f64> {
    let (num, den) = match value.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (value.trim().parse::<f64>().ok()?, 1.0),
    };
    if num <= 0.0 || den <= 0.0 {
        return None;
    }
    Some(round_to(num / den, 2))
}

fn is_rotated_quarter_turn(stream: &FfprobeStream) -> bool {
    let from_tags = stream
        .tags
        .get("rotate")
        .and_then(|value| value.parse::<i64>().ok());
    let from_side_data = stream
        .side_data_list
        .iter()
        .find_map(|entry| entry.get("rotation").and_then(|value| value.as_i64()));
    from_side_data
        .or(from_tags)
        .map(|rotation| rotation.rem_euclid(180) == 90)
        .unwrap_or(false)
}

/// Drives `ffprobe` and `ffmpeg` with fixed, bounded invocations.
#[derive(Clone, Debug)]
pub struct VideoProcessor {
    config: VideoToolConfig,
}

impl VideoProcessor {
    pub fn new(config: VideoToolConfig) -> Self {
        Self { config }
    }

    pub async fn probe(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            path.into(),
        ];
        let output = process::run(&self.config.ffprobe_path, args, self.config.probe_timeout).await?;
        Ok(parse_probe_output(&output.stdout)?)
    }

    /// Any probe failure means "needs transcoding". Containers outside the MP4
    /// family are always re-encoded so the stored file is browser-playable.
    pub async fn analyze(&self, path: &Path, content_type: ContentType) -> CodecAnalysis {
        match self.probe(path).await {
            Ok(report) => {
                let is_web_compatible = content_type.is_mp4_family() && report.is_web_compatible();
                tracing::debug!(
                    format = ?report.format_name,
                    video_codec = ?report.video_codec,
                    audio_codec = ?report.audio_codec,
                    is_web_compatible,
                    "video probed"
                );
                CodecAnalysis {
                    report: Some(report),
                    is_web_compatible,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "video probe failed, assuming transcode is required");
                CodecAnalysis {
                    report: None,
                    is_web_compatible: false,
                }
            }
        }
    }

    /// Re-encodes to H.264/AAC MP4 with the moov atom up front.
    ///
    /// On success the input is deleted (best effort). On failure the partial
    /// output is deleted and the tool's stderr is carried in the error.
    pub async fn transcode(&self, input: &Path, output: &Path) -> Result<TranscodeOutcome, CommandError> {
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            self.config.preset.clone().into(),
            "-crf".into(),
            self.config.crf.to_string().into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-vf".into(),
            "scale=trunc(iw/2)*2:trunc(ih/2)*2".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            self.config.audio_bitrate.clone().into(),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
            output.into(),
        ];

        let started = std::time::Instant::now();
        let result = match process::run(&self.config.ffmpeg_path, args, self.config.transcode_timeout).await {
            Ok(result) => result,
            Err(err) => {
                remove_quietly(output, "failed to remove partial transcode output").await;
                return Err(err);
            }
        };
        tracing::info!(
            input = %input.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "video transcoded"
        );
        if !result.stderr.is_empty() {
            tracing::debug!(stderr = %result.stderr, "ffmpeg diagnostics");
        }

        let original_deleted = match tokio::fs::remove_file(input).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = ?err, path = %input.display(), "failed to delete original after transcode");
                false
            }
        };
        Ok(TranscodeOutcome { original_deleted })
    }

    /// Grabs one frame near the start (at most 1s in, or mid-way for short clips) as a JPEG.
    pub async fn extract_poster(
        &self,
        video: &Path,
        output: &Path,
        duration: Option<f64>,
    ) -> Result<(), CommandError> {
        let seek = duration.map(|duration| (duration / 2.0).min(1.0)).unwrap_or(0.0);
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format!("{:.3}", seek).into(),
            "-i".into(),
            video.into(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            format!("scale='min({},iw)':-2", POSTER_MAX_WIDTH).into(),
            "-q:v".into(),
            "4".into(),
            "-f".into(),
            "image2".into(),
            "-c:v".into(),
            "mjpeg".into(),
            output.into(),
        ];
        if let Err(err) = process::run(&self.config.ffmpeg_path, args, self.config.probe_timeout).await {
            remove_quietly(output, "failed to remove partial poster").await;
            return Err(err);
        }
        Ok(())
    }
}

async fn remove_quietly(path: &Path, message: &'static str) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = ?err, path = %path.display(), "{}", message);
        }
    }
}
