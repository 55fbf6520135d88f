//! Technical metadata via ffprobe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::process::tool_name;
use super::{BackendError, MetadataExtractor};
use crate::model::MediaMetadata;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ProbeData {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
    tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Parses `ffprobe -print_format json -show_streams -show_format` output.
///
/// # Errors
///
/// Returns [`BackendError::Parse`] when the document is not ffprobe JSON.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaMetadata, BackendError> {
    let data: ProbeData =
        serde_json::from_str(json).map_err(|e| BackendError::parse("ffprobe", e.to_string()))?;
    let mut metadata = MediaMetadata::default();

    if let Some(format) = data.format {
        metadata.duration_secs = format.duration.and_then(|d| d.parse().ok());
        metadata.bitrate = format.bit_rate.and_then(|b| b.parse().ok());
        metadata.file_size = format.size.and_then(|s| s.parse().ok());
        if let Some(tags) = format.tags {
            let tag = |key: &str| {
                tags.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            };
            metadata.title = tag("title");
            metadata.artist = tag("artist");
            metadata.album = tag("album");
        }
    }

    let video = data
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    if let Some(video) = video {
        metadata.video_codec.clone_from(&video.codec_name);
        if let (Some(w), Some(h)) = (video.width, video.height) {
            metadata.resolution = Some(format!("{w}x{h}"));
        }
        metadata.frame_rate = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rate));
    }
    metadata.audio_codec = data
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .and_then(|s| s.codec_name.clone());

    Ok(metadata)
}

/// `num/den` frame rate; `0/0` and malformed values are `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| ((num / den) * 100.0).round() / 100.0)
}

/// Probes files with a local ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeExtractor {
    program: PathBuf,
}

impl FfprobeExtractor {
    #[must_use]
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
        }
    }
}

#[async_trait]
impl MetadataExtractor for FfprobeExtractor {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn extract(&self, path: &Path) -> Result<MediaMetadata, BackendError> {
        let tool = tool_name(&self.program);
        let output = Command::new(&self.program)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(PROBE_TIMEOUT, output)
            .await
            .map_err(|_| BackendError::timeout(&tool, PROBE_TIMEOUT.as_secs()))?
            .map_err(|e| BackendError::tool_missing(&tool, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::exit_status(tool, output.status.code(), stderr.trim()));
        }
        let json = String::from_utf8_lossy(&output.stdout);
        let metadata = parse_ffprobe_json(&json)?;
        debug!(resolution = ?metadata.resolution, duration = ?metadata.duration_secs, "probed file");
        Ok(metadata)
    }
}
