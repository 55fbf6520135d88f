//! ffmpeg-backed converter.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::process::{ProgressParser, ToolRunner, tool_name};
use super::{BackendError, Converter};
use crate::model::{ConversionOptions, Media, OutputFormat};

/// Builds the ffmpeg argument list for one conversion.
///
/// Progress is requested as `key=value` lines on stdout (`-progress pipe:1`)
/// so it can be parsed without scraping the stderr banner.
#[must_use]
pub fn build_ffmpeg_args(input: &Path, output: &Path, options: &ConversionOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-i".into(), input.display().to_string()];
    let format = options.output_format;

    if options.audio_language.is_some() || options.subtitle_language.is_some() {
        if !format.is_audio_only() {
            args.extend(["-map".into(), "0:v?".into()]);
        }
        let audio_map = options
            .audio_language
            .as_deref()
            .map_or_else(|| "0:a?".to_string(), |lang| format!("0:a:m:language:{lang}?"));
        args.extend(["-map".into(), audio_map]);
        if let Some(lang) = options.subtitle_language.as_deref() {
            if !format.is_audio_only() {
                args.extend(["-map".into(), format!("0:s:m:language:{lang}?")]);
            }
        }
    }

    if format.is_audio_only() {
        let codec = if format == OutputFormat::Mp3 { "libmp3lame" } else { "aac" };
        let bitrate = options
            .audio_bitrate
            .clone()
            .or_else(|| options.quality.preset().map(|p| p.audio_bitrate.to_string()))
            .unwrap_or_else(|| "320k".to_string());
        args.extend(["-vn".into(), "-c:a".into(), codec.into(), "-b:a".into(), bitrate]);
    } else if let Some(preset) = options.quality.preset() {
        let audio_bitrate = options
            .audio_bitrate
            .clone()
            .unwrap_or_else(|| preset.audio_bitrate.to_string());
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            preset.speed.into(),
            "-b:v".into(),
            preset.video_bitrate.into(),
            "-vf".into(),
            format!("scale=-2:{}", preset.height),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            audio_bitrate,
        ]);
        if options.subtitle_language.is_some() {
            args.extend(["-c:s".into(), subtitle_codec(format).into()]);
        }
    } else {
        args.extend(["-c".into(), "copy".into()]);
    }

    if matches!(format, OutputFormat::Mp4 | OutputFormat::Mov) {
        args.extend(["-movflags".into(), "+faststart".into()]);
    }
    args.extend(options.custom_args.iter().cloned());
    args.extend(["-progress".into(), "pipe:1".into(), "-nostats".into()]);
    args.push(output.display().to_string());
    args
}

fn subtitle_codec(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Mp4 | OutputFormat::Mov => "mov_text",
        _ => "copy",
    }
}

/// Progress parser for `-progress` output, relative to the input duration.
fn out_time_parser(duration_secs: Option<f64>) -> ProgressParser {
    Arc::new(move |line: &str| {
        let duration = duration_secs.filter(|d| *d > 0.0)?;
        let micros: f64 = line.strip_prefix("out_time_ms=")?.trim().parse().ok()?;
        let percent = (micros / 1_000_000.0 / duration * 100.0).clamp(0.0, 99.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(percent as u8)
    })
}

/// Converts with a local ffmpeg binary.
#[derive(Debug)]
pub struct FfmpegConverter {
    program: PathBuf,
    timeout: Duration,
    runner: ToolRunner,
}

impl FfmpegConverter {
    #[must_use]
    pub fn new(program: &Path, timeout: Duration) -> Self {
        Self {
            program: program.to_path_buf(),
            timeout,
            runner: ToolRunner::new(),
        }
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    #[instrument(skip(self, media, options), fields(media_id = %media.id, format = %options.output_format))]
    async fn convert(
        &self,
        media: &Media,
        options: &ConversionOptions,
        output: &Path,
    ) -> Result<(), BackendError> {
        let input = media
            .downloaded_path
            .as_deref()
            .ok_or_else(|| BackendError::InvalidInput("media has no downloaded file".to_string()))?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::io(parent, e))?;
        }

        let args = build_ffmpeg_args(input, output, options);
        self.runner
            .run(
                &media.id,
                &self.program,
                &args,
                self.timeout,
                out_time_parser(media.metadata.duration_secs),
            )
            .await?;

        let written = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(BackendError::no_output(tool_name(&self.program), output));
        }
        info!(output = %output.display(), bytes = written, "conversion complete");
        Ok(())
    }

    fn progress(&self, media_id: &str) -> u8 {
        self.runner.progress(media_id)
    }

    fn cancel(&self, media_id: &str) -> bool {
        self.runner.cancel(media_id)
    }

    fn forget(&self, media_id: &str) {
        self.runner.forget(media_id);
    }
}
