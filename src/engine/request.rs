//! Typed submission requests, validated once at the boundary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EngineError;
use crate::config::EngineConfig;
use crate::model::{ContentKind, ConversionOptions, OutputFormat, ProviderKind, VideoQuality, filter_custom_args};
use crate::resolver::classify;
use crate::security::SecurityGate;

/// A request to acquire and convert one source.
///
/// Every field except `source` is optional; unset fields take the
/// configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitRequest {
    /// Local path, URL, magnet link or free-text search phrase.
    pub source: String,
    pub output_format: Option<String>,
    pub quality: Option<String>,
    pub keep_original: Option<bool>,
    /// Audio bitrate such as `192k`.
    pub audio_bitrate: Option<String>,
    pub subtitle_language: Option<String>,
    pub audio_language: Option<String>,
    pub custom_args: Vec<String>,
    pub output_directory: Option<PathBuf>,
    pub organize: Option<bool>,
    /// Content-kind override (`movie`, `tv`, `music`, `ebook`, `other`).
    pub media_type: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRequest {
    pub source: String,
    pub source_kind: ProviderKind,
    pub options: ConversionOptions,
}

impl SubmitRequest {
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Validates the request and builds its [`ConversionOptions`].
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] for a missing or unclassifiable source,
    ///   unknown format, quality or media type, and malformed bitrate or
    ///   language codes
    /// - [`EngineError::Security`] when the source path, source URL or
    ///   output directory is refused by the gate
    pub fn validate(
        &self,
        config: &EngineConfig,
        gate: &SecurityGate,
    ) -> Result<AcceptedRequest, EngineError> {
        let source = self.source.trim();
        if source.is_empty() {
            return Err(EngineError::validation("source is required"));
        }
        let source_kind = classify(source)?;

        let source = match source_kind {
            ProviderKind::LocalFile | ProviderKind::ContainerFile => {
                gate.validate_path(Path::new(source), None)?.display().to_string()
            }
            ProviderKind::PeerToPeer if Path::new(source).is_file() => {
                gate.validate_path(Path::new(source), None)?.display().to_string()
            }
            ProviderKind::DirectUrl | ProviderKind::StreamingVideo => {
                gate.validate_url(source)?;
                source.to_string()
            }
            ProviderKind::PeerToPeer | ProviderKind::Search => source.to_string(),
        };

        let output_format = match &self.output_format {
            Some(raw) => raw.parse::<OutputFormat>().map_err(EngineError::Validation)?,
            None => config.default_output_format,
        };
        let quality = match &self.quality {
            Some(raw) => raw.parse::<VideoQuality>().map_err(EngineError::Validation)?,
            None => config.default_quality,
        };
        let content_kind = self
            .media_type
            .as_deref()
            .map(|label| {
                ContentKind::from_label(label)
                    .ok_or_else(|| EngineError::validation(format!("unknown media type '{label}'")))
            })
            .transpose()?;

        let audio_bitrate = optional_field(self.audio_bitrate.as_deref(), is_bitrate, "audio bitrate")?;
        let subtitle_language =
            optional_field(self.subtitle_language.as_deref(), is_language_code, "subtitle language")?;
        let audio_language =
            optional_field(self.audio_language.as_deref(), is_language_code, "audio language")?;

        let output_directory = self
            .output_directory
            .as_deref()
            .map(|dir| gate.validate_path(dir, None))
            .transpose()?;

        let custom_args = filter_custom_args(self.custom_args.iter().map(String::as_str));
        if custom_args.len() != self.custom_args.len() {
            debug!(
                dropped = self.custom_args.len() - custom_args.len(),
                "custom converter arguments filtered"
            );
        }

        Ok(AcceptedRequest {
            source,
            source_kind,
            options: ConversionOptions {
                keep_original: self.keep_original.unwrap_or(false),
                audio_bitrate,
                subtitle_language,
                audio_language,
                custom_args,
                output_directory,
                organize: self.organize.unwrap_or(true),
                content_kind,
                ..ConversionOptions::new(output_format, quality)
            },
        })
    }
}

fn optional_field(
    value: Option<&str>,
    accept: fn(&str) -> bool,
    name: &str,
) -> Result<Option<String>, EngineError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) if accept(v) => Ok(Some(v.to_ascii_lowercase())),
        Some(v) => Err(EngineError::validation(format!("invalid {name} '{v}'"))),
    }
}

/// `64k` to `9999k`.
fn is_bitrate(value: &str) -> bool {
    value
        .strip_suffix(['k', 'K'])
        .is_some_and(|digits| (2..=4).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Two- or three-letter ISO 639 code.
fn is_language_code(value: &str) -> bool {
    (2..=3).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_alphabetic())
}
