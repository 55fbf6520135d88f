//! Output formats, quality presets and the per-job conversion options.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ContentKind;

/// Substrings that disqualify a custom converter argument. They would let a
/// caller override the container, splice inputs or widen allowed protocols.
const DENIED_ARG_PATTERNS: [&str; 4] = ["-f", "format", "concat", "protocol_whitelist"];

/// Target container (video) or codec (audio).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Mkv,
    Avi,
    Mov,
    Mp3,
    Aac,
}

impl OutputFormat {
    pub const ALL: [Self; 6] = [
        Self::Mp4,
        Self::Mkv,
        Self::Avi,
        Self::Mov,
        Self::Mp3,
        Self::Aac,
    ];

    /// File extension without the dot.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
        }
    }

    #[must_use]
    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::Mp3 | Self::Aac)
    }

    /// Formats offered for a content kind.
    #[must_use]
    pub fn for_content(kind: ContentKind) -> Vec<Self> {
        match kind {
            ContentKind::Movie | ContentKind::TvEpisode | ContentKind::Other => {
                vec![Self::Mp4, Self::Mkv, Self::Avi, Self::Mov]
            }
            ContentKind::Music => vec![Self::Mp3, Self::Aac],
            ContentKind::Ebook => Vec::new(),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == normalized)
            .ok_or_else(|| {
                format!(
                    "unsupported output format '{s}' (expected one of: mp4, mkv, avi, mov, mp3, aac)"
                )
            })
    }
}

/// Encoder settings behind a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub height: u32,
    /// x264 speed preset.
    pub speed: &'static str,
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
}

/// Quality tier requested for conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    /// 480p
    Low,
    /// 720p
    Medium,
    /// 1080p
    High,
    /// 2160p
    Ultra,
    /// Stream copy, no re-encode.
    Original,
}

impl VideoQuality {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
            Self::Original => "original",
        }
    }

    /// Encoder settings, or `None` for stream copy.
    #[must_use]
    pub fn preset(&self) -> Option<QualityPreset> {
        match self {
            Self::Low => Some(QualityPreset {
                height: 480,
                speed: "faster",
                video_bitrate: "1000k",
                audio_bitrate: "128k",
            }),
            Self::Medium => Some(QualityPreset {
                height: 720,
                speed: "medium",
                video_bitrate: "2000k",
                audio_bitrate: "192k",
            }),
            Self::High => Some(QualityPreset {
                height: 1080,
                speed: "slow",
                video_bitrate: "4000k",
                audio_bitrate: "320k",
            }),
            Self::Ultra => Some(QualityPreset {
                height: 2160,
                speed: "slow",
                video_bitrate: "8000k",
                audio_bitrate: "320k",
            }),
            Self::Original => None,
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VideoQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "480p" => Ok(Self::Low),
            "medium" | "720p" => Ok(Self::Medium),
            "high" | "1080p" => Ok(Self::High),
            "ultra" | "2160p" | "4k" => Ok(Self::Ultra),
            "original" | "source" => Ok(Self::Original),
            _ => Err(format!("unsupported quality '{s}'")),
        }
    }
}

/// How one job transforms its media. Built once at submission and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOptions {
    pub output_format: OutputFormat,
    pub quality: VideoQuality,
    pub keep_original: bool,
    /// Audio bitrate override such as `192k`.
    pub audio_bitrate: Option<String>,
    pub subtitle_language: Option<String>,
    pub audio_language: Option<String>,
    /// Extra converter arguments, already passed through [`filter_custom_args`].
    pub custom_args: Vec<String>,
    /// Destination override, already accepted by the security gate.
    pub output_directory: Option<PathBuf>,
    pub organize: bool,
    /// Overrides content-kind inference when set.
    pub content_kind: Option<ContentKind>,
}

impl ConversionOptions {
    /// Options with the given format and quality and every other field at
    /// its default.
    #[must_use]
    pub fn new(output_format: OutputFormat, quality: VideoQuality) -> Self {
        Self {
            output_format,
            quality,
            keep_original: false,
            audio_bitrate: None,
            subtitle_language: None,
            audio_language: None,
            custom_args: Vec::new(),
            output_directory: None,
            organize: true,
            content_kind: None,
        }
    }
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self::new(OutputFormat::Mp4, VideoQuality::High)
    }
}

/// Silently drops converter arguments matching the deny-list. A flag and
/// the value after it are kept or dropped together.
#[must_use]
pub fn filter_custom_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut kept = Vec::with_capacity(args.len());
    let mut start = 0;
    while start < args.len() {
        let takes_value = args[start].starts_with('-')
            && args.get(start + 1).is_some_and(|next| !next.starts_with('-'));
        let end = if takes_value { start + 2 } else { start + 1 };
        let unit = &args[start..end];
        if unit.iter().any(|arg| is_denied_arg(arg)) {
            tracing::debug!(args = ?unit, "dropping denied converter argument");
        } else {
            kept.extend_from_slice(unit);
        }
        start = end;
    }
    kept
}

fn is_denied_arg(arg: &str) -> bool {
    DENIED_ARG_PATTERNS.iter().any(|pattern| arg.contains(pattern))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse_is_case_insensitive() {
        assert_eq!("MP4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
        assert_eq!(".mkv".parse::<OutputFormat>().unwrap(), OutputFormat::Mkv);
        assert_eq!(" mov ".parse::<OutputFormat>().unwrap(), OutputFormat::Mov);
    }

    #[test]
    fn test_output_format_rejects_unknown() {
        let err = "webm".parse::<OutputFormat>().unwrap_err();
        assert!(err.contains("webm"), "message should name the input: {err}");
        assert!("pdf".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_formats_for_content() {
        assert_eq!(
            OutputFormat::for_content(ContentKind::Music),
            vec![OutputFormat::Mp3, OutputFormat::Aac]
        );
        assert!(OutputFormat::for_content(ContentKind::Ebook).is_empty());
        assert!(OutputFormat::for_content(ContentKind::Movie).contains(&OutputFormat::Mp4));
    }

    #[test]
    fn test_quality_aliases() {
        assert_eq!("480p".parse::<VideoQuality>().unwrap(), VideoQuality::Low);
        assert_eq!("4K".parse::<VideoQuality>().unwrap(), VideoQuality::Ultra);
        assert_eq!("source".parse::<VideoQuality>().unwrap(), VideoQuality::Original);
        assert!("best".parse::<VideoQuality>().is_err());
    }

    #[test]
    fn test_quality_presets() {
        let high = VideoQuality::High.preset().unwrap();
        assert_eq!(high.height, 1080);
        assert_eq!(high.video_bitrate, "4000k");
        assert_eq!(high.audio_bitrate, "320k");
        assert_eq!(VideoQuality::Low.preset().unwrap().speed, "faster");
        assert!(VideoQuality::Original.preset().is_none());
    }

    #[test]
    fn test_filter_custom_args_drops_denied_patterns() {
        let filtered = filter_custom_args([
            "-crf",
            "23",
            "-f",
            "rawvideo",
            "-i",
            "concat:a.mp4|b.mp4",
            "-protocol_whitelist",
            "file,http",
            "-tune",
            "film",
        ]);
        assert_eq!(filtered, vec!["-crf", "23", "-tune", "film"]);
    }

    #[test]
    fn test_filter_custom_args_leaves_no_stray_value() {
        assert!(filter_custom_args(["-f", "rawvideo"]).is_empty());
        assert_eq!(
            filter_custom_args(["-an", "-f", "rawvideo", "-movflags", "+faststart"]),
            vec!["-an", "-movflags", "+faststart"]
        );
    }

    #[test]
    fn test_filter_custom_args_empty() {
        assert!(filter_custom_args(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_options_serde_round_trip() {
        let mut options = ConversionOptions::new(OutputFormat::Mkv, VideoQuality::Ultra);
        options.output_directory = Some(PathBuf::from("/srv/out"));
        options.content_kind = Some(ContentKind::Movie);
        let json = serde_json::to_string(&options).unwrap();
        let back: ConversionOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }
}
