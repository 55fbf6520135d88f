//! Capability contracts for the pipeline's black-box phases.
//!
//! # Overview
//!
//! - [`Downloader`] - fetches a [`DownloadTarget`] into a directory
//! - [`Converter`] - transcodes the downloaded file
//! - [`Organizer`] - places the converted file into the output taxonomy
//! - [`MetadataExtractor`] - reads technical attributes from a file
//!
//! Each contract is an `async_trait` so implementations can be swapped
//! behind `Arc<dyn ...>`. The tool-backed implementations shell out to
//! yt-dlp, aria2c, a Usenet client, ffmpeg and ffprobe; direct URLs are
//! streamed with `reqwest`.
//!
//! # Example
//!
//! ```no_run
//! use mediaflow_core::backend::Backends;
//! use mediaflow_core::EngineConfig;
//!
//! # fn example() -> Result<(), mediaflow_core::backend::BackendError> {
//! let config = EngineConfig::default();
//! let backends = Backends::from_config(&config)?;
//! assert!(backends.downloaders.get(mediaflow_core::model::ProviderKind::DirectUrl).is_some());
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
mod ffmpeg;
mod ffprobe;
mod http;
mod organizer;
mod process;

pub use command::CommandDownloader;
pub use error::BackendError;
pub use ffmpeg::{FfmpegConverter, build_ffmpeg_args};
pub use ffprobe::{FfprobeExtractor, parse_ffprobe_json};
pub use http::{HttpDownloader, build_http_client};
pub use organizer::TaxonomyOrganizer;
pub use process::{ProgressParser, ToolOutput, ToolRunner, collect_files, parse_percent, percent_parser};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::model::{ContentKind, ConversionOptions, Media, MediaMetadata, OutputFormat, ProviderKind};

/// A concrete thing a downloader can fetch: a URL, magnet link or
/// descriptor file path, tagged with the provider that handles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub provider: ProviderKind,
    pub location: String,
}

impl DownloadTarget {
    #[must_use]
    pub fn new(provider: ProviderKind, location: impl Into<String>) -> Self {
        Self {
            provider,
            location: location.into(),
        }
    }
}

impl fmt::Display for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.provider, self.location)
    }
}

/// Fetches content for one provider kind.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Short backend name used in logs and attempt records.
    fn name(&self) -> &str;

    /// Downloads `target` into `destination` and returns the files produced.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the fetch fails, times out or is
    /// cancelled.
    async fn download(
        &self,
        media: &Media,
        target: &DownloadTarget,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, BackendError>;

    /// Progress of the running download for `media_id`, `0..=100`.
    fn progress(&self, media_id: &str) -> u8;

    /// Requests cancellation. Returns whether a download was running.
    fn cancel(&self, media_id: &str) -> bool;

    /// Drops whatever is still tracked for `media_id` after its job ends.
    fn forget(&self, _media_id: &str) {}
}

/// Transcodes a downloaded file.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Converts `media.downloaded_path` into `output` according to `options`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the conversion fails, times out or is
    /// cancelled.
    async fn convert(
        &self,
        media: &Media,
        options: &ConversionOptions,
        output: &Path,
    ) -> Result<(), BackendError>;

    fn progress(&self, media_id: &str) -> u8;

    fn cancel(&self, media_id: &str) -> bool;

    /// Drops whatever is still tracked for `media_id` after its job ends.
    fn forget(&self, _media_id: &str) {}

    /// Output formats this converter can produce for a content kind.
    fn available_formats(&self, kind: ContentKind) -> Vec<OutputFormat> {
        OutputFormat::for_content(kind)
    }
}

/// Maps media onto the output taxonomy.
#[async_trait]
pub trait Organizer: Send + Sync {
    /// Directory the media belongs in under `base`. Pure; touches nothing.
    fn suggested_path(&self, media: &Media, base: &Path) -> PathBuf;

    /// Moves `converted` into its taxonomy directory and returns the final
    /// file path.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Io`] when the directory or move fails.
    async fn organize(
        &self,
        media: &Media,
        converted: &Path,
        base: &Path,
    ) -> Result<PathBuf, BackendError>;
}

/// Reads technical metadata from a media file.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// # Errors
    ///
    /// Returns [`BackendError`] when the file cannot be probed.
    async fn extract(&self, path: &Path) -> Result<MediaMetadata, BackendError>;
}

/// Downloaders keyed by the provider kind they serve.
#[derive(Clone, Default)]
pub struct DownloaderSet {
    by_kind: HashMap<ProviderKind, Arc<dyn Downloader>>,
}

impl fmt::Debug for DownloaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_kind.iter().map(|(kind, d)| (kind, d.name())))
            .finish()
    }
}

impl DownloaderSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `downloader` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, kind: ProviderKind, downloader: Arc<dyn Downloader>) -> Self {
        self.by_kind.insert(kind, downloader);
        self
    }

    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn Downloader>> {
        self.by_kind.get(&kind)
    }

    /// Highest progress any downloader reports for `media_id`.
    #[must_use]
    pub fn progress(&self, media_id: &str) -> u8 {
        self.by_kind
            .values()
            .map(|d| d.progress(media_id))
            .max()
            .unwrap_or(0)
    }

    /// Forwards a cancel to every downloader; true if any was running it.
    pub fn cancel(&self, media_id: &str) -> bool {
        self.by_kind
            .values()
            .fold(false, |hit, d| d.cancel(media_id) || hit)
    }

    pub fn forget(&self, media_id: &str) {
        for downloader in self.by_kind.values() {
            downloader.forget(media_id);
        }
    }
}

/// The full set of backends the pipeline drives.
#[derive(Clone)]
pub struct Backends {
    pub downloaders: DownloaderSet,
    pub converter: Arc<dyn Converter>,
    pub organizer: Arc<dyn Organizer>,
    pub extractor: Arc<dyn MetadataExtractor>,
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("downloaders", &self.downloaders)
            .finish_non_exhaustive()
    }
}

impl Backends {
    /// Tool-backed backends configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self, BackendError> {
        let tools = &config.tools;
        let download_timeout = Duration::from_secs(config.download_timeout_secs);
        let client = build_http_client().map_err(|e| BackendError::http("client", e.to_string()))?;

        let downloaders = DownloaderSet::new()
            .with(
                ProviderKind::DirectUrl,
                Arc::new(HttpDownloader::new(client, download_timeout)),
            )
            .with(
                ProviderKind::StreamingVideo,
                Arc::new(CommandDownloader::streaming(&tools.yt_dlp, download_timeout)),
            )
            .with(
                ProviderKind::PeerToPeer,
                Arc::new(CommandDownloader::peer_to_peer(&tools.aria2c, download_timeout)),
            )
            .with(
                ProviderKind::ContainerFile,
                Arc::new(CommandDownloader::usenet(
                    &tools.usenet_client,
                    tools.usenet_args.clone(),
                    download_timeout,
                )),
            );

        Ok(Self {
            downloaders,
            converter: Arc::new(FfmpegConverter::new(
                &tools.ffmpeg,
                Duration::from_secs(config.conversion_timeout_secs),
            )),
            organizer: Arc::new(TaxonomyOrganizer::new()),
            extractor: Arc::new(FfprobeExtractor::new(&tools.ffprobe)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixed {
        progress: u8,
        running: AtomicBool,
    }

    #[async_trait]
    impl Downloader for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn download(
            &self,
            _media: &Media,
            _target: &DownloadTarget,
            _destination: &Path,
        ) -> Result<Vec<PathBuf>, BackendError> {
            Ok(Vec::new())
        }

        fn progress(&self, _media_id: &str) -> u8 {
            self.progress
        }

        fn cancel(&self, _media_id: &str) -> bool {
            self.running.swap(false, Ordering::SeqCst)
        }
    }

    fn fixed(progress: u8, running: bool) -> Arc<dyn Downloader> {
        Arc::new(Fixed {
            progress,
            running: AtomicBool::new(running),
        })
    }

    #[test]
    fn test_downloader_set_progress_is_max() {
        let set = DownloaderSet::new()
            .with(ProviderKind::DirectUrl, fixed(10, false))
            .with(ProviderKind::PeerToPeer, fixed(60, false));
        assert_eq!(set.progress("m"), 60);
        assert_eq!(DownloaderSet::new().progress("m"), 0);
    }

    #[test]
    fn test_downloader_set_cancel_reaches_every_backend() {
        let set = DownloaderSet::new()
            .with(ProviderKind::DirectUrl, fixed(0, false))
            .with(ProviderKind::PeerToPeer, fixed(0, true));
        assert!(set.cancel("m"));
        assert!(!set.cancel("m"));
    }

    #[test]
    fn test_backends_from_config_registers_every_provider() {
        let backends = Backends::from_config(&EngineConfig::default()).unwrap();
        for kind in [
            ProviderKind::DirectUrl,
            ProviderKind::StreamingVideo,
            ProviderKind::PeerToPeer,
            ProviderKind::ContainerFile,
        ] {
            assert!(backends.downloaders.get(kind).is_some(), "{kind}");
        }
        assert!(backends.downloaders.get(ProviderKind::LocalFile).is_none());
        assert_eq!(
            backends.converter.available_formats(ContentKind::Music),
            vec![OutputFormat::Mp3, OutputFormat::Aac]
        );
    }

    #[test]
    fn test_download_target_display() {
        let target = DownloadTarget::new(ProviderKind::PeerToPeer, "magnet:?xt=urn:btih:abc");
        assert_eq!(target.to_string(), "peer_to_peer magnet:?xt=urn:btih:abc");
    }
}
