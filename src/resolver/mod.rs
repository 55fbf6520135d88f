//! Source resolution: classification and provider fallback.
//!
//! # Overview
//!
//! - [`classify`] - maps a raw reference onto a [`ProviderKind`]
//! - [`SourceResolver`] - acquires the files for a media item, walking the
//!   fallback chain for search terms and container files
//! - [`SearchProvider`] - turns a search term into a download location
//! - [`content`] - content-kind inference and title helpers
//!
//! The fallback chain for search terms is: streaming-video search, then the
//! peer-to-peer index, then the direct-download index. A container file is
//! tried with its own downloader first and, when that yields no video,
//! escalates into the same chain with a term derived from the file. Each
//! failed step is logged and recorded as an [`Attempt`]; only exhaustion of
//! the whole chain is an error.
//!
//! # Example
//!
//! ```
//! use mediaflow_core::model::ProviderKind;
//! use mediaflow_core::resolver::classify;
//!
//! assert_eq!(classify("https://vimeo.com/12345").unwrap(), ProviderKind::StreamingVideo);
//! assert_eq!(classify("magnet:?xt=urn:btih:abc").unwrap(), ProviderKind::PeerToPeer);
//! assert_eq!(classify("Show Name S01E02").unwrap(), ProviderKind::Search);
//! assert!(classify("nonsense").is_err());
//! ```

pub mod content;
mod error;
mod search;

pub use error::ResolveError;
pub use search::{
    CommandSearch, IndexSearch, ListingEntry, SearchProvider, first_magnet, first_video_link,
    parse_ytdlp_listing, pick_best,
};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::backend::{DownloadTarget, DownloaderSet};
use crate::config::EngineConfig;
use crate::model::{Media, ProviderKind};
use crate::security::SecurityGate;

/// Extensions accepted as video output of a download.
pub const VIDEO_EXTENSIONS: [&str; 11] = [
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts",
];

/// Hosts served by the streaming-video extractor (subdomains included).
pub const STREAMING_HOSTS: [&str; 5] = [
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
];

const CONTAINER_EXTENSIONS: [&str; 1] = ["nzb"];
const PEER_TO_PEER_EXTENSIONS: [&str; 2] = ["torrent", "magnet"];
const URL_SCHEMES: [&str; 3] = ["http", "https", "ftp"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// True when `path` has a recognized video extension.
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn is_streaming_host(host: &str) -> bool {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    STREAMING_HOSTS
        .iter()
        .any(|known| host == *known || host.ends_with(&format!(".{known}")))
}

/// Classifies a raw source reference.
///
/// Existing local files are checked first (container, then video, then
/// peer-to-peer descriptor), then URLs, magnet links and finally free text
/// containing whitespace.
///
/// # Errors
///
/// Returns [`ResolveError::NoProvider`] when nothing matches.
pub fn classify(source: &str) -> Result<ProviderKind, ResolveError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::no_provider(source));
    }

    let path = Path::new(trimmed);
    if path.is_file() {
        let ext = extension_of(path).unwrap_or_default();
        if CONTAINER_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(ProviderKind::ContainerFile);
        }
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(ProviderKind::LocalFile);
        }
        if PEER_TO_PEER_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(ProviderKind::PeerToPeer);
        }
    }

    if let Ok(url) = Url::parse(trimmed) {
        if URL_SCHEMES.contains(&url.scheme()) {
            let streaming = url.host_str().is_some_and(is_streaming_host);
            return Ok(if streaming {
                ProviderKind::StreamingVideo
            } else {
                ProviderKind::DirectUrl
            });
        }
    }

    if trimmed.starts_with("magnet:?") {
        return Ok(ProviderKind::PeerToPeer);
    }
    if trimmed.contains(char::is_whitespace) {
        return Ok(ProviderKind::Search);
    }
    Err(ResolveError::no_provider(source))
}

/// One step of a resolution, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub provider: ProviderKind,
    /// Backend or search-provider name.
    pub backend: String,
    pub location: Option<String>,
    /// `None` on success.
    pub error: Option<String>,
}

impl Attempt {
    fn failed(provider: ProviderKind, backend: &str, location: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            provider,
            backend: backend.to_string(),
            location: location.map(ToString::to_string),
            error: Some(error.into()),
        }
    }

    fn succeeded_with(provider: ProviderKind, backend: &str, location: &str) -> Self {
        Self {
            provider,
            backend: backend.to_string(),
            location: Some(location.to_string()),
            error: None,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.provider, self.backend)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        match &self.error {
            Some(error) => write!(f, ": failed: {error}"),
            None => write!(f, ": ok"),
        }
    }
}

/// Files obtained for a media item and how they were obtained.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// Video files, largest first. Never empty.
    pub files: Vec<PathBuf>,
    /// Provider that produced the files.
    pub provider: ProviderKind,
    pub target: DownloadTarget,
    /// Term used when the chain ran.
    pub search_term: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl Acquisition {
    /// The conversion input: the largest video file.
    #[must_use]
    pub fn primary(&self) -> Option<&Path> {
        self.files.first().map(PathBuf::as_path)
    }
}

/// Acquires media through the provider matching its source kind.
#[derive(Clone)]
pub struct SourceResolver {
    gate: SecurityGate,
    downloaders: DownloaderSet,
    search: Vec<Arc<dyn SearchProvider>>,
}

impl fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain: Vec<&str> = self.search.iter().map(|p| p.name()).collect();
        f.debug_struct("SourceResolver")
            .field("downloaders", &self.downloaders)
            .field("search", &chain)
            .finish_non_exhaustive()
    }
}

impl SourceResolver {
    /// Resolver with an explicit search chain, tried in order.
    #[must_use]
    pub fn new(
        gate: SecurityGate,
        downloaders: DownloaderSet,
        search: Vec<Arc<dyn SearchProvider>>,
    ) -> Self {
        Self {
            gate,
            downloaders,
            search,
        }
    }

    /// Resolver with the configured search chain: yt-dlp search, then the
    /// peer-to-peer and direct indexes when their templates are set.
    #[must_use]
    pub fn from_config(
        config: &EngineConfig,
        gate: SecurityGate,
        downloaders: DownloaderSet,
        client: &reqwest::Client,
    ) -> Self {
        let mut search: Vec<Arc<dyn SearchProvider>> =
            vec![Arc::new(CommandSearch::new(&config.tools.yt_dlp))];
        if let Some(template) = &config.search.peer_to_peer_index {
            search.push(Arc::new(IndexSearch::peer_to_peer(template.clone(), client.clone())));
        }
        if let Some(template) = &config.search.direct_index {
            search.push(Arc::new(IndexSearch::direct(template.clone(), client.clone())));
        }
        Self::new(gate, downloaders, search)
    }

    #[must_use]
    pub fn downloaders(&self) -> &DownloaderSet {
        &self.downloaders
    }

    /// Download progress for `media_id` across every downloader.
    #[must_use]
    pub fn progress(&self, media_id: &str) -> u8 {
        self.downloaders.progress(media_id)
    }

    /// Cancels any running download for `media_id`.
    pub fn cancel(&self, media_id: &str) -> bool {
        self.downloaders.cancel(media_id)
    }

    /// Drops per-media download state once a job is finished with it.
    pub fn forget(&self, media_id: &str) {
        self.downloaders.forget(media_id);
    }

    /// Obtains the video files for `media` into `destination`.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::ProviderFailed`] when a single-provider source fails
    /// - [`ResolveError::Cancelled`] when a download is cancelled
    /// - [`ResolveError::MissingBackend`] when no downloader serves the kind
    /// - [`ResolveError::Exhausted`] when the fallback chain yields nothing
    #[instrument(skip(self, media, destination), fields(media_id = %media.id, kind = %media.source_kind))]
    pub async fn acquire(
        &self,
        media: &Media,
        destination: &Path,
    ) -> Result<Acquisition, ResolveError> {
        match media.source_kind {
            ProviderKind::LocalFile => self.local(media),
            ProviderKind::DirectUrl | ProviderKind::StreamingVideo | ProviderKind::PeerToPeer => {
                self.single(media, destination).await
            }
            ProviderKind::ContainerFile => self.container(media, destination).await,
            ProviderKind::Search => {
                let term = media.source.trim().to_string();
                self.run_chain(media, destination, term, Vec::new()).await
            }
        }
    }

    fn local(&self, media: &Media) -> Result<Acquisition, ResolveError> {
        let path = self
            .gate
            .validate_path(Path::new(media.source.trim()), None)
            .map_err(|e| ResolveError::provider_failed(ProviderKind::LocalFile, e.to_string()))?;
        if !is_video_file(&path) {
            return Err(ResolveError::provider_failed(
                ProviderKind::LocalFile,
                format!("{} is not a video file", path.display()),
            ));
        }
        let target = DownloadTarget::new(ProviderKind::LocalFile, path.display().to_string());
        Ok(Acquisition {
            attempts: vec![Attempt::succeeded_with(ProviderKind::LocalFile, "local", &target.location)],
            files: vec![path],
            provider: ProviderKind::LocalFile,
            target,
            search_term: None,
        })
    }

    async fn single(&self, media: &Media, destination: &Path) -> Result<Acquisition, ResolveError> {
        let kind = media.source_kind;
        let location = media.source.trim();
        match self.try_download(media, kind, location, destination).await {
            Ok((files, attempt)) => Ok(Acquisition {
                files,
                provider: kind,
                target: DownloadTarget::new(kind, location),
                search_term: None,
                attempts: vec![attempt],
            }),
            Err(failure) => Err(failure.into_error()),
        }
    }

    async fn container(&self, media: &Media, destination: &Path) -> Result<Acquisition, ResolveError> {
        let location = media.source.trim();
        let mut attempts = Vec::new();
        match self
            .try_download(media, ProviderKind::ContainerFile, location, destination)
            .await
        {
            Ok((files, attempt)) => {
                attempts.push(attempt);
                return Ok(Acquisition {
                    files,
                    provider: ProviderKind::ContainerFile,
                    target: DownloadTarget::new(ProviderKind::ContainerFile, location),
                    search_term: None,
                    attempts,
                });
            }
            Err(failure) => {
                if failure.cancelled {
                    return Err(failure.into_error());
                }
                warn!(attempt = %failure.attempt, "container download failed, escalating to search");
                attempts.push(failure.attempt);
            }
        }

        let term = derive_search_term(Path::new(location)).await;
        info!(term = %term, "derived search term from container");
        self.run_chain(media, destination, term, attempts).await
    }

    async fn run_chain(
        &self,
        media: &Media,
        destination: &Path,
        term: String,
        mut attempts: Vec<Attempt>,
    ) -> Result<Acquisition, ResolveError> {
        for provider in &self.search {
            let kind = provider.kind();
            let location = match provider.search(&term).await {
                Ok(Some(location)) => location,
                Ok(None) => {
                    debug!(provider = provider.name(), "no search match, trying next");
                    attempts.push(Attempt::failed(kind, provider.name(), None, "no match"));
                    continue;
                }
                Err(error) => {
                    warn!(provider = provider.name(), error = %error, "search failed, trying next");
                    attempts.push(Attempt::failed(kind, provider.name(), None, error.to_string()));
                    continue;
                }
            };

            match self.try_download(media, kind, &location, destination).await {
                Ok((files, attempt)) => {
                    attempts.push(attempt);
                    info!(provider = provider.name(), attempts = attempts.len(), "fallback chain succeeded");
                    return Ok(Acquisition {
                        files,
                        provider: kind,
                        target: DownloadTarget::new(kind, location),
                        search_term: Some(term),
                        attempts,
                    });
                }
                Err(failure) => {
                    if failure.cancelled {
                        return Err(failure.into_error());
                    }
                    warn!(attempt = %failure.attempt, "provider failed, trying next");
                    attempts.push(failure.attempt);
                }
            }
        }
        Err(ResolveError::Exhausted { term, attempts })
    }

    /// One gated download. `Ok` carries the video files (largest first).
    async fn try_download(
        &self,
        media: &Media,
        kind: ProviderKind,
        location: &str,
        destination: &Path,
    ) -> Result<(Vec<PathBuf>, Attempt), Failure> {
        let Some(downloader) = self.downloaders.get(kind) else {
            let error = ResolveError::MissingBackend { kind };
            return Err(Failure::new(Attempt::failed(kind, "none", Some(location), error.to_string())));
        };
        let name = downloader.name().to_string();

        if matches!(kind, ProviderKind::DirectUrl | ProviderKind::StreamingVideo) {
            if let Err(rejection) = self.gate.validate_url(location) {
                return Err(Failure::new(Attempt::failed(
                    kind,
                    &name,
                    Some(location),
                    rejection.to_string(),
                )));
            }
        }

        let attempt_dir = self
            .gate
            .create_scoped_directory(destination, kind.as_str())
            .await
            .map_err(|e| Failure::new(Attempt::failed(kind, &name, Some(location), e.to_string())))?;

        let target = DownloadTarget::new(kind, location);
        let files = match downloader.download(media, &target, &attempt_dir).await {
            Ok(files) => files,
            Err(e) => {
                discard_attempt(&attempt_dir).await;
                return Err(Failure {
                    cancelled: e.is_cancelled(),
                    attempt: Attempt::failed(kind, &name, Some(location), e.to_string()),
                });
            }
        };

        let videos = rank_videos(
            files
                .into_iter()
                .filter(|file| file.starts_with(&attempt_dir))
                .collect(),
        )
        .await;
        if videos.is_empty() {
            discard_attempt(&attempt_dir).await;
            return Err(Failure::new(Attempt::failed(
                kind,
                &name,
                Some(location),
                "no video files downloaded",
            )));
        }
        Ok((videos, Attempt::succeeded_with(kind, &name, location)))
    }
}

/// A failed download step.
struct Failure {
    attempt: Attempt,
    cancelled: bool,
}

impl Failure {
    fn new(attempt: Attempt) -> Self {
        Self {
            attempt,
            cancelled: false,
        }
    }

    fn into_error(self) -> ResolveError {
        if self.cancelled {
            ResolveError::Cancelled {
                provider: self.attempt.provider,
            }
        } else {
            ResolveError::provider_failed(self.attempt.provider, self.attempt.error.unwrap_or_default())
        }
    }
}

/// Keeps video files and orders them by size, largest first.
/// Removes the directory of a failed attempt so its leftovers never reach
/// a later provider's result.
async fn discard_attempt(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        debug!(path = %dir.display(), error = %e, "cannot remove failed attempt directory");
    }
}

async fn rank_videos(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut sized = Vec::new();
    for file in files.into_iter().filter(|f| is_video_file(f)) {
        let size = tokio::fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);
        sized.push((size, file));
    }
    sized.sort_by(|a, b| b.0.cmp(&a.0));
    sized.into_iter().map(|(_, file)| file).collect()
}

/// Search term for a container file: its embedded title or subject when
/// present, else a label built from the file name.
pub async fn derive_search_term(container: &Path) -> String {
    let from_contents = tokio::fs::read(container)
        .await
        .ok()
        .and_then(|bytes| content::container_subject(&String::from_utf8_lossy(&bytes)));
    from_contents.unwrap_or_else(|| {
        let name = container
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        content::label_from_filename(&name)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Downloader};
    use crate::model::ContentKind;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Writes the named files into the destination.
    struct Writes(Vec<&'static str>);

    #[async_trait]
    impl Downloader for Writes {
        fn name(&self) -> &str {
            "writes"
        }

        async fn download(
            &self,
            _media: &Media,
            _target: &DownloadTarget,
            destination: &Path,
        ) -> Result<Vec<PathBuf>, BackendError> {
            let mut files = Vec::new();
            for (i, name) in self.0.iter().enumerate() {
                let path = destination.join(name);
                std::fs::write(&path, vec![0u8; (i + 1) * 10]).unwrap();
                files.push(path);
            }
            Ok(files)
        }

        fn progress(&self, _media_id: &str) -> u8 {
            0
        }

        fn cancel(&self, _media_id: &str) -> bool {
            false
        }
    }

    struct Fails;

    #[async_trait]
    impl Downloader for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        async fn download(
            &self,
            _media: &Media,
            _target: &DownloadTarget,
            _destination: &Path,
        ) -> Result<Vec<PathBuf>, BackendError> {
            Err(BackendError::exit_status("fails", Some(1), "boom"))
        }

        fn progress(&self, _media_id: &str) -> u8 {
            0
        }

        fn cancel(&self, _media_id: &str) -> bool {
            false
        }
    }

    /// Leaves a large partial file behind, then fails.
    struct LeavesPartial;

    #[async_trait]
    impl Downloader for LeavesPartial {
        fn name(&self) -> &str {
            "leaves-partial"
        }

        async fn download(
            &self,
            _media: &Media,
            _target: &DownloadTarget,
            destination: &Path,
        ) -> Result<Vec<PathBuf>, BackendError> {
            std::fs::write(destination.join("partial_garbage.mkv"), vec![0u8; 5000]).unwrap();
            Err(BackendError::exit_status("leaves-partial", Some(1), "connection reset"))
        }

        fn progress(&self, _media_id: &str) -> u8 {
            0
        }

        fn cancel(&self, _media_id: &str) -> bool {
            false
        }
    }

    /// Writes one small video and reports everything in the destination.
    struct ReportsDirectory;

    #[async_trait]
    impl Downloader for ReportsDirectory {
        fn name(&self) -> &str {
            "reports-directory"
        }

        async fn download(
            &self,
            _media: &Media,
            _target: &DownloadTarget,
            destination: &Path,
        ) -> Result<Vec<PathBuf>, BackendError> {
            std::fs::write(destination.join("real_episode.mp4"), vec![0u8; 100]).unwrap();
            Ok(std::fs::read_dir(destination)
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .collect())
        }

        fn progress(&self, _media_id: &str) -> u8 {
            0
        }

        fn cancel(&self, _media_id: &str) -> bool {
            false
        }
    }

    struct Finds(ProviderKind, Option<&'static str>);

    #[async_trait]
    impl SearchProvider for Finds {
        fn name(&self) -> &str {
            "finds"
        }

        fn kind(&self) -> ProviderKind {
            self.0
        }

        async fn search(&self, _term: &str) -> Result<Option<String>, ResolveError> {
            Ok(self.1.map(ToString::to_string))
        }
    }

    // ==================== Classification ====================

    #[test]
    fn test_classify_local_files() {
        let temp = TempDir::new().unwrap();
        let video = temp.path().join("clip.MKV");
        let nzb = temp.path().join("show.nzb");
        let torrent = temp.path().join("show.torrent");
        for p in [&video, &nzb, &torrent] {
            std::fs::write(p, b"x").unwrap();
        }
        assert_eq!(classify(video.to_str().unwrap()).unwrap(), ProviderKind::LocalFile);
        assert_eq!(classify(nzb.to_str().unwrap()).unwrap(), ProviderKind::ContainerFile);
        assert_eq!(classify(torrent.to_str().unwrap()).unwrap(), ProviderKind::PeerToPeer);
    }

    #[test]
    fn test_classify_urls() {
        assert_eq!(classify("https://example.com/a.mp4").unwrap(), ProviderKind::DirectUrl);
        assert_eq!(classify("ftp://files.example.com/a").unwrap(), ProviderKind::DirectUrl);
        assert_eq!(
            classify("https://www.youtube.com/watch?v=abc").unwrap(),
            ProviderKind::StreamingVideo
        );
        assert_eq!(classify("https://m.twitch.tv/x").unwrap(), ProviderKind::StreamingVideo);
        assert_eq!(classify("https://notyoutube.com/x").unwrap(), ProviderKind::DirectUrl);
    }

    #[test]
    fn test_classify_search_and_failures() {
        assert_eq!(classify("movie 2021 1080p").unwrap(), ProviderKind::Search);
        assert!(matches!(classify("single"), Err(ResolveError::NoProvider { .. })));
        assert!(classify("   ").is_err());
        assert!(classify("/does/not/exist.mp4").is_err());
    }

    // ==================== Acquisition ====================

    fn media(source: &str, kind: ProviderKind) -> Media {
        Media::new(source, kind, ContentKind::Other)
    }

    #[tokio::test]
    async fn test_fallback_chain_records_failures_before_success() {
        let temp = TempDir::new().unwrap();
        let downloaders = DownloaderSet::new()
            .with(ProviderKind::StreamingVideo, Arc::new(Fails))
            .with(ProviderKind::DirectUrl, Arc::new(Writes(vec!["a.mp4"])));
        let search: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(Finds(ProviderKind::StreamingVideo, Some("https://youtube.com/watch?v=1"))),
            Arc::new(Finds(ProviderKind::PeerToPeer, None)),
            Arc::new(Finds(ProviderKind::DirectUrl, Some("https://files.example.com/a.mp4"))),
        ];
        let resolver = SourceResolver::new(SecurityGate::default(), downloaders, search);

        let got = resolver
            .acquire(&media("some film", ProviderKind::Search), temp.path())
            .await
            .unwrap();

        assert_eq!(got.provider, ProviderKind::DirectUrl);
        assert_eq!(got.attempts.len(), 3);
        assert_eq!(got.attempts.iter().filter(|a| !a.succeeded()).count(), 2);
        assert!(got.attempts[2].succeeded());
        assert_eq!(got.search_term.as_deref(), Some("some film"));
    }

    #[tokio::test]
    async fn test_failed_provider_leftovers_never_selected() {
        let temp = TempDir::new().unwrap();
        let downloaders = DownloaderSet::new()
            .with(ProviderKind::PeerToPeer, Arc::new(LeavesPartial))
            .with(ProviderKind::DirectUrl, Arc::new(ReportsDirectory));
        let search: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(Finds(ProviderKind::PeerToPeer, Some("magnet:?xt=urn:btih:1"))),
            Arc::new(Finds(ProviderKind::DirectUrl, Some("https://files.example.com/ep.mp4"))),
        ];
        let resolver = SourceResolver::new(SecurityGate::default(), downloaders, search);

        let got = resolver
            .acquire(&media("show name s01e02", ProviderKind::Search), temp.path())
            .await
            .unwrap();

        assert_eq!(got.provider, ProviderKind::DirectUrl);
        assert!(got.primary().unwrap().ends_with("real_episode.mp4"));
        assert!(got.files.iter().all(|f| !f.ends_with("partial_garbage.mkv")));

        let remaining: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 1, "failed attempt directory kept: {remaining:?}");
        assert!(remaining[0].starts_with("direct_url_"));
    }

    #[tokio::test]
    async fn test_chain_exhaustion_lists_attempts() {
        let temp = TempDir::new().unwrap();
        let search: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(Finds(ProviderKind::StreamingVideo, None)),
            Arc::new(Finds(ProviderKind::PeerToPeer, None)),
        ];
        let resolver = SourceResolver::new(SecurityGate::default(), DownloaderSet::new(), search);
        let err = resolver
            .acquire(&media("nothing here", ProviderKind::Search), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
        assert_eq!(err.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_non_video_output_escalates() {
        let temp = TempDir::new().unwrap();
        let downloaders = DownloaderSet::new()
            .with(ProviderKind::PeerToPeer, Arc::new(Writes(vec!["readme.txt"])))
            .with(ProviderKind::DirectUrl, Arc::new(Writes(vec!["small.mp4", "big.mkv"])));
        let search: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(Finds(ProviderKind::PeerToPeer, Some("magnet:?xt=urn:btih:1"))),
            Arc::new(Finds(ProviderKind::DirectUrl, Some("https://files.example.com/x"))),
        ];
        let resolver = SourceResolver::new(SecurityGate::default(), downloaders, search);
        let got = resolver
            .acquire(&media("two words", ProviderKind::Search), temp.path())
            .await
            .unwrap();
        assert!(got.primary().unwrap().ends_with("big.mkv"));
        assert_eq!(got.files.len(), 2);
    }

    #[tokio::test]
    async fn test_direct_url_is_gated() {
        let temp = TempDir::new().unwrap();
        let downloaders =
            DownloaderSet::new().with(ProviderKind::DirectUrl, Arc::new(Writes(vec!["a.mp4"])));
        let resolver = SourceResolver::new(SecurityGate::default(), downloaders, Vec::new());
        let err = resolver
            .acquire(&media("http://127.0.0.1/a.mp4", ProviderKind::DirectUrl), temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ProviderFailed { .. }));
    }

    #[tokio::test]
    async fn test_container_failure_escalates_with_subject() {
        let temp = TempDir::new().unwrap();
        let nzb = temp.path().join("release.nzb");
        std::fs::write(
            &nzb,
            r#"<nzb><head><meta type="title">Show Name S01E02</meta></head></nzb>"#,
        )
        .unwrap();
        let downloaders = DownloaderSet::new()
            .with(ProviderKind::ContainerFile, Arc::new(Fails))
            .with(ProviderKind::DirectUrl, Arc::new(Writes(vec!["ep.mp4"])));
        let search: Vec<Arc<dyn SearchProvider>> = vec![Arc::new(Finds(
            ProviderKind::DirectUrl,
            Some("https://files.example.com/ep.mp4"),
        ))];
        let resolver = SourceResolver::new(SecurityGate::default(), downloaders, search);
        let out = temp.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let got = resolver
            .acquire(&media(nzb.to_str().unwrap(), ProviderKind::ContainerFile), &out)
            .await
            .unwrap();
        assert_eq!(got.search_term.as_deref(), Some("Show Name S01E02"));
        assert_eq!(got.attempts.len(), 2);
        assert!(!got.attempts[0].succeeded());
    }

    #[tokio::test]
    async fn test_derive_search_term_from_filename() {
        let temp = TempDir::new().unwrap();
        let nzb = temp.path().join("Some.Movie_2020.nzb");
        std::fs::write(&nzb, b"<nzb></nzb>").unwrap();
        assert_eq!(derive_search_term(&nzb).await, "Some Movie 2020");
    }

    #[test]
    fn test_attempt_display() {
        let failed = Attempt::failed(ProviderKind::PeerToPeer, "aria2c", None, "no match");
        assert_eq!(failed.to_string(), "peer_to_peer via aria2c: failed: no match");
    }
}
