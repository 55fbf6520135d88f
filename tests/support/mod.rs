//! Shared fixtures for engine integration tests: scripted backends, a fixed
//! resource probe and an engine rooted in a temp directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediaflow_core::backend::{
    BackendError, Backends, Converter, DownloadTarget, Downloader, DownloaderSet,
    MetadataExtractor, Organizer, TaxonomyOrganizer,
};
use mediaflow_core::governor::{FixedProbe, ResourceGovernor, SystemLoad, Thresholds};
use mediaflow_core::model::{ConversionOptions, Media, MediaMetadata, ProviderKind};
use mediaflow_core::notify::{Notification, NotificationSink, Notifier, NotifyError};
use mediaflow_core::resolver::{ResolveError, SearchProvider};
use mediaflow_core::{Database, Engine, EngineConfig, Store};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Bytes of a minimal MP4 header, enough for signature sniffing.
pub const MP4_BYTES: &[u8] = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00isomiso2mp41\x00\x00\x00\x08free";

const GIB: u64 = 1024 * 1024 * 1024;

// ==================== Downloaders ====================

/// Writes one MP4 file named `file_name` into the destination.
pub struct WritingDownloader {
    pub name: &'static str,
    pub file_name: &'static str,
    pub calls: AtomicUsize,
    pub forgotten: AtomicUsize,
}

impl WritingDownloader {
    pub fn new(name: &'static str, file_name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            file_name,
            calls: AtomicUsize::new(0),
            forgotten: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Downloader for WritingDownloader {
    fn name(&self) -> &str {
        self.name
    }

    async fn download(
        &self,
        _media: &Media,
        _target: &DownloadTarget,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = destination.join(self.file_name);
        tokio::fs::write(&path, MP4_BYTES)
            .await
            .map_err(|e| BackendError::io(&path, e))?;
        Ok(vec![path])
    }

    fn progress(&self, _media_id: &str) -> u8 {
        0
    }

    fn cancel(&self, _media_id: &str) -> bool {
        false
    }

    fn forget(&self, _media_id: &str) {
        self.forgotten.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writes one MP4 file, then reports the disk as nearly full.
pub struct DiskFillingDownloader {
    pub probe: Arc<FixedProbe>,
}

#[async_trait]
impl Downloader for DiskFillingDownloader {
    fn name(&self) -> &str {
        "disk-filling"
    }

    async fn download(
        &self,
        _media: &Media,
        _target: &DownloadTarget,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, BackendError> {
        let path = destination.join("Huge.Film.2020.mp4");
        tokio::fs::write(&path, MP4_BYTES)
            .await
            .map_err(|e| BackendError::io(&path, e))?;
        self.probe.set_free_bytes(1024);
        Ok(vec![path])
    }

    fn progress(&self, _media_id: &str) -> u8 {
        0
    }

    fn cancel(&self, _media_id: &str) -> bool {
        false
    }
}

/// Always fails with a non-zero exit.
pub struct FailingDownloader {
    pub name: &'static str,
    pub calls: AtomicUsize,
}

impl FailingDownloader {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Downloader for FailingDownloader {
    fn name(&self) -> &str {
        self.name
    }

    async fn download(
        &self,
        _media: &Media,
        _target: &DownloadTarget,
        _destination: &Path,
    ) -> Result<Vec<PathBuf>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::exit_status(self.name, Some(1), "no peers"))
    }

    fn progress(&self, _media_id: &str) -> u8 {
        0
    }

    fn cancel(&self, _media_id: &str) -> bool {
        false
    }
}

// ==================== Search ====================

/// Search provider answering every term with a fixed location.
pub struct StaticSearch {
    pub name: &'static str,
    pub kind: ProviderKind,
    pub location: Option<&'static str>,
}

impl StaticSearch {
    pub fn new(
        name: &'static str,
        kind: ProviderKind,
        location: Option<&'static str>,
    ) -> Arc<dyn SearchProvider> {
        Arc::new(Self {
            name,
            kind,
            location,
        })
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(&self, _term: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.location.map(ToString::to_string))
    }
}

/// Streaming, then peer-to-peer, then direct index, each with a match.
pub fn default_search_chain() -> Vec<Arc<dyn SearchProvider>> {
    vec![
        StaticSearch::new(
            "streaming-search",
            ProviderKind::StreamingVideo,
            Some("https://www.youtube.com/watch?v=abc123"),
        ),
        StaticSearch::new(
            "p2p-index",
            ProviderKind::PeerToPeer,
            Some("magnet:?xt=urn:btih:abcdef"),
        ),
        StaticSearch::new(
            "direct-index",
            ProviderKind::DirectUrl,
            Some("https://cdn.example.com/show.mp4"),
        ),
    ]
}

// ==================== Converter ====================

/// Writes an MP4 header to the output path. With a gate, announces the
/// start and waits to be released; it never honours cancel requests.
#[derive(Default)]
pub struct ScriptedConverter {
    pub calls: AtomicUsize,
    pub started: Arc<Notify>,
    pub release: Option<Arc<Notify>>,
}

impl ScriptedConverter {
    pub fn immediate() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            release: Some(Arc::new(Notify::new())),
            ..Self::default()
        })
    }

    pub fn release(&self) {
        if let Some(release) = &self.release {
            release.notify_one();
        }
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    async fn convert(
        &self,
        _media: &Media,
        _options: &ConversionOptions,
        output: &Path,
    ) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Some(release) = &self.release {
            release.notified().await;
        }
        tokio::fs::write(output, MP4_BYTES)
            .await
            .map_err(|e| BackendError::io(output, e))
    }

    fn progress(&self, _media_id: &str) -> u8 {
        50
    }

    fn cancel(&self, _media_id: &str) -> bool {
        false
    }
}

// ==================== Organizer / extractor ====================

/// The taxonomy organizer with a call counter.
#[derive(Default)]
pub struct CountingOrganizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Organizer for CountingOrganizer {
    fn suggested_path(&self, media: &Media, base: &Path) -> PathBuf {
        TaxonomyOrganizer.suggested_path(media, base)
    }

    async fn organize(
        &self,
        media: &Media,
        converted: &Path,
        base: &Path,
    ) -> Result<PathBuf, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TaxonomyOrganizer.organize(media, converted, base).await
    }
}

/// Reports a fixed resolution and codec.
pub struct StaticExtractor;

#[async_trait]
impl MetadataExtractor for StaticExtractor {
    async fn extract(&self, _path: &Path) -> Result<MediaMetadata, BackendError> {
        Ok(MediaMetadata {
            resolution: Some("1920x1080".to_string()),
            video_codec: Some("h264".to_string()),
            ..MediaMetadata::default()
        })
    }
}

// ==================== Notifications ====================

/// Collects every notification it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.kind.to_string())
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Polls `check` every 20ms for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ==================== Engine ====================

/// Idle host with a 100 GiB disk reporting `free_bytes` free.
pub fn fixed_probe(free_bytes: u64) -> Arc<FixedProbe> {
    Arc::new(FixedProbe::new(100 * GIB, free_bytes, SystemLoad::default()))
}

/// Governor reading `probe`, with the config's thresholds.
pub fn governor_with(config: &EngineConfig, probe: Arc<FixedProbe>) -> ResourceGovernor {
    ResourceGovernor::new(probe, Thresholds::from_config(config), config.download_dir.clone())
}

/// Config with every directory under `root` and short poll intervals.
pub fn test_config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default().rooted_at(root);
    config.poll_interval_secs = 1;
    config.throttle_backoff_secs = 1;
    config
}

/// An engine rooted in a temp directory, with handles on its fakes.
pub struct TestEngine {
    pub engine: Engine,
    pub store: Arc<Store>,
    pub converter: Arc<ScriptedConverter>,
    pub organizer: Arc<CountingOrganizer>,
    pub sink: Arc<RecordingSink>,
    pub probe: Arc<FixedProbe>,
    pub temp: TempDir,
}

/// Builder for [`TestEngine`].
pub struct TestEngineBuilder {
    temp: TempDir,
    config: EngineConfig,
    downloaders: DownloaderSet,
    search: Vec<Arc<dyn SearchProvider>>,
    converter: Arc<ScriptedConverter>,
    notifier: Option<Notifier>,
    probe: Arc<FixedProbe>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = test_config(temp.path());
        config
            .ensure_directories()
            .expect("Failed to create data directories");
        Self {
            temp,
            config,
            downloaders: DownloaderSet::new(),
            search: Vec::new(),
            converter: ScriptedConverter::immediate(),
            notifier: None,
            probe: fixed_probe(50 * GIB),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn downloader(mut self, kind: ProviderKind, downloader: Arc<dyn Downloader>) -> Self {
        self.downloaders = self.downloaders.with(kind, downloader);
        self
    }

    pub fn search(mut self, chain: Vec<Arc<dyn SearchProvider>>) -> Self {
        self.search = chain;
        self
    }

    pub fn converter(mut self, converter: Arc<ScriptedConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Replaces the recording sink with `notifier`.
    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn free_bytes(self, free_bytes: u64) -> Self {
        self.probe.set_free_bytes(free_bytes);
        self
    }

    /// The probe the engine's governor will read.
    pub fn probe(&self) -> Arc<FixedProbe> {
        Arc::clone(&self.probe)
    }

    pub async fn build(self) -> TestEngine {
        let db = Database::new(&self.config.database_path)
            .await
            .expect("Failed to create database");
        let store = Arc::new(Store::new(db));
        let organizer = Arc::new(CountingOrganizer::default());
        let sink = Arc::new(RecordingSink::default());
        let backends = Backends {
            downloaders: self.downloaders,
            converter: self.converter.clone(),
            organizer: organizer.clone(),
            extractor: Arc::new(StaticExtractor),
        };
        let governor = governor_with(&self.config, Arc::clone(&self.probe));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Notifier::new().with_sink(sink.clone()));

        let engine = Engine::builder(self.config, store.clone())
            .governor(governor)
            .backends(backends)
            .search_chain(self.search)
            .notifier(notifier)
            .build()
            .expect("Failed to build engine");

        TestEngine {
            engine,
            store,
            converter: self.converter,
            organizer,
            sink,
            probe: self.probe,
            temp: self.temp,
        }
    }
}

impl Default for TestEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Writes an MP4 file named `name` under `inbox/` and returns its path.
    pub fn local_video(&self, name: &str) -> PathBuf {
        let inbox = self.temp.path().join("inbox");
        std::fs::create_dir_all(&inbox).expect("Failed to create inbox");
        let path = inbox.join(name);
        std::fs::write(&path, MP4_BYTES).expect("Failed to write video");
        path
    }

    /// One admission cycle, then waits for the admitted workers.
    pub async fn run_once(&self) {
        let scheduler = self.engine.scheduler();
        scheduler.tick().await.expect("Admission cycle failed");
        scheduler.wait_idle().await;
    }
}
