//! Search providers that turn free text into a concrete download location.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tokio::process::Command;
use tracing::{debug, info, instrument};
use url::Url;

use super::ResolveError;
use crate::model::ProviderKind;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Candidates shorter than this are usually trailers or clips.
const MIN_PREFERRED_SECS: u64 = 180;

/// Candidates longer than this are usually compilations or live streams.
const MAX_PREFERRED_SECS: u64 = 10_800;

#[allow(clippy::expect_used)]
static MAGNET_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"magnet:\?[^"'\s<>]+"#).expect("magnet regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static VIDEO_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*["']([^"']+\.(?:mp4|mkv|avi|mov|webm|m4v))["']"#)
        .expect("video href regex is valid") // Static pattern, safe to panic
});

/// Finds a download location for a search term.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Short name used in logs and attempt records.
    fn name(&self) -> &str;

    /// Provider kind whose downloader fetches the location found.
    fn kind(&self) -> ProviderKind;

    /// Returns a location for `term`, or `None` when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Search`] if the provider cannot be queried.
    async fn search(&self, term: &str) -> Result<Option<String>, ResolveError>;
}

/// One row of a yt-dlp search listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: String,
    pub id: String,
    pub duration_secs: u64,
}

impl ListingEntry {
    #[must_use]
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

/// Parses `--get-title --get-id --get-duration` output: groups of three
/// lines, trailing partial groups ignored.
#[must_use]
pub fn parse_ytdlp_listing(output: &str) -> Vec<ListingEntry> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .chunks_exact(3)
        .map(|group| ListingEntry {
            title: group[0].to_string(),
            id: group[1].to_string(),
            duration_secs: parse_clock(group[2]),
        })
        .collect()
}

/// The longest entry of plausible feature length, else the first entry.
#[must_use]
pub fn pick_best(entries: &[ListingEntry]) -> Option<&ListingEntry> {
    entries
        .iter()
        .filter(|e| (MIN_PREFERRED_SECS..=MAX_PREFERRED_SECS).contains(&e.duration_secs))
        .max_by_key(|e| e.duration_secs)
        .or_else(|| entries.first())
}

/// `H:MM:SS`, `M:SS` or `S` to seconds; anything else is 0.
fn parse_clock(text: &str) -> u64 {
    text.split(':')
        .try_fold(0u64, |acc, part| {
            let n = part.trim().parse::<u64>().ok()?;
            acc.checked_mul(60)?.checked_add(n)
        })
        .unwrap_or(0)
}

/// Tool arguments for a listing search. The term travels inside a single
/// `ytsearch5:` query after `--`, so it is never parsed as an option.
fn search_args(term: &str) -> Vec<String> {
    [
        "--get-title",
        "--get-id",
        "--get-duration",
        "--no-playlist",
        "--",
    ]
    .into_iter()
    .map(str::to_string)
    .chain(std::iter::once(format!("ytsearch5:{term}")))
    .collect()
}

/// Streaming-platform search through yt-dlp's `ytsearch5`.
#[derive(Debug, Clone)]
pub struct CommandSearch {
    program: PathBuf,
}

impl CommandSearch {
    #[must_use]
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
        }
    }
}

#[async_trait]
impl SearchProvider for CommandSearch {
    fn name(&self) -> &str {
        "streaming-search"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::StreamingVideo
    }

    #[instrument(skip(self))]
    async fn search(&self, term: &str) -> Result<Option<String>, ResolveError> {
        let output = Command::new(&self.program)
            .args(search_args(term))
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(SEARCH_TIMEOUT, output)
            .await
            .map_err(|_| ResolveError::search(self.name(), "timed out"))?
            .map_err(|e| ResolveError::search(self.name(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::search(self.name(), stderr.trim()));
        }
        let entries = parse_ytdlp_listing(&String::from_utf8_lossy(&output.stdout));
        debug!(candidates = entries.len(), "streaming search listing");
        Ok(pick_best(&entries).map(|best| {
            info!(title = %best.title, "streaming search match");
            best.watch_url()
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexFlavor {
    PeerToPeer,
    Direct,
}

/// Public-index search: fetches a results page from a URL template with a
/// `{query}` placeholder and scrapes the first usable link.
#[derive(Debug, Clone)]
pub struct IndexSearch {
    flavor: IndexFlavor,
    template: String,
    client: Client,
}

impl IndexSearch {
    /// Index whose result pages carry magnet links.
    #[must_use]
    pub fn peer_to_peer(template: impl Into<String>, client: Client) -> Self {
        Self {
            flavor: IndexFlavor::PeerToPeer,
            template: template.into(),
            client,
        }
    }

    /// Index whose result pages link video files directly.
    #[must_use]
    pub fn direct(template: impl Into<String>, client: Client) -> Self {
        Self {
            flavor: IndexFlavor::Direct,
            template: template.into(),
            client,
        }
    }

    fn query_url(&self, term: &str) -> String {
        self.template
            .replace("{query}", &urlencoding::encode(term))
    }
}

/// First magnet link on a page.
#[must_use]
pub fn first_magnet(html: &str) -> Option<String> {
    MAGNET_LINK
        .find(html)
        .map(|m| m.as_str().replace("&amp;", "&"))
}

/// First link to a video file on a page, resolved against `page`.
#[must_use]
pub fn first_video_link(html: &str, page: &Url) -> Option<String> {
    VIDEO_HREF.captures_iter(html).find_map(|caps| {
        let href = caps[1].replace("&amp;", "&");
        page.join(&href).ok().map(String::from)
    })
}

#[async_trait]
impl SearchProvider for IndexSearch {
    fn name(&self) -> &str {
        match self.flavor {
            IndexFlavor::PeerToPeer => "peer-to-peer-index",
            IndexFlavor::Direct => "direct-index",
        }
    }

    fn kind(&self) -> ProviderKind {
        match self.flavor {
            IndexFlavor::PeerToPeer => ProviderKind::PeerToPeer,
            IndexFlavor::Direct => ProviderKind::DirectUrl,
        }
    }

    #[instrument(skip(self), fields(index = self.name()))]
    async fn search(&self, term: &str) -> Result<Option<String>, ResolveError> {
        let url = self.query_url(term);
        let page = Url::parse(&url).map_err(|e| ResolveError::search(self.name(), e.to_string()))?;
        let response = self
            .client
            .get(page.as_str())
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ResolveError::search(self.name(), e.to_string()))?;
        if !response.status().is_success() {
            return Err(ResolveError::search(
                self.name(),
                format!("HTTP {}", response.status().as_u16()),
            ));
        }
        let html = response
            .text()
            .await
            .map_err(|e| ResolveError::search(self.name(), e.to_string()))?;

        let found = match self.flavor {
            IndexFlavor::PeerToPeer => first_magnet(&html),
            IndexFlavor::Direct => first_video_link(&html, &page),
        };
        debug!(found = found.is_some(), "index search finished");
        Ok(found)
    }
}
