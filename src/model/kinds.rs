//! Source and content classifications.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a media item is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// A file already on this host; nothing to download.
    LocalFile,
    /// Plain HTTP/HTTPS/FTP fetch.
    DirectUrl,
    /// Usenet-style container descriptor (`.nzb`).
    ContainerFile,
    /// Torrent file or magnet link.
    PeerToPeer,
    /// Page on a streaming-video platform handled by an extractor.
    StreamingVideo,
    /// Free text that must be searched for.
    Search,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalFile => "local_file",
            Self::DirectUrl => "direct_url",
            Self::ContainerFile => "container_file",
            Self::PeerToPeer => "peer_to_peer",
            Self::StreamingVideo => "streaming_video",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_file" => Ok(Self::LocalFile),
            "direct_url" => Ok(Self::DirectUrl),
            "container_file" => Ok(Self::ContainerFile),
            "peer_to_peer" => Ok(Self::PeerToPeer),
            "streaming_video" => Ok(Self::StreamingVideo),
            "search" => Ok(Self::Search),
            _ => Err(format!("invalid provider kind: {s}")),
        }
    }
}

/// What the content is, used for taxonomy placement and format choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Movie,
    TvEpisode,
    Music,
    Ebook,
    Other,
}

impl ContentKind {
    pub const ALL: [Self; 5] = [
        Self::Movie,
        Self::TvEpisode,
        Self::Music,
        Self::Ebook,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::TvEpisode => "tv_episode",
            Self::Music => "music",
            Self::Ebook => "ebook",
            Self::Other => "other",
        }
    }

    /// Lenient parse used at the request boundary. Unknown labels are `None`.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "movie" | "film" => Some(Self::Movie),
            "tv" | "tv_episode" | "tvshow" | "tv_show" | "series" | "episode" => {
                Some(Self::TvEpisode)
            }
            "music" | "audio" | "song" | "album" => Some(Self::Music),
            "ebook" | "book" => Some(Self::Ebook),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// True for kinds whose primary stream is video.
    #[must_use]
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Movie | Self::TvEpisode | Self::Other)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("invalid content kind: {s}"))
    }
}
