//! Content-kind inference and title helpers shared by the resolver and the
//! organizer.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Regex, RegexSet};

use crate::model::{ContentKind, MediaMetadata};

/// Longest cleaned title used as a file or folder stem.
pub const MAX_STEM_CHARS: usize = 70;

#[allow(clippy::expect_used)]
static TV_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\bS\d{1,2}E\d{1,3}\b",
        r"\b\d{1,2}x\d{1,2}\b",
        r"(?i)\bseason \d{1,2}",
        r"(?i)\bepisode \d{1,3}",
        r"(?i)\bcomplete (?:series|season)\b",
    ])
    .expect("TV patterns are valid") // Static patterns, safe to panic
});

#[allow(clippy::expect_used)]
static MOVIE_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"\b\d{4}\b",
        r"(?i)\b(?:720p|1080p|2160p|4k)\b",
        r"(?i)\b(?:brrip|bluray|webdl|dvdrip)\b",
        r"(?i)directors.cut",
        r"(?i)extended.edition",
    ])
    .expect("movie patterns are valid") // Static patterns, safe to panic
});

#[allow(clippy::expect_used)]
static MUSIC_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\b(?:mp3|flac|wav|aac|alac|aiff)\b",
        r"(?i)\b(?:album|discography|ost|soundtrack)\b",
        r"(?i)\bVA -",
        r"(?i)\b\d{3,4}kbps\b",
        r"(?i)\bcdda\b",
    ])
    .expect("music patterns are valid") // Static patterns, safe to panic
});

#[allow(clippy::expect_used)]
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("non-word regex is valid"));

#[allow(clippy::expect_used)]
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\s]+").expect("separator regex is valid"));

#[allow(clippy::expect_used)]
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("year regex is valid"));

#[allow(clippy::expect_used)]
static SEASON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})(?:E\d{1,3})?\b|\bSeason\s+(\d{1,2})\b|\b(\d{1,2})x\d{1,2}\b")
        .expect("season regex is valid")
});

#[allow(clippy::expect_used)]
static EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bS\d{1,2}E(\d{1,3})\b|\bEpisode\s+(\d{1,3})\b|\b\d{1,2}x(\d{1,2})\b")
        .expect("episode regex is valid")
});

#[allow(clippy::expect_used)]
static NZB_META_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+type\s*=\s*"(?:title|name)"\s*>\s*([^<]+?)\s*</meta>"#)
        .expect("nzb meta regex is valid")
});

#[allow(clippy::expect_used)]
static NZB_SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bsubject\s*=\s*"([^"]+)""#).expect("subject regex is valid"));

/// Infers the content kind from a search term and a file name.
///
/// The file name is read as a label (dots and underscores become spaces).
/// TV markers win over movie markers, which win over music markers. No
/// match gives [`ContentKind::Other`].
#[must_use]
pub fn infer_content_kind(term: &str, filename: &str) -> ContentKind {
    let combined = format!("{term} {}", label_from_filename(filename));
    if TV_PATTERNS.is_match(&combined) {
        ContentKind::TvEpisode
    } else if MOVIE_PATTERNS.is_match(&combined) {
        ContentKind::Movie
    } else if MUSIC_PATTERNS.is_match(&combined) {
        ContentKind::Music
    } else {
        ContentKind::Other
    }
}

/// Strips non-word characters and joins words with underscores.
///
/// `"Show Name: Part-2"` becomes `"Show_Name_Part_2"`.
#[must_use]
pub fn clean_title(text: &str) -> String {
    let stripped = NON_WORD.replace_all(text, "");
    SEPARATORS.replace_all(stripped.trim(), "_").into_owned()
}

/// [`clean_title`] capped at [`MAX_STEM_CHARS`], never empty.
#[must_use]
pub fn clean_stem(text: &str) -> String {
    let cleaned: String = clean_title(text).chars().take(MAX_STEM_CHARS).collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Human-readable label from a file name: the stem with dots and
/// underscores turned into spaces.
#[must_use]
pub fn label_from_filename(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map_or_else(|| name.to_string(), |s| s.to_string_lossy().into_owned());
    stem.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First plausible release year in `text`.
#[must_use]
pub fn extract_year(text: &str) -> Option<u16> {
    YEAR.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Season number from an `S01`, `Season 1` or `1x02` marker.
#[must_use]
pub fn extract_season(text: &str) -> Option<u32> {
    first_group(&SEASON, text)
}

/// Episode number from an `S01E02`, `Episode 2` or `1x02` marker.
#[must_use]
pub fn extract_episode(text: &str) -> Option<u32> {
    first_group(&EPISODE, text)
}

/// Show name: the cleaned text before the season marker.
#[must_use]
pub fn extract_show_name(text: &str) -> Option<String> {
    let start = SEASON.find(text)?.start();
    let name = clean_title(&text[..start]);
    let name = name.trim_matches('_');
    (!name.is_empty()).then(|| name.to_string())
}

/// `(artist, album)` from an `Artist - Album` label.
#[must_use]
pub fn split_artist_album(text: &str) -> Option<(String, String)> {
    let (artist, album) = text.split_once(" - ")?;
    let artist = artist.trim();
    let album = album.trim();
    if artist.is_empty() || album.is_empty() {
        return None;
    }
    Some((artist.to_string(), album.to_string()))
}

/// Metadata derivable from a label alone.
#[must_use]
pub fn label_metadata(label: &str, kind: ContentKind) -> MediaMetadata {
    let mut metadata = MediaMetadata {
        title: (!label.is_empty()).then(|| label.to_string()),
        year: extract_year(label),
        ..MediaMetadata::default()
    };
    match kind {
        ContentKind::TvEpisode => {
            metadata.season = extract_season(label);
            metadata.episode = extract_episode(label);
        }
        ContentKind::Music => {
            if let Some((artist, album)) = split_artist_album(label) {
                metadata.artist = Some(artist);
                metadata.album = Some(album);
            }
        }
        _ => {}
    }
    metadata
}

/// Title carried inside a container descriptor: a `title`/`name` meta
/// entry, else the quoted file name or text of the first segment subject.
#[must_use]
pub fn container_subject(xml: &str) -> Option<String> {
    if let Some(caps) = NZB_META_TITLE.captures(xml) {
        let title = unescape_xml(&caps[1]);
        if !title.trim().is_empty() {
            return Some(title.trim().to_string());
        }
    }

    let subject = unescape_xml(&NZB_SUBJECT.captures(xml)?[1]);
    let quoted = subject
        .split('"')
        .nth(1)
        .filter(|name| !name.trim().is_empty());
    let label = match quoted {
        Some(name) => label_from_filename(name),
        None => subject.trim().to_string(),
    };
    (!label.is_empty()).then_some(label)
}

fn first_group(pattern: &Regex, text: &str) -> Option<u32> {
    let caps = pattern.captures(text)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .and_then(|m| m.as_str().parse().ok())
}

fn unescape_xml(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
