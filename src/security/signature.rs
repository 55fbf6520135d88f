//! Content-signature sniffing.
//!
//! Identifies a file from its leading bytes rather than its extension.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bytes read from the head of a file for sniffing.
pub const SNIFF_LEN: usize = 512;

const TS_PACKET: usize = 188;

/// Broad content category inferred from a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Video,
    Audio,
    Document,
    Archive,
    /// Download descriptors: NZB and torrent files.
    ContainerFile,
}

impl FileCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Archive => "archive",
            Self::ContainerFile => "container_file",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of sniffing a file head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Recognized media/document/archive format.
    Known {
        category: FileCategory,
        label: &'static str,
    },
    /// Executable or script; never allowed.
    Denied(&'static str),
    Unknown,
}

/// Classifies `head` (the first bytes of a file).
#[must_use]
pub fn sniff(head: &[u8]) -> Signature {
    if let Some(label) = denied_label(head) {
        return Signature::Denied(label);
    }
    known(head).map_or(Signature::Unknown, |(category, label)| Signature::Known {
        category,
        label,
    })
}

fn denied_label(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(b"\x7FELF") {
        return Some("ELF executable");
    }
    if head.starts_with(b"MZ") {
        return Some("PE executable");
    }
    if [
        b"\xFE\xED\xFA\xCE",
        b"\xFE\xED\xFA\xCF",
        b"\xCE\xFA\xED\xFE",
        b"\xCF\xFA\xED\xFE",
        b"\xCA\xFE\xBA\xBE",
    ]
    .iter()
    .any(|magic| head.starts_with(*magic))
    {
        return Some("Mach-O executable");
    }
    if head.starts_with(b"#!") {
        return Some("script");
    }
    if head.starts_with(b"<?php") {
        return Some("PHP script");
    }
    None
}

fn known(head: &[u8]) -> Option<(FileCategory, &'static str)> {
    use FileCategory::{Archive, Audio, ContainerFile, Document, Video};

    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return Some(match &head[8..12] {
            b"M4A " | b"M4B " => (Audio, "m4a"),
            b"qt  " => (Video, "mov"),
            _ => (Video, "mp4"),
        });
    }
    if head.starts_with(b"\x1A\x45\xDF\xA3") {
        return Some((Video, "matroska"));
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") {
        return match &head[8..12] {
            b"AVI " => Some((Video, "avi")),
            b"WAVE" => Some((Audio, "wav")),
            _ => None,
        };
    }
    if head.starts_with(b"FLV") {
        return Some((Video, "flv"));
    }
    if head.starts_with(b"\x00\x00\x01\xBA") || head.starts_with(b"\x00\x00\x01\xB3") {
        return Some((Video, "mpeg"));
    }
    if head.len() > TS_PACKET && head[0] == 0x47 && head[TS_PACKET] == 0x47 {
        return Some((Video, "mpeg-ts"));
    }
    if head.starts_with(b"\x30\x26\xB2\x75\x8E\x66\xCF\x11") {
        return Some((Video, "asf"));
    }
    if head.starts_with(b"OggS") {
        let is_theora = head.windows(6).any(|w| w == b"theora");
        return Some(if is_theora { (Video, "ogv") } else { (Audio, "ogg") });
    }
    if head.starts_with(b"ID3") {
        return Some((Audio, "mp3"));
    }
    if head.starts_with(b"fLaC") {
        return Some((Audio, "flac"));
    }
    if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xF0 == 0xF0 {
        let label = if head[1] & 0x06 == 0 { "aac" } else { "mp3" };
        return Some((Audio, label));
    }
    if head.starts_with(b"%PDF") {
        return Some((Document, "pdf"));
    }
    if head.starts_with(b"PK\x03\x04") {
        if head.len() >= 58 && &head[30..58] == b"mimetypeapplication/epub+zip" {
            return Some((Document, "epub"));
        }
        return Some((Archive, "zip"));
    }
    if head.starts_with(b"Rar!\x1A\x07") {
        return Some((Archive, "rar"));
    }
    if head.starts_with(b"7z\xBC\xAF\x27\x1C") {
        return Some((Archive, "7z"));
    }
    if head.starts_with(b"\x1F\x8B") {
        return Some((Archive, "gzip"));
    }
    if is_torrent(head) {
        return Some((ContainerFile, "torrent"));
    }
    if is_nzb(head) {
        return Some((ContainerFile, "nzb"));
    }
    None
}

fn is_torrent(head: &[u8]) -> bool {
    head.starts_with(b"d8:announce")
        || head.starts_with(b"d13:announce-list")
        || head.starts_with(b"d4:info")
        || head.starts_with(b"d7:comment")
        || head.starts_with(b"d10:created by")
}

fn is_nzb(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with('<') && trimmed.to_ascii_lowercase().contains("<nzb")
}
