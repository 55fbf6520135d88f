//! Rejections raised by the security gate.

use std::path::PathBuf;

use thiserror::Error;

use super::FileCategory;

/// Why the gate refused a path, URL or file. Every rejection is final for
/// the phase that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityRejection {
    #[error("path is empty")]
    EmptyPath,

    #[error("path contains a null byte")]
    NullByte,

    #[error("path contains non-printable characters")]
    NonPrintable,

    #[error("file name '{name}' has a blocked executable or script extension")]
    DeniedExtension { name: String },

    #[error(
        "path {} attempts directory traversal outside of {}",
        .path.display(),
        .root.display()
    )]
    Traversal { path: PathBuf, root: PathBuf },

    #[error("path {} contains a parent-directory component", .0.display())]
    ParentComponent(PathBuf),

    #[error("URL is {length} characters, limit is {limit}")]
    UrlTooLong { length: usize, limit: usize },

    #[error("URL could not be parsed: {0}")]
    MalformedUrl(String),

    #[error("unsupported URL scheme '{0}'\n  Suggestion: Use an http, https or ftp URL")]
    DisallowedScheme(String),

    #[error("URL contains potential command injection characters")]
    ShellMetacharacter,

    #[error("URL host {0} is a private, loopback or link-local address")]
    PrivateHost(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("file {} has a blocked {label} signature", .path.display())]
    DeniedSignature { path: PathBuf, label: &'static str },

    #[error("file {} has an unrecognized content signature", .path.display())]
    UnrecognizedSignature { path: PathBuf },

    #[error("file {} is {category} content, which is not allowed here", .path.display())]
    CategoryNotAllowed { path: PathBuf, category: FileCategory },

    #[error("file {} is {size} bytes, above the {limit} byte limit for {category}", .path.display())]
    FileTooLarge {
        path: PathBuf,
        category: FileCategory,
        size: u64,
        limit: u64,
    },

    #[error("cannot inspect {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("cannot create directory {}: {reason}", .path.display())]
    DirectoryCreation { path: PathBuf, reason: String },
}

impl SecurityRejection {
    #[must_use]
    pub fn unreadable(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: error.to_string(),
        }
    }
}
