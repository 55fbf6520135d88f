//! Security gate guarding every filesystem and network boundary crossing.
//!
//! Every path the pipeline writes to, every URL it fetches and every file it
//! hands to a converter passes through [`SecurityGate`] first. Rejections are
//! reported as [`SecurityRejection`] and are never retried.
//!
//! # Example
//!
//! ```no_run
//! use mediaflow_core::security::{FileCategory, SecurityGate};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), mediaflow_core::security::SecurityRejection> {
//! let gate = SecurityGate::default();
//! gate.validate_url("https://example.com/video.mp4")?;
//! gate.validate_path(Path::new("/srv/media/in/video.mp4"), Some(Path::new("/srv/media")))?;
//! let dir = gate.create_scoped_directory(Path::new("/srv/media/in"), "My Movie").await?;
//! gate.validate_file_identity(&dir.join("video.mp4"), &[FileCategory::Video])?;
//! # Ok(())
//! # }
//! ```

mod error;
mod signature;

pub use error::SecurityRejection;
pub use signature::{FileCategory, SNIFF_LEN, Signature, sniff};

use std::io::Read;
use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, instrument, warn};
use url::{Host, Url};

/// Longest accepted URL.
pub const MAX_URL_LENGTH: usize = 2048;

/// Longest sanitized file name, in characters.
pub const MAX_FILENAME_CHARS: usize = 200;

/// Longest extension (without the dot) preserved during truncation.
const MAX_EXTENSION_CHARS: usize = 16;

/// Length of the random suffix on scoped directories.
const SCOPE_SUFFIX_LEN: usize = 8;

/// Executable and server-side script extensions that may never be written.
const DENIED_EXTENSIONS: [&str; 16] = [
    "exe", "bat", "cmd", "sh", "php", "phtml", "js", "cgi", "asp", "aspx", "jsp", "ps1", "vbs",
    "scr", "msi", "jar",
];

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "ftp"];

const SHELL_METACHARACTERS: [&str; 4] = [";", "&&", "|", "`"];

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Per-category maximum file sizes, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub video: u64,
    pub audio: u64,
    pub document: u64,
    pub archive: u64,
    pub container_file: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            video: 20 * GIB,
            audio: 2 * GIB,
            document: 500 * MIB,
            archive: 100 * MIB,
            container_file: 10 * MIB,
        }
    }
}

impl SizeLimits {
    #[must_use]
    pub fn for_category(&self, category: FileCategory) -> u64 {
        match category {
            FileCategory::Video => self.video,
            FileCategory::Audio => self.audio,
            FileCategory::Document => self.document,
            FileCategory::Archive => self.archive,
            FileCategory::ContainerFile => self.container_file,
        }
    }
}

/// Validation and sanitization for paths, URLs and files.
#[derive(Debug, Clone, Default)]
pub struct SecurityGate {
    limits: SizeLimits,
}

impl SecurityGate {
    #[must_use]
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &SizeLimits {
        &self.limits
    }

    /// Validates a path and returns its normalized absolute form.
    ///
    /// Rejects null bytes, control characters, deny-listed extensions and
    /// any `..` component. With `within`, the normalized path must be a
    /// strict descendant of the normalized root (component-wise, so
    /// `/data2` is not inside `/data`).
    ///
    /// # Errors
    ///
    /// Returns the first [`SecurityRejection`] that applies.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn validate_path(
        &self,
        path: &Path,
        within: Option<&Path>,
    ) -> Result<PathBuf, SecurityRejection> {
        let text = path.to_string_lossy();
        if text.is_empty() {
            return Err(SecurityRejection::EmptyPath);
        }
        if text.contains('\0') {
            return Err(SecurityRejection::NullByte);
        }
        if text.chars().any(char::is_control) {
            return Err(SecurityRejection::NonPrintable);
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if has_denied_extension(name) {
                return Err(SecurityRejection::DeniedExtension {
                    name: name.to_string(),
                });
            }
        }

        let normalized = normalize(path)?;
        if let Some(root) = within {
            let root = normalize(root)?;
            if normalized == root || !normalized.starts_with(&root) {
                debug!(root = %root.display(), "path escapes containment root");
                return Err(SecurityRejection::Traversal {
                    path: normalized,
                    root,
                });
            }
        }
        Ok(normalized)
    }

    /// Validates a URL for fetching.
    ///
    /// # Errors
    ///
    /// Returns a [`SecurityRejection`] for over-long URLs, shell
    /// metacharacters, schemes other than http/https/ftp, missing hosts and
    /// private/loopback/link-local IP literals.
    #[instrument(level = "debug", skip(self))]
    pub fn validate_url(&self, raw: &str) -> Result<Url, SecurityRejection> {
        if raw.len() > MAX_URL_LENGTH {
            return Err(SecurityRejection::UrlTooLong {
                length: raw.len(),
                limit: MAX_URL_LENGTH,
            });
        }
        if SHELL_METACHARACTERS.iter().any(|m| raw.contains(m)) {
            return Err(SecurityRejection::ShellMetacharacter);
        }
        let url = Url::parse(raw).map_err(|e| SecurityRejection::MalformedUrl(e.to_string()))?;
        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(SecurityRejection::DisallowedScheme(url.scheme().to_string()));
        }
        match url.host() {
            None => return Err(SecurityRejection::MissingHost),
            Some(Host::Ipv4(ip)) if is_internal(IpAddr::V4(ip)) => {
                return Err(SecurityRejection::PrivateHost(ip.to_string()));
            }
            Some(Host::Ipv6(ip)) if is_internal(IpAddr::V6(ip)) => {
                return Err(SecurityRejection::PrivateHost(ip.to_string()));
            }
            Some(_) => {}
        }
        Ok(url)
    }

    /// Sniffs a file's content signature and checks it against `allowed`
    /// and the per-category size limit. Returns the detected category.
    ///
    /// # Errors
    ///
    /// Returns a [`SecurityRejection`] for unreadable files, blocked or
    /// unrecognized signatures, disallowed categories and oversized files.
    #[instrument(level = "debug", skip(self, path, allowed), fields(path = %path.display()))]
    pub fn validate_file_identity(
        &self,
        path: &Path,
        allowed: &[FileCategory],
    ) -> Result<FileCategory, SecurityRejection> {
        let mut file =
            std::fs::File::open(path).map_err(|e| SecurityRejection::unreadable(path, &e))?;
        let size = file
            .metadata()
            .map_err(|e| SecurityRejection::unreadable(path, &e))?
            .len();
        let mut head = Vec::with_capacity(SNIFF_LEN);
        file.by_ref()
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| SecurityRejection::unreadable(path, &e))?;

        let category = match sniff(&head) {
            Signature::Denied(label) => {
                warn!(path = %path.display(), label, "blocked file signature");
                return Err(SecurityRejection::DeniedSignature {
                    path: path.to_path_buf(),
                    label,
                });
            }
            Signature::Unknown => {
                return Err(SecurityRejection::UnrecognizedSignature {
                    path: path.to_path_buf(),
                });
            }
            Signature::Known { category, .. } => category,
        };

        if !allowed.contains(&category) {
            return Err(SecurityRejection::CategoryNotAllowed {
                path: path.to_path_buf(),
                category,
            });
        }
        let limit = self.limits.for_category(category);
        if size > limit {
            return Err(SecurityRejection::FileTooLarge {
                path: path.to_path_buf(),
                category,
                size,
                limit,
            });
        }
        Ok(category)
    }

    /// Creates `{base}/{sanitized name}_{random suffix}` with mode 0750 and
    /// returns it. The result is re-validated to sit inside `base`.
    ///
    /// # Errors
    ///
    /// Returns a [`SecurityRejection`] if the path fails validation or the
    /// directory cannot be created.
    #[instrument(skip(self, base), fields(base = %base.display()))]
    pub async fn create_scoped_directory(
        &self,
        base: &Path,
        name: &str,
    ) -> Result<PathBuf, SecurityRejection> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SCOPE_SUFFIX_LEN)
            .map(char::from)
            .collect();
        let dir_name = format!("{}_{suffix}", sanitize_filename(name));
        let candidate = base.join(dir_name);
        let validated = self.validate_path(&candidate, Some(base))?;

        let creation_error = |error: std::io::Error| SecurityRejection::DirectoryCreation {
            path: validated.clone(),
            reason: error.to_string(),
        };
        tokio::fs::create_dir_all(&validated)
            .await
            .map_err(creation_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&validated, std::fs::Permissions::from_mode(0o750))
                .await
                .map_err(creation_error)?;
        }
        debug!(path = %validated.display(), "created scoped directory");
        Ok(validated)
    }
}

/// Makes a name safe to use as a single path segment.
///
/// Removes path separators, reserved characters and control characters,
/// strips leading dots and whitespace, and truncates to
/// [`MAX_FILENAME_CHARS`] while keeping a short extension. Returns
/// `"unnamed"` when nothing survives. Applying it twice gives the same
/// result as applying it once.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let trimmed = cleaned
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    if trimmed.chars().count() <= MAX_FILENAME_CHARS {
        return trimmed.to_string();
    }

    let truncated = match split_extension(trimmed) {
        Some((stem, ext)) => {
            let keep = MAX_FILENAME_CHARS - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        None => trimmed.chars().take(MAX_FILENAME_CHARS).collect(),
    };
    let truncated = truncated.trim_end();
    if truncated.is_empty() {
        "unnamed".to_string()
    } else {
        truncated.to_string()
    }
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    let dot = name.rfind('.')?;
    let (stem, ext) = (&name[..dot], &name[dot + 1..]);
    let ext_len = ext.chars().count();
    if stem.is_empty() || ext_len == 0 || ext_len > MAX_EXTENSION_CHARS {
        return None;
    }
    Some((stem, ext))
}

fn has_denied_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DENIED_EXTENSIONS
                .iter()
                .any(|denied| ext.eq_ignore_ascii_case(denied))
        })
}

/// Absolute, lexically normalized form of `path`. `.` components are
/// dropped; `..` is always rejected.
fn normalize(path: &Path) -> Result<PathBuf, SecurityRejection> {
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(SecurityRejection::ParentComponent(path.to_path_buf()));
    }
    let absolute = std::path::absolute(path).map_err(|e| SecurityRejection::unreadable(path, &e))?;
    Ok(absolute
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect())
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
