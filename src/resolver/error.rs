//! Error types for source resolution.

use thiserror::Error;

use super::Attempt;
use crate::model::ProviderKind;

/// Errors raised while classifying or acquiring a source.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The reference matches no provider.
    #[error(
        "cannot determine how to fetch '{source_text}'\n  Suggestion: Pass an existing media, .nzb or .torrent file, an http(s)/ftp URL, a magnet link, or a search phrase with spaces"
    )]
    NoProvider { source_text: String },

    /// No downloader is registered for a provider kind.
    #[error("no downloader registered for {kind}")]
    MissingBackend { kind: ProviderKind },

    /// A single provider failed; the chain may continue.
    #[error("{provider} failed: {message}")]
    ProviderFailed {
        provider: ProviderKind,
        message: String,
    },

    /// A search provider could not be queried at all.
    #[error("{provider} search failed: {message}")]
    Search { provider: String, message: String },

    /// A download was cancelled on request; the chain stops.
    #[error("{provider} download was cancelled")]
    Cancelled { provider: ProviderKind },

    /// Every provider in the chain was tried without yielding a video file.
    #[error(
        "no provider produced a video file for '{term}' after {} attempt(s)\n  Suggestion: Try a more specific search phrase or a direct URL",
        .attempts.len()
    )]
    Exhausted { term: String, attempts: Vec<Attempt> },
}

impl ResolveError {
    #[must_use]
    pub fn no_provider(source_text: impl Into<String>) -> Self {
        Self::NoProvider {
            source_text: source_text.into(),
        }
    }

    #[must_use]
    pub fn provider_failed(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::ProviderFailed {
            provider,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn search(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Search {
            provider: provider.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Attempts recorded before the error, if any.
    #[must_use]
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Exhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }
}
