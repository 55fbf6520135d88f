//! Taxonomy organizer: `movies/`, `tv/`, `music/` and `other/` trees.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{BackendError, Organizer};
use crate::model::{ContentKind, Media};
use crate::resolver::content::{clean_stem, extract_season, extract_show_name, split_artist_album};
use crate::security::SecurityGate;

/// Places converted files by content kind:
///
/// - movies: `movies/{Title}_{Year}`
/// - TV: `tv/{Show}/Season_{N}`
/// - music: `music/{Artist}/{Album}`
/// - everything else: `other/{Title}`
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxonomyOrganizer;

impl TaxonomyOrganizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn label(media: &Media) -> String {
    media
        .metadata
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| media.display_name())
}

fn movie_dir(media: &Media, label: &str, base: &Path) -> PathBuf {
    let stem = clean_stem(label);
    let name = match media.metadata.year {
        Some(year) => format!("{stem}_{year}"),
        None => stem,
    };
    base.join("movies").join(name)
}

fn tv_dir(media: &Media, label: &str, base: &Path) -> PathBuf {
    let root = base.join("tv");
    let season = media.metadata.season.or_else(|| extract_season(label));
    match (extract_show_name(label), season) {
        (Some(show), Some(season)) => root.join(show).join(format!("Season_{season}")),
        (Some(show), None) => root.join(show),
        _ => root.join(clean_stem(label)),
    }
}

fn music_dir(media: &Media, label: &str, base: &Path) -> PathBuf {
    let root = base.join("music");
    let pair = match (&media.metadata.artist, &media.metadata.album) {
        (Some(artist), Some(album)) => Some((artist.clone(), album.clone())),
        _ => split_artist_album(label),
    };
    match pair {
        Some((artist, album)) => root.join(clean_stem(&artist)).join(clean_stem(&album)),
        None => root.join(clean_stem(label)),
    }
}

/// Moves a file, copying across filesystems when rename is refused.
async fn move_file(from: &Path, to: &Path) -> Result<(), BackendError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    debug!(from = %from.display(), to = %to.display(), "rename failed, copying");
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| BackendError::io(to, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| BackendError::io(from, e))
}

#[async_trait]
impl Organizer for TaxonomyOrganizer {
    fn suggested_path(&self, media: &Media, base: &Path) -> PathBuf {
        let label = label(media);
        match media.content_kind {
            ContentKind::Movie => movie_dir(media, &label, base),
            ContentKind::TvEpisode => tv_dir(media, &label, base),
            ContentKind::Music => music_dir(media, &label, base),
            ContentKind::Ebook | ContentKind::Other => base.join("other").join(clean_stem(&label)),
        }
    }

    #[instrument(skip(self, media), fields(media_id = %media.id, kind = %media.content_kind))]
    async fn organize(
        &self,
        media: &Media,
        converted: &Path,
        base: &Path,
    ) -> Result<PathBuf, BackendError> {
        let dir = self.suggested_path(media, base);
        let mut file_name = clean_stem(&label(media));
        if let Some(ext) = converted.extension().and_then(|e| e.to_str()) {
            file_name.push('.');
            file_name.push_str(ext);
        }
        let destination = SecurityGate::default().validate_path(&dir.join(file_name), Some(base))?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BackendError::io(&dir, e))?;
        move_file(converted, &destination).await?;
        info!(path = %destination.display(), "organized");
        Ok(destination)
    }
}
