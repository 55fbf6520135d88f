//! Domain model: media items, conversion jobs, options and the shared
//! status state machine.
//!
//! # Overview
//!
//! - [`Media`] - the content item being acquired and transformed
//! - [`ConversionJob`] - one pipeline attempt for a media item
//! - [`ConversionOptions`] - immutable per-job conversion settings
//! - [`JobStatus`] - lifecycle states and the transition table
//!
//! Both [`Media`] and [`ConversionJob`] keep their status private and only
//! change it through `transition`, so an illegal move cannot be persisted.

mod job;
mod kinds;
mod media;
mod options;
mod status;

pub use job::ConversionJob;
pub use kinds::{ContentKind, ProviderKind};
pub use media::{Media, MediaMetadata, clamp_progress};
pub use options::{
    ConversionOptions, OutputFormat, QualityPreset, VideoQuality, filter_custom_args,
};
pub use status::{InvalidTransition, JobStatus};
