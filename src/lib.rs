//! Mediaflow Core Library
//!
//! A job engine that acquires media from heterogeneous sources, converts it
//! and files it into a content taxonomy. Each submitted job moves through
//! resolve, validate, download, metadata, convert, organize and finalize
//! phases under a scheduler that respects system resources.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Engine configuration, loaded once and passed down
//! - [`db`] - Database connection and schema management
//! - [`model`] - Media, jobs, options and the status state machine
//! - [`store`] - Persistence of media, jobs and job logs
//! - [`security`] - Path, URL and file-identity validation
//! - [`governor`] - Disk and load checks for admission control
//! - [`resolver`] - Source classification and provider fallback
//! - [`backend`] - Downloader, converter, organizer and metadata backends
//! - [`notify`] - Notification and workflow-automation sinks
//! - [`engine`] - Front-end operations, scheduler and pipeline workers

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod governor;
pub mod model;
pub mod notify;
pub mod resolver;
pub mod security;
pub mod store;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use db::{Database, DbError};
pub use engine::{
    CancelOutcome, ClientError, Engine, EngineBuilder, EngineError, ErrorCategory, Scheduler,
    SubmitRequest,
};
pub use governor::ResourceGovernor;
pub use model::{
    ContentKind, ConversionJob, ConversionOptions, JobStatus, Media, OutputFormat, ProviderKind,
    VideoQuality,
};
pub use security::{SecurityGate, SecurityRejection};
pub use store::{Store, StoreError};
