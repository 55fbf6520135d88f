//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use mediaflow_core::SubmitRequest;

/// Resolve, download, convert and organize media as supervised jobs.
///
/// Jobs are stored in a local SQLite database; `serve` runs the scheduler
/// that works through them.
#[derive(Parser, Debug)]
#[command(name = "mediaflow")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Put downloads, output, temp files and the database under this directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler until interrupted
    Serve,

    /// Submit a local file, URL, magnet link or search phrase
    Submit(SubmitArgs),

    /// Show a job, its media and its log
    Status {
        /// Job ID
        job_id: String,
    },

    /// Cancel a pending or running job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Start a new job for a failed or cancelled one
    Retry {
        /// Job ID
        job_id: String,
    },

    /// List jobs that have not finished
    List,

    /// List all jobs, newest first
    History(PageArgs),

    /// Find media by source or metadata keyword
    Search {
        /// Keyword to match
        keyword: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Show free space on the data directories and current load
    Disk,

    /// Show job and media statistics
    Stats,

    /// Remove finished jobs, orphaned media and stale temp files
    Cleanup {
        /// Retention in days (defaults to the configured value)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,
    },

    /// List output formats for a content kind
    Formats {
        /// movie, tv, music, ebook or other
        #[arg(default_value = "movie")]
        kind: String,
    },
}

#[derive(ClapArgs, Debug, Clone, Copy)]
pub struct PageArgs {
    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Items per page (1-100)
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub size: u32,
}

#[derive(ClapArgs, Debug)]
pub struct SubmitArgs {
    /// Local path, http(s)/ftp URL, magnet link or search phrase
    pub source: String,

    /// Output format (mp4, mkv, avi, mov, mp3, aac)
    #[arg(short = 'f', long)]
    pub format: Option<String>,

    /// Quality preset (low, medium, high, ultra, original)
    #[arg(long)]
    pub quality: Option<String>,

    /// Keep the downloaded original after conversion
    #[arg(long)]
    pub keep_original: bool,

    /// Audio bitrate such as 192k
    #[arg(long)]
    pub audio_bitrate: Option<String>,

    /// Subtitle language code
    #[arg(long)]
    pub subtitle_lang: Option<String>,

    /// Audio language code
    #[arg(long)]
    pub audio_lang: Option<String>,

    /// Output directory instead of the configured complete directory
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Place the output directly in the output directory
    #[arg(long)]
    pub no_organize: bool,

    /// Content kind override (movie, tv, music, ebook, other)
    #[arg(long)]
    pub media_type: Option<String>,

    /// Extra converter argument (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub custom_args: Vec<String>,

    /// Run the job in-process and wait until it finishes
    #[arg(short, long)]
    pub wait: bool,
}

impl SubmitArgs {
    #[must_use]
    pub fn to_request(&self) -> SubmitRequest {
        SubmitRequest {
            output_format: self.format.clone(),
            quality: self.quality.clone(),
            keep_original: Some(self.keep_original),
            audio_bitrate: self.audio_bitrate.clone(),
            subtitle_language: self.subtitle_lang.clone(),
            audio_language: self.audio_lang.clone(),
            custom_args: self.custom_args.clone(),
            output_directory: self.output_dir.clone(),
            organize: Some(!self.no_organize),
            media_type: self.media_type.clone(),
            ..SubmitRequest::new(self.source.clone())
        }
    }
}
