//! Downloaders that delegate to an external command-line tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::process::{ToolRunner, collect_files, percent_parser, tool_name};
use super::{BackendError, DownloadTarget, Downloader};
use crate::model::Media;

/// Which argument layout the tool expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolFlavor {
    /// yt-dlp and compatible extractors.
    Streaming,
    /// aria2c for torrents and magnet links.
    PeerToPeer,
    /// A Usenet client fed a container descriptor.
    Usenet,
}

/// Runs yt-dlp, aria2c or a Usenet client and reports every file it left in
/// the destination directory.
#[derive(Debug)]
pub struct CommandDownloader {
    flavor: ToolFlavor,
    program: PathBuf,
    extra_args: Vec<String>,
    timeout: Duration,
    runner: ToolRunner,
}

impl CommandDownloader {
    fn with_flavor(flavor: ToolFlavor, program: &Path, extra_args: Vec<String>, timeout: Duration) -> Self {
        Self {
            flavor,
            program: program.to_path_buf(),
            extra_args,
            timeout,
            runner: ToolRunner::new(),
        }
    }

    /// Streaming-platform extractor (yt-dlp).
    #[must_use]
    pub fn streaming(program: &Path, timeout: Duration) -> Self {
        Self::with_flavor(ToolFlavor::Streaming, program, Vec::new(), timeout)
    }

    /// Torrent and magnet client (aria2c).
    #[must_use]
    pub fn peer_to_peer(program: &Path, timeout: Duration) -> Self {
        Self::with_flavor(ToolFlavor::PeerToPeer, program, Vec::new(), timeout)
    }

    /// Usenet client; `args` come before the destination and container path.
    #[must_use]
    pub fn usenet(program: &Path, args: Vec<String>, timeout: Duration) -> Self {
        Self::with_flavor(ToolFlavor::Usenet, program, args, timeout)
    }

    /// Command-line arguments for fetching `location` into `destination`.
    #[must_use]
    pub fn build_args(&self, location: &str, destination: &Path) -> Vec<String> {
        let dest = destination.display();
        match self.flavor {
            ToolFlavor::Streaming => vec![
                "-o".to_string(),
                format!("{dest}/%(title)s.%(ext)s"),
                "--no-playlist".to_string(),
                "--newline".to_string(),
                "--".to_string(),
                location.to_string(),
            ],
            ToolFlavor::PeerToPeer => vec![
                format!("--dir={dest}"),
                "--seed-time=0".to_string(),
                "--summary-interval=1".to_string(),
                "--".to_string(),
                location.to_string(),
            ],
            ToolFlavor::Usenet => {
                let mut args = self.extra_args.clone();
                args.push(dest.to_string());
                args.push(location.to_string());
                args
            }
        }
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    fn name(&self) -> &str {
        match self.flavor {
            ToolFlavor::Streaming => "yt-dlp",
            ToolFlavor::PeerToPeer => "aria2c",
            ToolFlavor::Usenet => "usenet",
        }
    }

    #[instrument(skip(self, media, destination), fields(media_id = %media.id, target = %target))]
    async fn download(
        &self,
        media: &Media,
        target: &DownloadTarget,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, BackendError> {
        if target.location.trim().is_empty() {
            return Err(BackendError::InvalidInput("empty download target".to_string()));
        }
        let args = self.build_args(&target.location, destination);
        self.runner
            .run(&media.id, &self.program, &args, self.timeout, percent_parser())
            .await?;

        let files = collect_files(destination).await?;
        if files.is_empty() {
            return Err(BackendError::no_output(tool_name(&self.program), destination));
        }
        info!(count = files.len(), "tool download finished");
        Ok(files)
    }

    fn progress(&self, media_id: &str) -> u8 {
        self.runner.progress(media_id)
    }

    fn cancel(&self, media_id: &str) -> bool {
        self.runner.cancel(media_id)
    }

    fn forget(&self, media_id: &str) {
        self.runner.forget(media_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ContentKind, ProviderKind};

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn test_streaming_args() {
        let yt = CommandDownloader::streaming(Path::new("yt-dlp"), TIMEOUT);
        let args = yt.build_args("https://youtube.com/watch?v=x", Path::new("/dl/job"));
        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "/dl/job/%(title)s.%(ext)s");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtube.com/watch?v=x");
        assert_eq!(yt.name(), "yt-dlp");
    }

    #[test]
    fn test_peer_to_peer_args() {
        let aria = CommandDownloader::peer_to_peer(Path::new("aria2c"), TIMEOUT);
        let args = aria.build_args("magnet:?xt=urn:btih:abc", Path::new("/dl/job"));
        assert_eq!(args[0], "--dir=/dl/job");
        assert!(args.contains(&"--seed-time=0".to_string()));
        assert_eq!(args.last().unwrap(), "magnet:?xt=urn:btih:abc");
    }

    #[test]
    fn test_dash_leading_location_stays_positional() {
        for tool in [
            CommandDownloader::streaming(Path::new("yt-dlp"), TIMEOUT),
            CommandDownloader::peer_to_peer(Path::new("aria2c"), TIMEOUT),
        ] {
            let args = tool.build_args("--exec=id", Path::new("/dl/job"));
            assert_eq!(args[args.len() - 2], "--");
            assert_eq!(args.last().unwrap(), "--exec=id");
        }
    }

    #[test]
    fn test_usenet_args_keep_configured_prefix() {
        let client = CommandDownloader::usenet(
            Path::new("nzbget"),
            vec!["--quiet".to_string()],
            TIMEOUT,
        );
        let args = client.build_args("/in/show.nzb", Path::new("/dl/job"));
        assert_eq!(args, vec!["--quiet", "/dl/job", "/in/show.nzb"]);
        assert_eq!(client.name(), "usenet");
    }

    #[tokio::test]
    async fn test_download_rejects_empty_target() {
        let temp = tempfile::TempDir::new().unwrap();
        let yt = CommandDownloader::streaming(Path::new("yt-dlp"), TIMEOUT);
        let media = Media::new("x", ProviderKind::StreamingVideo, ContentKind::Other);
        let target = DownloadTarget::new(ProviderKind::StreamingVideo, "  ");
        let err = yt.download(&media, &target, temp.path()).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_with_no_files_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        // `true` ignores its arguments and exits 0 without writing anything.
        let tool = CommandDownloader::peer_to_peer(Path::new("true"), TIMEOUT);
        let media = Media::new("magnet:?xt=1", ProviderKind::PeerToPeer, ContentKind::Other);
        let target = DownloadTarget::new(ProviderKind::PeerToPeer, "magnet:?xt=1");
        let err = tool.download(&media, &target, temp.path()).await.unwrap_err();
        assert!(matches!(err, BackendError::NoOutput { .. }));
    }
}
