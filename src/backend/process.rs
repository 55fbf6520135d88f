//! Child-process supervision shared by the tool-backed backends.
//!
//! [`ToolRunner`] spawns a tool, parses progress from its output, and keeps
//! per-media progress and cancel handles so `progress(media_id)` and
//! `cancel(media_id)` work while the tool runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use super::BackendError;

/// Output lines kept for error messages.
const TAIL_LINES: usize = 20;

#[allow(clippy::expect_used)]
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)%").expect("percent regex is valid"));

/// Turns one output line into a progress reading.
pub type ProgressParser = Arc<dyn Fn(&str) -> Option<u8> + Send + Sync>;

/// Progress parser for tools that print `NN.N%` (yt-dlp, aria2c, most
/// Usenet clients). The last percentage on a line wins.
#[must_use]
pub fn percent_parser() -> ProgressParser {
    Arc::new(parse_percent)
}

/// Last `NN%` reading on a line, clamped to 100.
#[must_use]
pub fn parse_percent(line: &str) -> Option<u8> {
    let value: f64 = PERCENT
        .captures_iter(line)
        .last()
        .and_then(|caps| caps[1].parse().ok())?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let percent = value.clamp(0.0, 100.0) as u8;
    Some(percent)
}

/// What a finished tool printed.
#[derive(Debug, Default)]
pub struct ToolOutput {
    pub stdout: Vec<String>,
    pub tail: String,
}

#[derive(Default)]
struct Collected {
    stdout: Vec<String>,
    tail: VecDeque<String>,
}

/// Runs tools and tracks their progress and cancel handles per media id.
#[derive(Default)]
pub struct ToolRunner {
    progress: Arc<DashMap<String, u8>>,
    cancels: DashMap<String, Arc<Notify>>,
}

impl std::fmt::Debug for ToolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRunner")
            .field("running", &self.cancels.len())
            .finish()
    }
}

impl ToolRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last progress reading for `media_id`, 0 if unknown.
    #[must_use]
    pub fn progress(&self, media_id: &str) -> u8 {
        self.progress.get(media_id).map_or(0, |p| *p)
    }

    /// Records progress directly, for backends that compute it themselves.
    pub fn set_progress(&self, media_id: &str, value: u8) {
        self.progress.insert(media_id.to_string(), value.min(100));
    }

    /// Signals the tool running for `media_id` to stop. Returns whether a
    /// run was registered.
    pub fn cancel(&self, media_id: &str) -> bool {
        match self.cancels.get(media_id) {
            Some(signal) => {
                signal.notify_one();
                true
            }
            None => false,
        }
    }

    /// Registers a cancel handle for a run that does not spawn a process.
    #[must_use]
    pub fn register(&self, media_id: &str) -> Arc<Notify> {
        let signal = Arc::new(Notify::new());
        self.cancels
            .insert(media_id.to_string(), Arc::clone(&signal));
        signal
    }

    /// Drops the cancel handle for `media_id`.
    pub fn unregister(&self, media_id: &str) {
        self.cancels.remove(media_id);
    }

    /// Drops the progress reading for `media_id`.
    pub fn forget(&self, media_id: &str) {
        self.progress.remove(media_id);
    }

    /// Spawns `program args`, feeds every output line to `parser`, and
    /// waits for exit, a cancel request or `timeout`, whichever is first.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the tool cannot start, exits
    /// unsuccessfully, times out, or is cancelled.
    #[instrument(skip(self, args, parser), fields(program = %program.display()))]
    pub async fn run(
        &self,
        media_id: &str,
        program: &Path,
        args: &[String],
        timeout: Duration,
        parser: ProgressParser,
    ) -> Result<ToolOutput, BackendError> {
        let tool = tool_name(program);
        debug!(args = ?args, "spawning tool");

        let signal = self.register(media_id);
        let spawned = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                self.unregister(media_id);
                return Err(BackendError::tool_missing(tool, error));
            }
        };

        let collected = Arc::new(Mutex::new(Collected::default()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(media_id, stdout, true, &parser, &collected));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(media_id, stderr, false, &parser, &collected));
        }

        let outcome = tokio::select! {
            status = child.wait() => Ok(status),
            () = signal.notified() => Err(BackendError::cancelled(&tool)),
            () = tokio::time::sleep(timeout) => Err(BackendError::timeout(&tool, timeout.as_secs())),
        };
        self.unregister(media_id);

        let status = match outcome {
            Ok(status) => status.map_err(|e| BackendError::io(program, e))?,
            Err(error) => {
                warn!(error = %error, "stopping tool");
                if let Err(kill_error) = child.kill().await {
                    warn!(error = %kill_error, "failed to kill tool process");
                }
                return Err(error);
            }
        };

        for reader in readers {
            if let Err(error) = reader.await {
                warn!(error = %error, "output reader task failed");
            }
        }
        let collected = std::mem::take(&mut *collected.lock().unwrap_or_else(PoisonError::into_inner));
        let tail = collected.tail.into_iter().collect::<Vec<_>>().join("\n");

        if !status.success() {
            return Err(BackendError::exit_status(tool, status.code(), tail));
        }
        self.set_progress(media_id, 100);
        Ok(ToolOutput {
            stdout: collected.stdout,
            tail,
        })
    }

    fn spawn_reader<R>(
        &self,
        media_id: &str,
        stream: R,
        keep_lines: bool,
        parser: &ProgressParser,
        collected: &Arc<Mutex<Collected>>,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let progress = Arc::clone(&self.progress);
        let parser = Arc::clone(parser);
        let collected = Arc::clone(collected);
        let media_id = media_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(value) = parser(&line) {
                    progress.insert(media_id.clone(), value.min(100));
                }
                let mut collected = collected.lock().unwrap_or_else(PoisonError::into_inner);
                if collected.tail.len() == TAIL_LINES {
                    collected.tail.pop_front();
                }
                collected.tail.push_back(line.clone());
                if keep_lines {
                    collected.stdout.push(line);
                }
            }
        })
    }
}

/// Display name of a tool: its file name without directories.
#[must_use]
pub fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map_or_else(|| program.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Every regular file below `dir`, depth first.
///
/// # Errors
///
/// Returns [`BackendError::Io`] if a directory cannot be read.
pub async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, BackendError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| BackendError::io(&current, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackendError::io(&current, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| BackendError::io(entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Progress parsing ====================

    #[test]
    fn test_parse_percent_variants() {
        assert_eq!(parse_percent("[download]  42.3% of 1.2GiB at 3MiB/s"), Some(42));
        assert_eq!(
            parse_percent("[#1 SIZE:10MiB/20MiB(50%) CN:5 DL:1MiB]"),
            Some(50)
        );
        assert_eq!(parse_percent("from 10% to 75%"), Some(75));
        assert_eq!(parse_percent("no progress here"), None);
    }

    #[test]
    fn test_parse_percent_clamps() {
        assert_eq!(parse_percent("999%"), Some(100));
    }

    #[test]
    fn test_tool_name_strips_directories() {
        assert_eq!(tool_name(Path::new("/usr/bin/ffmpeg")), "ffmpeg");
        assert_eq!(tool_name(Path::new("yt-dlp")), "yt-dlp");
    }

    // ==================== Runner ====================

    #[test]
    fn test_cancel_without_run_returns_false() {
        let runner = ToolRunner::new();
        assert!(!runner.cancel("missing"));
        assert_eq!(runner.progress("missing"), 0);
    }

    #[test]
    fn test_set_progress_clamps() {
        let runner = ToolRunner::new();
        runner.set_progress("m", 250);
        assert_eq!(runner.progress("m"), 100);
    }

    #[test]
    fn test_forget_drops_progress_entry() {
        let runner = ToolRunner::new();
        runner.set_progress("m", 40);
        runner.forget("m");
        assert_eq!(runner.progress("m"), 0);
        assert!(runner.progress.is_empty());
    }

    #[tokio::test]
    async fn test_run_missing_tool() {
        let runner = ToolRunner::new();
        let result = runner
            .run(
                "m",
                Path::new("/nonexistent/definitely-not-a-tool"),
                &[],
                Duration::from_secs(5),
                percent_parser(),
            )
            .await;
        assert!(matches!(result, Err(BackendError::ToolMissing { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_collects_stdout_and_progress() {
        let runner = ToolRunner::new();
        let args = vec!["-c".to_string(), "echo 'step 30%'; echo done".to_string()];
        let output = runner
            .run("m", Path::new("sh"), &args, Duration::from_secs(10), percent_parser())
            .await
            .unwrap();
        assert_eq!(output.stdout, vec!["step 30%", "done"]);
        assert_eq!(runner.progress("m"), 100);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let runner = ToolRunner::new();
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = runner
            .run("m", Path::new("sh"), &args, Duration::from_secs(10), percent_parser())
            .await
            .unwrap_err();
        match err {
            BackendError::ExitStatus {
                code, output_tail, ..
            } => {
                assert_eq!(code, Some(3));
                assert!(output_tail.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let runner = ToolRunner::new();
        let args = vec!["5".to_string()];
        let err = runner
            .run("m", Path::new("sleep"), &args, Duration::from_millis(100), percent_parser())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_cancelled() {
        let runner = Arc::new(ToolRunner::new());
        let handle = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run(
                        "m",
                        Path::new("sleep"),
                        &["5".to_string()],
                        Duration::from_secs(30),
                        percent_parser(),
                    )
                    .await
            })
        };
        for _ in 0..50 {
            if runner.cancel("m") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_collect_files_recurses() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("a.mkv"), b"a").unwrap();
        std::fs::write(temp.path().join("sub/b.mp4"), b"b").unwrap();
        let files = collect_files(temp.path()).await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.ends_with("sub/b.mp4")));
    }
}
