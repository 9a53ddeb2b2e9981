use std::error::Error as StdError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Local;
use fleet_core::{Msg, RunOutcome};
use fleet_engine::{ScrapeError, ScraperContext};
use fleet_logging::{fleet_debug, fleet_error, fleet_info, fleet_warn};
use tokio::sync::mpsc;

/// Newest status lines shown by the console.
pub const STATUS_TAIL: usize = 100;
/// Newest error lines shown by the console.
pub const ERROR_TAIL: usize = 50;

pub fn status_log_path(log_dir: &Path, provider: &str) -> PathBuf {
    log_dir.join(format!("{provider}.status.log"))
}

pub fn error_log_path(log_dir: &Path, provider: &str) -> PathBuf {
    log_dir.join(format!("{provider}.error.log"))
}

/// Writes a run's status and error trace to per-provider log files and
/// reports completion back to the console loop.
pub struct FileScraperContext {
    provider: String,
    status_path: PathBuf,
    error_path: PathBuf,
    started: Instant,
    epoch: Instant,
    had_errors: AtomicBool,
    append: Mutex<()>,
    events: mpsc::UnboundedSender<Msg>,
}

impl FileScraperContext {
    /// Starts a fresh trace: logs left by the previous run are removed.
    pub fn begin(
        provider: &str,
        log_dir: &Path,
        epoch: Instant,
        events: mpsc::UnboundedSender<Msg>,
    ) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let status_path = status_log_path(log_dir, provider);
        let error_path = error_log_path(log_dir, provider);
        remove_if_present(&status_path)?;
        remove_if_present(&error_path)?;
        Ok(Self {
            provider: provider.to_string(),
            status_path,
            error_path,
            started: Instant::now(),
            epoch,
            had_errors: AtomicBool::new(false),
            append: Mutex::new(()),
            events,
        })
    }

    fn append(&self, path: &Path, line: &str) {
        let _guard = self.append.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamped = format!("{}: {}\n", Local::now().format("%H.%M.%S"), line);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(stamped.as_bytes()));
        if let Err(err) = written {
            fleet_error!("failed to append to {:?}: {}", path, err);
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl ScraperContext for FileScraperContext {
    fn log(&self, message: &str) {
        fleet_debug!("[{}] {}", self.provider, message);
        self.append(&self.status_path, message);
    }

    fn error(&self, context: &str, error: &dyn StdError) {
        self.had_errors.store(true, Ordering::SeqCst);
        fleet_warn!("[{}] {}: {}", self.provider, context, error);
        self.append(&self.error_path, &format!("[{context}] {error}"));
    }

    fn done(&self, result: Result<(), ScrapeError>) {
        let elapsed = format_elapsed(self.started.elapsed());
        let outcome = match result {
            Ok(()) => {
                if self.had_errors.load(Ordering::SeqCst) {
                    self.log(&format!("completed with errors: {elapsed}"));
                } else {
                    self.log(&format!("completed without errors: {elapsed}"));
                }
                RunOutcome::Completed
            }
            Err(ScrapeError::Aborted) => {
                self.log(&format!("aborted after {elapsed}"));
                RunOutcome::Aborted
            }
            Err(err) => {
                self.error("scrape", &err);
                self.log(&format!("completed with errors: {elapsed}"));
                RunOutcome::Failed(err.to_string())
            }
        };
        fleet_info!("[{}] run finished: {:?}", self.provider, outcome);

        let finished = Msg::RunFinished {
            provider: self.provider.clone(),
            outcome,
            now_ms: self.now_ms(),
        };
        if self.events.send(finished).is_err() {
            fleet_debug!("console loop already gone");
        }
    }
}

/// The newest `n` lines of a log file, newest first. A missing file is empty.
pub fn read_last_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    Ok(text
        .lines()
        .rev()
        .filter(|line| !line.is_empty())
        .take(n)
        .map(str::to_string)
        .collect())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// `Xh, Ym, Zs`, the same shape the console uses for its estimate.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}h, {}m, {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_engine::BrokerError;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn context(dir: &Path) -> (FileScraperContext, mpsc::UnboundedReceiver<Msg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = FileScraperContext::begin("games", dir, Instant::now(), tx).unwrap();
        (ctx, rx)
    }

    fn message_part(line: &str) -> &str {
        line.split_once(": ").map(|(_, rest)| rest).unwrap_or(line)
    }

    #[test]
    fn begin_removes_previous_run_logs() {
        let temp = TempDir::new().unwrap();
        fs::write(status_log_path(temp.path(), "games"), "old\n").unwrap();
        fs::write(error_log_path(temp.path(), "games"), "old\n").unwrap();

        let (_ctx, _rx) = context(temp.path());
        assert!(!status_log_path(temp.path(), "games").exists());
        assert!(!error_log_path(temp.path(), "games").exists());
    }

    #[test]
    fn lines_are_time_stamped_and_read_back_newest_first() {
        let temp = TempDir::new().unwrap();
        let (ctx, _rx) = context(temp.path());
        ctx.log("collecting listings...");
        ctx.log("found 3 items!");
        ctx.log("starting full scan...");

        let lines = read_last_lines(&status_log_path(temp.path(), "games"), 2).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(message_part(&lines[0]), "starting full scan...");
        assert_eq!(message_part(&lines[1]), "found 3 items!");

        let stamp = lines[0].split_once(": ").unwrap().0;
        assert_eq!(stamp.split('.').count(), 3);
    }

    #[test]
    fn clean_run_reports_completion_without_errors() {
        let temp = TempDir::new().unwrap();
        let (ctx, mut rx) = context(temp.path());
        ctx.done(Ok(()));

        let newest = read_last_lines(&status_log_path(temp.path(), "games"), 1).unwrap();
        assert!(message_part(&newest[0]).starts_with("completed without errors: 0h, 0m, "));
        match rx.try_recv().unwrap() {
            Msg::RunFinished {
                provider, outcome, ..
            } => {
                assert_eq!(provider, "games");
                assert_eq!(outcome, RunOutcome::Completed);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn errors_are_logged_and_mark_the_run() {
        let temp = TempDir::new().unwrap();
        let (ctx, mut rx) = context(temp.path());
        ctx.error("doom", &ScrapeError::Broker(BrokerError::Closed));
        ctx.done(Ok(()));

        let errors = read_last_lines(&error_log_path(temp.path(), "games"), ERROR_TAIL).unwrap();
        assert_eq!(
            message_part(&errors[0]),
            "[doom] page fetch failed: fetch broker is shut down"
        );
        let newest = read_last_lines(&status_log_path(temp.path(), "games"), 1).unwrap();
        assert!(message_part(&newest[0]).starts_with("completed with errors: "));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Msg::RunFinished {
                outcome: RunOutcome::Completed,
                ..
            }
        ));
    }

    #[test]
    fn aborted_run_is_reported_as_aborted() {
        let temp = TempDir::new().unwrap();
        let (ctx, mut rx) = context(temp.path());
        ctx.done(Err(ScrapeError::Aborted));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Msg::RunFinished {
                outcome: RunOutcome::Aborted,
                ..
            }
        ));
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let temp = TempDir::new().unwrap();
        let lines = read_last_lines(&temp.path().join("none.log"), STATUS_TAIL).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn elapsed_is_split_into_units() {
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1h, 2m, 5s");
    }
}
