use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tracing_subscriber::fmt::MakeWriter;

/// How many captured `tart run` logs to keep per VM.
pub const KEEP_PROCESS_LOGS: usize = 10;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── DeferredFileWriter ───────────────────────────────────

/// A `MakeWriter` that discards writes until `handle.set_file(path)` is
/// called, then appends to that file.
///
/// The subscriber is installed before the config (and therefore the VM
/// work directory) is known.
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: Arc<Mutex<Option<File>>>,
}

#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: Arc<Mutex<Option<File>>>,
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

impl DeferredFileHandle {
    /// Start appending to `path`, creating parent directories as needed.
    pub fn set_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.inner) = Some(file);
        Ok(())
    }
}

pub struct DeferredWriter {
    inner: Arc<Mutex<Option<File>>>,
}

impl std::io::Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}

// ── ProcessLog ───────────────────────────────────────────

/// Mirrors the VM host process output into a file.
///
/// Created as `<timestamp>_<name>_running.log`; `finish(success)` renames it
/// to `_ok.log` or `_failed.log`. Cloned into each pipe reader task.
#[derive(Clone)]
pub struct ProcessLog {
    inner: Arc<Mutex<ProcessLogInner>>,
}

struct ProcessLogInner {
    file: Option<File>,
    path: PathBuf,
}

impl ProcessLog {
    pub fn new(logs_dir: &Path, name: &str) -> std::io::Result<Self> {
        fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("{}_{name}_running.log", utc_timestamp()));
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ProcessLogInner {
                file: Some(file),
                path,
            })),
        })
    }

    pub fn path(&self) -> PathBuf {
        lock(&self.inner).path.clone()
    }

    pub fn write(&self, chunk: &str) {
        if let Some(f) = lock(&self.inner).file.as_mut() {
            let _ = f.write_all(chunk.as_bytes());
        }
    }

    /// Close the file and rename it by outcome. Later writes are dropped.
    pub fn finish(&self, success: bool) {
        let mut inner = lock(&self.inner);
        if inner.file.take().is_none() {
            return;
        }
        let suffix = if success { "ok" } else { "failed" };
        let renamed = inner
            .path
            .file_name()
            .and_then(|f| f.to_str())
            .map(|f| f.replace("_running.log", &format!("_{suffix}.log")));
        if let Some(name) = renamed {
            let new_path = inner.path.with_file_name(name);
            if fs::rename(&inner.path, &new_path).is_ok() {
                inner.path = new_path;
            }
        }
    }
}

// ── Log rotation ─────────────────────────────────────────

/// Delete the oldest finished logs named `name`, keeping at most `keep`.
pub fn rotate_logs(logs_dir: &Path, name: &str, keep: usize) {
    let mut matching: Vec<PathBuf> = list_logs(logs_dir)
        .into_iter()
        .filter(|e| e.name == name)
        .map(|e| e.path)
        .collect();

    // timestamp prefix keeps lexical order chronological
    matching.sort();

    if matching.len() > keep {
        for old in &matching[..matching.len() - keep] {
            let _ = fs::remove_file(old);
        }
    }
}

// ── Log listing ──────────────────────────────────────────

/// Metadata parsed from a `<timestamp>_<name>_<status>.log` filename.
#[derive(Debug)]
pub struct LogEntry {
    pub path: PathBuf,
    pub timestamp: String,
    pub name: String,
    pub status: String,
}

fn parse_log_name(path: &Path) -> Option<LogEntry> {
    let fname = path.file_name()?.to_str()?;
    let stem = fname.strip_suffix(".log")?;
    let (timestamp, rest) = stem.split_once('_')?;
    let (name, status) = rest.rsplit_once('_')?;
    if status == "running" {
        return None;
    }
    Some(LogEntry {
        path: path.to_path_buf(),
        timestamp: timestamp.to_string(),
        name: name.to_string(),
        status: status.to_string(),
    })
}

/// All finished logs in the directory, oldest first.
pub fn list_logs(logs_dir: &Path) -> Vec<LogEntry> {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return Vec::new();
    };

    let mut logs: Vec<LogEntry> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| parse_log_name(&e.path()))
        .collect();

    logs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    logs
}

/// The most recent finished log, optionally only failed runs.
pub fn latest_log(logs_dir: &Path, failed_only: bool) -> Option<PathBuf> {
    list_logs(logs_dir)
        .into_iter()
        .rev()
        .find(|e| !failed_only || e.status == "failed")
        .map(|e| e.path)
}

// ── Timestamp helper ─────────────────────────────────────

/// Current UTC time as `YYYY-MM-DDTHH-MM-SS`, safe for filenames.
pub fn utc_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_timestamp(secs)
}

fn format_timestamp(secs: u64) -> String {
    let days = (secs / 86400) as i64;
    let time_of_day = secs % 86400;
    let (hours, minutes, seconds) = (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60);

    // Howard Hinnant's civil_from_days
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe as i64 + era * 400 + i64::from(m <= 2);

    format!("{y:04}-{m:02}-{d:02}T{hours:02}-{minutes:02}-{seconds:02}")
}
