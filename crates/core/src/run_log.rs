//! Per-run NDJSON log files.
//!
//! One process-wide JSON subscriber writes into whichever run file is open.
//! Outside a run, events go nowhere.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "SCOOPBACKUP_LOG";
pub const LOG_DIR_ENV: &str = "SCOOPBACKUP_LOG_DIR";

static RUN_FILE: OnceLock<RunFile> = OnceLock::new();
static SUBSCRIBER: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Backup,
    Restore,
    Manage,
    Scheduled,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Manage => "manage",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "backup" => Some(Self::Backup),
            "restore" => Some(Self::Restore),
            "manage" => Some(Self::Manage),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RunFile {
    current: Mutex<Option<BufWriter<File>>>,
}

impl RunFile {
    fn slot(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, path: &Path) -> std::io::Result<()> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "a run log is already open",
            ));
        }
        let file = OpenOptions::new().create_new(true).write(true).open(path)?;
        *slot = Some(BufWriter::new(file));
        Ok(())
    }

    fn close(&self) -> std::io::Result<()> {
        let Some(mut writer) = self.slot().take() else {
            return Ok(());
        };
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// Writes into the open run file, or discards when none is open.
struct RunFileWriter<'a> {
    slot: MutexGuard<'a, Option<BufWriter<File>>>,
}

impl Write for RunFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.slot.as_mut() {
            Some(w) => w.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.slot.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunFile {
    type Writer = RunFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RunFileWriter { slot: self.slot() }
    }
}

impl<'a> MakeWriter<'a> for &RunFile {
    type Writer = RunFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        (**self).make_writer()
    }
}

fn env_filter(app: Option<&str>, rust: Option<&str>) -> EnvFilter {
    app.or(rust)
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new("debug"))
}

/// Installs the JSON subscriber once per process.
pub fn init_run_logging() {
    SUBSCRIBER.get_or_init(|| {
        let run_file = RUN_FILE.get_or_init(RunFile::default);
        let filter = env_filter(
            std::env::var(LOG_ENV).ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
        );
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_writer(run_file);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

/// Flushes and closes the run file on drop.
#[derive(Debug)]
pub struct RunLogGuard {
    path: PathBuf,
}

impl RunLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        if let Some(run_file) = RUN_FILE.get() {
            let _ = run_file.close();
        }
    }
}

/// Opens `<log dir>/run-<kind>-<utc>-<run_id>.ndjson`. The log dir is
/// `$SCOOPBACKUP_LOG_DIR` or `<data_dir>/logs`.
pub fn start_run_log(kind: &str, run_id: &str, data_dir: &Path) -> std::io::Result<RunLogGuard> {
    let kind = RunKind::parse(kind).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported run kind: {kind}"),
        )
    })?;
    init_run_logging();

    let dir = std::env::var_os(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("logs"));
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(run_file_name(kind, run_id, Utc::now()));
    RUN_FILE.get_or_init(RunFile::default).open(&path)?;
    Ok(RunLogGuard { path })
}

fn run_file_name(kind: RunKind, run_id: &str, started: DateTime<Utc>) -> String {
    let run_id: String = run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "run-{}-{}-{run_id}.ndjson",
        kind.as_str(),
        started.format("%Y%m%dT%H%M%SZ")
    )
}
