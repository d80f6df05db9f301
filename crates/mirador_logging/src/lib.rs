//! Shared logging and home-directory utilities for Mirador binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "mirador=info,mirador_sync=info,mirador_cache=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for a Mirador binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a size-rotated log file plus stderr output.
///
/// `RUST_LOG` overrides the default filter for both outputs; `verbose`
/// widens stderr to match the file.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = LogWriter::open(log_dir, config.app_name)?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The Mirador home directory: `$MIRADOR_HOME` or `~/.mirador`.
pub fn mirador_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("MIRADOR_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".mirador")
}

/// Default location of the mirror database: `<home>/mirador.db`.
pub fn default_db_path() -> PathBuf {
    mirador_home().join("mirador.db")
}

/// Logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    mirador_home().join("logs")
}

/// Create the logs directory (and the home above it) if missing.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-rotated append-only log file: `<name>.log`, with `<name>.log.1`
/// holding the most recent rotation and the oldest index dropped.
struct RotatingFile {
    dir: PathBuf,
    name: String,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(dir: PathBuf, name: String) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{name}.log")))?;
        let written = file.metadata()?.len();
        let mut this = Self { dir, name, file, written };
        if this.written > MAX_LOG_FILE_SIZE {
            this.rotate()?;
        }
        Ok(this)
    }

    fn path(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.dir.join(format!("{}.log", self.name))
        } else {
            self.dir.join(format!("{}.log.{index}", self.name))
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = self.path(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (0..MAX_LOG_FILES - 1).rev() {
            let src = self.path(index);
            if src.exists() {
                fs::rename(&src, self.path(index + 1))?;
            }
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Cloneable `MakeWriter` over one shared [`RotatingFile`].
#[derive(Clone)]
struct LogWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl LogWriter {
    fn open(dir: PathBuf, app_name: &str) -> Result<Self> {
        let name: String = app_name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect();
        let file = RotatingFile::open(dir, name)
            .with_context(|| format!("Failed to open log file for {app_name}"))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct LogWriterGuard {
    inner: Arc<Mutex<RotatingFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}
