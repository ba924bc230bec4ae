//! Logging initialization and configuration.
//!
//! Uses the `tracing` ecosystem for structured logging with support for
//! both human-readable and JSON output formats, plus an optional plain-text
//! copy in a daily log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// # Notes
///
/// - Log output goes to stderr (stdout is reserved for data output)
/// - The RUST_LOG environment variable can override the log level
/// - When `log_dir` is given, logs are also appended to
///   `<log_dir>/archivist_YYYYMMDD.log` without ANSI colors
pub fn init(level: &str, json_format: bool, log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if json_format {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .with_ansi(true)
            .boxed()
    };

    let file_layer = log_dir.and_then(|dir| match DailyLog::open(dir) {
        Ok(log) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log))
                .boxed(),
        ),
        Err(e) => {
            // Subscriber is not up yet
            eprintln!("Warning: file logging disabled ({}): {e}", dir.display());
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Initialize logging with configuration from Config.
pub fn init_from_config(
    config: &archivist_core::Config,
    verbose_override: bool,
    json_logs_override: bool,
) {
    let level = if verbose_override {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let json_format = json_logs_override || config.logging.format == "json";
    let log_dir = config.logging.file.then(|| config.log_dir());
    init(level, json_format, log_dir.as_deref());
}

/// Append-only log file that switches to a new `archivist_YYYYMMDD.log`
/// when the local date changes.
pub struct DailyLog {
    dir: PathBuf,
    date: String,
    file: File,
}

impl DailyLog {
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let date = today();
        let file = open_for(dir, &date)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            date,
            file,
        })
    }

    pub fn path(&self) -> PathBuf {
        file_path(&self.dir, &self.date)
    }

    fn roll(&mut self) -> io::Result<()> {
        let date = today();
        if date != self.date {
            self.file = open_for(&self.dir, &date)?;
            self.date = date;
        }
        Ok(())
    }
}

impl Write for DailyLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.roll()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn file_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("archivist_{date}.log"))
}

fn open_for(dir: &Path, date: &str) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path(dir, date))
}
