use std::{
    fmt::Display,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Local};
use colored::*;
use log::{Level, LevelFilter, Log as LogTrait, Metadata, Record};
use once_cell::sync::OnceCell;
use thiserror::Error;

/// Severity levels for logging, matching the log crate's levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for LogSeverity {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => LogSeverity::Error,
            Level::Warn => LogSeverity::Warn,
            Level::Info => LogSeverity::Info,
            Level::Debug | Level::Trace => LogSeverity::Debug,
        }
    }
}

/// A log entry containing a message, severity level, and timestamp
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub msg: String,
    pub severity: LogSeverity,
    pub timestamp: DateTime<Local>,
    pub tag: String,
}

impl Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = format!("{:<9}", self.tag).bold();
        let tag_colored = match self.tag.to_lowercase().as_str() {
            "status" => tag.bright_cyan(),
            "scheduler" => tag.bright_blue(),
            "miner" => tag.bright_yellow(),
            "tip" => tag.bright_magenta(),
            "rpc" => tag.bright_green(),
            "shutdown" => tag.bright_red(),
            _ => tag.white(),
        };
        let level_colored = match self.severity {
            LogSeverity::Debug => "Debug".dimmed(),
            LogSeverity::Info => "Info".bright_white(),
            LogSeverity::Warn => "Warn".yellow(),
            LogSeverity::Error => "Error".red(),
        };
        write!(
            f,
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            tag_colored,
            level_colored,
            self.msg
        )
    }
}

/// Errors that can occur during logging operations
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),

    #[error("Failed to set logger: {0}")]
    SetLogger(String),
}

/// Configuration for the logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Whether to log to stdout
    pub console_output: bool,

    /// Whether to log to a file
    pub file_output: bool,

    /// Path to the log file (if file_output is true)
    pub log_file_path: Option<PathBuf>,

    /// Maximum number of log entries to keep in memory
    pub max_log_entries: usize,

    /// Minimum log level to record
    pub level: LevelFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            console_output: true,
            file_output: false,
            log_file_path: None,
            max_log_entries: 1000,
            level: LevelFilter::Info,
        }
    }
}

/// The main logger struct
pub struct Logger {
    logs: RwLock<Vec<LogRecord>>,
    config: RwLock<LoggerConfig>,
    file: RwLock<Option<File>>,
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Logger {
    /// Create a new logger with the given configuration
    pub fn new(config: LoggerConfig) -> Result<Arc<Self>, LoggerError> {
        let file = match (&config.log_file_path, config.file_output) {
            (Some(path), true) => Some(open_log_file(path)?),
            _ => None,
        };

        Ok(Arc::new(Self {
            logs: RwLock::new(Vec::with_capacity(config.max_log_entries)),
            config: RwLock::new(config),
            file: RwLock::new(file),
        }))
    }

    /// Install the logger as the global logger for the log crate
    pub fn init(logger: Arc<Logger>) -> Result<(), LoggerError> {
        let level = logger
            .config
            .read()
            .map_err(|e| LoggerError::LockError(e.to_string()))?
            .level;

        log::set_logger(Box::leak(Box::new(LoggerWrapper(logger))))
            .map_err(|e| LoggerError::SetLogger(e.to_string()))?;
        log::set_max_level(level);
        Ok(())
    }

    /// Record one entry: console, file, then the in-memory buffer
    pub fn log(&self, record: LogRecord) {
        if let Ok(config) = self.config.read() {
            if config.console_output {
                println!("{}", record);
            }

            if config.file_output {
                if let Ok(mut file_guard) = self.file.write() {
                    if let Some(file) = file_guard.as_mut() {
                        // Files get the plain line without colour codes.
                        let _ = writeln!(
                            file,
                            "[{}] [{}] [{:?}] {}",
                            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                            record.tag,
                            record.severity,
                            record.msg
                        );
                        let _ = file.flush();
                    }
                }
            }
        }

        if let Ok(mut logs) = self.logs.write() {
            logs.push(record);

            if let Ok(config) = self.config.read() {
                if logs.len() > config.max_log_entries {
                    let len = logs.len();
                    logs.drain(0..len - config.max_log_entries);
                }
            }
        }
    }

    pub fn log_str(&self, msg: impl ToString, severity: LogSeverity, tag: Option<&str>) {
        self.log(LogRecord {
            msg: msg.to_string(),
            severity,
            timestamp: Local::now(),
            tag: tag.unwrap_or("general").to_string(),
        });
    }

    /// Recent entries, oldest first
    pub fn get_logs(&self) -> Vec<LogRecord> {
        self.logs.read().map(|logs| logs.clone()).unwrap_or_default()
    }

    /// Get all logs and clear the log buffer
    pub fn get_logs_and_clear(&self) -> Vec<LogRecord> {
        if let Ok(mut logs) = self.logs.write() {
            let result: Vec<LogRecord> = logs.drain(..).collect();
            result
        } else {
            Vec::new()
        }
    }

    fn enabled(&self, level: Level) -> bool {
        self.config
            .read()
            .map(|config| level <= config.level)
            .unwrap_or(true)
    }
}

/// The `log` target's first path segment becomes the record's tag.
fn tag_for(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

/// Wrapper for the Logger to implement the log::Log trait
struct LoggerWrapper(Arc<Logger>);

impl LogTrait for LoggerWrapper {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.0.enabled(metadata.level())
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.0.log(LogRecord {
                msg: record.args().to_string(),
                severity: LogSeverity::from(record.level()),
                timestamp: Local::now(),
                tag: tag_for(record.target()).to_string(),
            });
        }
    }

    fn flush(&self) {
        if let Ok(file_guard) = self.0.file.write() {
            if let Some(file) = file_guard.as_ref() {
                let _ = file.sync_all();
            }
        }
    }
}

static GLOBAL_LOGGER: OnceCell<Arc<Logger>> = OnceCell::new();

/// Install the global logger. Later calls return the logger already
/// installed and ignore `config`.
pub fn init_global_logger(config: LoggerConfig) -> Result<Arc<Logger>, LoggerError> {
    GLOBAL_LOGGER
        .get_or_try_init(|| {
            let logger = Logger::new(config)?;
            Logger::init(Arc::clone(&logger))?;
            Ok(logger)
        })
        .cloned()
}
