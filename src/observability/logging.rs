//! Structured logging.

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything other than `json`/`jsonl` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset (e.g. `info`,
    /// `sqlmap=debug`).
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Applies `SQLMAP_LOG_LEVEL`, `SQLMAP_LOG_FORMAT` and `SQLMAP_LOG_FILE`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SQLMAP_LOG_LEVEL")
            && !v.is_empty()
        {
            self.level = v;
        }
        if let Ok(v) = std::env::var("SQLMAP_LOG_FORMAT") {
            self.format = LogFormat::parse(&v);
        }
        if let Ok(v) = std::env::var("SQLMAP_LOG_FILE")
            && !v.is_empty()
        {
            self.file = Some(PathBuf::from(v));
        }
        self
    }

    /// Builds the event filter: `RUST_LOG` if set, otherwise `level`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `level` is not a valid directive.
    pub fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level)
            .map_err(|e| Error::InvalidInput(format!("invalid log filter '{}': {e}", self.level)))
    }
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
pub(super) struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Opens a log file for appending, creating parent directories.
pub(super) fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| Error::Io {
            operation: "create_log_dir".to_string(),
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::Io {
            operation: "open_log_file".to_string(),
            path: path.to_path_buf(),
            source,
        })?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSONL"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "sqlmap=[".to_string(),
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(config.filter(), Err(Error::InvalidInput(_))));
        }
    }

    #[test]
    fn test_log_file_writer_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs/sqlmap.log");

        let mut writer = open_log_file(&path).unwrap();
        writer.write_all(b"first\n").unwrap();
        let mut again = open_log_file(&path).unwrap();
        again.write_all(b"second\n").unwrap();
        again.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
