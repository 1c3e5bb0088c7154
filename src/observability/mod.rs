//! Observability.
//!
//! The library only emits `tracing` events and `metrics` measurements.
//! Installing a subscriber (and a metrics recorder) is left to the host
//! application; [`init_logging`] is a convenience for hosts that want the
//! default setup.

mod logging;

pub use logging::{LogFormat, LoggingConfig};

use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global `tracing` subscriber.
///
/// Events are filtered by `RUST_LOG`, falling back to `config.level`, and
/// written to stderr or to `config.file`.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if logging was already initialized (by
/// this function or by another subscriber), [`Error::InvalidInput`] for an
/// invalid level, [`Error::Io`] if the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(already_initialized());
    }

    let filter = config.filter()?;
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(logging::open_log_file(path)?),
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let ansi = config.file.is_none();

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
    }

    LOGGING_INIT.set(()).map_err(|()| already_initialized())
}

fn already_initialized() -> Error {
    Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: "logging already initialized".to_string(),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: e.to_string(),
    }
}
