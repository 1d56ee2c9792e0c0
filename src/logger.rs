//! Logging setup for applications embedding this library.
//!
//! The library itself only emits through the `log` facade; call [`init`] from
//! the application to install a fern-based logger, or plug in any other
//! `log` implementation instead.

use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use once_cell::sync::OnceCell;

use crate::constants::LOG_TIMESTAMP_FORMAT;

static LOGGER_INSTALLED: OnceCell<()> = OnceCell::new();

/// Install a fern logger writing to stderr, or to `log_file` when given.
///
/// Calling this more than once is a no-op.
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    if LOGGER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{}] {}: {}",
                chrono::Utc::now().format(LOG_TIMESTAMP_FORMAT),
                record.level(),
                record.target(),
                message
            ));
        })
        .level(level);

    let dispatch = match log_file {
        Some(path) => dispatch.chain(
            fern::log_file(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?,
        ),
        None => dispatch.chain(std::io::stderr()),
    };

    dispatch.apply().context("Failed to install logger")?;
    let _ = LOGGER_INSTALLED.set(());
    Ok(())
}
