//! # Logging module
//!
//! This module provides logging facilities and helpers

use tracing::metadata::LevelFilter;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
}

// -----------------------------------------------------------------------------
// helpers

/// returns the maximum level to emit, warnings and errors are always emitted
pub const fn level(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// install the global subscriber, source locations are only printed from the
/// debug level
pub fn initialize(verbosity: usize) -> Result<(), Error> {
    let level = level(verbosity);
    let verbose = level >= LevelFilter::DEBUG;

    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(verbose)
            .with_file(verbose)
            .with_line_number(verbose)
            .with_thread_ids(verbose)
            .finish(),
    )
    .map_err(Error::GlobalDefaultSubscriber)
}
