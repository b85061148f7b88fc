#[cfg(feature = "logger")]
/// This module provides a log-based item writer, useful for debugging.
pub mod logger;

#[cfg(feature = "csv")]
/// This module provides delimited flat-file item readers and writers.
pub mod csv;

#[cfg(feature = "rdbc")]
/// This module provides a paged-query item reader over SQL databases.
pub mod rdbc;
