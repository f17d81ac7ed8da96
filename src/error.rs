//! Crate-wide error type.
//!
//! Distinguishes the failure kinds the reactor needs to branch on:
//! transient I/O is not an error at all by the time it reaches this
//! type (callers filter `WouldBlock` before constructing one), parse
//! failures become a response rather than a propagated error, and only
//! fatal startup failures are expected to unwind out of `Server::run`.

use std::io;

/// Errors that can escape the reactor core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding, listening, or registering the listening socket failed.
    #[error("failed to initialize listening socket: {0}")]
    Bind(#[source] io::Error),

    /// Creating the OS readiness multiplexer failed.
    #[error("failed to create readiness notifier: {0}")]
    Notifier(#[source] io::Error),

    /// The database pool could not open its initial set of handles.
    #[error("failed to initialize database pool: {0}")]
    DbPoolInit(#[source] mysql::Error),

    /// A database operation failed after the pool was initialized.
    #[error("database operation failed: {0}")]
    Db(#[source] mysql::Error),

    /// The database pool was closed while a caller was waiting to acquire.
    #[error("database pool is closed")]
    DbPoolClosed,

    /// Generic I/O failure not covered by a more specific variant.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The on-disk or environment configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
