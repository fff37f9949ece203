//! Error types for bramble-tun

use std::io;
use thiserror::Error;

/// Result type alias for tun device operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing the tun device or its routes
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying device handle
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The OS device node could not be opened
    #[error("failed to open tun device '{device}': {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    /// An outbound packet could not be framed for the device
    #[error("framing error: {0}")]
    Framing(String),

    /// A kernel route-table mutation failed
    #[error("route error: {0}")]
    Route(String),
}

impl Error {
    /// Whether this error aborts device construction rather than a
    /// single packet or route operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::DeviceOpen { .. })
    }
}
