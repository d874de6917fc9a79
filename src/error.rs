use thiserror::Error;

/// Fatal errors.
///
/// Only the two input resources can fail the run: the service registry and
/// the capture file. Per-row and per-packet anomalies are absorbed and
/// surfaced as counters instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to open the service registry table
    #[error("failed to open service registry {path}: {source}")]
    RegistryOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read the service registry table
    #[error("failed to read service registry: {0}")]
    RegistryRead(#[source] csv::Error),

    /// Failed to open the capture file
    #[error("failed to open capture {path}: {source}")]
    CaptureOpen {
        path: String,
        #[source]
        source: pcap::Error,
    },
}
