use thiserror::Error;

/// Errors raised by the surfaces around the decapsulation engine.
///
/// The engine itself never fails: a frame it cannot decapsulate is reported
/// as a zero offset. These variants cover configuration, capture sources and
/// the worker pool.
#[derive(Error, Debug)]
pub enum DecapError {
    /// A tunnel family name that is not supported was requested.
    #[error("Unsupported tunnel type: {0}")]
    UnsupportedTunnelType(String),

    /// The configuration is inconsistent.
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Reading a capture file or interface failed.
    #[error("Capture error: {0}")]
    Capture(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
