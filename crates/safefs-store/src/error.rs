use thiserror::Error;

/// Header-level I/O failures: the only errors the backing store raises that
/// are never a plain `io::Error` passed straight through, because a short
/// read or write of a fixed-size header means the physical file is corrupt
/// or foreign, not that a retry would help.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("short header read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("short header write: expected {expected} bytes, wrote {got}")]
    ShortWrite { expected: usize, got: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures establishing or validating the `.safefs` sentinel file.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("sentinel file already exists but could not be opened exclusively")]
    AlreadyExists,

    #[error("incorrect pin code")]
    WrongPin,
}
