//! Per-file header codec and sentinel handling: the layer between the
//! cipher core and the FUSE request layer that knows about backing files
//! on disk, but nothing about mount paths presented to the kernel.

#![deny(unsafe_code)]

pub mod error;
pub mod header;
pub mod sentinel;

pub use error::{HeaderError, SentinelError};
pub use header::{load_header, write_fresh_header, HEADER_LEN};
pub use sentinel::ensure_sentinel;
