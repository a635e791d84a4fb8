//! The FUSE request layer: resolves logical paths against the backing
//! store and drives the cipher core on every read and write.

pub mod filesystem;

pub use filesystem::SafeFs;
