//! Mount-global state: rotor offsets, the pin-check digest, the configured
//! round count, and the backing-store root. Built once before the mount
//! loop starts and never mutated afterwards, so it needs no lock — it is
//! shared across request threads behind an `Arc`.

use std::path::PathBuf;

use safefs_cipher::Rounds;

/// Everything every filesystem request needs that doesn't belong to one
/// particular open file.
pub struct MountState {
    pub offsets: [u8; 8],
    pub safe_digest: [u8; 16],
    pub rounds: Rounds,
    pub root: PathBuf,
}

impl MountState {
    pub fn new(offsets: [u8; 8], safe_digest: [u8; 16], rounds: Rounds, root: PathBuf) -> Self {
        MountState {
            offsets,
            safe_digest,
            rounds,
            root,
        }
    }
}

impl Drop for MountState {
    fn drop(&mut self) {
        safefs_cipher::keyschedule::zeroize(&mut self.offsets);
        safefs_cipher::keyschedule::zeroize(&mut self.safe_digest);
    }
}
