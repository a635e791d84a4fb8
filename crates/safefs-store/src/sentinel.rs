//! The `.safefs` sentinel: a normal per-file header plus a 16-byte
//! enciphered copy of the mount's safe digest, written once when a backing
//! store is first initialized. On every subsequent mount the same digest
//! is recomputed from the supplied pin and compared against what the
//! sentinel decrypts to, which is how a wrong pin is detected before any
//! real file is touched.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use safefs_cipher::{decipher, encipher};
use safefs_membrane::MountState;

use crate::error::SentinelError;
use crate::header::{load_header, write_fresh_header, HEADER_LEN};

const SENTINEL_NAME: &str = ".safefs";
const DIGEST_LEN: usize = 16;

/// Create `.safefs` under `root` if absent, or validate the pin against the
/// existing one. Returns `Err(SentinelError::WrongPin)` if `mount.safe_digest`
/// does not match what the sentinel decrypts to.
pub fn ensure_sentinel(root: &Path, mount: &MountState) -> Result<(), SentinelError> {
    let path = root.join(SENTINEL_NAME);

    match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => create_sentinel(&file, mount),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            validate_sentinel(&file, mount)
        }
        Err(err) => Err(err.into()),
    }
}

fn create_sentinel(file: &File, mount: &MountState) -> Result<(), SentinelError> {
    let opened = write_fresh_header(file, mount)?;

    let mut body = mount.safe_digest;
    encipher(&opened.rotor, &mount.offsets, 0, &mut body, mount.rounds);

    use std::os::unix::fs::FileExt;
    let written = file.write_at(&body, HEADER_LEN as u64)?;
    if written != DIGEST_LEN {
        return Err(crate::error::HeaderError::ShortWrite {
            expected: DIGEST_LEN,
            got: written,
        }
        .into());
    }
    Ok(())
}

fn validate_sentinel(file: &File, mount: &MountState) -> Result<(), SentinelError> {
    let opened = load_header(file, mount)?;

    use std::os::unix::fs::FileExt;
    let mut body = [0u8; DIGEST_LEN];
    let read = file.read_at(&mut body, HEADER_LEN as u64)?;
    if read != DIGEST_LEN {
        return Err(crate::error::HeaderError::ShortRead {
            expected: DIGEST_LEN,
            got: read,
        }
        .into());
    }

    decipher(&opened.rotor, &mount.offsets, 0, &mut body, mount.rounds);
    if body != mount.safe_digest {
        return Err(SentinelError::WrongPin);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use safefs_cipher::Rounds;
    use tempfile::tempdir;

    fn mount_with_offsets(offsets: [u8; 8]) -> MountState {
        MountState::new(offsets, [7u8; 16], Rounds::Five, std::path::PathBuf::new())
    }

    #[test]
    fn first_call_creates_sentinel_and_second_call_validates_it() {
        let dir = tempdir().unwrap();
        let mount = mount_with_offsets([1, 2, 3, 4, 5, 6, 7, 8]);

        ensure_sentinel(dir.path(), &mount).expect("create sentinel");
        assert!(dir.path().join(".safefs").exists());

        ensure_sentinel(dir.path(), &mount).expect("validate sentinel with same digest");
    }

    #[test]
    fn mismatched_digest_is_rejected() {
        let dir = tempdir().unwrap();
        let creating_mount = mount_with_offsets([1, 2, 3, 4, 5, 6, 7, 8]);
        ensure_sentinel(dir.path(), &creating_mount).expect("create sentinel");

        let wrong_mount = MountState::new(
            [1, 2, 3, 4, 5, 6, 7, 8],
            [8u8; 16],
            Rounds::Five,
            std::path::PathBuf::new(),
        );
        let err = ensure_sentinel(dir.path(), &wrong_mount).unwrap_err();
        assert!(matches!(err, SentinelError::WrongPin));
    }
}
