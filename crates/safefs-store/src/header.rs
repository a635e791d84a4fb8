//! The 260-byte per-file header: a 4-byte salt followed by a 256-byte
//! obfuscated rotor table. Body ciphertext starts immediately after.

use std::fs::File;
use std::os::unix::fs::FileExt;

use rand::{thread_rng, Rng};
use safefs_cipher::rotor::{decode, encode, generate_random_rotor};
use safefs_cipher::{derive_rotor_digest, Rotor};
use safefs_membrane::{MountState, OpenFile};

use crate::error::HeaderError;

/// Total on-disk header size: 4-byte salt + 256-byte obfuscated rotor table.
pub const HEADER_LEN: usize = 260;
const SALT_LEN: usize = 4;
const ROTOR_LEN: usize = 256;

/// Generate a fresh salt and rotor, obfuscate the rotor with this file's
/// rotor digest, and write the header to offset 0. Used on `create`.
pub fn write_fresh_header(file: &File, mount: &MountState) -> Result<OpenFile, HeaderError> {
    let mut salt = [0u8; SALT_LEN];
    thread_rng().fill(&mut salt);

    let rotor = generate_random_rotor(&mut thread_rng());
    let rotor_digest = derive_rotor_digest(&mount.offsets, &mount.safe_digest, &salt);

    let mut obfuscated = rotor.forward;
    encode(&mut obfuscated, &rotor_digest);

    let mut header = [0u8; HEADER_LEN];
    header[0..SALT_LEN].copy_from_slice(&salt);
    header[SALT_LEN..HEADER_LEN].copy_from_slice(&obfuscated);

    let written = file.write_at(&header, 0)?;
    if written != HEADER_LEN {
        return Err(HeaderError::ShortWrite {
            expected: HEADER_LEN,
            got: written,
        });
    }

    Ok(OpenFile {
        salt,
        rotor_digest,
        rotor,
    })
}

/// Read the header at offset 0, recover the rotor digest from the salt it
/// stores, and de-obfuscate the rotor table. Used on `open`.
pub fn load_header(file: &File, mount: &MountState) -> Result<OpenFile, HeaderError> {
    let mut header = [0u8; HEADER_LEN];
    let read = file.read_at(&mut header, 0)?;
    if read != HEADER_LEN {
        return Err(HeaderError::ShortRead {
            expected: HEADER_LEN,
            got: read,
        });
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&header[0..SALT_LEN]);

    let rotor_digest = derive_rotor_digest(&mount.offsets, &mount.safe_digest, &salt);

    let mut forward = [0u8; ROTOR_LEN];
    forward.copy_from_slice(&header[SALT_LEN..HEADER_LEN]);
    decode(&mut forward, &rotor_digest);

    let rotor = Rotor::from_forward(forward);
    if !rotor.is_consistent() {
        tracing::warn!("header decode produced an inconsistent rotor; pin or backing file may be wrong");
    }

    Ok(OpenFile {
        salt,
        rotor_digest,
        rotor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use safefs_cipher::Rounds;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn sample_mount() -> MountState {
        MountState::new([1, 2, 3, 4, 5, 6, 7, 8], [9u8; 16], Rounds::Five, PathBuf::from("/tmp"))
    }

    #[test]
    fn write_then_load_round_trips_rotor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backing");
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        let mount = sample_mount();
        let written = write_fresh_header(&file, &mount).unwrap();
        let loaded = load_header(&file, &mount).unwrap();

        assert_eq!(written.salt, loaded.salt);
        assert_eq!(written.rotor_digest, loaded.rotor_digest);
        assert_eq!(written.rotor.forward, loaded.rotor.forward);
        assert!(loaded.rotor.is_consistent());
    }

    #[test]
    fn two_fresh_headers_diverge() {
        let dir = tempdir().unwrap();
        let mount = sample_mount();

        let file_a = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join("a"))
            .unwrap();
        let file_b = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(dir.path().join("b"))
            .unwrap();

        let a = write_fresh_header(&file_a, &mount).unwrap();
        let b = write_fresh_header(&file_b, &mount).unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.rotor_digest, b.rotor_digest);
        assert_ne!(a.rotor.forward, b.rotor.forward);
    }

    #[test]
    fn short_header_read_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncated");
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        file.write_at(&[0u8; 10], 0).unwrap();

        let mount = sample_mount();
        let err = load_header(&file, &mount).unwrap_err();
        assert!(matches!(err, HeaderError::ShortRead { got: 10, .. }));
    }
}
