//! Derives the mount-global rotor offsets and the pin-verification digest
//! from the 10-digit pin.

use md5::{Digest, Md5};
use thiserror::Error;

/// The 10-byte pin, held only long enough to derive the mount's key
/// material. Zeroized on drop.
pub struct Pin([u8; 10]);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("pin must be exactly 10 bytes, got {got}")]
pub struct PinError {
    pub got: usize,
}

impl TryFrom<&[u8]> for Pin {
    type Error = PinError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 10 {
            return Err(PinError { got: value.len() });
        }
        let mut bytes = [0u8; 10];
        bytes.copy_from_slice(value);
        Ok(Pin(bytes))
    }
}

impl Drop for Pin {
    fn drop(&mut self) {
        zeroize(&mut self.0);
    }
}

/// Overwrite a byte buffer with zeros. Used for pin and rotor material that
/// must not linger in memory after use.
pub fn zeroize(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = 0;
    }
}

/// `offsets[i] = (offsets[i] << 1) + (i+j) + pin[(i+j) mod 10]`, accumulated
/// over `j in 0..6`, all arithmetic modulo 256.
pub fn derive_offsets(pin: &Pin) -> [u8; 8] {
    let mut offsets = [0u8; 8];
    for (i, slot) in offsets.iter_mut().enumerate() {
        let mut value = 0u8;
        for j in 0..6 {
            let idx = (i + j) % 10;
            value = value
                .wrapping_shl(1)
                .wrapping_add((i + j) as u8)
                .wrapping_add(pin.0[idx]);
        }
        *slot = value;
    }
    offsets
}

/// `MD5(offsets ‖ pin[0..8] ‖ offsets)`, used only to recognise whether the
/// pin supplied at mount matches the one that created the backing store.
pub fn derive_safe_digest(offsets: &[u8; 8], pin: &Pin) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(offsets);
    hasher.update(&pin.0[0..8]);
    hasher.update(offsets);
    hasher.finalize().into()
}

/// `MD5(offsets ‖ safe_digest ‖ offsets ‖ salt)`, used to mask a per-file
/// rotor when it is written to disk.
pub fn derive_rotor_digest(offsets: &[u8; 8], safe_digest: &[u8; 16], salt: &[u8; 4]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(offsets);
    hasher.update(safe_digest);
    hasher.update(offsets);
    hasher.update(salt);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length_pin() {
        let err = Pin::try_from(&b"123"[..]).unwrap_err();
        assert_eq!(err.got, 3);
    }

    #[test]
    fn same_pin_derives_same_offsets_and_digest() {
        let pin_a = Pin::try_from(&b"1234567890"[..]).unwrap();
        let pin_b = Pin::try_from(&b"1234567890"[..]).unwrap();
        let offsets_a = derive_offsets(&pin_a);
        let offsets_b = derive_offsets(&pin_b);
        assert_eq!(offsets_a, offsets_b);
        assert_eq!(
            derive_safe_digest(&offsets_a, &pin_a),
            derive_safe_digest(&offsets_b, &pin_b)
        );
    }

    #[test]
    fn different_pin_derives_different_offsets() {
        let pin_a = Pin::try_from(&b"1234567890"[..]).unwrap();
        let pin_b = Pin::try_from(&b"1234567891"[..]).unwrap();
        assert_ne!(derive_offsets(&pin_a), derive_offsets(&pin_b));
    }

    #[test]
    fn rotor_digest_varies_with_salt() {
        let pin = Pin::try_from(&b"1234567890"[..]).unwrap();
        let offsets = derive_offsets(&pin);
        let safe_digest = derive_safe_digest(&offsets, &pin);
        let digest_a = derive_rotor_digest(&offsets, &safe_digest, &[1, 2, 3, 4]);
        let digest_b = derive_rotor_digest(&offsets, &safe_digest, &[5, 6, 7, 8]);
        assert_ne!(digest_a, digest_b);
    }
}
