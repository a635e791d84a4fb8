//! The 256-element substitution rotor and its inverse.
//!
//! A [`Rotor`] is the confusion layer of the stream cipher: `forward` is a
//! permutation of `0..=255` and `reverse` is its inverse, so that
//! `reverse[forward[b] as usize] == b` for every byte `b`. The permutation
//! property must survive every mutation — `derive_reverse` is the only way
//! to populate `reverse` from a `forward` table.

use rand::Rng;

/// A substitution table and its inverse, held in memory for the lifetime of
/// an open file.
#[derive(Clone)]
pub struct Rotor {
    pub forward: [u8; 256],
    pub reverse: [u8; 256],
}

impl Rotor {
    /// Build a rotor from an already-known forward table, deriving `reverse`.
    pub fn from_forward(forward: [u8; 256]) -> Self {
        let reverse = derive_reverse(&forward);
        Rotor { forward, reverse }
    }

    /// `reverse[forward[b]] == b` for every byte. Checked by tests and
    /// available for callers that want to assert the invariant after
    /// deserializing a rotor from disk.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        (0u8..=255).all(|b| self.reverse[self.forward[b as usize] as usize] == b)
    }
}

/// Fisher–Yates shuffle restricted to 8-bit indices. Does not produce a
/// uniform permutation (the restriction to `u8` swap targets biases it
/// slightly) but is sufficient as a confusion layer — see the original
/// design note in the spec this crate implements.
pub fn generate_random_rotor<R: Rng + ?Sized>(rng: &mut R) -> Rotor {
    let mut forward = [0u8; 256];
    for (j, slot) in forward.iter_mut().enumerate() {
        *slot = j as u8;
    }
    for j in 0..256usize {
        let k = rng.gen::<u8>() as usize;
        forward.swap(j, k);
    }
    let reverse = derive_reverse(&forward);
    Rotor { forward, reverse }
}

/// Recompute the inverse permutation: `reverse[forward[j]] = j`.
pub fn derive_reverse(forward: &[u8; 256]) -> [u8; 256] {
    let mut reverse = [0u8; 256];
    for (j, &f) in forward.iter().enumerate() {
        reverse[f as usize] = j as u8;
    }
    reverse
}

/// Weights applied to the 16 digest bytes at offsets `i..i+4` (mod 16) when
/// masking a rotor for storage. `encode`/`decode` are exact inverses of each
/// other but deliberately do not preserve the permutation property — the
/// on-disk form is a scrambled 256-byte string, not a usable rotor.
const MASK_WEIGHTS: [u8; 5] = [1, 2, 3, 5, 7];

/// Obfuscate a raw 256-byte rotor table for storage, using a 16-byte digest
/// as the mask. Reversed exactly by [`decode`].
pub fn encode(table: &mut [u8; 256], digest: &[u8; 16]) {
    for (i, byte) in table.iter_mut().enumerate() {
        let mut mask = 0u8;
        for (w, &weight) in MASK_WEIGHTS.iter().enumerate() {
            mask = mask.wrapping_add(digest[(i + w) & 15].wrapping_mul(weight));
        }
        *byte = byte.wrapping_add(mask);
    }
}

/// Inverse of [`encode`].
pub fn decode(table: &mut [u8; 256], digest: &[u8; 16]) {
    for (i, byte) in table.iter_mut().enumerate() {
        let mut mask = 0u8;
        for (w, &weight) in MASK_WEIGHTS.iter().enumerate() {
            mask = mask.wrapping_add(digest[(i + w) & 15].wrapping_mul(weight));
        }
        *byte = byte.wrapping_sub(mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn generated_rotor_is_consistent() {
        let rotor = generate_random_rotor(&mut thread_rng());
        assert!(rotor.is_consistent());
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut rng = thread_rng();
        let mut digest = [0u8; 16];
        rng.fill(&mut digest);
        let original = generate_random_rotor(&mut rng).forward;

        let mut table = original;
        encode(&mut table, &digest);
        assert_ne!(table, original);
        decode(&mut table, &digest);
        assert_eq!(table, original);
    }

    #[test]
    fn from_forward_derives_matching_reverse() {
        let rotor = generate_random_rotor(&mut thread_rng());
        let rebuilt = Rotor::from_forward(rotor.forward);
        assert_eq!(rebuilt.reverse, rotor.reverse);
    }
}
