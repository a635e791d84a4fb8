//! Byte-granular, position-addressable stream cipher used by safefs.
//!
//! This crate has no knowledge of files, mounts, or the on-disk header
//! format — it is the pure-computation core, the same way `glibc-rs-core`
//! carries no shared mutable state. Every function here is safe, allocates
//! no hidden state, and is deterministic given its inputs.

#![deny(unsafe_code)]

pub mod keyschedule;
pub mod rotor;
pub mod stream;

pub use keyschedule::{derive_offsets, derive_rotor_digest, derive_safe_digest, Pin, PinError};
pub use rotor::{decode, derive_reverse, encode, generate_random_rotor, Rotor};
pub use stream::{decipher, encipher, Rounds};
