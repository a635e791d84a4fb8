//! Mount-global shared state for safefs: the state established once at
//! mount time ([`state::MountState`]) and the per-handle cipher state
//! established on each `open`/`create` ([`table::OpenFileTable`]).
//!
//! Nothing in this crate touches a filesystem path or an FDs; it only
//! tracks the key material and concurrency structures that the request
//! layer builds on.

#![deny(unsafe_code)]

pub mod state;
pub mod table;

pub use state::MountState;
pub use table::{OpenFile, OpenFileTable};
