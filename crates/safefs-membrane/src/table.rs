//! The open-file table: maps a file handle to the per-file cipher state
//! that was established when the file was opened or created.
//!
//! The original implementation (an intrusive doubly-linked list walked
//! under one global mutex) is replaced here with a handle-keyed `HashMap`
//! behind one `parking_lot::Mutex` — same serialization semantics, no raw
//! pointers. Per-entry state is immutable after insertion, so readers that
//! already hold a cloned [`OpenFile`] never contend with the table lock.

use std::collections::HashMap;

use parking_lot::Mutex;
use safefs_cipher::Rotor;

/// Per-file cipher state, established at `open`/`create` time and held
/// until `release`.
#[derive(Clone)]
pub struct OpenFile {
    pub salt: [u8; 4],
    pub rotor_digest: [u8; 16],
    pub rotor: Rotor,
}

/// Handle-keyed, mutex-guarded collection of [`OpenFile`] entries.
#[derive(Default)]
pub struct OpenFileTable {
    entries: Mutex<HashMap<u64, OpenFile>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        OpenFileTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a freshly-opened file's state. If `handle` is already
    /// present (the host bridge reusing a descriptor without a matching
    /// `release`), the existing entry is kept and returned unchanged.
    pub fn add(&self, handle: u64, entry: OpenFile) -> OpenFile {
        let mut table = self.entries.lock();
        if let Some(existing) = table.get(&handle) {
            tracing::warn!(handle, "open-file table: reused handle, keeping existing entry");
            return existing.clone();
        }
        table.insert(handle, entry.clone());
        entry
    }

    /// Look up a handle's cipher state. Cloned out from under the lock so
    /// callers never hold the table mutex while doing cipher work.
    pub fn find(&self, handle: u64) -> Option<OpenFile> {
        self.entries.lock().get(&handle).cloned()
    }

    /// Remove a handle's entry, e.g. on `release`.
    pub fn remove(&self, handle: u64) {
        self.entries.lock().remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safefs_cipher::rotor::generate_random_rotor;
    use rand::thread_rng;

    fn sample_entry() -> OpenFile {
        OpenFile {
            salt: [1, 2, 3, 4],
            rotor_digest: [0; 16],
            rotor: generate_random_rotor(&mut thread_rng()),
        }
    }

    #[test]
    fn add_then_find_round_trips() {
        let table = OpenFileTable::new();
        let entry = sample_entry();
        table.add(7, entry.clone());
        let found = table.find(7).expect("entry present");
        assert_eq!(found.salt, entry.salt);
    }

    #[test]
    fn find_missing_handle_returns_none() {
        let table = OpenFileTable::new();
        assert!(table.find(99).is_none());
    }

    #[test]
    fn add_duplicate_handle_keeps_first_entry() {
        let table = OpenFileTable::new();
        let first = sample_entry();
        table.add(1, first.clone());
        let mut second = sample_entry();
        second.salt = [9, 9, 9, 9];
        let returned = table.add(1, second);
        assert_eq!(returned.salt, first.salt);
        assert_eq!(table.find(1).unwrap().salt, first.salt);
    }

    #[test]
    fn remove_deletes_entry() {
        let table = OpenFileTable::new();
        table.add(3, sample_entry());
        table.remove(3);
        assert!(table.find(3).is_none());
    }
}
