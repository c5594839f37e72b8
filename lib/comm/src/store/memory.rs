// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process [`Store`] backed by a mutex-guarded map.
//!
//! Every mutation wakes all waiters; `wait` re-checks its key set under the
//! lock, so a waiter can never miss a key that was published before it went
//! to sleep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{parse_counter, Store};
use crate::{CommError, Result};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    published: Condvar,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently present. Test hook for the protocol's
    /// store-vacated post-condition.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn all_present(entries: &HashMap<String, Vec<u8>>, keys: &[String]) -> bool {
        keys.iter().all(|k| entries.contains_key(k))
    }
}

impl Store for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_owned(), value.to_vec());
        self.published.notify_all();
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| CommError::KeyNotFound(key.to_owned()))
    }

    fn check(&self, keys: &[String]) -> Result<bool> {
        let entries = self.entries.lock();
        Ok(Self::all_present(&entries, keys))
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.lock();
        let next = match entries.get(key) {
            Some(raw) => parse_counter(key, raw)? + delta,
            None => delta,
        };
        entries.insert(key.to_owned(), next.to_string().into_bytes());
        self.published.notify_all();
        Ok(next)
    }

    fn delete_key(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.remove(key);
        self.published.notify_all();
        Ok(())
    }

    fn wait(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock();
        while !Self::all_present(&entries, keys) {
            self.published.wait(&mut entries);
        }
        Ok(())
    }

    fn wait_timeout(&self, keys: &[String], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        while !Self::all_present(&entries, keys) {
            if self.published.wait_until(&mut entries, deadline).timed_out() {
                let missing = keys
                    .iter()
                    .find(|k| !entries.contains_key(*k))
                    .cloned()
                    .unwrap_or_default();
                return Err(CommError::Timeout {
                    key: missing,
                    waited: timeout,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("a", b"hello").unwrap();
        assert_eq!(store.get("a").unwrap(), b"hello");
    }

    #[test]
    fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert!(matches!(store.get("nope"), Err(CommError::KeyNotFound(_))));
    }

    #[test]
    fn test_check_requires_all_keys() {
        let store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        let both = vec!["a".to_string(), "b".to_string()];
        assert!(!store.check(&both).unwrap());
        store.set("b", b"2").unwrap();
        assert!(store.check(&both).unwrap());
    }

    #[test]
    fn test_add_creates_then_increments() {
        let store = MemoryStore::new();
        assert_eq!(store.add("count", 1).unwrap(), 1);
        assert_eq!(store.add("count", 1).unwrap(), 2);
        assert_eq!(store.add("count", 3).unwrap(), 5);
        // counters are stored as their decimal string form
        assert_eq!(store.get("count").unwrap(), b"5");
    }

    #[test]
    fn test_delete_key_is_idempotent() {
        let store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        store.delete_key("a").unwrap();
        store.delete_key("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let store = Arc::new(MemoryStore::new());
        let waiter = {
            let store = store.clone();
            std::thread::spawn(move || store.wait(&["late".to_string()]))
        };
        std::thread::sleep(Duration::from_millis(20));
        store.set("late", b"x").unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_wait_returns_immediately_when_present() {
        let store = MemoryStore::new();
        store.set("a", b"1").unwrap();
        store.wait(&["a".to_string()]).unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let store = MemoryStore::new();
        let err = store
            .wait_timeout(&["never".to_string()], Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, CommError::Timeout { .. }));
    }
}
