// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A named non-volatile namespace abstraction.
//!
//! No crate in this stack's ancestry wraps an embedded key-value store, so
//! this is modeled the way the spec's persisted-state section describes
//! it: one JSON document per namespace under a base directory, opened for
//! the duration of a single operation and released (via `MutexGuard` drop)
//! on every exit path, success or failure.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, StorageError};

/// A directory of namespaced key-value documents.
pub struct Nvs {
    base_dir: PathBuf,
    lock: Mutex<()>,
}

impl Nvs {
    /// Open (creating if needed) a namespace directory rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.base_dir.join(format!("{namespace}.json"))
    }

    fn read_namespace(&self, namespace: &str) -> Result<BTreeMap<String, Value>> {
        let path = self.path_for(namespace);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                StorageError::InvalidRecord(format!("{namespace}: {e}")).into()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::OpenFailed(namespace.to_string(), e.to_string()).into()),
        }
    }

    fn write_namespace(&self, namespace: &str, map: &BTreeMap<String, Value>) -> Result<()> {
        if let Err(e) = fs::create_dir_all(&self.base_dir) {
            return Err(StorageError::IoFailure(namespace.to_string(), e.to_string()).into());
        }
        let contents = serde_json::to_string(map)
            .map_err(|e| StorageError::IoFailure(namespace.to_string(), e.to_string()))?;
        fs::write(self.path_for(namespace), contents)
            .map_err(|e| StorageError::IoFailure(namespace.to_string(), e.to_string()))?;
        Ok(())
    }

    /// Read a single key as a raw JSON value. Scoped to one operation: the
    /// lock is held only for the duration of this call.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock();
        let map = self.read_namespace(namespace)?;
        Ok(map.get(key).cloned())
    }

    /// Write a single key as a raw JSON value.
    pub fn set(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_namespace(namespace)?;
        map.insert(key.to_string(), value);
        self.write_namespace(namespace, &map)
    }

    /// Remove every key in `namespace`.
    pub fn clear(&self, namespace: &str) -> Result<()> {
        let _guard = self.lock.lock();
        self.write_namespace(namespace, &BTreeMap::new())
    }

    /// Location this namespace would be persisted to, for diagnostics.
    pub fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.path_for(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let nvs = Nvs::new(dir.path());
        nvs.set("wifi_creds", "ssid", Value::String("lab-net".into()))
            .unwrap();
        let value = nvs.get("wifi_creds", "ssid").unwrap();
        assert_eq!(value, Some(Value::String("lab-net".into())));
    }

    #[test]
    fn test_missing_namespace_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let nvs = Nvs::new(dir.path());
        assert_eq!(nvs.get("nope", "k").unwrap(), None);
    }

    #[test]
    fn test_clear_removes_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let nvs = Nvs::new(dir.path());
        nvs.set("mcd_cache", "channel", Value::from(6)).unwrap();
        nvs.clear("mcd_cache").unwrap();
        assert_eq!(nvs.get("mcd_cache", "channel").unwrap(), None);
    }
}
