// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `CredentialStore`: Wi-Fi SSID/passphrase/channel persistence (§4.4).

use std::sync::Arc;

use crate::error::Result;
use crate::wire::WifiCredentials;

use super::nvs::Nvs;

const NAMESPACE: &str = "wifi_creds";
const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";
const KEY_CHANNEL: &str = "channel";

/// Persists and validates Wi-Fi credentials.
///
/// All operations are infallible from the caller's point of view except an
/// underlying I/O failure; a record that fails validation on read (empty
/// SSID, or a channel outside `1..=13`) is treated as "no credentials"
/// rather than surfaced as an error.
pub struct CredentialStore {
    nvs: Arc<Nvs>,
}

impl CredentialStore {
    /// Build a store backed by the given namespace directory.
    pub fn new(nvs: Arc<Nvs>) -> Self {
        Self { nvs }
    }

    /// Persist `creds`.
    pub fn save(&self, creds: &WifiCredentials) -> Result<()> {
        self.nvs.set(NAMESPACE, KEY_SSID, creds.ssid.clone().into())?;
        self.nvs
            .set(NAMESPACE, KEY_PASSWORD, creds.passphrase.clone().into())?;
        self.nvs
            .set(NAMESPACE, KEY_CHANNEL, (creds.channel as u64).into())?;
        Ok(())
    }

    /// Load previously-saved credentials, validating on read.
    pub fn load(&self) -> Result<Option<WifiCredentials>> {
        let ssid = self.nvs.get(NAMESPACE, KEY_SSID)?.and_then(|v| v.as_str().map(str::to_string));
        let passphrase = self
            .nvs
            .get(NAMESPACE, KEY_PASSWORD)?
            .and_then(|v| v.as_str().map(str::to_string));
        let channel = self.nvs.get(NAMESPACE, KEY_CHANNEL)?.and_then(|v| v.as_u64());

        let (ssid, passphrase, channel) = match (ssid, passphrase, channel) {
            (Some(s), Some(p), Some(c)) => (s, p, c),
            _ => return Ok(None),
        };

        if ssid.is_empty() || !(1..=13).contains(&channel) {
            return Ok(None);
        }

        Ok(Some(WifiCredentials {
            ssid,
            passphrase,
            channel: channel as u8,
        }))
    }

    /// Remove any persisted credentials.
    pub fn clear(&self) -> Result<()> {
        self.nvs.clear(NAMESPACE)
    }

    /// True if a valid credential record is currently persisted.
    pub fn has(&self) -> Result<bool> {
        Ok(self.load()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        let dir = tempfile::tempdir().unwrap();
        CredentialStore::new(Arc::new(Nvs::new(dir.into_path())))
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = store();
        let creds = WifiCredentials {
            ssid: "lab-net".to_string(),
            passphrase: "hunter2".to_string(),
            channel: 6,
        };
        store.save(&creds).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, creds);
        assert!(store.has().unwrap());
    }

    #[test]
    fn test_empty_ssid_treated_as_absent() {
        let store = store();
        let creds = WifiCredentials {
            ssid: String::new(),
            passphrase: "x".to_string(),
            channel: 6,
        };
        store.save(&creds).unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(!store.has().unwrap());
    }

    #[test]
    fn test_invalid_channel_treated_as_absent() {
        let store = store();
        let creds = WifiCredentials {
            ssid: "lab-net".to_string(),
            passphrase: "x".to_string(),
            channel: 0,
        };
        store.save(&creds).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let store = store();
        store
            .save(&WifiCredentials {
                ssid: "a".to_string(),
                passphrase: "b".to_string(),
                channel: 1,
            })
            .unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
