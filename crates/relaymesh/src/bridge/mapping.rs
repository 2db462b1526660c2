// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Optional persistent `relay index -> peer address` routing table.
//!
//! §9 leaves this as an open question: the legacy source only ever
//! broadcasts. This crate resolves it by adding a configurable mapping
//! (see `DESIGN.md`); a relay index with no configured mapping still falls
//! back to broadcast, preserving the legacy behavior as the default.

use std::sync::Arc;

use crate::credentials::Nvs;
use crate::error::Result;
use crate::wire::Address;

const NAMESPACE: &str = "relay_routes";

/// Maps relay indices to the peer address that owns them.
pub struct RelayMapping {
    nvs: Arc<Nvs>,
}

impl RelayMapping {
    /// Build a mapping store backed by `nvs`.
    pub fn new(nvs: Arc<Nvs>) -> Self {
        Self { nvs }
    }

    fn key(relay: u8) -> String {
        format!("relay_{relay}")
    }

    /// Configure `relay` to route to `addr`.
    pub fn set(&self, relay: u8, addr: Address) -> Result<()> {
        self.nvs
            .set(NAMESPACE, &Self::key(relay), addr.to_string().into())
    }

    /// Remove `relay`'s mapping, reverting it to broadcast.
    pub fn unset(&self, relay: u8) -> Result<()> {
        // `Nvs` has no per-key delete; persisting an empty string is
        // treated as "unmapped" by `get`.
        self.nvs.set(NAMESPACE, &Self::key(relay), "".into())
    }

    /// Resolve `relay`'s configured peer, if any.
    pub fn get(&self, relay: u8) -> Result<Option<Address>> {
        let value = self.nvs.get(NAMESPACE, &Self::key(relay))?;
        let Some(value) = value.and_then(|v| v.as_str().map(str::to_string)) else {
            return Ok(None);
        };
        Ok(parse_address(&value))
    }
}

fn parse_address(s: &str) -> Option<Address> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for b in bytes.iter_mut() {
        *b = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Address::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = RelayMapping::new(Arc::new(Nvs::new(dir.into_path())));
        let addr = Address::new([1, 2, 3, 4, 5, 6]);

        assert_eq!(mapping.get(3).unwrap(), None);
        mapping.set(3, addr).unwrap();
        assert_eq!(mapping.get(3).unwrap(), Some(addr));
        mapping.unset(3).unwrap();
        assert_eq!(mapping.get(3).unwrap(), None);
    }
}
