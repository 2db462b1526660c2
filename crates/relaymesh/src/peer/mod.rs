// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The set of known remote nodes (§3.4, §4.2) and the observer events
//! emitted about them.

pub mod events;
pub mod table;

pub use events::Event;
pub use table::{
    PeerRecord, PeerTable, UpsertFields, CLEANUP_HORIZON_MS, DEFAULT_CAPACITY, OFFLINE_TIMEOUT_MS,
};
