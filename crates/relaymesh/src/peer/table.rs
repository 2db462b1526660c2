// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `PeerTable`: the set of known remote nodes, keyed by address.

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;

use crate::wire::Address;

use super::events::Event;

/// How long a peer may go unseen before it is marked offline.
pub const OFFLINE_TIMEOUT_MS: u64 = 120_000;
/// How long an offline peer lingers before being dropped entirely.
pub const CLEANUP_HORIZON_MS: u64 = 30 * 60_000;
/// Default table capacity (§3.4).
pub const DEFAULT_CAPACITY: usize = 10;

/// One known remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Primary key.
    pub address: Address,
    /// Human-readable name, if known.
    pub name: String,
    /// Self-declared device type string.
    pub device_type: String,
    /// Liveness flag.
    pub online: bool,
    /// Monotonic ms of the last valid frame received.
    pub last_seen_ms: u64,
    /// Most recent RSSI sample, in dBm.
    pub rssi_dbm: i32,
    /// Self-declared relay output count.
    pub relay_count: u8,
    /// Monotonic ms a ping was last sent to this peer (0 = none pending).
    pub last_ping_sent_ms: u64,
    /// Most recently measured round-trip time, in ms.
    pub last_latency_ms: u64,
}

impl PeerRecord {
    fn new(address: Address, now: u64) -> Self {
        Self {
            address,
            name: String::new(),
            device_type: String::new(),
            online: true,
            last_seen_ms: now,
            rssi_dbm: 0,
            relay_count: 0,
            last_ping_sent_ms: 0,
            last_latency_ms: 0,
        }
    }
}

/// Optional fields supplied to [`PeerTable::upsert`].
#[derive(Debug, Clone, Default)]
pub struct UpsertFields<'a> {
    /// Peer's self-declared name.
    pub name: Option<&'a str>,
    /// Peer's self-declared device type.
    pub device_type: Option<&'a str>,
    /// Most recent RSSI sample.
    pub rssi_dbm: Option<i32>,
    /// Self-declared relay output count.
    pub relay_count: Option<u8>,
}

struct Inner {
    records: Vec<PeerRecord>,
    rotation_cursor: usize,
    capacity: usize,
}

impl Inner {
    fn find(&self, addr: Address) -> Option<usize> {
        self.records.iter().position(|r| r.address == addr)
    }
}

/// The set of known remote nodes, protected by a single mutex per the
/// concurrency model in §5: every public operation takes the lock and
/// releases it before returning, rotation cursor advancement included.
pub struct PeerTable {
    inner: Mutex<Inner>,
    events: Option<Sender<Event>>,
}

impl PeerTable {
    /// Create an empty table with the default capacity and no event sink.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty table with an explicit capacity bound.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::with_capacity(capacity),
                rotation_cursor: 0,
                capacity,
            }),
            events: None,
        }
    }

    /// Attach an event sink; subsequent edge-triggered events (peer lost)
    /// are published here on a best-effort basis.
    pub fn with_events(mut self, sender: Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    fn publish(&self, event: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Create or refresh a record for `addr`. Always marks the peer online
    /// and bumps `last_seen_ms`. `capacity` is not strictly enforced
    /// against new addresses beyond the bound -- insertion past capacity
    /// is dropped (oldest entries are retained) since callers are expected
    /// to run `cleanup` on a regular cadence.
    pub fn upsert(&self, addr: Address, now: u64, fields: UpsertFields<'_>) -> PeerRecord {
        let mut inner = self.inner.lock();
        let idx = match inner.find(addr) {
            Some(i) => i,
            None => {
                if inner.records.len() >= inner.capacity {
                    // Table full: touch the oldest entry instead of growing.
                    0
                } else {
                    inner.records.push(PeerRecord::new(addr, now));
                    inner.records.len() - 1
                }
            }
        };

        let rec = &mut inner.records[idx];
        rec.online = true;
        rec.last_seen_ms = now;
        if let Some(name) = fields.name {
            rec.name = name.to_string();
        }
        if let Some(dt) = fields.device_type {
            rec.device_type = dt.to_string();
        }
        if let Some(rssi) = fields.rssi_dbm {
            rec.rssi_dbm = rssi;
        }
        if let Some(count) = fields.relay_count {
            rec.relay_count = count;
        }
        rec.clone()
    }

    /// Mark every record whose `last_seen_ms` is older than
    /// [`OFFLINE_TIMEOUT_MS`] as offline; emits one [`Event::PeerLost`] per
    /// online-to-offline transition.
    pub fn mark_offline_if_stale(&self, now: u64) {
        let mut transitioned = Vec::new();
        {
            let mut inner = self.inner.lock();
            for rec in &mut inner.records {
                if rec.online && now.saturating_sub(rec.last_seen_ms) > OFFLINE_TIMEOUT_MS {
                    rec.online = false;
                    transitioned.push(rec.address);
                }
            }
        }
        for addr in transitioned {
            self.publish(Event::PeerLost(addr));
        }
    }

    /// Remove records offline for longer than [`CLEANUP_HORIZON_MS`].
    pub fn cleanup(&self, now: u64) {
        let mut inner = self.inner.lock();
        inner.records.retain(|rec| {
            rec.online || now.saturating_sub(rec.last_seen_ms) <= CLEANUP_HORIZON_MS
        });
    }

    /// Round-robin over currently-eligible records (online, or offline for
    /// no more than [`OFFLINE_TIMEOUT_MS`]), advancing the internal cursor.
    /// Insertions mid-round do not repeat already-visited peers within the
    /// same round, since the cursor walks a snapshot index range.
    pub fn next_for_ping_rotation(&self, now: u64) -> Option<PeerRecord> {
        let mut inner = self.inner.lock();
        let len = inner.records.len();
        if len == 0 {
            return None;
        }

        for _ in 0..len {
            let idx = inner.rotation_cursor % len;
            inner.rotation_cursor = (inner.rotation_cursor + 1) % len;
            let rec = &inner.records[idx];
            let eligible = rec.online || now.saturating_sub(rec.last_seen_ms) <= OFFLINE_TIMEOUT_MS;
            if eligible {
                return Some(rec.clone());
            }
        }
        None
    }

    /// Record a ping send for `addr` at time `now`.
    pub fn record_ping_sent(&self, addr: Address, now: u64) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.find(addr) {
            inner.records[idx].last_ping_sent_ms = now;
        }
    }

    /// Record a pong arrival: computes RTT from the matching
    /// `last_ping_sent_ms` (if any) and clears it.
    pub fn record_rtt(&self, addr: Address, pong_ms: u64) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.find(addr) {
            let rec = &mut inner.records[idx];
            if rec.last_ping_sent_ms > 0 {
                rec.last_latency_ms = pong_ms.saturating_sub(rec.last_ping_sent_ms);
                rec.last_ping_sent_ms = 0;
            }
        }
    }

    /// Snapshot of every known record, in insertion order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.inner.lock().records.clone()
    }

    /// Look up a single record by address.
    pub fn get(&self, addr: Address) -> Option<PeerRecord> {
        let inner = self.inner.lock();
        inner.find(addr).map(|i| inner.records[i].clone())
    }

    /// Look up a record by its declared name (first match, insertion order).
    pub fn find_by_name(&self, name: &str) -> Option<PeerRecord> {
        let inner = self.inner.lock();
        inner.records.iter().find(|r| r.name == name).cloned()
    }

    /// Count of currently-online peers.
    pub fn online_count(&self) -> usize {
        self.inner.lock().records.iter().filter(|r| r.online).count()
    }

    /// Total record count.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// True if the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
