// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `CommandBridge` (§4.6, Master only): pulls pending rows from the
//! `CloudQueue`, dispatches them as peer commands, and reflects their
//! outcome back onto the row.

pub mod mapping;

pub use mapping::RelayMapping;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::peer::PeerTable;
use crate::wire::{Address, RelayAction, RelayCommand};

/// Default polling cadence.
pub const POLL_INTERVAL_MS: u64 = 5_000;
/// Maximum rows pulled per poll.
pub const N_MAX: usize = 10;
/// Maximum send attempts per row.
pub const MAX_RETRIES: u32 = 3;
/// Delay between send retries.
pub const COMMAND_RETRY_DELAY_MS: u64 = 150;

/// Lifecycle state of a bridge row. Transitions only flow
/// `Pending -> Sent -> {Completed, Failed}`; the bridge never reopens a
/// terminal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    /// Not yet dispatched.
    Pending,
    /// Dispatched, awaiting confirmation.
    Sent,
    /// Confirmed applied.
    Completed,
    /// Dispatch or confirmation failed.
    Failed,
}

/// One command row from the external cloud queue (§3.7 projection).
#[derive(Debug, Clone)]
pub struct Row {
    /// Row identifier.
    pub id: i64,
    /// Target relay index.
    pub relay: u8,
    /// Requested action, as the external string enum (`on`, `off`,
    /// `toggle`, `on_forever`).
    pub action: String,
    /// Timer length in seconds.
    pub duration_s: u32,
    /// Current status.
    pub status: RowStatus,
    /// Human-readable failure reason, if `status == Failed`.
    pub error: Option<String>,
}

/// External interface to the cloud-hosted command queue. Every operation
/// is idempotent from the caller's perspective.
#[async_trait]
pub trait CloudQueue: Send + Sync {
    /// Fetch up to `max` rows in `Pending` status for `device_id`, ordered
    /// by creation time ascending.
    async fn list_pending(&self, device_id: &str, max: usize) -> Result<Vec<Row>>;

    /// Mark a row `Sent`.
    async fn mark_sent(&self, row_id: i64) -> Result<()>;

    /// Mark a row `Completed`.
    async fn mark_completed(&self, row_id: i64) -> Result<()>;

    /// Mark a row `Failed` with a human-readable `reason`.
    async fn mark_failed(&self, row_id: i64, reason: &str) -> Result<()>;
}

/// Narrow interface `CommandBridge` dispatches through; implemented by
/// [`crate::datagram::DatagramTask`] so the bridge never touches the
/// transport or codec directly.
#[async_trait]
pub trait CommandDispatch: Send + Sync {
    /// Send a relay command to `target` (broadcast if `None`).
    async fn send_relay_command(&self, target: Option<Address>, cmd: RelayCommand) -> Result<()>;
}

fn parse_action(s: &str) -> Option<RelayAction> {
    match s {
        "on" => Some(RelayAction::On),
        "off" => Some(RelayAction::Off),
        "toggle" => Some(RelayAction::Toggle),
        "on_forever" => Some(RelayAction::OnForever),
        _ => None,
    }
}

/// Counters exposed by the bridge for the `bridge_stats` operator command.
#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeStats {
    /// Total rows inspected.
    pub processed: u64,
    /// Rows successfully dispatched.
    pub sent: u64,
    /// Rows confirmed applied.
    pub completed: u64,
    /// Rows that failed validation, dispatch, or confirmation.
    pub failed: u64,
}

/// Pulls pending rows from a [`CloudQueue`] and drives them to completion
/// over the peer mesh.
pub struct CommandBridge {
    device_id: String,
    queue: Arc<dyn CloudQueue>,
    dispatch: Arc<dyn CommandDispatch>,
    peers: Arc<PeerTable>,
    mapping: RelayMapping,
    pending: Mutex<HashMap<(Option<Address>, u8), i64>>,
    enabled: AtomicBool,
    processed: AtomicU64,
    sent: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl CommandBridge {
    /// Build a bridge for `device_id`.
    pub fn new(
        device_id: impl Into<String>,
        queue: Arc<dyn CloudQueue>,
        dispatch: Arc<dyn CommandDispatch>,
        peers: Arc<PeerTable>,
        mapping: RelayMapping,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            queue,
            dispatch,
            peers,
            mapping,
            pending: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
            processed: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Disable polling (operator `bridge_disable`).
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Re-enable polling (operator `bridge_enable`).
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Whether the bridge currently polls.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Snapshot the bridge's counters.
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            processed: self.processed.load(Ordering::SeqCst),
            sent: self.sent.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Resolve `relay`'s configured peer; falls back to broadcast if no
    /// mapping is configured or the mapped peer is not currently online.
    fn resolve_target(&self, relay: u8) -> Option<Address> {
        let addr = self.mapping.get(relay).ok().flatten()?;
        let online = self.peers.get(addr).map(|p| p.online).unwrap_or(false);
        online.then_some(addr)
    }

    /// Run one poll cycle: fetch up to [`N_MAX`] pending rows and process
    /// each. No-op if the bridge is disabled.
    pub async fn poll_once(&self) {
        if !self.is_enabled() {
            return;
        }

        let rows = match self.queue.list_pending(&self.device_id, N_MAX).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "cloud queue poll failed");
                return;
            }
        };

        for row in rows {
            self.processed.fetch_add(1, Ordering::SeqCst);
            self.process_row(row).await;
        }
    }

    async fn process_row(&self, row: Row) {
        if row.relay as usize >= crate::relay::RELAY_COUNT {
            self.fail(row.id, "invalid relay number").await;
            return;
        }
        let Some(action) = parse_action(&row.action) else {
            self.fail(row.id, "invalid action").await;
            return;
        };

        let target = self.resolve_target(row.relay);
        let cmd = RelayCommand {
            relay: row.relay,
            action,
            duration_s: row.duration_s,
        };

        let mut last_err = None;
        let mut ok = false;
        for attempt in 0..MAX_RETRIES {
            match self.dispatch.send_relay_command(target, cmd).await {
                Ok(()) => {
                    ok = true;
                    break;
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(COMMAND_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        if !ok {
            self.fail(row.id, &last_err.unwrap_or_else(|| "send failed".to_string())).await;
            return;
        }

        self.sent.fetch_add(1, Ordering::SeqCst);
        let _ = self.queue.mark_sent(row.id).await;

        let idempotent_terminal = !matches!(action, RelayAction::On) || row.duration_s == 0;
        if idempotent_terminal {
            self.complete(row.id).await;
        } else {
            self.pending.lock().insert((target, row.relay), row.id);
        }
    }

    /// Feed a `RelayStatus` observation in: if it matches a pending row
    /// for `(from or broadcast, relay)`, the row is marked `Completed`.
    pub async fn on_relay_status(&self, from: Address, relay: u8, _on: bool) {
        let row_id = {
            let mut pending = self.pending.lock();
            pending
                .remove(&(Some(from), relay))
                .or_else(|| pending.remove(&(None, relay)))
        };
        if let Some(row_id) = row_id {
            self.complete(row_id).await;
        }
    }

    async fn complete(&self, row_id: i64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        let _ = self.queue.mark_completed(row_id).await;
    }

    async fn fail(&self, row_id: i64, reason: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let _ = self.queue.mark_failed(row_id, reason).await;
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeQueue {
        rows: StdMutex<Vec<Row>>,
        events: StdMutex<Vec<(i64, RowStatus, Option<String>)>>,
    }

    #[async_trait]
    impl CloudQueue for FakeQueue {
        async fn list_pending(&self, _device_id: &str, max: usize) -> Result<Vec<Row>> {
            let mut rows = self.rows.lock().unwrap();
            let taken: Vec<_> = rows
                .iter()
                .filter(|r| matches!(r.status, RowStatus::Pending))
                .take(max)
                .cloned()
                .collect();
            for row in &taken {
                if let Some(r) = rows.iter_mut().find(|r| r.id == row.id) {
                    r.status = RowStatus::Sent;
                }
            }
            Ok(taken)
        }
        async fn mark_sent(&self, row_id: i64) -> Result<()> {
            self.events.lock().unwrap().push((row_id, RowStatus::Sent, None));
            Ok(())
        }
        async fn mark_completed(&self, row_id: i64) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push((row_id, RowStatus::Completed, None));
            Ok(())
        }
        async fn mark_failed(&self, row_id: i64, reason: &str) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push((row_id, RowStatus::Failed, Some(reason.to_string())));
            Ok(())
        }
    }

    struct FakeDispatch {
        fail: AtomicBool,
    }

    #[async_trait]
    impl CommandDispatch for FakeDispatch {
        async fn send_relay_command(&self, _target: Option<Address>, _cmd: RelayCommand) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(crate::error::TransportError::SendRefused("no peer".into()).into())
            } else {
                Ok(())
            }
        }
    }

    fn bridge(queue: Arc<FakeQueue>, dispatch: Arc<FakeDispatch>) -> CommandBridge {
        let dir = tempfile::tempdir().unwrap();
        let nvs = Arc::new(crate::credentials::Nvs::new(dir.into_path()));
        CommandBridge::new(
            "device-1",
            queue,
            dispatch,
            Arc::new(PeerTable::new()),
            RelayMapping::new(nvs),
        )
    }

    #[tokio::test]
    async fn test_invalid_relay_fails_without_sending() {
        let queue = Arc::new(FakeQueue {
            rows: StdMutex::new(vec![Row {
                id: 1,
                relay: 9,
                action: "on".into(),
                duration_s: 10,
                status: RowStatus::Pending,
                error: None,
            }]),
            events: StdMutex::new(Vec::new()),
        });
        let dispatch = Arc::new(FakeDispatch {
            fail: AtomicBool::new(false),
        });
        let bridge = bridge(Arc::clone(&queue), dispatch);
        bridge.poll_once().await;

        let stats = bridge.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 0);
        let events = queue.events.lock().unwrap();
        assert!(matches!(events[0], (1, RowStatus::Failed, _)));
    }

    #[tokio::test]
    async fn test_on_forever_completes_immediately_on_send() {
        let queue = Arc::new(FakeQueue {
            rows: StdMutex::new(vec![Row {
                id: 2,
                relay: 0,
                action: "on_forever".into(),
                duration_s: 0,
                status: RowStatus::Pending,
                error: None,
            }]),
            events: StdMutex::new(Vec::new()),
        });
        let dispatch = Arc::new(FakeDispatch {
            fail: AtomicBool::new(false),
        });
        let bridge = bridge(Arc::clone(&queue), dispatch);
        bridge.poll_once().await;

        let stats = bridge.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_timed_on_waits_for_relay_status() {
        let queue = Arc::new(FakeQueue {
            rows: StdMutex::new(vec![Row {
                id: 3,
                relay: 3,
                action: "on".into(),
                duration_s: 10,
                status: RowStatus::Pending,
                error: None,
            }]),
            events: StdMutex::new(Vec::new()),
        });
        let dispatch = Arc::new(FakeDispatch {
            fail: AtomicBool::new(false),
        });
        let bridge = bridge(Arc::clone(&queue), dispatch);
        bridge.poll_once().await;
        assert_eq!(bridge.stats().completed, 0);

        bridge.on_relay_status(Address::BROADCAST, 3, true).await;
        assert_eq!(bridge.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_send_failure_retries_then_fails() {
        let queue = Arc::new(FakeQueue {
            rows: StdMutex::new(vec![Row {
                id: 4,
                relay: 1,
                action: "off".into(),
                duration_s: 0,
                status: RowStatus::Pending,
                error: None,
            }]),
            events: StdMutex::new(Vec::new()),
        });
        let dispatch = Arc::new(FakeDispatch {
            fail: AtomicBool::new(true),
        });
        let bridge = bridge(Arc::clone(&queue), dispatch);
        bridge.poll_once().await;
        assert_eq!(bridge.stats().failed, 1);
    }
}
