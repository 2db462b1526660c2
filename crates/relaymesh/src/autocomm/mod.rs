// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `AutoCommManager` (§4.7): the top-level connection state machine --
//! bootstrap, heartbeat/health scoring, and four-level graded recovery.
//!
//! Every transition is timeout-driven rather than interrupt-driven: `tick`
//! is called on a fixed cadence from the main loop and compares the current
//! time against a deadline recorded when the state was entered, the same
//! pattern [`crate::relay::RelayController::tick`] and
//! [`crate::peer::PeerTable::mark_offline_if_stale`] use elsewhere in this
//! crate. Recovery escalation performs its level's action once at entry and
//! then polls for a fresh peer reply on each subsequent tick, rather than
//! blocking the caller for the whole timeout.

pub mod health;

pub use health::{compute_health, HealthInputs, HEALTHY_THRESHOLD, UNHEALTHY_THRESHOLD};

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;

use crate::clock::Clock;
use crate::credentials::CredentialStore;
use crate::discovery::{ChannelDiscovery, DiscoveryResult};
use crate::error::Result;
use crate::peer::{Event, PeerTable};
use crate::transport::Transport;
use crate::wire::{Address, Frame, MsgKind, Role, WireCodec};

/// Default radio channel before a Slave has synced to the Master's channel.
pub const DEFAULT_CHANNEL: u8 = 1;
/// Cadence of the discovery retry while waiting in [`State::DiscoveryActive`].
pub const DISCOVERY_INTERVAL_MS: u64 = 30_000;
/// Cadence of the Master's credential broadcast while onboarding Slaves.
pub const CRED_BROADCAST_INTERVAL_MS: u64 = 60_000;
/// Maximum credential broadcast attempts before giving up on a cycle.
pub const CRED_BROADCAST_MAX_RETRIES: u32 = 3;
/// Heartbeat broadcast cadence while connected.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Ping rotation step; each peer is pinged roughly every `n_peers * step`.
pub const PING_ROTATION_STEP_MS: u64 = 6_000;
/// How often the health score is recomputed.
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;
/// Per-level recovery timeouts (§4.7).
pub const SOFT_RECOVERY_TIMEOUT_MS: u64 = 5_000;
pub const MEDIUM_RECOVERY_TIMEOUT_MS: u64 = 15_000;
pub const HARD_RECOVERY_TIMEOUT_MS: u64 = 30_000;
pub const FULL_RECOVERY_TIMEOUT_MS: u64 = 60_000;
/// Longest silence tolerated from the primary peer while `Connected` or
/// `Monitoring` before recovery is forced regardless of the health score.
pub const MASTER_HEARTBEAT_TIMEOUT_MS: u64 = 45_000;

/// States of the connection/recovery machine, in the order the diagram
/// in §4.7 lays them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    WifiConnecting,
    RadioInit,
    WaitingSlaves,
    WaitingCreds,
    CredsBroadcast,
    ChannelSync,
    DiscoveryActive,
    Connected,
    Monitoring,
    SoftRecovery,
    MediumRecovery,
    HardRecovery,
    FullRecovery,
}

impl State {
    fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::WifiConnecting => "wifi_connecting",
            Self::RadioInit => "radio_init",
            Self::WaitingSlaves => "waiting_slaves",
            Self::WaitingCreds => "waiting_creds",
            Self::CredsBroadcast => "creds_broadcast",
            Self::ChannelSync => "channel_sync",
            Self::DiscoveryActive => "discovery_active",
            Self::Connected => "connected",
            Self::Monitoring => "monitoring",
            Self::SoftRecovery => "soft_recovery",
            Self::MediumRecovery => "medium_recovery",
            Self::HardRecovery => "hard_recovery",
            Self::FullRecovery => "full_recovery",
        }
    }

    fn is_recovery(self) -> bool {
        matches!(
            self,
            Self::SoftRecovery | Self::MediumRecovery | Self::HardRecovery | Self::FullRecovery
        )
    }
}

/// Wi-Fi uplink collaborator (out of scope per §1; this trait is the seam).
pub trait WifiConnector: Send + Sync {
    /// Attempt to (re-)establish the uplink.
    fn connect(&self) -> Result<()>;
    /// Whether the uplink is currently believed to be up.
    fn is_connected(&self) -> bool;
}

/// A `WifiConnector` for host development where no real uplink exists.
#[derive(Debug, Default)]
pub struct NullWifi;

impl WifiConnector for NullWifi {
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct StateInner {
    current: State,
    entered_at_ms: u64,
}

#[derive(Default)]
struct Counters {
    msgs_sent: u64,
    msgs_received: u64,
    msgs_lost: u64,
}

/// Top-level connection state machine (§4.7): bootstrap sequencing,
/// health scoring, and four-level graded recovery.
pub struct AutoCommManager {
    role: Role,
    local: Address,
    state: Mutex<StateInner>,
    transport: Arc<dyn Transport>,
    peers: Arc<PeerTable>,
    discovery: Arc<ChannelDiscovery>,
    creds: Arc<CredentialStore>,
    wifi: Arc<dyn WifiConnector>,
    clock: Arc<dyn Clock>,
    events: Option<Sender<Event>>,
    msg_id: AtomicU32,
    rssi_dbm: AtomicI32,
    latency_ms: AtomicU64,
    last_pong_ms: AtomicU64,
    counters: Mutex<Counters>,
    last_health_score: AtomicU8,
    last_health_check_ms: AtomicU64,
    last_discovery_attempt_ms: AtomicU64,
    last_cred_broadcast_ms: AtomicU64,
    cred_broadcast_attempts: AtomicU32,
    recovery_attempts: AtomicU64,
    successful_recoveries: AtomicU64,
}

impl AutoCommManager {
    /// Build a manager for `role`, owning the collaborators it drives.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: Role,
        local: Address,
        transport: Arc<dyn Transport>,
        peers: Arc<PeerTable>,
        discovery: Arc<ChannelDiscovery>,
        creds: Arc<CredentialStore>,
        wifi: Arc<dyn WifiConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            role,
            local,
            state: Mutex::new(StateInner {
                current: State::Init,
                entered_at_ms: now,
            }),
            transport,
            peers,
            discovery,
            creds,
            wifi,
            clock,
            events: None,
            msg_id: AtomicU32::new(1),
            rssi_dbm: AtomicI32::new(0),
            latency_ms: AtomicU64::new(0),
            last_pong_ms: AtomicU64::new(0),
            counters: Mutex::new(Counters::default()),
            last_health_score: AtomicU8::new(100),
            last_health_check_ms: AtomicU64::new(0),
            last_discovery_attempt_ms: AtomicU64::new(0),
            last_cred_broadcast_ms: AtomicU64::new(0),
            cred_broadcast_attempts: AtomicU32::new(0),
            recovery_attempts: AtomicU64::new(0),
            successful_recoveries: AtomicU64::new(0),
        }
    }

    /// Attach an event sink for state-change and recovery-outcome events.
    pub fn with_events(mut self, sender: Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state.lock().current
    }

    /// Total recovery attempts across all levels.
    pub fn recovery_attempts(&self) -> u64 {
        self.recovery_attempts.load(Ordering::SeqCst)
    }

    /// Total recoveries that reached `Connected` again.
    pub fn successful_recoveries(&self) -> u64 {
        self.successful_recoveries.load(Ordering::SeqCst)
    }

    /// Most recently computed health score.
    pub fn health_score(&self) -> u8 {
        self.last_health_score.load(Ordering::SeqCst)
    }

    fn publish(&self, event: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    fn transition(&self, to: State, now: u64) {
        {
            let mut state = self.state.lock();
            state.current = to;
            state.entered_at_ms = now;
        }
        self.publish(Event::StateChanged { state: to.label() });
    }

    fn entered_at(&self) -> u64 {
        self.state.lock().entered_at_ms
    }

    /// Note a message handed to the transport.
    pub fn record_message_sent(&self) {
        self.counters.lock().msgs_sent += 1;
    }

    /// Note a message accepted from the transport.
    pub fn record_message_received(&self) {
        self.counters.lock().msgs_received += 1;
    }

    /// Note a message presumed lost (sent with no reply).
    pub fn record_message_lost(&self) {
        self.counters.lock().msgs_lost += 1;
    }

    /// Record the most recent RSSI sample from the primary peer.
    pub fn record_rssi(&self, dbm: i32) {
        self.rssi_dbm.store(dbm, Ordering::SeqCst);
    }

    /// Record the most recent measured round-trip latency.
    pub fn record_latency(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Record that a pong (or any liveness reply) arrived at `now`.
    pub fn record_pong(&self, now: u64) {
        self.last_pong_ms.store(now, Ordering::SeqCst);
    }

    fn health_inputs(&self, now: u64) -> HealthInputs {
        let counters = self.counters.lock();
        let last_pong = self.last_pong_ms.load(Ordering::SeqCst);
        HealthInputs {
            rssi_dbm: self.rssi_dbm.load(Ordering::SeqCst),
            msgs_sent: counters.msgs_sent,
            msgs_received: counters.msgs_received,
            msgs_lost: counters.msgs_lost,
            latency_ms: self.latency_ms.load(Ordering::SeqCst),
            last_pong_age_ms: now.saturating_sub(last_pong),
        }
    }

    fn broadcast_frame(&self, kind: MsgKind) -> Vec<u8> {
        let msg_id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now_ms() as u32;
        let frame = Frame::new(kind, self.local, Address::BROADCAST, msg_id, now, &[]);
        let mut buf = vec![0u8; crate::wire::FRAME_SIZE];
        WireCodec::encode(&frame, &mut buf).expect("fixed-size frame always encodes");
        buf
    }

    fn send_broadcast(&self, kind: MsgKind) {
        let bytes = self.broadcast_frame(kind);
        let _ = self.transport.send(Address::BROADCAST, &bytes);
        self.record_message_sent();
    }

    /// True if any peer record was touched at or after `since_ms`.
    fn has_fresh_reply(&self, since_ms: u64) -> bool {
        self.peers.snapshot().iter().any(|p| p.last_seen_ms >= since_ms)
    }

    /// Drive the deterministic startup sequence: connect Wi-Fi, init the
    /// radio at [`DEFAULT_CHANNEL`], then enter the role-specific waiting
    /// state. Subsequent progress (`WaitingSlaves` onward) is driven by
    /// repeated [`Self::tick`] calls from the main loop.
    pub async fn bootstrap(&self) -> Result<()> {
        let now = self.clock.now_ms();
        self.transition(State::WifiConnecting, now);
        self.wifi.connect()?;

        let now = self.clock.now_ms();
        self.transition(State::RadioInit, now);
        self.transport.set_channel(DEFAULT_CHANNEL)?;

        let now = self.clock.now_ms();
        match self.role {
            Role::Master => self.transition(State::WaitingSlaves, now),
            Role::Slave => self.transition(State::WaitingCreds, now),
        }
        Ok(())
    }

    /// One non-blocking control-loop step; call at a steady cadence
    /// (the datagram task's ~10 Hz loop is a natural driver).
    pub async fn tick(&self, now: u64) {
        match self.state() {
            State::WaitingSlaves => self.tick_waiting_slaves(now),
            State::WaitingCreds => self.tick_waiting_creds(now),
            State::ChannelSync => self.tick_channel_sync(now),
            State::DiscoveryActive => self.tick_discovery_active(now).await,
            State::Connected | State::Monitoring => self.tick_connected(now),
            s if s.is_recovery() => self.tick_recovery(s, now),
            _ => {}
        }
    }

    fn tick_waiting_slaves(&self, now: u64) {
        if self.peers.online_count() > 0 {
            self.transition(State::Connected, now);
            return;
        }

        let last = self.last_cred_broadcast_ms.load(Ordering::SeqCst);
        let attempts = self.cred_broadcast_attempts.load(Ordering::SeqCst);
        if now.saturating_sub(last) >= CRED_BROADCAST_INTERVAL_MS && attempts < CRED_BROADCAST_MAX_RETRIES {
            self.transition(State::CredsBroadcast, now);
            self.send_broadcast(MsgKind::WifiCredentials);
            self.last_cred_broadcast_ms.store(now, Ordering::SeqCst);
            self.cred_broadcast_attempts.fetch_add(1, Ordering::SeqCst);
            self.transition(State::WaitingSlaves, now);
        }
    }

    fn tick_waiting_creds(&self, now: u64) {
        if matches!(self.creds.has(), Ok(true)) {
            self.transition(State::ChannelSync, now);
        }
    }

    fn tick_channel_sync(&self, now: u64) {
        let Ok(Some(creds)) = self.creds.load() else {
            return;
        };
        if self.transport.set_channel(creds.channel).is_ok() {
            self.transition(State::DiscoveryActive, now);
        }
    }

    async fn tick_discovery_active(&self, now: u64) {
        let last = self.last_discovery_attempt_ms.load(Ordering::SeqCst);
        if now.saturating_sub(last) < DISCOVERY_INTERVAL_MS && last != 0 {
            return;
        }
        self.last_discovery_attempt_ms.store(now, Ordering::SeqCst);

        match self.discovery.run().await {
            DiscoveryResult::Success { .. } => {
                self.transition(State::Connected, self.clock.now_ms());
            }
            DiscoveryResult::TransportError | DiscoveryResult::RadioError => {
                self.transition(State::Init, self.clock.now_ms());
            }
            DiscoveryResult::Timeout | DiscoveryResult::Aborted => {}
        }
    }

    fn tick_connected(&self, now: u64) {
        // A silent peer trips recovery on its own, independent of the
        // health score: the score only penalizes silence by up to 20
        // points, which alone never crosses `UNHEALTHY_THRESHOLD`. The
        // timeout clock starts at whichever is more recent between the
        // last pong and the moment this state was entered, so a fresh
        // `Connected` transition isn't immediately treated as stale.
        let last_contact = self.last_pong_ms.load(Ordering::SeqCst).max(self.entered_at());
        if now.saturating_sub(last_contact) >= MASTER_HEARTBEAT_TIMEOUT_MS {
            self.enter_recovery(State::SoftRecovery, now);
            return;
        }

        let last = self.last_health_check_ms.load(Ordering::SeqCst);
        if now.saturating_sub(last) < HEALTH_CHECK_INTERVAL_MS && last != 0 {
            return;
        }
        self.last_health_check_ms.store(now, Ordering::SeqCst);

        let score = compute_health(self.health_inputs(now));
        self.last_health_score.store(score, Ordering::SeqCst);

        if score < UNHEALTHY_THRESHOLD {
            self.enter_recovery(State::SoftRecovery, now);
        } else if self.state() == State::Connected && score < HEALTHY_THRESHOLD {
            self.transition(State::Monitoring, now);
        } else if self.state() == State::Monitoring && score >= HEALTHY_THRESHOLD {
            self.transition(State::Connected, now);
        }
    }

    fn enter_recovery(&self, level: State, now: u64) {
        self.transition(level, now);
        self.recovery_attempts.fetch_add(1, Ordering::SeqCst);
        match level {
            State::SoftRecovery => self.send_broadcast(MsgKind::Ping),
            State::MediumRecovery => self.send_broadcast(MsgKind::Broadcast),
            State::HardRecovery => {
                let channel = self.transport.current_channel();
                let _ = self.transport.set_channel(channel);
                self.send_broadcast(MsgKind::Broadcast);
            }
            State::FullRecovery => {
                let _ = self.wifi.connect();
                let channel = self.transport.current_channel();
                let _ = self.transport.set_channel(channel);
                self.send_broadcast(MsgKind::Broadcast);
            }
            _ => unreachable!("enter_recovery called with a non-recovery state"),
        }
    }

    fn recovery_timeout_ms(level: State) -> u64 {
        match level {
            State::SoftRecovery => SOFT_RECOVERY_TIMEOUT_MS,
            State::MediumRecovery => MEDIUM_RECOVERY_TIMEOUT_MS,
            State::HardRecovery => HARD_RECOVERY_TIMEOUT_MS,
            State::FullRecovery => FULL_RECOVERY_TIMEOUT_MS,
            _ => 0,
        }
    }

    fn next_recovery_level(level: State) -> Option<State> {
        match level {
            State::SoftRecovery => Some(State::MediumRecovery),
            State::MediumRecovery => Some(State::HardRecovery),
            State::HardRecovery => Some(State::FullRecovery),
            State::FullRecovery => None,
            _ => None,
        }
    }

    fn recovery_succeeded(&self, level: State, since_ms: u64) -> bool {
        match level {
            State::SoftRecovery => self.last_pong_ms.load(Ordering::SeqCst) >= since_ms,
            _ => self.has_fresh_reply(since_ms),
        }
    }

    fn tick_recovery(&self, level: State, now: u64) {
        let entered_at = self.entered_at();
        if self.recovery_succeeded(level, entered_at) {
            self.successful_recoveries.fetch_add(1, Ordering::SeqCst);
            self.publish(Event::RecoveryOutcome {
                level: level.label(),
                success: true,
            });
            self.transition(State::Connected, now);
            return;
        }

        if now.saturating_sub(entered_at) < Self::recovery_timeout_ms(level) {
            return;
        }

        self.publish(Event::RecoveryOutcome {
            level: level.label(),
            success: false,
        });
        match Self::next_recovery_level(level) {
            Some(next) => self.enter_recovery(next, now),
            None => self.transition(State::Init, now),
        }
    }
}
