// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `DatagramTask` (§4.8): the single cooperative loop that owns the wire
//! codec, the peer table, and per-kind dispatch.
//!
//! The radio receive callback registered with the [`Transport`] does the
//! minimum an interrupt-like context is allowed to do: push raw bytes onto
//! a bounded channel and return. Everything else -- decode, staleness,
//! dispatch, periodic duties -- runs from [`DatagramTask::drain_once`] and
//! [`DatagramTask::tick_periodic`], called from the owning loop.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::autocomm::AutoCommManager;
use crate::bridge::{CommandBridge, CommandDispatch};
use crate::clock::Clock;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::peer::{Event, PeerTable, UpsertFields};
use crate::relay::{RelayController, RelayOutput};
use crate::transport::Transport;
use crate::wire::{
    Address, ConnectivityReport, DeviceInfo, ErrorPayload, Frame, Handshake, MsgKind, PayloadCodec,
    RelayAction, RelayCommand, RelayStatus, Role, WifiCredentials, WireCodec, FRAME_SIZE,
    PAYLOAD_MAX,
};

/// Bounded receive queue depth (§4.8).
pub const RECEIVE_QUEUE_CAPACITY: usize = 10;
/// Heartbeat broadcast cadence.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Ping rotation step.
pub const PING_INTERVAL_MS: u64 = 6_000;
/// Offline/cleanup sweep cadence.
pub const CLEANUP_INTERVAL_MS: u64 = 60_000;

const PROTO_VERSION: u8 = 1;

/// Receive-side counters exposed by the `task_status` operator command.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatagramStats {
    /// Frames dropped at decode, staleness, or secondary-checksum checks.
    pub rx_invalid: u64,
    /// Frames dropped because the receive queue was full.
    pub rx_dropped: u64,
    /// Frames successfully decoded and dispatched.
    pub rx_dispatched: u64,
}

/// Owns the transport-facing receive queue, the peer table, the relay
/// controller, and per-kind dispatch; implements [`CommandDispatch`] so
/// [`CommandBridge`] never touches the transport or codec directly.
pub struct DatagramTask {
    local: Address,
    role: Role,
    device_name: String,
    device_type: String,
    transport: Arc<dyn Transport>,
    peers: Arc<PeerTable>,
    relays: Mutex<RelayController>,
    creds: Arc<CredentialStore>,
    bridge: Mutex<Option<Arc<CommandBridge>>>,
    autocomm: Mutex<Option<Arc<AutoCommManager>>>,
    clock: Arc<dyn Clock>,
    events: Option<Sender<Event>>,
    queue_tx: Sender<(Address, Vec<u8>)>,
    queue_rx: Mutex<Receiver<(Address, Vec<u8>)>>,
    msg_id: AtomicU32,
    session_id: u32,
    last_heartbeat_ms: AtomicU64,
    last_ping_ms: AtomicU64,
    last_cleanup_ms: AtomicU64,
    rx_invalid: AtomicU64,
    rx_dropped: Arc<AtomicU64>,
    rx_dispatched: AtomicU64,
}

impl DatagramTask {
    /// Build a task for `local` and register its receive hook with
    /// `transport`. The hook only ever touches a channel sender and a
    /// shared counter, honoring the interrupt-like receive contract (§5).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: Address,
        role: Role,
        device_name: impl Into<String>,
        device_type: impl Into<String>,
        transport: Arc<dyn Transport>,
        peers: Arc<PeerTable>,
        relays: RelayController,
        creds: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(RECEIVE_QUEUE_CAPACITY);
        let rx_dropped = Arc::new(AtomicU64::new(0));

        let dropped_for_cb = Arc::clone(&rx_dropped);
        let tx_for_cb = tx.clone();
        transport.on_receive(Arc::new(move |from: Address, bytes: &[u8]| {
            if tx_for_cb.try_send((from, bytes.to_vec())).is_err() {
                dropped_for_cb.fetch_add(1, Ordering::SeqCst);
            }
        }));

        Self {
            local,
            role,
            device_name: device_name.into(),
            device_type: device_type.into(),
            transport,
            peers,
            relays: Mutex::new(relays),
            creds,
            bridge: Mutex::new(None),
            autocomm: Mutex::new(None),
            clock,
            events: None,
            queue_tx: tx,
            queue_rx: Mutex::new(rx),
            msg_id: AtomicU32::new(1),
            session_id: rand::random(),
            last_heartbeat_ms: AtomicU64::new(0),
            last_ping_ms: AtomicU64::new(0),
            last_cleanup_ms: AtomicU64::new(0),
            rx_invalid: AtomicU64::new(0),
            rx_dropped,
            rx_dispatched: AtomicU64::new(0),
        }
    }

    /// Attach an event sink for observer notifications.
    pub fn with_events(mut self, sender: Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Wire in the command bridge (Master only) so `RelayStatus` replies
    /// can close out pending cloud rows.
    pub fn attach_bridge(&self, bridge: Arc<CommandBridge>) {
        *self.bridge.lock() = Some(bridge);
    }

    /// Wire in the connection-health manager so real traffic (pongs,
    /// connectivity reports, send outcomes) drives its health score
    /// instead of leaving it at whatever default it started with.
    pub fn attach_autocomm(&self, autocomm: Arc<AutoCommManager>) {
        *self.autocomm.lock() = Some(autocomm);
    }

    /// This node's own address.
    pub fn local_address(&self) -> Address {
        self.local
    }

    /// Shared handle to the peer table.
    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    /// Snapshot the receive-side counters.
    pub fn stats(&self) -> DatagramStats {
        DatagramStats {
            rx_invalid: self.rx_invalid.load(Ordering::SeqCst),
            rx_dropped: self.rx_dropped.load(Ordering::SeqCst),
            rx_dispatched: self.rx_dispatched.load(Ordering::SeqCst),
        }
    }

    fn publish(&self, event: Event) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    fn next_msg_id(&self) -> u32 {
        self.msg_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Auto-adds `target` as a known peer before a unicast send if it is
    /// not already registered (§4.8). Broadcast sends never touch the
    /// peer-add path.
    fn build_and_send(&self, kind: MsgKind, target: Address, msg_id: u32, payload: &[u8]) -> Result<()> {
        if !target.is_broadcast() && self.peers.get(target).is_none() {
            let _ = self.transport.add_peer(target, self.transport.current_channel());
        }
        let now = self.clock.now_ms() as u32;
        let frame = Frame::new(kind, self.local, target, msg_id, now, payload);
        let mut buf = vec![0u8; FRAME_SIZE];
        WireCodec::encode(&frame, &mut buf)?;
        let result = self.transport.send(target, &buf);
        if let Some(autocomm) = self.autocomm.lock().clone() {
            match &result {
                Ok(()) => autocomm.record_message_sent(),
                Err(_) => autocomm.record_message_lost(),
            }
        }
        result
    }

    fn send(&self, kind: MsgKind, target: Address, payload: &[u8]) -> Result<()> {
        let id = self.next_msg_id();
        self.build_and_send(kind, target, id, payload)
    }

    /// Drain up to [`RECEIVE_QUEUE_CAPACITY`] queued frames, dispatching
    /// each. Call at ~10 Hz from the owning loop.
    pub async fn drain_once(&self, now: u64) {
        for _ in 0..RECEIVE_QUEUE_CAPACITY {
            let item = {
                let mut rx = self.queue_rx.lock();
                rx.try_recv()
            };
            match item {
                Ok((_from, bytes)) => self.dispatch_frame(&bytes, now).await,
                Err(_) => break,
            }
        }
    }

    async fn dispatch_frame(&self, bytes: &[u8], now: u64) {
        let frame = match WireCodec::decode(bytes) {
            Ok(f) => f,
            Err(_) => {
                self.rx_invalid.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        if WireCodec::is_stale(frame.timestamp, now as u32) {
            self.rx_invalid.fetch_add(1, Ordering::SeqCst);
            return;
        }

        self.peers.upsert(frame.sender, now, UpsertFields::default());
        self.rx_dispatched.fetch_add(1, Ordering::SeqCst);
        if let Some(autocomm) = self.autocomm.lock().clone() {
            autocomm.record_message_received();
        }

        match frame.kind {
            MsgKind::Ping => {
                let _ = self.build_and_send(MsgKind::Pong, frame.sender, frame.msg_id, &[]);
            }
            MsgKind::Pong => {
                self.peers.record_rtt(frame.sender, now);
                if let Some(autocomm) = self.autocomm.lock().clone() {
                    autocomm.record_pong(now);
                    if let Some(peer) = self.peers.get(frame.sender) {
                        if peer.last_latency_ms > 0 {
                            autocomm.record_latency(peer.last_latency_ms);
                        }
                    }
                }
            }
            MsgKind::Broadcast | MsgKind::DeviceInfo => self.handle_announce(&frame, now),
            MsgKind::RelayCommand => self.handle_relay_command(&frame, now),
            MsgKind::RelayStatus => self.handle_relay_status(&frame).await,
            MsgKind::WifiCredentials => self.handle_wifi_credentials(&frame),
            MsgKind::HandshakeRequest => self.handle_handshake_request(&frame, now),
            MsgKind::HandshakeResponse => self.handle_handshake_response(&frame),
            MsgKind::ConnectivityCheck => self.handle_connectivity_check(frame.sender, now),
            MsgKind::ConnectivityReport => self.handle_connectivity_report(&frame),
            MsgKind::Error => self.handle_error_payload(&frame),
            MsgKind::Ack => self.publish(Event::Ack { from: frame.sender }),
        }
    }

    fn handle_announce(&self, frame: &Frame, now: u64) {
        if frame.kind == MsgKind::DeviceInfo {
            if let Ok(info) = WireCodec::payload_as::<DeviceInfo>(frame) {
                self.peers.upsert(
                    frame.sender,
                    now,
                    UpsertFields {
                        name: Some(&info.device_name),
                        device_type: Some(&info.device_type),
                        relay_count: Some(info.relay_count),
                        ..Default::default()
                    },
                );
            }
        }
        if self.role == Role::Slave {
            let _ = self.transport.add_peer(frame.sender, self.transport.current_channel());
        }
        self.publish(Event::PeerDiscovered(frame.sender));
    }

    fn handle_relay_command(&self, frame: &Frame, now: u64) {
        let Ok(cmd) = WireCodec::payload_as::<RelayCommand>(frame) else {
            return;
        };
        let applied = self.relays.lock().apply(cmd.relay, cmd.action, cmd.duration_s, now);
        let Ok(state) = applied else {
            return;
        };
        self.reply_relay_status(frame.sender, cmd.relay, state, now);
    }

    fn reply_relay_status(&self, to: Address, relay: u8, state: RelayOutput, now: u64) {
        let remaining = self.relays.lock().remaining_s(relay, now).unwrap_or(0);
        let name = self.relays.lock().name(relay).unwrap_or("").to_string();
        let status = RelayStatus {
            relay,
            on: state.on,
            has_timer: state.timer_s > 0,
            remaining_s: remaining,
            name,
        };
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = status.encode(&mut buf);
        let _ = self.send(MsgKind::RelayStatus, to, &buf[..n]);
    }

    async fn handle_relay_status(&self, frame: &Frame) {
        let Ok(status) = WireCodec::payload_as::<RelayStatus>(frame) else {
            return;
        };
        let bridge = self.bridge.lock().clone();
        if let Some(bridge) = bridge {
            bridge.on_relay_status(frame.sender, status.relay, status.on).await;
        }
        self.publish(Event::RelayStatus {
            from: frame.sender,
            relay: status.relay,
            on: status.on,
        });
    }

    fn handle_wifi_credentials(&self, frame: &Frame) {
        let Ok(creds) = WireCodec::payload_as::<WifiCredentials>(frame) else {
            return;
        };
        let _ = self.creds.save(&creds);
    }

    fn handle_handshake_request(&self, frame: &Frame, now: u64) {
        let Ok(req) = WireCodec::payload_as::<Handshake>(frame) else {
            return;
        };
        let response = Handshake {
            session_id: req.session_id,
            timestamp: now as u32,
            role: self.role,
            device_name: self.device_name.clone(),
            proto_version: PROTO_VERSION,
            wifi_up: true,
            validation: 0,
        };
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = response.encode(&mut buf);
        let _ = self.send(MsgKind::HandshakeResponse, frame.sender, &buf[..n]);
    }

    fn handle_handshake_response(&self, frame: &Frame) {
        if let Ok(handshake) = WireCodec::payload_as::<Handshake>(frame) {
            self.publish(Event::HandshakeReply {
                from: frame.sender,
                handshake,
            });
        }
    }

    fn handle_connectivity_check(&self, sender: Address, now: u64) {
        let rssi = self.peers.get(sender).map(|p| p.rssi_dbm).unwrap_or(0);
        let report = ConnectivityReport {
            session_id: self.session_id,
            timestamp: now as u32,
            wifi_up: true,
            rssi_dbm: rssi,
            channel: self.transport.current_channel(),
            uptime_ms: now as u32,
            free_mem: 0,
            msg_count: 0,
            operational: true,
        };
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = report.encode(&mut buf);
        let _ = self.send(MsgKind::ConnectivityReport, sender, &buf[..n]);
    }

    fn handle_connectivity_report(&self, frame: &Frame) {
        if let Ok(report) = WireCodec::payload_as::<ConnectivityReport>(frame) {
            // `DeviceInfo` carries no signal-strength field on this wire
            // format, so a peer's self-reported `rssi_dbm` in its
            // `ConnectivityReport` is the only real-traffic RSSI sample
            // available to feed the health score.
            if let Some(autocomm) = self.autocomm.lock().clone() {
                autocomm.record_rssi(report.rssi_dbm);
            }
            self.publish(Event::ConnectivityReport {
                from: frame.sender,
                report,
            });
        }
    }

    fn handle_error_payload(&self, frame: &Frame) {
        if let Ok(err) = WireCodec::payload_as::<ErrorPayload>(frame) {
            self.publish(Event::PeerError {
                from: frame.sender,
                message: err.message,
            });
        }
    }

    /// Run the three periodic duties (§4.8): heartbeat, ping rotation,
    /// offline/cleanup sweep. Call once per control-loop iteration; each
    /// duty no-ops until its own interval has elapsed.
    pub fn tick_periodic(&self, now: u64) {
        self.maybe_heartbeat(now);
        self.maybe_ping(now);
        self.maybe_cleanup(now);
    }

    fn maybe_heartbeat(&self, now: u64) {
        let last = self.last_heartbeat_ms.load(Ordering::SeqCst);
        if last != 0 && now.saturating_sub(last) < HEARTBEAT_INTERVAL_MS {
            return;
        }
        self.last_heartbeat_ms.store(now, Ordering::SeqCst);
        let _ = self.send(MsgKind::Broadcast, Address::BROADCAST, &[]);
    }

    fn maybe_ping(&self, now: u64) {
        let last = self.last_ping_ms.load(Ordering::SeqCst);
        if last != 0 && now.saturating_sub(last) < PING_INTERVAL_MS {
            return;
        }
        self.last_ping_ms.store(now, Ordering::SeqCst);
        if let Some(peer) = self.peers.next_for_ping_rotation(now) {
            let id = self.next_msg_id();
            if self.build_and_send(MsgKind::Ping, peer.address, id, &[]).is_ok() {
                self.peers.record_ping_sent(peer.address, now);
            }
        }
    }

    fn maybe_cleanup(&self, now: u64) {
        let last = self.last_cleanup_ms.load(Ordering::SeqCst);
        if last != 0 && now.saturating_sub(last) < CLEANUP_INTERVAL_MS {
            return;
        }
        self.last_cleanup_ms.store(now, Ordering::SeqCst);
        self.peers.mark_offline_if_stale(now);
        self.peers.cleanup(now);
    }

    /// Tick the relay controller's auto-off timers, emitting a
    /// `RelayStatus` observer event per firing.
    pub fn relay_tick(&self, now: u64) {
        let changes = self.relays.lock().tick(now);
        for change in changes {
            self.publish(Event::RelayStatus {
                from: self.local,
                relay: change.index,
                on: change.on,
            });
        }
    }

    /// Current state of relay `index`, for CLI/status queries.
    pub fn relay_state(&self, index: u8) -> Result<RelayOutput> {
        self.relays.lock().state(index)
    }

    /// Apply a relay action locally (operator CLI path on a Slave).
    pub fn apply_relay_locally(&self, index: u8, action: RelayAction, duration_s: u32, now: u64) -> Result<RelayOutput> {
        self.relays.lock().apply(index, action, duration_s, now)
    }

    /// Send a single `Ping` to `addr` and record the send time for RTT.
    pub fn ping_peer(&self, addr: Address) -> Result<()> {
        let now = self.clock.now_ms();
        let id = self.next_msg_id();
        self.build_and_send(MsgKind::Ping, addr, id, &[])?;
        self.peers.record_ping_sent(addr, now);
        Ok(())
    }

    /// Unicast a relay command to `addr`.
    pub fn send_relay_command_to(&self, addr: Address, cmd: RelayCommand) -> Result<()> {
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = cmd.encode(&mut buf);
        self.send(MsgKind::RelayCommand, addr, &buf[..n])
    }

    /// Broadcast a relay command to every peer (`relay on_all`/`off_all`).
    pub fn broadcast_relay_command(&self, cmd: RelayCommand) -> Result<()> {
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = cmd.encode(&mut buf);
        self.send(MsgKind::RelayCommand, Address::BROADCAST, &buf[..n])
    }

    /// Start a handshake with `addr`.
    pub fn start_handshake(&self, addr: Address) -> Result<()> {
        let req = Handshake {
            session_id: self.session_id,
            timestamp: self.clock.now_ms() as u32,
            role: self.role,
            device_name: self.device_name.clone(),
            proto_version: PROTO_VERSION,
            wifi_up: true,
            validation: 0,
        };
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = req.encode(&mut buf);
        self.send(MsgKind::HandshakeRequest, addr, &buf[..n])
    }

    /// Ask `addr` for a fresh connectivity report.
    pub fn request_connectivity(&self, addr: Address) -> Result<()> {
        self.send(MsgKind::ConnectivityCheck, addr, &[])
    }

    /// Force an immediate discovery broadcast (operator `discover`).
    pub fn force_discovery(&self) -> Result<()> {
        self.send(MsgKind::Broadcast, Address::BROADCAST, &[])
    }
}

#[async_trait]
impl CommandDispatch for DatagramTask {
    async fn send_relay_command(&self, target: Option<Address>, cmd: RelayCommand) -> Result<()> {
        let dest = target.unwrap_or(Address::BROADCAST);
        let mut buf = [0u8; PAYLOAD_MAX];
        let n = cmd.encode(&mut buf);
        self.send(MsgKind::RelayCommand, dest, &buf[..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autocomm::{AutoCommManager, NullWifi, State, MASTER_HEARTBEAT_TIMEOUT_MS};
    use crate::clock::TestClock;
    use crate::credentials::Nvs;
    use crate::discovery::{ChannelCache, ChannelDiscovery};
    use crate::relay::NullExpander;
    use std::sync::Mutex as StdMutex;

    type RecvCallback = Arc<dyn Fn(Address, &[u8]) + Send + Sync>;

    struct FakeTransport {
        channel: std::sync::atomic::AtomicU8,
        recv_cb: StdMutex<Option<RecvCallback>>,
        sent: StdMutex<Vec<(Address, Vec<u8>)>>,
        added_peers: StdMutex<Vec<Address>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                channel: std::sync::atomic::AtomicU8::new(6),
                recv_cb: StdMutex::new(None),
                sent: StdMutex::new(Vec::new()),
                added_peers: StdMutex::new(Vec::new()),
            }
        }

        fn deliver(&self, from: Address, bytes: &[u8]) {
            let cb = self.recv_cb.lock().unwrap().clone().expect("receive hook not registered");
            cb(from, bytes);
        }
    }

    impl Transport for FakeTransport {
        fn set_channel(&self, channel: u8) -> crate::error::Result<()> {
            self.channel.store(channel, Ordering::SeqCst);
            Ok(())
        }
        fn add_peer(&self, addr: Address, _channel: u8) -> crate::error::Result<()> {
            self.added_peers.lock().unwrap().push(addr);
            Ok(())
        }
        fn send(&self, addr: Address, bytes: &[u8]) -> crate::error::Result<()> {
            self.sent.lock().unwrap().push((addr, bytes.to_vec()));
            Ok(())
        }
        fn on_receive(&self, callback: RecvCallback) {
            *self.recv_cb.lock().unwrap() = Some(callback);
        }
        fn on_send_status(&self, _callback: Arc<dyn Fn(Address, bool) + Send + Sync>) {}
        fn current_channel(&self) -> u8 {
            self.channel.load(Ordering::SeqCst)
        }
    }

    fn frame_bytes(kind: MsgKind, sender: Address, target: Address, msg_id: u32, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let frame = Frame::new(kind, sender, target, msg_id, timestamp, payload);
        let mut buf = vec![0u8; FRAME_SIZE];
        WireCodec::encode(&frame, &mut buf).unwrap();
        buf
    }

    fn harness() -> (Arc<FakeTransport>, DatagramTask, Arc<TestClock>) {
        let transport = Arc::new(FakeTransport::new());
        let peers = Arc::new(PeerTable::new());
        let dir = tempfile::tempdir().unwrap();
        let creds = Arc::new(CredentialStore::new(Arc::new(Nvs::new(dir.into_path()))));
        let clock = Arc::new(TestClock::new());
        let task = DatagramTask::new(
            Address::new([1; 6]),
            Role::Slave,
            "slave-1",
            "relay-board",
            transport.clone(),
            peers,
            RelayController::new(Box::new(NullExpander)),
            creds,
            clock.clone(),
        );
        (transport, task, clock)
    }

    #[tokio::test]
    async fn test_ping_replies_with_pong() {
        let (transport, task, clock) = harness();
        let sender = Address::new([2; 6]);
        let bytes = frame_bytes(MsgKind::Ping, sender, Address::new([1; 6]), 7, 0, &[]);
        transport.deliver(sender, &bytes);

        task.drain_once(clock.now_ms()).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let decoded = WireCodec::decode(&sent[0].1).unwrap();
        assert_eq!(decoded.kind, MsgKind::Pong);
        assert_eq!(decoded.msg_id, 7);
    }

    #[tokio::test]
    async fn test_stale_frame_is_dropped_without_peer_upsert() {
        let (transport, task, clock) = harness();
        clock.set(100_000);
        let sender = Address::new([2; 6]);
        let bytes = frame_bytes(MsgKind::Ping, sender, Address::new([1; 6]), 1, 0, &[]);
        transport.deliver(sender, &bytes);

        task.drain_once(clock.now_ms()).await;

        assert_eq!(task.stats().rx_invalid, 1);
        assert_eq!(task.peers().len(), 0);
    }

    #[tokio::test]
    async fn test_relay_command_applies_and_replies_with_status() {
        let (transport, task, clock) = harness();
        let sender = Address::new([2; 6]);
        let mut cmd_buf = [0u8; PAYLOAD_MAX];
        let cmd = RelayCommand {
            relay: 2,
            action: RelayAction::On,
            duration_s: 10,
        };
        let n = cmd.encode(&mut cmd_buf);
        let bytes = frame_bytes(MsgKind::RelayCommand, sender, Address::new([1; 6]), 1, 0, &cmd_buf[..n]);
        transport.deliver(sender, &bytes);

        task.drain_once(clock.now_ms()).await;

        assert!(task.relay_state(2).unwrap().on);
        let sent = transport.sent.lock().unwrap();
        let decoded = WireCodec::decode(&sent[0].1).unwrap();
        assert_eq!(decoded.kind, MsgKind::RelayStatus);
        let status: RelayStatus = WireCodec::payload_as(&decoded).unwrap();
        assert_eq!(status.relay, 2);
        assert!(status.on);
        assert!(status.has_timer);
    }

    #[tokio::test]
    async fn test_auto_peer_add_on_unicast_send() {
        let (transport, task, _clock) = harness();
        let unknown = Address::new([9; 6]);
        task.ping_peer(unknown).unwrap();
        assert_eq!(transport.added_peers.lock().unwrap().as_slice(), &[unknown]);
    }

    #[test]
    fn test_heartbeat_emits_broadcast_after_interval() {
        let (transport, task, clock) = harness();
        task.tick_periodic(clock.now_ms());
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        task.tick_periodic(clock.now_ms());
        assert_eq!(transport.sent.lock().unwrap().len(), 1, "heartbeat should not re-fire inside the interval");

        clock.advance(HEARTBEAT_INTERVAL_MS + 1);
        task.tick_periodic(clock.now_ms());
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_command_dispatch_trait_broadcasts_when_no_target() {
        let (transport, task, _clock) = harness();
        let cmd = RelayCommand {
            relay: 0,
            action: RelayAction::Off,
            duration_s: 0,
        };
        task.send_relay_command(None, cmd).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        let decoded = WireCodec::decode(&sent[0].1).unwrap();
        assert!(decoded.target.is_broadcast());
        assert_eq!(decoded.kind, MsgKind::RelayCommand);
    }

    #[tokio::test]
    async fn test_incoming_pong_keeps_autocomm_connected_across_heartbeat_timeout() {
        let (transport, task, clock) = harness();
        let peers = Arc::clone(task.peers());
        let dir = tempfile::tempdir().unwrap();
        let nvs = Arc::new(Nvs::new(dir.into_path()));
        let cache = ChannelCache::new(Arc::clone(&nvs));
        let discovery = Arc::new(ChannelDiscovery::new(
            transport.clone() as Arc<dyn Transport>,
            Arc::clone(&peers),
            cache,
            clock.clone() as Arc<dyn Clock>,
            Address::new([1; 6]),
        ));
        let creds = Arc::new(CredentialStore::new(nvs));
        let autocomm = Arc::new(AutoCommManager::new(
            Role::Master,
            Address::new([1; 6]),
            transport.clone() as Arc<dyn Transport>,
            Arc::clone(&peers),
            discovery,
            creds,
            Arc::new(NullWifi),
            clock.clone() as Arc<dyn Clock>,
        ));
        task.attach_autocomm(Arc::clone(&autocomm));

        autocomm.bootstrap().await.unwrap();
        let sender = Address::new([2; 6]);
        peers.upsert(sender, clock.now_ms(), UpsertFields::default());
        autocomm.tick(clock.now_ms()).await;
        assert_eq!(autocomm.state(), State::Connected);

        clock.advance(MASTER_HEARTBEAT_TIMEOUT_MS - 1_000);
        let bytes = frame_bytes(MsgKind::Pong, sender, Address::new([1; 6]), 1, clock.now_ms() as u32, &[]);
        transport.deliver(sender, &bytes);
        task.drain_once(clock.now_ms()).await;

        clock.advance(2_000);
        autocomm.tick(clock.now_ms()).await;
        assert_eq!(
            autocomm.state(),
            State::Connected,
            "a pong observed through the datagram dispatch path should reset the heartbeat clock"
        );
    }
}
