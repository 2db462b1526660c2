// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observer events emitted by the core onto a bounded channel.
//!
//! One enum replaces the many `on_X` callback pointers of the legacy
//! design: subscribers poll a channel instead of being wired in by
//! function pointer.

use crate::wire::{Address, ConnectivityReport, Handshake};

/// Something the core wants an observer to know about.
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer was seen for the first time, or came back online.
    PeerDiscovered(Address),
    /// A peer transitioned from online to offline.
    PeerLost(Address),
    /// A peer reported a relay's state.
    RelayStatus {
        /// Reporting peer.
        from: Address,
        /// Relay index.
        relay: u8,
        /// Reported on/off state.
        on: bool,
    },
    /// A handshake response arrived.
    HandshakeReply {
        /// Responding peer.
        from: Address,
        /// The decoded handshake payload.
        handshake: Handshake,
    },
    /// A connectivity report arrived.
    ConnectivityReport {
        /// Reporting peer.
        from: Address,
        /// The decoded report.
        report: ConnectivityReport,
    },
    /// An advisory error payload arrived.
    PeerError {
        /// Reporting peer.
        from: Address,
        /// Advisory message text.
        message: String,
    },
    /// A generic acknowledgment arrived.
    Ack {
        /// Acknowledging peer.
        from: Address,
    },
    /// The `AutoCommManager` changed state.
    StateChanged {
        /// Name of the state entered.
        state: &'static str,
    },
    /// A recovery attempt at some level finished.
    RecoveryOutcome {
        /// Recovery level name.
        level: &'static str,
        /// Whether the attempt succeeded.
        success: bool,
    },
}
