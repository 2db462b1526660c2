// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer-to-peer control-plane core for a fleet of relay-driving
//! microcontroller nodes sharing a short-range 2.4 GHz datagram transport.
//!
//! A Master node coordinates up to ~10 Slave nodes; each Slave drives eight
//! binary outputs ("relays") and reports status back. The Master also
//! bridges commands from a remote cloud queue into the peer transport.
//! This crate is transport- and platform-agnostic: [`transport::Transport`],
//! [`relay::IoExpander`], [`autocomm::WifiConnector`], and
//! [`watchdog::WatchdogSink`] are the seams a host binary fills in with
//! concrete hardware or, for development, no-op stand-ins.

pub mod autocomm;
pub mod bridge;
pub mod clock;
pub mod credentials;
pub mod datagram;
pub mod discovery;
pub mod error;
pub mod peer;
pub mod relay;
pub mod transport;
pub mod watchdog;
pub mod wire;

pub use error::{Error, Result};
