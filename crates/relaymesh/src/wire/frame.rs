// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size datagram frame (§3.2 of the wire format).

use super::address::{Address, ADDR_LEN};
use crate::error::DecodeError;

/// Maximum payload body length.
pub const PAYLOAD_MAX: usize = 200;

/// Canonical on-wire frame size in bytes:
/// `kind(1) + sender(6) + target(6) + msg_id(4) + timestamp(4) + payload_len(1) + payload(200) + checksum(1)`.
pub const FRAME_SIZE: usize = 1 + ADDR_LEN + ADDR_LEN + 4 + 4 + 1 + PAYLOAD_MAX + 1;

/// Accepted deviation from [`FRAME_SIZE`] to tolerate implementation-dependent
/// alignment padding on the wire.
pub const SIZE_TOLERANCE: usize = 4;

/// Stale-message safety window in milliseconds. Advisory / liveness-only,
/// see the module docs on staleness in [`crate::datagram`].
pub const STALE_WINDOW_MS: u32 = 30_000;

/// Message type discriminant (stable wire values, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// Request a state change on one relay.
    RelayCommand = 0x01,
    /// Reported state of one relay.
    RelayStatus = 0x02,
    /// Self-description broadcast by a node.
    DeviceInfo = 0x03,
    /// Liveness probe.
    Ping = 0x04,
    /// Reply to a [`MsgKind::Ping`].
    Pong = 0x05,
    /// General-purpose broadcast / discovery announcement.
    Broadcast = 0x06,
    /// Generic acknowledgment.
    Ack = 0x07,
    /// Advisory textual error.
    Error = 0x08,
    /// Wi-Fi credentials being provisioned over the air.
    WifiCredentials = 0x09,
    /// First half of a handshake exchange.
    HandshakeRequest = 0x0A,
    /// Second half of a handshake exchange.
    HandshakeResponse = 0x0B,
    /// Request a fresh connectivity report.
    ConnectivityCheck = 0x0C,
    /// Liveness + link-quality snapshot.
    ConnectivityReport = 0x0D,
}

impl MsgKind {
    /// Decode a wire discriminant into a known kind.
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        Ok(match v {
            0x01 => Self::RelayCommand,
            0x02 => Self::RelayStatus,
            0x03 => Self::DeviceInfo,
            0x04 => Self::Ping,
            0x05 => Self::Pong,
            0x06 => Self::Broadcast,
            0x07 => Self::Ack,
            0x08 => Self::Error,
            0x09 => Self::WifiCredentials,
            0x0A => Self::HandshakeRequest,
            0x0B => Self::HandshakeResponse,
            0x0C => Self::ConnectivityCheck,
            0x0D => Self::ConnectivityReport,
            other => return Err(DecodeError::UnknownKind(other)),
        })
    }
}

/// A decoded (or about-to-be-encoded) datagram frame.
///
/// The payload is carried as a fixed 200-byte buffer plus an explicit
/// length; callers reinterpret the declared prefix through
/// [`super::codec::WireCodec::payload_as`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Message type.
    pub kind: MsgKind,
    /// Sender address.
    pub sender: Address,
    /// Destination address; [`Address::BROADCAST`] means "any receiver".
    pub target: Address,
    /// Monotonic per-sender counter (wrap allowed).
    pub msg_id: u32,
    /// Milliseconds since the sender's boot.
    pub timestamp: u32,
    /// Length of the meaningful payload prefix, `0..=200`.
    pub payload_len: u8,
    /// Payload body; bytes beyond `payload_len` are zero-filled.
    pub payload: [u8; PAYLOAD_MAX],
}

impl Frame {
    /// Build a frame with a payload encoded by the caller.
    pub fn new(
        kind: MsgKind,
        sender: Address,
        target: Address,
        msg_id: u32,
        timestamp: u32,
        payload_bytes: &[u8],
    ) -> Self {
        let mut payload = [0u8; PAYLOAD_MAX];
        let len = payload_bytes.len().min(PAYLOAD_MAX);
        payload[..len].copy_from_slice(&payload_bytes[..len]);
        Self {
            kind,
            sender,
            target,
            msg_id,
            timestamp,
            payload_len: len as u8,
            payload,
        }
    }

    /// The meaningful payload prefix.
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }

    /// True if this frame is addressed to everyone.
    pub fn is_broadcast(&self) -> bool {
        self.target.is_broadcast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_kind_roundtrip() {
        for raw in 0x01u8..=0x0D {
            let kind = MsgKind::from_u8(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
    }

    #[test]
    fn test_msg_kind_unknown() {
        assert_eq!(MsgKind::from_u8(0x99), Err(DecodeError::UnknownKind(0x99)));
    }

    #[test]
    fn test_frame_truncates_oversized_payload() {
        let big = [7u8; 300];
        let frame = Frame::new(
            MsgKind::Ack,
            Address::new([1, 2, 3, 4, 5, 6]),
            Address::BROADCAST,
            1,
            0,
            &big,
        );
        assert_eq!(frame.payload_len as usize, PAYLOAD_MAX);
    }
}
