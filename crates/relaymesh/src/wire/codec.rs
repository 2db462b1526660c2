// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pure encode/decode functions for the datagram frame.
//!
//! No allocation is required on the hot path: frames and payloads are
//! fixed-size stack values, the same shape as the RTPS header/submessage
//! encoders this crate is descended from.

use super::address::Address;
use super::frame::{Frame, MsgKind, FRAME_SIZE, PAYLOAD_MAX, SIZE_TOLERANCE, STALE_WINDOW_MS};
use super::payload::PayloadCodec;
use crate::error::DecodeError;

fn xor_fold(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Stateless encoder/decoder for the wire frame format.
pub struct WireCodec;

impl WireCodec {
    /// Encode `frame` into `buf`, writing exactly [`FRAME_SIZE`] bytes and
    /// returning that count. `buf` must be at least that long.
    pub fn encode(frame: &Frame, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if buf.len() < FRAME_SIZE {
            return Err(DecodeError::Size);
        }

        buf[0] = frame.kind as u8;
        buf[1..7].copy_from_slice(frame.sender.as_bytes());
        buf[7..13].copy_from_slice(frame.target.as_bytes());
        buf[13..17].copy_from_slice(&frame.msg_id.to_le_bytes());
        buf[17..21].copy_from_slice(&frame.timestamp.to_le_bytes());
        buf[21] = frame.payload_len;
        buf[22..22 + PAYLOAD_MAX].copy_from_slice(&frame.payload);

        let checksum = xor_fold(&buf[0..FRAME_SIZE - 1]);
        buf[FRAME_SIZE - 1] = checksum;

        Ok(FRAME_SIZE)
    }

    /// Decode a frame from `bytes`.
    ///
    /// `bytes.len()` must be within [`SIZE_TOLERANCE`] of [`FRAME_SIZE`];
    /// any larger deviation is `DecodeError::Size`. The checksum is
    /// verified over everything but its own trailing byte. The
    /// stale-timestamp check (§3.2) is the caller's responsibility since it
    /// needs the current clock.
    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        let len = bytes.len();
        let lo = FRAME_SIZE.saturating_sub(SIZE_TOLERANCE);
        let hi = FRAME_SIZE + SIZE_TOLERANCE;
        if len < lo || len > hi {
            return Err(DecodeError::Size);
        }
        // Minimum to hold the fixed header fields plus a checksum byte.
        if len < 23 {
            return Err(DecodeError::Size);
        }

        let checksum_idx = len - 1;
        let computed = xor_fold(&bytes[0..checksum_idx]);
        if computed != bytes[checksum_idx] {
            return Err(DecodeError::Checksum);
        }

        let kind = MsgKind::from_u8(bytes[0])?;

        let mut sender = [0u8; 6];
        sender.copy_from_slice(&bytes[1..7]);
        let mut target = [0u8; 6];
        target.copy_from_slice(&bytes[7..13]);

        let msg_id = u32::from_le_bytes(bytes[13..17].try_into().unwrap());
        let timestamp = u32::from_le_bytes(bytes[17..21].try_into().unwrap());
        let payload_len = bytes[21];

        if payload_len as usize > PAYLOAD_MAX {
            return Err(DecodeError::PayloadTooLong);
        }

        let payload_region_end = (22 + PAYLOAD_MAX).min(checksum_idx);
        let available = payload_region_end.saturating_sub(22);
        let copy_len = (payload_len as usize).min(available);

        let mut payload = [0u8; PAYLOAD_MAX];
        payload[..copy_len].copy_from_slice(&bytes[22..22 + copy_len]);

        Ok(Frame {
            kind,
            sender: Address::new(sender),
            target: Address::new(target),
            msg_id,
            timestamp,
            payload_len,
            payload,
        })
    }

    /// Reinterpret a decoded frame's payload as one of the typed variants
    /// in [`super::payload`]. Validates per-variant secondary constraints
    /// (secondary checksums, enum ranges) as part of decoding.
    pub fn payload_as<T: PayloadCodec>(frame: &Frame) -> Result<T, DecodeError> {
        T::decode(&frame.payload)
    }

    /// True if `frame_timestamp` predates `now_ms - STALE_WINDOW_MS`.
    ///
    /// Liveness-only: this does not defend against a malicious replay,
    /// only against processing datagrams from a long-dead session. See
    /// the staleness caveat in the crate root docs.
    pub fn is_stale(frame_timestamp: u32, now_ms: u32) -> bool {
        let diff = i64::from(now_ms) - i64::from(frame_timestamp);
        diff > i64::from(STALE_WINDOW_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::payload::{RelayAction, RelayCommand};

    fn sample_frame() -> Frame {
        let mut cmd_buf = [0u8; PAYLOAD_MAX];
        let cmd = RelayCommand {
            relay: 4,
            action: RelayAction::On,
            duration_s: 30,
        };
        cmd.encode(&mut cmd_buf);
        Frame::new(
            MsgKind::RelayCommand,
            Address::new([1, 2, 3, 4, 5, 6]),
            Address::new([9, 8, 7, 6, 5, 4]),
            42,
            1_000,
            &cmd_buf,
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let frame = sample_frame();
        let mut buf = [0u8; FRAME_SIZE];
        let n = WireCodec::encode(&frame, &mut buf).unwrap();
        assert_eq!(n, FRAME_SIZE);

        let decoded = WireCodec::decode(&buf).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_checksum_detects_any_single_byte_mutation() {
        let frame = sample_frame();
        let mut buf = [0u8; FRAME_SIZE];
        WireCodec::encode(&frame, &mut buf).unwrap();

        let mut collisions = 0;
        for i in 0..FRAME_SIZE - 1 {
            let mut mutated = buf;
            mutated[i] ^= 0x01;
            match WireCodec::decode(&mutated) {
                Err(DecodeError::Checksum) => {}
                Ok(f) if f == frame => collisions += 1,
                Ok(_) | Err(_) => {}
            }
        }
        // A handful of mutations can legitimately collide (e.g. flipping a
        // bit inside the zero-filled payload tail changes nothing
        // semantically meaningful); checksum detection dominates.
        assert!(collisions < FRAME_SIZE / 4);
    }

    #[test]
    fn test_decode_rejects_oversized_deviation() {
        let buf = vec![0u8; FRAME_SIZE + SIZE_TOLERANCE + 1];
        assert_eq!(WireCodec::decode(&buf), Err(DecodeError::Size));
    }

    #[test]
    fn test_decode_accepts_tolerance_window() {
        let frame = sample_frame();
        let mut buf = [0u8; FRAME_SIZE];
        WireCodec::encode(&frame, &mut buf).unwrap();

        // Pad with a couple of extra zero bytes before the checksum moves --
        // simulate alignment padding by re-deriving a shorter frame that
        // still carries a valid trailing checksum.
        let shorter = &buf[..FRAME_SIZE - 2];
        let mut shorter_buf = shorter.to_vec();
        let checksum = shorter_buf[..shorter_buf.len() - 1]
            .iter()
            .fold(0u8, |acc, &b| acc ^ b);
        let last = shorter_buf.len() - 1;
        shorter_buf[last] = checksum;
        assert!(WireCodec::decode(&shorter_buf).is_ok());
    }

    #[test]
    fn test_payload_as_relay_command() {
        let frame = sample_frame();
        let cmd: RelayCommand = WireCodec::payload_as(&frame).unwrap();
        assert_eq!(cmd.relay, 4);
        assert_eq!(cmd.duration_s, 30);
    }

    #[test]
    fn test_stale_detection() {
        assert!(!WireCodec::is_stale(1_000, 1_000));
        assert!(!WireCodec::is_stale(1_000, 30_999));
        assert!(WireCodec::is_stale(1_000, 31_001));
    }
}
