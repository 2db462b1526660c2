// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the relay mesh control plane.
//!
//! Errors are grouped the way the protocol design separates them (see the
//! component docs): a bad frame on the wire, a transport refusal, a failed
//! physical write, a storage hiccup, a cloud-queue failure, a memory
//! pressure condition, or a recovery timer expiring. Most of these are
//! swallowed and counted by their caller rather than propagated to the top
//! of the program -- only [`Error::Memory`] below the hard floor and a fed
//! watchdog timeout ever justify a reset.

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error type unifying every component's failure modes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A datagram failed to parse or failed a validity check.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The transport refused to hand off or receive a frame.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A physical relay write failed.
    #[error("io error: {0}")]
    Io(#[from] IoError),

    /// Non-volatile storage could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The cloud queue returned an error or was unreachable.
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Free memory dropped below a safety threshold.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// A recovery-level timer expired without success.
    #[error("state timeout at recovery level {level}")]
    StateTimeout {
        /// Which recovery level timed out.
        level: &'static str,
    },

    /// A relay/peer index fell outside its valid range.
    #[error("invalid index: {0}")]
    InvalidIndex(u8),
}

/// Reasons a datagram was rejected before it reached dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Buffer length deviates from the canonical frame size by more than
    /// the implementation-dependent padding allowance.
    #[error("frame size out of bounds")]
    Size,
    /// The trailing XOR checksum did not match the computed value.
    #[error("checksum mismatch")]
    Checksum,
    /// The `kind` byte is not one of the known message kinds.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    /// `timestamp` predates `now - STALE_WINDOW_MS`.
    #[error("stale frame timestamp")]
    Stale,
    /// A payload's own secondary integrity byte (e.g. `WifiCredentials`)
    /// did not validate.
    #[error("secondary checksum mismatch")]
    BadSecondaryChecksum,
    /// An enum-valued payload field held a value outside its declared set.
    #[error("invalid enum discriminant")]
    InvalidEnumValue,
    /// `payload_len` exceeded the 200-byte payload bound.
    #[error("payload length out of bounds")]
    PayloadTooLong,
}

/// Transport-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The radio/transport driver refused to send.
    #[error("send refused: {0}")]
    SendRefused(String),
    /// The transport has not been initialized.
    #[error("transport not initialized")]
    NotInitialized,
    /// The peer table has reached its capacity.
    #[error("peer table full")]
    PeerTableFull,
    /// Auto-adding an unknown unicast destination failed.
    #[error("failed to add peer: {0}")]
    PeerAddFailed(String),
    /// The channel could not be changed.
    #[error("failed to set channel {0}")]
    ChannelSetFailed(u8),
}

/// Failure to drive a physical relay output.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to drive relay {index}: {reason}")]
pub struct IoError {
    /// Relay index that failed.
    pub index: u8,
    /// Driver-reported reason.
    pub reason: String,
}

/// Non-volatile storage failures. Treated as "no data", never fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The backing namespace could not be opened.
    #[error("failed to open namespace {0}: {1}")]
    OpenFailed(String, String),
    /// A read or write within an open namespace failed.
    #[error("namespace {0} io failure: {1}")]
    IoFailure(String, String),
    /// The persisted record failed validation on read.
    #[error("namespace {0} holds invalid data")]
    InvalidRecord(String),
}

/// Cloud-queue failures (HTTP, TLS, DNS, timeout).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CloudError {
    /// Non-2xx HTTP response.
    #[error("cloud queue returned status {0}")]
    HttpStatus(u16),
    /// Transport-level failure (TLS, DNS, TCP, timeout).
    #[error("cloud queue transport failure: {0}")]
    Transport(String),
    /// Response body could not be decoded.
    #[error("cloud queue response decode failure: {0}")]
    Decode(String),
}

/// Free memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Below `MIN_HEAP_FOR_TLS`; cloud bridge calls are skipped.
    #[error("free memory below soft floor")]
    BelowSoftFloor,
    /// Below the hard floor; caller should trigger a reset.
    #[error("free memory below hard floor")]
    BelowHardFloor,
}
