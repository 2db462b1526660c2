// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The on-air wire format: addresses, the fixed frame envelope, typed
//! payload variants, and the codec tying them together.

pub mod address;
pub mod codec;
pub mod frame;
pub mod payload;

pub use address::Address;
pub use codec::WireCodec;
pub use frame::{Frame, MsgKind, FRAME_SIZE, PAYLOAD_MAX, SIZE_TOLERANCE, STALE_WINDOW_MS};
pub use payload::{
    ConnectivityReport, DeviceInfo, Empty, ErrorPayload, Handshake, PayloadCodec, RelayAction,
    RelayCommand, RelayStatus, Role, WifiCredentials,
};
