// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed payload variants carried inside a [`Frame`](super::frame::Frame).
//!
//! Each variant is a fixed-size record with its own `encode`/`decode` pair.
//! `WireCodec::payload_as` (see [`super::codec`]) reinterprets the raw
//! payload bytes of a decoded frame as one of these.

use crate::error::DecodeError;

/// A payload that can be packed into / unpacked from a frame's 200-byte body.
pub trait PayloadCodec: Sized {
    /// Encode `self` into `buf`, returning the number of bytes written.
    /// `buf` is always `PAYLOAD_MAX` bytes; the encoder need not zero the
    /// tail, the caller does that.
    fn encode(&self, buf: &mut [u8]) -> usize;

    /// Decode `self` from the declared payload bytes (`payload[..payload_len]`,
    /// plus whatever zero-filled tail the caller chooses to pass).
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn write_u32(v: u32, out: &mut [u8]) {
    out[0..4].copy_from_slice(&v.to_le_bytes());
}

fn read_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn write_i32(v: i32, out: &mut [u8]) {
    out[0..4].copy_from_slice(&v.to_le_bytes());
}

fn copy_fixed_str<const N: usize>(s: &str, out: &mut [u8; N]) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
}

fn fixed_str<const N: usize>(buf: &[u8; N]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(N);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn xor_fold(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Action requested on a relay output (see `RelayController::apply`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    /// Turn the relay on (with an optional timer, see `duration_s`).
    On = 0,
    /// Turn the relay off.
    Off = 1,
    /// Flip the relay's current state.
    Toggle = 2,
    /// Turn the relay on with no timer, regardless of `duration_s`.
    OnForever = 3,
    /// No state change; request a status reply.
    Status = 4,
}

impl RelayAction {
    /// Decode from the wire discriminant.
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::On),
            1 => Ok(Self::Off),
            2 => Ok(Self::Toggle),
            3 => Ok(Self::OnForever),
            4 => Ok(Self::Status),
            _ => Err(DecodeError::InvalidEnumValue),
        }
    }
}

/// `RelayCommand` payload: request a state change on one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayCommand {
    /// Relay index, `0..8`.
    pub relay: u8,
    /// Requested action.
    pub action: RelayAction,
    /// Timer length in seconds (0 = no timer / not applicable).
    pub duration_s: u32,
}

impl PayloadCodec for RelayCommand {
    fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.relay;
        buf[1] = self.action as u8;
        write_u32(self.duration_s, &mut buf[2..6]);
        6
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 6 {
            return Err(DecodeError::Size);
        }
        Ok(Self {
            relay: bytes[0],
            action: RelayAction::from_u8(bytes[1])?,
            duration_s: read_u32(&bytes[2..6]),
        })
    }
}

/// `RelayStatus` payload: reported state of one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatus {
    /// Relay index.
    pub relay: u8,
    /// Current on/off state.
    pub on: bool,
    /// Whether an auto-off timer is pending.
    pub has_timer: bool,
    /// Seconds remaining on the timer (0 if `has_timer` is false).
    pub remaining_s: u32,
    /// Display name of the relay.
    pub name: String,
}

const RELAY_STATUS_NAME_LEN: usize = 32;

impl PayloadCodec for RelayStatus {
    fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.relay;
        buf[1] = self.on as u8;
        buf[2] = self.has_timer as u8;
        write_u32(self.remaining_s, &mut buf[3..7]);
        let mut name_buf = [0u8; RELAY_STATUS_NAME_LEN];
        copy_fixed_str(&self.name, &mut name_buf);
        buf[7..7 + RELAY_STATUS_NAME_LEN].copy_from_slice(&name_buf);
        7 + RELAY_STATUS_NAME_LEN
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 7 + RELAY_STATUS_NAME_LEN {
            return Err(DecodeError::Size);
        }
        let mut name_buf = [0u8; RELAY_STATUS_NAME_LEN];
        name_buf.copy_from_slice(&bytes[7..7 + RELAY_STATUS_NAME_LEN]);
        Ok(Self {
            relay: bytes[0],
            on: bytes[1] != 0,
            has_timer: bytes[2] != 0,
            remaining_s: read_u32(&bytes[3..7]),
            name: fixed_str(&name_buf),
        })
    }
}

const DEVICE_NAME_LEN: usize = 32;
const DEVICE_TYPE_LEN: usize = 16;

/// `DeviceInfo` payload: self-description broadcast by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub device_name: String,
    /// Device type / model string.
    pub device_type: String,
    /// Number of relays this device exposes.
    pub relay_count: u8,
    /// Whether the device considers itself operational.
    pub operational: bool,
    /// Milliseconds since boot.
    pub uptime_ms: u32,
    /// Free memory in bytes, as reported by the device.
    pub free_mem: u32,
}

impl PayloadCodec for DeviceInfo {
    fn encode(&self, buf: &mut [u8]) -> usize {
        let mut name_buf = [0u8; DEVICE_NAME_LEN];
        copy_fixed_str(&self.device_name, &mut name_buf);
        buf[0..DEVICE_NAME_LEN].copy_from_slice(&name_buf);
        let mut off = DEVICE_NAME_LEN;

        let mut type_buf = [0u8; DEVICE_TYPE_LEN];
        copy_fixed_str(&self.device_type, &mut type_buf);
        buf[off..off + DEVICE_TYPE_LEN].copy_from_slice(&type_buf);
        off += DEVICE_TYPE_LEN;

        buf[off] = self.relay_count;
        off += 1;
        buf[off] = self.operational as u8;
        off += 1;
        write_u32(self.uptime_ms, &mut buf[off..off + 4]);
        off += 4;
        write_u32(self.free_mem, &mut buf[off..off + 4]);
        off += 4;
        off
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let needed = DEVICE_NAME_LEN + DEVICE_TYPE_LEN + 1 + 1 + 4 + 4;
        if bytes.len() < needed {
            return Err(DecodeError::Size);
        }
        let mut name_buf = [0u8; DEVICE_NAME_LEN];
        name_buf.copy_from_slice(&bytes[0..DEVICE_NAME_LEN]);
        let mut off = DEVICE_NAME_LEN;

        let mut type_buf = [0u8; DEVICE_TYPE_LEN];
        type_buf.copy_from_slice(&bytes[off..off + DEVICE_TYPE_LEN]);
        off += DEVICE_TYPE_LEN;

        let relay_count = bytes[off];
        off += 1;
        let operational = bytes[off] != 0;
        off += 1;
        let uptime_ms = read_u32(&bytes[off..off + 4]);
        off += 4;
        let free_mem = read_u32(&bytes[off..off + 4]);

        Ok(Self {
            device_name: fixed_str(&name_buf),
            device_type: fixed_str(&type_buf),
            relay_count,
            operational,
            uptime_ms,
            free_mem,
        })
    }
}

const SSID_LEN: usize = 33;
const PASSPHRASE_LEN: usize = 64;

/// `WifiCredentials` payload.
///
/// Transmitted in the clear with only an XOR integrity byte -- this is
/// intentionally NOT a security feature, see the module docs on
/// [`crate::credentials`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    /// Network SSID.
    pub ssid: String,
    /// Network passphrase.
    pub passphrase: String,
    /// Radio channel, `1..=13`.
    pub channel: u8,
}

impl WifiCredentials {
    fn checksum_over(ssid: &[u8; SSID_LEN], pass: &[u8; PASSPHRASE_LEN], channel: u8) -> u8 {
        xor_fold(ssid) ^ xor_fold(pass) ^ channel
    }
}

impl PayloadCodec for WifiCredentials {
    fn encode(&self, buf: &mut [u8]) -> usize {
        let mut ssid_buf = [0u8; SSID_LEN];
        copy_fixed_str(&self.ssid, &mut ssid_buf);
        buf[0..SSID_LEN].copy_from_slice(&ssid_buf);
        let mut off = SSID_LEN;

        let mut pass_buf = [0u8; PASSPHRASE_LEN];
        copy_fixed_str(&self.passphrase, &mut pass_buf);
        buf[off..off + PASSPHRASE_LEN].copy_from_slice(&pass_buf);
        off += PASSPHRASE_LEN;

        buf[off] = self.channel;
        off += 1;

        buf[off] = Self::checksum_over(&ssid_buf, &pass_buf, self.channel);
        off += 1;
        off
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let needed = SSID_LEN + PASSPHRASE_LEN + 1 + 1;
        if bytes.len() < needed {
            return Err(DecodeError::Size);
        }
        let mut ssid_buf = [0u8; SSID_LEN];
        ssid_buf.copy_from_slice(&bytes[0..SSID_LEN]);
        let mut off = SSID_LEN;

        let mut pass_buf = [0u8; PASSPHRASE_LEN];
        pass_buf.copy_from_slice(&bytes[off..off + PASSPHRASE_LEN]);
        off += PASSPHRASE_LEN;

        let channel = bytes[off];
        off += 1;
        let checksum = bytes[off];

        if !(1..=13).contains(&channel) {
            return Err(DecodeError::InvalidEnumValue);
        }
        if checksum != Self::checksum_over(&ssid_buf, &pass_buf, channel) {
            return Err(DecodeError::BadSecondaryChecksum);
        }

        Ok(Self {
            ssid: fixed_str(&ssid_buf),
            passphrase: fixed_str(&pass_buf),
            channel,
        })
    }
}

/// Role asserted by a [`Handshake`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Coordinates the fleet and bridges the cloud queue.
    Master = 0,
    /// Drives relays and reports status.
    Slave = 1,
}

impl Role {
    /// Decode from the wire discriminant.
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::Master),
            1 => Ok(Self::Slave),
            _ => Err(DecodeError::InvalidEnumValue),
        }
    }
}

/// `Handshake` payload, used for both `HandshakeRequest` and
/// `HandshakeResponse` wire kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Session identifier, echoed back in the response.
    pub session_id: u32,
    /// Sender's local timestamp.
    pub timestamp: u32,
    /// Sender's role.
    pub role: Role,
    /// Sender's device name.
    pub device_name: String,
    /// Protocol version.
    pub proto_version: u8,
    /// Whether the sender's Wi-Fi uplink is up.
    pub wifi_up: bool,
    /// Fold-checksum validating the fields above.
    pub validation: u8,
}

impl Handshake {
    fn compute_validation(device_name: &[u8; DEVICE_NAME_LEN], session_id: u32, timestamp: u32) -> u8 {
        let session_decimal = session_id.to_string();
        xor_fold(device_name) ^ xor_fold(session_decimal.as_bytes()) ^ xor_fold(&timestamp.to_le_bytes()) ^ 0xAA
    }
}

impl PayloadCodec for Handshake {
    fn encode(&self, buf: &mut [u8]) -> usize {
        write_u32(self.session_id, &mut buf[0..4]);
        write_u32(self.timestamp, &mut buf[4..8]);
        buf[8] = self.role as u8;
        let mut name_buf = [0u8; DEVICE_NAME_LEN];
        copy_fixed_str(&self.device_name, &mut name_buf);
        buf[9..9 + DEVICE_NAME_LEN].copy_from_slice(&name_buf);
        let mut off = 9 + DEVICE_NAME_LEN;
        buf[off] = self.proto_version;
        off += 1;
        buf[off] = self.wifi_up as u8;
        off += 1;
        buf[off] = Self::compute_validation(&name_buf, self.session_id, self.timestamp);
        off += 1;
        off
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let needed = 4 + 4 + 1 + DEVICE_NAME_LEN + 1 + 1 + 1;
        if bytes.len() < needed {
            return Err(DecodeError::Size);
        }
        let session_id = read_u32(&bytes[0..4]);
        let timestamp = read_u32(&bytes[4..8]);
        let role = Role::from_u8(bytes[8])?;
        let mut name_buf = [0u8; DEVICE_NAME_LEN];
        name_buf.copy_from_slice(&bytes[9..9 + DEVICE_NAME_LEN]);
        let mut off = 9 + DEVICE_NAME_LEN;
        let proto_version = bytes[off];
        off += 1;
        let wifi_up = bytes[off] != 0;
        off += 1;
        let validation = bytes[off];

        let expected = Self::compute_validation(&name_buf, session_id, timestamp);
        if validation != expected {
            return Err(DecodeError::BadSecondaryChecksum);
        }

        Ok(Self {
            session_id,
            timestamp,
            role,
            device_name: fixed_str(&name_buf),
            proto_version,
            wifi_up,
            validation,
        })
    }
}

/// `ConnectivityReport` payload: a liveness + link-quality snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityReport {
    /// Session identifier.
    pub session_id: u32,
    /// Sender's local timestamp.
    pub timestamp: u32,
    /// Whether the sender's Wi-Fi uplink is up.
    pub wifi_up: bool,
    /// Received signal strength, in dBm.
    pub rssi_dbm: i32,
    /// Current radio channel.
    pub channel: u8,
    /// Milliseconds since boot.
    pub uptime_ms: u32,
    /// Free memory in bytes.
    pub free_mem: u32,
    /// Rolling message counter (wraps).
    pub msg_count: u8,
    /// Whether the sender considers itself operational.
    pub operational: bool,
}

impl PayloadCodec for ConnectivityReport {
    fn encode(&self, buf: &mut [u8]) -> usize {
        write_u32(self.session_id, &mut buf[0..4]);
        write_u32(self.timestamp, &mut buf[4..8]);
        buf[8] = self.wifi_up as u8;
        write_i32(self.rssi_dbm, &mut buf[9..13]);
        buf[13] = self.channel;
        write_u32(self.uptime_ms, &mut buf[14..18]);
        write_u32(self.free_mem, &mut buf[18..22]);
        buf[22] = self.msg_count;
        buf[23] = self.operational as u8;
        24
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < 24 {
            return Err(DecodeError::Size);
        }
        Ok(Self {
            session_id: read_u32(&bytes[0..4]),
            timestamp: read_u32(&bytes[4..8]),
            wifi_up: bytes[8] != 0,
            rssi_dbm: read_i32(&bytes[9..13]),
            channel: bytes[13],
            uptime_ms: read_u32(&bytes[14..18]),
            free_mem: read_u32(&bytes[18..22]),
            msg_count: bytes[22],
            operational: bytes[23] != 0,
        })
    }
}

/// Empty payload shared by `Ping` / `Pong` / `Broadcast` / `Ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Empty;

impl PayloadCodec for Empty {
    fn encode(&self, _buf: &mut [u8]) -> usize {
        0
    }

    fn decode(_bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

const ERROR_MSG_LEN: usize = 64;

/// `Error` payload: an advisory textual diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Short human-readable reason.
    pub message: String,
}

impl PayloadCodec for ErrorPayload {
    fn encode(&self, buf: &mut [u8]) -> usize {
        let mut msg_buf = [0u8; ERROR_MSG_LEN];
        copy_fixed_str(&self.message, &mut msg_buf);
        buf[0..ERROR_MSG_LEN].copy_from_slice(&msg_buf);
        ERROR_MSG_LEN
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < ERROR_MSG_LEN {
            return Err(DecodeError::Size);
        }
        let mut msg_buf = [0u8; ERROR_MSG_LEN];
        msg_buf.copy_from_slice(&bytes[0..ERROR_MSG_LEN]);
        Ok(Self {
            message: fixed_str(&msg_buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_command_roundtrip() {
        let cmd = RelayCommand {
            relay: 3,
            action: RelayAction::On,
            duration_s: 10,
        };
        let mut buf = [0u8; 200];
        let n = cmd.encode(&mut buf);
        let decoded = RelayCommand::decode(&buf[..n]).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn test_relay_status_roundtrip() {
        let status = RelayStatus {
            relay: 2,
            on: true,
            has_timer: true,
            remaining_s: 42,
            name: "Pump".to_string(),
        };
        let mut buf = [0u8; 200];
        let n = status.encode(&mut buf);
        let decoded = RelayStatus::decode(&buf[..n]).unwrap();
        assert_eq!(status, decoded);
    }

    #[test]
    fn test_wifi_credentials_roundtrip_and_checksum() {
        let creds = WifiCredentials {
            ssid: "lab-net".to_string(),
            passphrase: "supersecret".to_string(),
            channel: 6,
        };
        let mut buf = [0u8; 200];
        let n = creds.encode(&mut buf);
        let decoded = WifiCredentials::decode(&buf[..n]).unwrap();
        assert_eq!(creds, decoded);

        // Corrupting a byte should break the secondary checksum.
        buf[0] ^= 0xFF;
        assert_eq!(
            WifiCredentials::decode(&buf[..n]),
            Err(DecodeError::BadSecondaryChecksum)
        );
    }

    #[test]
    fn test_wifi_credentials_rejects_bad_channel() {
        let mut buf = [0u8; 200];
        let creds = WifiCredentials {
            ssid: "x".to_string(),
            passphrase: "y".to_string(),
            channel: 1,
        };
        let n = creds.encode(&mut buf);
        buf[SSID_LEN + PASSPHRASE_LEN] = 14; // out of 1..=13
        assert_eq!(
            WifiCredentials::decode(&buf[..n]),
            Err(DecodeError::InvalidEnumValue)
        );
    }

    #[test]
    fn test_handshake_roundtrip() {
        let hs = Handshake {
            session_id: 1234,
            timestamp: 99,
            role: Role::Master,
            device_name: "master-01".to_string(),
            proto_version: 1,
            wifi_up: true,
            validation: 0,
        };
        let mut buf = [0u8; 200];
        let n = hs.encode(&mut buf);
        let decoded = Handshake::decode(&buf[..n]).unwrap();
        assert_eq!(decoded.session_id, hs.session_id);
        assert_eq!(decoded.role, Role::Master);
    }

    #[test]
    fn test_handshake_validation_detects_corruption() {
        let hs = Handshake {
            session_id: 1,
            timestamp: 2,
            role: Role::Slave,
            device_name: "slave-a".to_string(),
            proto_version: 1,
            wifi_up: false,
            validation: 0,
        };
        let mut buf = [0u8; 200];
        let n = hs.encode(&mut buf);
        buf[4] ^= 0x01; // corrupt timestamp
        assert_eq!(
            Handshake::decode(&buf[..n]),
            Err(DecodeError::BadSecondaryChecksum)
        );
    }

    #[test]
    fn test_connectivity_report_roundtrip() {
        let report = ConnectivityReport {
            session_id: 7,
            timestamp: 100,
            wifi_up: true,
            rssi_dbm: -62,
            channel: 11,
            uptime_ms: 500_000,
            free_mem: 120_000,
            msg_count: 5,
            operational: true,
        };
        let mut buf = [0u8; 200];
        let n = report.encode(&mut buf);
        let decoded = ConnectivityReport::decode(&buf[..n]).unwrap();
        assert_eq!(report, decoded);
    }
}
