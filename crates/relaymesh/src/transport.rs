// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Transport` trait (§4.10): radio/channel abstraction, and a concrete
//! UDP-backed implementation for host development and integration tests.
//!
//! The receive path is callback-based rather than poll-based: the spec
//! models the radio RX path as an interrupt-like context whose only job is
//! to push bytes into a bounded queue and return. `UdpTransport` honors
//! that by running its socket read loop on a dedicated thread and handing
//! bytes to the registered callback without holding any lock across it.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::{Result, TransportError};
use crate::wire::Address;

type ReceiveCallback = dyn Fn(Address, &[u8]) + Send + Sync;
type SendStatusCallback = dyn Fn(Address, bool) + Send + Sync;

/// Radio/channel abstraction used by [`crate::discovery::ChannelDiscovery`],
/// [`crate::datagram::DatagramTask`], and the command bridge.
pub trait Transport: Send + Sync {
    /// Switch the radio to `channel`.
    fn set_channel(&self, channel: u8) -> Result<()>;

    /// Register a known peer at `addr` reachable on `channel`. The
    /// broadcast address is added at startup by the caller.
    fn add_peer(&self, addr: Address, channel: u8) -> Result<()>;

    /// Hand `bytes` off to the radio for transmission to `addr`. Returns
    /// once the radio has accepted the frame; this may succeed even if no
    /// peer is actually listening.
    fn send(&self, addr: Address, bytes: &[u8]) -> Result<()>;

    /// Register the callback invoked for every received datagram. Must be
    /// called before traffic is expected; only the most recent
    /// registration is kept.
    fn on_receive(&self, callback: Arc<ReceiveCallback>);

    /// Register the callback invoked after every `send` attempt completes.
    fn on_send_status(&self, callback: Arc<SendStatusCallback>);

    /// Currently configured radio channel.
    fn current_channel(&self) -> u8;
}

struct UdpState {
    peers: HashMap<Address, SocketAddr>,
    receive_cb: Option<Arc<ReceiveCallback>>,
    send_status_cb: Option<Arc<SendStatusCallback>>,
}

/// A host-loopback `Transport` over UDP sockets, with peer addresses
/// mapped from the 6-byte protocol [`Address`] to a `SocketAddr`.
///
/// Intended for local development, demos, and integration tests where no
/// physical radio is present; the channel concept is tracked but has no
/// physical effect.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local: Address,
    channel: AtomicU8,
    state: Arc<Mutex<UdpState>>,
}

impl UdpTransport {
    /// Bind a UDP socket at `bind_addr` and spawn the receive loop. `local`
    /// is this node's own protocol address, used only for bookkeeping.
    pub fn bind(bind_addr: &str, local: Address) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_addr)?);
        let state = Arc::new(Mutex::new(UdpState {
            peers: HashMap::new(),
            receive_cb: None,
            send_status_cb: None,
        }));

        let recv_socket = Arc::clone(&socket);
        let recv_state = Arc::clone(&state);
        thread::Builder::new()
            .name("relaymesh-udp-rx".into())
            .spawn(move || Self::receive_loop(recv_socket, recv_state))
            .expect("failed to spawn transport receive thread");

        Ok(Self {
            socket,
            local,
            channel: AtomicU8::new(1),
            state,
        })
    }

    fn receive_loop(socket: Arc<UdpSocket>, state: Arc<Mutex<UdpState>>) {
        let mut buf = [0u8; 1024];
        loop {
            let (n, from) = match socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(_) => continue,
            };

            let (callback, sender_addr) = {
                let guard = state.lock().unwrap();
                let sender_addr = guard
                    .peers
                    .iter()
                    .find(|(_, sock)| **sock == from)
                    .map(|(addr, _)| *addr)
                    .unwrap_or(Address::UNSPECIFIED);
                (guard.receive_cb.clone(), sender_addr)
            };

            if let Some(cb) = callback {
                cb(sender_addr, &buf[..n]);
            }
        }
    }

    /// This node's own protocol address.
    pub fn local_address(&self) -> Address {
        self.local
    }

    /// The OS-assigned socket address this transport is bound to, for
    /// wiring up a fixed peer topology in tests (see `map_peer`).
    pub fn socket_addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("bound socket always has a local address")
    }

    /// Associate a protocol address with a socket address directly,
    /// bypassing `add_peer`'s channel bookkeeping (used by tests wiring up
    /// a fixed peer topology).
    pub fn map_peer(&self, addr: Address, sock_addr: SocketAddr) {
        self.state.lock().unwrap().peers.insert(addr, sock_addr);
    }
}

impl Transport for UdpTransport {
    fn set_channel(&self, channel: u8) -> Result<()> {
        self.channel.store(channel, Ordering::SeqCst);
        Ok(())
    }

    fn add_peer(&self, addr: Address, channel: u8) -> Result<()> {
        let _ = channel;
        // Host transport needs a real socket address; bookkeeping-only
        // peers (no socket mapping yet) are accepted so discovery can
        // register a broadcast placeholder at startup.
        self.state.lock().unwrap().peers.entry(addr).or_insert_with(|| {
            SocketAddr::from(([255, 255, 255, 255], 0))
        });
        Ok(())
    }

    fn send(&self, addr: Address, bytes: &[u8]) -> Result<()> {
        let target = {
            let guard = self.state.lock().unwrap();
            guard.peers.get(&addr).copied()
        };

        let Some(target) = target else {
            let err = TransportError::PeerAddFailed(format!("unknown peer {addr}"));
            self.notify_send_status(addr, false);
            return Err(err.into());
        };

        let ok = self.socket.send_to(bytes, target).is_ok();
        self.notify_send_status(addr, ok);
        if ok {
            Ok(())
        } else {
            Err(TransportError::SendRefused(format!("send to {addr} failed")).into())
        }
    }

    fn on_receive(&self, callback: Arc<ReceiveCallback>) {
        self.state.lock().unwrap().receive_cb = Some(callback);
    }

    fn on_send_status(&self, callback: Arc<SendStatusCallback>) {
        self.state.lock().unwrap().send_status_cb = Some(callback);
    }

    fn current_channel(&self) -> u8 {
        self.channel.load(Ordering::SeqCst)
    }
}

impl UdpTransport {
    fn notify_send_status(&self, addr: Address, ok: bool) {
        let cb = self.state.lock().unwrap().send_status_cb.clone();
        if let Some(cb) = cb {
            cb(addr, ok);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_send_between_two_transports() {
        let a_addr = Address::new([1, 0, 0, 0, 0, 0]);
        let b_addr = Address::new([2, 0, 0, 0, 0, 0]);

        let a = UdpTransport::bind("127.0.0.1:0", a_addr).unwrap();
        let b = UdpTransport::bind("127.0.0.1:0", b_addr).unwrap();

        let a_sock = a.socket.local_addr().unwrap();
        let b_sock = b.socket.local_addr().unwrap();
        a.map_peer(b_addr, b_sock);
        b.map_peer(a_addr, a_sock);

        let received = Arc::new(AtomicBool::new(false));
        let received_clone = Arc::clone(&received);
        b.on_receive(Arc::new(move |_from, bytes| {
            if bytes == b"hello" {
                received_clone.store(true, Ordering::SeqCst);
            }
        }));

        a.send(b_addr, b"hello").unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(received.load(Ordering::SeqCst));
    }

    #[test]
    fn test_send_to_unknown_peer_errors() {
        let a = UdpTransport::bind("127.0.0.1:0", Address::new([1; 6])).unwrap();
        let err = a.send(Address::new([9; 6]), b"x").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Transport(TransportError::PeerAddFailed(_))
        ));
    }

    #[test]
    fn test_set_channel() {
        let a = UdpTransport::bind("127.0.0.1:0", Address::new([1; 6])).unwrap();
        a.set_channel(11).unwrap();
        assert_eq!(a.current_channel(), 11);
    }
}
