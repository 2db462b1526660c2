// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `ChannelDiscovery` (§4.5): find the radio channel the Master is
//! reachable on.

pub mod cache;

pub use cache::{ChannelCache, ChannelCacheEntry};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::peer::PeerTable;
use crate::transport::Transport;
use crate::wire::{Address, Frame, MsgKind, WireCodec};

/// Default per-attempt listen window.
pub const TIMEOUT_PER_CHANNEL_MS: u64 = 300;
/// Default retry attempts per channel.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;
/// Delay between retry attempts on the same channel.
pub const RETRY_DELAY_MS: u64 = 100;
/// Priority channel sweep order, tried before the exhaustive sweep.
pub const PRIORITY_CHANNELS: [u8; 3] = [1, 6, 11];
/// Cache is only trusted above this success rate.
pub const CACHE_TRUST_THRESHOLD: u8 = 50;

/// Outcome of a [`ChannelDiscovery::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryResult {
    /// A Master replied on `channel`.
    Success {
        /// Channel the Master was found on.
        channel: u8,
    },
    /// No channel produced a reply.
    Timeout,
    /// The transport could not switch channels or send.
    TransportError,
    /// The radio driver reported a hardware-level fault.
    RadioError,
    /// The sweep was interrupted by the abort flag.
    Aborted,
}

/// Finds the Master's radio channel by cache probe, priority sweep, then
/// exhaustive sweep, persisting the result for next boot.
pub struct ChannelDiscovery {
    transport: Arc<dyn Transport>,
    peers: Arc<PeerTable>,
    cache: ChannelCache,
    clock: Arc<dyn Clock>,
    local: Address,
    msg_id: AtomicU32,
    abort: AtomicBool,
}

impl ChannelDiscovery {
    /// Build a discovery engine for `local` over `transport`, backed by
    /// `cache` for warm-start behavior.
    pub fn new(
        transport: Arc<dyn Transport>,
        peers: Arc<PeerTable>,
        cache: ChannelCache,
        clock: Arc<dyn Clock>,
        local: Address,
    ) -> Self {
        Self {
            transport,
            peers,
            cache,
            clock,
            local,
            msg_id: AtomicU32::new(1),
            abort: AtomicBool::new(false),
        }
    }

    /// Interrupt an in-progress sweep; checked between channels.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    fn reset_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn discovery_frame(&self) -> Vec<u8> {
        let msg_id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now_ms() as u32;
        let frame = Frame::new(MsgKind::Broadcast, self.local, Address::BROADCAST, msg_id, now, &[]);
        let mut buf = vec![0u8; crate::wire::FRAME_SIZE];
        WireCodec::encode(&frame, &mut buf).expect("fixed-size frame always encodes");
        buf
    }

    /// True if any peer record was touched at or after `since_ms`.
    fn has_fresh_reply(&self, since_ms: u64) -> bool {
        self.peers.snapshot().iter().any(|p| p.last_seen_ms >= since_ms)
    }

    /// Try one channel up to `attempts` times, `timeout_ms` apiece. Returns
    /// `Ok(true)` on a reply, `Ok(false)` on exhaustion, `Err` on a
    /// transport fault.
    async fn try_channel(&self, channel: u8, attempts: u32, timeout_ms: u64) -> Result<bool, DiscoveryResult> {
        self.transport
            .set_channel(channel)
            .map_err(|_| DiscoveryResult::TransportError)?;

        for attempt in 0..attempts {
            if self.is_aborted() {
                return Err(DiscoveryResult::Aborted);
            }

            let since = self.clock.now_ms();
            let frame_bytes = self.discovery_frame();
            self.transport
                .send(Address::BROADCAST, &frame_bytes)
                .map_err(|_| DiscoveryResult::TransportError)?;

            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if self.has_fresh_reply(since) {
                return Ok(true);
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
            }
        }
        Ok(false)
    }

    /// Run the full discovery algorithm (§4.5).
    pub async fn run(&self) -> DiscoveryResult {
        self.reset_abort();
        let mut tried: Vec<u8> = Vec::new();

        if let Ok(Some(entry)) = self.cache.load() {
            if entry.success_rate > CACHE_TRUST_THRESHOLD {
                tried.push(entry.last_channel);
                match self.try_channel(entry.last_channel, 1, TIMEOUT_PER_CHANNEL_MS).await {
                    Ok(true) => {
                        self.record_success(entry.last_channel, 10);
                        return DiscoveryResult::Success {
                            channel: entry.last_channel,
                        };
                    }
                    Ok(false) => {}
                    Err(result) => return result,
                }
            }
        }

        for &channel in PRIORITY_CHANNELS.iter() {
            if tried.contains(&channel) {
                continue;
            }
            tried.push(channel);
            match self.try_channel(channel, MAX_RETRY_ATTEMPTS, TIMEOUT_PER_CHANNEL_MS).await {
                Ok(true) => {
                    self.record_success(channel, 5);
                    return DiscoveryResult::Success { channel };
                }
                Ok(false) => {}
                Err(result) => return result,
            }
        }

        for channel in 1..=13u8 {
            if tried.contains(&channel) {
                continue;
            }
            tried.push(channel);
            match self.try_channel(channel, MAX_RETRY_ATTEMPTS, TIMEOUT_PER_CHANNEL_MS).await {
                Ok(true) => {
                    self.record_success(channel, 5);
                    return DiscoveryResult::Success { channel };
                }
                Ok(false) => {}
                Err(result) => return result,
            }
        }

        let _ = self.cache.record_failure();
        DiscoveryResult::Timeout
    }

    fn record_success(&self, channel: u8, step: i32) {
        let now = self.clock.now_ms() as u32;
        let _ = self.cache.record_success(channel, now, step);
    }
}
