// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator console (§6.3): one line in, one reply out. Lines arrive from
//! a dedicated stdin-reading thread over a channel so the main loop never
//! blocks waiting on the terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relaymesh::autocomm::AutoCommManager;
use relaymesh::bridge::CommandBridge;
use relaymesh::datagram::DatagramTask;
use relaymesh::wire::{Address, RelayAction};
use relaymesh::watchdog::Watchdog;

/// Spawn a thread reading lines from stdin and forwarding them to an
/// unbounded channel, the way a serial console feeds the operator loop.
pub fn spawn_stdin_reader() -> tokio::sync::mpsc::UnboundedReceiver<String> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("relaymesh-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
        .expect("failed to spawn console reader thread");
    rx
}

/// Collaborators the operator console dispatches against.
pub struct Repl {
    pub datagram: Arc<DatagramTask>,
    pub autocomm: Arc<AutoCommManager>,
    pub bridge: Option<Arc<CommandBridge>>,
    pub watchdog: Arc<Watchdog>,
    pub running: Arc<AtomicBool>,
}

fn parse_address(s: &str) -> Option<Address> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for b in bytes.iter_mut() {
        *b = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Address::new(bytes))
}

fn parse_action(s: &str) -> Option<RelayAction> {
    match s.to_ascii_lowercase().as_str() {
        "on" => Some(RelayAction::On),
        "off" => Some(RelayAction::Off),
        "toggle" => Some(RelayAction::Toggle),
        "on_forever" => Some(RelayAction::OnForever),
        _ => None,
    }
}

impl Repl {
    fn resolve_peer(&self, name: &str) -> Option<Address> {
        parse_address(name).or_else(|| self.datagram.peers().find_by_name(name).map(|p| p.address))
    }

    /// Handle one console line, printing a reply to stdout.
    pub async fn handle(&self, line: &str) {
        let mut tokens = line.split_whitespace();
        let Some(cmd) = tokens.next() else { return };
        let rest: Vec<&str> = tokens.collect();

        match cmd.to_ascii_lowercase().as_str() {
            "help" => Self::print_help(),
            "status" => self.cmd_status(),
            "discover" => self.cmd_discover(),
            "list" => self.cmd_list(),
            "ping" => self.cmd_ping(&rest),
            "relay" => self.cmd_relay(&rest),
            "handshake" => self.cmd_handshake(&rest),
            "connectivity_check" => self.cmd_connectivity_check(&rest),
            "auto_validation" => self.cmd_auto_validation(),
            "bridge_stats" => self.cmd_bridge_stats(),
            "bridge_enable" => self.cmd_bridge_enable(true),
            "bridge_disable" => self.cmd_bridge_enable(false),
            "watchdog_status" => self.cmd_watchdog_status(),
            "watchdog_reset" => self.cmd_watchdog_reset(),
            "task_status" => self.cmd_task_status(),
            "task_discover" => self.cmd_discover(),
            "reset" => self.cmd_reset(),
            other => println!("unrecognized command {other:?}; try 'help'"),
        }
    }

    fn print_help() {
        println!(
            "commands: help status discover list ping [<peer>] relay <peer|all> <i|_> <on|off|toggle|on_forever> [duration_s] \
             handshake [<peer>] connectivity_check [<peer>] auto_validation bridge_stats bridge_enable bridge_disable \
             watchdog_status watchdog_reset task_status task_discover reset"
        );
    }

    fn cmd_status(&self) {
        println!("state: {:?}", self.autocomm.state());
        println!("health: {}", self.autocomm.health_score());
        println!(
            "recoveries: {} attempted, {} succeeded",
            self.autocomm.recovery_attempts(),
            self.autocomm.successful_recoveries()
        );
        self.cmd_list();
    }

    fn cmd_discover(&self) {
        match self.datagram.force_discovery() {
            Ok(()) => println!("discovery broadcast sent"),
            Err(e) => println!("discover failed: {e}"),
        }
    }

    fn cmd_list(&self) {
        let peers = self.datagram.peers().snapshot();
        if peers.is_empty() {
            println!("no known peers");
            return;
        }
        for p in peers {
            println!(
                "{} {} online={} rssi={}dBm latency={}ms",
                p.address, p.name, p.online, p.rssi_dbm, p.last_latency_ms
            );
        }
    }

    fn cmd_ping(&self, args: &[&str]) {
        match args.first() {
            None => {
                let peers = self.datagram.peers().snapshot();
                let mut n = 0;
                for p in peers.iter().filter(|p| p.online) {
                    if self.datagram.ping_peer(p.address).is_ok() {
                        n += 1;
                    }
                }
                println!("pinged {n} online peer(s)");
            }
            Some(name) => match self.resolve_peer(name) {
                Some(addr) => match self.datagram.ping_peer(addr) {
                    Ok(()) => println!("ping sent to {addr}"),
                    Err(e) => println!("ping failed: {e}"),
                },
                None => println!("unknown peer {name:?}"),
            },
        }
    }

    fn cmd_relay(&self, args: &[&str]) {
        if args.first() == Some(&"on_all") || args.first() == Some(&"off_all") {
            let action = if args[0] == "on_all" { RelayAction::On } else { RelayAction::Off };
            let cmd = relaymesh::wire::RelayCommand { relay: 0, action, duration_s: 0 };
            match self.datagram.broadcast_relay_command(cmd) {
                Ok(()) => println!("broadcast {} sent", args[0]),
                Err(e) => println!("broadcast failed: {e}"),
            }
            return;
        }
        if args.len() < 3 {
            println!("usage: relay <peer> <index> <on|off|toggle|on_forever> [duration_s]");
            return;
        }
        let Some(addr) = self.resolve_peer(args[0]) else {
            println!("unknown peer {:?}", args[0]);
            return;
        };
        let Ok(relay) = args[1].parse::<u8>() else {
            println!("invalid relay index {:?}", args[1]);
            return;
        };
        let Some(action) = parse_action(args[2]) else {
            println!("invalid action {:?}", args[2]);
            return;
        };
        let duration_s = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);
        let cmd = relaymesh::wire::RelayCommand { relay, action, duration_s };
        match self.datagram.send_relay_command_to(addr, cmd) {
            Ok(()) => println!("relay command sent to {addr}"),
            Err(e) => println!("relay command failed: {e}"),
        }
    }

    fn cmd_handshake(&self, args: &[&str]) {
        let targets = self.targets_or_all(args.first().copied());
        for addr in targets {
            let _ = self.datagram.start_handshake(addr);
        }
        println!("handshake requested");
    }

    fn cmd_connectivity_check(&self, args: &[&str]) {
        let targets = self.targets_or_all(args.first().copied());
        for addr in targets {
            let _ = self.datagram.request_connectivity(addr);
        }
        println!("connectivity check requested");
    }

    fn cmd_auto_validation(&self) {
        for p in self.datagram.peers().snapshot() {
            let _ = self.datagram.start_handshake(p.address);
            let _ = self.datagram.request_connectivity(p.address);
            let _ = self.datagram.ping_peer(p.address);
        }
        println!("auto validation requested for all known peers");
    }

    fn targets_or_all(&self, peer: Option<&str>) -> Vec<Address> {
        match peer {
            Some(name) => self.resolve_peer(name).into_iter().collect(),
            None => self.datagram.peers().snapshot().into_iter().map(|p| p.address).collect(),
        }
    }

    fn cmd_bridge_stats(&self) {
        match &self.bridge {
            Some(bridge) => {
                let stats = bridge.stats();
                println!(
                    "processed={} sent={} completed={} failed={} enabled={}",
                    stats.processed, stats.sent, stats.completed, stats.failed, bridge.is_enabled()
                );
            }
            None => println!("command bridge not active on this node"),
        }
    }

    fn cmd_bridge_enable(&self, enable: bool) {
        match &self.bridge {
            Some(bridge) => {
                if enable {
                    bridge.enable();
                } else {
                    bridge.disable();
                }
                println!("bridge {}", if enable { "enabled" } else { "disabled" });
            }
            None => println!("command bridge not active on this node"),
        }
    }

    fn cmd_watchdog_status(&self) {
        let status = self.watchdog.status();
        println!("age={}ms timeout={}ms expired={}", status.age_ms, status.timeout_ms, status.expired);
    }

    fn cmd_watchdog_reset(&self) {
        self.watchdog.feed();
        println!("watchdog fed");
    }

    fn cmd_task_status(&self) {
        let stats = self.datagram.stats();
        println!(
            "rx_dispatched={} rx_invalid={} rx_dropped={}",
            stats.rx_dispatched, stats.rx_invalid, stats.rx_dropped
        );
    }

    fn cmd_reset(&self) {
        println!("resetting");
        self.running.store(false, Ordering::SeqCst);
    }
}
