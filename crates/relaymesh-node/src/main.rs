// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator runtime for a single relaymesh node: wires the transport,
//! peer table, connection state machine, datagram loop, and (on a Master
//! with cloud arguments) the command bridge into one polled main loop,
//! and exposes the §6.3 operator console over stdin.

mod cloud_http;
mod repl;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use relaymesh::autocomm::{AutoCommManager, NullWifi};
use relaymesh::bridge::{CommandBridge, RelayMapping};
use relaymesh::clock::{Clock, SystemClock};
use relaymesh::credentials::{CredentialStore, Nvs};
use relaymesh::datagram::DatagramTask;
use relaymesh::discovery::{ChannelCache, ChannelDiscovery};
use relaymesh::peer::{Event, PeerTable};
use relaymesh::relay::{NullExpander, RelayController};
use relaymesh::transport::{Transport, UdpTransport};
use relaymesh::watchdog::{NullWatchdogSink, Watchdog};
use relaymesh::wire::{Address, Role};

const TICK_INTERVAL_MS: u64 = 100;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum RoleArg {
    Master,
    Slave,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Master => Role::Master,
            RoleArg::Slave => Role::Slave,
        }
    }
}

/// Run a relaymesh control-plane node.
#[derive(Parser, Debug)]
#[command(name = "relaymesh-node", about = "Relaymesh control-plane node", version)]
struct Args {
    /// Node role.
    #[arg(long, value_enum, default_value_t = RoleArg::Slave)]
    role: RoleArg,

    /// One byte (0..255) identifying this node on the mesh.
    #[arg(long, default_value_t = 1)]
    node_id: u8,

    /// Display name advertised in handshakes and device announcements.
    #[arg(long, default_value = "relaymesh-node")]
    device_name: String,

    /// Self-declared device type string.
    #[arg(long, default_value = "relay-board")]
    device_type: String,

    /// UDP socket to bind the host transport to.
    #[arg(long, default_value = "0.0.0.0:4420")]
    bind: String,

    /// Directory backing the persisted-state namespaces (§6.2).
    #[arg(long, default_value = "./relaymesh-data")]
    data_dir: std::path::PathBuf,

    /// Base URL of the cloud command queue (Master only).
    #[arg(long)]
    cloud_url: Option<String>,

    /// Bearer token for the cloud command queue.
    #[arg(long, default_value = "")]
    cloud_token: String,

    /// `apikey` header value for the cloud command queue.
    #[arg(long, default_value = "")]
    cloud_api_key: String,

    /// `device_id` this node's rows are filed under in the cloud queue.
    #[arg(long)]
    device_id: Option<String>,

    /// Verify the cloud queue's TLS certificate instead of accepting any.
    #[arg(long, default_value_t = false)]
    verify_tls: bool,

    /// Hardware watchdog timeout in milliseconds (floored at 60 s).
    #[arg(long, default_value_t = 60_000)]
    watchdog_timeout_ms: u64,

    /// Log verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let role: Role = args.role.into();
    let local = Address::new([0, 0, 0, 0, 0, args.node_id]);

    info!(role = ?role, local = %local, "starting relaymesh node");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let nvs = Arc::new(Nvs::new(args.data_dir.clone()));
    let peers = Arc::new(PeerTable::new());
    let creds = Arc::new(CredentialStore::new(Arc::clone(&nvs)));
    let cache = ChannelCache::new(Arc::clone(&nvs));

    let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind(&args.bind, local)?);
    transport.add_peer(Address::BROADCAST, transport.current_channel())?;

    let (events_tx, mut events_rx) = tokio::sync::mpsc::channel::<Event>(64);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!(?event, "observer event");
        }
    });

    let discovery = Arc::new(ChannelDiscovery::new(
        Arc::clone(&transport),
        Arc::clone(&peers),
        cache,
        Arc::clone(&clock),
        local,
    ));

    let autocomm = Arc::new(
        AutoCommManager::new(
            role,
            local,
            Arc::clone(&transport),
            Arc::clone(&peers),
            Arc::clone(&discovery),
            Arc::clone(&creds),
            Arc::new(NullWifi),
            Arc::clone(&clock),
        )
        .with_events(events_tx.clone()),
    );

    let relays = RelayController::new(Box::new(NullExpander));
    let datagram = Arc::new(
        DatagramTask::new(
            local,
            role,
            args.device_name.clone(),
            args.device_type.clone(),
            Arc::clone(&transport),
            Arc::clone(&peers),
            relays,
            Arc::clone(&creds),
            Arc::clone(&clock),
        )
        .with_events(events_tx.clone()),
    );
    datagram.attach_autocomm(Arc::clone(&autocomm));

    let bridge: Option<Arc<CommandBridge>> = if role == Role::Master {
        match (&args.cloud_url, &args.device_id) {
            (Some(cloud_url), Some(device_id)) => {
                let queue = cloud_http::CloudHttpClient::new(
                    cloud_url.clone(),
                    args.cloud_token.clone(),
                    args.cloud_api_key.clone(),
                    args.verify_tls,
                )?;
                let mapping = RelayMapping::new(Arc::clone(&nvs));
                let bridge = Arc::new(CommandBridge::new(
                    device_id.clone(),
                    Arc::new(queue),
                    Arc::clone(&datagram) as Arc<dyn relaymesh::bridge::CommandDispatch>,
                    Arc::clone(&peers),
                    mapping,
                ));
                datagram.attach_bridge(Arc::clone(&bridge));
                Some(bridge)
            }
            _ => {
                warn!("role is master but --cloud-url/--device-id are not both set; command bridge disabled");
                None
            }
        }
    } else {
        None
    };

    let watchdog = Arc::new(Watchdog::with_timeout(
        Arc::clone(&clock),
        Arc::new(NullWatchdogSink::default()),
        args.watchdog_timeout_ms,
    ));

    autocomm.bootstrap().await?;

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })?;

    let repl = repl::Repl {
        datagram: Arc::clone(&datagram),
        autocomm: Arc::clone(&autocomm),
        bridge: bridge.clone(),
        watchdog: Arc::clone(&watchdog),
        running: Arc::clone(&running),
    };
    let mut console_rx = repl::spawn_stdin_reader();

    info!("node running; type 'help' at the console for operator commands");

    let mut last_bridge_poll_ms: u64 = 0;
    while running.load(Ordering::SeqCst) {
        let now = clock.now_ms();
        watchdog.feed();
        watchdog.check();

        datagram.drain_once(now).await;
        datagram.tick_periodic(now);
        datagram.relay_tick(now);
        autocomm.tick(now).await;

        if let Some(bridge) = &bridge {
            if now.saturating_sub(last_bridge_poll_ms) >= relaymesh::bridge::POLL_INTERVAL_MS {
                last_bridge_poll_ms = now;
                bridge.poll_once().await;
            }
        }

        while let Ok(line) = console_rx.try_recv() {
            repl.handle(&line).await;
        }

        tokio::time::sleep(Duration::from_millis(TICK_INTERVAL_MS)).await;
    }

    info!("shutting down");
    Ok(())
}
