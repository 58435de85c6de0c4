use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmlink_core::{logging, SystemClock};
use swarmlink_mesh::{
    rx_channel, Disposition, LineUplink, MeshNode, RxReceiver, SharedCounters, Task, PROTOCOL_VERSION,
};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

mod config;
mod endpoint;
mod memory;
mod udp_radio;

use config::ServiceConfig;
use endpoint::TcpUplink;
use udp_radio::UdpRadio;

const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: &'static str,
}

type SharedNode = Arc<Mutex<MeshNode<UdpRadio>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = ServiceConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if config.host.json_logs || args.iter().any(|arg| arg == "--json-logs") {
        logging::init_json();
    } else {
        logging::init();
    }

    let (rx_tx, rx) = rx_channel(config.node.radio.rx_queue_depth);
    let radio = UdpRadio::open(
        config.radio_address(),
        config.host.udp_port,
        config.host.link_rssi,
        config.node.infra.endpoint.clone(),
        rx_tx,
    )
    .context("opening UDP radio")?;

    let mut node = MeshNode::new(config.node.clone(), radio, Arc::new(SystemClock))?
        .with_serial_uplink(LineUplink::stdout())
        .with_memory_probe(memory::available_memory_probe());
    if let Some(endpoint) = config.node.infra.endpoint.clone() {
        node = node.with_endpoint_uplink(TcpUplink::new(endpoint));
    }
    node.start()?;

    info!(
        device_id = %node.device_id(),
        address = %node.address(),
        mode = ?node.mode(),
        port = config.host.udp_port,
        "swarmlink node started"
    );

    let node: SharedNode = Arc::new(Mutex::new(node));
    let tally = SharedCounters::new();
    let lock_wait = Duration::from_millis(config.node.timing.counter_lock_timeout_ms);

    let worker = tokio::spawn(receive_worker(Arc::clone(&node), rx, tally.clone(), lock_wait));
    let ticker = tokio::spawn(tick_loop(
        Arc::clone(&node),
        tally,
        lock_wait,
        Duration::from_millis(config.host.tick_ms),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    worker.abort();
    ticker.abort();
    Ok(())
}

/// Drain the receive queue into the node, one frame at a time
async fn receive_worker(node: SharedNode, mut rx: RxReceiver, tally: SharedCounters, lock_wait: Duration) {
    while let Some(frame) = rx.recv().await {
        let disposition = {
            let mut node = node.lock().await;
            tokio::task::block_in_place(|| node.handle_frame(&frame))
        };
        let counted = tally
            .update_within(lock_wait, |t| match disposition {
                Disposition::Routed(kind) => t.record(kind),
                Disposition::Dropped(_) => t.dropped += 1,
            })
            .await;
        if let Err(e) = counted {
            debug!(error = %e, "tally update skipped");
        }
    }
    warn!(dropped = rx.dropped(), "receive queue closed");
}

async fn tick_loop(node: SharedNode, tally: SharedCounters, lock_wait: Duration, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut delivered_seen = 0u64;

    loop {
        interval.tick().await;
        let (tasks, delivered, status) = {
            let mut node = node.lock().await;
            let tasks = tokio::task::block_in_place(|| node.tick());
            (tasks, node.counters().messages_delivered, node.status())
        };

        let newly_delivered = delivered.saturating_sub(delivered_seen);
        delivered_seen = delivered;
        if newly_delivered > 0 {
            if let Err(e) = tally.update_within(lock_wait, |t| t.delivered += newly_delivered).await {
                debug!(error = %e, "tally update skipped");
            }
        }

        if tasks.contains(&Task::Status) {
            match tally.snapshot_within(lock_wait).await {
                Ok(snapshot) => info!(
                    mode = ?status.mode,
                    peers = status.peers,
                    trusted = status.trusted_peers,
                    stored = status.stored,
                    received = snapshot.total(),
                    dropped = snapshot.dropped,
                    delivered = snapshot.delivered,
                    "node status"
                ),
                Err(e) => debug!(error = %e, "status snapshot skipped"),
            }
        }
    }
}

fn parse_config_path(args: &[String]) -> anyhow::Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            anyhow::bail!("--config was provided without a path");
        }
    }

    anyhow::bail!("missing required --config <path> argument")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_config_path() {
        let path = parse_config_path(&args(&["swarmlink-node", "--config", "node.toml"])).unwrap();
        assert_eq!(path, PathBuf::from("node.toml"));
    }

    #[test]
    fn test_parse_config_path_errors() {
        assert!(parse_config_path(&args(&["swarmlink-node"])).is_err());
        assert!(parse_config_path(&args(&["swarmlink-node", "--config"])).is_err());
    }
}
