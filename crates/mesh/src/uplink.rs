//! Uplinks to the serial console and the monitoring endpoint
//!
//! Records are line-delimited JSON. The serial uplink mirrors everything the
//! node does; the endpoint uplink only receives delivered messages.

use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use swarmlink_core::{DeviceId, Timestamp};
use swarmlink_radio::CommMode;

use crate::envelope::{DistanceEntry, Envelope, RelayHop};
use crate::stats::NodeCounters;

/// Direction of a relay hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayDirection {
    Sent,
    Received,
}

/// One line on an uplink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UplinkRecord {
    /// Periodic status of this node
    Status {
        device_id: DeviceId,
        owner: String,
        mode: CommMode,
        uptime_s: u64,
        peers: usize,
        trusted_peers: usize,
        stored: usize,
        undelivered: usize,
        counters: NodeCounters,
    },
    /// A stored message handed to the endpoint
    Delivered {
        via: DeviceId,
        hop_count: usize,
        chain: Vec<RelayHop>,
        delivered_at: Timestamp,
        envelope: Envelope,
    },
    /// Relay traffic passing through this node
    Relay {
        direction: RelayDirection,
        origin: DeviceId,
        msg_id: u32,
        peer: DeviceId,
        hop_count: usize,
    },
    /// Distance table of a node
    Distances {
        device_id: DeviceId,
        entries: Vec<DistanceEntry>,
    },
}

/// Sink for uplink records
pub trait Uplink: Send {
    fn publish(&mut self, record: &UplinkRecord) -> io::Result<()>;
}

/// Writes one JSON object per line and flushes after each
#[derive(Debug)]
pub struct LineUplink<W> {
    writer: W,
}

impl<W: Write + Send> LineUplink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl LineUplink<io::Stdout> {
    /// Serial console stand-in
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Uplink for LineUplink<W> {
    fn publish(&mut self, record: &UplinkRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Keeps records in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryUplink {
    records: Arc<Mutex<Vec<UplinkRecord>>>,
}

impl MemoryUplink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UplinkRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn delivered(&self) -> Vec<UplinkRecord> {
        self.records()
            .into_iter()
            .filter(|r| matches!(r, UplinkRecord::Delivered { .. }))
            .collect()
    }
}

impl Uplink for MemoryUplink {
    fn publish(&mut self, record: &UplinkRecord) -> io::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_uplink_writes_tagged_lines() {
        let mut uplink = LineUplink::new(Vec::new());
        uplink
            .publish(&UplinkRecord::Relay {
                direction: RelayDirection::Received,
                origin: "node-a".to_string(),
                msg_id: 7,
                peer: "node-b".to_string(),
                hop_count: 1,
            })
            .unwrap();
        uplink
            .publish(&UplinkRecord::Distances {
                device_id: "node-a".to_string(),
                entries: vec![],
            })
            .unwrap();

        let text = String::from_utf8(uplink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "relay");
        assert_eq!(first["direction"], "received");
        assert_eq!(first["hop_count"], 1);
    }

    #[test]
    fn test_memory_uplink_shares_buffer() {
        let handle = MemoryUplink::new();
        let mut sink = handle.clone();
        sink.publish(&UplinkRecord::Distances {
            device_id: "n".to_string(),
            entries: vec![],
        })
        .unwrap();
        assert_eq!(handle.records().len(), 1);
        assert!(handle.delivered().is_empty());
    }
}
