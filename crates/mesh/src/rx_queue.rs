//! Receive hand-off queue
//!
//! The radio receive callback must not block: it pushes frames into a
//! bounded channel and the worker drains it. When the worker falls behind
//! the newest frame is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use swarmlink_radio::ReceivedFrame;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Create a receive queue holding at most `depth` frames.
pub fn rx_channel(depth: usize) -> (RxSender, RxReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RxSender {
            tx,
            dropped: dropped.clone(),
        },
        RxReceiver { rx, dropped },
    )
}

/// Producer side, held by the receive callback
#[derive(Debug, Clone)]
pub struct RxSender {
    tx: mpsc::Sender<ReceivedFrame>,
    dropped: Arc<AtomicU64>,
}

impl RxSender {
    /// Queue a frame without waiting; returns false if it was dropped.
    pub fn push(&self, frame: ReceivedFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(from = %frame.from, dropped = total, "Receive queue full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side, held by the worker
#[derive(Debug)]
pub struct RxReceiver {
    rx: mpsc::Receiver<ReceivedFrame>,
    dropped: Arc<AtomicU64>,
}

impl RxReceiver {
    pub async fn recv(&mut self) -> Option<ReceivedFrame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ReceivedFrame> {
        self.rx.try_recv().ok()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
