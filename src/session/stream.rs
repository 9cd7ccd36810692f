use crate::core::pool::PoolState;
use crate::core::trade_loop::TradeLoop;
use crate::session::result::{HistoryEntry, PassMetrics};
use crate::session::WireStatus;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;

/// A message pushed to stream consumers.
///
/// Serialized with a `type` tag:
///
/// ```json
/// {"type": "tradePaths", "paths": [...], "poolState": {...}, "storeVersion": 7}
/// {"type": "status", "status": "searching"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    #[serde(rename_all = "camelCase")]
    TradePaths {
        paths: Vec<TradeLoop>,
        pool_state: PoolState,
        store_version: u64,
    },
    Metrics {
        metrics: PassMetrics,
    },
    History {
        entry: HistoryEntry,
    },
    Status {
        status: WireStatus,
    },
}

impl StreamMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Receives every message the session publishes, on the publishing thread.
///
/// Implementations must not block for long: a pass waits for its sinks.
pub trait StreamSink: Send + Sync {
    fn send(&self, message: &StreamMessage);
}

impl<F> StreamSink for F
where
    F: Fn(&StreamMessage) + Send + Sync,
{
    fn send(&self, message: &StreamMessage) {
        self(message)
    }
}

/// Fan-out point for session messages.
///
/// Sinks are called synchronously. Channel subscribers get a copy each and
/// are dropped from the hub as soon as their receiver disconnects.
#[derive(Default)]
pub struct StreamHub {
    sinks: RwLock<Vec<Arc<dyn StreamSink>>>,
    subscribers: Mutex<Vec<Sender<StreamMessage>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn StreamSink>) {
        self.sinks.write().push(sink);
    }

    /// Open a channel receiving every message published from now on.
    pub fn subscribe(&self) -> Receiver<StreamMessage> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn publish(&self, message: StreamMessage) {
        // sinks may publish or mutate the store; never call them under the lock
        let sinks: Vec<Arc<dyn StreamSink>> = self.sinks.read().clone();
        for sink in &sinks {
            sink.send(&message);
        }

        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        if subscribers.len() < before {
            log::debug!("pruned {} disconnected subscribers", before - subscribers.len());
        }
    }
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("sinks", &self.sinks.read().len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
