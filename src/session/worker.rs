use crate::session::result::DiscoveryQuery;
use crate::session::DiscoverySession;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Pending triggers beyond this are already covered by the queued ones.
const TRIGGER_QUEUE: usize = 64;

enum WorkerMessage {
    Trigger,
    Shutdown,
}

/// Background thread re-running discovery when the store changes.
///
/// Triggers queued while a pass runs are drained together and answered by a
/// single follow-up pass over the newest snapshot.
pub struct DiscoveryWorker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl DiscoveryWorker {
    pub fn spawn(session: Arc<DiscoverySession>) -> std::io::Result<Self> {
        let (tx, rx) = bounded(TRIGGER_QUEUE);
        let passes = Arc::new(AtomicU64::new(0));
        let counter = passes.clone();
        let handle = std::thread::Builder::new()
            .name("tradeloop-discovery".into())
            .spawn(move || Self::run(session, rx, counter))?;
        Ok(Self {
            sender: tx,
            handle: Some(handle),
            passes,
        })
    }

    /// Ask for a pass. Returns false once the worker has stopped.
    pub fn trigger(&self) -> bool {
        match self.sender.try_send(WorkerMessage::Trigger) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Passes the worker has run so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Finish any queued pass and stop the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(WorkerMessage::Shutdown);
            if handle.join().is_err() {
                warn!("discovery worker panicked");
            }
        }
    }

    fn run(session: Arc<DiscoverySession>, rx: Receiver<WorkerMessage>, passes: Arc<AtomicU64>) {
        info!("discovery worker started");
        let query = DiscoveryQuery::all();
        while let Ok(message) = rx.recv() {
            let mut triggered = matches!(message, WorkerMessage::Trigger);
            let mut stopping = matches!(message, WorkerMessage::Shutdown);
            let mut coalesced = 0usize;
            for queued in rx.try_iter() {
                match queued {
                    WorkerMessage::Trigger => {
                        triggered = true;
                        coalesced += 1;
                    }
                    WorkerMessage::Shutdown => stopping = true,
                }
            }
            if coalesced > 0 {
                debug!("coalesced {} queued triggers", coalesced);
            }

            if triggered {
                passes.fetch_add(1, Ordering::Relaxed);
                match session.discover(&query) {
                    Ok(result) => debug!(
                        "background pass {} ready with {} loops",
                        result.pass_id,
                        result.loops.len()
                    ),
                    Err(e) => warn!("background pass failed: {}", e),
                }
            }
            if stopping {
                break;
            }
        }
        info!("discovery worker stopped");
    }
}

impl Drop for DiscoveryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core::item::ValuationTable;
    use crate::core::preference::WalletPreference;
    use crate::core::store::PreferenceStore;

    #[test]
    fn test_shutdown_runs_queued_pass() {
        let store = Arc::new(PreferenceStore::new());
        let session = Arc::new(DiscoverySession::new(
            store.clone(),
            Arc::new(ValuationTable::new()),
            EngineConfig::default(),
        )
        .unwrap());
        let worker = DiscoveryWorker::spawn(session.clone()).unwrap();

        for i in 0..10 {
            store
                .upsert_preference(
                    WalletPreference::new(format!("w{}", i), [format!("item{}", i)], Vec::<String>::new())
                        .unwrap(),
                )
                .unwrap();
            assert!(worker.trigger());
        }
        worker.shutdown();

        assert!(session.metrics().passes_completed >= 1);
        let latest = session.latest(&DiscoveryQuery::all()).unwrap();
        assert_eq!(latest.store_version, store.version());
        assert_eq!(latest.pool_state.wallet_count, 10);
    }

    #[test]
    fn test_drop_stops_thread() {
        let store = Arc::new(PreferenceStore::new());
        let session = Arc::new(DiscoverySession::new(
            store,
            Arc::new(ValuationTable::new()),
            EngineConfig::default(),
        )
        .unwrap());
        let worker = DiscoveryWorker::spawn(session.clone()).unwrap();
        assert!(worker.trigger());
        drop(worker);
        // the worker's clone is gone once the thread has joined
        assert_eq!(Arc::strong_count(&session), 1);
    }
}
