// vellum-core/src/pending.rs
//! Pending write coalescer
//!
//! Mutations land in the live index first and are queued here; a drain loop
//! moves them into the object store in bounded chunks.
//!
//! ```text
//!   upsert/remove ──► idle ──schedule──► scheduled ──worker──► draining
//!                      ▲                                          │
//!                      └───────────── queues empty ◄──────────────┘
//! ```
//!
//! At most one drain runs per instance. `save()` while draining attaches to
//! the in-flight drain and returns its outcome.

use ahash::{AHashMap, AHashSet};
use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::object_store::{ObjectStore, WriteBatch};
use crate::storage::StatusCell;
use crate::{log_debug, log_error, log_trace, log_warn};

#[derive(Default)]
struct PendingState {
    upserts: AHashMap<String, Document>,
    removals: AHashSet<String>,
    draining: Option<Arc<Drain>>,
}

impl PendingState {
    fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Dequeue up to `size` removals and up to `size` upserts
    fn take_chunk(&mut self, size: usize) -> WriteBatch {
        let removals: Vec<String> = self.removals.iter().take(size).cloned().collect();
        for id in &removals {
            self.removals.remove(id);
        }

        let ids: Vec<String> = self.upserts.keys().take(size).cloned().collect();
        let upserts = ids.iter().filter_map(|id| self.upserts.remove(id)).collect();

        WriteBatch { removals, upserts }
    }

    /// Put a failed chunk back; ids re-enqueued meanwhile keep the newer entry
    fn requeue(&mut self, batch: WriteBatch) {
        for id in batch.removals {
            if !self.upserts.contains_key(&id) {
                self.removals.insert(id);
            }
        }
        for doc in batch.upserts {
            if !self.removals.contains(doc.id()) && !self.upserts.contains_key(doc.id()) {
                self.upserts.insert(doc.id().to_string(), doc);
            }
        }
    }
}

/// Completion handle of one drain, shared with attached `save()` callers
#[derive(Default)]
struct Drain {
    outcome: Mutex<Option<std::result::Result<(), String>>>,
    done: Condvar,
}

impl Drain {
    fn finish(&self, outcome: std::result::Result<(), String>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self, collection: &str) -> Result<()> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone().map_err(|reason| VellumError::CommitFailure {
                    collection: collection.to_string(),
                    reason,
                });
            }
            self.done.wait(&mut outcome);
        }
    }
}

/// Clears the draining marker and wakes attached callers, also on error or panic
struct DrainGuard<'a> {
    state: &'a Mutex<PendingState>,
    drain: Arc<Drain>,
    outcome: Option<std::result::Result<(), String>>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            if state
                .draining
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &self.drain))
            {
                state.draining = None;
            }
        }
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err("drain aborted".to_string()));
        self.drain.finish(outcome);
    }
}

struct Worker {
    wake: Sender<()>,
    handle: JoinHandle<()>,
}

/// Per-collection write-behind queue
pub struct PendingWrites {
    name: String,
    store: Arc<dyn ObjectStore>,
    status: Arc<StatusCell>,
    config: StoreConfig,
    state: Mutex<PendingState>,
    scheduled: AtomicBool,
    commits: AtomicUsize,
    worker: Mutex<Option<Worker>>,
}

impl PendingWrites {
    /// Create the coalescer; in write-behind mode this also starts the
    /// collection's commit worker thread.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        status: Arc<StatusCell>,
        config: StoreConfig,
    ) -> Result<Arc<Self>> {
        let pending = Arc::new(PendingWrites {
            name: name.into(),
            store,
            status,
            config: config.normalized(),
            state: Mutex::new(PendingState::default()),
            scheduled: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            worker: Mutex::new(None),
        });

        if pending.config.commit_mode.is_auto() {
            let (wake, tokens) = channel::unbounded::<()>();
            let weak: Weak<PendingWrites> = Arc::downgrade(&pending);
            let handle = thread::Builder::new()
                .name(format!("vellum-commit-{}", pending.name))
                .spawn(move || {
                    for () in tokens.iter() {
                        let Some(pending) = weak.upgrade() else { break };
                        pending.scheduled.store(false, Ordering::SeqCst);
                        match pending.save() {
                            Ok(()) => {}
                            // Rescheduled once the storage resolves
                            Err(VellumError::BackendUnavailable(_)) => {
                                log_trace!("{}: drain deferred until ready", pending.name)
                            }
                            Err(e) => log_error!("{}: background commit failed: {}", pending.name, e),
                        }
                    }
                })?;
            *pending.worker.lock() = Some(Worker { wake, handle });
        }

        Ok(pending)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue the latest version of a document
    pub fn upsert(&self, document: Document) {
        {
            let mut state = self.state.lock();
            state.removals.remove(document.id());
            state.upserts.insert(document.id().to_string(), document);
        }
        self.schedule();
    }

    /// Queue a removal
    pub fn remove(&self, id: &str) {
        {
            let mut state = self.state.lock();
            state.upserts.remove(id);
            state.removals.insert(id.to_string());
        }
        self.schedule();
    }

    /// Drop everything queued without committing it
    pub fn discard(&self) {
        let mut state = self.state.lock();
        state.upserts.clear();
        state.removals.clear();
    }

    /// Wake the commit worker, at most one pending wake-up at a time.
    /// No-op in manual mode.
    pub fn schedule(&self) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let sent = match self.worker.lock().as_ref() {
            Some(worker) => worker.wake.send(()).is_ok(),
            None => false,
        };
        if !sent {
            self.scheduled.store(false, Ordering::SeqCst);
        }
    }

    /// Drain both queues into the object store
    ///
    /// Fails with `BackendUnavailable` (queues untouched) until the storage
    /// is ready. Attaches to an in-flight drain instead of starting a second.
    pub fn save(&self) -> Result<()> {
        if !self.status.is_ready() {
            return Err(VellumError::BackendUnavailable(self.name.clone()));
        }

        let drain = {
            let mut state = self.state.lock();
            if let Some(in_flight) = state.draining.clone() {
                drop(state);
                log_trace!("{}: attaching to in-flight drain", self.name);
                return in_flight.wait(&self.name);
            }
            if state.is_empty() {
                return Ok(());
            }
            let drain = Arc::new(Drain::default());
            state.draining = Some(Arc::clone(&drain));
            drain
        };

        let mut guard = DrainGuard {
            state: &self.state,
            drain,
            outcome: None,
        };
        let result = self.drain_loop(&guard.drain);
        guard.outcome = Some(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(failure_reason(e)),
        });
        result
    }

    fn drain_loop(&self, drain: &Arc<Drain>) -> Result<()> {
        loop {
            let batch = {
                let mut state = self.state.lock();
                if state.is_empty() {
                    if state
                        .draining
                        .as_ref()
                        .is_some_and(|current| Arc::ptr_eq(current, drain))
                    {
                        state.draining = None;
                    }
                    return Ok(());
                }
                state.take_chunk(self.config.chunk_size)
            };

            let (removals, upserts) = (batch.removals.len(), batch.upserts.len());
            let retained = self.config.requeue_failed.then(|| batch.clone());

            if let Err(e) = self.store.commit(&self.name, batch) {
                log_error!(
                    "{}: commit of {} removals / {} upserts failed: {}",
                    self.name,
                    removals,
                    upserts,
                    e
                );
                if let Some(batch) = retained {
                    log_warn!("{}: requeueing failed chunk", self.name);
                    self.state.lock().requeue(batch);
                }
                return Err(VellumError::CommitFailure {
                    collection: self.name.clone(),
                    reason: failure_reason(&e),
                });
            }

            self.commits.fetch_add(1, Ordering::SeqCst);
            log_debug!(
                "{}: committed {} removals / {} upserts",
                self.name,
                removals,
                upserts
            );
        }
    }

    pub fn is_pending_removal(&self, id: &str) -> bool {
        self.state.lock().removals.contains(id)
    }

    pub fn is_saving(&self) -> bool {
        self.state.lock().draining.is_some()
    }

    /// Number of queued upserts plus queued removals
    pub fn pending_len(&self) -> usize {
        let state = self.state.lock();
        state.upserts.len() + state.removals.len()
    }

    /// Number of chunks committed so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Stop the commit worker and wait for it to exit
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(Worker { wake, handle }) = worker {
            drop(wake);
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log_error!("{}: commit worker panicked", self.name);
            }
        }
    }
}

impl Drop for PendingWrites {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop; it may be running this drop
        if let Some(worker) = self.worker.get_mut().take() {
            drop(worker.wake);
        }
    }
}

fn failure_reason(error: &VellumError) -> String {
    match error {
        VellumError::CommitFailure { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommitMode;
    use crate::object_store::MemoryObjectStore;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn doc(id: &str) -> Document {
        Document::from_value(json!({"id": id})).unwrap()
    }

    fn setup(config: StoreConfig) -> (Arc<MemoryObjectStore>, Arc<StatusCell>, Arc<PendingWrites>) {
        let store = Arc::new(MemoryObjectStore::new());
        store.create_store("users", &[]).unwrap();
        let status = Arc::new(StatusCell::ready());
        let pending = PendingWrites::new("users", store.clone(), status.clone(), config).unwrap();
        (store, status, pending)
    }

    fn manual() -> StoreConfig {
        StoreConfig::default().with_commit_mode(CommitMode::Manual)
    }

    #[test]
    fn test_id_never_in_both_sets() {
        let (store, _, pending) = setup(manual());
        pending.upsert(doc("a"));
        pending.remove("a");
        assert_eq!(pending.pending_len(), 1);
        pending.upsert(doc("a"));
        assert_eq!(pending.pending_len(), 1);

        pending.save().unwrap();
        assert_eq!(store.get_all("users").unwrap(), vec![doc("a")]);
    }

    #[test]
    fn test_save_chunks_queues() {
        let (store, _, pending) = setup(manual().with_chunk_size(2));
        for i in 0..5 {
            pending.upsert(doc(&format!("u{}", i)));
        }
        pending.save().unwrap();

        assert_eq!(pending.commit_count(), 3);
        assert_eq!(pending.pending_len(), 0);
        assert!(!pending.is_saving());
        assert_eq!(store.get_all("users").unwrap().len(), 5);
    }

    #[test]
    fn test_save_with_empty_queues_commits_nothing() {
        let (_, _, pending) = setup(manual());
        pending.save().unwrap();
        assert_eq!(pending.commit_count(), 0);
    }

    #[test]
    fn test_not_ready_keeps_queues() {
        let store = Arc::new(MemoryObjectStore::new());
        store.create_store("users", &[]).unwrap();
        let status = Arc::new(StatusCell::loading());
        let pending = PendingWrites::new("users", store, status.clone(), manual()).unwrap();
        pending.upsert(doc("a"));

        assert!(matches!(pending.save(), Err(VellumError::BackendUnavailable(_))));
        assert_eq!(pending.pending_len(), 1);

        status.mark_ready();
        pending.save().unwrap();
        assert_eq!(pending.pending_len(), 0);
    }

    #[test]
    fn test_failed_chunk_is_dropped_by_default() {
        let store = Arc::new(MemoryObjectStore::new());
        let status = Arc::new(StatusCell::ready());
        // "users" was never created, so every commit fails
        let pending = PendingWrites::new("users", store.clone(), status, manual()).unwrap();
        pending.upsert(doc("a"));

        assert!(matches!(pending.save(), Err(VellumError::CommitFailure { .. })));
        assert!(!pending.is_saving(), "marker must be cleared after a failure");
        assert_eq!(pending.pending_len(), 0);
    }

    #[test]
    fn test_failed_chunk_requeued_when_configured() {
        let store = Arc::new(MemoryObjectStore::new());
        let status = Arc::new(StatusCell::ready());
        let config = manual().with_requeue_failed(true);
        let pending = PendingWrites::new("users", store.clone(), status, config).unwrap();
        pending.upsert(doc("a"));
        pending.remove("b");

        assert!(pending.save().is_err());
        assert_eq!(pending.pending_len(), 2);

        store.create_store("users", &[]).unwrap();
        pending.save().unwrap();
        assert_eq!(store.get_all("users").unwrap(), vec![doc("a")]);
    }

    #[test]
    fn test_write_behind_worker_commits() {
        let (store, _, pending) = setup(StoreConfig::default());
        pending.upsert(doc("a"));
        pending.upsert(doc("b"));

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get_all("users").unwrap().len() < 2 {
            assert!(Instant::now() < deadline, "worker never drained");
            thread::sleep(Duration::from_millis(5));
        }
        pending.shutdown();
    }
}
