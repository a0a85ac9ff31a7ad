// vellum-core/src/storage/shared.rs
// Live index, cache, change events and broadcast sync shared by every backend

use ahash::AHashSet;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::{Arc, Weak};

use super::{
    ChangeEvent, InsertManyResult, InsertOneResult, LiveIndex, RemoveResult, StatusCell,
    UpdateResult,
};
use crate::broadcast::{channel_name, BroadcastMessage, Broadcaster, Channel};
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::logging::OpTimer;
use crate::options::FindOptions;
use crate::pending::PendingWrites;
use crate::query::Evaluator;
use crate::query_cache::{QueryCache, QueryHash};
use crate::{log_debug, log_trace};

/// State and operations common to all storage backends
///
/// Lock order: index, then cache, then pending. Events are emitted while the
/// index write lock is held so subscribers observe them in mutation order.
pub(crate) struct StorageCore {
    name: String,
    index: RwLock<LiveIndex>,
    cache: QueryCache,
    evaluator: Arc<dyn Evaluator>,
    status: Arc<StatusCell>,
    pending: Option<Arc<PendingWrites>>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
    channel: Mutex<Option<Box<dyn Channel>>>,
}

impl StorageCore {
    pub fn new(
        name: &str,
        evaluator: Arc<dyn Evaluator>,
        status: Arc<StatusCell>,
        pending: Option<Arc<PendingWrites>>,
        cache_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(StorageCore {
            name: name.to_string(),
            index: RwLock::new(LiveIndex::new()),
            cache: QueryCache::new(cache_capacity),
            evaluator,
            status,
            pending,
            subscribers: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
        })
    }

    /// Subscribe to the collection's broadcast channel
    pub fn attach(self: &Arc<Self>, broadcaster: &dyn Broadcaster) -> Result<()> {
        let weak: Weak<StorageCore> = Arc::downgrade(self);
        let channel = broadcaster.open(
            &channel_name(&self.name),
            Box::new(move |message| {
                if let Some(core) = weak.upgrade() {
                    core.receive(message);
                }
            }),
        )?;
        *self.channel.lock() = Some(channel);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &Arc<StatusCell> {
        &self.status
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn pending(&self) -> Option<&Arc<PendingWrites>> {
        self.pending.as_ref()
    }

    /// Merge hydrated documents; ids already live or queued for removal win
    pub fn hydrate(&self, documents: Vec<Document>) -> usize {
        let mut index = self.index.write();
        let mut loaded = 0;
        for doc in documents {
            let removed = self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.is_pending_removal(doc.id()));
            if removed || index.contains_key(doc.id()) {
                continue;
            }
            index.insert(doc.id().to_string(), doc);
            loaded += 1;
        }
        self.cache.flush();
        loaded
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Deliver to local subscribers, dropping the ones that hung up
    fn emit(&self, event: &ChangeEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Emit locally, then post to the other contexts
    fn publish(&self, event: ChangeEvent) {
        self.emit(&event);
        if let Some(channel) = self.channel.lock().as_ref() {
            channel.post(&BroadcastMessage::new(self.name.clone(), event));
        }
    }

    /// Apply a change made by another context
    ///
    /// Touches only the live index and the cache: nothing is queued for
    /// persistence and nothing is posted back.
    fn receive(&self, message: BroadcastMessage) {
        if message.name != self.name {
            log_trace!("{}: ignoring broadcast for {}", self.name, message.name);
            return;
        }

        let mut index = self.index.write();
        match &message.event {
            ChangeEvent::InsertOne(doc) | ChangeEvent::UpdateOne(doc) => {
                index.insert(doc.id().to_string(), doc.clone());
            }
            ChangeEvent::InsertMany(docs) | ChangeEvent::UpdateMany(docs) => {
                for doc in docs {
                    index.insert(doc.id().to_string(), doc.clone());
                }
            }
            ChangeEvent::Remove(docs) => {
                for doc in docs {
                    index.shift_remove(doc.id());
                }
            }
            ChangeEvent::Flush => index.clear(),
        }
        self.cache.flush();
        log_trace!("{}: applied broadcast {}", self.name, message.event.kind());
        self.emit(&message.event);
    }

    /// Release the broadcast subscription
    pub fn detach(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    // ========================================================================
    // PERSISTENCE HOOKS
    // ========================================================================

    fn persist_upsert(&self, document: &Document) {
        if let Some(pending) = &self.pending {
            pending.upsert(document.clone());
        }
    }

    fn persist_remove(&self, id: &str) {
        if let Some(pending) = &self.pending {
            pending.remove(id);
        }
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    pub fn has(&self, id: &str) -> bool {
        self.index.read().contains_key(id)
    }

    fn duplicate(&self, id: &str) -> VellumError {
        VellumError::DuplicateDocument {
            collection: self.name.clone(),
            id: id.to_string(),
        }
    }

    pub fn insert_one(&self, value: Value) -> Result<InsertOneResult> {
        let op = OpTimer::start("insertOne", &self.name);
        let document = Document::with_generated_id(value)?;
        let id = document.id().to_string();

        let mut index = self.index.write();
        if index.contains_key(&id) {
            return Err(self.duplicate(&id));
        }
        index.insert(id.clone(), document.clone());
        self.cache.flush();
        self.persist_upsert(&document);
        self.publish(ChangeEvent::InsertOne(document));
        drop(index);

        op.finish(format_args!("id={}", id));
        Ok(InsertOneResult { inserted_id: id })
    }

    pub fn insert_many(&self, values: Vec<Value>) -> Result<InsertManyResult> {
        let op = OpTimer::start("insertMany", &self.name);
        let documents = values
            .into_iter()
            .map(Document::with_generated_id)
            .collect::<Result<Vec<_>>>()?;

        let mut index = self.index.write();
        {
            let mut seen = AHashSet::with_capacity(documents.len());
            for doc in &documents {
                if index.contains_key(doc.id()) || !seen.insert(doc.id()) {
                    return Err(self.duplicate(doc.id()));
                }
            }
        }

        let inserted_ids: Vec<String> = documents.iter().map(|d| d.id().to_string()).collect();
        if !documents.is_empty() {
            for doc in &documents {
                index.insert(doc.id().to_string(), doc.clone());
                self.persist_upsert(doc);
            }
            self.cache.flush();
            self.publish(ChangeEvent::InsertMany(documents));
        }
        drop(index);

        op.finish(format_args!("{} documents", inserted_ids.len()));
        Ok(InsertManyResult { inserted_ids })
    }

    pub fn find_by_id(&self, id: &str) -> Option<Document> {
        self.index.read().get(id).cloned()
    }

    /// Matching documents in index order
    fn scan(&self, index: &LiveIndex, filter: &Value) -> Result<Vec<Document>> {
        let mut matched = Vec::new();
        for doc in index.values() {
            if self.evaluator.matches(doc, filter)? {
                matched.push(doc.clone());
            }
        }
        Ok(matched)
    }

    /// Read-through: a miss is evaluated and recorded under the read lock,
    /// so no mutation can slip in between scan and cache fill.
    pub fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Document>> {
        let op = OpTimer::start("find", &self.name);
        let hash = QueryHash::new(filter, options);

        let index = self.index.read();
        if let Some(documents) = self.cache.get(&hash, &index) {
            log_trace!("{}: cache hit {:016x}", self.name, hash.value());
            op.finish(format_args!("{} documents (cached)", documents.len()));
            return Ok(documents);
        }
        if options.has_backend_hints() {
            log_trace!("{}: ignoring backend hints in {:?}", self.name, options);
        }

        let documents = options.apply(self.scan(&index, filter)?);
        self.cache.set(hash, &documents);
        drop(index);

        op.finish(format_args!("{} documents", documents.len()));
        Ok(documents)
    }

    pub fn count(&self, filter: &Value) -> Result<usize> {
        let index = self.index.read();
        let mut count = 0;
        for doc in index.values() {
            if self.evaluator.matches(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        let op = OpTimer::start("updateOne", &self.name);
        let mut index = self.index.write();

        let mut result = UpdateResult::default();
        let mut changed = None;
        for doc in index.values() {
            if self.evaluator.matches(doc, filter)? {
                result.matched = 1;
                let mut next = doc.clone();
                if self.evaluator.apply(&mut next, update)? {
                    result.modified = 1;
                    changed = Some(next);
                }
                break;
            }
        }

        if let Some(doc) = changed {
            index.insert(doc.id().to_string(), doc.clone());
            self.persist_upsert(&doc);
            self.cache.flush();
            self.publish(ChangeEvent::UpdateOne(doc));
        } else {
            self.cache.flush();
        }
        drop(index);

        op.finish(format_args!("matched={} modified={}", result.matched, result.modified));
        Ok(result)
    }

    /// Evaluates every document before touching the index, so an evaluator
    /// error leaves the collection unchanged.
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        let op = OpTimer::start("updateMany", &self.name);
        let mut index = self.index.write();

        let mut matched = 0;
        let mut modified = Vec::new();
        for doc in index.values() {
            if self.evaluator.matches(doc, filter)? {
                matched += 1;
                let mut next = doc.clone();
                if self.evaluator.apply(&mut next, update)? {
                    modified.push(next);
                }
            }
        }

        for doc in &modified {
            index.insert(doc.id().to_string(), doc.clone());
            self.persist_upsert(doc);
        }
        self.cache.flush();
        let result = UpdateResult::new(matched, modified.len());
        if !modified.is_empty() {
            self.publish(ChangeEvent::UpdateMany(modified));
        }
        drop(index);

        op.finish(format_args!("matched={} modified={}", result.matched, result.modified));
        Ok(result)
    }

    /// Matches are dropped and `replacement` is stored under its own id
    /// (generated when absent), so several matches collapse into one document.
    pub fn replace(&self, filter: &Value, replacement: Value) -> Result<UpdateResult> {
        let op = OpTimer::start("replace", &self.name);
        let replacement = Document::with_generated_id(replacement)?;
        let mut index = self.index.write();

        let matched = self.scan(&index, filter)?;
        if matched.is_empty() {
            self.cache.flush();
            op.finish("matched=0");
            return Ok(UpdateResult::default());
        }

        let mut dropped = Vec::new();
        for doc in &matched {
            if doc.id() != replacement.id() {
                if let Some(old) = index.shift_remove(doc.id()) {
                    self.persist_remove(old.id());
                    dropped.push(old);
                }
            }
        }
        index.insert(replacement.id().to_string(), replacement.clone());
        self.persist_upsert(&replacement);
        self.cache.flush();

        if !dropped.is_empty() {
            self.publish(ChangeEvent::Remove(dropped));
        }
        self.publish(ChangeEvent::UpdateMany(vec![replacement]));
        drop(index);

        op.finish(format_args!("matched={}", matched.len()));
        Ok(UpdateResult::new(matched.len(), matched.len()))
    }

    /// Each removal is published on its own; the cache is flushed once
    pub fn remove(&self, filter: &Value) -> Result<RemoveResult> {
        let op = OpTimer::start("remove", &self.name);
        let mut index = self.index.write();

        let matched = self.scan(&index, filter)?;
        for doc in &matched {
            index.shift_remove(doc.id());
            self.persist_remove(doc.id());
            self.publish(ChangeEvent::Remove(vec![doc.clone()]));
        }
        self.cache.flush();
        drop(index);

        op.finish(format_args!("{} removed", matched.len()));
        Ok(RemoveResult {
            removed: matched.len(),
        })
    }

    /// Empty the live index, the cache and the pending queues
    ///
    /// `clear_durable` runs with the index lock held, after queued writes
    /// were discarded and any in-flight drain has finished.
    pub fn flush(&self, clear_durable: impl FnOnce() -> Result<()>) -> Result<()> {
        let op = OpTimer::start("flush", &self.name);
        let mut index = self.index.write();

        if let Some(pending) = &self.pending {
            pending.discard();
            // Waits for an in-flight drain so none of its chunks land after the clear
            if let Err(e) = pending.save() {
                log_debug!("{}: drain before flush failed: {}", self.name, e);
            }
        }
        clear_durable()?;

        let cleared = index.len();
        index.clear();
        self.cache.flush();
        self.publish(ChangeEvent::Flush);
        drop(index);

        op.finish(format_args!("{} cleared", cleared));
        Ok(())
    }
}
