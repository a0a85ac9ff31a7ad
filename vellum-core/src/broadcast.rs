// vellum-core/src/broadcast.rs
// Named-channel pub/sub between storages that share a collection name

use ahash::AHashMap;
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::storage::ChangeEvent;
use crate::{log_trace, log_warn};

/// Prefix of every collection channel
pub const CHANNEL_PREFIX: &str = "vellum:db:";

/// Channel a collection publishes its changes on
pub fn channel_name(collection: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, collection)
}

/// Wire shape: `{"name": ..., "type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub name: String,
    #[serde(flatten)]
    pub event: ChangeEvent,
}

impl BroadcastMessage {
    pub fn new(name: impl Into<String>, event: ChangeEvent) -> Self {
        BroadcastMessage {
            name: name.into(),
            event,
        }
    }
}

/// Inbound message callback, run on the channel's dispatcher
pub type MessageHandler = Box<dyn Fn(BroadcastMessage) + Send + 'static>;

/// Broadcast primitive: opens named channels
pub trait Broadcaster: Send + Sync {
    fn open(&self, channel: &str, handler: MessageHandler) -> Result<Box<dyn Channel>>;
}

/// One subscription to a named channel
pub trait Channel: Send + Sync {
    /// Publish to every other subscriber of the channel; never blocks
    fn post(&self, message: &BroadcastMessage);

    /// Release the subscription. Idempotent.
    fn close(&self);
}

struct Subscriber {
    id: u64,
    sender: Sender<BroadcastMessage>,
}

#[derive(Default)]
struct Hub {
    channels: RwLock<AHashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

/// In-process broadcast hub
///
/// Clones share the hub, so every storage opened with a clone of the same
/// `LocalBroadcast` acts as a separate context. Each subscription gets its
/// own dispatcher thread; a sender never receives its own messages.
#[derive(Clone, Default)]
pub struct LocalBroadcast {
    hub: Arc<Hub>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open subscriptions on `channel`
    pub fn subscribers(&self, channel: &str) -> usize {
        self.hub.channels.read().get(channel).map_or(0, Vec::len)
    }
}

impl Broadcaster for LocalBroadcast {
    fn open(&self, channel: &str, handler: MessageHandler) -> Result<Box<dyn Channel>> {
        let id = self.hub.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, inbox) = channel::unbounded::<BroadcastMessage>();

        let dispatcher = thread::Builder::new()
            .name(format!("vellum-broadcast-{}", id))
            .spawn(move || {
                for message in inbox.iter() {
                    handler(message);
                }
            })?;

        self.hub
            .channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        log_trace!("Opened broadcast channel {} (subscriber {})", channel, id);

        Ok(Box::new(LocalChannel {
            hub: Arc::clone(&self.hub),
            channel: channel.to_string(),
            id,
            closed: AtomicBool::new(false),
            dispatcher: Mutex::new(Some(dispatcher)),
        }))
    }
}

struct LocalChannel {
    hub: Arc<Hub>,
    channel: String,
    id: u64,
    closed: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Channel for LocalChannel {
    fn post(&self, message: &BroadcastMessage) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let channels = self.hub.channels.read();
        let Some(subscribers) = channels.get(&self.channel) else {
            return;
        };
        for subscriber in subscribers.iter().filter(|s| s.id != self.id) {
            if subscriber.sender.send(message.clone()).is_err() {
                log_warn!("{}: subscriber {} is gone, message dropped", self.channel, subscriber.id);
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut channels = self.hub.channels.write();
            if let Some(subscribers) = channels.get_mut(&self.channel) {
                // Dropping the sender ends the dispatcher loop
                subscribers.retain(|s| s.id != self.id);
                if subscribers.is_empty() {
                    channels.remove(&self.channel);
                }
            }
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log_warn!("{}: broadcast dispatcher panicked", self.channel);
            }
        }
        log_trace!("Closed broadcast channel {} (subscriber {})", self.channel, self.id);
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Broadcaster for storages that never share state
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcast;

struct NoopChannel;

impl Broadcaster for NoopBroadcast {
    fn open(&self, _channel: &str, _handler: MessageHandler) -> Result<Box<dyn Channel>> {
        Ok(Box::new(NoopChannel))
    }
}

impl Channel for NoopChannel {
    fn post(&self, _message: &BroadcastMessage) {}

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crossbeam::channel::Receiver;
    use serde_json::json;
    use std::time::Duration;

    fn collector(hub: &LocalBroadcast, name: &str) -> (Box<dyn Channel>, Receiver<BroadcastMessage>) {
        let (tx, rx) = channel::unbounded();
        let chan = hub
            .open(
                name,
                Box::new(move |message| {
                    let _ = tx.send(message);
                }),
            )
            .unwrap();
        (chan, rx)
    }

    fn insert_message() -> BroadcastMessage {
        let doc = Document::from_value(json!({"id": "user-1", "name": "John Doe"})).unwrap();
        BroadcastMessage::new("users", ChangeEvent::InsertOne(doc))
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name("users"), "vellum:db:users");
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(insert_message()).unwrap();
        assert_eq!(
            value,
            json!({"name": "users", "type": "insertOne", "data": {"id": "user-1", "name": "John Doe"}})
        );

        let flush = BroadcastMessage::new("users", ChangeEvent::Flush);
        let value = serde_json::to_value(&flush).unwrap();
        assert_eq!(value, json!({"name": "users", "type": "flush"}));
        assert_eq!(serde_json::from_value::<BroadcastMessage>(value).unwrap(), flush);
    }

    #[test]
    fn test_post_reaches_others_but_not_sender() {
        let hub = LocalBroadcast::new();
        let (a, a_rx) = collector(&hub, "vellum:db:users");
        let (_b, b_rx) = collector(&hub, "vellum:db:users");
        let (_c, c_rx) = collector(&hub, "vellum:db:posts");

        a.post(&insert_message());

        assert_eq!(b_rx.recv_timeout(Duration::from_secs(2)).unwrap(), insert_message());
        assert!(a_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(c_rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_close_unsubscribes() {
        let hub = LocalBroadcast::new();
        let (a, _a_rx) = collector(&hub, "vellum:db:users");
        let (b, _b_rx) = collector(&hub, "vellum:db:users");
        assert_eq!(hub.subscribers("vellum:db:users"), 2);

        b.close();
        b.close();
        assert_eq!(hub.subscribers("vellum:db:users"), 1);
        drop(a);
        assert_eq!(hub.subscribers("vellum:db:users"), 0);
    }
}
