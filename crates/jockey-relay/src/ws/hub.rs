//! Session registry: fan-out of display messages to the clients watching a
//! thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::relay::DisplayMessage;

/// A sender for display messages to one subscriber.
pub type MessageSender = mpsc::UnboundedSender<DisplayMessage>;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: MessageSender,
}

/// Upper bound on messages held for a thread nobody watches yet.
const PENDING_LIMIT: usize = 512;

#[derive(Debug, Default)]
struct ThreadEntry {
    subscribers: Vec<Subscriber>,
    /// Messages broadcast before the first subscriber arrived. Present only
    /// for threads registered ahead of time, until someone subscribes.
    pending: Option<VecDeque<DisplayMessage>>,
}

impl ThreadEntry {
    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.pending.is_none()
    }
}

/// In-memory registry of delivery queues, keyed by thread id.
///
/// Every subscriber of a thread gets its own unbounded FIFO queue and an
/// independent copy of each broadcast. A thread registered before anyone
/// subscribes buffers its messages; the first subscriber receives them, in
/// order, ahead of anything broadcast later. The entry for a thread is
/// removed as soon as its last subscriber leaves.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Thread ID -> subscribers watching it
    threads: DashMap<String, ThreadEntry>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a thread, creating its entry if needed.
    ///
    /// The returned handle unsubscribes when dropped.
    pub fn subscribe(self: &Arc<Self>, thread_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut entry = self.threads.entry(thread_id.to_string()).or_default();
        if let Some(pending) = entry.pending.take() {
            debug!(
                "Subscriber {} adopts {} pending message(s) for thread {}",
                id,
                pending.len(),
                thread_id
            );
            for message in pending {
                // The receiver is still in hand, so this cannot fail.
                let _ = tx.send(message);
            }
        }
        entry.subscribers.push(Subscriber { id, tx });
        info!(
            "Registered subscriber {} for thread {} ({} active)",
            id,
            thread_id,
            entry.subscribers.len()
        );
        drop(entry);

        Subscription {
            registry: Arc::clone(self),
            thread_id: thread_id.to_string(),
            id,
            rx,
        }
    }

    /// Remove one subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, thread_id: &str, subscriber_id: u64) -> bool {
        let removed = match self.threads.get_mut(thread_id) {
            Some(mut entry) => {
                let before = entry.subscribers.len();
                entry.subscribers.retain(|s| s.id != subscriber_id);
                before != entry.subscribers.len()
            }
            None => false,
        };

        if removed {
            info!(
                "Unregistered subscriber {} for thread {}",
                subscriber_id, thread_id
            );
        }

        // Clean up the entry once nobody is watching
        if self
            .threads
            .remove_if(thread_id, |_, entry| entry.is_idle())
            .is_some()
        {
            debug!("Thread {} has no subscribers left, entry removed", thread_id);
        }
        removed
    }

    /// Make a thread known before anyone subscribes to it.
    ///
    /// Messages broadcast to it are held until the first subscriber arrives.
    /// Registering a thread that already exists changes nothing.
    pub fn register_thread(&self, thread_id: &str) {
        self.threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadEntry {
                subscribers: Vec::new(),
                pending: Some(VecDeque::new()),
            });
        debug!("Registered thread {}", thread_id);
    }

    /// Drop a thread and all of its subscribers. Returns how many were
    /// attached.
    pub fn teardown(&self, thread_id: &str) -> usize {
        match self.threads.remove(thread_id) {
            Some((_, entry)) => {
                let count = entry.subscribers.len();
                info!(
                    "Tore down thread {} with {} subscriber(s)",
                    thread_id, count
                );
                count
            }
            None => 0,
        }
    }

    /// Drop every thread. Returns how many subscribers were attached.
    pub fn teardown_all(&self) -> usize {
        let total = self
            .threads
            .iter()
            .map(|entry| entry.value().subscribers.len())
            .sum();
        self.threads.clear();
        total
    }

    /// Deliver a message to every subscriber of a thread.
    ///
    /// Unknown threads are a no-op; a registered thread without subscribers
    /// buffers the message. Returns the number of queues the message was
    /// delivered to.
    pub fn broadcast(&self, thread_id: &str, message: &DisplayMessage) -> usize {
        let (delivered, pruned) = match self.threads.get_mut(thread_id) {
            Some(mut entry) => {
                if let Some(pending) = entry.pending.as_mut() {
                    if pending.len() >= PENDING_LIMIT {
                        warn!(
                            "Pending buffer for thread {} is full, dropping oldest message",
                            thread_id
                        );
                        pending.pop_front();
                    }
                    pending.push_back(message.clone());
                    return 0;
                }
                let before = entry.subscribers.len();
                entry
                    .subscribers
                    .retain(|s| s.tx.send(message.clone()).is_ok());
                (entry.subscribers.len(), before - entry.subscribers.len())
            }
            None => {
                debug!("No subscribers for thread {}, dropping message", thread_id);
                return 0;
            }
        };

        if pruned > 0 {
            debug!(
                "Pruned {} closed subscriber(s) from thread {}",
                pruned, thread_id
            );
            self.threads.remove_if(thread_id, |_, entry| entry.is_idle());
        }
        delivered
    }

    /// Whether the registry has an entry for a thread.
    pub fn contains(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    pub fn subscriber_count(&self, thread_id: &str) -> usize {
        self.threads
            .get(thread_id)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Messages held for a thread that nobody has subscribed to yet.
    pub fn pending_count(&self, thread_id: &str) -> usize {
        self.threads
            .get(thread_id)
            .and_then(|entry| entry.pending.as_ref().map(VecDeque::len))
            .unwrap_or(0)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

/// One subscriber's queue. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    registry: Arc<SessionRegistry>,
    thread_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<DisplayMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Wait for the next message. `None` once the thread was torn down.
    pub async fn recv(&mut self) -> Option<DisplayMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.thread_id, self.id);
    }
}
