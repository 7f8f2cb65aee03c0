//! Fan-out of debate events to connected viewers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::session::{SessionSnapshot, Utterance};

/// Everything a viewer can be told. Serialised with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebateEvent {
    InitialState {
        debate: SessionSnapshot,
    },
    DebateUpdate {
        debate: SessionSnapshot,
    },
    NewMessage {
        message: Utterance,
        scores: BTreeMap<String, u32>,
        viewers: u32,
    },
    TimerUpdate {
        timer: u32,
    },
    TopicChange {
        topic: String,
        #[serde(rename = "topicContext")]
        topic_context: Option<String>,
        timer: u32,
        message: Utterance,
    },
    AiChatResponse {
        message: Utterance,
    },
    DebateStopped {
        debate: SessionSnapshot,
    },
}

impl DebateEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::DebateUpdate { .. } => "debate_update",
            Self::NewMessage { .. } => "new_message",
            Self::TimerUpdate { .. } => "timer_update",
            Self::TopicChange { .. } => "topic_change",
            Self::AiChatResponse { .. } => "ai_chat_response",
            Self::DebateStopped { .. } => "debate_stopped",
        }
    }
}

/// Receiving end of one viewer's queue.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<DebateEvent>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the publisher has dropped this viewer.
    pub async fn recv(&mut self) -> Option<Arc<DebateEvent>> {
        self.rx.recv().await
    }
}

/// Registry of bounded per-viewer queues.
///
/// Publishing never blocks: a viewer whose queue is full or closed is
/// removed and the broadcast carries on.
#[derive(Debug)]
pub struct Publisher {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<DebateEvent>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Publisher {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, tx);
        debug!(subscriber = id, "Viewer subscribed");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            debug!(subscriber = id, "Viewer unsubscribed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every subscriber. Returns how many got it.
    pub fn publish(&self, event: DebateEvent) -> usize {
        let event = Arc::new(event);
        let mut subscribers = self.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = *id, event = event.kind(), "Subscriber stalled, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = *id, event = event.kind(), "Subscriber gone, dropping");
                false
            }
        });
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<Arc<DebateEvent>>>> {
        // A panic while holding this lock leaves the map itself intact.
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
