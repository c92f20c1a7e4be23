//! Event sink and hub — user-visible notifications.
//!
//! Cycles emit through an [`EventSink`], a bounded mpsc sender that never
//! blocks: when the buffer is full the newest event is dropped. The
//! [`EventHub`] drains the receiving end, keeps a short history for late
//! subscribers, and fans events out to WebSocket clients.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Default sink capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// Events kept in memory for newly connected clients.
const HISTORY_LEN: usize = 200;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Send,
    Reply,
    Bounce,
    Error,
    Pause,
    Resume,
    StageAdvance,
    Reset,
    Warning,
    Status,
}

/// One notification: `{kind, account, message, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupEvent {
    pub kind: EventKind,
    pub account: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl WarmupEvent {
    pub fn new(kind: EventKind, account: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            account: account.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of a non-blocking emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped,
}

/// Bounded, non-blocking producer handle. Cheap to clone.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<WarmupEvent>,
}

impl EventSink {
    /// Create a sink and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WarmupEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn emit(
        &self,
        kind: EventKind,
        account: impl Into<String>,
        message: impl Into<String>,
    ) -> Delivery {
        self.emit_event(WarmupEvent::new(kind, account, message))
    }

    pub fn emit_event(&self, event: WarmupEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(event)) => {
                trace!(kind = ?event.kind, "Event buffer full, dropping event");
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }
}

/// Frames sent to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Buffered history, sent on connect and after a lag.
    EventsSync { events: Vec<WarmupEvent> },
    /// One live event.
    Event { event: WarmupEvent },
}

/// In-memory history plus broadcast fan-out.
pub struct EventHub {
    history: RwLock<VecDeque<WarmupEvent>>,
    tx: broadcast::Sender<WarmupEvent>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(Self {
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LEN)),
            tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WarmupEvent> {
        self.tx.subscribe()
    }

    /// Buffered events, oldest first.
    pub async fn snapshot(&self) -> Vec<WarmupEvent> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn publish(&self, event: WarmupEvent) {
        debug!(
            kind = ?event.kind,
            account = %event.account,
            message = %event.message,
            "Event"
        );
        {
            let mut history = self.history.write().await;
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // ok if no clients are connected
        let _ = self.tx.send(event);
    }

    /// Drain `rx` into the hub until every sink is dropped.
    pub fn spawn_drain(self: &Arc<Self>, mut rx: mpsc::Receiver<WarmupEvent>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                hub.publish(event).await;
            }
            debug!("Event channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_drops_newest_when_full() {
        let (sink, mut rx) = EventSink::channel(2);
        assert_eq!(sink.emit(EventKind::Send, "a", "one"), Delivery::Queued);
        assert_eq!(sink.emit(EventKind::Send, "a", "two"), Delivery::Queued);
        assert_eq!(sink.emit(EventKind::Send, "a", "three"), Delivery::Dropped);

        assert_eq!(rx.try_recv().unwrap().message, "one");
        assert_eq!(rx.try_recv().unwrap().message, "two");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_after_receiver_dropped_is_dropped() {
        let (sink, rx) = EventSink::channel(4);
        drop(rx);
        assert_eq!(sink.emit(EventKind::Error, "a", "x"), Delivery::Dropped);
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::StageAdvance).unwrap();
        assert_eq!(json, "\"stage_advance\"");
    }

    #[test]
    fn ws_frames_are_tagged() {
        let msg = WsMessage::Event {
            event: WarmupEvent::new(EventKind::Reset, "system", "reset"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["kind"], "reset");
    }

    #[tokio::test]
    async fn hub_keeps_bounded_history() {
        let hub = EventHub::new();
        for i in 0..(HISTORY_LEN + 5) {
            hub.publish(WarmupEvent::new(EventKind::Status, "system", i.to_string()))
                .await;
        }
        let snap = hub.snapshot().await;
        assert_eq!(snap.len(), HISTORY_LEN);
        assert_eq!(snap[0].message, "5");
    }

    #[tokio::test]
    async fn drain_forwards_to_subscribers() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe();
        let (sink, rx) = EventSink::channel(8);
        let drain = hub.spawn_drain(rx);

        sink.emit(EventKind::Send, "a@x.com", "sent");
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::Send);

        drop(sink);
        drain.await.unwrap();
        assert_eq!(hub.snapshot().await.len(), 1);
    }
}
