//! Event bus routing.
//!
//! Fan-out rides on `tokio::broadcast`; a bounded ring of recent envelopes
//! serves catch-up reads for consumers that poll rather than subscribe. One
//! lock owns both the sequence counter and the ring, so envelope ids and
//! retention order can never disagree.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Stream wrapper used by subscribers.
pub type EventStream = BroadcastStream<EventEnvelope>;

/// Error emitted when event publishing fails. The envelope was already
/// retained in the ring; only the live broadcast leg failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusError {
    event_id: EventId,
    event_kind: &'static str,
}

impl EventBusError {
    /// Identifier assigned to the event when the failure occurred.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Event kind string associated with the failed delivery.
    #[must_use]
    pub const fn event_kind(&self) -> &'static str {
        self.event_kind
    }
}

impl Display for EventBusError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("event bus send failed")
    }
}

impl std::error::Error for EventBusError {}

/// Result wrapper for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Bounded retention of recent envelopes plus the id sequence. Guarded as a
/// unit by the bus mutex.
struct Ring {
    entries: VecDeque<EventEnvelope>,
    capacity: usize,
    next_id: EventId,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Stamp the event with the next id, retain it, and hand back the
    /// finished envelope for broadcast.
    fn admit(&mut self, event: Event) -> EventEnvelope {
        let envelope = EventEnvelope {
            id: self.next_id,
            timestamp: Utc::now(),
            event,
        };
        self.next_id = self.next_id.saturating_add(1);
        while self.entries.len() >= self.capacity {
            if self.entries.pop_front().is_none() {
                break;
            }
        }
        self.entries.push_back(envelope.clone());
        envelope
    }

    fn since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.entries
            .iter()
            .skip_while(|env| env.id <= id)
            .cloned()
            .collect()
    }

    fn newest_id(&self) -> Option<EventId> {
        self.entries.back().map(|env| env.id)
    }
}

struct Shared {
    sender: broadcast::Sender<EventEnvelope>,
    ring: Mutex<Ring>,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Construct a bus with a custom retention capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            shared: Arc::new(Shared {
                sender,
                ring: Mutex::new(Ring::with_capacity(capacity)),
            }),
        }
    }

    /// Construct a bus with the default retention capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event, assigning it a sequential identifier.
    ///
    /// The envelope is retained for catch-up reads even when broadcast
    /// delivery fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be delivered to the broadcast
    /// channel.
    pub fn publish(&self, event: Event) -> EventBusResult<EventId> {
        let kind = event.kind();
        let envelope = {
            let mut ring = self.lock_ring();
            ring.admit(event)
        };
        let id = envelope.id;

        if self.shared.sender.receiver_count() == 0 {
            return Ok(id);
        }
        match self.shared.sender.send(envelope) {
            Ok(_) => Ok(id),
            Err(_) => Err(EventBusError {
                event_id: id,
                event_kind: kind,
            }),
        }
    }

    /// Subscribe to live events. Consumers that need history first read
    /// [`EventBus::backlog_since`] and then switch to the stream.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.shared.sender.subscribe())
    }

    /// Retained envelopes newer than the supplied identifier.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock_ring().since(id)
    }

    /// Newest identifier currently retained.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_ring().newest_id()
    }

    fn lock_ring(&self) -> MutexGuard<'_, Ring> {
        self.shared
            .ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Stage;
    use std::error::Error;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    fn health_event() -> Event {
        Event::HealthChanged { degraded: vec![] }
    }

    #[test]
    fn ids_are_sequential_from_one() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::with_capacity(8);
        assert_eq!(bus.publish(health_event())?, 1);
        assert_eq!(bus.publish(health_event())?, 2);
        assert_eq!(bus.publish(health_event())?, 3);
        assert_eq!(bus.last_event_id(), Some(3));
        Ok(())
    }

    #[test]
    fn backlog_filters_by_id_and_keeps_order() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::with_capacity(8);
        bus.publish(Event::TaskCreated {
            task_id: Uuid::nil(),
            file_name: "a.zip".into(),
        })?;
        let second = bus.publish(health_event())?;
        let third = bus.publish(health_event())?;

        let backlog = bus.backlog_since(second - 1);
        assert_eq!(
            backlog.iter().map(|env| env.id).collect::<Vec<_>>(),
            vec![second, third]
        );
        assert!(bus.backlog_since(third).is_empty());
        Ok(())
    }

    #[test]
    fn retention_evicts_oldest_entries() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::with_capacity(2);
        for _ in 0..5 {
            bus.publish(health_event())?;
        }

        let retained = bus.backlog_since(0);
        assert_eq!(
            retained.iter().map(|env| env.id).collect::<Vec<_>>(),
            vec![4, 5]
        );
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_receive_live_events() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();
        let id = bus.publish(Event::StageCompleted {
            task_id: Uuid::nil(),
            stage: Stage::Download,
        })?;

        let envelope = stream
            .next()
            .await
            .ok_or_else(|| std::io::Error::other("stream item missing"))??;
        assert_eq!(envelope.id, id);
        assert!(matches!(envelope.event, Event::StageCompleted { .. }));
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_still_retains() -> Result<(), Box<dyn Error>> {
        let bus = EventBus::new();
        let id = bus.publish(health_event())?;
        assert_eq!(bus.backlog_since(0).len(), 1);
        assert_eq!(bus.last_event_id(), Some(id));
        Ok(())
    }

    #[test]
    fn bus_error_exposes_its_context() {
        let err = EventBusError {
            event_id: 42,
            event_kind: "task_created",
        };
        assert_eq!(err.event_id(), 42);
        assert_eq!(err.event_kind(), "task_created");
        assert_eq!(err.to_string(), "event bus send failed");
    }
}
