//! Pipeline event bus.
//!
//! The producer and the consumer emit events via [`EventBus::emit`];
//! observers subscribe via [`EventBus::subscribe`]. Built on
//! [`tokio::sync::broadcast`], so emitting with nobody listening is fine.

use tokio::sync::broadcast;

use crate::job::{JobId, SequenceId};

/// Milestones of a job's trip through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Payload stored and trigger appended.
    JobSubmitted { job_id: JobId, sequence_id: SequenceId },
    /// The consumer pulled a trigger off the queue.
    TriggerReceived { sequence_id: SequenceId, job_id: String },
    /// The trigger named a job with no payload (or no valid id at all).
    PayloadMissing { sequence_id: SequenceId, job_id: String },
    DispatchStarted { job_id: JobId },
    ResultPersisted { job_id: JobId },
    Delivered { job_id: JobId },
    DeliveryFailed { job_id: JobId, error: String },
    /// Processing failed or panicked; the internal-error result was written.
    JobFailed { job_id: JobId, error: String },
}

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receives events emitted after this call. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let job_id = JobId::new();

        assert_eq!(bus.emit(Event::Delivered { job_id }), 2);

        assert_eq!(rx1.recv().await.unwrap(), Event::Delivered { job_id });
        assert_eq!(rx2.recv().await.unwrap(), Event::Delivered { job_id });
    }

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::default();
        let count = bus.emit(Event::ResultPersisted {
            job_id: JobId::new(),
        });
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::default();
        bus.emit(Event::DispatchStarted {
            job_id: JobId::new(),
        });
        let mut rx = bus.subscribe();
        let later = JobId::new();
        bus.emit(Event::DispatchStarted { job_id: later });
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::DispatchStarted { job_id: later }
        );
    }
}
