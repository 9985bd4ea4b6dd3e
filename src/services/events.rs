//! Outbound domain events. The engine only publishes; delivery
//! (push/SMS/email) is owned by subscribers living outside this
//! subsystem, which keeps grading logic independently testable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    QuizCreated {
        quiz_id: String,
        owner_id: String,
        title: String,
        due_date: DateTime<Utc>,
    },
    QuizGraded {
        quiz_id: String,
        student_id: String,
        score: i32,
        auto_submitted: bool,
    },
}

#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is not an error; the event is
    /// simply dropped after logging.
    pub fn publish(&self, event: DomainEvent) {
        tracing::info!(event = ?event, "Publishing domain event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish(DomainEvent::QuizGraded {
            quiz_id: "q1".into(),
            student_id: "s1".into(),
            score: 5,
            auto_submitted: true,
        });

        match rx.recv().await.unwrap() {
            DomainEvent::QuizGraded { score, .. } => assert_eq!(score, 5),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let publisher = EventPublisher::new(8);
        publisher.publish(DomainEvent::QuizCreated {
            quiz_id: "q1".into(),
            owner_id: "t1".into(),
            title: "Quiz".into(),
            due_date: Utc::now(),
        });
    }
}
