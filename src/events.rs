use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{AgentName, FinishReason, SessionId};

/// Structured notifications for reporting and remote-control surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionCreated {
        agent: AgentName,
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    SessionFinished {
        agent: AgentName,
        session_id: SessionId,
        reason: FinishReason,
        message: Option<String>,
        at: DateTime<Utc>,
    },
    TaskStarted {
        agent: AgentName,
        task: String,
        at: DateTime<Utc>,
    },
    TaskFinished {
        agent: AgentName,
        task: String,
        reason: FinishReason,
        at: DateTime<Utc>,
    },
    AgentPaused {
        agent: AgentName,
        paused: bool,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn agent(&self) -> &str {
        match self {
            Event::SessionCreated { agent, .. }
            | Event::SessionFinished { agent, .. }
            | Event::TaskStarted { agent, .. }
            | Event::TaskFinished { agent, .. }
            | Event::AgentPaused { agent, .. } => agent,
        }
    }
}

/// Fire-and-forget event consumer.
pub trait NotificationSink: Send + Sync {
    fn send(&self, event: Event);
}

/// Broadcasts events to any number of subscribers. Events sent while nobody
/// listens are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for EventBus {
    fn send(&self, event: Event) {
        log::debug!("{}: event {:?}", event.agent(), event);
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.send(Event::TaskStarted {
            agent: "alpha".to_string(),
            task: "pit".to_string(),
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.agent(), "alpha");
        assert!(matches!(event, Event::TaskStarted { ref task, .. } if task == "pit"));
    }

    #[test]
    fn test_send_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.send(Event::AgentPaused {
            agent: "alpha".to_string(),
            paused: true,
            at: Utc::now(),
        });
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = Event::AgentPaused {
            agent: "alpha".to_string(),
            paused: false,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent_paused");
        assert_eq!(json["paused"], false);
    }
}
