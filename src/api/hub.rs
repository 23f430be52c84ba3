//! UI Event Hub
//!
//! Fans operator-facing events out to every connected WebSocket. Producers
//! never wait: a subscriber that falls behind loses its oldest events.

use crate::bus::{Event, TelemetryMessage};
use crate::membership::types::NodeId;
use crate::state::NodeView;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Events buffered per subscriber.
pub const HUB_CAPACITY: usize = 256;

/// One message pushed to operator sockets as `{type, node, value?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl UiEvent {
    pub fn from_telemetry(msg: &TelemetryMessage) -> Self {
        let value = match &msg.event {
            // Charting wants [timestamp, count]
            Event::ThroughputSample(sample) => {
                Some(Value::from(vec![sample.timestamp_ms, sample.count]))
            }
            event => event.value().map(Value::from),
        };

        Self {
            kind: msg.event.name().to_string(),
            node: msg.origin.to_string(),
            value,
        }
    }

    pub fn new_node(view: &NodeView) -> Self {
        Self {
            kind: "NEWNODE".to_string(),
            node: view.name.clone(),
            value: serde_json::to_value(view).ok(),
        }
    }

    pub fn gone_node(id: &NodeId) -> Self {
        Self {
            kind: "GONENODE".to_string(),
            node: id.to_string(),
            value: None,
        }
    }
}

pub struct UiHub {
    tx: broadcast::Sender<UiEvent>,
}

impl UiHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, event: UiEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for UiHub {
    fn default() -> Self {
        Self::new(HUB_CAPACITY)
    }
}
