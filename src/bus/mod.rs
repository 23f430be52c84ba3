//! Message Bus
//!
//! Two best-effort broadcast channels, Control and Telemetry, carried as user
//! datagrams of the membership layer. There is no ordering or delivery
//! guarantee between peers; control commands are idempotent instead.
//!
//! - **`protocol`**: class byte plus the text grammars of both channels.
//! - **`service`**: outbound [`MessageBus`] and the inbound [`Inbox`] queues.

pub mod protocol;
pub mod service;


pub use protocol::{Command, ControlMessage, Event, MessageClass, Target, TelemetryMessage};
pub use service::{Inbox, InboxReceivers, MessageBus, QUEUE_CAPACITY};
