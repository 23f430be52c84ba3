use super::protocol::{self, ControlMessage, Event, MessageClass, TelemetryMessage};
use crate::error::{FleetError, Result};
use crate::membership::service::{MAX_DATAGRAM_SIZE, MembershipService};
use crate::membership::types::NodeId;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Capacity of each inbound queue.
pub const QUEUE_CAPACITY: usize = 100;

/// Consumer ends of the two inbound queues.
pub struct InboxReceivers {
    pub control: mpsc::Receiver<ControlMessage>,
    pub telemetry: mpsc::Receiver<TelemetryMessage>,
}

/// Inbound side of the bus: decodes datagrams into the per-class queues.
///
/// Delivery never blocks. A full queue drops the message.
pub struct Inbox {
    control: mpsc::Sender<ControlMessage>,
    telemetry: Mutex<Option<mpsc::Sender<TelemetryMessage>>>,
}

impl Inbox {
    pub fn new() -> (Arc<Self>, InboxReceivers) {
        let (control_tx, control_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (telemetry_tx, telemetry_rx) = mpsc::channel(QUEUE_CAPACITY);

        let inbox = Arc::new(Self {
            control: control_tx,
            telemetry: Mutex::new(Some(telemetry_tx)),
        });
        let receivers = InboxReceivers {
            control: control_rx,
            telemetry: telemetry_rx,
        };
        (inbox, receivers)
    }

    /// Decodes one bus datagram and queues it for its consumer.
    pub fn deliver(&self, datagram: &[u8]) -> Result<()> {
        let (class, text) = protocol::decode(datagram)?;

        match class {
            MessageClass::Control => {
                let msg: ControlMessage = text.parse()?;
                tracing::debug!("Control in: {}", msg);
                offer(&self.control, msg, "control");
            }
            MessageClass::Telemetry => {
                let msg: TelemetryMessage = text.parse()?;
                match self.telemetry.lock().as_ref() {
                    Some(tx) => offer(tx, msg, "telemetry"),
                    None => tracing::debug!("Telemetry queue closed, dropping {}", msg),
                }
            }
        }

        Ok(())
    }

    /// Closes the telemetry queue so its consumer drains and stops.
    pub fn close_telemetry(&self) -> Result<()> {
        match self.telemetry.lock().take() {
            Some(_) => Ok(()),
            None => Err(FleetError::AlreadyClosed),
        }
    }
}

fn offer<T: std::fmt::Display>(tx: &mpsc::Sender<T>, msg: T, queue: &str) {
    match tx.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(msg)) => {
            tracing::warn!("{} queue full, dropping '{}'", queue, msg);
        }
        Err(TrySendError::Closed(msg)) => {
            tracing::debug!("{} queue closed, dropping '{}'", queue, msg);
        }
    }
}

/// Best-effort broadcast over the membership transport.
///
/// Every message goes to all live peers and is then delivered to ourselves
/// synchronously, so a node always sees what it sent.
pub struct MessageBus {
    membership: Arc<MembershipService>,
    inbox: Arc<Inbox>,
    closed: AtomicBool,
}

impl MessageBus {
    pub fn new(membership: Arc<MembershipService>, inbox: Arc<Inbox>) -> Self {
        Self {
            membership,
            inbox,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &NodeId {
        self.membership.name()
    }

    pub async fn send(&self, class: MessageClass, payload: &str) -> Result<()> {
        let datagram = protocol::encode(class, payload);
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(FleetError::DatagramTooLarge {
                size: datagram.len(),
                limit: MAX_DATAGRAM_SIZE,
            });
        }

        for peer in self.membership.live_peers() {
            if let Err(e) = self.membership.send_to(&peer, datagram.clone()).await {
                tracing::warn!("Failed to send to {}: {}", peer.id, e);
            }
        }

        self.inbox.deliver(&datagram)
    }

    pub async fn control(&self, msg: &ControlMessage) -> Result<()> {
        self.send(MessageClass::Control, &msg.to_string()).await
    }

    /// Broadcasts a telemetry event from this node. Failures are only logged.
    pub async fn emit(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Bus closed, not emitting {}", event.name());
            return;
        }
        let msg = TelemetryMessage::new(event, self.name().clone());
        if let Err(e) = self.send(MessageClass::Telemetry, &msg.to_string()).await {
            tracing::warn!("Failed to emit '{}': {}", msg, e);
        }
    }

    pub async fn log(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{}", text);
        self.emit(Event::Log(text)).await;
    }

    /// Stops outbound telemetry. A second call reports `AlreadyClosed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(FleetError::AlreadyClosed);
        }
        self.inbox.close_telemetry()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
