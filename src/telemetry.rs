//! Telemetry duties
//!
//! Two long-running tasks per node:
//! - the throughput monitor samples the pool's completed-unit counter once a
//!   second and broadcasts it;
//! - the consumer drains the Telemetry queue, records our own log lines and
//!   samples into shared state, and forwards every event to the UI hub.

use crate::api::hub::{UiEvent, UiHub};
use crate::bus::{Event, MessageBus, TelemetryMessage};
use crate::executor::pool::WorkerPool;
use crate::executor::types::now_ms;
use crate::node::FleetNode;
use crate::state::{FleetState, ThroughputSample};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Starts both duties for `node`.
pub fn spawn(
    node: &Arc<FleetNode>,
    telemetry: mpsc::Receiver<TelemetryMessage>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let monitor = tokio::spawn(run_monitor(
        node.pool.clone(),
        node.bus.clone(),
        SAMPLE_INTERVAL,
    ));
    let consumer = tokio::spawn(run_consumer(
        node.state.clone(),
        node.hub.clone(),
        telemetry,
    ));
    (monitor, consumer)
}

/// Emits one THROUGHPUT_SAMPLE per interval until the bus closes.
pub async fn run_monitor(pool: Arc<WorkerPool>, bus: Arc<MessageBus>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if bus.is_closed() {
            break;
        }
        let sample = ThroughputSample {
            count: pool.take_completed(),
            timestamp_ms: whole_second(now_ms()),
        };
        bus.emit(Event::ThroughputSample(sample)).await;
    }

    tracing::debug!("Throughput monitor stopped");
}

/// Truncates to the second so samples from different nodes share a key.
fn whole_second(ms: u64) -> u64 {
    ms / 1000 * 1000
}

/// Runs until the telemetry queue is closed.
pub async fn run_consumer(
    state: Arc<FleetState>,
    hub: Arc<UiHub>,
    mut telemetry: mpsc::Receiver<TelemetryMessage>,
) {
    while let Some(msg) = telemetry.recv().await {
        if &msg.origin == state.me() {
            match &msg.event {
                Event::Log(text) => state.record_log(text.clone()),
                Event::ThroughputSample(sample) => state.record_throughput(*sample),
                _ => {}
            }
        }
        hub.publish(UiEvent::from_telemetry(&msg));
    }

    tracing::info!("Telemetry consumer stopped");
}
