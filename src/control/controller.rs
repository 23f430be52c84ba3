use crate::bus::{Command, ControlMessage, Event};
use crate::error::FleetError;
use crate::node::FleetNode;
use crate::state::ExecutionStatus;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How often finished workers are reaped.
pub const REAP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Continue,
    /// The node left the fleet; the process should exit.
    Terminate,
}

/// Sole writer of this node's execution status and active task kinds.
pub struct Controller {
    node: Arc<FleetNode>,
}

impl Controller {
    pub fn new(node: Arc<FleetNode>) -> Self {
        Self { node }
    }

    /// Processes control messages in arrival order until told to terminate
    /// or the queue closes.
    pub async fn run(&self, control: &mut mpsc::Receiver<ControlMessage>) -> ControlOutcome {
        let mut reap = tokio::time::interval(REAP_INTERVAL);

        loop {
            tokio::select! {
                msg = control.recv() => {
                    let Some(msg) = msg else {
                        tracing::info!("Control queue closed");
                        return ControlOutcome::Continue;
                    };
                    if self.handle(msg).await == ControlOutcome::Terminate {
                        return ControlOutcome::Terminate;
                    }
                }
                _ = reap.tick() => {
                    let reaped = self.node.pool.reap().await;
                    if reaped > 0 {
                        tracing::debug!("Reaped {} worker(s)", reaped);
                    }
                }
            }
        }
    }

    pub async fn handle(&self, msg: ControlMessage) -> ControlOutcome {
        let node = &self.node;
        if !msg.target.includes(node.name()) {
            tracing::debug!("Ignoring {} addressed to {}", msg.command.verb(), msg.target);
            return ControlOutcome::Continue;
        }
        tracing::debug!("Handling {}", msg);

        match msg.command {
            Command::Start => {
                if node.pool.is_running() {
                    tracing::debug!("Already running");
                    return ControlOutcome::Continue;
                }
                node.state.set_status(ExecutionStatus::Running);
                node.pool.start().await;
                node.bus.emit(Event::Started).await;
            }
            Command::Stop => {
                if node.pool.stop() {
                    node.state.set_status(ExecutionStatus::Stopped);
                    node.bus.emit(Event::Stopped).await;
                }
            }
            Command::Once => {
                if node.pool.is_running() {
                    tracing::debug!("Ignoring ONCE while running");
                    return ControlOutcome::Continue;
                }
                node.pool.run_once().await;
                let done = ControlMessage::to_node(Command::Done, node.name());
                if let Err(e) = node.bus.control(&done).await {
                    tracing::warn!("Failed to post DONE: {}", e);
                }
            }
            Command::SetWorkers(target) => {
                node.pool.resize(target).await;
                // A running pool announces once it gets there
                if !node.pool.is_running() {
                    node.bus.emit(Event::WorkerCountAt(target)).await;
                }
            }
            Command::SetRate(0) => {
                node.bus.log("rejecting SET_RATE 0").await;
            }
            Command::SetRate(rate) => {
                node.pool.set_rate(rate);
                node.bus.emit(Event::RateAt(rate)).await;
            }
            Command::EnableTask(kind) => {
                node.state.set_active(kind, true);
                node.pool.config_changed();
                node.bus.emit(Event::TaskEnabled(kind)).await;
            }
            Command::DisableTask(kind) => {
                node.state.set_active(kind, false);
                node.pool.config_changed();
                node.bus.emit(Event::TaskDisabled(kind)).await;
            }
            Command::SwitchSink(selector) => {
                node.sink.switch(&selector).await;
                node.bus.emit(Event::SinkSwitched(selector)).await;
            }
            Command::Terminate | Command::TerminateAll => {
                self.terminate().await;
                return ControlOutcome::Terminate;
            }
            Command::Done => {
                tracing::info!("Pass complete on {}", msg.target);
            }
        }

        ControlOutcome::Continue
    }

    /// Stops, waits out the grace period, closes the bus and leaves.
    ///
    /// Does not wait for workers to drain.
    async fn terminate(&self) {
        let node = &self.node;
        tracing::info!("Terminating {}", node.name());

        if node.pool.stop() {
            node.state.set_status(ExecutionStatus::Stopped);
            node.bus.emit(Event::Stopped).await;
        }

        tokio::time::sleep(node.terminate_grace).await;

        match node.bus.close() {
            Ok(()) | Err(FleetError::AlreadyClosed) => {}
            Err(e) => tracing::warn!("Closing bus: {}", e),
        }
        node.membership.leave(node.terminate_grace).await;
    }
}
