//! Control State Machine Tests
//!
//! ## Test Scopes
//! - **Transitions**: START/STOP idempotence and target filtering.
//! - **Configuration**: workers, rate, task kinds and sink selection.
//! - **Lifecycle**: ONCE completion and TERMINATE.

#[cfg(test)]
mod tests {
    use crate::bus::{Command, ControlMessage, Event, InboxReceivers};
    use crate::control::{ControlOutcome, Controller};
    use crate::executor::sink::MemorySink;
    use crate::executor::source::MemorySource;
    use crate::executor::types::{RecordBatch, TaskKind};
    use crate::membership::types::NodeId;
    use crate::node::{FleetNode, NodeSettings};
    use crate::state::ExecutionStatus;
    use std::sync::Arc;
    use std::time::Duration;

    async fn node(name: &str) -> (Arc<FleetNode>, Controller, InboxReceivers, Arc<MemorySink>) {
        let settings = NodeSettings {
            terminate_grace: Duration::from_millis(50),
            ..NodeSettings::local(name)
        };
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(MemorySource::new());
        source.add(
            TaskKind::Campaign,
            RecordBatch::new("campaign_static_0", "c1 1.0\nc2 2.0\n"),
        );

        let (node, rx) = FleetNode::launch(settings, sink.clone(), source).await.unwrap();
        let controller = Controller::new(node.clone());
        (node, controller, rx, sink)
    }

    fn events(rx: &mut InboxReceivers) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.telemetry.try_recv() {
            events.push(msg.event);
        }
        events
    }

    fn count(events: &[Event], wanted: &Event) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    // ============================================================
    // TRANSITIONS
    // ============================================================

    #[tokio::test]
    async fn test_start_twice_emits_one_started() {
        // ARRANGE
        let (node, controller, mut rx, _) = node("start-twice").await;

        // ACT
        controller.handle(ControlMessage::to_all(Command::Start)).await;
        controller.handle(ControlMessage::to_all(Command::Start)).await;

        // ASSERT
        assert_eq!(node.state.status(), ExecutionStatus::Running);
        assert!(node.pool.is_running());
        assert_eq!(count(&events(&mut rx), &Event::Started), 1);

        controller.handle(ControlMessage::to_all(Command::Stop)).await;
        controller.handle(ControlMessage::to_all(Command::Stop)).await;
        assert_eq!(node.state.status(), ExecutionStatus::Stopped);
        assert_eq!(count(&events(&mut rx), &Event::Stopped), 1);
        node.membership.shutdown();
    }

    #[tokio::test]
    async fn test_messages_for_other_nodes_are_ignored() {
        let (node, controller, mut rx, _) = node("me").await;

        let outcome = controller
            .handle(ControlMessage::to_node(Command::Start, &NodeId::from("someone-else")))
            .await;

        assert_eq!(outcome, ControlOutcome::Continue);
        assert_eq!(node.state.status(), ExecutionStatus::Stopped);
        assert!(events(&mut rx).is_empty());
        node.membership.shutdown();
    }

    // ============================================================
    // CONFIGURATION
    // ============================================================

    #[tokio::test]
    async fn test_set_workers_while_stopped_announces_immediately() {
        let (node, controller, mut rx, _) = node("workers").await;

        controller
            .handle(ControlMessage::to_all(Command::SetWorkers(4)))
            .await;

        assert_eq!(node.targets.workers(), 4);
        assert_eq!(node.pool.live_workers(), 0);
        assert_eq!(events(&mut rx), vec![Event::WorkerCountAt(4)]);
        node.membership.shutdown();
    }

    #[tokio::test]
    async fn test_set_rate_zero_is_rejected() {
        // ARRANGE
        let (node, controller, mut rx, _) = node("rate").await;
        let before = node.targets.rate();

        // ACT
        controller.handle(ControlMessage::to_all(Command::SetRate(0))).await;
        controller.handle(ControlMessage::to_all(Command::SetRate(50))).await;

        // ASSERT
        let seen = events(&mut rx);
        assert!(matches!(&seen[0], Event::Log(text) if text.contains("SET_RATE 0")));
        assert_eq!(seen[1], Event::RateAt(50));
        assert_ne!(before, 50);
        assert_eq!(node.targets.rate(), 50);
        node.membership.shutdown();
    }

    #[tokio::test]
    async fn test_task_toggles_flip_active_flags() {
        let (node, controller, mut rx, _) = node("tasks").await;

        controller
            .handle(ControlMessage::to_all(Command::DisableTask(TaskKind::Campaign)))
            .await;
        assert!(!node.state.is_active(TaskKind::Campaign));

        controller
            .handle(ControlMessage::to_all(Command::EnableTask(TaskKind::Campaign)))
            .await;
        assert!(node.state.is_active(TaskKind::Campaign));

        assert_eq!(
            events(&mut rx),
            vec![
                Event::TaskDisabled(TaskKind::Campaign),
                Event::TaskEnabled(TaskKind::Campaign)
            ]
        );
        node.membership.shutdown();
    }

    #[tokio::test]
    async fn test_switch_sink_redirects_next_pass() {
        // ARRANGE
        let (node, controller, mut rx, sink) = node("switch").await;
        controller.handle(ControlMessage::to_all(Command::Once)).await;
        assert_eq!(sink.store("local").len(), 2);

        // ACT
        controller
            .handle(ControlMessage::to_all(Command::SwitchSink("archive".into())))
            .await;
        controller.handle(ControlMessage::to_all(Command::Once)).await;

        // ASSERT
        assert_eq!(node.sink.selector(), "archive");
        assert_eq!(sink.store("archive").len(), 2);
        assert!(events(&mut rx).contains(&Event::SinkSwitched("archive".into())));
        node.membership.shutdown();
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    #[tokio::test]
    async fn test_once_runs_a_pass_and_posts_done() {
        // ARRANGE
        let (node, controller, mut rx, sink) = node("once").await;

        // ACT
        controller
            .handle(ControlMessage::to_node(Command::Once, &NodeId::from("once")))
            .await;

        // ASSERT
        assert_eq!(node.state.status(), ExecutionStatus::Stopped);
        assert!(sink.store("local").document("campaign", "c2").is_some());
        let done = rx.control.try_recv().unwrap();
        assert_eq!(done, ControlMessage::to_node(Command::Done, &NodeId::from("once")));
        node.membership.shutdown();
    }

    #[tokio::test]
    async fn test_once_is_ignored_while_running() {
        let (node, controller, mut rx, _) = node("busy").await;
        controller.handle(ControlMessage::to_all(Command::Start)).await;

        controller.handle(ControlMessage::to_all(Command::Once)).await;

        assert!(rx.control.try_recv().is_err());
        controller.handle(ControlMessage::to_all(Command::Stop)).await;
        node.membership.shutdown();
    }

    #[tokio::test]
    async fn test_terminate_all_ends_the_loop() {
        // ARRANGE
        let (node, controller, mut rx, _) = node("bye").await;
        controller.handle(ControlMessage::to_all(Command::Start)).await;
        node.bus
            .control(&ControlMessage::to_all(Command::TerminateAll))
            .await
            .unwrap();

        // ACT
        let outcome = tokio::time::timeout(Duration::from_secs(5), controller.run(&mut rx.control))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(outcome, ControlOutcome::Terminate);
        assert!(!node.pool.is_running());
        assert_eq!(node.state.status(), ExecutionStatus::Stopped);
        assert!(node.bus.is_closed());
    }
}
