//! Shared State Tests
//!
//! ## Test Scopes
//! - **Defaults**: Own node starts stopped with every kind active; peers start inactive.
//! - **Merge Rule**: Only live, non-self nodes are taken from a remote snapshot.
//! - **Views**: Operator view ordering and the summed throughput series.

#[cfg(test)]
mod tests {
    use crate::executor::types::{PoolTargets, TaskKind};
    use crate::membership::types::NodeId;
    use crate::state::{ExecutionStatus, FleetState, NodeOps, ThroughputSample};
    use std::collections::BTreeMap;

    fn id(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn snapshot_of(entries: &[(&str, NodeOps)]) -> Vec<u8> {
        let map: BTreeMap<NodeId, NodeOps> = entries
            .iter()
            .map(|(name, ops)| (id(name), ops.clone()))
            .collect();
        serde_json::to_vec(&map).unwrap()
    }

    fn running_with_log(line: &str) -> NodeOps {
        let mut ops = NodeOps::peer();
        ops.status = ExecutionStatus::Running;
        ops.logs.append(line.to_string());
        ops
    }

    // ============================================================
    // DEFAULTS
    // ============================================================

    #[test]
    fn test_own_node_starts_stopped_and_fully_active() {
        let state = FleetState::new(id("primary"));

        assert_eq!(state.status(), ExecutionStatus::Stopped);
        for kind in TaskKind::ALL {
            assert!(state.is_active(kind));
        }
    }

    #[test]
    fn test_joined_peer_defaults_to_inactive() {
        let state = FleetState::new(id("primary"));

        state.add_peer(&id("c1"));

        let peer = state.node(&id("c1")).unwrap();
        assert_eq!(peer.status, ExecutionStatus::Stopped);
        assert!(peer.active.values().all(|active| !active));
    }

    #[test]
    fn test_own_mutations() {
        let state = FleetState::new(id("primary"));

        state.set_status(ExecutionStatus::Running);
        state.set_active(TaskKind::Campaign, false);
        state.record_log("hello");
        state.record_throughput(ThroughputSample {
            count: 7,
            timestamp_ms: 1000,
        });

        assert!(state.is_running());
        assert!(!state.is_active(TaskKind::Campaign));
        assert!(state.is_active(TaskKind::Advertiser));
        let own = state.node(&id("primary")).unwrap();
        assert_eq!(own.logs.last().unwrap(), "hello");
        assert_eq!(own.throughput.last().unwrap().count, 7);
    }

    // ============================================================
    // MERGE RULE
    // ============================================================

    #[test]
    fn test_merge_only_takes_live_nodes() {
        // ARRANGE: live {A, B}, remote knows {A, B, C}
        let state = FleetState::new(id("me"));
        let remote = snapshot_of(&[
            ("A", running_with_log("a")),
            ("B", running_with_log("b")),
            ("C", running_with_log("c")),
        ]);

        // ACT
        let merged = state.merge(&remote, &[id("A"), id("B")]);

        // ASSERT
        assert_eq!(merged, 2);
        assert_eq!(state.known_nodes(), vec![id("A"), id("B"), id("me")]);
        assert_eq!(state.node(&id("A")).unwrap().logs.last().unwrap(), "a");
        assert!(state.node(&id("C")).is_none());
    }

    #[test]
    fn test_merge_never_overwrites_self() {
        let state = FleetState::new(id("me"));
        state.record_log("mine");
        let remote = snapshot_of(&[("me", running_with_log("theirs"))]);

        let merged = state.merge(&remote, &[id("me")]);

        assert_eq!(merged, 0);
        let own = state.node(&id("me")).unwrap();
        assert_eq!(own.status, ExecutionStatus::Stopped);
        assert_eq!(own.logs.last().unwrap(), "mine");
    }

    #[test]
    fn test_merge_overwrites_wholesale() {
        let state = FleetState::new(id("me"));
        state.merge(&snapshot_of(&[("A", running_with_log("old"))]), &[id("A")]);

        state.merge(&snapshot_of(&[("A", NodeOps::peer())]), &[id("A")]);

        let a = state.node(&id("A")).unwrap();
        assert_eq!(a.status, ExecutionStatus::Stopped);
        assert!(a.logs.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_keeps_cache() {
        let state = FleetState::new(id("me"));
        state.merge(&snapshot_of(&[("A", running_with_log("kept"))]), &[id("A")]);

        let merged = state.merge(b"{not json", &[id("A")]);

        assert_eq!(merged, 0);
        assert_eq!(state.node(&id("A")).unwrap().logs.last().unwrap(), "kept");
    }

    #[test]
    fn test_removed_peer_is_purged() {
        let state = FleetState::new(id("me"));
        state.add_peer(&id("c1"));

        assert!(state.remove_peer(&id("c1")));
        assert!(!state.remove_peer(&id("me")));
        assert!(state.node(&id("c1")).is_none());
        assert!(state.node(&id("me")).is_some());
    }

    #[test]
    fn test_snapshot_is_readable_by_peers() {
        let source = FleetState::new(id("c1"));
        source.set_status(ExecutionStatus::Running);
        source.set_active(TaskKind::TotalData, false);

        let sink = FleetState::new(id("primary"));
        sink.merge(&source.snapshot(), &[id("c1")]);

        let copy = sink.node(&id("c1")).unwrap();
        assert_eq!(copy.status, ExecutionStatus::Running);
        assert!(!copy.is_active(TaskKind::TotalData));
        assert!(copy.is_active(TaskKind::Campaign));
    }

    // ============================================================
    // VIEWS
    // ============================================================

    #[test]
    fn test_view_sums_throughput_by_timestamp() {
        let state = FleetState::new(id("b"));
        state.record_throughput(ThroughputSample {
            count: 3,
            timestamp_ms: 2000,
        });
        state.record_throughput(ThroughputSample {
            count: 1,
            timestamp_ms: 1000,
        });

        let mut peer = NodeOps::peer();
        peer.throughput.append(ThroughputSample {
            count: 4,
            timestamp_ms: 2000,
        });
        state.merge(&snapshot_of(&[("a", peer)]), &[id("a")]);
        let targets = PoolTargets::new(3, 250);

        let view = state.view(&[id("b"), id("a")], &targets);

        assert_eq!(view.target_rate, 250);
        assert_eq!(view.target_workers, 3);
        assert_eq!(view.nodes[0].name, "a");
        assert_eq!(view.nodes[1].name, "b");
        assert_eq!(view.throughput, vec![(1000, 1), (2000, 7)]);
        assert_eq!(view.nodes[1].tasks.len(), TaskKind::ALL.len());
    }

    #[test]
    fn test_view_of_unknown_member_uses_placeholder() {
        let state = FleetState::new(id("me"));

        let view = state.view(&[id("stranger")], &PoolTargets::new(1, 100));

        assert_eq!(view.nodes.len(), 1);
        assert_eq!(view.nodes[0].state, ExecutionStatus::Stopped);
        assert!(view.nodes[0].tasks.iter().all(|task| !task.active));
    }
}
