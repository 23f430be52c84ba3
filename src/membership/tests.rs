//! Membership Module Tests
//!
//! Validates the gossip membership layer on loopback sockets.
//!
//! ## Test Scopes
//! - **Data Structures**: Node identity, liveness and wire encoding.
//! - **Conflict Resolution**: Incarnation rules for Suspect/Alive/Dead rumours.
//! - **Live Clusters**: Join, leave, user datagrams and delegate callbacks.

#[cfg(test)]
mod tests {
    use crate::error::FleetError;
    use crate::membership::service::{MAX_DATAGRAM_SIZE, MembershipService};
    use crate::membership::types::{GossipConfig, GossipMessage, Node, NodeId, NodeState};
    use crate::membership::{Delegate, NoopDelegate};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingDelegate {
        joined: Mutex<Vec<NodeId>>,
        left: Mutex<Vec<NodeId>>,
        messages: Mutex<Vec<Vec<u8>>>,
        merges: Mutex<Vec<(Vec<u8>, Vec<NodeId>)>>,
    }

    impl Delegate for RecordingDelegate {
        fn local_state(&self) -> Vec<u8> {
            b"snapshot".to_vec()
        }

        fn merge_remote_state(&self, snapshot: &[u8], live: &[NodeId]) {
            self.merges.lock().push((snapshot.to_vec(), live.to_vec()));
        }

        fn notify_msg(&self, payload: &[u8]) {
            self.messages.lock().push(payload.to_vec());
        }

        fn notify_join(&self, node: &Node) {
            self.joined.lock().push(node.id.clone());
        }

        fn notify_leave(&self, node: &Node) {
            self.left.lock().push(node.id.clone());
        }
    }

    async fn spawn_node(name: &str) -> (Arc<MembershipService>, Arc<RecordingDelegate>) {
        let delegate = Arc::new(RecordingDelegate::default());
        let service = MembershipService::new(GossipConfig::local(name), delegate.clone())
            .await
            .unwrap();
        service.clone().start().await;
        (service, delegate)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    fn peer(name: &str, state: NodeState, incarnation: u64) -> Node {
        Node {
            id: NodeId::from(name),
            addr: "127.0.0.1:9".parse().unwrap(),
            state,
            incarnation,
            last_seen: None,
        }
    }

    // ============================================================
    // DATA STRUCTURE TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        assert_ne!(id1, id2, "Each NodeId should be unique");
    }

    #[test]
    fn test_suspect_counts_as_live() {
        assert!(NodeState::Alive.is_live());
        assert!(NodeState::Suspect.is_live());
        assert!(!NodeState::Dead.is_live());
    }

    #[test]
    fn test_ack_bincode_serialization() {
        let msg = GossipMessage::Ack {
            from: NodeId::from("primary"),
            seq: 42,
            incarnation: 7,
            members: vec![peer("c1", NodeState::Suspect, 3)],
        };

        let encoded = bincode::serialize(&msg).expect("Bincode serialization failed");
        let decoded: GossipMessage = bincode::deserialize(&encoded).unwrap();

        match decoded {
            GossipMessage::Ack {
                from,
                seq,
                members,
                ..
            } => {
                assert_eq!(from, NodeId::from("primary"));
                assert_eq!(seq, 42);
                assert_eq!(members[0].state, NodeState::Suspect);
                assert!(members[0].last_seen.is_none());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    // ============================================================
    // SERVICE INITIALIZATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_fresh_service_is_a_cluster_of_one() {
        let service = MembershipService::new(GossipConfig::local("solo"), Arc::new(NoopDelegate))
            .await
            .unwrap();

        assert_eq!(service.member_count(), 1);
        assert_eq!(service.members(), vec![NodeId::from("solo")]);
        assert_eq!(service.health(), 0);
        assert!(service.am_leader());
        assert_ne!(service.local_node.addr.port(), 0);
    }

    #[tokio::test]
    async fn test_join_without_seeds_is_valid() {
        let (service, _) = spawn_node("founder").await;

        let contacted = service.join(&[]).await.unwrap();

        assert_eq!(contacted, 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_join_with_only_dead_seeds_fails() {
        // ARRANGE: reserve a port, then free it so nothing listens there
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_seed = probe.local_addr().unwrap();
        drop(probe);

        let (service, _) = spawn_node("lonely").await;

        // ACT
        let result = service.join(&[dead_seed]).await;

        // ASSERT
        assert!(matches!(result, Err(FleetError::JoinFailed { attempted: 1 })));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_user_datagram_is_rejected() {
        let (service, _) = spawn_node("sender").await;
        let target = service.local_snapshot();

        let result = service.send_to(&target, vec![0u8; MAX_DATAGRAM_SIZE + 1]).await;

        assert!(matches!(result, Err(FleetError::DatagramTooLarge { .. })));
        service.shutdown();
    }

    // ============================================================
    // CONFLICT RESOLUTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_self_suspicion_is_refuted_with_higher_incarnation() {
        let service = MembershipService::new(GossipConfig::local("me"), Arc::new(NoopDelegate))
            .await
            .unwrap();

        service.merge_member(peer("me", NodeState::Suspect, 5));

        assert_eq!(service.incarnation(), 6);
        let me = service.local_snapshot();
        assert_eq!(me.state, NodeState::Alive);
        assert_eq!(me.incarnation, 6);
    }

    #[tokio::test]
    async fn test_unknown_dead_member_is_ignored() {
        let delegate = Arc::new(RecordingDelegate::default());
        let service = MembershipService::new(GossipConfig::local("me"), delegate.clone())
            .await
            .unwrap();

        service.merge_member(peer("ghost", NodeState::Dead, 1));

        assert!(service.get_member(&NodeId::from("ghost")).is_none());
        assert!(delegate.joined.lock().is_empty());
    }

    #[tokio::test]
    async fn test_incarnation_ordering() {
        let delegate = Arc::new(RecordingDelegate::default());
        let service = MembershipService::new(GossipConfig::local("me"), delegate.clone())
            .await
            .unwrap();
        let id = NodeId::from("c1");

        // Discovery fires a join
        service.merge_member(peer("c1", NodeState::Alive, 2));
        assert_eq!(delegate.joined.lock().clone(), vec![id.clone()]);

        // Older rumour loses
        service.merge_member(peer("c1", NodeState::Suspect, 1));
        assert_eq!(service.get_member(&id).unwrap().state, NodeState::Alive);

        // Newer suspicion wins, but Suspect is still live: no leave callback
        service.merge_member(peer("c1", NodeState::Suspect, 3));
        assert_eq!(service.get_member(&id).unwrap().state, NodeState::Suspect);
        assert!(delegate.left.lock().is_empty());

        // Equal-incarnation Alive refutes Suspect
        service.merge_member(peer("c1", NodeState::Alive, 3));
        assert_eq!(service.get_member(&id).unwrap().state, NodeState::Alive);

        // Equal-incarnation Dead is accepted and fires leave exactly once
        service.merge_member(peer("c1", NodeState::Dead, 3));
        service.merge_member(peer("c1", NodeState::Dead, 3));
        assert_eq!(service.get_member(&id).unwrap().state, NodeState::Dead);
        assert_eq!(delegate.left.lock().clone(), vec![id.clone()]);
        assert_eq!(service.member_count(), 1);
    }

    #[tokio::test]
    async fn test_join_revives_dead_member() {
        let delegate = Arc::new(RecordingDelegate::default());
        let service = MembershipService::new(GossipConfig::local("seed"), delegate.clone())
            .await
            .unwrap();
        let id = NodeId::from("c1");

        service.merge_member(peer("c1", NodeState::Alive, 4));
        service.merge_member(peer("c1", NodeState::Dead, 4));
        assert_eq!(service.member_count(), 1);

        service.handle_join(peer("c1", NodeState::Alive, 1)).await;

        let revived = service.get_member(&id).unwrap();
        assert_eq!(revived.state, NodeState::Alive);
        assert_eq!(revived.incarnation, 4);
        assert_eq!(delegate.joined.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_merge_state_passes_live_peers_only() {
        let delegate = Arc::new(RecordingDelegate::default());
        let service = MembershipService::new(GossipConfig::local("me"), delegate.clone())
            .await
            .unwrap();
        service.merge_member(peer("a", NodeState::Alive, 1));
        service.merge_member(peer("b", NodeState::Suspect, 1));
        service.merge_member(peer("c", NodeState::Alive, 1));
        service.merge_member(peer("c", NodeState::Dead, 1));

        service.merge_state(b"remote");

        let merges = delegate.merges.lock();
        let (snapshot, mut live) = merges[0].clone();
        live.sort();
        assert_eq!(snapshot, b"remote".to_vec());
        assert_eq!(live, vec![NodeId::from("a"), NodeId::from("b")]);
    }

    #[tokio::test]
    async fn test_dead_members_are_forgotten_after_retention() {
        // ARRANGE
        let config = GossipConfig {
            dead_retention: Duration::from_millis(100),
            ..GossipConfig::local("me")
        };
        let service = MembershipService::new(config, Arc::new(NoopDelegate))
            .await
            .unwrap();
        service.merge_member(peer("alive", NodeState::Alive, 1));
        service.merge_member(peer("gone", NodeState::Alive, 1));
        service.merge_member(peer("gone", NodeState::Dead, 1));

        // ACT / ASSERT: kept within the window, dropped after it
        assert_eq!(service.reap_dead(Instant::now()), 0);
        assert!(service.get_member(&NodeId::from("gone")).is_some());

        let reaped = service.reap_dead(Instant::now() + Duration::from_millis(200));

        assert_eq!(reaped, 1);
        assert!(service.get_member(&NodeId::from("gone")).is_none());
        assert!(service.get_member(&NodeId::from("alive")).is_some());
    }

    #[tokio::test]
    async fn test_ack_leaves_out_dead_members() {
        // ARRANGE
        let (service, _) = spawn_node("acker").await;
        service.merge_member(peer("alive", NodeState::Alive, 1));
        service.merge_member(peer("gone", NodeState::Alive, 1));
        service.merge_member(peer("gone", NodeState::Dead, 1));
        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ping = GossipMessage::Ping {
            from: NodeId::from("client"),
            seq: 9,
            incarnation: 1,
        };

        // ACT
        client
            .send_to(&bincode::serialize(&ping).unwrap(), service.local_node.addr)
            .await
            .unwrap();
        let mut buf = vec![0u8; 65536];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        // ASSERT
        match bincode::deserialize::<GossipMessage>(&buf[..len]).unwrap() {
            GossipMessage::Ack { seq, members, .. } => {
                assert_eq!(seq, 9);
                assert!(members.iter().all(|node| node.state != NodeState::Dead));
                assert!(members.iter().any(|node| node.id == NodeId::from("alive")));
                assert!(members.iter().all(|node| node.id != NodeId::from("gone")));
            }
            other => panic!("Wrong message type: {:?}", other),
        }
        service.shutdown();
    }

    // ============================================================
    // LIVE CLUSTER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_two_nodes_join_and_exchange_state() {
        // ARRANGE
        let (seed, seed_delegate) = spawn_node("seed").await;
        let (joiner, joiner_delegate) = spawn_node("joiner").await;

        // ACT
        let contacted = joiner.join(&[seed.local_node.addr]).await.unwrap();

        // ASSERT
        assert_eq!(contacted, 1);
        assert_eq!(joiner.member_count(), 2);
        assert!(wait_for(|| seed.member_count() == 2, Duration::from_secs(2)).await);

        assert_eq!(joiner_delegate.joined.lock().clone(), vec![NodeId::from("seed")]);
        assert_eq!(seed_delegate.joined.lock().clone(), vec![NodeId::from("joiner")]);

        let merges = joiner_delegate.merges.lock().clone();
        assert!(merges.iter().any(|(snapshot, _)| snapshot == b"snapshot"));

        // "joiner" sorts before "seed"
        assert!(joiner.am_leader());
        assert!(!seed.am_leader());

        seed.shutdown();
        joiner.shutdown();
    }

    #[tokio::test]
    async fn test_user_datagram_reaches_delegate() {
        let (a, _) = spawn_node("a").await;
        let (b, b_delegate) = spawn_node("b").await;
        b.join(&[a.local_node.addr]).await.unwrap();

        let target = a.get_member(&NodeId::from("b")).unwrap();
        a.send_to(&target, b"hello".to_vec()).await.unwrap();

        assert!(
            wait_for(
                || b_delegate.messages.lock().iter().any(|m| m == b"hello"),
                Duration::from_secs(2)
            )
            .await
        );

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test]
    async fn test_leave_is_observed_by_peers() {
        let (a, a_delegate) = spawn_node("a").await;
        let (b, _) = spawn_node("b").await;
        b.join(&[a.local_node.addr]).await.unwrap();
        assert!(wait_for(|| a.member_count() == 2, Duration::from_secs(2)).await);

        b.leave(Duration::from_secs(1)).await;

        assert!(wait_for(|| a.member_count() == 1, Duration::from_secs(2)).await);
        assert_eq!(a_delegate.left.lock().clone(), vec![NodeId::from("b")]);
        assert_eq!(a.members(), vec![NodeId::from("a")]);

        a.shutdown();
    }

    #[tokio::test]
    async fn test_quiet_healthy_fleet_is_never_suspected() {
        // ARRANGE: enough nodes that any one pair often goes a while
        // without direct contact
        let (seed, _) = spawn_node("quiet-0").await;
        let mut fleet = vec![seed.clone()];
        for i in 1..12 {
            let (node, _) = spawn_node(&format!("quiet-{}", i)).await;
            node.join(&[seed.local_node.addr]).await.unwrap();
            fleet.push(node);
        }
        assert!(
            wait_for(
                || fleet.iter().all(|node| node.member_count() == 12),
                Duration::from_secs(5)
            )
            .await
        );

        // ACT: watch for three seconds
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut suspicions = 0;
        while Instant::now() < deadline {
            for node in &fleet {
                suspicions += node
                    .get_alive_members()
                    .iter()
                    .filter(|member| member.state == NodeState::Suspect)
                    .count();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // ASSERT: nobody was suspected, so nobody had to refute
        assert_eq!(suspicions, 0);
        assert!(fleet.iter().all(|node| node.incarnation() == 1));

        for node in fleet {
            node.shutdown();
        }
    }
}
