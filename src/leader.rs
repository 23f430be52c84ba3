//! Leader derivation
//!
//! The leader is simply the live member whose name sorts first. Every node can
//! compute it from its own membership view; views may briefly disagree while a
//! join or leave is still propagating.

use crate::membership::types::NodeId;

/// Lexicographically smallest name in `members`, if any.
pub fn leader_of<'a, I>(members: I) -> Option<&'a NodeId>
where
    I: IntoIterator<Item = &'a NodeId>,
{
    members.into_iter().min_by(|a, b| a.0.cmp(&b.0))
}

/// True when `me` is the leader of `members`.
pub fn is_leader(me: &NodeId, members: &[NodeId]) -> bool {
    leader_of(members).is_some_and(|leader| leader == me)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId(n.to_string())).collect()
    }

    #[test]
    fn test_smallest_name_wins() {
        let members = ids(&["primary", "c2", "c1"]);

        assert_eq!(leader_of(&members), Some(&NodeId("c1".into())));
        assert!(is_leader(&NodeId("c1".into()), &members));
        assert!(!is_leader(&NodeId("primary".into()), &members));
    }

    #[test]
    fn test_every_ordering_agrees() {
        let views = [
            ids(&["b", "a", "c"]),
            ids(&["c", "b", "a"]),
            ids(&["a", "c", "b"]),
        ];

        for view in &views {
            assert_eq!(leader_of(view).map(|id| id.0.as_str()), Some("a"));
        }
    }

    #[test]
    fn test_empty_view_has_no_leader() {
        let members: Vec<NodeId> = vec![];

        assert!(leader_of(&members).is_none());
        assert!(!is_leader(&NodeId("solo".into()), &members));
    }
}
