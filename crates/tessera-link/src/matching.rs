//! Picking the one (connector, peer connector, scheme) triple a session
//! runs on.

use serde_json::Value;

use crate::connector::{Declares, PeerConnector, Role};
use crate::error::LinkError;

/// Indices of the matched pair plus the agreed scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Position in the ordering (first) list.
    pub local: usize,
    /// Position in the other list.
    pub peer: usize,
    /// The first shared scheme, in the ordering list's declared order.
    pub scheme: String,
}

/// Find the first eligible triple.
///
/// Local connectors are visited in declared order; for each, peer
/// connectors of the complementary role in declared order; for each such
/// pair, the local connector's schemes in declared order. The first
/// scheme the peer connector also declares wins. There is no scoring.
///
/// # Errors
///
/// [`LinkError::NoMatchingConnector`] when no triple qualifies.
pub fn match_connectors<L: Declares, P: Declares>(local: &[L], peer: &[P]) -> Result<Matched, LinkError> {
    for (li, l) in local.iter().enumerate() {
        let wanted = l.role().complement();
        for (pi, p) in peer.iter().enumerate() {
            if p.role() != wanted {
                continue;
            }
            if let Some(scheme) = l.schemes().iter().find(|s| p.schemes().contains(s)) {
                return Ok(Matched {
                    local: li,
                    peer: pi,
                    scheme: scheme.clone(),
                });
            }
        }
    }
    Err(LinkError::NoMatchingConnector)
}

/// What a session knows about the other party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// The peer's origin.
    pub origin: String,
    /// The peer's full validated connector list.
    pub connectors: Vec<PeerConnector>,
    /// Index of the matched peer connector.
    pub matched: usize,
}

impl PeerDescriptor {
    /// The matched peer connector.
    #[must_use]
    pub fn connector(&self) -> Option<&PeerConnector> {
        self.connectors.get(self.matched)
    }

    /// The matched peer connector's role.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.connector().map(|c| c.role)
    }

    /// The matched peer connector's opaque metadata.
    #[must_use]
    pub fn extra(&self) -> Option<&Value> {
        self.connector().map(|c| &c.extra)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::connector::validate_peer;

    fn list(raw: &Value) -> Vec<PeerConnector> {
        validate_peer(raw).unwrap()
    }

    #[test]
    fn complementary_roles_match() {
        let local = list(&json!([{"accept": ["image/png"]}]));
        let peer = list(&json!([{"offer": ["image/png"]}]));
        let m = match_connectors(&local, &peer).unwrap();
        assert_eq!(m, Matched { local: 0, peer: 0, scheme: "image/png".into() });
    }

    #[test]
    fn same_role_never_matches() {
        let local = list(&json!([{"accept": ["a"]}]));
        let peer = list(&json!([{"accept": ["a"]}]));
        assert_eq!(
            match_connectors(&local, &peer).unwrap_err(),
            LinkError::NoMatchingConnector
        );
    }

    #[test]
    fn first_local_wins_over_better_later_ones() {
        let local = list(&json!([{"accept": ["x", "b"]}, {"accept": ["a"]}]));
        let peer = list(&json!([{"offer": ["a"]}, {"offer": ["b"]}]));
        let m = match_connectors(&local, &peer).unwrap();
        assert_eq!((m.local, m.peer, m.scheme.as_str()), (0, 1, "b"));
    }

    #[test]
    fn local_scheme_order_decides_within_a_pair() {
        let local = list(&json!([{"offer": ["jpeg", "png"]}]));
        let peer = list(&json!([{"accept": ["png", "jpeg"]}]));
        assert_eq!(match_connectors(&local, &peer).unwrap().scheme, "jpeg");
    }

    #[test]
    fn descriptor_exposes_matched_connector() {
        let peer = list(&json!([{"accept": "a"}, {"offer": "b", "extra": {"n": 2}}]));
        let descriptor = PeerDescriptor {
            origin: "https://peer.example".into(),
            connectors: peer,
            matched: 1,
        };
        assert_eq!(descriptor.role(), Some(Role::Offering));
        assert_eq!(descriptor.extra(), Some(&json!({"n": 2})));
    }

    fn side() -> impl Strategy<Value = Vec<(bool, Vec<u8>)>> {
        proptest::collection::vec((any::<bool>(), proptest::collection::vec(0u8..6, 1..4)), 1..6)
    }

    /// Builds a valid list, dropping schemes already claimed under a role.
    fn build(raw: &[(bool, Vec<u8>)]) -> Vec<PeerConnector> {
        let mut seen = std::collections::HashSet::new();
        raw.iter()
            .filter_map(|(accept, schemes)| {
                let role = if *accept { Role::Accepting } else { Role::Offering };
                let schemes: Vec<String> = schemes
                    .iter()
                    .map(|s| format!("s{s}"))
                    .filter(|s| seen.insert((role, s.clone())))
                    .collect();
                (!schemes.is_empty()).then(|| PeerConnector {
                    role,
                    schemes,
                    extra: Value::Null,
                })
            })
            .collect()
    }

    proptest! {
        #[test]
        fn matching_is_deterministic(local in side(), peer in side()) {
            let local = build(&local);
            let peer = build(&peer);
            prop_assert_eq!(
                match_connectors(&local, &peer),
                match_connectors(&local, &peer)
            );
        }

        #[test]
        fn removing_a_loser_keeps_the_winner(local in side(), peer in side()) {
            let local = build(&local);
            let peer = build(&peer);
            if let Ok(winner) = match_connectors(&local, &peer) {
                // Drop every peer connector after the winner.
                let trimmed = &peer[..=winner.peer];
                prop_assert_eq!(match_connectors(&local, trimmed).unwrap(), winner);
            }
        }

        #[test]
        fn removing_the_winner_moves_on(local in side(), peer in side()) {
            let local = build(&local);
            let mut peer = build(&peer);
            if let Ok(winner) = match_connectors(&local, &peer) {
                peer.remove(winner.peer);
                if let Ok(next) = match_connectors(&local, &peer) {
                    prop_assert!(next.local >= winner.local);
                }
            }
        }
    }
}
