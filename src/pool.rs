//! Node pool topology: who exists, and which named collective each node
//! belongs to. Hierarchical strategies use collectives to tell local peers
//! from cross-cluster ones; the plain strategy ignores them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The name of a peer in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for PeerId {
    fn from(name: String) -> Self {
        Self(Arc::from(name.as_str()))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of pool members and their grouping into named collectives.
///
/// Ordering is significant: `everybody` and each collective's member list
/// keep insertion order, and a node's rank within its collective is its
/// position in that list.
#[derive(Debug, Clone, Default)]
pub struct Pool {
    members: Vec<PeerId>,
    collectives: BTreeMap<String, Vec<PeerId>>,
}

impl Pool {
    /// A pool with every member in one unnamed collective.
    pub fn flat<I, P>(members: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        let members: Vec<PeerId> = members.into_iter().map(Into::into).collect();
        let mut collectives = BTreeMap::new();
        collectives.insert(String::new(), members.clone());
        Self {
            members,
            collectives,
        }
    }

    /// A pool built from named collectives, in iteration order.
    pub fn clustered<I, N, M, P>(groups: I) -> Self
    where
        I: IntoIterator<Item = (N, M)>,
        N: Into<String>,
        M: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        let mut members = Vec::new();
        let mut collectives = BTreeMap::new();
        for (name, group) in groups {
            let group: Vec<PeerId> = group.into_iter().map(Into::into).collect();
            members.extend(group.iter().cloned());
            collectives.insert(name.into(), group);
        }
        Self {
            members,
            collectives,
        }
    }

    /// Every pool member, in order.
    pub fn everybody(&self) -> &[PeerId] {
        &self.members
    }

    /// The name of the collective `peer` belongs to.
    pub fn collective_of(&self, peer: &PeerId) -> Option<&str> {
        self.collectives
            .iter()
            .find(|(_, group)| group.contains(peer))
            .map(|(name, _)| name.as_str())
    }

    /// The ordered members of a named collective.
    pub fn members_of(&self, name: &str) -> &[PeerId] {
        self.collectives.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All collective names, in order.
    pub fn all_collectives(&self) -> impl Iterator<Item = &str> {
        self.collectives.keys().map(String::as_str)
    }

    /// A peer's rank within its own collective.
    pub fn rank_of(&self, peer: &PeerId) -> Option<usize> {
        let name = self.collective_of(peer)?;
        self.members_of(name).iter().position(|p| p == peer)
    }

    /// True when both peers sit in the same collective.
    pub fn is_local(&self, a: &PeerId, b: &PeerId) -> bool {
        match (self.collective_of(a), self.collective_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }
}
