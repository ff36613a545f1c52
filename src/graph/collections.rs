//! Collections exploiting NodeId's integer representation and the (mostly) fixed size of graphs

use crate::graph::{Graph, NodeId};
use bit_set::BitSet;
use std::iter::FromIterator;

/// Set of [`NodeId`]s backed by a bit set, one bit per node. Most uses (visited sets, loop
/// membership) end up holding a large share of the graph, so dense storage wins.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeSet {
    inner: BitSet,
}

impl NodeSet {
    pub fn new() -> Self {
        Self { inner: BitSet::new() }
    }

    pub fn with_capacity_for<G>(g: &Graph<G>) -> Self {
        Self { inner: BitSet::with_capacity(g.capacity()) }
    }

    pub fn insert(&mut self, item: NodeId) -> bool {
        self.inner.insert(item.index())
    }

    pub fn contains(&self, item: NodeId) -> bool {
        self.inner.contains(item.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inner.iter().map(NodeId)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        let mut inner = BitSet::new();
        inner.extend(iter.into_iter().map(|item| item.index()));
        Self { inner }
    }
}

/// Map keyed by [`NodeId`], backed by a vector with `None` for vacant slots. Constant time
/// lookup; best when a value exists for (nearly) every node.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeMap<T> {
    inner: Vec<Option<T>>,
}

impl<T> NodeMap<T> {
    pub fn new() -> Self {
        Self { inner: vec![] }
    }

    pub fn with_capacity_for<G>(g: &Graph<G>) -> Self {
        let inner = (0..g.capacity()).map(|_| None).collect();
        Self { inner }
    }

    pub fn insert(&mut self, key: NodeId, value: T) -> Option<T> {
        if key.index() >= self.inner.len() {
            self.inner.resize_with(key.index() + 1, || None);
        }
        self.inner[key.index()].replace(value)
    }

    pub fn get(&self, key: NodeId) -> Option<&T> {
        self.inner.get(key.index()).and_then(|value| value.as_ref())
    }

    pub fn contains_key(&self, key: NodeId) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.inner
            .iter()
            .enumerate()
            .filter_map(|(i, value)| value.as_ref().map(|value| (NodeId(i), value)))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.inner.iter().filter_map(|value| value.as_ref())
    }

    pub fn into_iter(self) -> impl Iterator<Item = (NodeId, T)> {
        self.inner
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| value.map(|value| (NodeId(i), value)))
    }
}

impl<T> std::ops::Index<NodeId> for NodeMap<T> {
    type Output = T;

    fn index(&self, index: NodeId) -> &Self::Output {
        self.get(index).expect("missing node value")
    }
}

impl<T> FromIterator<(NodeId, T)> for NodeMap<T> {
    fn from_iter<I: IntoIterator<Item = (NodeId, T)>>(iter: I) -> Self {
        let mut map = NodeMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::fixture_diamond;

    #[test]
    fn node_set_round_trips() {
        let (g, (n1, _, n3, ..)) = fixture_diamond();
        let mut set = NodeSet::with_capacity_for(&g);
        assert!(set.insert(n1));
        assert!(!set.insert(n1));
        assert!(set.insert(n3));
        assert!(set.contains(n1));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn node_map_indexes_by_id() {
        let (_, (n1, n2, ..)) = fixture_diamond();
        let mut map = NodeMap::new();
        map.insert(n1, "one");
        map.insert(n2, "two");
        assert_eq!(map[n1], "one");
        assert_eq!(map.get(n2), Some(&"two"));
        assert_eq!(map.iter().count(), 2);
    }
}
