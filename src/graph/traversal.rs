use crate::graph::{Graph, NodeId, NodeMap, NodeSet};
use either::Either;
use std::cell::RefCell;
use std::cmp::Ordering;

/// Ordering of [`NodeId`]s produced by a [`Graph`] traversal.
pub struct NodeOrder {
    pub traversal: Vec<NodeId>,
    mapping: RefCell<Option<NodeMap<usize>>>,
}

impl NodeOrder {
    pub fn from_traversal(traversal: Vec<NodeId>) -> Self {
        // Mapping from node to position is computed lazily on first cmp() call
        Self { traversal, mapping: RefCell::new(None) }
    }

    /// Compares nodes `a` and `b` by visited order: `a < b` means `a` was visited first.
    pub fn cmp(&self, a: NodeId, b: NodeId) -> Ordering {
        let mut mapping = self.mapping.borrow_mut();
        let mapping = mapping.get_or_insert_with(|| {
            self.traversal
                .iter()
                .enumerate()
                .map(|(i, &node)| (node, i))
                .collect()
        });
        mapping[a].cmp(&mapping[b])
    }
}

/// Possible orderings for [`Graph::depth_first`] traversals.
#[derive(Copy, Clone)]
pub enum Order {
    PostOrder,
    ReversePostOrder,
}

impl<T> Graph<T> {
    fn depth_first_inner(
        &self,
        traversal: &mut Vec<NodeId>,
        visited: &mut NodeSet,
        reverse: bool,
        node: NodeId,
    ) {
        let iter = self[node].successors.iter();
        // iter.rev() and iter have different types, so store whichever in a sum type
        let iter = match reverse {
            true => Either::Left(iter.rev()),
            false => Either::Right(iter),
        };
        for &succ in iter {
            if visited.insert(succ) {
                self.depth_first_inner(traversal, visited, reverse, succ);
            }
        }
        traversal.push(node);
    }

    /// Performs a depth-first traversal from the entrypoint.
    ///
    /// # Panics
    ///
    /// Panics if the graph doesn't have an entrypoint to start the traversal at.
    pub fn depth_first(&self, order: Order) -> NodeOrder {
        let mut traversal = Vec::with_capacity(self.len());
        let mut visited = NodeSet::with_capacity_for(self);
        let start = self.entry.expect("traversal needs entrypoint");
        visited.insert(start);
        self.depth_first_inner(&mut traversal, &mut visited, false, start);
        if matches!(order, Order::ReversePostOrder) {
            traversal.reverse();
        }
        NodeOrder::from_traversal(traversal)
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::tests::{fixture_diamond, fixture_self_loop};
    use crate::graph::Order;

    #[test]
    fn post_order_visits_leaves_first() {
        let (g, (n1, n2, n3, n4, n5, n6)) = fixture_diamond();
        let traversal = g.depth_first(Order::PostOrder).traversal;
        assert_eq!(traversal, vec![n6, n5, n3, n4, n2, n1]);
    }

    #[test]
    fn reverse_post_order_starts_at_entry() {
        let (g, (n1, ..)) = fixture_diamond();
        let traversal = g.depth_first(Order::ReversePostOrder).traversal;
        assert_eq!(traversal[0], n1);
    }

    #[test]
    fn cycles_terminate() {
        let (g, (n1, n2, n3)) = fixture_self_loop();
        let traversal = g.depth_first(Order::PostOrder).traversal;
        assert_eq!(traversal, vec![n3, n2, n1]);
    }
}
