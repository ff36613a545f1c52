use crate::graph::{Graph, NodeId, NodeMap, NodeOrder, NodeSet, Order};

/// Helper for [`Graph::immediate_dominators`]: walks two dominator tree fingers up to their
/// common ancestor, comparing by post-order position.
fn intersect(
    post_order: &NodeOrder,
    doms: &NodeMap<Option<NodeId>>,
    mut finger1: NodeId,
    mut finger2: NodeId,
) -> NodeId {
    while finger1 != finger2 {
        while post_order.cmp(finger1, finger2).is_lt() {
            finger1 = doms[finger1].expect("finger has dominator");
        }
        while post_order.cmp(finger2, finger1).is_lt() {
            finger2 = doms[finger2].expect("finger has dominator");
        }
    }
    finger1
}

/// A natural loop discovered from a back edge `latch -> header` where the header dominates the
/// latch. `body` contains every node in the loop including header and latch.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: NodeId,
    pub latch: NodeId,
    pub body: NodeSet,
}

impl<T> Graph<T> {
    /// Computes the immediate dominator of each reachable node using the iterative algorithm of
    /// Cooper, Harvey and Kennedy ("A simple, fast dominance algorithm", Rice CS TR 06-33870).
    /// The entrypoint's immediate dominator is itself.
    ///
    /// # Panics
    ///
    /// Panics if the graph doesn't have an entrypoint.
    pub fn immediate_dominators(&self) -> NodeMap<NodeId> {
        let start = self.entry.expect("dominators needs entrypoint");

        // Comparisons use post-order positions, but iteration runs in reverse post-order
        let post_order = self.depth_first(Order::PostOrder);
        let mut rpo = post_order.traversal.clone();
        rpo.reverse();

        let mut idom: NodeMap<Option<NodeId>> = NodeMap::with_capacity_for(self);
        for &id in &rpo {
            idom.insert(id, None);
        }
        idom.insert(start, Some(start));

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &rpo {
                if b == start {
                    continue;
                }
                // b is reachable and not the start, so it has a processed predecessor
                let mut new_idom = *self[b]
                    .predecessors
                    .iter()
                    .find(|&&p| idom.get(p).map_or(false, |d| d.is_some()))
                    .expect("reachable node has processed predecessor");
                for &p in &self[b].predecessors {
                    if p != new_idom && idom.get(p).map_or(false, |d| d.is_some()) {
                        new_idom = intersect(&post_order, &idom, p, new_idom);
                    }
                }
                if idom[b] != Some(new_idom) {
                    idom.insert(b, Some(new_idom));
                    changed = true;
                }
            }
        }

        idom.into_iter()
            .map(|(k, v)| (k, v.expect("reachable node has dominator")))
            .collect()
    }

    /// Tests whether `a` dominates `b` given the immediate dominator map.
    pub fn dominates(&self, idom: &NodeMap<NodeId>, a: NodeId, b: NodeId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            let next = idom[current];
            if next == current {
                return false; // Reached the entry
            }
            current = next;
        }
    }

    /// Finds all natural loops: back edges `latch -> header` where the header dominates the
    /// latch. Loops sharing a header are merged into a single loop body.
    pub fn natural_loops(&self, idom: &NodeMap<NodeId>) -> Vec<NaturalLoop> {
        let mut loops: Vec<NaturalLoop> = vec![];
        for node in self.iter() {
            for &succ in &node.successors {
                // Unreachable nodes have no dominator entry and can't form loops
                if !idom.contains_key(node.id) || !self.dominates(idom, succ, node.id) {
                    continue;
                }
                let (header, latch) = (succ, node.id);
                // Collect the loop body: all nodes that reach the latch without passing the header
                let mut body = NodeSet::with_capacity_for(self);
                body.insert(header);
                let mut stack = vec![latch];
                while let Some(n) = stack.pop() {
                    if body.insert(n) {
                        stack.extend(self[n].predecessors.iter().copied());
                    }
                }
                match loops.iter_mut().find(|l| l.header == header) {
                    Some(existing) => {
                        for n in body.iter() {
                            existing.body.insert(n);
                        }
                        // Keep the latch that appears last so branches back are all in-body
                        existing.latch = latch;
                    }
                    None => loops.push(NaturalLoop { header, latch, body }),
                }
            }
        }
        loops
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::tests::{fixture_diamond, fixture_self_loop, fixture_while_loop};

    #[test]
    fn diamond_dominators() {
        let (g, (n1, n2, n3, n4, n5, n6)) = fixture_diamond();
        let idom = g.immediate_dominators();
        assert_eq!(idom[n1], n1);
        assert_eq!(idom[n2], n1);
        assert_eq!(idom[n3], n2);
        assert_eq!(idom[n4], n2);
        assert_eq!(idom[n5], n2); // Join point dominated by the branch, not either arm
        assert_eq!(idom[n6], n5);
    }

    #[test]
    fn dominates_is_reflexive_and_transitive() {
        let (g, (n1, n2, _, _, n5, _)) = fixture_diamond();
        let idom = g.immediate_dominators();
        assert!(g.dominates(&idom, n1, n5));
        assert!(g.dominates(&idom, n2, n2));
        assert!(!g.dominates(&idom, n5, n2));
    }

    #[test]
    fn self_loop_found() {
        let (g, (_, n2, _)) = fixture_self_loop();
        let idom = g.immediate_dominators();
        let loops = g.natural_loops(&idom);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, n2);
        assert_eq!(loops[0].latch, n2);
        assert_eq!(loops[0].body.len(), 1);
    }

    #[test]
    fn while_loop_body_excludes_exit() {
        let (g, (_, n2, n3, n4)) = fixture_while_loop();
        let idom = g.immediate_dominators();
        let loops = g.natural_loops(&idom);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, n2);
        assert_eq!(loops[0].latch, n3);
        assert!(loops[0].body.contains(n2));
        assert!(loops[0].body.contains(n3));
        assert!(!loops[0].body.contains(n4));
    }
}
