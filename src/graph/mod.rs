mod collections;
mod dominators;
mod traversal;
mod types;

pub use self::collections::*;
pub use self::traversal::*;
pub use self::types::*;

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Diamond with a tail: 1 -> 2 -> {3, 4} -> 5 -> 6
    pub fn fixture_diamond() -> (Graph<u32>, (NodeId, NodeId, NodeId, NodeId, NodeId, NodeId)) {
        let mut g = Graph::new();
        let n1 = g.add_node(1);
        let n2 = g.add_node(2);
        let n3 = g.add_node(3);
        let n4 = g.add_node(4);
        let n5 = g.add_node(5);
        let n6 = g.add_node(6);
        g.add_edge(n1, n2);
        g.add_edge(n2, n3);
        g.add_edge(n2, n4);
        g.add_edge(n3, n5);
        g.add_edge(n4, n5);
        g.add_edge(n5, n6);
        (g, (n1, n2, n3, n4, n5, n6))
    }

    /// Single-node loop with entry and exit: 1 -> 2 -> 2 -> 3
    pub fn fixture_self_loop() -> (Graph<u32>, (NodeId, NodeId, NodeId)) {
        let mut g = Graph::new();
        let n1 = g.add_node(1);
        let n2 = g.add_node(2);
        let n3 = g.add_node(3);
        g.add_edge(n1, n2);
        g.add_edge(n2, n2);
        g.add_edge(n2, n3);
        (g, (n1, n2, n3))
    }

    /// While-shaped loop: 1 -> 2(header) -> {3(body) -> 2, 4(exit)}
    pub fn fixture_while_loop() -> (Graph<u32>, (NodeId, NodeId, NodeId, NodeId)) {
        let mut g = Graph::new();
        let n1 = g.add_node(1);
        let n2 = g.add_node(2);
        let n3 = g.add_node(3);
        let n4 = g.add_node(4);
        g.add_edge(n1, n2);
        g.add_edge(n2, n3);
        g.add_edge(n2, n4);
        g.add_edge(n3, n2);
        (g, (n1, n2, n3, n4))
    }
}
