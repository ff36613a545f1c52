use crate::class::{ExceptionHandler, Opcode};
use crate::error::CompileError;
use crate::graph::{Graph, NodeId};
use std::collections::{BTreeSet, HashMap};

/// How control leaves a basic block. Targets are absolute bytecode offsets until the graph is
/// built, after which [`ControlFlowGraph::node_at`] maps them to nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Falls through to the block starting at the given offset.
    FallThrough(u32),
    Goto(u32),
    /// Conditional branch: condition value is on the stack, nonzero jumps.
    Branch { jump: u32, fall: u32 },
    /// N-way branch on a selector. With `keys: None` the selector is on the stack, zero-based
    /// and dense. With keys, the selector was spilled to a scratch local for chained compares.
    Switch { default: u32, targets: Vec<u32>, keys: Option<Vec<i32>> },
    Return,
    Throw,
}

impl Terminator {
    /// Successor offsets in edge order (fall/false first, jump/true second).
    fn successors(&self) -> Vec<u32> {
        match self {
            Terminator::FallThrough(t) | Terminator::Goto(t) => vec![*t],
            Terminator::Branch { jump, fall } => vec![*fall, *jump],
            Terminator::Switch { default, targets, .. } => {
                let mut all = targets.clone();
                all.push(*default);
                all.dedup();
                all
            }
            Terminator::Return | Terminator::Throw => vec![],
        }
    }
}

/// A basic block: straight-line bytecode ending in a single terminator. The branch opcode
/// itself stays in `code` so the translator can emit its condition; `terminator` only records
/// where control goes.
#[derive(Debug)]
pub struct BasicBlock {
    pub start: u32,
    /// Exclusive end offset, used to align exception handler ranges with block boundaries.
    pub end: u32,
    pub code: Vec<(u32, Opcode)>,
    pub terminator: Terminator,
}

/// Control flow graph over basic blocks, plus the offset-to-node index and the exceptional
/// edges added for handler reachability (excluded from merge-point detection).
pub struct ControlFlowGraph {
    pub g: Graph<BasicBlock>,
    offsets: HashMap<u32, NodeId>,
    /// `(protected range start node, handler entry node)` pairs.
    pub exceptional_edges: Vec<(NodeId, NodeId)>,
}

impl ControlFlowGraph {
    pub fn node_at(&self, offset: u32) -> Result<NodeId, CompileError> {
        self.offsets.get(&offset).copied().ok_or_else(|| {
            CompileError::type_error(format!("branch into the middle of a block at {}", offset))
        })
    }

    /// Whether `pred -> node` is an exceptional (handler reachability) edge.
    pub fn is_exceptional(&self, pred: NodeId, node: NodeId) -> bool {
        self.exceptional_edges.contains(&(pred, node))
    }
}

fn branch_targets(op: &Opcode) -> Vec<u32> {
    match op {
        Opcode::Goto(t) | Opcode::Jsr(t) => vec![*t],
        Opcode::If { target, .. }
        | Opcode::IfIcmp { target, .. }
        | Opcode::IfAcmp { target, .. }
        | Opcode::IfNull { target, .. } => vec![*target],
        Opcode::Tableswitch { default, targets, .. } => {
            let mut all = targets.clone();
            all.push(*default);
            all
        }
        Opcode::Lookupswitch { default, pairs } => {
            let mut all: Vec<u32> = pairs.iter().map(|(_, t)| *t).collect();
            all.push(*default);
            all
        }
        _ => vec![],
    }
}

/// Lowering strategy for a `lookupswitch`. Dense key sets collapse to a biased jump table; sparse
/// ones keep their keys and lower to chained compares against a spilled selector. Both the graph
/// builder and the translator consult this so their decisions always agree.
pub enum SwitchPlan {
    Table { bias: i32, targets: Vec<u32> },
    Keyed { keys: Vec<i32>, targets: Vec<u32> },
}

pub fn lookupswitch_plan(pairs: &[(i32, u32)], default: u32) -> SwitchPlan {
    let keys: Vec<i32> = pairs.iter().map(|(k, _)| *k).collect();
    let targets: Vec<u32> = pairs.iter().map(|(_, t)| *t).collect();
    let (min, max) = match (keys.iter().min(), keys.iter().max()) {
        (Some(&min), Some(&max)) => (min as i64, max as i64),
        _ => return SwitchPlan::Table { bias: 0, targets },
    };
    let range = max - min + 1;
    if range <= 1024 {
        let mut dense = vec![default; range as usize];
        for (key, target) in pairs {
            dense[(*key as i64 - min) as usize] = *target;
        }
        SwitchPlan::Table { bias: min as i32, targets: dense }
    } else {
        SwitchPlan::Keyed { keys, targets }
    }
}

fn is_block_end(op: &Opcode) -> bool {
    matches!(
        op,
        Opcode::Goto(_)
            | Opcode::Jsr(_)
            | Opcode::If { .. }
            | Opcode::IfIcmp { .. }
            | Opcode::IfAcmp { .. }
            | Opcode::IfNull { .. }
            | Opcode::Tableswitch { .. }
            | Opcode::Lookupswitch { .. }
            | Opcode::Return(_)
            | Opcode::Athrow
            | Opcode::Ret(_)
    )
}

fn terminator_for(op: &Opcode, next_offset: u32) -> Terminator {
    match op {
        Opcode::Goto(t) => Terminator::Goto(*t),
        Opcode::If { target, .. }
        | Opcode::IfIcmp { target, .. }
        | Opcode::IfAcmp { target, .. }
        | Opcode::IfNull { target, .. } => {
            Terminator::Branch { jump: *target, fall: next_offset }
        }
        Opcode::Tableswitch { default, targets, .. } => {
            Terminator::Switch { default: *default, targets: targets.clone(), keys: None }
        }
        Opcode::Lookupswitch { default, pairs } => match lookupswitch_plan(pairs, *default) {
            SwitchPlan::Table { targets, .. } => {
                Terminator::Switch { default: *default, targets, keys: None }
            }
            SwitchPlan::Keyed { keys, targets } => {
                Terminator::Switch { default: *default, targets, keys: Some(keys) }
            }
        },
        Opcode::Return(_) => Terminator::Return,
        Opcode::Athrow => Terminator::Throw,
        _ => Terminator::FallThrough(next_offset),
    }
}

/// Splits bytecode into basic blocks and builds the control flow graph.
///
/// Leaders are the entrypoint, every branch target, every offset following a branch, and every
/// exception handler boundary (range start, range end, handler entry). Edges follow the
/// terminators; one synthetic edge per handler connects the protected range entry to the handler
/// so dominators and reachability see handler code.
pub fn build_control_flow_graph(
    code: &[(u32, Opcode)],
    handlers: &[ExceptionHandler],
) -> Result<ControlFlowGraph, CompileError> {
    if code.is_empty() {
        return Err(CompileError::type_error("method has no code"));
    }
    let method_end = {
        let (last_offset, _) = code[code.len() - 1];
        // Conservative: exclusive end is one past the last opcode's offset span
        last_offset + 1
    };

    // Collect leaders
    let mut leaders = BTreeSet::new();
    leaders.insert(0u32);
    for (i, (offset, op)) in code.iter().enumerate() {
        for target in branch_targets(op) {
            leaders.insert(target);
        }
        if is_block_end(op) {
            if let Some((next_offset, _)) = code.get(i + 1) {
                leaders.insert(*next_offset);
            }
        }
    }
    for handler in handlers {
        leaders.insert(handler.start);
        if handler.end < method_end {
            leaders.insert(handler.end);
        }
        leaders.insert(handler.handler);
    }

    // Build blocks in offset order
    let mut g = Graph::new();
    let mut offsets = HashMap::new();
    let mut blocks: Vec<(u32, Vec<(u32, Opcode)>)> = vec![];
    for (offset, op) in code {
        if leaders.contains(offset) {
            blocks.push((*offset, vec![]));
        }
        let current = blocks
            .last_mut()
            .ok_or_else(|| CompileError::type_error("code does not start at offset 0"))?;
        current.1.push((*offset, op.clone()));
    }

    let starts: Vec<u32> = blocks.iter().map(|(start, _)| *start).collect();
    for (i, (start, block_code)) in blocks.into_iter().enumerate() {
        // Exclusive end = start of the following block, or the end of the method
        let end = starts.get(i + 1).copied().unwrap_or(method_end);
        let terminator = match block_code.last() {
            Some((_, op)) => terminator_for(op, end),
            None => Terminator::FallThrough(end),
        };
        let id = g.add_node(BasicBlock { start, end, code: block_code, terminator });
        offsets.insert(start, id);
    }

    let ids: Vec<NodeId> = g.iter_id().collect();
    for &id in &ids {
        let successors = g[id].value.terminator.successors();
        for offset in successors {
            let target = *offsets.get(&offset).ok_or_else(|| {
                CompileError::type_error(format!("branch target {} is not a block leader", offset))
            })?;
            g.add_edge(id, target);
        }
    }

    // Handler reachability edges, from the protected range entry to the handler
    let mut exceptional_edges = vec![];
    for handler in handlers {
        let from = *offsets.get(&handler.start).ok_or_else(|| {
            CompileError::type_error(format!("handler range start {} not a leader", handler.start))
        })?;
        let to = *offsets.get(&handler.handler).ok_or_else(|| {
            CompileError::type_error(format!("handler entry {} not a leader", handler.handler))
        })?;
        g.add_edge(from, to);
        exceptional_edges.push((from, to));
    }

    Ok(ControlFlowGraph { g, offsets, exceptional_edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::decode_bytecode;

    #[test]
    fn straight_line_code_is_one_block() {
        // iload_0, iload_1, iadd, ireturn
        let code = decode_bytecode(&[0x1a, 0x1b, 0x60, 0xac]).unwrap();
        let cfg = build_control_flow_graph(&code, &[]).unwrap();
        assert_eq!(cfg.g.len(), 1);
        let entry = cfg.g.entry.unwrap();
        assert_eq!(cfg.g[entry].value.terminator, Terminator::Return);
        assert_eq!(cfg.g[entry].value.code.len(), 4);
    }

    #[test]
    fn conditional_splits_three_ways() {
        // 0: iload_0, 1: ifeq -> 6, 4: iconst_0, 5: ireturn, 6: iconst_1, 7: ireturn
        let code = decode_bytecode(&[0x1a, 0x99, 0x00, 0x05, 0x03, 0xac, 0x04, 0xac]).unwrap();
        let cfg = build_control_flow_graph(&code, &[]).unwrap();
        assert_eq!(cfg.g.len(), 3);
        let entry = cfg.g.entry.unwrap();
        assert_eq!(
            cfg.g[entry].value.terminator,
            Terminator::Branch { jump: 6, fall: 4 }
        );
        // Successor order is fall first, jump second
        let succs = &cfg.g[entry].successors;
        assert_eq!(cfg.g[succs[0]].value.start, 4);
        assert_eq!(cfg.g[succs[1]].value.start, 6);
    }

    #[test]
    fn handler_boundaries_split_blocks() {
        // 0: iconst_0, 1: istore_0, 2: iconst_1, 3: ireturn with handler over [0, 2)
        let code = decode_bytecode(&[0x03, 0x3b, 0x04, 0xac]).unwrap();
        let handlers = vec![ExceptionHandler { start: 0, end: 2, handler: 2, catch_type: None }];
        let cfg = build_control_flow_graph(&code, &handlers).unwrap();
        assert_eq!(cfg.g.len(), 2);
        let entry = cfg.g.entry.unwrap();
        let handler = cfg.node_at(2).unwrap();
        assert!(cfg.is_exceptional(entry, handler));
    }

    #[test]
    fn sparse_lookupswitch_keeps_keys() {
        match lookupswitch_plan(&[(1, 20), (1_000_000, 30)], 40) {
            SwitchPlan::Keyed { keys, targets } => {
                assert_eq!(keys, vec![1, 1_000_000]);
                assert_eq!(targets, vec![20, 30]);
            }
            _ => panic!("expected keyed switch"),
        }
    }

    #[test]
    fn dense_lookupswitch_becomes_biased_table() {
        match lookupswitch_plan(&[(5, 20), (7, 30)], 40) {
            SwitchPlan::Table { bias, targets } => {
                assert_eq!(bias, 5);
                assert_eq!(targets, vec![20, 40, 30]);
            }
            _ => panic!("expected biased table"),
        }
    }
}
