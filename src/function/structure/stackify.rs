use crate::class::descriptors::ValueType;
use crate::class::ExceptionHandler;
use crate::error::CompileError;
use crate::function::locals::LocalAllocation;
use crate::function::structure::{ControlFlowGraph, Terminator};
use crate::function::translate::TranslatedBlock;
use crate::function::types::Inst::I;
use crate::function::types::{BlockType, Inst, Instruction, NumOp, Value};
use crate::graph::{NodeId, NodeMap, NodeSet, Order};

/// The single exception tag: every thrown object travels through it.
pub const EXCEPTION_TAG: u32 = 0;

/// One open structured construct. Every frame introduces a branch label, so a break depth is a
/// frame's distance from the innermost end of this stack.
#[derive(Debug)]
enum Frame {
    /// Forward-branch target: branching here exits the block, landing at `target`.
    Block { target: NodeId },
    /// Backward-branch target: branching here continues the loop at `header`.
    Loop { header: NodeId },
    If,
    Try,
}

/// Converts a translated control flow graph into a well-nested instruction stream.
///
/// Emission walks the dominator tree: merge nodes (two or more forward predecessors, or any
/// switch target) receive a `block` ending where they start, loop headers receive a `loop`, and
/// two-way branches become `br_if`/`if`-`else`. Every branch is rewritten to a break depth
/// counted through the open frame stack. Exception handlers wrap their protected range in a
/// `try` opened at the range entry's tree walk; with exception handling disabled the `try`
/// degrades to a `block`, `throw` to `unreachable` and the catch to a branch past the handler.
pub struct Stackifier<'a> {
    cfg: &'a ControlFlowGraph,
    translated: &'a NodeMap<TranslatedBlock>,
    entry_stacks: &'a NodeMap<Vec<ValueType>>,
    locals: &'a mut LocalAllocation,
    handlers: Vec<HandlerPlan>,
    idom: NodeMap<NodeId>,
    rpo_positions: NodeMap<usize>,
    dom_children: NodeMap<Vec<NodeId>>,
    loop_headers: NodeSet,
    merges: NodeSet,
    handler_entries: NodeSet,
    use_eh: bool,
    use_gc: bool,
    ctx: Vec<Frame>,
    out: Vec<Inst>,
    depth_guard: u32,
}

#[derive(Debug, Clone)]
struct HandlerPlan {
    start_node: NodeId,
    handler_node: NodeId,
    catch_type: Option<std::rc::Rc<String>>,
    end: u32,
}

impl<'a> Stackifier<'a> {
    pub fn new(
        cfg: &'a ControlFlowGraph,
        translated: &'a NodeMap<TranslatedBlock>,
        entry_stacks: &'a NodeMap<Vec<ValueType>>,
        handlers: &[ExceptionHandler],
        locals: &'a mut LocalAllocation,
        use_eh: bool,
        use_gc: bool,
    ) -> Result<Self, CompileError> {
        let g = &cfg.g;
        let idom = g.immediate_dominators();
        let rpo = g.depth_first(Order::ReversePostOrder);
        let mut rpo_positions = NodeMap::with_capacity_for(g);
        for (i, &n) in rpo.traversal.iter().enumerate() {
            rpo_positions.insert(n, i);
        }

        // Dominator tree children, visited in reverse post order
        let mut dom_children: NodeMap<Vec<NodeId>> = NodeMap::with_capacity_for(g);
        for id in g.iter_id() {
            dom_children.insert(id, vec![]);
        }
        for &n in &rpo.traversal {
            let dominator = idom[n];
            if dominator != n {
                if let Some(children) = dom_children.get(dominator) {
                    let mut children = children.clone();
                    children.push(n);
                    dom_children.insert(dominator, children);
                }
            }
        }

        let mut loop_headers = NodeSet::with_capacity_for(g);
        for natural_loop in g.natural_loops(&idom) {
            loop_headers.insert(natural_loop.header);
        }

        let mut handler_entries = NodeSet::with_capacity_for(g);
        let mut plans = vec![];
        for handler in handlers {
            let plan = HandlerPlan {
                start_node: cfg.node_at(handler.start)?,
                handler_node: cfg.node_at(handler.handler)?,
                catch_type: handler.catch_type.clone(),
                end: handler.end,
            };
            handler_entries.insert(plan.handler_node);
            plans.push(plan);
        }
        // Open order at a shared range entry: widest range first, later table entries outermost
        plans.sort_by(|a, b| b.end.cmp(&a.end));

        // Merge nodes need a block frame: two or more forward non-exceptional predecessors, or
        // any target of an n-way branch (so `br_table` always has a label per case)
        let mut merges = NodeSet::with_capacity_for(g);
        for node in g.iter() {
            let forward_preds = node
                .predecessors
                .iter()
                .filter(|&&p| !cfg.is_exceptional(p, node.id))
                .filter(|&&p| match (rpo_positions.get(p), rpo_positions.get(node.id)) {
                    (Some(p_pos), Some(n_pos)) => p_pos < n_pos,
                    _ => false,
                })
                .count();
            if forward_preds >= 2 {
                merges.insert(node.id);
            }
            if let Terminator::Switch { default, targets, .. } = &node.value.terminator {
                for offset in targets.iter().chain(std::iter::once(default)) {
                    merges.insert(cfg.node_at(*offset)?);
                }
            }
        }

        Ok(Self {
            cfg,
            translated,
            entry_stacks,
            locals,
            handlers: plans,
            idom,
            rpo_positions,
            dom_children,
            loop_headers,
            merges,
            handler_entries,
            use_eh,
            use_gc,
            ctx: vec![],
            out: vec![],
            depth_guard: 0,
        })
    }

    pub fn run(mut self) -> anyhow::Result<Vec<Inst>> {
        let entry = self
            .cfg
            .g
            .entry
            .ok_or_else(|| CompileError::emit("control flow graph has no entry"))?;
        self.do_tree(entry)?;
        debug_assert!(self.ctx.is_empty(), "unbalanced frames: {:?}", self.ctx);
        Ok(self.out)
    }

    fn exception_ref_type(&self) -> ValueType {
        match self.use_gc {
            true => ValueType::EqRef,
            false => ValueType::I32,
        }
    }

    /// Break depth to a frame targeting `target`, if one is open.
    fn branch_depth(&self, target: NodeId) -> Option<u32> {
        self.ctx.iter().rev().position(|frame| match frame {
            Frame::Block { target: t } => *t == target,
            Frame::Loop { header } => *header == target,
            _ => false,
        }).map(|d| d as u32)
    }

    /// Result type of the block frame for a merge `target` opened while emitting `x`: the
    /// values its branches carry, relative to the stack at `x`'s entry.
    fn block_type(&self, target: NodeId, x: NodeId) -> Result<BlockType, CompileError> {
        let base = self.entry_stacks.get(x).map(|s| s.len()).unwrap_or(0);
        let at_target = match self.entry_stacks.get(target) {
            Some(stack) => stack,
            None => return Ok(BlockType::Empty),
        };
        match at_target.len().saturating_sub(base) {
            0 => Ok(BlockType::Empty),
            1 => Ok(BlockType::Result(at_target[at_target.len() - 1])),
            _ => Err(CompileError::unsupported(
                "join point carrying more than one value",
            )),
        }
    }

    fn do_tree(&mut self, x: NodeId) -> anyhow::Result<()> {
        self.depth_guard += 1;
        if self.depth_guard > 10_000 {
            return Err(CompileError::emit("runaway restructuring recursion").into());
        }

        // Open try frames for every protected range entered at this node, widest first
        let opened: Vec<HandlerPlan> = self
            .handlers
            .iter()
            .filter(|h| h.start_node == x)
            .cloned()
            .collect();
        for _ in &opened {
            match self.use_eh {
                true => self.out.push(I(Instruction::Try(BlockType::Empty))),
                false => self.out.push(I(Instruction::Block(BlockType::Empty))),
            }
            self.ctx.push(Frame::Try);
        }

        let merges: Vec<NodeId> = {
            let mut merges: Vec<NodeId> = self.dom_children[x]
                .iter()
                .copied()
                .filter(|&c| self.merges.contains(c) && !self.handler_entries.contains(c))
                .collect();
            let positions = &self.rpo_positions;
            merges.sort_by_key(|&c| positions[c]);
            merges
        };

        if self.loop_headers.contains(x) {
            self.out.push(I(Instruction::Loop(BlockType::Empty)));
            self.ctx.push(Frame::Loop { header: x });
            self.node_within(x, &merges)?;
            self.ctx.pop();
            self.out.push(I(Instruction::End));
        } else {
            self.node_within(x, &merges)?;
        }

        // Close this node's try frames, innermost (narrowest) first
        for handler in opened.iter().rev() {
            self.emit_handler(handler)?;
        }

        self.depth_guard -= 1;
        Ok(())
    }

    fn node_within(&mut self, x: NodeId, merges: &[NodeId]) -> anyhow::Result<()> {
        match merges.split_last() {
            Some((&last, init)) => {
                let block_type = self.block_type(last, x)?;
                self.out.push(I(Instruction::Block(block_type)));
                self.ctx.push(Frame::Block { target: last });
                self.node_within(x, init)?;
                self.ctx.pop();
                self.out.push(I(Instruction::End));
                self.do_tree(last)
            }
            None => {
                let block = &self.cfg.g[x].value;
                if let Some(translated) = self.translated.get(x) {
                    self.out.extend(translated.body.iter().cloned());
                }
                self.emit_terminator(x, &block.terminator.clone())
            }
        }
    }

    fn do_branch(&mut self, target: NodeId) -> anyhow::Result<()> {
        match self.branch_depth(target) {
            Some(depth) => {
                self.out.push(I(Instruction::Br(depth)));
                Ok(())
            }
            // Single-predecessor targets are emitted inline. A merge whose frame has already
            // closed (a join re-entered from a handler) is re-emitted; the recursion guard in
            // do_tree bounds the duplication.
            None => self.do_tree(target),
        }
    }

    fn emit_terminator(&mut self, x: NodeId, terminator: &Terminator) -> anyhow::Result<()> {
        match terminator {
            Terminator::FallThrough(offset) | Terminator::Goto(offset) => {
                let target = self.cfg.node_at(*offset)?;
                self.do_branch(target)
            }
            Terminator::Branch { jump, fall } => {
                let jump_node = self.cfg.node_at(*jump)?;
                let fall_node = self.cfg.node_at(*fall)?;
                if jump_node == fall_node {
                    self.out.push(I(Instruction::Drop));
                    return self.do_branch(jump_node);
                }
                if let Some(depth) = self.branch_depth(jump_node) {
                    self.out.push(I(Instruction::BrIf(depth)));
                    self.do_branch(fall_node)
                } else {
                    self.out.push(I(Instruction::If(BlockType::Empty)));
                    self.ctx.push(Frame::If);
                    self.do_branch(jump_node)?;
                    self.out.push(I(Instruction::Else));
                    self.do_branch(fall_node)?;
                    self.ctx.pop();
                    self.out.push(I(Instruction::End));
                    Ok(())
                }
            }
            Terminator::Switch { default, targets, keys } => {
                let default_depth = self.switch_depth(*default)?;
                match keys {
                    None => {
                        let mut depths = Vec::with_capacity(targets.len());
                        for offset in targets {
                            depths.push(self.switch_depth(*offset)?);
                        }
                        self.out.push(I(Instruction::BrTable {
                            targets: depths,
                            default: default_depth,
                        }));
                    }
                    Some(keys) => {
                        let scratch = self
                            .translated
                            .get(x)
                            .and_then(|t| t.switch_scratch)
                            .ok_or_else(|| {
                                CompileError::emit("keyed switch without a selector local")
                            })?;
                        for (key, offset) in keys.iter().zip(targets) {
                            let depth = self.switch_depth(*offset)?;
                            self.out.push(I(Instruction::LocalGet(scratch)));
                            self.out.push(I(Instruction::Const(Value::I32(*key))));
                            self.out
                                .push(I(Instruction::Numeric { op: NumOp::Eq, ty: ValueType::I32 }));
                            self.out.push(I(Instruction::BrIf(depth)));
                        }
                        self.out.push(I(Instruction::Br(default_depth)));
                    }
                }
                Ok(())
            }
            Terminator::Return => {
                self.out.push(I(Instruction::Return));
                Ok(())
            }
            Terminator::Throw => {
                match self.use_eh {
                    true => self.out.push(I(Instruction::Throw(EXCEPTION_TAG))),
                    // Without exception handling a throw simply traps
                    false => self.out.push(I(Instruction::Unreachable)),
                }
                Ok(())
            }
        }
    }

    fn switch_depth(&mut self, offset: u32) -> anyhow::Result<u32> {
        let node = self.cfg.node_at(offset)?;
        self.branch_depth(node).ok_or_else(|| {
            CompileError::emit(format!("switch target {} has no enclosing frame", offset)).into()
        })
    }

    /// Emits the catch arm for one handler and closes its try frame.
    ///
    /// With exception handling enabled this is `catch` (plus an `instanceof` filter and rethrow
    /// for typed handlers) followed by the handler body. Degraded, the protected block is exited
    /// with a branch past the handler body, whose code survives only as an unreachable region.
    fn emit_handler(&mut self, handler: &HandlerPlan) -> anyhow::Result<()> {
        if self.use_eh {
            self.out.push(I(Instruction::Catch(EXCEPTION_TAG)));
            if let Some(class_name) = &handler.catch_type {
                let scratch = self.locals.declare_scratch(self.exception_ref_type());
                self.out.push(I(Instruction::LocalTee(scratch)));
                self.out.push(Inst::InstanceOf(std::rc::Rc::clone(class_name)));
                self.out
                    .push(I(Instruction::Numeric { op: NumOp::Eqz, ty: ValueType::I32 }));
                self.out.push(I(Instruction::If(BlockType::Empty)));
                self.ctx.push(Frame::If);
                // Not ours: raise again for the next enclosing handler (label 1 = this try)
                self.out.push(I(Instruction::Rethrow(1)));
                self.ctx.pop();
                self.out.push(I(Instruction::End));
                self.out.push(I(Instruction::LocalGet(scratch)));
            }
            self.do_tree(handler.handler_node)?;
        } else {
            // Abort the protected region: skip straight past the handler body
            self.out.push(I(Instruction::Br(0)));
            self.do_tree(handler.handler_node)?;
        }
        self.ctx.pop();
        self.out.push(I(Instruction::End));
        Ok(())
    }
}
