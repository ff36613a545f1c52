mod basic;
mod stackify;

pub use self::basic::*;
pub use self::stackify::*;

use crate::class::descriptors::ValueType;
use crate::class::{Code, ConstantPool};
use crate::error::CompileError;
use crate::function::locals::LocalAllocation;
use crate::function::translate::{TranslatedBlock, Translator};
use crate::function::types::Inst;
use crate::graph::{NodeMap, Order};
use anyhow::Context;
use std::rc::Rc;

/// Translates and restructures one method body into a well-nested instruction stream.
///
/// Stages:
///
/// 1. [`build_control_flow_graph`]: basic blocks from branch and handler boundaries
/// 2. Reverse post order translation, propagating typed operand stack snapshots across edges
///    (a join whose incoming stacks disagree is a type error)
/// 3. [`Stackifier`]: dominator-tree emission of `block`/`loop`/`if`/`try` with break depths
pub fn structure_function(
    class_name: Rc<String>,
    pool: &ConstantPool,
    code: &Code,
    locals: &mut LocalAllocation,
    use_gc: bool,
    use_eh: bool,
) -> anyhow::Result<Vec<Inst>> {
    let cfg = build_control_flow_graph(&code.bytecode, &code.exception_table)?;

    let entry = cfg
        .g
        .entry
        .ok_or_else(|| CompileError::type_error("method has no entry block"))?;
    let exception_ref = match use_gc {
        true => ValueType::EqRef,
        false => ValueType::I32,
    };

    let mut entry_stacks: NodeMap<Vec<ValueType>> = NodeMap::with_capacity_for(&cfg.g);
    entry_stacks.insert(entry, vec![]);
    // A handler starts with exactly the thrown reference on the stack
    for handler in &code.exception_table {
        entry_stacks.insert(cfg.node_at(handler.handler)?, vec![exception_ref]);
    }

    let rpo = cfg.g.depth_first(Order::ReversePostOrder);
    let mut translated: NodeMap<TranslatedBlock> = NodeMap::with_capacity_for(&cfg.g);
    {
        let mut translator =
            Translator::new(class_name, pool, locals, &code.line_numbers, use_gc);
        for &n in &rpo.traversal {
            let block = &cfg.g[n].value;
            let entry_stack = entry_stacks.get(n).cloned().unwrap_or_default();
            let result = translator
                .translate_block(&block.code, &entry_stack)
                .with_context(|| format!("in block at bytecode offset {}", block.start))?;

            // The terminator consumes its condition/selector before control transfers
            let mut exit = result.exit_stack.clone();
            match &block.terminator {
                Terminator::Branch { .. } | Terminator::Switch { keys: None, .. } => {
                    exit.pop();
                }
                _ => {}
            }
            for &succ in &cfg.g[n].successors {
                if cfg.is_exceptional(n, succ) {
                    continue;
                }
                match entry_stacks.get(succ) {
                    None => {
                        entry_stacks.insert(succ, exit.clone());
                    }
                    Some(existing) if *existing != exit => {
                        return Err(CompileError::type_error(format!(
                            "operand stack mismatch at join {}: {:?} vs {:?}",
                            cfg.g[succ].value.start, existing, exit
                        ))
                        .into());
                    }
                    Some(_) => {}
                }
            }
            translated.insert(n, result);
        }
    }

    Stackifier::new(
        &cfg,
        &translated,
        &entry_stacks,
        &code.exception_table,
        locals,
        use_eh,
        use_gc,
    )?
    .run()
}
