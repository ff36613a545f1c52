pub mod locals;
pub mod stack;
pub mod structure;
pub mod translate;
mod types;

pub use self::types::*;

use crate::class::descriptors::ValueType;
use crate::class::{Function, FunctionName, MethodAccessFlags};
use crate::function::locals::LocalAllocation;
use crate::function::structure::structure_function;
use crate::options::Config;
use anyhow::Context;
use std::rc::Rc;

/// A method lowered to a structured (pseudo-)instruction stream, ready for rendering once the
/// whole reachable set is known.
#[derive(Debug)]
pub struct CompiledFunction {
    pub name: FunctionName,
    pub flags: MethodAccessFlags,
    /// Local variable interpretation, absent for methods without a body.
    pub locals: Option<LocalAllocation>,
    /// Structured body, absent for `native` and `abstract` methods.
    pub body: Option<Vec<Inst>>,
}

impl CompiledFunction {
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodAccessFlags::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodAccessFlags::NATIVE)
    }
}

/// Lowers a parsed method: decode its code attribute, translate the bytecode over the typed
/// operand stack and restructure it into nested blocks with break depths.
pub fn lower_function(function: &Function, config: &Config) -> anyhow::Result<CompiledFunction> {
    let code = match function.code()? {
        Some(code) => code,
        None => {
            return Ok(CompiledFunction {
                name: function.name.clone(),
                flags: function.flags,
                locals: None,
                body: None,
            })
        }
    };

    let this_type = match config.use_gc {
        true => ValueType::EqRef,
        false => ValueType::I32,
    };
    let mut locals = LocalAllocation::from_code(
        function.is_static(),
        this_type,
        &function.name.descriptor.params,
        config.use_gc,
        &code.bytecode,
    );

    let body = structure_function(
        Rc::clone(&function.name.class_name),
        &function.const_pool,
        &code,
        &mut locals,
        config.use_gc,
        config.use_eh,
    )
    .with_context(|| format!("unable to compile {}", function.name))?;

    Ok(CompiledFunction {
        name: function.name.clone(),
        flags: function.flags,
        locals: Some(locals),
        body: Some(body),
    })
}
