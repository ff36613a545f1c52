use crate::class::descriptors::{FieldDescriptor, ValueType};
use crate::class::{Opcode, PrimType};
use crate::error::CompileError;
use std::collections::HashMap;

// Get the JVM local slot and expected WebAssembly type referenced by an instruction, if fixed.
// Reference slots are reported with the mode's default reference type; the translator refines
// string-typed (externref) slots from the tracked operand stack as they appear.
fn opcode_local(op: &Opcode, ref_type: ValueType) -> Option<(u16, ValueType)> {
    match op {
        Opcode::Iload(n) | Opcode::Istore(n) => Some((*n, ValueType::I32)),
        Opcode::Lload(n) | Opcode::Lstore(n) => Some((*n, ValueType::I64)),
        Opcode::Fload(n) | Opcode::Fstore(n) => Some((*n, ValueType::F32)),
        Opcode::Dload(n) | Opcode::Dstore(n) => Some((*n, ValueType::F64)),
        Opcode::Aload(n) | Opcode::Astore(n) => Some((*n, ref_type)),
        Opcode::Iinc { slot, .. } => Some((*slot, ValueType::I32)),
        _ => None,
    }
}

// Number of JVM slots (32-bit words) a value of this type occupies.
fn slot_width(t: ValueType) -> u16 {
    if t.is_wide() {
        2
    } else {
        1
    }
}

/// Interpretation of JVM local slots as typed WebAssembly locals.
///
/// A JVM slot may hold differently typed values over disjoint live ranges; each `(slot, type)`
/// pair gets its own WebAssembly local, so integers, floats and references never share one.
/// `long`/`double` occupy two JVM slots but one WebAssembly local.
#[derive(Debug)]
pub struct LocalAllocation {
    map: HashMap<(u16, ValueType), u32>,
    /// Types of all locals in index order, parameters included.
    types: Vec<ValueType>,
    /// Index where function parameters end and local variables start.
    param_count: u32,
}

impl LocalAllocation {
    pub fn from_code(
        is_static: bool,
        this_type: ValueType,
        params: &[FieldDescriptor],
        use_gc: bool,
        code: &[(u32, Opcode)],
    ) -> Self {
        let mut map = HashMap::new();
        let mut types = vec![];
        let mut slot = 0u16;

        // Implicit this receiver first for instance methods
        if !is_static {
            map.insert((slot, this_type), types.len() as u32);
            types.push(this_type);
            slot += 1;
        }

        // Declared parameters next, wide types consuming two JVM slots
        for param in params {
            let t = param.as_type(use_gc);
            map.insert((slot, t), types.len() as u32);
            types.push(t);
            slot += slot_width(t);
        }

        let param_count = types.len() as u32;

        // Pre-scan the code so loads that precede stores in translation order (loop bodies)
        // already have a typed local
        let ref_type = match use_gc {
            true => ValueType::EqRef,
            false => ValueType::I32,
        };
        let mut locals = Self { map, types, param_count };
        for (_, op) in code {
            if let Some((slot, t)) = opcode_local(op, ref_type) {
                locals.ensure(slot, t);
            }
        }
        locals
    }

    /// Returns the WebAssembly local for `(slot, t)`, allocating one if absent.
    pub fn ensure(&mut self, slot: u16, t: ValueType) -> u32 {
        let types = &mut self.types;
        *self.map.entry((slot, t)).or_insert_with(|| {
            let index = types.len() as u32;
            types.push(t);
            index
        })
    }

    /// Returns the WebAssembly local for `(slot, t)` if one exists.
    pub fn get(&self, slot: u16, t: ValueType) -> Option<u32> {
        self.map.get(&(slot, t)).copied()
    }

    /// Returns the local for `(slot, t)`, failing with a type error when the slot was never
    /// typed as `t`.
    pub fn require(&self, slot: u16, t: ValueType) -> Result<u32, CompileError> {
        self.get(slot, t).ok_or_else(|| {
            CompileError::type_error(format!("local slot {} has no {} value", slot, t))
        })
    }

    /// Adds an extra scratch local of the given type, returning its index.
    pub fn declare_scratch(&mut self, t: ValueType) -> u32 {
        let index = self.types.len() as u32;
        self.types.push(t);
        index
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Locals declaration for the emitters: run-length encoded types of the non-parameter
    /// locals, in index order.
    pub fn run_length_encode(&self) -> Vec<(u32, ValueType)> {
        let mut result: Vec<(u32, ValueType)> = vec![];
        for &t in &self.types[self.param_count as usize..] {
            match result.last_mut() {
                Some((count, last)) if *last == t => *count += 1,
                _ => result.push((1, t)),
            }
        }
        result
    }
}

/// Maps a JVM arithmetic type to its WebAssembly value type.
pub fn prim_value_type(t: PrimType) -> ValueType {
    match t {
        PrimType::Int => ValueType::I32,
        PrimType::Long => ValueType::I64,
        PrimType::Float => ValueType::F32,
        PrimType::Double => ValueType::F64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_params_take_one_local_two_slots() {
        // static (long, int): slots 0-1 hold the long, slot 2 the int
        let params = [FieldDescriptor::Long, FieldDescriptor::Int];
        let locals = LocalAllocation::from_code(true, ValueType::I32, &params, false, &[]);
        assert_eq!(locals.get(0, ValueType::I64), Some(0));
        assert_eq!(locals.get(2, ValueType::I32), Some(1));
        assert_eq!(locals.param_count(), 2);
    }

    #[test]
    fn same_slot_with_two_types_splits_locals() {
        // istore 1 then fstore 1 over disjoint live ranges
        let code = vec![
            (0, Opcode::Iconst(1)),
            (1, Opcode::Istore(1)),
            (2, Opcode::Fconst(1.0)),
            (3, Opcode::Fstore(1)),
        ];
        let locals = LocalAllocation::from_code(true, ValueType::I32, &[], false, &code);
        let int_local = locals.get(1, ValueType::I32).unwrap();
        let float_local = locals.get(1, ValueType::F32).unwrap();
        assert_ne!(int_local, float_local);
    }

    #[test]
    fn run_length_encoding_groups_adjacent_types() {
        let code = vec![
            (0, Opcode::Istore(0)),
            (1, Opcode::Istore(1)),
            (2, Opcode::Dstore(2)),
        ];
        let locals = LocalAllocation::from_code(true, ValueType::I32, &[], false, &code);
        assert_eq!(
            locals.run_length_encode(),
            vec![(2, ValueType::I32), (1, ValueType::F64)]
        );
    }
}
