use crate::class::descriptors::{
    field_descriptor_parser, method_descriptor_parser, FieldDescriptor, ValueType,
    JAVA_LANG_STRING,
};
use crate::class::{
    ArrayKind, Comparison, ConstantPool, Loadable, NumericConstant, Opcode, PrimType, ReturnKind,
    JAVA_LANG_OBJECT,
};
use crate::error::CompileError;
use crate::function::locals::{prim_value_type, LocalAllocation};
use crate::function::stack::OperandStack;
use crate::function::structure::{lookupswitch_plan, SwitchPlan};
use crate::function::types::Inst::I;
use crate::function::types::{Conversion, Inst, Instruction, NumOp, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Result of translating one basic block.
pub struct TranslatedBlock {
    pub body: Vec<Inst>,
    /// Operand stack contents on exit, before the terminator consumes its selector/condition.
    pub exit_stack: Vec<ValueType>,
    /// Scratch local holding the selector of a keyed (sparse) switch terminator.
    pub switch_scratch: Option<u32>,
}

/// Translates JVM bytecode into (pseudo-)instructions over a type-tracked operand stack.
///
/// One translator instance serves a whole method: it owns the scratch local pool and the local
/// variable interpretation, while each basic block is translated independently from its entry
/// stack snapshot. Driven by the structured lowering in [`crate::function::lower_function`].
pub struct Translator<'a> {
    class_name: Rc<String>,
    pool: &'a ConstantPool,
    pub locals: &'a mut LocalAllocation,
    line_numbers: &'a [(u32, u32)],
    use_gc: bool,
    stack: OperandStack,
    scratch: HashMap<(ValueType, usize), u32>,
    switch_scratch: Option<u32>,
}

impl<'a> Translator<'a> {
    pub fn new(
        class_name: Rc<String>,
        pool: &'a ConstantPool,
        locals: &'a mut LocalAllocation,
        line_numbers: &'a [(u32, u32)],
        use_gc: bool,
    ) -> Self {
        Self {
            class_name,
            pool,
            locals,
            line_numbers,
            use_gc,
            stack: OperandStack::new(),
            scratch: HashMap::new(),
            switch_scratch: None,
        }
    }

    /// Default operand type of object references in the configured object model.
    fn ref_type(&self) -> ValueType {
        match self.use_gc {
            true => ValueType::EqRef,
            false => ValueType::I32,
        }
    }

    fn scratch_local(&mut self, ty: ValueType, position: usize) -> u32 {
        let locals = &mut self.locals;
        *self
            .scratch
            .entry((ty, position))
            .or_insert_with(|| locals.declare_scratch(ty))
    }

    /// Translates one basic block from its entry stack snapshot, returning the instruction
    /// stream and exit stack.
    pub fn translate_block(
        &mut self,
        code: &[(u32, Opcode)],
        entry_stack: &[ValueType],
    ) -> anyhow::Result<TranslatedBlock> {
        self.stack.restore(entry_stack);
        self.switch_scratch = None;
        let mut out = Vec::with_capacity(code.len() + code.len() / 4);
        for (offset, op) in code {
            if let Some(line) = self.line_mark_at(*offset) {
                out.push(I(Instruction::SourceLine(line)));
                self.stack.set_line(line);
            }
            self.visit(&mut out, *offset, op).map_err(|e| {
                let e = e.at_line(self.stack.line());
                anyhow::Error::new(e).context(format!("at bytecode offset {}", offset))
            })?;
        }
        Ok(TranslatedBlock {
            body: out,
            exit_stack: self.stack.contents().to_vec(),
            switch_scratch: self.switch_scratch,
        })
    }

    fn line_mark_at(&self, offset: u32) -> Option<u32> {
        self.line_numbers
            .binary_search_by_key(&offset, |(o, _)| *o)
            .ok()
            .map(|i| self.line_numbers[i].1)
    }

    /// Translates a single JVM instruction into one or more (pseudo-)instructions.
    ///
    /// This is the heart of the compiler. The `match` is exhaustive over the decoded opcode
    /// enum, so newly decoded instructions must be handled here before anything compiles.
    fn visit(&mut self, out: &mut Vec<Inst>, _offset: u32, op: &Opcode) -> Result<(), CompileError> {
        use ValueType::*;
        let ref_type = self.ref_type();
        match op {
            Opcode::Nop => out.push(I(Instruction::Nop)),

            // Constants
            Opcode::AconstNull => match self.use_gc {
                true => {
                    out.push(I(Instruction::RefNull(EqRef)));
                    self.stack.push(EqRef);
                }
                false => {
                    out.push(I(Instruction::Const(Value::I32(0))));
                    self.stack.push(I32);
                }
            },
            Opcode::Iconst(v) => {
                out.push(I(Instruction::Const(Value::I32(*v))));
                self.stack.push(I32);
            }
            Opcode::Lconst(v) => {
                out.push(I(Instruction::Const(Value::I64(*v))));
                self.stack.push(I64);
            }
            Opcode::Fconst(v) => {
                out.push(I(Instruction::Const(Value::F32(*v))));
                self.stack.push(F32);
            }
            Opcode::Dconst(v) => {
                out.push(I(Instruction::Const(Value::F64(*v))));
                self.stack.push(F64);
            }
            Opcode::Ldc(n) | Opcode::Ldc2(n) => match self.pool.loadable(*n)? {
                Loadable::Number(NumericConstant::Integer(v)) => {
                    out.push(I(Instruction::Const(Value::I32(v))));
                    self.stack.push(I32);
                }
                Loadable::Number(NumericConstant::Float(v)) => {
                    out.push(I(Instruction::Const(Value::F32(v))));
                    self.stack.push(F32);
                }
                Loadable::Number(NumericConstant::Long(v)) => {
                    out.push(I(Instruction::Const(Value::I64(v))));
                    self.stack.push(I64);
                }
                Loadable::Number(NumericConstant::Double(v)) => {
                    out.push(I(Instruction::Const(Value::F64(v))));
                    self.stack.push(F64);
                }
                Loadable::Str(s) => {
                    out.push(Inst::LdcString(s));
                    self.stack.push(ExternRef);
                }
                Loadable::Class(name) => {
                    out.push(Inst::LdcClass(name));
                    self.stack.push(ExternRef);
                }
            },

            // Loads and stores
            Opcode::Iload(n) => self.load(out, *n, I32)?,
            Opcode::Lload(n) => self.load(out, *n, I64)?,
            Opcode::Fload(n) => self.load(out, *n, F32)?,
            Opcode::Dload(n) => self.load(out, *n, F64)?,
            Opcode::Aload(n) => {
                // A reference slot holds either an object reference or a host string; probe the
                // default reference interpretation first, then the externref one
                let (index, ty) = match self.locals.get(*n, ref_type) {
                    Some(index) => (index, ref_type),
                    None => (self.locals.require(*n, ExternRef)?, ExternRef),
                };
                out.push(I(Instruction::LocalGet(index)));
                self.stack.push(ty);
            }
            Opcode::Istore(n) => self.store(out, *n, I32)?,
            Opcode::Lstore(n) => self.store(out, *n, I64)?,
            Opcode::Fstore(n) => self.store(out, *n, F32)?,
            Opcode::Dstore(n) => self.store(out, *n, F64)?,
            Opcode::Astore(n) => {
                let ty = self.stack.pop_reference()?;
                let index = self.locals.ensure(*n, ty);
                out.push(I(Instruction::LocalSet(index)));
            }
            Opcode::Iinc { slot, delta } => {
                let index = self.locals.require(*slot, I32)?;
                out.push(I(Instruction::LocalGet(index)));
                out.push(I(Instruction::Const(Value::I32(*delta as i32))));
                out.push(I(Instruction::Numeric { op: NumOp::Add, ty: I32 }));
                out.push(I(Instruction::LocalSet(index)));
            }

            // Arrays
            Opcode::ArrayLoad(kind) => {
                self.stack.pop_expect(I32)?;
                self.stack.pop_reference()?;
                out.push(Inst::ArrayGet(*kind));
                self.stack.push(self.array_element_type(*kind));
            }
            Opcode::ArrayStore(kind) => {
                self.stack.pop()?;
                self.stack.pop_expect(I32)?;
                self.stack.pop_reference()?;
                out.push(Inst::ArraySet(*kind));
            }
            Opcode::Newarray(kind) => {
                self.stack.pop_expect(I32)?;
                out.push(Inst::NewArray(primitive_descriptor(*kind)));
                self.stack.push(ref_type);
            }
            Opcode::Anewarray(n) => {
                let class_name = self.pool.class_name(*n)?;
                self.stack.pop_expect(I32)?;
                out.push(Inst::NewArray(FieldDescriptor::Object(class_name.to_string())));
                self.stack.push(ref_type);
            }
            Opcode::Multianewarray { index, dims } => {
                let class_name = self.pool.class_name(*index)?;
                let (_, descriptor) = field_descriptor_parser(&class_name).map_err(|_| {
                    CompileError::decode(format!("bad array class name {}", class_name))
                })?;
                for _ in 0..*dims {
                    self.stack.pop_expect(I32)?;
                }
                out.push(Inst::NewMultiArray { element: descriptor, dims: *dims });
                self.stack.push(ref_type);
            }
            Opcode::Arraylength => {
                self.stack.pop_reference()?;
                out.push(Inst::ArrayLength);
                self.stack.push(I32);
            }

            // Stack juggling
            Opcode::Pop => {
                self.pop_narrow()?;
                out.push(I(Instruction::Drop));
            }
            Opcode::Pop2 => {
                let top = self.stack.pop()?;
                out.push(I(Instruction::Drop));
                if !top.is_wide() {
                    self.pop_narrow()?;
                    out.push(I(Instruction::Drop));
                }
            }
            Opcode::Dup => self.dup(out, 1, 0)?,
            Opcode::DupX1 => self.dup(out, 1, 1)?,
            Opcode::DupX2 => self.dup(out, 1, 2)?,
            Opcode::Dup2 => self.dup(out, 2, 0)?,
            Opcode::Dup2X1 => self.dup(out, 2, 1)?,
            Opcode::Dup2X2 => self.dup(out, 2, 2)?,
            Opcode::Swap => {
                let t2 = self.pop_narrow()?;
                let t1 = self.pop_narrow()?;
                let s2 = self.scratch_local(t2, 0);
                let s1 = self.scratch_local(t1, 1);
                out.push(I(Instruction::LocalSet(s2)));
                out.push(I(Instruction::LocalSet(s1)));
                out.push(I(Instruction::LocalGet(s2)));
                out.push(I(Instruction::LocalGet(s1)));
                self.stack.push(t2);
                self.stack.push(t1);
            }

            // Arithmetic and bit operations
            Opcode::Add(t) => self.binary(out, *t, NumOp::Add)?,
            Opcode::Sub(t) => self.binary(out, *t, NumOp::Sub)?,
            Opcode::Mul(t) => self.binary(out, *t, NumOp::Mul)?,
            Opcode::Div(t) => self.binary(out, *t, NumOp::DivS)?,
            Opcode::Rem(t) => match t {
                PrimType::Float => {
                    self.stack.pop_expect(F32)?;
                    self.stack.pop_expect(F32)?;
                    out.push(Inst::FloatRem);
                    self.stack.push(F32);
                }
                PrimType::Double => {
                    self.stack.pop_expect(F64)?;
                    self.stack.pop_expect(F64)?;
                    out.push(Inst::DoubleRem);
                    self.stack.push(F64);
                }
                _ => self.binary(out, *t, NumOp::RemS)?,
            },
            Opcode::Neg(t) => {
                let ty = prim_value_type(*t);
                self.stack.pop_expect(ty)?;
                match t {
                    PrimType::Float | PrimType::Double => {
                        out.push(I(Instruction::Numeric { op: NumOp::Neg, ty }));
                    }
                    PrimType::Int => {
                        out.push(I(Instruction::Const(Value::I32(-1))));
                        out.push(I(Instruction::Numeric { op: NumOp::Mul, ty }));
                    }
                    PrimType::Long => {
                        out.push(I(Instruction::Const(Value::I64(-1))));
                        out.push(I(Instruction::Numeric { op: NumOp::Mul, ty }));
                    }
                }
                self.stack.push(ty);
            }
            Opcode::Shl(t) => self.shift(out, *t, NumOp::Shl)?,
            Opcode::Shr(t) => self.shift(out, *t, NumOp::ShrS)?,
            Opcode::Ushr(t) => self.shift(out, *t, NumOp::ShrU)?,
            Opcode::And(t) => self.binary(out, *t, NumOp::And)?,
            Opcode::Or(t) => self.binary(out, *t, NumOp::Or)?,
            Opcode::Xor(t) => self.binary(out, *t, NumOp::Xor)?,

            // Conversions
            Opcode::I2l => self.convert(out, I32, I64, Conversion::I2L)?,
            Opcode::I2f => self.convert(out, I32, F32, Conversion::I2F)?,
            Opcode::I2d => self.convert(out, I32, F64, Conversion::I2D)?,
            Opcode::L2i => self.convert(out, I64, I32, Conversion::L2I)?,
            Opcode::L2f => self.convert(out, I64, F32, Conversion::L2F)?,
            Opcode::L2d => self.convert(out, I64, F64, Conversion::L2D)?,
            Opcode::F2i => self.convert(out, F32, I32, Conversion::F2I)?,
            Opcode::F2l => self.convert(out, F32, I64, Conversion::F2L)?,
            Opcode::F2d => self.convert(out, F32, F64, Conversion::F2D)?,
            Opcode::D2i => self.convert(out, F64, I32, Conversion::D2I)?,
            Opcode::D2l => self.convert(out, F64, I64, Conversion::D2L)?,
            Opcode::D2f => self.convert(out, F64, F32, Conversion::D2F)?,
            Opcode::I2b => self.convert(out, I32, I32, Conversion::I2B)?,
            Opcode::I2s => self.convert(out, I32, I32, Conversion::I2S)?,
            Opcode::I2c => {
                // char is an unsigned 16-bit value, mask instead of sign-extending
                self.stack.pop_expect(I32)?;
                out.push(I(Instruction::Const(Value::I32(0xFFFF))));
                out.push(I(Instruction::Numeric { op: NumOp::And, ty: I32 }));
                self.stack.push(I32);
            }

            // Comparisons
            Opcode::Lcmp => {
                self.stack.pop_expect(I64)?;
                self.stack.pop_expect(I64)?;
                out.push(Inst::LongCmp);
                self.stack.push(I32);
            }
            Opcode::Fcmp(nan) => {
                self.stack.pop_expect(F32)?;
                self.stack.pop_expect(F32)?;
                out.push(Inst::FloatCmp(*nan));
                self.stack.push(I32);
            }
            Opcode::Dcmp(nan) => {
                self.stack.pop_expect(F64)?;
                self.stack.pop_expect(F64)?;
                out.push(Inst::DoubleCmp(*nan));
                self.stack.push(I32);
            }

            // Conditional branches: emit the condition, the restructurer emits the branch
            Opcode::If { cmp, .. } => {
                self.stack.pop_expect(I32)?;
                match cmp {
                    Comparison::Eq => out.push(I(Instruction::Numeric { op: NumOp::Eqz, ty: I32 })),
                    _ => {
                        out.push(I(Instruction::Const(Value::I32(0))));
                        out.push(I(Instruction::Numeric { op: comparison_op(*cmp), ty: I32 }));
                    }
                }
                self.stack.push(I32);
            }
            Opcode::IfIcmp { cmp, .. } => {
                self.stack.pop_expect(I32)?;
                self.stack.pop_expect(I32)?;
                out.push(I(Instruction::Numeric { op: comparison_op(*cmp), ty: I32 }));
                self.stack.push(I32);
            }
            Opcode::IfAcmp { equal, .. } => {
                let a = self.stack.pop_reference()?;
                let b = self.stack.pop_reference()?;
                match (self.use_gc, a, b) {
                    (false, _, _) => {
                        let op = if *equal { NumOp::Eq } else { NumOp::Ne };
                        out.push(I(Instruction::Numeric { op, ty: I32 }));
                    }
                    (true, EqRef, EqRef) => {
                        out.push(I(Instruction::RefEq));
                        if !*equal {
                            out.push(I(Instruction::Numeric { op: NumOp::Eqz, ty: I32 }));
                        }
                    }
                    _ => {
                        return Err(CompileError::unsupported(
                            "reference identity comparison of host strings",
                        ))
                    }
                }
                self.stack.push(I32);
            }
            Opcode::IfNull { null, .. } => {
                let ty = self.stack.pop_reference()?;
                match ty {
                    I32 => out.push(I(Instruction::Numeric { op: NumOp::Eqz, ty: I32 })),
                    _ => out.push(I(Instruction::RefIsNull)),
                }
                if !*null {
                    out.push(I(Instruction::Numeric { op: NumOp::Eqz, ty: I32 }));
                }
                self.stack.push(I32);
            }
            Opcode::Goto(_) => {}

            // N-way branches: emit the selector, the restructurer emits the br_table/compares
            Opcode::Tableswitch { low, .. } => {
                self.stack.pop_expect(I32)?;
                if *low != 0 {
                    out.push(I(Instruction::Const(Value::I32(*low))));
                    out.push(I(Instruction::Numeric { op: NumOp::Sub, ty: I32 }));
                }
                self.stack.push(I32);
            }
            Opcode::Lookupswitch { default, pairs } => {
                self.stack.pop_expect(I32)?;
                match lookupswitch_plan(pairs, *default) {
                    SwitchPlan::Table { bias, .. } => {
                        if bias != 0 {
                            out.push(I(Instruction::Const(Value::I32(bias))));
                            out.push(I(Instruction::Numeric { op: NumOp::Sub, ty: I32 }));
                        }
                        self.stack.push(I32);
                    }
                    SwitchPlan::Keyed { .. } => {
                        let scratch = self.scratch_local(I32, 9);
                        out.push(I(Instruction::LocalSet(scratch)));
                        self.switch_scratch = Some(scratch);
                    }
                }
            }

            // Returns: the value stays on the stack for the restructurer's return
            Opcode::Return(kind) => match kind {
                ReturnKind::Void => {}
                ReturnKind::Int => {
                    self.stack.pop_expect(I32)?;
                }
                ReturnKind::Long => {
                    self.stack.pop_expect(I64)?;
                }
                ReturnKind::Float => {
                    self.stack.pop_expect(F32)?;
                }
                ReturnKind::Double => {
                    self.stack.pop_expect(F64)?;
                }
                ReturnKind::Ref => {
                    self.stack.pop_reference()?;
                }
            },

            // Fields
            Opcode::Getstatic(n) => {
                let field = self.pool.field(*n)?;
                let ty = field.descriptor.as_type(self.use_gc);
                out.push(Inst::GetStatic(field));
                self.stack.push(ty);
            }
            Opcode::Putstatic(n) => {
                let field = self.pool.field(*n)?;
                self.stack.pop()?;
                out.push(Inst::PutStatic(field));
            }
            Opcode::Getfield(n) => {
                let field = self.pool.field(*n)?;
                let ty = field.descriptor.as_type(self.use_gc);
                self.stack.pop_reference()?;
                out.push(Inst::GetField(field));
                self.stack.push(ty);
            }
            Opcode::Putfield(n) => {
                let field = self.pool.field(*n)?;
                self.stack.pop()?;
                self.stack.pop_reference()?;
                out.push(Inst::PutField(field));
            }

            // Invocation
            Opcode::Invokestatic(n) => {
                let method = self.pool.method(*n)?;
                self.pop_arguments(&method)?;
                let returns = method.descriptor.returns.as_type(self.use_gc);
                out.push(Inst::CallStatic(method));
                if returns != Empty {
                    self.stack.push(returns);
                }
            }
            Opcode::Invokespecial(n) => {
                let method = self.pool.method(*n)?;
                self.pop_arguments(&method)?;
                if *method.class_name == JAVA_LANG_OBJECT && *method.name == "<init>" {
                    // Implicit Object super() is a no-op, but the receiver must be consumed
                    self.stack.pop_reference()?;
                    out.push(I(Instruction::Drop));
                } else {
                    self.stack.pop_reference()?;
                    let returns = method.descriptor.returns.as_type(self.use_gc);
                    out.push(Inst::CallStatic(method));
                    if returns != Empty {
                        self.stack.push(returns);
                    }
                }
            }
            Opcode::Invokevirtual(n) => {
                let method = self.pool.method(*n)?;
                self.pop_arguments(&method)?;
                self.stack.pop_reference()?;
                let returns = method.descriptor.returns.as_type(self.use_gc);
                out.push(Inst::CallVirtual(method));
                if returns != Empty {
                    self.stack.push(returns);
                }
            }
            Opcode::Invokeinterface(n) => {
                let method = self.pool.method(*n)?;
                self.pop_arguments(&method)?;
                self.stack.pop_reference()?;
                let returns = method.descriptor.returns.as_type(self.use_gc);
                out.push(Inst::CallInterface(method));
                if returns != Empty {
                    self.stack.push(returns);
                }
            }
            Opcode::Invokedynamic(n) => {
                let call_site = self.pool.invoke_dynamic(*n)?;
                let (_, descriptor) =
                    method_descriptor_parser(&call_site.descriptor).map_err(|_| {
                        CompileError::decode(format!(
                            "bad invokedynamic descriptor {}",
                            call_site.descriptor
                        ))
                    })?;
                // The dynamic descriptor's parameters are the captured values
                for param in descriptor.params.iter().rev() {
                    self.stack.pop_expect(param.as_type(self.use_gc))?;
                }
                let returns = descriptor.returns.as_type(self.use_gc);
                out.push(Inst::InvokeDynamic {
                    class_name: Rc::clone(&self.class_name),
                    name: call_site.name,
                    descriptor: Rc::new(descriptor),
                    bootstrap_index: call_site.bootstrap_index,
                });
                if returns != Empty {
                    self.stack.push(returns);
                }
            }

            // Objects
            Opcode::New(n) => {
                let class_name = self.pool.class_name(*n)?;
                out.push(Inst::New(class_name));
                self.stack.push(ref_type);
            }
            Opcode::Checkcast(n) => {
                let class_name = self.pool.class_name(*n)?;
                let ty = self.stack.pop_reference()?;
                out.push(Inst::CheckCast(class_name));
                self.stack.push(ty);
            }
            Opcode::Instanceof(n) => {
                let class_name = self.pool.class_name(*n)?;
                self.stack.pop_reference()?;
                out.push(Inst::InstanceOf(class_name));
                self.stack.push(I32);
            }

            // Exceptions: the restructurer lowers the throw itself
            Opcode::Athrow => {
                self.stack.pop_reference()?;
            }

            // Locks have no semantics in a single-threaded target, drop the reference
            Opcode::Monitorenter | Opcode::Monitorexit => {
                self.stack.pop_reference()?;
                out.push(I(Instruction::Drop));
            }

            Opcode::Jsr(_) | Opcode::Ret(_) => {
                return Err(CompileError::unsupported(
                    "jsr/ret subroutines (irreducible control flow)",
                ))
            }
        }
        Ok(())
    }

    fn load(&mut self, out: &mut Vec<Inst>, slot: u16, ty: ValueType) -> Result<(), CompileError> {
        let index = self.locals.require(slot, ty)?;
        out.push(I(Instruction::LocalGet(index)));
        self.stack.push(ty);
        Ok(())
    }

    fn store(&mut self, out: &mut Vec<Inst>, slot: u16, ty: ValueType) -> Result<(), CompileError> {
        self.stack.pop_expect(ty)?;
        let index = self.locals.ensure(slot, ty);
        out.push(I(Instruction::LocalSet(index)));
        Ok(())
    }

    fn binary(&mut self, out: &mut Vec<Inst>, t: PrimType, op: NumOp) -> Result<(), CompileError> {
        let ty = prim_value_type(t);
        self.stack.pop_expect(ty)?;
        self.stack.pop_expect(ty)?;
        out.push(I(Instruction::Numeric { op, ty }));
        self.stack.push(ty);
        Ok(())
    }

    fn shift(&mut self, out: &mut Vec<Inst>, t: PrimType, op: NumOp) -> Result<(), CompileError> {
        let ty = prim_value_type(t);
        // The shift amount is an int on the JVM, but must match the operand width here
        self.stack.pop_expect(ValueType::I32)?;
        if ty == ValueType::I64 {
            out.push(I(Instruction::Convert(Conversion::I2L)));
        }
        self.stack.pop_expect(ty)?;
        out.push(I(Instruction::Numeric { op, ty }));
        self.stack.push(ty);
        Ok(())
    }

    fn convert(
        &mut self,
        out: &mut Vec<Inst>,
        from: ValueType,
        to: ValueType,
        kind: Conversion,
    ) -> Result<(), CompileError> {
        self.stack.pop_expect(from)?;
        out.push(I(Instruction::Convert(kind)));
        self.stack.push(to);
        Ok(())
    }

    fn pop_narrow(&mut self) -> Result<ValueType, CompileError> {
        let ty = self.stack.pop()?;
        if ty.is_wide() {
            return Err(CompileError::type_error(format!(
                "expected a single-word value, found {}",
                ty
            )));
        }
        Ok(ty)
    }

    /// Duplicates the top `dup_words` JVM words of the stack, re-inserting the copy below the
    /// next `skip_words` words. This covers the whole `dup`/`dup_x`/`dup2` family via scratch
    /// locals; wide values count as two words but travel as one.
    fn dup(
        &mut self,
        out: &mut Vec<Inst>,
        dup_words: u32,
        skip_words: u32,
    ) -> Result<(), CompileError> {
        let mut pop_group = |words: u32, stack: &mut OperandStack| -> Result<Vec<ValueType>, CompileError> {
            let mut group = vec![];
            let mut count = 0;
            while count < words {
                let ty = stack.pop()?;
                count += if ty.is_wide() { 2 } else { 1 };
                group.push(ty);
            }
            if count != words {
                return Err(CompileError::type_error("wide value split by dup"));
            }
            Ok(group)
        };
        let dup_group = pop_group(dup_words, &mut self.stack)?; // Top first
        let skip_group = pop_group(skip_words, &mut self.stack)?;

        // Spill everything, each value to its own typed scratch slot
        let mut spilled = vec![];
        for (position, &ty) in dup_group.iter().chain(skip_group.iter()).enumerate() {
            spilled.push((self.scratch_local(ty, position), ty));
        }
        for &(local, _) in &spilled {
            out.push(I(Instruction::LocalSet(local)));
        }

        // Rebuild: duplicated copy lowest, then the skipped values, then the originals
        let dup_spill = &spilled[..dup_group.len()];
        let skip_spill = &spilled[dup_group.len()..];
        for &(local, ty) in dup_spill.iter().rev() {
            out.push(I(Instruction::LocalGet(local)));
            self.stack.push(ty);
        }
        for &(local, ty) in skip_spill.iter().rev() {
            out.push(I(Instruction::LocalGet(local)));
            self.stack.push(ty);
        }
        for &(local, ty) in dup_spill.iter().rev() {
            out.push(I(Instruction::LocalGet(local)));
            self.stack.push(ty);
        }
        Ok(())
    }

    fn pop_arguments(&mut self, method: &crate::class::FunctionName) -> Result<(), CompileError> {
        for param in method.descriptor.params.iter().rev() {
            let expected = param.as_type(self.use_gc);
            // Null literals for string parameters arrive as the default reference type
            match expected {
                ValueType::ExternRef => {
                    self.stack.pop()?;
                }
                _ => {
                    self.stack.pop_expect(expected)?;
                }
            }
        }
        Ok(())
    }

    fn array_element_type(&self, kind: ArrayKind) -> ValueType {
        match kind {
            ArrayKind::Long => ValueType::I64,
            ArrayKind::Float => ValueType::F32,
            ArrayKind::Double => ValueType::F64,
            ArrayKind::Ref => self.ref_type(),
            _ => ValueType::I32,
        }
    }
}

fn comparison_op(cmp: Comparison) -> NumOp {
    match cmp {
        Comparison::Eq => NumOp::Eq,
        Comparison::Ne => NumOp::Ne,
        Comparison::Lt => NumOp::LtS,
        Comparison::Ge => NumOp::GeS,
        Comparison::Gt => NumOp::GtS,
        Comparison::Le => NumOp::LeS,
    }
}

fn primitive_descriptor(kind: ArrayKind) -> FieldDescriptor {
    match kind {
        ArrayKind::Int => FieldDescriptor::Int,
        ArrayKind::Long => FieldDescriptor::Long,
        ArrayKind::Float => FieldDescriptor::Float,
        ArrayKind::Double => FieldDescriptor::Double,
        ArrayKind::Byte => FieldDescriptor::Byte,
        ArrayKind::Char => FieldDescriptor::Char,
        ArrayKind::Short => FieldDescriptor::Short,
        ArrayKind::Ref => FieldDescriptor::Object(String::from(JAVA_LANG_STRING)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::decode_bytecode;
    use crate::class::{ClassReader, ConstantPool};

    fn empty_pool() -> ConstantPool {
        let data = 1u16.to_be_bytes();
        ConstantPool::parse(&mut ClassReader::new(&data)).unwrap()
    }

    fn translate(bytes: &[u8], params: &[FieldDescriptor]) -> anyhow::Result<Vec<Inst>> {
        let code = decode_bytecode(bytes).unwrap();
        let pool = empty_pool();
        let mut locals =
            LocalAllocation::from_code(true, ValueType::I32, params, false, &code);
        let mut translator = Translator::new(
            Rc::new(String::from("Test")),
            &pool,
            &mut locals,
            &[],
            false,
        );
        Ok(translator.translate_block(&code, &[])?.body)
    }

    #[test]
    fn translates_integer_add() {
        // iload_0, iload_1, iadd, ireturn
        let out = translate(&[0x1a, 0x1b, 0x60, 0xac], &[FieldDescriptor::Int, FieldDescriptor::Int])
            .unwrap();
        assert_eq!(
            out,
            vec![
                I(Instruction::LocalGet(0)),
                I(Instruction::LocalGet(1)),
                I(Instruction::Numeric { op: NumOp::Add, ty: ValueType::I32 }),
            ]
        );
    }

    #[test]
    fn iinc_expands_to_read_modify_write() {
        // iinc slot 0 by 5, return
        let out = translate(&[0x84, 0x00, 0x05, 0xb1], &[FieldDescriptor::Int]).unwrap();
        assert_eq!(
            out,
            vec![
                I(Instruction::LocalGet(0)),
                I(Instruction::Const(Value::I32(5))),
                I(Instruction::Numeric { op: NumOp::Add, ty: ValueType::I32 }),
                I(Instruction::LocalSet(0)),
            ]
        );
    }

    #[test]
    fn long_shift_extends_the_amount() {
        // lload_0, iload_2, lshl, lreturn
        let out = translate(
            &[0x1e, 0x1c, 0x79, 0xad],
            &[FieldDescriptor::Long, FieldDescriptor::Int],
        )
        .unwrap();
        assert_eq!(out[2], I(Instruction::Convert(Conversion::I2L)));
        assert_eq!(out[3], I(Instruction::Numeric { op: NumOp::Shl, ty: ValueType::I64 }));
    }

    #[test]
    fn dup_uses_scratch_local() {
        // iconst_1, dup, iadd, ireturn
        let out = translate(&[0x04, 0x59, 0x60, 0xac], &[]).unwrap();
        // dup spills to a scratch local and reloads it twice
        assert_eq!(out[1], I(Instruction::LocalSet(0)));
        assert_eq!(out[2], I(Instruction::LocalGet(0)));
        assert_eq!(out[3], I(Instruction::LocalGet(0)));
    }

    #[test]
    fn monitor_ops_drop_the_reference() {
        // aload_0, monitorenter, return
        let out = translate(
            &[0x2a, 0xc2, 0xb1],
            &[FieldDescriptor::Object(String::from("Test"))],
        )
        .unwrap();
        assert_eq!(out[1], I(Instruction::Drop));
    }

    #[test]
    fn stack_mismatch_is_a_type_error() {
        // fconst_0, ireturn: returning a float as int
        let err = translate(&[0x0b, 0xac], &[]).unwrap_err();
        let compile = crate::error::find_compile_error(&err).unwrap();
        assert_eq!(compile.kind, crate::error::ErrorKind::Type);
    }

    #[test]
    fn i2c_masks_instead_of_extending() {
        let out = translate(&[0x03, 0x92, 0xac], &[]).unwrap();
        assert_eq!(out[1], I(Instruction::Const(Value::I32(0xFFFF))));
        assert_eq!(out[2], I(Instruction::Numeric { op: NumOp::And, ty: ValueType::I32 }));
    }

    #[test]
    fn jsr_is_unsupported() {
        let err = translate(&[0xa8, 0x00, 0x02, 0xb1], &[]).unwrap_err();
        let compile = crate::error::find_compile_error(&err).unwrap();
        assert_eq!(compile.kind, crate::error::ErrorKind::Unsupported);
    }
}
