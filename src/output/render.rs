use crate::class::descriptors::{FieldDescriptor, FunctionType, StorageType, ValueType};
use crate::class::{ArrayKind, NaNBehaviour, JAVA_LANG_OBJECT};
use crate::error::CompileError;
use crate::function::locals::LocalAllocation;
use crate::function::{Inst, Instruction, NumOp, Value};
use crate::options::Config;
use crate::output::dynamic::{DynamicKey, DynamicPlan};
use crate::output::functions::{synthetic_name, FunctionKind, FunctionManager, GlobalManager};
use crate::output::strings::{DataLayout, StringPool};
use crate::virtuals::{
    FieldLocation, VirtualTable, ARRAY_DATA_OFFSET, ARRAY_LENGTH_OFFSET, CLASS_INDEX_OFFSET,
    OBJECT_HEADER_SIZE, VTABLE_POINTER_OFFSET,
};
use std::collections::HashMap;
use std::rc::Rc;

/// Function table index of the funcref table used by `call_indirect`.
pub const FUNCTION_TABLE: u32 = 0;
/// Table index of the externref string materialization cache.
pub const STRING_TABLE: u32 = 1;
/// Table index of the externref class object cache.
pub const CLASS_TABLE: u32 = 2;

/// Dense ids of the fixed host runtime imports, registered during the prepare pass.
#[derive(Debug)]
pub struct RuntimeImports {
    /// Host allocator returning zeroed memory (non-GC mode only).
    pub alloc: Option<u32>,
    /// Materializes the string at `(strings_base, index)` as a host object.
    pub string: u32,
    /// Materializes the class object for `(type_table_base, class_index)`.
    pub class: u32,
    /// String concatenation and the per-type to-string conversions, for `invokedynamic`
    /// string-concat call sites.
    pub concat: u32,
    pub str_i32: u32,
    pub str_i64: u32,
    pub str_f32: u32,
    pub str_f64: u32,
}

/// Registers the fixed runtime imports. Must run during prepare, before the import space
/// freezes.
pub fn register_runtime_imports(
    functions: &mut FunctionManager,
    config: &Config,
) -> Result<RuntimeImports, CompileError> {
    let mut import = |name: &str, params: Vec<ValueType>, results: Vec<ValueType>| {
        let func_type = FunctionType { params, results };
        functions.resolve(
            &synthetic_name(name, "()V"),
            &func_type,
            FunctionKind::Imported {
                module: String::from("runtime"),
                name: String::from(name),
                js: None,
            },
        )
    };
    use ValueType::*;
    let alloc = match config.use_gc {
        true => None,
        false => Some(import("alloc", vec![I32], vec![I32])?),
    };
    Ok(RuntimeImports {
        alloc,
        string: import("string", vec![I32, I32], vec![ExternRef])?,
        class: import("class", vec![I32, I32], vec![ExternRef])?,
        concat: import("concat", vec![ExternRef, ExternRef], vec![ExternRef])?,
        str_i32: import("str_i32", vec![I32], vec![ExternRef])?,
        str_i64: import("str_i64", vec![I64], vec![ExternRef])?,
        str_f32: import("str_f32", vec![F32], vec![ExternRef])?,
        str_f64: import("str_f64", vec![F64], vec![ExternRef])?,
    })
}

/// A synthesized helper function: dispatchers, comparison intrinsics, accessors, lambda
/// bridges. Generated with raw instruction bodies during rendering and appended after all user
/// functions.
#[derive(Debug)]
pub struct SyntheticFunction {
    pub id: u32,
    pub debug_name: String,
    pub locals: Vec<(u32, ValueType)>,
    pub body: Vec<Instruction>,
}

/// Deduplication key for synthesized helpers (the ensure pattern: first use creates, later
/// uses reuse).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
enum Ensured {
    VirtualDispatcher(FunctionType),
    InterfaceDispatcher(FunctionType),
    InstanceOfCore,
    LongCmp,
    FloatCmp(bool),
    DoubleCmp(bool),
    FloatRem,
    DoubleRem,
    StringAccessor,
    ClassAccessor,
    MultiArray(String),
}

/// Whole-program rendering phase: lowers (pseudo-)instruction streams to final instruction
/// records using the managers, the virtual table and the frozen data layout.
pub struct Renderer<'a> {
    pub functions: &'a mut FunctionManager,
    pub virtuals: &'a mut VirtualTable,
    pub strings: &'a mut StringPool,
    pub globals: &'a mut GlobalManager,
    pub layout: &'a DataLayout,
    pub runtime: &'a RuntimeImports,
    pub dynamic_plans: &'a HashMap<DynamicKey, DynamicPlan>,
    pub config: &'a Config,
    /// Offset added to function type ids in `call_indirect`: GC struct types occupy the leading
    /// type section indices.
    pub type_base: u32,
    ensured: HashMap<Ensured, u32>,
    synthetics: Vec<SyntheticFunction>,
    scratch: HashMap<(ValueType, u8), u32>,
}

impl<'a> Renderer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        functions: &'a mut FunctionManager,
        virtuals: &'a mut VirtualTable,
        strings: &'a mut StringPool,
        globals: &'a mut GlobalManager,
        layout: &'a DataLayout,
        runtime: &'a RuntimeImports,
        dynamic_plans: &'a HashMap<DynamicKey, DynamicPlan>,
        config: &'a Config,
        type_base: u32,
    ) -> Self {
        Self {
            functions,
            virtuals,
            strings,
            globals,
            layout,
            runtime,
            dynamic_plans,
            config,
            type_base,
            ensured: HashMap::new(),
            synthetics: vec![],
            scratch: HashMap::new(),
        }
    }

    pub fn into_synthetics(self) -> Vec<SyntheticFunction> {
        self.synthetics
    }

    /// Adds a pre-registered synthetic function body (lambda bridges, concat functions).
    pub fn push_synthetic(&mut self, synthetic: SyntheticFunction) {
        self.synthetics.push(synthetic);
    }

    /// Public handle on the string accessor for the dynamic call site synthesis.
    pub fn string_accessor(&mut self) -> anyhow::Result<u32> {
        self.ensure_string_accessor()
    }

    fn ref_type(&self) -> ValueType {
        match self.config.use_gc {
            true => ValueType::EqRef,
            false => ValueType::I32,
        }
    }

    /// Renders one function body, lowering every pseudo-instruction.
    pub fn render_body(
        &mut self,
        insts: &[Inst],
        locals: &mut LocalAllocation,
    ) -> anyhow::Result<Vec<Instruction>> {
        self.scratch.clear();
        let mut out = Vec::with_capacity(insts.len() + insts.len() / 4);
        for inst in insts {
            self.lower(inst, &mut out, locals)?;
        }
        Ok(out)
    }

    fn scratch_local(&mut self, locals: &mut LocalAllocation, ty: ValueType, slot: u8) -> u32 {
        *self
            .scratch
            .entry((ty, slot))
            .or_insert_with(|| locals.declare_scratch(ty))
    }

    fn lower(
        &mut self,
        inst: &Inst,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
    ) -> anyhow::Result<()> {
        match inst {
            Inst::I(Instruction::CallIndirect { type_index }) => {
                out.push(Instruction::CallIndirect { type_index: self.type_base + type_index });
            }
            Inst::I(i) => out.push(i.clone()),

            Inst::LdcString(s) => {
                let index = self.strings.intern(s)?;
                let accessor = self.ensure_string_accessor()?;
                out.push(Instruction::Const(Value::I32(index as i32)));
                out.push(Instruction::Call(accessor));
            }
            Inst::LdcClass(name) => {
                let class_index = self.virtuals.class_index(name)?;
                let accessor = self.ensure_class_accessor()?;
                out.push(Instruction::Const(Value::I32(class_index as i32)));
                out.push(Instruction::Call(accessor));
            }

            Inst::New(class_name) => {
                let class_index = self.virtuals.class_index(class_name)?;
                self.lower_new(out, locals, class_index, None)?;
            }
            Inst::NewArray(element) => self.lower_new_array(out, locals, element)?,
            Inst::NewMultiArray { element, dims } => {
                match dims {
                    0 => return Err(CompileError::emit("zero-dimensional array").into()),
                    1 => {
                        let component = component_of(element)?;
                        self.lower_new_array(out, locals, &component)?
                    }
                    2 => {
                        let helper = self.ensure_multi_array(element, locals)?;
                        out.push(Instruction::Call(helper));
                    }
                    _ => {
                        return Err(CompileError::unsupported(format!(
                            "multianewarray with {} dimensions",
                            dims
                        ))
                        .into())
                    }
                }
            }
            Inst::ArrayGet(kind) => self.lower_array_get(out, *kind)?,
            Inst::ArraySet(kind) => self.lower_array_set(out, locals, *kind)?,
            Inst::ArrayLength => match self.config.use_gc {
                false => out.push(Instruction::load(
                    StorageType::Val(ValueType::I32),
                    ARRAY_LENGTH_OFFSET,
                    false,
                )),
                true => {
                    return Err(CompileError::unsupported(
                        "array length on an untyped receiver in GC mode",
                    )
                    .into())
                }
            },

            Inst::GetField(field) => match self.virtuals.field_location(field)? {
                FieldLocation::Memory { ty, offset } => {
                    out.push(Instruction::load(ty, offset, field_signed(&field.descriptor)));
                }
                FieldLocation::Struct { class_index, field: index, ty } => {
                    let type_index = self.virtuals.get(class_index).type_index;
                    out.push(Instruction::RefCast(type_index));
                    out.push(Instruction::StructGet {
                        type_index,
                        field: index,
                        signed: matches!(ty, StorageType::I8 | StorageType::I16)
                            && field_signed(&field.descriptor),
                    });
                }
            },
            Inst::PutField(field) => match self.virtuals.field_location(field)? {
                FieldLocation::Memory { ty, offset } => {
                    out.push(Instruction::store(ty, offset));
                }
                FieldLocation::Struct { class_index, field: index, ty } => {
                    let type_index = self.virtuals.get(class_index).type_index;
                    let value = self.scratch_local(locals, ty.unpacked(), 0);
                    out.push(Instruction::LocalSet(value));
                    out.push(Instruction::RefCast(type_index));
                    out.push(Instruction::LocalGet(value));
                    out.push(Instruction::StructSet { type_index, field: index });
                }
            },
            Inst::GetStatic(field) => {
                let ty = field.descriptor.as_type(self.config.use_gc);
                let global = self.globals.resolve(field, ty);
                out.push(Instruction::GlobalGet(global));
            }
            Inst::PutStatic(field) => {
                let ty = field.descriptor.as_type(self.config.use_gc);
                let global = self.globals.resolve(field, ty);
                out.push(Instruction::GlobalSet(global));
            }

            Inst::CallStatic(name) => {
                out.push(Instruction::Call(self.functions.id_of(name)?));
            }
            Inst::CallVirtual(name) => {
                let slot = self.virtuals.method_slot(name)?;
                let func_type = name
                    .descriptor
                    .function_type(self.config.use_gc)
                    .with_implicit_this(self.ref_type());
                let dispatcher = self.ensure_virtual_dispatcher(&func_type)?;
                out.push(Instruction::Const(Value::I32(slot as i32)));
                out.push(Instruction::Call(dispatcher));
            }
            Inst::CallInterface(name) => {
                let key = format!("{}", name);
                let base = *self.layout.dispatch_arrays.get(&key).ok_or_else(|| {
                    CompileError::emit(format!("no dispatch array for {}", name))
                })?;
                let func_type = name
                    .descriptor
                    .function_type(self.config.use_gc)
                    .with_implicit_this(self.ref_type());
                let dispatcher = self.ensure_interface_dispatcher(&func_type)?;
                out.push(Instruction::Const(Value::I32(base as i32)));
                out.push(Instruction::Call(dispatcher));
            }
            Inst::InvokeDynamic { class_name, name, descriptor, bootstrap_index } => {
                let key = DynamicKey {
                    class_name: Rc::clone(class_name),
                    bootstrap_index: *bootstrap_index,
                    name: Rc::clone(name),
                    descriptor: Rc::clone(descriptor),
                };
                let plan = self.dynamic_plans.get(&key).ok_or_else(|| {
                    CompileError::emit(format!("invokedynamic site {} was not planned", name))
                })?;
                match plan.clone() {
                    DynamicPlan::Lambda { class_name, captures } => {
                        self.lower_lambda_alloc(out, locals, &class_name, &captures)?
                    }
                    DynamicPlan::StringConcat { function } => {
                        out.push(Instruction::Call(self.functions.id_of(&function)?));
                    }
                }
            }

            Inst::InstanceOf(class_name) => {
                let target = self.virtuals.class_index(class_name)?;
                self.lower_instanceof(out, locals, target)?;
            }
            Inst::CheckCast(class_name) => {
                let target = self.virtuals.class_index(class_name)?;
                self.lower_checkcast(out, locals, target)?;
            }

            Inst::LongCmp => {
                let helper = self.ensure_long_cmp();
                out.push(Instruction::Call(helper));
            }
            Inst::FloatCmp(nan) => {
                let helper = self.ensure_float_cmp(ValueType::F32, *nan);
                out.push(Instruction::Call(helper));
            }
            Inst::DoubleCmp(nan) => {
                let helper = self.ensure_float_cmp(ValueType::F64, *nan);
                out.push(Instruction::Call(helper));
            }
            Inst::FloatRem => {
                let helper = self.ensure_rem(ValueType::F32);
                out.push(Instruction::Call(helper));
            }
            Inst::DoubleRem => {
                let helper = self.ensure_rem(ValueType::F64);
                out.push(Instruction::Call(helper));
            }
        }
        Ok(())
    }

    /// Lowers an allocation: host allocator call plus header stores in the non-GC model,
    /// `struct.new` with header values and defaults in the GC model. `captures` optionally
    /// initializes the declared fields from values already on the stack (lambda call sites).
    fn lower_new(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
        class_index: u32,
        captures: Option<&[ValueType]>,
    ) -> anyhow::Result<()> {
        let t = self.virtuals.get(class_index);
        let name = Rc::clone(&t.name);
        let vtable_offset = self.layout.vtable_offsets[class_index as usize];
        if self.config.use_gc {
            let type_index = t.type_index;
            let field_types: Vec<StorageType> = t.fields.iter().skip(2).map(|f| f.ty).collect();
            if let Some(captures) = captures {
                // Captured values are on the stack; spill so the header consts go underneath
                let mut spilled = vec![];
                for (i, &ty) in captures.iter().enumerate().rev() {
                    let s = self.scratch_local(locals, ty, i as u8);
                    out.push(Instruction::LocalSet(s));
                    spilled.push(s);
                }
                out.push(Instruction::Const(Value::I32(vtable_offset as i32)));
                out.push(Instruction::Const(Value::I32(class_index as i32)));
                for s in spilled.into_iter().rev() {
                    out.push(Instruction::LocalGet(s));
                }
            } else {
                out.push(Instruction::Const(Value::I32(vtable_offset as i32)));
                out.push(Instruction::Const(Value::I32(class_index as i32)));
                for ty in field_types {
                    out.push(default_value(ty));
                }
            }
            out.push(Instruction::StructNew(type_index));
        } else {
            let size = self.virtuals.class_size(&name)?;
            let alloc = self.alloc_import()?;
            let ptr = self.scratch_local(locals, ValueType::I32, 16);
            if let Some(captures) = captures {
                // Spill captures, allocate, then store them into the declared fields
                let mut spilled = vec![];
                for (i, &ty) in captures.iter().enumerate().rev() {
                    let s = self.scratch_local(locals, ty, i as u8);
                    out.push(Instruction::LocalSet(s));
                    spilled.push(s);
                }
                spilled.reverse();
                self.emit_alloc_header(out, ptr, alloc, size, vtable_offset, class_index);
                let field_info: Vec<(StorageType, u32)> = {
                    let t = self.virtuals.get(class_index);
                    let mut offset = OBJECT_HEADER_SIZE;
                    t.fields
                        .iter()
                        .skip(2)
                        .map(|f| {
                            let this = offset;
                            offset += f.ty.byte_size().max(4);
                            (f.ty, this)
                        })
                        .collect()
                };
                for ((ty, offset), s) in field_info.into_iter().zip(spilled) {
                    out.push(Instruction::LocalGet(ptr));
                    out.push(Instruction::LocalGet(s));
                    out.push(Instruction::store(ty, offset));
                }
                out.push(Instruction::LocalGet(ptr));
            } else {
                self.emit_alloc_header(out, ptr, alloc, size, vtable_offset, class_index);
                out.push(Instruction::LocalGet(ptr));
            }
        }
        Ok(())
    }

    /// Calls the allocator and fills the two header fields, leaving nothing on the stack;
    /// the pointer stays in `ptr`.
    fn emit_alloc_header(
        &mut self,
        out: &mut Vec<Instruction>,
        ptr: u32,
        alloc: u32,
        size: u32,
        vtable_offset: u32,
        class_index: u32,
    ) {
        out.push(Instruction::Const(Value::I32(size as i32)));
        out.push(Instruction::Call(alloc));
        out.push(Instruction::LocalTee(ptr));
        out.push(Instruction::Const(Value::I32(vtable_offset as i32)));
        out.push(Instruction::store(StorageType::Val(ValueType::I32), VTABLE_POINTER_OFFSET));
        out.push(Instruction::LocalGet(ptr));
        out.push(Instruction::Const(Value::I32(class_index as i32)));
        out.push(Instruction::store(StorageType::Val(ValueType::I32), CLASS_INDEX_OFFSET));
    }

    fn alloc_import(&self) -> Result<u32, CompileError> {
        self.runtime
            .alloc
            .ok_or_else(|| CompileError::emit("allocator import missing in GC mode"))
    }

    fn lower_new_array(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
        element: &FieldDescriptor,
    ) -> anyhow::Result<()> {
        let class_index = self.virtuals.array_type(element)?;
        let vtable_offset = self.layout.vtable_offsets[class_index as usize];
        let storage = element.storage_type(self.config.use_gc);
        if self.config.use_gc {
            let t = self.virtuals.get(class_index);
            let native = t.native_array_type.ok_or_else(|| {
                CompileError::emit(format!("array type {} has no native type", t.name))
            })?;
            let type_index = t.type_index;
            let array_scratch = self.scratch_local(locals, ValueType::EqRef, 17);
            out.push(Instruction::ArrayNew(native));
            out.push(Instruction::LocalSet(array_scratch));
            out.push(Instruction::Const(Value::I32(vtable_offset as i32)));
            out.push(Instruction::Const(Value::I32(class_index as i32)));
            out.push(Instruction::LocalGet(array_scratch));
            out.push(Instruction::StructNew(type_index));
        } else {
            let alloc = self.alloc_import()?;
            let len = self.scratch_local(locals, ValueType::I32, 18);
            let ptr = self.scratch_local(locals, ValueType::I32, 16);
            out.push(Instruction::LocalTee(len));
            out.push(Instruction::Const(Value::I32(storage.byte_size() as i32)));
            out.push(Instruction::Numeric { op: NumOp::Mul, ty: ValueType::I32 });
            out.push(Instruction::Const(Value::I32(ARRAY_DATA_OFFSET as i32)));
            out.push(Instruction::Numeric { op: NumOp::Add, ty: ValueType::I32 });
            out.push(Instruction::Call(alloc));
            out.push(Instruction::LocalTee(ptr));
            out.push(Instruction::Const(Value::I32(vtable_offset as i32)));
            out.push(Instruction::store(StorageType::Val(ValueType::I32), VTABLE_POINTER_OFFSET));
            out.push(Instruction::LocalGet(ptr));
            out.push(Instruction::Const(Value::I32(class_index as i32)));
            out.push(Instruction::store(StorageType::Val(ValueType::I32), CLASS_INDEX_OFFSET));
            out.push(Instruction::LocalGet(ptr));
            out.push(Instruction::LocalGet(len));
            out.push(Instruction::store(StorageType::Val(ValueType::I32), ARRAY_LENGTH_OFFSET));
            out.push(Instruction::LocalGet(ptr));
        }
        Ok(())
    }

    fn lower_array_get(&mut self, out: &mut Vec<Instruction>, kind: ArrayKind) -> anyhow::Result<()> {
        let storage = array_storage(kind, self.config.use_gc);
        if self.config.use_gc {
            return Err(CompileError::unsupported(
                "array element access on an untyped receiver in GC mode",
            )
            .into());
        }
        out.push(Instruction::Const(Value::I32(storage.byte_size() as i32)));
        out.push(Instruction::Numeric { op: NumOp::Mul, ty: ValueType::I32 });
        out.push(Instruction::Numeric { op: NumOp::Add, ty: ValueType::I32 });
        out.push(Instruction::load(storage, ARRAY_DATA_OFFSET, array_signed(kind)));
        Ok(())
    }

    fn lower_array_set(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
        kind: ArrayKind,
    ) -> anyhow::Result<()> {
        let storage = array_storage(kind, self.config.use_gc);
        if self.config.use_gc {
            return Err(CompileError::unsupported(
                "array element access on an untyped receiver in GC mode",
            )
            .into());
        }
        let value = self.scratch_local(locals, storage.unpacked(), 1);
        out.push(Instruction::LocalSet(value));
        out.push(Instruction::Const(Value::I32(storage.byte_size() as i32)));
        out.push(Instruction::Numeric { op: NumOp::Mul, ty: ValueType::I32 });
        out.push(Instruction::Numeric { op: NumOp::Add, ty: ValueType::I32 });
        out.push(Instruction::LocalGet(value));
        out.push(Instruction::store(storage, ARRAY_DATA_OFFSET));
        Ok(())
    }

    fn lower_lambda_alloc(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
        class_name: &Rc<String>,
        captures: &[ValueType],
    ) -> anyhow::Result<()> {
        let class_index = self.virtuals.class_index(class_name)?;
        self.lower_new(out, locals, class_index, Some(captures))
    }

    fn lower_instanceof(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
        target: u32,
    ) -> anyhow::Result<()> {
        if self.config.use_gc {
            return Err(CompileError::unsupported("instanceof in GC mode").into());
        }
        let core = self.ensure_instanceof_core();
        let r = self.scratch_local(locals, ValueType::I32, 2);
        out.push(Instruction::LocalTee(r));
        out.push(Instruction::Numeric { op: NumOp::Eqz, ty: ValueType::I32 });
        out.push(Instruction::If(crate::function::BlockType::Result(ValueType::I32)));
        out.push(Instruction::Const(Value::I32(0)));
        out.push(Instruction::Else);
        out.push(Instruction::LocalGet(r));
        out.push(Instruction::load(StorageType::Val(ValueType::I32), CLASS_INDEX_OFFSET, false));
        out.push(Instruction::Const(Value::I32(target as i32)));
        out.push(Instruction::Call(core));
        out.push(Instruction::End);
        Ok(())
    }

    fn lower_checkcast(
        &mut self,
        out: &mut Vec<Instruction>,
        locals: &mut LocalAllocation,
        target: u32,
    ) -> anyhow::Result<()> {
        if self.config.use_gc {
            return Err(CompileError::unsupported("checkcast in GC mode").into());
        }
        let core = self.ensure_instanceof_core();
        let r = self.scratch_local(locals, ValueType::I32, 2);
        // A null reference passes any cast
        out.push(Instruction::LocalTee(r));
        out.push(Instruction::If(crate::function::BlockType::Empty));
        out.push(Instruction::LocalGet(r));
        out.push(Instruction::load(StorageType::Val(ValueType::I32), CLASS_INDEX_OFFSET, false));
        out.push(Instruction::Const(Value::I32(target as i32)));
        out.push(Instruction::Call(core));
        out.push(Instruction::Numeric { op: NumOp::Eqz, ty: ValueType::I32 });
        out.push(Instruction::If(crate::function::BlockType::Empty));
        out.push(Instruction::Unreachable);
        out.push(Instruction::End);
        out.push(Instruction::End);
        out.push(Instruction::LocalGet(r));
        Ok(())
    }

    /// Registers a synthetic function and queues its body.
    fn add_synthetic(
        &mut self,
        name: &str,
        func_type: &FunctionType,
        locals: Vec<(u32, ValueType)>,
        body: Vec<Instruction>,
    ) -> u32 {
        let synthetic = synthetic_name(&format!("{}#{}", name, self.synthetics.len()), "()V");
        let id = self
            .functions
            .resolve(&synthetic, func_type, FunctionKind::Code)
            .expect("synthetic functions register after the import freeze");
        self.synthetics.push(SyntheticFunction {
            id,
            debug_name: format!("!{}", name),
            locals,
            body,
        });
        id
    }

    fn ensure(&mut self, key: Ensured) -> Option<u32> {
        self.ensured.get(&key).copied()
    }

    fn remember(&mut self, key: Ensured, id: u32) -> u32 {
        self.ensured.insert(key, id);
        id
    }

    /// `[a: i64, b: i64] -> [-1 | 0 | 1]`
    fn ensure_long_cmp(&mut self) -> u32 {
        if let Some(id) = self.ensure(Ensured::LongCmp) {
            return id;
        }
        use Instruction::*;
        use ValueType::*;
        let body = vec![
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::LtS, ty: I64 },
            If(crate::function::BlockType::Result(I32)),
            Const(Value::I32(-1)),
            Else,
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::GtS, ty: I64 },
            End,
        ];
        let func_type = FunctionType { params: vec![I64, I64], results: vec![I32] };
        let id = self.add_synthetic("lcmp", &func_type, vec![], body);
        self.remember(Ensured::LongCmp, id)
    }

    /// `[a, b] -> [-1 | 0 | 1]` with the NaN ordering of the `l`/`g` comparison variants.
    fn ensure_float_cmp(&mut self, ty: ValueType, nan: NaNBehaviour) -> u32 {
        let nan_greater = matches!(nan, NaNBehaviour::Greater);
        let key = match ty {
            ValueType::F32 => Ensured::FloatCmp(nan_greater),
            _ => Ensured::DoubleCmp(nan_greater),
        };
        if let Some(id) = self.ensure(key.clone()) {
            return id;
        }
        use Instruction::*;
        use ValueType::I32;
        let result = crate::function::BlockType::Result(I32);
        let body = vec![
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::LtS, ty },
            If(result),
            Const(Value::I32(-1)),
            Else,
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::GtS, ty },
            If(result),
            Const(Value::I32(1)),
            Else,
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::Eq, ty },
            If(result),
            Const(Value::I32(0)),
            Else,
            // NaN on either side
            Const(Value::I32(if nan_greater { 1 } else { -1 })),
            End,
            End,
            End,
        ];
        let func_type = FunctionType { params: vec![ty, ty], results: vec![I32] };
        let name = match (ty, nan_greater) {
            (ValueType::F32, true) => "fcmpg",
            (ValueType::F32, false) => "fcmpl",
            (_, true) => "dcmpg",
            (_, false) => "dcmpl",
        };
        let id = self.add_synthetic(name, &func_type, vec![], body);
        self.remember(key, id)
    }

    /// `[a, b] -> [a % b]` for floats: `a - trunc(a / b) * b`.
    fn ensure_rem(&mut self, ty: ValueType) -> u32 {
        let key = match ty {
            ValueType::F32 => Ensured::FloatRem,
            _ => Ensured::DoubleRem,
        };
        if let Some(id) = self.ensure(key.clone()) {
            return id;
        }
        use Instruction::*;
        let body = vec![
            LocalGet(0),
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::DivS, ty },
            Numeric { op: NumOp::Trunc, ty },
            LocalGet(1),
            Numeric { op: NumOp::Mul, ty },
            Numeric { op: NumOp::Sub, ty },
        ];
        let func_type = FunctionType { params: vec![ty, ty], results: vec![ty] };
        let name = match ty {
            ValueType::F32 => "frem",
            _ => "drem",
        };
        let id = self.add_synthetic(name, &func_type, vec![], body);
        self.remember(key, id)
    }

    /// `[class_index, target_index] -> [is: i32]`: walks the class's recorded supertype list in
    /// the type table.
    fn ensure_instanceof_core(&mut self) -> u32 {
        if let Some(id) = self.ensure(Ensured::InstanceOfCore) {
            return id;
        }
        use Instruction::*;
        use ValueType::I32;
        let empty = crate::function::BlockType::Empty;
        let result = crate::function::BlockType::Result(I32);
        let type_table = self.layout.type_table_offset;
        // Locals: 0 = class index, 1 = target, 2 = vtable pointer, 3 = supertype count, 4 = i
        let body = vec![
            LocalGet(0),
            LocalGet(1),
            Numeric { op: NumOp::Eq, ty: I32 },
            If(result),
            Const(Value::I32(1)),
            Else,
            Const(Value::I32(type_table as i32)),
            LocalGet(0),
            Const(Value::I32(4)),
            Numeric { op: NumOp::Mul, ty: I32 },
            Numeric { op: NumOp::Add, ty: I32 },
            Instruction::load(StorageType::Val(I32), 0, false),
            LocalSet(2),
            LocalGet(2),
            Instruction::load(StorageType::Val(I32), 8, false),
            LocalSet(3),
            Const(Value::I32(0)),
            LocalSet(4),
            Block(result),
            Loop(empty),
            LocalGet(4),
            LocalGet(3),
            Numeric { op: NumOp::GeS, ty: I32 },
            If(empty),
            Const(Value::I32(0)),
            Br(2),
            End,
            LocalGet(2),
            LocalGet(4),
            Const(Value::I32(4)),
            Numeric { op: NumOp::Mul, ty: I32 },
            Numeric { op: NumOp::Add, ty: I32 },
            Instruction::load(StorageType::Val(I32), 12, false),
            LocalGet(1),
            Numeric { op: NumOp::Eq, ty: I32 },
            If(empty),
            Const(Value::I32(1)),
            Br(2),
            End,
            LocalGet(4),
            Const(Value::I32(1)),
            Numeric { op: NumOp::Add, ty: I32 },
            LocalSet(4),
            Br(0),
            End,
            Unreachable,
            End,
            End,
        ];
        let func_type = FunctionType { params: vec![I32, I32], results: vec![I32] };
        let id = self.add_synthetic("instanceof", &func_type, vec![(3, I32)], body);
        self.remember(Ensured::InstanceOfCore, id)
    }

    /// `[index] -> [string: externref]` with per-string materialization caching in the string
    /// table.
    fn ensure_string_accessor(&mut self) -> anyhow::Result<u32> {
        if let Some(id) = self.ensure(Ensured::StringAccessor) {
            return Ok(id);
        }
        use Instruction::*;
        use ValueType::*;
        let base = self.layout.string_table_offset;
        let body = vec![
            LocalGet(0),
            TableGet(STRING_TABLE),
            RefIsNull,
            If(crate::function::BlockType::Empty),
            LocalGet(0),
            Const(Value::I32(base as i32)),
            LocalGet(0),
            Call(self.runtime.string),
            TableSet(STRING_TABLE),
            End,
            LocalGet(0),
            TableGet(STRING_TABLE),
        ];
        let func_type = FunctionType { params: vec![I32], results: vec![ExternRef] };
        let id = self.add_synthetic("string", &func_type, vec![], body);
        Ok(self.remember(Ensured::StringAccessor, id))
    }

    /// `[class_index] -> [class: externref]` with the same caching through the class table.
    fn ensure_class_accessor(&mut self) -> anyhow::Result<u32> {
        if let Some(id) = self.ensure(Ensured::ClassAccessor) {
            return Ok(id);
        }
        use Instruction::*;
        use ValueType::*;
        let type_table = self.layout.type_table_offset;
        let body = vec![
            LocalGet(0),
            TableGet(CLASS_TABLE),
            RefIsNull,
            If(crate::function::BlockType::Empty),
            LocalGet(0),
            Const(Value::I32(type_table as i32)),
            LocalGet(0),
            Call(self.runtime.class),
            TableSet(CLASS_TABLE),
            End,
            LocalGet(0),
            TableGet(CLASS_TABLE),
        ];
        let func_type = FunctionType { params: vec![I32], results: vec![ExternRef] };
        let id = self.add_synthetic("class", &func_type, vec![], body);
        Ok(self.remember(Ensured::ClassAccessor, id))
    }

    /// Virtual dispatcher for one function type: `(this, args..., slot) -> result`.
    ///
    /// The body performs the dispatch sequence: receiver, vtable pointer, function pointer at
    /// the slot, `call_indirect`. The vmethod block base depends on the receiver's supertype
    /// count, so it is recomputed from the vtable rather than baked into the call site.
    fn ensure_virtual_dispatcher(&mut self, func_type: &FunctionType) -> anyhow::Result<u32> {
        if let Some(id) = self.ensure(Ensured::VirtualDispatcher(func_type.clone())) {
            return Ok(id);
        }
        use Instruction::*;
        use ValueType::I32;
        let call_type = self.type_base + self.functions.type_id(func_type);
        let param_count = func_type.params.len() as u32;
        let vt = param_count + 1; // One extra local holding the vtable pointer

        let mut body: Vec<Instruction> = (0..param_count).map(LocalGet).collect();
        body.extend(self.receiver_vtable_pointer());
        body.extend(vec![
            LocalSet(vt),
            // vmethods start after the three header words and the supertype list
            LocalGet(vt),
            LocalGet(vt),
            Instruction::load(StorageType::Val(I32), 8, false),
            Const(Value::I32(4)),
            Numeric { op: NumOp::Mul, ty: I32 },
            Numeric { op: NumOp::Add, ty: I32 },
            LocalGet(param_count),
            Const(Value::I32(4)),
            Numeric { op: NumOp::Mul, ty: I32 },
            Numeric { op: NumOp::Add, ty: I32 },
            Instruction::load(StorageType::Val(I32), 12, false),
            CallIndirect { type_index: call_type },
        ]);

        let mut dispatcher_type = func_type.clone();
        dispatcher_type.params.push(I32);
        let id = self.add_synthetic("vdispatch", &dispatcher_type, vec![(1, I32)], body);
        Ok(self.remember(Ensured::VirtualDispatcher(func_type.clone()), id))
    }

    /// Interface dispatcher for one function type: `(this, args..., array_base) -> result`,
    /// indexing the class-indexed dispatch array by the receiver's class index.
    fn ensure_interface_dispatcher(&mut self, func_type: &FunctionType) -> anyhow::Result<u32> {
        if let Some(id) = self.ensure(Ensured::InterfaceDispatcher(func_type.clone())) {
            return Ok(id);
        }
        use Instruction::*;
        use ValueType::I32;
        let call_type = self.type_base + self.functions.type_id(func_type);
        let param_count = func_type.params.len() as u32;

        let mut body: Vec<Instruction> = (0..param_count).map(LocalGet).collect();
        body.extend(self.receiver_class_index());
        body.extend(vec![
            Const(Value::I32(4)),
            Numeric { op: NumOp::Mul, ty: I32 },
            LocalGet(param_count),
            Numeric { op: NumOp::Add, ty: I32 },
            Instruction::load(StorageType::Val(I32), 0, false),
            CallIndirect { type_index: call_type },
        ]);

        let mut dispatcher_type = func_type.clone();
        dispatcher_type.params.push(I32);
        let id = self.add_synthetic("idispatch", &dispatcher_type, vec![], body);
        Ok(self.remember(Ensured::InterfaceDispatcher(func_type.clone()), id))
    }

    /// Instructions loading the receiver's vtable pointer from local 0.
    fn receiver_vtable_pointer(&mut self) -> Vec<Instruction> {
        match self.config.use_gc {
            false => vec![
                Instruction::LocalGet(0),
                Instruction::load(StorageType::Val(ValueType::I32), VTABLE_POINTER_OFFSET, false),
            ],
            true => {
                let object = self
                    .virtuals
                    .class_index(JAVA_LANG_OBJECT)
                    .map(|i| self.virtuals.get(i).type_index)
                    .unwrap_or(0);
                vec![
                    Instruction::LocalGet(0),
                    Instruction::RefCast(object),
                    Instruction::StructGet { type_index: object, field: 0, signed: false },
                ]
            }
        }
    }

    /// Instructions loading the receiver's class index from local 0.
    fn receiver_class_index(&mut self) -> Vec<Instruction> {
        match self.config.use_gc {
            false => vec![
                Instruction::LocalGet(0),
                Instruction::load(StorageType::Val(ValueType::I32), CLASS_INDEX_OFFSET, false),
            ],
            true => {
                let object = self
                    .virtuals
                    .class_index(JAVA_LANG_OBJECT)
                    .map(|i| self.virtuals.get(i).type_index)
                    .unwrap_or(0);
                vec![
                    Instruction::LocalGet(0),
                    Instruction::RefCast(object),
                    Instruction::StructGet { type_index: object, field: 1, signed: false },
                ]
            }
        }
    }

    /// `(d0, d1) -> ref`: allocates a two-dimensional array, one inner array per outer slot.
    fn ensure_multi_array(
        &mut self,
        element: &FieldDescriptor,
        _locals: &mut LocalAllocation,
    ) -> anyhow::Result<u32> {
        let key = Ensured::MultiArray(format!("{}", element));
        if let Some(id) = self.ensure(key.clone()) {
            return Ok(id);
        }
        if self.config.use_gc {
            return Err(
                CompileError::unsupported("multianewarray in GC mode").into(),
            );
        }
        // element is the full array descriptor: [[T -> outer element [T -> inner element T
        let outer_component = component_of(element)?;
        let inner_component = component_of(&outer_component)?;
        use Instruction::*;
        use ValueType::I32;
        let empty = crate::function::BlockType::Empty;
        // Helper locals: 0 = d0, 1 = d1 (parameters), then outer/i plus allocation scratches
        let mut helper_locals = LocalAllocation::from_code(
            true,
            I32,
            &[FieldDescriptor::Int, FieldDescriptor::Int],
            false,
            &[],
        );
        let outer = helper_locals.declare_scratch(I32);
        let i = helper_locals.declare_scratch(I32);

        let mut body = vec![LocalGet(0)];
        // The nested allocation sequences allocate their scratches in the helper's local space
        let saved_scratch = std::mem::take(&mut self.scratch);
        self.lower_new_array(&mut body, &mut helper_locals, &outer_component)?;
        body.push(LocalSet(outer));
        body.push(Const(Value::I32(0)));
        body.push(LocalSet(i));
        body.push(Block(empty));
        body.push(Loop(empty));
        body.push(LocalGet(i));
        body.push(LocalGet(0));
        body.push(Numeric { op: NumOp::GeS, ty: I32 });
        body.push(BrIf(1));
        // outer[i] = new inner[d1]
        body.push(LocalGet(outer));
        body.push(LocalGet(i));
        body.push(Const(Value::I32(4)));
        body.push(Numeric { op: NumOp::Mul, ty: I32 });
        body.push(Numeric { op: NumOp::Add, ty: I32 });
        body.push(LocalGet(1));
        self.lower_new_array(&mut body, &mut helper_locals, &inner_component)?;
        body.push(Instruction::store(StorageType::Val(I32), ARRAY_DATA_OFFSET));
        body.push(LocalGet(i));
        body.push(Const(Value::I32(1)));
        body.push(Numeric { op: NumOp::Add, ty: I32 });
        body.push(LocalSet(i));
        body.push(Br(0));
        body.push(End);
        body.push(End);
        body.push(LocalGet(outer));

        let func_type = FunctionType { params: vec![I32, I32], results: vec![I32] };
        let locals_rle = helper_locals.run_length_encode();
        let id = self.add_synthetic("multiarray", &func_type, locals_rle, body);
        self.scratch = saved_scratch;
        Ok(self.remember(key, id))
    }
}

fn component_of(array: &FieldDescriptor) -> Result<FieldDescriptor, CompileError> {
    match array {
        FieldDescriptor::Array(component) => Ok((**component).clone()),
        other => Err(CompileError::decode(format!(
            "expected an array descriptor, found {}",
            other
        ))),
    }
}

fn default_value(ty: StorageType) -> Instruction {
    match ty.unpacked() {
        ValueType::I64 => Instruction::Const(Value::I64(0)),
        ValueType::F32 => Instruction::Const(Value::F32(0.0)),
        ValueType::F64 => Instruction::Const(Value::F64(0.0)),
        ValueType::ExternRef => Instruction::RefNull(ValueType::ExternRef),
        ValueType::EqRef | ValueType::Ref(_) => Instruction::RefNull(ValueType::EqRef),
        _ => Instruction::Const(Value::I32(0)),
    }
}

fn field_signed(descriptor: &FieldDescriptor) -> bool {
    !matches!(descriptor, FieldDescriptor::Char | FieldDescriptor::Boolean)
}

fn array_storage(kind: ArrayKind, use_gc: bool) -> StorageType {
    match kind {
        ArrayKind::Int => StorageType::Val(ValueType::I32),
        ArrayKind::Long => StorageType::Val(ValueType::I64),
        ArrayKind::Float => StorageType::Val(ValueType::F32),
        ArrayKind::Double => StorageType::Val(ValueType::F64),
        ArrayKind::Byte => StorageType::I8,
        ArrayKind::Char | ArrayKind::Short => StorageType::I16,
        ArrayKind::Ref => match use_gc {
            true => StorageType::Val(ValueType::EqRef),
            false => StorageType::Val(ValueType::I32),
        },
    }
}

fn array_signed(kind: ArrayKind) -> bool {
    !matches!(kind, ArrayKind::Char)
}
