use crate::class::descriptors::{FieldDescriptor, StorageType, ValueType};
use crate::class::FunctionName;
use std::rc::Rc;

/// Byte size of the object header in the non-GC object model: a vtable pointer followed by the
/// class index.
pub const OBJECT_HEADER_SIZE: u32 = 8;
/// Offset of the vtable pointer within every instance.
pub const VTABLE_POINTER_OFFSET: u32 = 0;
/// Offset of the class index within every instance.
pub const CLASS_INDEX_OFFSET: u32 = 4;
/// Offset of the length field within array instances.
pub const ARRAY_LENGTH_OFFSET: u32 = 8;
/// Offset of the first element within array instances.
pub const ARRAY_DATA_OFFSET: u32 = 12;

/// Slot positions (in 4-byte units) of the fixed vtable header fields, in layout order:
/// `[name-offset, array-element-class-index, instanceof-count, instanceof-ids..., vmethods...]`.
pub const VTABLE_NAME_SLOT: u32 = 0;
pub const VTABLE_ARRAY_ELEMENT_SLOT: u32 = 1;
pub const VTABLE_INSTANCEOF_COUNT_SLOT: u32 = 2;
pub const VTABLE_INSTANCEOF_LIST_SLOT: u32 = 3;

/// Kind marker of a registered struct type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StructKind {
    Normal,
    Array,
    ArrayNative,
    Primitive,
    Lambda,
}

/// One field of a registered struct type.
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: Rc<String>,
    pub ty: StorageType,
    pub mutable: bool,
}

/// A reference type registered with the type manager: a class, interface, array or synthesized
/// lambda capture struct.
///
/// Every type gets a stable dense class index used by virtual dispatch and `instanceof` tables.
/// Concrete classes also carry their full field layout: the vtable pointer first, the class
/// index second, then declared instance fields inherited from the super chain in order.
#[derive(Debug)]
pub struct StructTypeDef {
    pub name: Rc<String>,
    pub kind: StructKind,
    pub class_index: u32,
    /// Full layout including header fields and the whole super chain.
    pub fields: Vec<StructField>,
    /// Array component descriptor, for `kind == Array`.
    pub component: Option<FieldDescriptor>,
    /// Type section index in GC mode; assigned when the module image is laid out.
    pub type_index: u32,
    /// Type section index of the embedded native array, for `kind == Array` in GC mode.
    pub native_array_type: Option<u32>,
    /// Class indices of every supertype (classes and interfaces) accepted by `instanceof`,
    /// excluding the type itself.
    pub instanceof: Vec<u32>,
    /// Virtual method slots in vtable order: the method signature together with the class
    /// providing the implementation to call.
    pub vtable: Vec<VirtualSlot>,
}

/// One virtual method slot: an overriding method occupies the same slot index as the nearest
/// super class slot it overrides.
#[derive(Debug, Clone)]
pub struct VirtualSlot {
    /// Name and descriptor identifying the slot.
    pub name: Rc<String>,
    pub descriptor: Rc<crate::class::descriptors::MethodDescriptor>,
    /// The implementation dispatched to when the receiver is exactly this class.
    pub implementation: FunctionName,
    /// Abstract slots have no body; calling through them traps.
    pub is_abstract: bool,
}

/// Extracted view of a class for layout purposes, the input to [`super::VirtualTable::build`].
/// The orchestrator derives one per parsed class; `invokedynamic` lambda synthesis contributes
/// additional shapes for capture structs.
#[derive(Debug, Clone)]
pub struct ClassShape {
    pub name: Rc<String>,
    pub super_name: Option<Rc<String>>,
    pub interfaces: Vec<Rc<String>>,
    pub is_interface: bool,
    pub kind: StructKind,
    /// Declared instance fields in declaration order.
    pub fields: Vec<(Rc<String>, Rc<FieldDescriptor>)>,
    /// Virtual dispatch candidates: non-static, non-constructor, non-private methods.
    pub methods: Vec<(FunctionName, bool)>,
}

/// Storage type of a field in the configured object model.
pub fn field_storage(descriptor: &FieldDescriptor, use_gc: bool) -> StorageType {
    descriptor.storage_type(use_gc)
}

/// Whether a value type occupies 8 bytes in linear memory.
pub fn value_byte_size(ty: ValueType) -> u32 {
    match ty {
        ValueType::I64 | ValueType::F64 => 8,
        _ => 4,
    }
}
