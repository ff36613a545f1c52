use crate::class::descriptors::MethodDescriptor;
use crate::error::CompileError;
use crate::output::binary::write_uleb128;
use crate::output::functions::FunctionManager;
use crate::virtuals::VirtualTable;
use std::collections::HashMap;
use std::rc::Rc;

/// Table slot value for a virtual method that was never reached: calling through it makes
/// `call_indirect` trap on an out-of-bounds table index.
const UNREACHABLE_SLOT: u32 = u32::MAX;

/// Pool of string literals, deduplicated by content.
///
/// Entries receive dense indices in first-interned order and are serialized into the data
/// section prefixed by their ULEB128 byte length. A parallel run-time table of external
/// references with one slot per entry backs the per-string materialization cache. The pool
/// grows monotonically during translation and is frozen before data emission.
pub struct StringPool {
    strings: Vec<Rc<String>>,
    by_value: HashMap<Rc<String>, u32>,
    frozen: bool,
}

impl StringPool {
    pub fn new() -> Self {
        Self { strings: vec![], by_value: HashMap::new(), frozen: false }
    }

    pub fn intern(&mut self, value: &Rc<String>) -> Result<u32, CompileError> {
        if let Some(&index) = self.by_value.get(value) {
            return Ok(index);
        }
        if self.frozen {
            return Err(CompileError::emit(format!(
                "string {:?} interned after the pool was frozen",
                value
            )));
        }
        let index = self.strings.len() as u32;
        self.strings.push(Rc::clone(value));
        self.by_value.insert(Rc::clone(value), index);
        Ok(index)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<String>> {
        self.strings.iter()
    }
}

/// A class-indexed interface dispatch array: one slot per class index holding the function
/// table index implementing the interface method on that class.
#[derive(Debug, Clone)]
pub struct DispatchArraySpec {
    pub interface: Rc<String>,
    pub method_name: Rc<String>,
    pub descriptor: Rc<MethodDescriptor>,
}

impl DispatchArraySpec {
    pub fn key(&self) -> String {
        format!("{}.{}{}", self.interface, self.method_name, self.descriptor)
    }
}

/// Where each region of the serialized metadata stream landed in linear memory.
#[derive(Debug)]
pub struct DataLayout {
    /// Absolute offset of each class's vtable, indexed by class index.
    pub vtable_offsets: Vec<u32>,
    /// Absolute offset of the type table (array of vtable offsets indexed by class index).
    pub type_table_offset: u32,
    /// Absolute offset of the string table region.
    pub string_table_offset: u32,
    /// Absolute offset of each string's length prefix, by string index.
    pub string_offsets: Vec<u32>,
    /// Absolute offset of each interface dispatch array, by spec key.
    pub dispatch_arrays: HashMap<String, u32>,
    /// First free byte after the stream.
    pub end: u32,
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Serializes the vtables of every registered type, the type table, the string table and the
/// interface dispatch arrays into a single byte stream placed at `base`.
///
/// Per-class vtable layout, in order: `[type-name-offset, array-element-class-index,
/// instanceof-count, instanceof-class-ids..., vmethod-table-indices...]`, all fields 4-byte
/// little-endian. The type table is an array of vtable offsets indexed by class index; the
/// string table holds ULEB128-length-prefixed UTF-8 bytes in index order.
pub fn serialize_tables(
    base: u32,
    virtuals: &VirtualTable,
    strings: &mut StringPool,
    functions: &FunctionManager,
    dispatch_specs: &[DispatchArraySpec],
) -> anyhow::Result<(Vec<u8>, DataLayout)> {
    // Type names land in the string table, so intern them all before freezing
    let type_names: Vec<Rc<String>> = virtuals.iter().map(|t| Rc::clone(&t.name)).collect();
    let mut name_indices = Vec::with_capacity(type_names.len());
    for name in &type_names {
        name_indices.push(strings.intern(name)?);
    }
    strings.freeze();

    // Region sizes are independent of the string contents, so lay regions out first
    let class_count = virtuals.len() as u32;
    let mut vtable_offsets = Vec::with_capacity(class_count as usize);
    let mut cursor = base;
    for t in virtuals.iter() {
        vtable_offsets.push(cursor);
        cursor += (3 + t.instanceof.len() + t.vtable.len()) as u32 * 4;
    }
    let type_table_offset = cursor;
    cursor += class_count * 4;
    let string_table_offset = cursor;
    let mut string_offsets = Vec::with_capacity(strings.len());
    for s in strings.iter() {
        string_offsets.push(cursor);
        let mut prefix = vec![];
        write_uleb128(&mut prefix, s.as_bytes().len() as u64);
        cursor += (prefix.len() + s.as_bytes().len()) as u32;
    }
    let mut dispatch_arrays = HashMap::new();
    for spec in dispatch_specs {
        dispatch_arrays.insert(spec.key(), cursor);
        cursor += class_count * 4;
    }
    let end = cursor;

    // Now fill the stream
    let mut out = Vec::with_capacity((end - base) as usize);
    for (t, &name_index) in virtuals.iter().zip(&name_indices) {
        push_u32(&mut out, string_offsets[name_index as usize]);
        let element_index = match &t.component {
            Some(component) => virtuals
                .class_index(&component_class_key(component))
                .unwrap_or(UNREACHABLE_SLOT),
            None => UNREACHABLE_SLOT,
        };
        push_u32(&mut out, element_index);
        push_u32(&mut out, t.instanceof.len() as u32);
        for &id in &t.instanceof {
            push_u32(&mut out, id);
        }
        for slot in &t.vtable {
            let table_index = match slot.is_abstract {
                true => UNREACHABLE_SLOT,
                false => functions
                    .id_of(&slot.implementation)
                    .unwrap_or(UNREACHABLE_SLOT),
            };
            push_u32(&mut out, table_index);
        }
    }
    for &offset in &vtable_offsets {
        push_u32(&mut out, offset);
    }
    for s in strings.iter() {
        write_uleb128(&mut out, s.as_bytes().len() as u64);
        out.extend_from_slice(s.as_bytes());
    }
    for spec in dispatch_specs {
        let implementations =
            virtuals.interface_implementations(&spec.interface, &spec.method_name, &spec.descriptor);
        let mut slots = vec![UNREACHABLE_SLOT; class_count as usize];
        for (class_index, implementation) in implementations {
            if let Ok(id) = functions.id_of(&implementation) {
                slots[class_index as usize] = id;
            }
        }
        for slot in slots {
            push_u32(&mut out, slot);
        }
    }

    debug_assert_eq!(out.len() as u32, end - base);
    Ok((
        out,
        DataLayout {
            vtable_offsets,
            type_table_offset,
            string_table_offset,
            string_offsets,
            dispatch_arrays,
            end,
        },
    ))
}

fn component_class_key(component: &crate::class::descriptors::FieldDescriptor) -> String {
    use crate::class::descriptors::FieldDescriptor;
    match component {
        FieldDescriptor::Object(name) => name.clone(),
        other => format!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_deduplicated_and_ordered() {
        let mut pool = StringPool::new();
        let hello = Rc::new(String::from("hello"));
        let world = Rc::new(String::from("world"));
        assert_eq!(pool.intern(&hello).unwrap(), 0);
        assert_eq!(pool.intern(&world).unwrap(), 1);
        assert_eq!(pool.intern(&hello).unwrap(), 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn frozen_pool_rejects_new_strings() {
        let mut pool = StringPool::new();
        let known = Rc::new(String::from("known"));
        pool.intern(&known).unwrap();
        pool.freeze();
        assert!(pool.intern(&known).is_ok());
        assert!(pool.intern(&Rc::new(String::from("new"))).is_err());
    }
}
