use crate::class::descriptors::{FunctionType, ValueType};
use crate::class::{FieldRef, FunctionName};
use crate::error::CompileError;
use crate::function::Value;
use log::Level;
use std::collections::HashMap;
use std::rc::Rc;

/// What a registered function is backed by.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionKind {
    /// Host import; the optional JavaScript body feeds the glue sink.
    Imported { module: String, name: String, js: Option<String> },
    /// Ordinary function with a compiled or synthesized body.
    Code,
    /// Abstract method: rendered as an `unreachable` body so it can still sit in dispatch
    /// tables with the right type.
    Abstract,
    /// The synthetic start function running class initializers.
    Start,
}

#[derive(Debug)]
pub struct FunctionEntry {
    pub id: u32,
    pub name: FunctionName,
    pub type_id: u32,
    pub kind: FunctionKind,
    pub export: Option<String>,
}

/// Registry of every function the module will contain.
///
/// Entries are created lazily on first reference and keep their dense id (allocation order)
/// forever; ids double as final WebAssembly function indices, which is why all imports must be
/// registered during the prepare pass, before the first code id is handed out. Function types
/// are deduplicated by parameter/result tuple into their own table.
pub struct FunctionManager {
    entries: Vec<FunctionEntry>,
    by_name: HashMap<FunctionName, u32>,
    types: Vec<FunctionType>,
    type_ids: HashMap<FunctionType, u32>,
    imports_frozen: bool,
}

impl FunctionManager {
    pub fn new() -> Self {
        Self {
            entries: vec![],
            by_name: HashMap::new(),
            types: vec![],
            type_ids: HashMap::new(),
            imports_frozen: false,
        }
    }

    /// Returns the deduplicated id of a function type.
    pub fn type_id(&mut self, func_type: &FunctionType) -> u32 {
        if let Some(&id) = self.type_ids.get(func_type) {
            return id;
        }
        let id = self.types.len() as u32;
        self.types.push(func_type.clone());
        self.type_ids.insert(func_type.clone(), id);
        id
    }

    pub fn function_types(&self) -> &[FunctionType] {
        &self.types
    }

    pub fn function_type_of(&self, entry: &FunctionEntry) -> &FunctionType {
        &self.types[entry.type_id as usize]
    }

    /// Registers (or finds) a function, returning its dense id. The kind is only stored on
    /// first registration; imports after the import space froze are a link error.
    pub fn resolve(
        &mut self,
        name: &FunctionName,
        func_type: &FunctionType,
        kind: FunctionKind,
    ) -> Result<u32, CompileError> {
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }
        if matches!(kind, FunctionKind::Imported { .. }) && self.imports_frozen {
            return Err(CompileError::link(format!(
                "import {} discovered after the import section was frozen",
                name
            )));
        }
        let type_id = self.type_id(func_type);
        let id = self.entries.len() as u32;
        self.entries.push(FunctionEntry {
            id,
            name: name.clone(),
            type_id,
            kind,
            export: None,
        });
        self.by_name.insert(name.clone(), id);
        Ok(id)
    }

    /// Marks the end of the prepare pass: all imports are in, code ids may now be assigned.
    /// Verifies the invariant that imports precede every other function.
    pub fn freeze_imports(&mut self) -> Result<(), CompileError> {
        self.imports_frozen = true;
        let first_code = self
            .entries
            .iter()
            .position(|e| !matches!(e.kind, FunctionKind::Imported { .. }));
        if let Some(first_code) = first_code {
            if self.entries[first_code..]
                .iter()
                .any(|e| matches!(e.kind, FunctionKind::Imported { .. }))
            {
                return Err(CompileError::emit("imports interleaved with code functions"));
            }
        }
        Ok(())
    }

    pub fn import_count(&self) -> u32 {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, FunctionKind::Imported { .. }))
            .count() as u32
    }

    pub fn id_of(&self, name: &FunctionName) -> Result<u32, CompileError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::link(format!("function {} not registered", name)))
    }

    pub fn contains(&self, name: &FunctionName) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn get(&self, id: u32) -> &FunctionEntry {
        &self.entries[id as usize]
    }

    pub fn set_export(&mut self, id: u32, export_name: String) {
        self.entries[id as usize].export = Some(export_name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iteration by index up to the current length, safe while new entries are appended.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.entries.iter()
    }

    /// Logs all function ids at debug level.
    pub fn dump(&self) {
        if !log::log_enabled!(Level::Debug) {
            return;
        }
        log::debug!("Function Identifiers:");
        for entry in &self.entries {
            log::debug!("{:>4}: {}", entry.id, entry.name);
        }
    }
}

/// Static fields become module globals, keyed by their member reference.
pub struct GlobalManager {
    globals: Vec<(FieldRef, ValueType)>,
    by_field: HashMap<String, u32>,
}

impl GlobalManager {
    pub fn new() -> Self {
        Self { globals: vec![], by_field: HashMap::new() }
    }

    /// Returns the global index of a static field, allocating one on first reference.
    pub fn resolve(&mut self, field: &FieldRef, ty: ValueType) -> u32 {
        let key = field.to_string();
        if let Some(&index) = self.by_field.get(&key) {
            return index;
        }
        let index = self.globals.len() as u32;
        self.globals.push((field.clone(), ty));
        self.by_field.insert(key, index);
        index
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(FieldRef, ValueType)> {
        self.globals.iter()
    }

    /// Zero initializer for a global of the given type.
    pub fn zero_value(ty: ValueType) -> Value {
        match ty {
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            _ => Value::I32(0),
        }
    }
}

/// Synthetic function names live in a reserved pseudo-class so they can never collide with user
/// methods.
pub fn synthetic_name(name: &str, descriptor: &str) -> FunctionName {
    let (_, parsed) = crate::class::descriptors::method_descriptor_parser(descriptor)
        .expect("synthetic descriptor is valid");
    FunctionName {
        class_name: Rc::new(String::from("!runtime")),
        name: Rc::new(String::from(name)),
        descriptor: Rc::new(parsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func_type(params: Vec<ValueType>, results: Vec<ValueType>) -> FunctionType {
        FunctionType { params, results }
    }

    #[test]
    fn function_types_are_deduplicated() {
        let mut manager = FunctionManager::new();
        let t1 = manager.type_id(&func_type(vec![ValueType::I32], vec![ValueType::I32]));
        let t2 = manager.type_id(&func_type(vec![ValueType::I32], vec![ValueType::I32]));
        let t3 = manager.type_id(&func_type(vec![], vec![]));
        assert_eq!(t1, t2);
        assert_ne!(t1, t3);
    }

    #[test]
    fn ids_follow_allocation_order() {
        let mut manager = FunctionManager::new();
        let ft = func_type(vec![], vec![]);
        let a = manager
            .resolve(&synthetic_name("a", "()V"), &ft, FunctionKind::Code)
            .unwrap();
        let b = manager
            .resolve(&synthetic_name("b", "()V"), &ft, FunctionKind::Code)
            .unwrap();
        // Resolving again returns the existing id
        let a_again = manager
            .resolve(&synthetic_name("a", "()V"), &ft, FunctionKind::Abstract)
            .unwrap();
        assert_eq!((a, b, a_again), (0, 1, 0));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn late_imports_are_rejected() {
        let mut manager = FunctionManager::new();
        let ft = func_type(vec![], vec![]);
        manager.freeze_imports().unwrap();
        let err = manager
            .resolve(
                &synthetic_name("f", "()V"),
                &ft,
                FunctionKind::Imported {
                    module: String::from("m"),
                    name: String::from("f"),
                    js: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Link);
    }
}
