use crate::class::descriptors::{FieldDescriptor, MethodDescriptor, StorageType, ValueType};
use crate::class::{FieldRef, FunctionName, JAVA_LANG_OBJECT};
use crate::error::CompileError;
use crate::virtuals::{
    ClassShape, StructField, StructKind, StructTypeDef, VirtualSlot, OBJECT_HEADER_SIZE,
    VTABLE_INSTANCEOF_LIST_SLOT,
};
use itertools::Itertools;
use log::Level;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Location of an instance field in the configured object model.
#[derive(Debug, Clone)]
pub enum FieldLocation {
    /// Linear memory: absolute byte offset from the instance pointer (non-GC mode).
    Memory { ty: StorageType, offset: u32 },
    /// GC struct field index, counting the two header fields (GC mode).
    Struct { class_index: u32, field: u32, ty: StorageType },
}

/// Unified type manager and virtual method table for all reference types in a module.
///
/// Every class, interface, array and synthesized capture struct receives a stable dense class
/// index. Construction assigns virtual method slots so an override occupies the same slot as
/// the super class method it overrides, records the `instanceof` supertype sets, and fixes the
/// field layouts of the configured object model. Array types are registered lazily as the
/// rendering phase discovers them; indices already assigned never change.
pub struct VirtualTable {
    use_gc: bool,
    types: Vec<StructTypeDef>,
    by_name: HashMap<Rc<String>, u32>,
    shapes: HashMap<Rc<String>, ClassShape>,
    /// Non-GC layout: per class, its own field byte offsets and own size, header and super
    /// chain excluded.
    own_layout: HashMap<Rc<String>, (HashMap<Rc<String>, u32>, u32)>,
}

/// Names under which the primitive component types are registered, in class index order
/// directly after the root object.
const PRIMITIVE_NAMES: [&str; 8] = ["Z", "B", "C", "S", "I", "J", "F", "D"];

impl VirtualTable {
    /// Builds the table from the shapes of every loaded class. The root object class and the
    /// primitive component types are always registered first, so their class indices are stable
    /// regardless of input order; the remaining classes follow in lexicographic order.
    pub fn build(mut input: Vec<ClassShape>, use_gc: bool) -> anyhow::Result<Self> {
        if !input.iter().any(|s| s.name.as_str() == JAVA_LANG_OBJECT) {
            input.push(ClassShape {
                name: Rc::new(String::from(JAVA_LANG_OBJECT)),
                super_name: None,
                interfaces: vec![],
                is_interface: false,
                kind: StructKind::Normal,
                fields: vec![],
                methods: vec![],
            });
        }

        let mut table = Self {
            use_gc,
            types: vec![],
            by_name: HashMap::new(),
            shapes: HashMap::new(),
            own_layout: HashMap::new(),
        };
        for shape in &input {
            table.shapes.insert(Rc::clone(&shape.name), shape.clone());
        }

        // Root object first, then the primitives, then everything else alphabetically
        let object = Rc::new(String::from(JAVA_LANG_OBJECT));
        table.register(&object)?;
        for name in PRIMITIVE_NAMES {
            let name = Rc::new(String::from(name));
            let class_index = table.types.len() as u32;
            table.by_name.insert(Rc::clone(&name), class_index);
            table.types.push(StructTypeDef {
                name,
                kind: StructKind::Primitive,
                class_index,
                fields: vec![],
                component: None,
                type_index: 0,
                native_array_type: None,
                instanceof: vec![],
                vtable: vec![],
            });
        }
        let sorted: Vec<Rc<String>> = input
            .iter()
            .map(|s| Rc::clone(&s.name))
            .filter(|n| n.as_str() != JAVA_LANG_OBJECT)
            .sorted()
            .collect();
        for name in sorted {
            table.register(&name)?;
        }
        Ok(table)
    }

    /// Registers a class shape (and, recursively, its supers) returning its class index.
    fn register(&mut self, name: &Rc<String>) -> anyhow::Result<u32> {
        if let Some(&index) = self.by_name.get(name) {
            return Ok(index);
        }
        let shape = self
            .shapes
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::link(format!("class {} not found", name)))?;

        // Register the super chain first so slot inheritance can copy from it
        let super_vtable = match &shape.super_name {
            Some(super_name) => {
                let super_index = self.register(super_name)?;
                self.types[super_index as usize].vtable.clone()
            }
            None => vec![],
        };

        let mut vtable = super_vtable;
        for (method, is_abstract) in &shape.methods {
            let existing = vtable.iter_mut().find(|slot| {
                slot.name == method.name && slot.descriptor == method.descriptor
            });
            match existing {
                // Overrides keep the slot index of the overridden method
                Some(slot) => {
                    slot.implementation = method.clone();
                    slot.is_abstract = *is_abstract;
                }
                None => vtable.push(VirtualSlot {
                    name: Rc::clone(&method.name),
                    descriptor: Rc::clone(&method.descriptor),
                    implementation: method.clone(),
                    is_abstract: *is_abstract,
                }),
            }
        }
        // Interface methods not declared anywhere in the chain still need slots so interface
        // dispatch can resolve on this receiver
        for interface in self.interface_closure(&shape) {
            if let Some(interface_shape) = self.shapes.get(&interface).cloned() {
                for (method, _) in &interface_shape.methods {
                    let exists = vtable.iter().any(|slot| {
                        slot.name == method.name && slot.descriptor == method.descriptor
                    });
                    if !exists {
                        vtable.push(VirtualSlot {
                            name: Rc::clone(&method.name),
                            descriptor: Rc::clone(&method.descriptor),
                            implementation: method.clone(),
                            is_abstract: true,
                        });
                    }
                }
            }
        }

        // instanceof set: transitive supers plus the interface closure
        let mut instanceof = vec![];
        let mut walk = shape.super_name.clone();
        while let Some(super_name) = walk {
            instanceof.push(self.register(&super_name)?);
            walk = self.shapes.get(&super_name).and_then(|s| s.super_name.clone());
        }
        for interface in self.interface_closure(&shape) {
            if self.shapes.contains_key(&interface) {
                instanceof.push(self.register(&interface)?);
            }
        }
        instanceof.sort_unstable();
        instanceof.dedup();

        // Field layout: header, then the super chain root-first, then declared fields
        let mut fields = vec![
            StructField {
                name: Rc::new(String::from("!vtable")),
                ty: StorageType::Val(ValueType::I32),
                mutable: false,
            },
            StructField {
                name: Rc::new(String::from("!class")),
                ty: StorageType::Val(ValueType::I32),
                mutable: false,
            },
        ];
        for link in self.super_chain_root_first(&shape) {
            if let Some(link_shape) = self.shapes.get(&link) {
                for (field_name, descriptor) in &link_shape.fields {
                    fields.push(StructField {
                        name: Rc::clone(field_name),
                        ty: descriptor.storage_type(self.use_gc),
                        mutable: true,
                    });
                }
            }
        }
        for (field_name, descriptor) in &shape.fields {
            fields.push(StructField {
                name: Rc::clone(field_name),
                ty: descriptor.storage_type(self.use_gc),
                mutable: true,
            });
        }

        // Non-GC byte layout of the declared fields only
        let mut own_offsets = HashMap::new();
        let mut own_size = 0;
        for (field_name, descriptor) in &shape.fields {
            own_offsets.insert(Rc::clone(field_name), own_size);
            own_size += descriptor.storage_type(false).byte_size().max(4);
        }
        self.own_layout
            .insert(Rc::clone(&shape.name), (own_offsets, own_size));

        let class_index = self.types.len() as u32;
        self.by_name.insert(Rc::clone(&shape.name), class_index);
        self.types.push(StructTypeDef {
            name: Rc::clone(&shape.name),
            kind: shape.kind,
            class_index,
            fields,
            component: None,
            type_index: 0,
            native_array_type: None,
            instanceof,
            vtable,
        });
        Ok(class_index)
    }

    /// Transitive closure of implemented interfaces: direct interfaces, their super interfaces
    /// and everything inherited through the super chain.
    fn interface_closure(&self, shape: &ClassShape) -> Vec<Rc<String>> {
        let mut seen = HashSet::new();
        let mut queue: Vec<Rc<String>> = shape.interfaces.clone();
        if let Some(super_name) = &shape.super_name {
            if let Some(super_shape) = self.shapes.get(super_name) {
                queue.extend(self.interface_closure(super_shape));
            }
        }
        let mut closure = vec![];
        while let Some(interface) = queue.pop() {
            if !seen.insert(Rc::clone(&interface)) {
                continue;
            }
            if let Some(interface_shape) = self.shapes.get(&interface) {
                queue.extend(interface_shape.interfaces.iter().cloned());
            }
            closure.push(interface);
        }
        closure
    }

    /// Super chain of `shape` from the root down, excluding `shape` itself.
    fn super_chain_root_first(&self, shape: &ClassShape) -> Vec<Rc<String>> {
        let mut chain = vec![];
        let mut walk = shape.super_name.clone();
        while let Some(name) = walk {
            walk = self.shapes.get(&name).and_then(|s| s.super_name.clone());
            chain.push(name);
        }
        chain.reverse();
        chain
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructTypeDef> {
        self.types.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StructTypeDef> {
        self.types.iter_mut()
    }

    pub fn get(&self, class_index: u32) -> &StructTypeDef {
        &self.types[class_index as usize]
    }

    pub fn class_index(&self, name: &str) -> Result<u32, CompileError> {
        self.by_name
            .get(&String::from(name))
            .copied()
            .ok_or_else(|| CompileError::link(format!("class {} not found", name)))
    }

    /// Class index of the array type with the given component, registering it on first use.
    /// Unknown component classes register as opaque external types.
    pub fn array_type(&mut self, component: &FieldDescriptor) -> anyhow::Result<u32> {
        let name = Rc::new(format!("[{}", component));
        if let Some(&index) = self.by_name.get(&name) {
            return Ok(index);
        }
        // The component needs an index for the vtable's array-element field
        if let FieldDescriptor::Object(class_name) = component {
            if self.by_name.get(&String::from(class_name.as_str())).is_none() {
                self.register_opaque(&Rc::new(class_name.clone()));
            }
        }
        let class_index = self.types.len() as u32;
        let object_index = self.class_index(JAVA_LANG_OBJECT)?;
        self.by_name.insert(Rc::clone(&name), class_index);
        self.types.push(StructTypeDef {
            name,
            kind: StructKind::Array,
            class_index,
            fields: vec![StructField {
                name: Rc::new(String::from("!data")),
                ty: component.storage_type(self.use_gc),
                mutable: true,
            }],
            component: Some(component.clone()),
            type_index: 0,
            native_array_type: None,
            instanceof: vec![object_index],
            vtable: vec![],
        });
        Ok(class_index)
    }

    /// Registers a class only referenced from descriptors (never loaded) as an opaque external
    /// type: no fields, no methods, subtype of the root object only.
    fn register_opaque(&mut self, name: &Rc<String>) {
        let object_index = self.by_name.get(&String::from(JAVA_LANG_OBJECT)).copied();
        let class_index = self.types.len() as u32;
        self.by_name.insert(Rc::clone(name), class_index);
        self.types.push(StructTypeDef {
            name: Rc::clone(name),
            kind: StructKind::Normal,
            class_index,
            fields: vec![],
            component: None,
            type_index: 0,
            native_array_type: None,
            instanceof: object_index.into_iter().collect(),
            vtable: vec![],
        });
    }

    /// Virtual slot index of a method on the given receiver class.
    pub fn method_slot(&self, method: &FunctionName) -> Result<u32, CompileError> {
        let class_index = self.class_index(&method.class_name)?;
        let vtable = &self.types[class_index as usize].vtable;
        vtable
            .iter()
            .position(|slot| slot.name == method.name && slot.descriptor == method.descriptor)
            .map(|slot| slot as u32)
            .ok_or_else(|| {
                CompileError::link(format!("no virtual slot for {}", method))
            })
    }

    /// Byte offset of a virtual slot within a class's vtable block.
    pub fn vmethod_byte_offset(&self, class_index: u32, slot: u32) -> u32 {
        let header = VTABLE_INSTANCEOF_LIST_SLOT + self.types[class_index as usize].instanceof.len() as u32;
        (header + slot) * 4
    }

    /// Locates an instance field in the configured object model. The referenced class is the
    /// statically named one; hidden fields resolve against the class that declares them, so the
    /// search walks the super chain from the reference's class.
    pub fn field_location(&self, field: &FieldRef) -> Result<FieldLocation, CompileError> {
        let ty = field.descriptor.storage_type(self.use_gc);
        let mut class_name = Rc::clone(&field.class_name);
        loop {
            if let Some((offsets, _)) = self.own_layout.get(&class_name) {
                if let Some(&own_offset) = offsets.get(&field.name) {
                    return match self.use_gc {
                        false => {
                            // Byte offset: header, then every super above the declaring class
                            let shape = &self.shapes[&class_name];
                            let supers_size: u32 = self
                                .super_chain_root_first(shape)
                                .iter()
                                .filter_map(|s| self.own_layout.get(s))
                                .map(|(_, size)| size)
                                .sum();
                            Ok(FieldLocation::Memory {
                                ty,
                                offset: OBJECT_HEADER_SIZE + supers_size + own_offset,
                            })
                        }
                        true => {
                            let class_index = self.class_index(&field.class_name)?;
                            let declaring = &self.types[self.class_index(&class_name)? as usize];
                            let index = declaring
                                .fields
                                .iter()
                                .position(|f| f.name == field.name)
                                .expect("declared field in layout");
                            Ok(FieldLocation::Struct {
                                class_index,
                                field: index as u32,
                                ty,
                            })
                        }
                    };
                }
            }
            let next = self
                .shapes
                .get(&class_name)
                .and_then(|s| s.super_name.clone());
            match next {
                Some(next) => class_name = next,
                None => {
                    return Err(CompileError::link(format!("field {} not found", field)))
                }
            }
        }
    }

    /// Total instance byte size of a class in the non-GC object model, header included.
    pub fn class_size(&self, name: &str) -> Result<u32, CompileError> {
        let mut size = OBJECT_HEADER_SIZE;
        let mut class_name = Rc::new(String::from(name));
        loop {
            let (_, own) = self
                .own_layout
                .get(&class_name)
                .ok_or_else(|| CompileError::link(format!("class {} not found", class_name)))?;
            size += own;
            match self.shapes.get(&class_name).and_then(|s| s.super_name.clone()) {
                Some(next) => class_name = next,
                None => return Ok(size),
            }
        }
    }

    /// Subtype test: reflexive, everything is a subtype of the root object, arrays are
    /// covariant in their component, and otherwise the recorded supertype set decides.
    pub fn is_subtype(&self, sub: &str, supe: &str) -> bool {
        if sub == supe || supe == JAVA_LANG_OBJECT {
            return true;
        }
        if let (Some(sub_component), Some(super_component)) =
            (sub.strip_prefix('['), supe.strip_prefix('['))
        {
            let sub_name = component_class_name(sub_component);
            let super_name = component_class_name(super_component);
            return match (sub_name, super_name) {
                (Some(a), Some(b)) => self.is_subtype(&a, &b),
                _ => sub_component == super_component,
            };
        }
        let (sub_index, super_index) = match (self.class_index(sub), self.class_index(supe)) {
            (Ok(a), Ok(b)) => (a, b),
            _ => return false,
        };
        self.types[sub_index as usize].instanceof.contains(&super_index)
    }

    /// All `(class index, implementation)` pairs for an interface method, across every class
    /// implementing the interface. Drives the class-indexed interface dispatch arrays.
    pub fn interface_implementations(
        &self,
        interface: &str,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Vec<(u32, FunctionName)> {
        let interface_index = match self.class_index(interface) {
            Ok(index) => index,
            Err(_) => return vec![],
        };
        self.types
            .iter()
            .filter(|t| t.instanceof.contains(&interface_index))
            .filter_map(|t| {
                t.vtable
                    .iter()
                    .find(|slot| {
                        slot.name.as_str() == name && slot.descriptor.as_ref() == descriptor
                    })
                    .filter(|slot| !slot.is_abstract)
                    .map(|slot| (t.class_index, slot.implementation.clone()))
            })
            .collect()
    }

    /// Logs all class indices at debug level.
    pub fn dump(&self) {
        if !log::log_enabled!(Level::Debug) {
            return;
        }
        log::debug!("Class Indices:");
        for t in &self.types {
            log::debug!("{:>4}: {} ({:?})", t.class_index, t.name, t.kind);
        }
    }
}

fn component_class_name(component: &str) -> Option<String> {
    component
        .strip_prefix('L')
        .and_then(|c| c.strip_suffix(';'))
        .map(String::from)
        .or_else(|| match component.len() {
            1 => Some(String::from(component)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Rc<String> {
        Rc::new(String::from(s))
    }

    fn method(class: &str, m: &str, descriptor: &str) -> FunctionName {
        let (_, d) = crate::class::descriptors::method_descriptor_parser(descriptor).unwrap();
        FunctionName {
            class_name: name(class),
            name: name(m),
            descriptor: Rc::new(d),
        }
    }

    fn shapes() -> Vec<ClassShape> {
        vec![
            ClassShape {
                name: name("Animal"),
                super_name: Some(name(JAVA_LANG_OBJECT)),
                interfaces: vec![],
                is_interface: false,
                kind: StructKind::Normal,
                fields: vec![(name("age"), Rc::new(FieldDescriptor::Int))],
                methods: vec![(method("Animal", "speak", "()I"), false)],
            },
            ClassShape {
                name: name("Dog"),
                super_name: Some(name("Animal")),
                interfaces: vec![],
                is_interface: false,
                kind: StructKind::Normal,
                fields: vec![(name("weight"), Rc::new(FieldDescriptor::Long))],
                methods: vec![
                    (method("Dog", "speak", "()I"), false),
                    (method("Dog", "fetch", "()V"), false),
                ],
            },
        ]
    }

    #[test]
    fn override_shares_slot_with_super() {
        let table = VirtualTable::build(shapes(), false).unwrap();
        let super_slot = table.method_slot(&method("Animal", "speak", "()I")).unwrap();
        let sub_slot = table.method_slot(&method("Dog", "speak", "()I")).unwrap();
        assert_eq!(super_slot, sub_slot);
        // New methods get fresh slots after the inherited ones
        let fetch = table.method_slot(&method("Dog", "fetch", "()V")).unwrap();
        assert!(fetch > sub_slot);
    }

    #[test]
    fn field_offsets_follow_super_chain() {
        let table = VirtualTable::build(shapes(), false).unwrap();
        let age = FieldRef {
            class_name: name("Dog"),
            name: name("age"),
            descriptor: Rc::new(FieldDescriptor::Int),
        };
        // age declared in Animal: header only above it
        match table.field_location(&age).unwrap() {
            FieldLocation::Memory { offset, .. } => assert_eq!(offset, OBJECT_HEADER_SIZE),
            _ => panic!("expected memory layout"),
        }
        let weight = FieldRef {
            class_name: name("Dog"),
            name: name("weight"),
            descriptor: Rc::new(FieldDescriptor::Long),
        };
        // weight sits after Animal's int
        match table.field_location(&weight).unwrap() {
            FieldLocation::Memory { offset, .. } => assert_eq!(offset, OBJECT_HEADER_SIZE + 4),
            _ => panic!("expected memory layout"),
        }
        assert_eq!(table.class_size("Dog").unwrap(), 8 + 4 + 8);
    }

    #[test]
    fn subtype_covers_supers_arrays_and_object() {
        let mut table = VirtualTable::build(shapes(), false).unwrap();
        assert!(table.is_subtype("Dog", "Animal"));
        assert!(table.is_subtype("Dog", JAVA_LANG_OBJECT));
        assert!(!table.is_subtype("Animal", "Dog"));
        // Primitive subtyping is reflexive only
        assert!(table.is_subtype("I", "I"));
        assert!(!table.is_subtype("I", "J"));
        // Array covariance follows the component
        table.array_type(&FieldDescriptor::Object(String::from("Dog"))).unwrap();
        table.array_type(&FieldDescriptor::Object(String::from("Animal"))).unwrap();
        assert!(table.is_subtype("[LDog;", "[LAnimal;"));
        assert!(!table.is_subtype("[LAnimal;", "[LDog;"));
        assert!(!table.is_subtype("[I", "[J"));
    }

    #[test]
    fn class_indices_are_deterministic() {
        let table = VirtualTable::build(shapes(), false).unwrap();
        assert_eq!(table.class_index(JAVA_LANG_OBJECT).unwrap(), 0);
        // Primitives right after the root, classes alphabetic after that
        assert_eq!(table.class_index("I").unwrap(), 5);
        let animal = table.class_index("Animal").unwrap();
        let dog = table.class_index("Dog").unwrap();
        assert!(animal < dog);
    }
}
