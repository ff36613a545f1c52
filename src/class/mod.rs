mod annotations;
mod attributes;
mod bytecode;
mod constants;
pub mod descriptors;
mod parser;
mod reader;

pub use self::annotations::*;
pub use self::attributes::*;
pub use self::bytecode::*;
pub use self::constants::*;
pub use self::parser::*;
pub use self::reader::*;

use crate::class::descriptors::{FieldDescriptor, MethodDescriptor};
use itertools::Itertools;
use log::Level;
use std::cell::RefCell;
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

bitflags::bitflags! {
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags::bitflags! {
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags::bitflags! {
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

/// Globally unique handle for a function within a module: the (class, method, descriptor) triple.
/// The derived full signature string is its [`fmt::Display`] form and the primary key passed
/// between components.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FunctionName {
    pub class_name: Rc<String>,
    pub name: Rc<String>,
    pub descriptor: Rc<MethodDescriptor>,
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

impl fmt::Debug for FunctionName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionName {{ {} }}", self)
    }
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct FieldRef {
    pub class_name: Rc<String>,
    pub name: Rc<String>,
    pub descriptor: Rc<FieldDescriptor>,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FieldRef {{ {} }}", self)
    }
}

/// A declared class field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: Rc<String>,
    pub descriptor: Rc<FieldDescriptor>,
    pub flags: FieldAccessFlags,
    pub annotations: Vec<Annotation>,
}

/// A parsed class method. Code is decoded lazily from the retained `Code` attribute blob the
/// first time it is taken for translation.
#[derive(Debug)]
pub struct Function {
    pub name: FunctionName,
    pub flags: MethodAccessFlags,
    pub const_pool: Rc<ConstantPool>,
    pub attributes: Attributes,
    pub annotations: Vec<Annotation>,
}

impl Function {
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodAccessFlags::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodAccessFlags::NATIVE)
    }

    /// A `lambda$...` method carrying the synthetic flag is an `invokedynamic` lambda body.
    pub fn is_lambda_body(&self) -> bool {
        self.flags.contains(MethodAccessFlags::SYNTHETIC) && self.name.name.starts_with("lambda$")
    }

    /// Decodes and returns this method's code. `native` and `abstract` methods have none.
    pub fn code(&self) -> anyhow::Result<Option<Code>> {
        if self.is_native() || self.is_abstract() {
            return Ok(None);
        }
        self.attributes.code(&self.const_pool).map(Some)
    }

    /// The `throws` clause, decoded on first access.
    pub fn exceptions(&self) -> anyhow::Result<Vec<Rc<String>>> {
        self.attributes.exceptions(&self.const_pool)
    }
}

/// A parsed class file: the unit the decoder hands to the orchestrator.
///
/// Classes form a DAG through super/interface edges. All inter-class references are names (and
/// later dense class indices), never owning handles, so cycles between class references cannot
/// leak.
#[derive(Debug)]
pub struct Class {
    pub class_name: Rc<String>,
    /// `None` only for `java/lang/Object`.
    pub super_class_name: Option<Rc<String>>,
    pub interfaces: Vec<Rc<String>>,
    pub flags: ClassAccessFlags,
    pub const_pool: Rc<ConstantPool>,
    pub fields: Vec<Field>,
    pub methods: Vec<Rc<Function>>,
    pub attributes: Attributes,
    /// Class-level annotations, decoded at parse time as `@Partial` merging needs them early.
    pub annotations: Vec<Annotation>,
    /// Lazily decoded `BootstrapMethods` attribute.
    bootstrap_methods: RefCell<Option<Rc<Vec<BootstrapMethod>>>>,
}

impl Class {
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// The `SourceFile` attribute, decoded on first access.
    pub fn source_file(&self) -> anyhow::Result<Option<Rc<String>>> {
        self.attributes.source_file(&self.const_pool)
    }

    /// The generic `Signature` attribute, decoded on first access.
    pub fn signature(&self) -> anyhow::Result<Option<Rc<String>>> {
        self.attributes.signature(&self.const_pool)
    }

    /// The `BootstrapMethods` attribute, decoded once on first access.
    pub fn bootstrap_methods(&self) -> anyhow::Result<Rc<Vec<BootstrapMethod>>> {
        if let Some(existing) = self.bootstrap_methods.borrow().as_ref() {
            return Ok(Rc::clone(existing));
        }
        let decoded = Rc::new(self.attributes.bootstrap_methods(&self.const_pool)?);
        *self.bootstrap_methods.borrow_mut() = Some(Rc::clone(&decoded));
        Ok(decoded)
    }

    pub(super) fn new_with_attributes(
        class_name: Rc<String>,
        super_class_name: Option<Rc<String>>,
        interfaces: Vec<Rc<String>>,
        flags: ClassAccessFlags,
        const_pool: Rc<ConstantPool>,
        fields: Vec<Field>,
        methods: Vec<Rc<Function>>,
        attributes: Attributes,
        annotations: Vec<Annotation>,
    ) -> Self {
        Self {
            class_name,
            super_class_name,
            interfaces,
            flags,
            const_pool,
            fields,
            methods,
            attributes,
            annotations,
            bootstrap_methods: RefCell::new(None),
        }
    }

    /// Logs this class at debug/trace level.
    pub fn dump(&self) {
        if !log::log_enabled!(Level::Debug) {
            return;
        }
        log::debug!(
            "Class: {} (extends {})",
            self.class_name,
            self.super_class_name.as_deref().map(|s| s.as_str()).unwrap_or("-")
        );
        log::trace!("  Constant Pool:");
        for (i, constant) in self.const_pool.iter().iter().enumerate().skip(1) {
            log::trace!("{:>6}: {:?}", i, constant);
        }
        if !self.fields.is_empty() {
            log::trace!("  Fields:");
            for field in self.fields.iter().sorted_by_key(|f| Rc::clone(&f.name)) {
                log::trace!("    {} {}", field.descriptor, field.name);
            }
        }
        for function in &self.methods {
            log::debug!(
                "  Method: ({:?}) {}{}",
                function.flags,
                function.name.name,
                function.name.descriptor,
            );
        }
    }
}
