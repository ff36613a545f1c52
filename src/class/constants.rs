use crate::class::descriptors::{
    field_descriptor_parser, method_descriptor_parser, FieldDescriptor, MethodDescriptor,
};
use crate::class::reader::ClassReader;
use crate::class::{FieldRef, FunctionName};
use crate::error::CompileError;
use std::cell::{Ref, RefCell};
use std::rc::Rc;

// Shared base class for all Java classes
pub const JAVA_LANG_OBJECT: &str = "java/lang/Object";

// Constant pool tags, chapter 4.4 of the JVM specification
const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELD_REF: u8 = 9;
const TAG_METHOD_REF: u8 = 10;
const TAG_INTERFACE_METHOD_REF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum NumericConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

/// Reference kind of a method handle constant, chapter 5.4.3.5 of the JVM specification.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }
}

/// A method handle resolved through its referenced member.
#[derive(Debug, Clone)]
pub struct MethodHandle {
    pub kind: HandleKind,
    pub member: FunctionName,
}

/// An `invokedynamic` call site reference: the bootstrap method plus the dynamic
/// name and descriptor.
#[derive(Debug, Clone)]
pub struct InvokeDynamicRef {
    pub bootstrap_index: u16,
    pub name: Rc<String>,
    pub descriptor: Rc<String>,
}

/// Raw constant as read in the first pass, before cross references are resolved.
#[derive(Debug, Clone)]
enum RawConstant {
    Utf8(Rc<String>),
    Number(NumericConstant),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16, interface: bool },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { kind: HandleKind, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    InvokeDynamic { bootstrap_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

/// Fully resolved constant. Member descriptors start life as strings and are upgraded in place
/// the first time a typed accessor needs them (lazy parsing).
#[derive(Debug, Clone)]
pub enum Constant {
    Utf8(Rc<String>),
    Number(NumericConstant),
    /// Class reference, resolved to the referenced class name.
    Class(Rc<String>),
    /// String literal, resolved to its UTF-8 payload.
    StringLiteral(Rc<String>),
    NameAndType { name: Rc<String>, descriptor: Rc<String> },
    Field { member: (Rc<String>, Rc<String>, Rc<String>), parsed: Option<FieldRef> },
    Method {
        member: (Rc<String>, Rc<String>, Rc<String>),
        interface: bool,
        parsed: Option<FunctionName>,
    },
    MethodHandle { kind: HandleKind, reference_index: u16 },
    MethodType(Rc<String>),
    InvokeDynamic(InvokeDynamicRef),
    Module(Rc<String>),
    Package(Rc<String>),
    /// Index 0 and the slot following each long/double constant.
    Reserved,
    /// Parsed field descriptor, upgraded from [`Constant::Utf8`] on first typed access.
    FieldDescriptor(Rc<FieldDescriptor>),
    /// Parsed method descriptor, upgraded from [`Constant::Utf8`] on first typed access.
    MethodDescriptor(Rc<MethodDescriptor>),
}

/// The class file constant pool after reference resolution.
///
/// Indexes run 1..count; index 0 and the slot after each 8-byte constant hold
/// [`Constant::Reserved`] sentinels. All cross references are resolved by a fixed-point pass at
/// construction, so accessors only fail on malformed indexes or tag mismatches, both of which
/// surface as decode errors rather than panics: the pool contents come straight from user input.
#[derive(Debug)]
pub struct ConstantPool {
    // RefCell for interior mutability: descriptors are parsed lazily, once, when first needed
    inner: RefCell<Vec<Constant>>,
}

fn bad_index(index: u16, expected: &str) -> CompileError {
    CompileError::decode(format!(
        "constant pool index {} is not a {}",
        index, expected
    ))
}

impl ConstantPool {
    /// Reads `count - 1` constants from the class stream and resolves their cross references.
    pub fn parse(r: &mut ClassReader<'_>) -> Result<Self, CompileError> {
        let count = r.u16("constant pool count")? as usize;
        let mut raw: Vec<Option<RawConstant>> = vec![None; count.max(1)];

        // First pass: raw tag and payload per slot, longs and doubles consume two indices
        let mut i = 1;
        while i < count {
            let tag = r.u8("constant tag")?;
            let mut wide = false;
            raw[i] = Some(match tag {
                TAG_UTF8 => RawConstant::Utf8(Rc::new(r.utf8("utf8 constant")?)),
                TAG_INTEGER => {
                    RawConstant::Number(NumericConstant::Integer(r.u32("integer constant")? as i32))
                }
                TAG_FLOAT => RawConstant::Number(NumericConstant::Float(f32::from_bits(
                    r.u32("float constant")?,
                ))),
                TAG_LONG => {
                    wide = true;
                    RawConstant::Number(NumericConstant::Long(r.u64("long constant")? as i64))
                }
                TAG_DOUBLE => {
                    wide = true;
                    RawConstant::Number(NumericConstant::Double(f64::from_bits(
                        r.u64("double constant")?,
                    )))
                }
                TAG_CLASS => RawConstant::Class { name_index: r.u16("class name index")? },
                TAG_STRING => RawConstant::String { string_index: r.u16("string index")? },
                TAG_FIELD_REF => RawConstant::FieldRef {
                    class_index: r.u16("field class index")?,
                    name_and_type_index: r.u16("field name and type index")?,
                },
                TAG_METHOD_REF | TAG_INTERFACE_METHOD_REF => RawConstant::MethodRef {
                    class_index: r.u16("method class index")?,
                    name_and_type_index: r.u16("method name and type index")?,
                    interface: tag == TAG_INTERFACE_METHOD_REF,
                },
                TAG_NAME_AND_TYPE => RawConstant::NameAndType {
                    name_index: r.u16("name index")?,
                    descriptor_index: r.u16("descriptor index")?,
                },
                TAG_METHOD_HANDLE => {
                    let kind_tag = r.u8("method handle kind")?;
                    let kind = HandleKind::from_tag(kind_tag).ok_or_else(|| {
                        CompileError::decode(format!("bad method handle kind {}", kind_tag))
                    })?;
                    RawConstant::MethodHandle {
                        kind,
                        reference_index: r.u16("method handle reference")?,
                    }
                }
                TAG_METHOD_TYPE => RawConstant::MethodType {
                    descriptor_index: r.u16("method type descriptor index")?,
                },
                TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => RawConstant::InvokeDynamic {
                    bootstrap_index: r.u16("bootstrap method index")?,
                    name_and_type_index: r.u16("invokedynamic name and type index")?,
                },
                TAG_MODULE => RawConstant::Module { name_index: r.u16("module name index")? },
                TAG_PACKAGE => RawConstant::Package { name_index: r.u16("package name index")? },
                _ => {
                    return Err(CompileError::decode(format!(
                        "unknown constant pool tag {} at index {}",
                        tag, i
                    )))
                }
            });
            i += if wide { 2 } else { 1 };
        }

        Self::resolve(raw)
    }

    /// Resolves raw cross references by fixed-point iteration. Forward references are permitted;
    /// each pass resolves every slot whose dependencies are already resolved, so a well-formed
    /// pool of N slots terminates in at most N passes. A pass that makes no progress while
    /// unresolved slots remain means the pool is circular.
    fn resolve(mut raw: Vec<Option<RawConstant>>) -> Result<Self, CompileError> {
        let len = raw.len();
        let mut resolved: Vec<Option<Constant>> = vec![None; len];
        resolved[0] = Some(Constant::Reserved);
        for (i, slot) in raw.iter_mut().enumerate().skip(1) {
            match slot {
                // Simple value constants resolve immediately
                Some(RawConstant::Utf8(s)) => resolved[i] = Some(Constant::Utf8(Rc::clone(s))),
                Some(RawConstant::Number(n)) => resolved[i] = Some(Constant::Number(*n)),
                // Reserved sentinel slots (after long/double)
                None => resolved[i] = Some(Constant::Reserved),
                _ => {}
            }
        }

        let utf8_at = |resolved: &[Option<Constant>], index: u16| -> Option<Rc<String>> {
            match resolved.get(index as usize)? {
                Some(Constant::Utf8(s)) => Some(Rc::clone(s)),
                _ => None,
            }
        };
        let name_and_type_at =
            |resolved: &[Option<Constant>], index: u16| -> Option<(Rc<String>, Rc<String>)> {
                match resolved.get(index as usize)? {
                    Some(Constant::NameAndType { name, descriptor }) => {
                        Some((Rc::clone(name), Rc::clone(descriptor)))
                    }
                    _ => None,
                }
            };

        loop {
            let mut progress = false;
            let mut unresolved = 0;
            for i in 1..len {
                if resolved[i].is_some() {
                    continue;
                }
                let next = match raw[i].as_ref().expect("raw slot for unresolved constant") {
                    RawConstant::Class { name_index } => {
                        utf8_at(&resolved, *name_index).map(Constant::Class)
                    }
                    RawConstant::String { string_index } => {
                        utf8_at(&resolved, *string_index).map(Constant::StringLiteral)
                    }
                    RawConstant::MethodType { descriptor_index } => {
                        utf8_at(&resolved, *descriptor_index).map(Constant::MethodType)
                    }
                    RawConstant::Module { name_index } => {
                        utf8_at(&resolved, *name_index).map(Constant::Module)
                    }
                    RawConstant::Package { name_index } => {
                        utf8_at(&resolved, *name_index).map(Constant::Package)
                    }
                    RawConstant::NameAndType { name_index, descriptor_index } => {
                        match (
                            utf8_at(&resolved, *name_index),
                            utf8_at(&resolved, *descriptor_index),
                        ) {
                            (Some(name), Some(descriptor)) => {
                                Some(Constant::NameAndType { name, descriptor })
                            }
                            _ => None,
                        }
                    }
                    RawConstant::FieldRef { class_index, name_and_type_index } => {
                        let class = match resolved.get(*class_index as usize) {
                            Some(Some(Constant::Class(name))) => Some(Rc::clone(name)),
                            _ => None,
                        };
                        match (class, name_and_type_at(&resolved, *name_and_type_index)) {
                            (Some(class), Some((name, descriptor))) => Some(Constant::Field {
                                member: (class, name, descriptor),
                                parsed: None,
                            }),
                            _ => None,
                        }
                    }
                    RawConstant::MethodRef { class_index, name_and_type_index, interface } => {
                        let class = match resolved.get(*class_index as usize) {
                            Some(Some(Constant::Class(name))) => Some(Rc::clone(name)),
                            _ => None,
                        };
                        match (class, name_and_type_at(&resolved, *name_and_type_index)) {
                            (Some(class), Some((name, descriptor))) => Some(Constant::Method {
                                member: (class, name, descriptor),
                                interface: *interface,
                                parsed: None,
                            }),
                            _ => None,
                        }
                    }
                    RawConstant::MethodHandle { kind, reference_index } => {
                        // Resolves through its referenced member, so wait for that slot
                        match resolved.get(*reference_index as usize) {
                            Some(Some(Constant::Method { .. }))
                            | Some(Some(Constant::Field { .. })) => Some(Constant::MethodHandle {
                                kind: *kind,
                                reference_index: *reference_index,
                            }),
                            _ => None,
                        }
                    }
                    RawConstant::InvokeDynamic { bootstrap_index, name_and_type_index } => {
                        name_and_type_at(&resolved, *name_and_type_index).map(
                            |(name, descriptor)| {
                                Constant::InvokeDynamic(InvokeDynamicRef {
                                    bootstrap_index: *bootstrap_index,
                                    name,
                                    descriptor,
                                })
                            },
                        )
                    }
                    RawConstant::Utf8(_) | RawConstant::Number(_) => unreachable!(),
                };
                match next {
                    Some(constant) => {
                        resolved[i] = Some(constant);
                        progress = true;
                    }
                    None => unresolved += 1,
                }
            }
            if unresolved == 0 {
                break;
            }
            if !progress {
                return Err(CompileError::decode(format!(
                    "circular constant pool: {} unresolvable entries",
                    unresolved
                )));
            }
        }

        let inner = resolved
            .into_iter()
            .map(|c| c.expect("all constants resolved"))
            .collect();
        Ok(Self { inner: RefCell::new(inner) })
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    fn get(&self, index: u16) -> Result<Constant, CompileError> {
        self.inner
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| bad_index(index, "valid entry"))
    }

    /// Returns the UTF-8 string at `index`.
    pub fn str(&self, index: u16) -> Result<Rc<String>, CompileError> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(bad_index(index, "utf8 constant")),
        }
    }

    /// Returns the class name referenced by the class constant at `index`.
    pub fn class_name(&self, index: u16) -> Result<Rc<String>, CompileError> {
        match self.get(index)? {
            Constant::Class(name) => Ok(name),
            _ => Err(bad_index(index, "class constant")),
        }
    }

    /// Returns the numeric constant at `index`.
    pub fn num(&self, index: u16) -> Result<NumericConstant, CompileError> {
        match self.get(index)? {
            Constant::Number(n) => Ok(n),
            _ => Err(bad_index(index, "numeric constant")),
        }
    }

    /// Returns the field descriptor at `index`, parsing the UTF-8 payload on first access.
    pub fn field_descriptor(&self, index: u16) -> Result<Rc<FieldDescriptor>, CompileError> {
        match self.get(index)? {
            Constant::FieldDescriptor(d) => Ok(d),
            Constant::Utf8(raw) => {
                let (_, descriptor) = field_descriptor_parser(&raw)
                    .map_err(|_| CompileError::decode(format!("bad field descriptor {}", raw)))?;
                let descriptor = Rc::new(descriptor);
                self.inner.borrow_mut()[index as usize] =
                    Constant::FieldDescriptor(Rc::clone(&descriptor));
                Ok(descriptor)
            }
            _ => Err(bad_index(index, "field descriptor")),
        }
    }

    /// Returns the method descriptor at `index`, parsing the UTF-8 payload on first access.
    pub fn method_descriptor(&self, index: u16) -> Result<Rc<MethodDescriptor>, CompileError> {
        match self.get(index)? {
            Constant::MethodDescriptor(d) => Ok(d),
            Constant::Utf8(raw) => {
                let (_, descriptor) = method_descriptor_parser(&raw)
                    .map_err(|_| CompileError::decode(format!("bad method descriptor {}", raw)))?;
                let descriptor = Rc::new(descriptor);
                self.inner.borrow_mut()[index as usize] =
                    Constant::MethodDescriptor(Rc::clone(&descriptor));
                Ok(descriptor)
            }
            _ => Err(bad_index(index, "method descriptor")),
        }
    }

    /// Returns the field reference at `index`, parsing its descriptor on first access.
    pub fn field(&self, index: u16) -> Result<FieldRef, CompileError> {
        match self.get(index)? {
            Constant::Field { parsed: Some(parsed), .. } => Ok(parsed),
            Constant::Field { member: (class, name, descriptor), parsed: None } => {
                let (_, parsed_descriptor) = field_descriptor_parser(&descriptor).map_err(|_| {
                    CompileError::decode(format!("bad field descriptor {}", descriptor))
                })?;
                let parsed = FieldRef {
                    class_name: class,
                    name,
                    descriptor: Rc::new(parsed_descriptor),
                };
                if let Constant::Field { parsed: slot, .. } =
                    &mut self.inner.borrow_mut()[index as usize]
                {
                    *slot = Some(parsed.clone());
                }
                Ok(parsed)
            }
            _ => Err(bad_index(index, "field reference")),
        }
    }

    /// Returns the method or interface method reference at `index`.
    pub fn method(&self, index: u16) -> Result<FunctionName, CompileError> {
        match self.get(index)? {
            Constant::Method { parsed: Some(parsed), .. } => Ok(parsed),
            Constant::Method { member: (class, name, descriptor), parsed: None, .. } => {
                let (_, parsed_descriptor) = method_descriptor_parser(&descriptor).map_err(|_| {
                    CompileError::decode(format!("bad method descriptor {}", descriptor))
                })?;
                let parsed = FunctionName {
                    class_name: class,
                    name,
                    descriptor: Rc::new(parsed_descriptor),
                };
                if let Constant::Method { parsed: slot, .. } =
                    &mut self.inner.borrow_mut()[index as usize]
                {
                    *slot = Some(parsed.clone());
                }
                Ok(parsed)
            }
            _ => Err(bad_index(index, "method reference")),
        }
    }

    /// Returns whether the method reference at `index` names an interface method.
    pub fn is_interface_method(&self, index: u16) -> Result<bool, CompileError> {
        match self.get(index)? {
            Constant::Method { interface, .. } => Ok(interface),
            _ => Err(bad_index(index, "method reference")),
        }
    }

    /// Returns the method handle at `index`, resolved through its referenced member.
    pub fn method_handle(&self, index: u16) -> Result<MethodHandle, CompileError> {
        match self.get(index)? {
            Constant::MethodHandle { kind, reference_index } => {
                let member = self.method(reference_index)?;
                Ok(MethodHandle { kind, member })
            }
            _ => Err(bad_index(index, "method handle")),
        }
    }

    /// Returns the descriptor payload of the method type constant at `index`.
    pub fn method_type(&self, index: u16) -> Result<Rc<String>, CompileError> {
        match self.get(index)? {
            Constant::MethodType(descriptor) => Ok(descriptor),
            _ => Err(bad_index(index, "method type")),
        }
    }

    /// Returns the `invokedynamic` reference at `index`.
    pub fn invoke_dynamic(&self, index: u16) -> Result<InvokeDynamicRef, CompileError> {
        match self.get(index)? {
            Constant::InvokeDynamic(r) => Ok(r),
            _ => Err(bad_index(index, "invokedynamic reference")),
        }
    }

    /// Returns the loadable constant at `index` for the `ldc` family.
    pub fn loadable(&self, index: u16) -> Result<Loadable, CompileError> {
        match self.get(index)? {
            Constant::Number(n) => Ok(Loadable::Number(n)),
            Constant::StringLiteral(s) => Ok(Loadable::Str(s)),
            Constant::Class(name) => Ok(Loadable::Class(name)),
            _ => Err(bad_index(index, "loadable constant")),
        }
    }

    /// Rewrites class references (and member references through them) naming `from` so they
    /// name `to` instead. Used when merging `@Partial` classes into their target.
    pub fn rewrite_class(&self, from: &str, to: &Rc<String>) {
        let mut inner = self.inner.borrow_mut();
        for constant in inner.iter_mut() {
            match constant {
                Constant::Class(name) if name.as_str() == from => *name = Rc::clone(to),
                Constant::Field { member: (class, _, _), parsed } if class.as_str() == from => {
                    *class = Rc::clone(to);
                    *parsed = None;
                }
                Constant::Method { member: (class, _, _), parsed, .. }
                    if class.as_str() == from =>
                {
                    *class = Rc::clone(to);
                    *parsed = None;
                }
                _ => {}
            }
        }
    }

    pub fn iter(&self) -> Ref<'_, Vec<Constant>> {
        self.inner.borrow()
    }
}

/// Constant usable by the `ldc` family of instructions.
#[derive(Debug, Clone)]
pub enum Loadable {
    Number(NumericConstant),
    Str(Rc<String>),
    Class(Rc<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_bytes(entries: &[&[u8]]) -> Vec<u8> {
        let mut data = vec![];
        data.extend_from_slice(&((entries.len() + 1) as u16).to_be_bytes());
        for e in entries {
            data.extend_from_slice(e);
        }
        data
    }

    fn utf8_entry(s: &str) -> Vec<u8> {
        let mut e = vec![TAG_UTF8];
        e.extend_from_slice(&(s.len() as u16).to_be_bytes());
        e.extend_from_slice(s.as_bytes());
        e
    }

    #[test]
    fn resolves_forward_references() -> anyhow::Result<()> {
        // Class at 1 referencing utf8 at 2, defined after it
        let class = [TAG_CLASS, 0, 2];
        let name = utf8_entry("java/lang/Object");
        let data = pool_bytes(&[&class, &name]);
        let pool = ConstantPool::parse(&mut ClassReader::new(&data))?;
        assert_eq!(*pool.class_name(1)?, "java/lang/Object");
        Ok(())
    }

    #[test]
    fn long_constants_reserve_following_slot() -> anyhow::Result<()> {
        let mut long = vec![TAG_LONG];
        long.extend_from_slice(&42i64.to_be_bytes());
        let name = utf8_entry("x");
        // Count = entries + reserved slot + 1
        let mut data = vec![];
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&long);
        data.extend_from_slice(&name);
        let pool = ConstantPool::parse(&mut ClassReader::new(&data))?;
        assert_eq!(pool.num(1)?, NumericConstant::Long(42));
        assert!(matches!(pool.get(2)?, Constant::Reserved));
        assert_eq!(*pool.str(3)?, "x");
        Ok(())
    }

    #[test]
    fn circular_pool_is_rejected() {
        // Two class constants referencing each other can never resolve to utf8
        let a = [TAG_CLASS, 0, 2];
        let b = [TAG_CLASS, 0, 1];
        let data = pool_bytes(&[&a, &b]);
        let err = ConstantPool::parse(&mut ClassReader::new(&data)).unwrap_err();
        assert!(err.message.contains("circular constant pool"));
    }

    #[test]
    fn member_descriptors_parse_lazily() -> anyhow::Result<()> {
        let class = [TAG_CLASS, 0, 4];
        let nat = [TAG_NAME_AND_TYPE, 0, 5, 0, 6];
        let field = [TAG_FIELD_REF, 0, 1, 0, 2];
        let class_name = utf8_entry("Test");
        let field_name = utf8_entry("count");
        let descriptor = utf8_entry("I");
        let data = pool_bytes(&[&class, &nat, &field, &class_name, &field_name, &descriptor]);
        let pool = ConstantPool::parse(&mut ClassReader::new(&data))?;
        let field = pool.field(3)?;
        assert_eq!(*field.class_name, "Test");
        assert_eq!(*field.name, "count");
        assert_eq!(format!("{}", field.descriptor), "I");
        Ok(())
    }

    #[test]
    fn rewrite_class_retargets_member_refs() -> anyhow::Result<()> {
        let class = [TAG_CLASS, 0, 4];
        let nat = [TAG_NAME_AND_TYPE, 0, 5, 0, 6];
        let method = [TAG_METHOD_REF, 0, 1, 0, 2];
        let class_name = utf8_entry("Shim");
        let method_name = utf8_entry("run");
        let descriptor = utf8_entry("()V");
        let data = pool_bytes(&[&class, &nat, &method, &class_name, &method_name, &descriptor]);
        let pool = ConstantPool::parse(&mut ClassReader::new(&data))?;
        pool.rewrite_class("Shim", &Rc::new(String::from("Real")));
        assert_eq!(*pool.class_name(1)?, "Real");
        assert_eq!(*pool.method(3)?.class_name, "Real");
        Ok(())
    }
}
