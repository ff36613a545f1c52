use crate::class::{
    find_annotation, parse_annotations_blob, Annotation, Attributes, Class, ClassAccessFlags,
    ConstantPool, Field, FieldAccessFlags, Function, FunctionName, MethodAccessFlags,
};
use crate::class::reader::ClassReader;
use crate::error::CompileError;
use anyhow::Context;
use std::rc::Rc;

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// Parses the contents of a Java `.class` file as defined in [chapter 4] of the Java Virtual
/// Machine Specification, returning a [`Class`].
///
/// The four magic bytes are validated before anything else is read. Decoding is streaming over
/// the provided bytes and allocates only what survives constant pool resolution; code and most
/// attributes stay as opaque blobs until first access.
///
/// [chapter 4]: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html
pub fn parse_class(data: &[u8]) -> anyhow::Result<Class> {
    let mut r = ClassReader::new(data);

    let magic = r.u32("magic")?;
    if magic != CLASS_MAGIC {
        return Err(CompileError::decode(format!(
            "bad class file magic 0x{:08X}, expected 0xCAFEBABE",
            magic
        ))
        .into());
    }
    // Version is informational only
    let _minor = r.u16("minor version")?;
    let _major = r.u16("major version")?;

    let const_pool = Rc::new(ConstantPool::parse(&mut r).context("unable to parse constant pool")?);

    let flags = ClassAccessFlags::from_bits_truncate(r.u16("access flags")?);
    let class_name = const_pool.class_name(r.u16("this class")?)?;
    let super_index = r.u16("super class")?;
    let super_class_name = match super_index {
        0 => None, // Only java/lang/Object has no super class
        _ => Some(const_pool.class_name(super_index)?),
    };

    let interface_count = r.u16("interface count")?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(const_pool.class_name(r.u16("interface index")?)?);
    }

    let field_count = r.u16("field count")?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(parse_field(&mut r, &const_pool)?);
    }

    let method_count = r.u16("method count")?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(Rc::new(parse_method(&mut r, &class_name, &const_pool)?));
    }

    let attributes = Attributes::parse(&mut r, &const_pool)?;
    let annotations = member_annotations(&attributes, &const_pool)?;

    Ok(Class::new_with_attributes(
        class_name,
        super_class_name,
        interfaces,
        flags,
        const_pool,
        fields,
        methods,
        attributes,
        annotations,
    ))
}

/// Decodes the runtime annotations of a member from its attribute table. Both retention forms
/// are accepted; compile-retention annotations arrive as `RuntimeInvisibleAnnotations`.
fn member_annotations(
    attributes: &Attributes,
    const_pool: &ConstantPool,
) -> anyhow::Result<Vec<Annotation>> {
    let mut annotations = vec![];
    for name in ["RuntimeInvisibleAnnotations", "RuntimeVisibleAnnotations"] {
        if let Some(blob) = attributes.get(name) {
            annotations.extend(parse_annotations_blob(blob, const_pool)?);
        }
    }
    Ok(annotations)
}

fn parse_field(r: &mut ClassReader<'_>, const_pool: &Rc<ConstantPool>) -> anyhow::Result<Field> {
    let flags = FieldAccessFlags::from_bits_truncate(r.u16("field access flags")?);
    let name = const_pool.str(r.u16("field name")?)?;
    let descriptor = const_pool.field_descriptor(r.u16("field descriptor")?)?;
    let attributes = Attributes::parse(r, const_pool)?;
    let annotations = member_annotations(&attributes, const_pool)?;
    Ok(Field { name, descriptor, flags, annotations })
}

fn parse_method(
    r: &mut ClassReader<'_>,
    class_name: &Rc<String>,
    const_pool: &Rc<ConstantPool>,
) -> anyhow::Result<Function> {
    let flags = MethodAccessFlags::from_bits_truncate(r.u16("method access flags")?);
    let name = const_pool.str(r.u16("method name")?)?;
    let descriptor = const_pool.method_descriptor(r.u16("method descriptor")?)?;
    let attributes = Attributes::parse(r, const_pool)?;
    let annotations = member_annotations(&attributes, const_pool)
        .with_context(|| format!("unable to parse annotations for {}", name))?;
    Ok(Function {
        name: FunctionName {
            class_name: Rc::clone(class_name),
            name,
            descriptor,
        },
        flags,
        const_pool: Rc::clone(const_pool),
        attributes,
        annotations,
    })
}

/// Target class named by a `@Partial(target)` annotation, if the class carries one.
pub fn partial_target(class: &Class) -> Option<String> {
    let annotation = find_annotation(&class.annotations, "Partial")?;
    annotation
        .string_element("value")
        .or_else(|| annotation.string_element("target"))
        .map(|target| target.replace('.', "/"))
}

/// Merges a `@Partial` class into its target: methods and fields that do not already exist are
/// added, existing members are preserved. Intra-class type references in the source constant
/// pool are rewritten from the source class name to the target class name first, so merged code
/// resolves against the target.
pub fn merge_partial(target: &mut Class, source: Class) {
    source
        .const_pool
        .rewrite_class(&source.class_name, &target.class_name);

    for method in source.methods {
        let exists = target.methods.iter().any(|m| {
            m.name.name == method.name.name && m.name.descriptor == method.name.descriptor
        });
        if exists {
            continue;
        }
        // The source class was just parsed, so its methods have a single owner
        let mut method = Rc::try_unwrap(method)
            .ok()
            .expect("partial class method is solely owned");
        // Rebind the method to the target class; its body still resolves through the source pool
        method.name.class_name = Rc::clone(&target.class_name);
        target.methods.push(Rc::new(method));
    }

    for field in source.fields {
        if !target.fields.iter().any(|f| f.name == field.name) {
            target.fields.push(field);
        }
    }
}
