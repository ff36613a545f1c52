use crate::class::constants::{ConstantPool, NumericConstant};
use crate::class::reader::ClassReader;
use crate::error::CompileError;
use std::rc::Rc;

/// A decoded runtime annotation value.
///
/// All five non-primitive element kinds are supported: strings (`s`), class references (`c`),
/// enum constants (`e`), nested annotations (`@`) and arrays (`[`).
#[derive(Debug, Clone)]
pub enum ElementValue {
    Const(NumericConstant),
    Boolean(bool),
    String(Rc<String>),
    /// Class reference, normalized to `pkg.Name` form.
    Class(String),
    Enum { type_name: String, const_name: Rc<String> },
    Annotation(Box<Annotation>),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ElementValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ElementValue::Boolean(b) => Some(*b),
            ElementValue::Const(NumericConstant::Integer(i)) => Some(*i != 0),
            _ => None,
        }
    }
}

/// A decoded annotation: normalized type name plus named element values.
#[derive(Debug, Clone)]
pub struct Annotation {
    /// Annotation type in `pkg.Name` form.
    pub type_name: String,
    pub elements: Vec<(Rc<String>, ElementValue)>,
}

impl Annotation {
    /// Whether this annotation's simple name (the part after the last dot) is `simple`.
    /// Recognized annotations are matched by simple name so the host API package is free to move.
    pub fn is_named(&self, simple: &str) -> bool {
        self.type_name
            .rsplit('.')
            .next()
            .map_or(false, |name| name == simple)
    }

    pub fn element(&self, name: &str) -> Option<&ElementValue> {
        self.elements
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, value)| value)
    }

    pub fn string_element(&self, name: &str) -> Option<&str> {
        self.element(name).and_then(ElementValue::as_str)
    }
}

/// Normalizes a type descriptor of the form `Lpkg/Name;` to `pkg.Name`, trimming the enclosing
/// characters and converting slashes. Other inputs pass through unchanged.
pub fn normalize_type_name(descriptor: &str) -> String {
    match descriptor.strip_prefix('L').and_then(|d| d.strip_suffix(';')) {
        Some(inner) => inner.replace('/', "."),
        None => descriptor.to_string(),
    }
}

fn parse_element_value(
    r: &mut ClassReader<'_>,
    const_pool: &ConstantPool,
) -> anyhow::Result<ElementValue> {
    let tag = r.u8("element value tag")?;
    let value = match tag {
        b'B' | b'C' | b'I' | b'S' => {
            ElementValue::Const(const_pool.num(r.u16("const value index")?)?)
        }
        b'Z' => {
            let value = const_pool.num(r.u16("boolean value index")?)?;
            match value {
                NumericConstant::Integer(i) => ElementValue::Boolean(i != 0),
                _ => return Err(CompileError::decode("boolean element is not an integer").into()),
            }
        }
        b'D' | b'F' | b'J' => ElementValue::Const(const_pool.num(r.u16("const value index")?)?),
        b's' => ElementValue::String(const_pool.str(r.u16("string value index")?)?),
        b'c' => {
            let descriptor = const_pool.str(r.u16("class info index")?)?;
            ElementValue::Class(normalize_type_name(&descriptor))
        }
        b'e' => {
            let type_descriptor = const_pool.str(r.u16("enum type index")?)?;
            let const_name = const_pool.str(r.u16("enum const index")?)?;
            ElementValue::Enum {
                type_name: normalize_type_name(&type_descriptor),
                const_name,
            }
        }
        b'@' => ElementValue::Annotation(Box::new(parse_annotation(r, const_pool)?)),
        b'[' => {
            let count = r.u16("array element count")?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(parse_element_value(r, const_pool)?);
            }
            ElementValue::Array(values)
        }
        _ => {
            return Err(CompileError::decode(format!(
                "unknown annotation element tag '{}'",
                tag as char
            ))
            .into())
        }
    };
    Ok(value)
}

fn parse_annotation(
    r: &mut ClassReader<'_>,
    const_pool: &ConstantPool,
) -> anyhow::Result<Annotation> {
    let type_descriptor = const_pool.str(r.u16("annotation type index")?)?;
    let type_name = normalize_type_name(&type_descriptor);
    let pair_count = r.u16("annotation element count")?;
    let mut elements = Vec::with_capacity(pair_count as usize);
    for _ in 0..pair_count {
        let name = const_pool.str(r.u16("element name index")?)?;
        let value = parse_element_value(r, const_pool)?;
        elements.push((name, value));
    }
    Ok(Annotation { type_name, elements })
}

/// Decodes a `RuntimeInvisibleAnnotations`/`RuntimeVisibleAnnotations` attribute payload.
pub fn parse_annotations_blob(
    blob: &[u8],
    const_pool: &ConstantPool,
) -> anyhow::Result<Vec<Annotation>> {
    let mut r = ClassReader::new(blob);
    let count = r.u16("annotation count")?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(parse_annotation(&mut r, const_pool)?);
    }
    Ok(annotations)
}

/// Looks up a recognized annotation on a member by simple name.
pub fn find_annotation<'a>(annotations: &'a [Annotation], simple: &str) -> Option<&'a Annotation> {
    annotations.iter().find(|a| a.is_named(simple))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_class_descriptors() {
        assert_eq!(normalize_type_name("Lpkg/sub/Name;"), "pkg.sub.Name");
        assert_eq!(normalize_type_name("Lapi/annotation/Import;"), "api.annotation.Import");
        // Pass-through for anything else
        assert_eq!(normalize_type_name("I"), "I");
    }

    #[test]
    fn matches_by_simple_name() {
        let annotation = Annotation {
            type_name: String::from("api.annotation.Export"),
            elements: vec![],
        };
        assert!(annotation.is_named("Export"));
        assert!(!annotation.is_named("Import"));
    }
}
