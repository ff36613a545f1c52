use std::fmt;
use std::fmt::Write;

/// Name of the one class whose instances are host objects rather than linear memory or GC
/// structs. String literals materialize through the external reference table.
pub const JAVA_LANG_STRING: &str = "java/lang/String";

/// WebAssembly value type as tracked on the operand stack and in locals.
///
/// `Ref` carries a type index into the module's type section (GC mode only). `Empty` stands for
/// the absence of a value (void returns, empty block types).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
    ExternRef,
    EqRef,
    Ref(u32),
    Empty,
}

impl ValueType {
    pub fn name(&self) -> String {
        match self {
            ValueType::I32 => "i32".to_string(),
            ValueType::I64 => "i64".to_string(),
            ValueType::F32 => "f32".to_string(),
            ValueType::F64 => "f64".to_string(),
            ValueType::FuncRef => "funcref".to_string(),
            ValueType::ExternRef => "externref".to_string(),
            ValueType::EqRef => "eqref".to_string(),
            ValueType::Ref(index) => format!("(ref null {})", index),
            ValueType::Empty => String::new(),
        }
    }

    /// Whether values of this type occupy two JVM stack/local slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, ValueType::I64 | ValueType::F64)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ValueType::FuncRef | ValueType::ExternRef | ValueType::EqRef | ValueType::Ref(_)
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Storage type of a struct field or array element. Packed 8/16-bit forms exist only in storage;
/// they load and store as `i32` on the operand stack.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StorageType {
    Val(ValueType),
    I8,
    I16,
}

impl StorageType {
    /// The operand stack type values of this storage type take.
    pub fn unpacked(&self) -> ValueType {
        match self {
            StorageType::Val(t) => *t,
            StorageType::I8 | StorageType::I16 => ValueType::I32,
        }
    }

    /// Byte width in linear memory (non-GC object layout).
    pub fn byte_size(&self) -> u32 {
        match self {
            StorageType::I8 => 1,
            StorageType::I16 => 2,
            StorageType::Val(ValueType::I64) | StorageType::Val(ValueType::F64) => 8,
            StorageType::Val(_) => 4,
        }
    }

    /// log2 of the natural alignment, as used by memory instruction immediates.
    pub fn align(&self) -> u32 {
        match self.byte_size() {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Val(t) => fmt::Display::fmt(t, f),
            StorageType::I8 => f.write_str("i8"),
            StorageType::I16 => f.write_str("i16"),
        }
    }
}

// https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.3.2
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum FieldDescriptor {
    Byte,                        // B
    Char,                        // C
    Double,                      // D
    Float,                       // F
    Int,                         // I
    Long,                        // J
    Short,                       // S
    Boolean,                     // Z
    Object(String),              // L ClassName ;
    Array(Box<FieldDescriptor>), // [ ComponentType
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDescriptor::Byte => f.write_char('B'),
            FieldDescriptor::Char => f.write_char('C'),
            FieldDescriptor::Double => f.write_char('D'),
            FieldDescriptor::Float => f.write_char('F'),
            FieldDescriptor::Int => f.write_char('I'),
            FieldDescriptor::Long => f.write_char('J'),
            FieldDescriptor::Short => f.write_char('S'),
            FieldDescriptor::Boolean => f.write_char('Z'),
            FieldDescriptor::Object(class_name) => write!(f, "L{};", class_name),
            FieldDescriptor::Array(component_type) => write!(f, "[{}", component_type),
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldDescriptor {{ {} }}", self)
    }
}

impl FieldDescriptor {
    /// Operand stack type of values of this descriptor. Object and array references are linear
    /// memory pointers in non-GC mode and equatable GC references otherwise; strings are host
    /// objects in both.
    pub fn as_type(&self, use_gc: bool) -> ValueType {
        match self {
            FieldDescriptor::Byte
            | FieldDescriptor::Char
            | FieldDescriptor::Int
            | FieldDescriptor::Short
            | FieldDescriptor::Boolean => ValueType::I32,
            FieldDescriptor::Double => ValueType::F64,
            FieldDescriptor::Float => ValueType::F32,
            FieldDescriptor::Long => ValueType::I64,
            FieldDescriptor::Object(class_name) if class_name == JAVA_LANG_STRING => {
                ValueType::ExternRef
            }
            FieldDescriptor::Object(_) | FieldDescriptor::Array(_) => match use_gc {
                true => ValueType::EqRef,
                false => ValueType::I32,
            },
        }
    }

    /// Storage type used when this descriptor is a struct field or array element.
    pub fn storage_type(&self, use_gc: bool) -> StorageType {
        match self {
            FieldDescriptor::Byte | FieldDescriptor::Boolean => StorageType::I8,
            FieldDescriptor::Char | FieldDescriptor::Short => StorageType::I16,
            _ => StorageType::Val(self.as_type(use_gc)),
        }
    }
}

// https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.3.3
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ReturnDescriptor {
    Void, // V
    Field(FieldDescriptor),
}

impl ReturnDescriptor {
    pub fn as_type(&self, use_gc: bool) -> ValueType {
        match self {
            ReturnDescriptor::Void => ValueType::Empty,
            ReturnDescriptor::Field(field) => field.as_type(use_gc),
        }
    }
}

impl fmt::Display for ReturnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnDescriptor::Void => f.write_char('V'),
            ReturnDescriptor::Field(field_type) => fmt::Display::fmt(field_type, f),
        }
    }
}

impl fmt::Debug for ReturnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReturnDescriptor {{ {} }}", self)
    }
}

/// Deduplicatable WebAssembly function type: a parameter and result tuple.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionType {
    /// The same type with an implicit `this` receiver inserted before the parameters.
    pub fn with_implicit_this(&self, this: ValueType) -> Self {
        let mut func_type = self.clone();
        func_type.params.insert(0, this);
        func_type
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.params {
            write!(f, "(param {}) ", param)?;
        }
        for result in &self.results {
            write!(f, "(result {}) ", result)?;
        }
        Ok(())
    }
}

// https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.3.3
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldDescriptor>,
    pub returns: ReturnDescriptor,
}

impl MethodDescriptor {
    pub fn new(params: Vec<FieldDescriptor>, returns: ReturnDescriptor) -> Self {
        Self { params, returns }
    }

    /// WebAssembly function type of a static method with this descriptor.
    pub fn function_type(&self, use_gc: bool) -> FunctionType {
        let params = self.params.iter().map(|p| p.as_type(use_gc)).collect();
        let results = match &self.returns {
            ReturnDescriptor::Void => vec![],
            ReturnDescriptor::Field(field) => vec![field.as_type(use_gc)],
        };
        FunctionType { params, results }
    }
}

impl std::cmp::PartialOrd for MethodDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for MethodDescriptor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.params
            .cmp(&other.params)
            .then_with(|| self.returns.cmp(&other.returns))
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('(')?;
        for param in &self.params {
            fmt::Display::fmt(param, f)?;
        }
        f.write_char(')')?;
        fmt::Display::fmt(&self.returns, f)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodDescriptor {{ {} }}", self)
    }
}
