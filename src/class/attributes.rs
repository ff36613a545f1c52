use crate::class::bytecode::{decode_bytecode, Opcode};
use crate::class::constants::{ConstantPool, MethodHandle};
use crate::class::reader::ClassReader;
use crate::error::CompileError;
use anyhow::Context;
use std::rc::Rc;

/// Attribute blobs retained from the class file. The attributes the compiler consumes are
/// decoded lazily on first access through the typed accessors below; everything else stays an
/// opaque `(name, bytes)` pair.
#[derive(Debug, Default)]
pub struct Attributes {
    entries: Vec<(Rc<String>, Vec<u8>)>,
}

/// One entry of a method's exception table: the half-open protected bytecode range
/// `[start, end)`, the handler entry offset and the caught class (`None` for `finally`).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExceptionHandler {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub catch_type: Option<Rc<String>>,
}

/// One entry of a method's local variable table.
#[derive(Debug, Clone)]
pub struct LocalVariable {
    pub start: u32,
    pub length: u32,
    pub name: Rc<String>,
    pub descriptor: Rc<String>,
    pub slot: u16,
}

/// A method's decoded `Code` attribute.
#[derive(Debug)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<(u32, Opcode)>,
    pub exception_table: Vec<ExceptionHandler>,
    /// Bytecode offset to source line, strictly increasing by offset.
    pub line_numbers: Vec<(u32, u32)>,
    pub local_variables: Vec<LocalVariable>,
}

impl Code {
    /// Source line of the closest line number entry at or before `offset`.
    pub fn line_at(&self, offset: u32) -> Option<u32> {
        self.line_numbers
            .iter()
            .take_while(|(o, _)| *o <= offset)
            .last()
            .map(|(_, line)| *line)
    }
}

/// One record of the class's `BootstrapMethods` attribute: the meta-factory handle plus its
/// static argument constant pool indices.
#[derive(Debug, Clone)]
pub struct BootstrapMethod {
    pub handle: MethodHandle,
    pub arguments: Vec<u16>,
}

impl Attributes {
    /// Reads an attribute table: `count (name_index, length, bytes)*`.
    pub fn parse(
        r: &mut ClassReader<'_>,
        const_pool: &ConstantPool,
    ) -> Result<Self, CompileError> {
        let count = r.u16("attribute count")?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = const_pool.str(r.u16("attribute name index")?)?;
            let length = r.u32("attribute length")? as usize;
            let bytes = r.bytes(length, "attribute payload")?.to_vec();
            entries.push((name, bytes));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<String>, &[u8])> {
        self.entries.iter().map(|(n, b)| (n, b.as_slice()))
    }

    /// Decodes the `Code` attribute, including its nested `LineNumberTable` and
    /// `LocalVariableTable` attributes.
    pub fn code(&self, const_pool: &ConstantPool) -> anyhow::Result<Code> {
        let blob = self
            .get("Code")
            .ok_or_else(|| CompileError::decode("method has no Code attribute"))?;
        let mut r = ClassReader::new(blob);
        let max_stack = r.u16("max stack")?;
        let max_locals = r.u16("max locals")?;
        let code_length = r.u32("code length")? as usize;
        let code_bytes = r.bytes(code_length, "bytecode")?;
        let bytecode = decode_bytecode(code_bytes).context("unable to decode bytecode")?;

        let handler_count = r.u16("exception table length")?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start = r.u16("handler start")? as u32;
            let end = r.u16("handler end")? as u32;
            let handler = r.u16("handler target")? as u32;
            let catch_index = r.u16("handler catch type")?;
            let catch_type = match catch_index {
                0 => None, // finally
                _ => Some(const_pool.class_name(catch_index)?),
            };
            exception_table.push(ExceptionHandler { start, end, handler, catch_type });
        }

        let nested = Attributes::parse(&mut r, const_pool)?;
        let line_numbers = nested.line_number_table()?;
        let local_variables = nested.local_variable_table(const_pool)?;

        Ok(Code {
            max_stack,
            max_locals,
            bytecode,
            exception_table,
            line_numbers,
            local_variables,
        })
    }

    fn line_number_table(&self) -> Result<Vec<(u32, u32)>, CompileError> {
        let blob = match self.get("LineNumberTable") {
            Some(blob) => blob,
            None => return Ok(vec![]),
        };
        let mut r = ClassReader::new(blob);
        let count = r.u16("line number count")?;
        let mut table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = r.u16("line number offset")? as u32;
            let line = r.u16("line number")? as u32;
            table.push((offset, line));
        }
        // The attribute order is unspecified, the lookup in line_at() needs offset order
        table.sort_by_key(|(offset, _)| *offset);
        Ok(table)
    }

    fn local_variable_table(
        &self,
        const_pool: &ConstantPool,
    ) -> Result<Vec<LocalVariable>, CompileError> {
        let blob = match self.get("LocalVariableTable") {
            Some(blob) => blob,
            None => return Ok(vec![]),
        };
        let mut r = ClassReader::new(blob);
        let count = r.u16("local variable count")?;
        let mut table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let start = r.u16("local variable start")? as u32;
            let length = r.u16("local variable length")? as u32;
            let name = const_pool.str(r.u16("local variable name")?)?;
            let descriptor = const_pool.str(r.u16("local variable descriptor")?)?;
            let slot = r.u16("local variable slot")?;
            table.push(LocalVariable { start, length, name, descriptor, slot });
        }
        Ok(table)
    }

    /// Decodes the `Exceptions` (throws clause) attribute.
    pub fn exceptions(&self, const_pool: &ConstantPool) -> anyhow::Result<Vec<Rc<String>>> {
        let blob = match self.get("Exceptions") {
            Some(blob) => blob,
            None => return Ok(vec![]),
        };
        let mut r = ClassReader::new(blob);
        let count = r.u16("exception count")?;
        let mut exceptions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exceptions.push(const_pool.class_name(r.u16("exception class")?)?);
        }
        Ok(exceptions)
    }

    /// Decodes the `SourceFile` attribute.
    pub fn source_file(&self, const_pool: &ConstantPool) -> anyhow::Result<Option<Rc<String>>> {
        match self.get("SourceFile") {
            Some(blob) => {
                let mut r = ClassReader::new(blob);
                Ok(Some(const_pool.str(r.u16("source file index")?)?))
            }
            None => Ok(None),
        }
    }

    /// Decodes the generic `Signature` attribute.
    pub fn signature(&self, const_pool: &ConstantPool) -> anyhow::Result<Option<Rc<String>>> {
        match self.get("Signature") {
            Some(blob) => {
                let mut r = ClassReader::new(blob);
                Ok(Some(const_pool.str(r.u16("signature index")?)?))
            }
            None => Ok(None),
        }
    }

    /// Decodes the `BootstrapMethods` attribute referenced by `invokedynamic` constants.
    pub fn bootstrap_methods(
        &self,
        const_pool: &ConstantPool,
    ) -> anyhow::Result<Vec<BootstrapMethod>> {
        let blob = match self.get("BootstrapMethods") {
            Some(blob) => blob,
            None => return Ok(vec![]),
        };
        let mut r = ClassReader::new(blob);
        let count = r.u16("bootstrap method count")?;
        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let handle = const_pool.method_handle(r.u16("bootstrap method handle")?)?;
            let argument_count = r.u16("bootstrap argument count")?;
            let mut arguments = Vec::with_capacity(argument_count as usize);
            for _ in 0..argument_count {
                arguments.push(r.u16("bootstrap argument")?);
            }
            methods.push(BootstrapMethod { handle, arguments });
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_at_returns_closest_preceding_entry() {
        let code = Code {
            max_stack: 0,
            max_locals: 0,
            bytecode: vec![],
            exception_table: vec![],
            line_numbers: vec![(0, 10), (4, 11), (9, 13)],
            local_variables: vec![],
        };
        assert_eq!(code.line_at(0), Some(10));
        assert_eq!(code.line_at(5), Some(11));
        assert_eq!(code.line_at(100), Some(13));
    }
}
