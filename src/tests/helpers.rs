//! Common testing helper functions.
//!
//! Tests assemble real class file byte images with [`ClassBuilder`] instead of shelling out to
//! a Java compiler, so the decoder always exercises the true wire format and the suite runs
//! without a JDK.

use crate::class::{parse_class, Class};
use crate::function::{lower_function, CompiledFunction, Inst, Instruction};
use crate::options::{Config, OutputFormat};
use crate::output::Compilation;
use std::collections::HashMap;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_SYNTHETIC: u16 = 0x1000;

/// Incrementally assembles a class file byte image.
pub struct ClassBuilder {
    pool: Vec<u8>,
    next_index: u16,
    utf8_cache: HashMap<String, u16>,
    class_cache: HashMap<String, u16>,
    access: u16,
    this_index: u16,
    super_index: u16,
    methods: Vec<Vec<u8>>,
    attributes: Vec<Vec<u8>>,
    bootstrap_methods: Vec<Vec<u8>>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            pool: vec![],
            next_index: 1,
            utf8_cache: HashMap::new(),
            class_cache: HashMap::new(),
            access: ACC_PUBLIC | ACC_SUPER,
            this_index: 0,
            super_index: 0,
            methods: vec![],
            attributes: vec![],
            bootstrap_methods: vec![],
        };
        builder.this_index = builder.class_const(name);
        builder.super_index = builder.class_const("java/lang/Object");
        builder
    }

    fn append(&mut self, entry: &[u8], slots: u16) -> u16 {
        let index = self.next_index;
        self.pool.extend_from_slice(entry);
        self.next_index += slots;
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&index) = self.utf8_cache.get(value) {
            return index;
        }
        let mut entry = vec![1u8];
        entry.extend_from_slice(&(value.len() as u16).to_be_bytes());
        entry.extend_from_slice(value.as_bytes());
        let index = self.append(&entry, 1);
        self.utf8_cache.insert(value.to_string(), index);
        index
    }

    pub fn class_const(&mut self, name: &str) -> u16 {
        if let Some(&index) = self.class_cache.get(name) {
            return index;
        }
        let name_index = self.utf8(name);
        let mut entry = vec![7u8];
        entry.extend_from_slice(&name_index.to_be_bytes());
        let index = self.append(&entry, 1);
        self.class_cache.insert(name.to_string(), index);
        index
    }

    pub fn string_const(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        let mut entry = vec![8u8];
        entry.extend_from_slice(&string_index.to_be_bytes());
        self.append(&entry, 1)
    }

    pub fn int_const(&mut self, value: i32) -> u16 {
        let mut entry = vec![3u8];
        entry.extend_from_slice(&value.to_be_bytes());
        self.append(&entry, 1)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut entry = vec![12u8];
        entry.extend_from_slice(&name_index.to_be_bytes());
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.append(&entry, 1)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let nat_index = self.name_and_type(name, descriptor);
        let mut entry = vec![10u8];
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&nat_index.to_be_bytes());
        self.append(&entry, 1)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class_const(class);
        let nat_index = self.name_and_type(name, descriptor);
        let mut entry = vec![9u8];
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&nat_index.to_be_bytes());
        self.append(&entry, 1)
    }

    pub fn method_type(&mut self, descriptor: &str) -> u16 {
        let descriptor_index = self.utf8(descriptor);
        let mut entry = vec![16u8];
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.append(&entry, 1)
    }

    /// Method handle; `kind` 6 is `invokeStatic`.
    pub fn method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        let mut entry = vec![15u8, kind];
        entry.extend_from_slice(&reference.to_be_bytes());
        self.append(&entry, 1)
    }

    pub fn invoke_dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> u16 {
        let nat_index = self.name_and_type(name, descriptor);
        let mut entry = vec![18u8];
        entry.extend_from_slice(&bootstrap.to_be_bytes());
        entry.extend_from_slice(&nat_index.to_be_bytes());
        self.append(&entry, 1)
    }

    /// Registers a bootstrap method, returning its index for `invoke_dynamic`.
    pub fn bootstrap_method(&mut self, handle: u16, arguments: &[u16]) -> u16 {
        let mut entry = vec![];
        entry.extend_from_slice(&handle.to_be_bytes());
        entry.extend_from_slice(&(arguments.len() as u16).to_be_bytes());
        for argument in arguments {
            entry.extend_from_slice(&argument.to_be_bytes());
        }
        self.bootstrap_methods.push(entry);
        (self.bootstrap_methods.len() - 1) as u16
    }

    fn attribute(&mut self, name: &str, payload: &[u8]) -> Vec<u8> {
        let name_index = self.utf8(name);
        let mut attribute = vec![];
        attribute.extend_from_slice(&name_index.to_be_bytes());
        attribute.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        attribute.extend_from_slice(payload);
        attribute
    }

    /// Encodes a `RuntimeInvisibleAnnotations` attribute with string-valued elements only,
    /// which covers every recognized annotation.
    pub fn annotations(&mut self, entries: &[(&str, &[(&str, &str)])]) -> Vec<u8> {
        let mut payload = vec![];
        payload.extend_from_slice(&(entries.len() as u16).to_be_bytes());
        for (type_descriptor, elements) in entries {
            let type_index = self.utf8(type_descriptor);
            payload.extend_from_slice(&type_index.to_be_bytes());
            payload.extend_from_slice(&(elements.len() as u16).to_be_bytes());
            for (name, value) in *elements {
                let name_index = self.utf8(name);
                let value_index = self.utf8(value);
                payload.extend_from_slice(&name_index.to_be_bytes());
                payload.push(b's');
                payload.extend_from_slice(&value_index.to_be_bytes());
            }
        }
        self.attribute("RuntimeInvisibleAnnotations", &payload)
    }

    pub fn class_annotations(&mut self, entries: &[(&str, &[(&str, &str)])]) {
        let attribute = self.annotations(entries);
        self.attributes.push(attribute);
    }

    /// Adds a method with a `Code` attribute, optional exception handlers
    /// `(start, end, handler, catch_type_index)` and an optional line number table.
    #[allow(clippy::too_many_arguments)]
    pub fn method_with(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
        handlers: &[(u16, u16, u16, u16)],
        lines: &[(u16, u16)],
        extra_attributes: Vec<Vec<u8>>,
    ) {
        let mut payload = vec![];
        payload.extend_from_slice(&max_stack.to_be_bytes());
        payload.extend_from_slice(&max_locals.to_be_bytes());
        payload.extend_from_slice(&(code.len() as u32).to_be_bytes());
        payload.extend_from_slice(code);
        payload.extend_from_slice(&(handlers.len() as u16).to_be_bytes());
        for (start, end, handler, catch_type) in handlers {
            payload.extend_from_slice(&start.to_be_bytes());
            payload.extend_from_slice(&end.to_be_bytes());
            payload.extend_from_slice(&handler.to_be_bytes());
            payload.extend_from_slice(&catch_type.to_be_bytes());
        }
        if lines.is_empty() {
            payload.extend_from_slice(&0u16.to_be_bytes());
        } else {
            let mut table = vec![];
            table.extend_from_slice(&(lines.len() as u16).to_be_bytes());
            for (offset, line) in lines {
                table.extend_from_slice(&offset.to_be_bytes());
                table.extend_from_slice(&line.to_be_bytes());
            }
            let line_attribute = self.attribute("LineNumberTable", &table);
            payload.extend_from_slice(&1u16.to_be_bytes());
            payload.extend_from_slice(&line_attribute);
        }
        let code_attribute = self.attribute("Code", &payload);

        let mut method = vec![];
        method.extend_from_slice(&access.to_be_bytes());
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        method.extend_from_slice(&name_index.to_be_bytes());
        method.extend_from_slice(&descriptor_index.to_be_bytes());
        method.extend_from_slice(&(1 + extra_attributes.len() as u16).to_be_bytes());
        method.extend_from_slice(&code_attribute);
        for attribute in extra_attributes {
            method.extend_from_slice(&attribute);
        }
        self.methods.push(method);
    }

    pub fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: &[u8],
    ) {
        self.method_with(access, name, descriptor, max_stack, max_locals, code, &[], &[], vec![]);
    }

    /// Adds a method without a `Code` attribute (`native` or `abstract`).
    pub fn bodyless_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        extra_attributes: Vec<Vec<u8>>,
    ) {
        let mut method = vec![];
        method.extend_from_slice(&access.to_be_bytes());
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        method.extend_from_slice(&name_index.to_be_bytes());
        method.extend_from_slice(&descriptor_index.to_be_bytes());
        method.extend_from_slice(&(extra_attributes.len() as u16).to_be_bytes());
        for attribute in extra_attributes {
            method.extend_from_slice(&attribute);
        }
        self.methods.push(method);
    }

    pub fn build(mut self) -> Vec<u8> {
        if !self.bootstrap_methods.is_empty() {
            let mut payload = vec![];
            payload.extend_from_slice(&(self.bootstrap_methods.len() as u16).to_be_bytes());
            let methods = self.bootstrap_methods.clone();
            for method in methods {
                payload.extend_from_slice(&method);
            }
            let attribute = self.attribute("BootstrapMethods", &payload);
            self.attributes.push(attribute);
        }

        let mut out = vec![];
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // minor
        out.extend_from_slice(&52u16.to_be_bytes()); // major: Java 8
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&self.access.to_be_bytes());
        out.extend_from_slice(&self.this_index.to_be_bytes());
        out.extend_from_slice(&self.super_index.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // interfaces
        out.extend_from_slice(&0u16.to_be_bytes()); // fields
        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend_from_slice(method);
        }
        out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for attribute in &self.attributes {
            out.extend_from_slice(attribute);
        }
        out
    }
}

/// Parses a built class image.
pub fn load(data: &[u8]) -> Class {
    parse_class(data).expect("test class parses")
}

/// Lowers one method of a built class image with the given configuration.
pub fn lower(data: &[u8], method_name: &str, config: &Config) -> anyhow::Result<CompiledFunction> {
    let class = load(data);
    let method = class
        .methods
        .iter()
        .find(|m| m.name.name.as_str() == method_name)
        .expect("method present");
    lower_function(method, config)
}

/// Compiles class images to a text module, returning the module text and optional glue.
pub fn compile_text(
    classes: Vec<Vec<u8>>,
    config: Config,
) -> anyhow::Result<(String, Option<String>)> {
    let mut compilation = Compilation::new(config);
    for data in classes {
        compilation.add_class_bytes(&data)?;
    }
    let compiled = compilation.compile(OutputFormat::Text, None)?;
    Ok((
        String::from_utf8(compiled.module).expect("text output is UTF-8"),
        compiled.js_glue,
    ))
}

/// Compiles class images to a binary module.
pub fn compile_binary(classes: Vec<Vec<u8>>, config: Config) -> anyhow::Result<Vec<u8>> {
    let mut compilation = Compilation::new(config);
    for data in classes {
        compilation.add_class_bytes(&data)?;
    }
    Ok(compilation.compile(OutputFormat::Binary, None)?.module)
}

/// Asserts that every branch in a structured body targets an enclosing frame and that frames
/// balance: the restructurer's well-formedness property.
pub fn assert_well_nested(body: &[Inst]) {
    let mut depth: u32 = 0;
    for inst in body {
        match inst {
            Inst::I(Instruction::Block(_))
            | Inst::I(Instruction::Loop(_))
            | Inst::I(Instruction::If(_))
            | Inst::I(Instruction::Try(_)) => depth += 1,
            Inst::I(Instruction::End) => {
                assert!(depth > 0, "unbalanced end");
                depth -= 1;
            }
            Inst::I(Instruction::Br(k)) | Inst::I(Instruction::BrIf(k)) => {
                assert!(*k < depth, "br {} exceeds depth {}", k, depth);
            }
            Inst::I(Instruction::BrTable { targets, default }) => {
                for k in targets.iter().chain(std::iter::once(default)) {
                    assert!(*k < depth, "br_table {} exceeds depth {}", k, depth);
                }
            }
            _ => {}
        }
    }
    assert_eq!(depth, 0, "unclosed frames at end of body");
}
