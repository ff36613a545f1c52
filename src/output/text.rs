use crate::class::descriptors::{StorageType, ValueType};
use crate::error::CompileError;
use crate::function::{BlockType, Conversion, Instruction, NumOp, Value};
use crate::output::types::{ImportKind, ModuleImage, TypeDef};
use std::fmt::Write;

/// Renders a [`ModuleImage`] as a WebAssembly text (S-expression) module.
///
/// Each instruction sits on its own line, indented two spaces per open scope. Emission is
/// append-only and never reorders instructions, so rendering the same image twice produces
/// byte-identical output.
pub fn render_module(image: &ModuleImage) -> anyhow::Result<String> {
    let mut out = String::new();
    out.push_str("(module\n");

    for (i, ty) in image.types.iter().enumerate() {
        match ty {
            TypeDef::Func(func_type) => {
                let mut decl = String::new();
                for &param in &func_type.params {
                    write!(decl, " (param {})", param).unwrap();
                }
                for &result in &func_type.results {
                    write!(decl, " (result {})", result).unwrap();
                }
                writeln!(out, "  (type (;{};) (func{}))", i, decl).unwrap();
            }
            TypeDef::Struct { name, fields } => {
                let mut decl = String::new();
                for &(field, mutable) in fields {
                    match mutable {
                        true => write!(decl, " (field (mut {}))", storage_text(field)).unwrap(),
                        false => write!(decl, " (field {})", storage_text(field)).unwrap(),
                    }
                }
                writeln!(out, "  (type ${} (struct{}))", sanitize_id(name), decl).unwrap();
            }
            TypeDef::Array { name, element } => {
                writeln!(
                    out,
                    "  (type ${} (array (mut {})))",
                    sanitize_id(name),
                    storage_text(*element)
                )
                .unwrap();
            }
        }
    }

    // Function names by final index, for call sites
    let mut names: Vec<String> = vec![];
    for import in &image.imports {
        if matches!(import.kind, ImportKind::Func { .. }) {
            names.push(sanitize_id(&import.debug_name));
        }
    }
    for function in &image.functions {
        assert_eq!(function.index as usize, names.len(), "function body out of order");
        names.push(sanitize_id(&function.debug_name));
    }

    for import in &image.imports {
        match &import.kind {
            ImportKind::Func { type_index } => {
                let func_type = match image.types.get(*type_index as usize) {
                    Some(TypeDef::Func(func_type)) => func_type,
                    _ => return Err(CompileError::emit("import with a non-function type").into()),
                };
                let mut decl = String::new();
                for &param in &func_type.params {
                    write!(decl, " (param {})", param).unwrap();
                }
                for &result in &func_type.results {
                    write!(decl, " (result {})", result).unwrap();
                }
                writeln!(
                    out,
                    "  (import {:?} {:?} (func ${}{}))",
                    import.module,
                    import.name,
                    sanitize_id(&import.debug_name),
                    decl
                )
                .unwrap();
            }
            ImportKind::Tag { type_index } => {
                writeln!(
                    out,
                    "  (import {:?} {:?} (tag $exception (type {})))",
                    import.module, import.name, type_index
                )
                .unwrap();
            }
        }
    }

    for (i, table) in image.tables.iter().enumerate() {
        match &table.export {
            Some(name) => writeln!(
                out,
                "  (table (;{};) (export {:?}) {} {})",
                i, name, table.min, table.element
            )
            .unwrap(),
            None => writeln!(out, "  (table (;{};) {} {})", i, table.min, table.element).unwrap(),
        }
    }
    if image.memory_pages > 0 {
        match &image.memory_export {
            Some(name) => {
                writeln!(out, "  (memory (export {:?}) {})", name, image.memory_pages).unwrap()
            }
            None => writeln!(out, "  (memory {})", image.memory_pages).unwrap(),
        }
    }
    for (i, global) in image.globals.iter().enumerate() {
        let init = const_text(&Instruction::Const(global.init));
        let ty = match global.mutable {
            true => format!("(mut {})", global.ty),
            false => format!("{}", global.ty),
        };
        match &global.export {
            Some(name) => writeln!(
                out,
                "  (global (;{};) (export {:?}) {} ({}))",
                i, name, ty, init
            )
            .unwrap(),
            None => writeln!(out, "  (global (;{};) {} ({}))", i, ty, init).unwrap(),
        }
    }

    for function in &image.functions {
        let func_type = match image.types.get(function.type_index as usize) {
            Some(TypeDef::Func(func_type)) => func_type,
            _ => return Err(CompileError::emit("function with a non-function type").into()),
        };
        let mut decl = String::new();
        for &param in &func_type.params {
            write!(decl, " (param {})", param).unwrap();
        }
        for &result in &func_type.results {
            write!(decl, " (result {})", result).unwrap();
        }
        writeln!(out, "  (func ${}{}", names[function.index as usize], decl).unwrap();
        if !function.locals.is_empty() {
            let mut locals = String::new();
            for &(count, ty) in &function.locals {
                for _ in 0..count {
                    write!(locals, " {}", ty).unwrap();
                }
            }
            writeln!(out, "    (local{})", locals).unwrap();
        }
        let mut depth: usize = 2;
        for instruction in &function.body {
            if matches!(instruction, Instruction::SourceLine(_)) {
                continue;
            }
            let dedent = matches!(
                instruction,
                Instruction::End
                    | Instruction::Else
                    | Instruction::Catch(_)
                    | Instruction::CatchAll
            );
            if dedent {
                depth = depth.saturating_sub(1);
            }
            for _ in 0..depth {
                out.push_str("  ");
            }
            out.push_str(&instruction_text(instruction, &names)?);
            out.push('\n');
            match instruction {
                Instruction::Block(_)
                | Instruction::Loop(_)
                | Instruction::If(_)
                | Instruction::Try(_) => depth += 1,
                Instruction::Else | Instruction::Catch(_) | Instruction::CatchAll => depth += 1,
                _ => {}
            }
        }
        out.push_str("  )\n");
    }

    for function in &image.functions {
        if let Some(name) = &function.export {
            writeln!(
                out,
                "  (export {:?} (func ${}))",
                name, names[function.index as usize]
            )
            .unwrap();
        }
    }
    if let Some(start) = image.start {
        writeln!(out, "  (start ${})", names[start as usize]).unwrap();
    }
    for element in &image.elements {
        let mut funcs = String::new();
        for &f in &element.functions {
            write!(funcs, " ${}", names[f as usize]).unwrap();
        }
        writeln!(out, "  (elem (i32.const {}){})", element.offset, funcs).unwrap();
    }
    for data in &image.data {
        writeln!(
            out,
            "  (data (i32.const {}) \"{}\")",
            data.offset,
            escape_bytes(&data.bytes)
        )
        .unwrap();
    }
    if let Some(url) = &image.source_map_url {
        writeln!(out, "  ;; @sourceMappingURL={}", url).unwrap();
    }
    out.push_str(")\n");
    Ok(out)
}

/// Maps a debug name onto the wat identifier character set. Parentheses from descriptors become
/// underscores; everything else JVM names contain is already legal.
pub fn sanitize_id(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            '_' | '.' | '$' | '/' | '<' | '>' | '!' | '-' | '*' | '+' | '#' | '%' | '&' | '|'
            | ':' | '\'' | '`' | '?' | '@' | '^' | '~' | '=' => c,
            _ => '_',
        })
        .collect()
}

fn storage_text(ty: StorageType) -> String {
    format!("{}", ty)
}

fn const_text(instruction: &Instruction) -> String {
    match instruction {
        Instruction::Const(Value::I32(v)) => format!("i32.const {}", v),
        Instruction::Const(Value::I64(v)) => format!("i64.const {}", v),
        Instruction::Const(Value::F32(v)) => format!("f32.const {}", float_text(*v as f64)),
        Instruction::Const(Value::F64(v)) => format!("f64.const {}", float_text(*v)),
        _ => unreachable!("constant expression expected"),
    }
}

fn float_text(v: f64) -> String {
    if v.is_nan() {
        // Display renders "NaN", the text format grammar wants lowercase
        return String::from("nan");
    }
    if v.is_infinite() {
        return String::from(if v < 0.0 { "-inf" } else { "inf" });
    }
    if v == v.trunc() && v.abs() < 1e15 {
        // Integral floats print with a trailing .0 like the reference printer
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn numeric_text(op: NumOp, ty: ValueType) -> Result<String, CompileError> {
    let is_float = matches!(ty, ValueType::F32 | ValueType::F64);
    let name = match (op, is_float) {
        (NumOp::Add, _) => "add",
        (NumOp::Sub, _) => "sub",
        (NumOp::Mul, _) => "mul",
        (NumOp::DivS, true) => "div",
        (NumOp::DivS, false) => "div_s",
        (NumOp::RemS, false) => "rem_s",
        (NumOp::And, false) => "and",
        (NumOp::Or, false) => "or",
        (NumOp::Xor, false) => "xor",
        (NumOp::Shl, false) => "shl",
        (NumOp::ShrS, false) => "shr_s",
        (NumOp::ShrU, false) => "shr_u",
        (NumOp::Eq, _) => "eq",
        (NumOp::Ne, _) => "ne",
        (NumOp::LtS, true) => "lt",
        (NumOp::LtS, false) => "lt_s",
        (NumOp::LeS, true) => "le",
        (NumOp::LeS, false) => "le_s",
        (NumOp::GtS, true) => "gt",
        (NumOp::GtS, false) => "gt_s",
        (NumOp::GeS, true) => "ge",
        (NumOp::GeS, false) => "ge_s",
        (NumOp::Eqz, false) => "eqz",
        (NumOp::Neg, true) => "neg",
        (NumOp::Trunc, true) => "trunc",
        (op, _) => {
            return Err(CompileError::emit(format!("no text for {:?} on {}", op, ty)))
        }
    };
    Ok(format!("{}.{}", ty, name))
}

fn conversion_text(kind: Conversion) -> &'static str {
    match kind {
        Conversion::I2L => "i64.extend_i32_s",
        Conversion::I2F => "f32.convert_i32_s",
        Conversion::I2D => "f64.convert_i32_s",
        Conversion::L2I => "i32.wrap_i64",
        Conversion::L2F => "f32.convert_i64_s",
        Conversion::L2D => "f64.convert_i64_s",
        Conversion::F2I => "i32.trunc_sat_f32_s",
        Conversion::F2L => "i64.trunc_sat_f32_s",
        Conversion::F2D => "f64.promote_f32",
        Conversion::D2I => "i32.trunc_sat_f64_s",
        Conversion::D2L => "i64.trunc_sat_f64_s",
        Conversion::D2F => "f32.demote_f64",
        Conversion::I2B => "i32.extend8_s",
        Conversion::I2S => "i32.extend16_s",
        Conversion::F2IRe => "i32.reinterpret_f32",
        Conversion::I2FRe => "f32.reinterpret_i32",
        Conversion::D2LRe => "i64.reinterpret_f64",
        Conversion::L2DRe => "f64.reinterpret_i64",
    }
}

fn block_type_text(bt: BlockType) -> String {
    match bt {
        BlockType::Empty => String::new(),
        BlockType::Result(ty) => format!(" (result {})", ty),
    }
}

fn instruction_text(instruction: &Instruction, names: &[String]) -> Result<String, CompileError> {
    Ok(match instruction {
        Instruction::Const(_) => const_text(instruction),
        Instruction::LocalGet(i) => format!("local.get {}", i),
        Instruction::LocalSet(i) => format!("local.set {}", i),
        Instruction::LocalTee(i) => format!("local.tee {}", i),
        Instruction::GlobalGet(i) => format!("global.get {}", i),
        Instruction::GlobalSet(i) => format!("global.set {}", i),
        Instruction::Numeric { op, ty } => numeric_text(*op, *ty)?,
        Instruction::Convert(kind) => conversion_text(*kind).to_string(),
        Instruction::Call(i) => match names.get(*i as usize) {
            Some(name) => format!("call ${}", name),
            None => format!("call {}", i),
        },
        Instruction::CallIndirect { type_index } => {
            format!("call_indirect (type {})", type_index)
        }
        Instruction::RefNull(ty) => match ty {
            ValueType::ExternRef => String::from("ref.null extern"),
            ValueType::FuncRef => String::from("ref.null func"),
            _ => String::from("ref.null eq"),
        },
        Instruction::RefIsNull => String::from("ref.is_null"),
        Instruction::RefEq => String::from("ref.eq"),
        Instruction::RefCast(type_index) => format!("ref.cast (ref null {})", type_index),
        Instruction::StructNew(i) => format!("struct.new {}", i),
        Instruction::StructNewDefault(i) => format!("struct.new_default {}", i),
        Instruction::StructGet { type_index, field, signed } => match signed {
            true => format!("struct.get_s {} {}", type_index, field),
            false => format!("struct.get {} {}", type_index, field),
        },
        Instruction::StructSet { type_index, field } => {
            format!("struct.set {} {}", type_index, field)
        }
        Instruction::ArrayNew(i) => format!("array.new_default {}", i),
        Instruction::ArrayGet { type_index, signed } => match signed {
            true => format!("array.get_s {}", type_index),
            false => format!("array.get {}", type_index),
        },
        Instruction::ArraySet(i) => format!("array.set {}", i),
        Instruction::ArrayLen => String::from("array.len"),
        Instruction::Load { ty, offset, align, signed } => {
            let name = match (ty, signed) {
                (StorageType::I8, true) => "load8_s",
                (StorageType::I8, false) => "load8_u",
                (StorageType::I16, true) => "load16_s",
                (StorageType::I16, false) => "load16_u",
                _ => "load",
            };
            mem_plain(name, *ty, *offset, *align)
        }
        Instruction::Store { ty, offset, align } => {
            let name = match ty {
                StorageType::I8 => "store8",
                StorageType::I16 => "store16",
                _ => "store",
            };
            mem_plain(name, *ty, *offset, *align)
        }
        Instruction::TableGet(i) => format!("table.get {}", i),
        Instruction::TableSet(i) => format!("table.set {}", i),
        Instruction::Block(bt) => format!("block{}", block_type_text(*bt)),
        Instruction::Loop(bt) => format!("loop{}", block_type_text(*bt)),
        Instruction::If(bt) => format!("if{}", block_type_text(*bt)),
        Instruction::Else => String::from("else"),
        Instruction::Try(bt) => format!("try{}", block_type_text(*bt)),
        Instruction::Catch(tag) => format!("catch {}", tag),
        Instruction::CatchAll => String::from("catch_all"),
        Instruction::Throw(tag) => format!("throw {}", tag),
        Instruction::Rethrow(depth) => format!("rethrow {}", depth),
        Instruction::End => String::from("end"),
        Instruction::Br(depth) => format!("br {}", depth),
        Instruction::BrIf(depth) => format!("br_if {}", depth),
        Instruction::BrTable { targets, default } => {
            let mut text = String::from("br_table");
            for target in targets {
                write!(text, " {}", target).unwrap();
            }
            write!(text, " {}", default).unwrap();
            text
        }
        Instruction::Return => String::from("return"),
        Instruction::Unreachable => String::from("unreachable"),
        Instruction::Drop => String::from("drop"),
        Instruction::Nop => String::from("nop"),
        Instruction::SourceLine(_) => String::new(),
    })
}

fn mem_plain(name: &str, ty: StorageType, offset: u32, align: u32) -> String {
    let prefix = match ty {
        StorageType::Val(v) => format!("{}", v),
        StorageType::I8 | StorageType::I16 => String::from("i32"),
    };
    let mut text = format!("{}.{}", prefix, name);
    if offset > 0 {
        write!(text, " offset={}", offset).unwrap();
    }
    if align != ty.align() {
        write!(text, " align={}", 1u32 << align).unwrap();
    }
    text
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(b as char),
            _ => {
                write!(out, "\\{:02x}", b).unwrap();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_descriptor_parentheses() {
        assert_eq!(sanitize_id("Test.add(II)I"), "Test.add_II_I");
        assert_eq!(sanitize_id("Test.<init>()V"), "Test.<init>__V");
    }

    #[test]
    fn data_bytes_are_escaped() {
        assert_eq!(escape_bytes(b"ab\"\x01"), "ab\\\"\\01");
    }

    #[test]
    fn numeric_text_strips_sign_suffix_for_floats() {
        assert_eq!(numeric_text(NumOp::DivS, ValueType::F32).unwrap(), "f32.div");
        assert_eq!(numeric_text(NumOp::DivS, ValueType::I32).unwrap(), "i32.div_s");
        assert_eq!(numeric_text(NumOp::LtS, ValueType::F64).unwrap(), "f64.lt");
    }

    #[test]
    fn float_constants_use_text_format_spellings() {
        assert_eq!(const_text(&Instruction::Const(Value::F32(f32::NAN))), "f32.const nan");
        assert_eq!(const_text(&Instruction::Const(Value::F64(f64::NAN))), "f64.const nan");
        assert_eq!(
            const_text(&Instruction::Const(Value::F64(f64::INFINITY))),
            "f64.const inf"
        );
        assert_eq!(
            const_text(&Instruction::Const(Value::F32(f32::NEG_INFINITY))),
            "f32.const -inf"
        );
        assert_eq!(const_text(&Instruction::Const(Value::F64(2.0))), "f64.const 2.0");
        assert_eq!(const_text(&Instruction::Const(Value::F64(0.5))), "f64.const 0.5");
    }
}
