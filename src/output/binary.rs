use crate::class::descriptors::{StorageType, ValueType};
use crate::error::CompileError;
use crate::function::{BlockType, Conversion, Instruction, NumOp, Value};
use crate::output::types::{
    DataSegment, ElementSegment, ImportEntry, ImportKind, ModuleImage, TypeDef,
};

/// Encodes an unsigned integer as ULEB128.
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Encodes a signed integer as SLEB128.
pub fn write_sleb128(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let sign = byte & 0x40 != 0;
        if (value == 0 && !sign) || (value == -1 && sign) {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    write_uleb128(out, name.len() as u64);
    out.extend_from_slice(name.as_bytes());
}

fn value_type_byte(ty: ValueType) -> Result<u8, CompileError> {
    Ok(match ty {
        ValueType::I32 => 0x7F,
        ValueType::I64 => 0x7E,
        ValueType::F32 => 0x7D,
        ValueType::F64 => 0x7C,
        ValueType::FuncRef => 0x70,
        ValueType::ExternRef => 0x6F,
        ValueType::EqRef => 0x6D,
        ValueType::Ref(_) => 0x63, // ref null <type>, the index follows
        ValueType::Empty => return Err(CompileError::emit("empty type in binary position")),
    })
}

fn write_value_type(out: &mut Vec<u8>, ty: ValueType) -> Result<(), CompileError> {
    out.push(value_type_byte(ty)?);
    if let ValueType::Ref(index) = ty {
        write_sleb128(out, index as i64);
    }
    Ok(())
}

fn write_storage_type(out: &mut Vec<u8>, ty: StorageType) -> Result<(), CompileError> {
    match ty {
        StorageType::I8 => out.push(0x78),
        StorageType::I16 => out.push(0x77),
        StorageType::Val(v) => write_value_type(out, v)?,
    }
    Ok(())
}

fn write_block_type(out: &mut Vec<u8>, bt: BlockType) -> Result<(), CompileError> {
    match bt {
        BlockType::Empty => out.push(0x40),
        BlockType::Result(ty) => write_value_type(out, ty)?,
    }
    Ok(())
}

fn write_mem_arg(out: &mut Vec<u8>, align: u32, offset: u32) {
    write_uleb128(out, align as u64);
    write_uleb128(out, offset as u64);
}

fn numeric_opcode(op: NumOp, ty: ValueType) -> Result<u8, CompileError> {
    use NumOp::*;
    use ValueType::*;
    let opcode = match (ty, op) {
        (I32, Eqz) => 0x45,
        (I32, Eq) => 0x46,
        (I32, Ne) => 0x47,
        (I32, LtS) => 0x48,
        (I32, GtS) => 0x4A,
        (I32, LeS) => 0x4C,
        (I32, GeS) => 0x4E,
        (I32, Add) => 0x6A,
        (I32, Sub) => 0x6B,
        (I32, Mul) => 0x6C,
        (I32, DivS) => 0x6D,
        (I32, RemS) => 0x6F,
        (I32, And) => 0x71,
        (I32, Or) => 0x72,
        (I32, Xor) => 0x73,
        (I32, Shl) => 0x74,
        (I32, ShrS) => 0x75,
        (I32, ShrU) => 0x76,
        (I64, Eqz) => 0x50,
        (I64, Eq) => 0x51,
        (I64, Ne) => 0x52,
        (I64, LtS) => 0x53,
        (I64, GtS) => 0x55,
        (I64, LeS) => 0x57,
        (I64, GeS) => 0x59,
        (I64, Add) => 0x7C,
        (I64, Sub) => 0x7D,
        (I64, Mul) => 0x7E,
        (I64, DivS) => 0x7F,
        (I64, RemS) => 0x81,
        (I64, And) => 0x83,
        (I64, Or) => 0x84,
        (I64, Xor) => 0x85,
        (I64, Shl) => 0x86,
        (I64, ShrS) => 0x87,
        (I64, ShrU) => 0x88,
        (F32, Eq) => 0x5B,
        (F32, Ne) => 0x5C,
        (F32, LtS) => 0x5D,
        (F32, GtS) => 0x5E,
        (F32, LeS) => 0x5F,
        (F32, GeS) => 0x60,
        (F32, Neg) => 0x8C,
        (F32, Trunc) => 0x8F,
        (F32, Add) => 0x92,
        (F32, Sub) => 0x93,
        (F32, Mul) => 0x94,
        (F32, DivS) => 0x95,
        (F64, Eq) => 0x61,
        (F64, Ne) => 0x62,
        (F64, LtS) => 0x63,
        (F64, GtS) => 0x64,
        (F64, LeS) => 0x65,
        (F64, GeS) => 0x66,
        (F64, Neg) => 0x9A,
        (F64, Trunc) => 0x9F,
        (F64, Add) => 0xA0,
        (F64, Sub) => 0xA1,
        (F64, Mul) => 0xA2,
        (F64, DivS) => 0xA3,
        _ => {
            return Err(CompileError::emit(format!(
                "no encoding for {:?} on {}",
                op, ty
            )))
        }
    };
    Ok(opcode)
}

fn load_opcode(ty: StorageType, signed: bool) -> Result<u8, CompileError> {
    Ok(match (ty, signed) {
        (StorageType::Val(ValueType::I32), _) => 0x28,
        (StorageType::Val(ValueType::I64), _) => 0x29,
        (StorageType::Val(ValueType::F32), _) => 0x2A,
        (StorageType::Val(ValueType::F64), _) => 0x2B,
        (StorageType::I8, true) => 0x2C,
        (StorageType::I8, false) => 0x2D,
        (StorageType::I16, true) => 0x2E,
        (StorageType::I16, false) => 0x2F,
        (other, _) => {
            return Err(CompileError::emit(format!("no load encoding for {}", other)))
        }
    })
}

fn store_opcode(ty: StorageType) -> Result<u8, CompileError> {
    Ok(match ty {
        StorageType::Val(ValueType::I32) => 0x36,
        StorageType::Val(ValueType::I64) => 0x37,
        StorageType::Val(ValueType::F32) => 0x38,
        StorageType::Val(ValueType::F64) => 0x39,
        StorageType::I8 => 0x3A,
        StorageType::I16 => 0x3B,
        other => return Err(CompileError::emit(format!("no store encoding for {}", other))),
    })
}

fn conversion_bytes(kind: Conversion) -> &'static [u8] {
    match kind {
        Conversion::I2L => &[0xAC],
        Conversion::I2F => &[0xB2],
        Conversion::I2D => &[0xB7],
        Conversion::L2I => &[0xA7],
        Conversion::L2F => &[0xB4],
        Conversion::L2D => &[0xB9],
        // Float to integer uses the saturating 0xFC-prefixed forms
        Conversion::F2I => &[0xFC, 0x00],
        Conversion::F2L => &[0xFC, 0x04],
        Conversion::F2D => &[0xBB],
        Conversion::D2I => &[0xFC, 0x02],
        Conversion::D2L => &[0xFC, 0x06],
        Conversion::D2F => &[0xB6],
        Conversion::I2B => &[0xC0],
        Conversion::I2S => &[0xC1],
        Conversion::F2IRe => &[0xBC],
        Conversion::I2FRe => &[0xBE],
        Conversion::D2LRe => &[0xBD],
        Conversion::L2DRe => &[0xBF],
    }
}

/// Binary form of the module plus the code offsets recorded at each source line mark, for the
/// source map writer.
pub struct BinaryOutput {
    pub bytes: Vec<u8>,
    /// `(absolute byte offset in the file, source file, source line)` in emission order.
    pub mappings: Vec<(u32, String, u32)>,
}

/// Encodes a [`ModuleImage`] into the WebAssembly binary format.
///
/// Sections follow the canonical order, every size and index is ULEB128, signed immediates are
/// SLEB128 and floats are IEEE-754 little-endian. Instructions outside the 1.0 set use their
/// documented prefixes: GC `0xFB`, saturating truncation `0xFC` and the exception handling
/// opcodes `0x06`..`0x09`/`0x19`.
pub fn encode_module(image: &ModuleImage) -> anyhow::Result<BinaryOutput> {
    let mut sections: Vec<(u8, Vec<u8>)> = vec![];
    let mut code_mappings: Vec<(u32, String, u32)> = vec![];
    let mut scratch_marks: Vec<(u32, u32)> = vec![];

    // Type section (1)
    if !image.types.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.types.len() as u64);
        for ty in &image.types {
            match ty {
                TypeDef::Func(func_type) => {
                    body.push(0x60);
                    write_uleb128(&mut body, func_type.params.len() as u64);
                    for &param in &func_type.params {
                        write_value_type(&mut body, param)?;
                    }
                    write_uleb128(&mut body, func_type.results.len() as u64);
                    for &result in &func_type.results {
                        write_value_type(&mut body, result)?;
                    }
                }
                TypeDef::Struct { fields, .. } => {
                    body.push(0x5F);
                    write_uleb128(&mut body, fields.len() as u64);
                    for &(ty, mutable) in fields {
                        write_storage_type(&mut body, ty)?;
                        body.push(mutable as u8);
                    }
                }
                TypeDef::Array { element, .. } => {
                    body.push(0x5E);
                    write_storage_type(&mut body, *element)?;
                    body.push(1); // mutable
                }
            }
        }
        sections.push((1, body));
    }

    // Import section (2)
    if !image.imports.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.imports.len() as u64);
        for ImportEntry { module, name, kind, .. } in &image.imports {
            write_name(&mut body, module);
            write_name(&mut body, name);
            match kind {
                ImportKind::Func { type_index } => {
                    body.push(0x00);
                    write_uleb128(&mut body, *type_index as u64);
                }
                ImportKind::Tag { type_index } => {
                    body.push(0x04);
                    body.push(0x00); // exception attribute
                    write_uleb128(&mut body, *type_index as u64);
                }
            }
        }
        sections.push((2, body));
    }

    // Function section (3)
    if !image.functions.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.functions.len() as u64);
        for function in &image.functions {
            write_uleb128(&mut body, function.type_index as u64);
        }
        sections.push((3, body));
    }

    // Table section (4)
    if !image.tables.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.tables.len() as u64);
        for table in &image.tables {
            write_value_type(&mut body, table.element)?;
            body.push(0x00); // min only
            write_uleb128(&mut body, table.min as u64);
        }
        sections.push((4, body));
    }

    // Memory section (5)
    if image.memory_pages > 0 {
        let mut body = vec![];
        write_uleb128(&mut body, 1);
        body.push(0x00);
        write_uleb128(&mut body, image.memory_pages as u64);
        sections.push((5, body));
    }

    // Global section (6)
    if !image.globals.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.globals.len() as u64);
        for global in &image.globals {
            write_value_type(&mut body, global.ty)?;
            body.push(global.mutable as u8);
            encode_instruction(&mut body, &Instruction::Const(global.init), &mut scratch_marks)?;
            body.push(0x0B);
        }
        sections.push((6, body));
    }

    // Export section (7)
    {
        let mut exports: Vec<(String, u8, u32)> = vec![];
        for function in &image.functions {
            if let Some(name) = &function.export {
                exports.push((name.clone(), 0x00, function.index));
            }
        }
        for (i, table) in image.tables.iter().enumerate() {
            if let Some(name) = &table.export {
                exports.push((name.clone(), 0x01, i as u32));
            }
        }
        if let Some(name) = &image.memory_export {
            exports.push((name.clone(), 0x02, 0));
        }
        for (i, global) in image.globals.iter().enumerate() {
            if let Some(name) = &global.export {
                exports.push((name.clone(), 0x03, i as u32));
            }
        }
        if !exports.is_empty() {
            let mut body = vec![];
            write_uleb128(&mut body, exports.len() as u64);
            for (name, kind, index) in exports {
                write_name(&mut body, &name);
                body.push(kind);
                write_uleb128(&mut body, index as u64);
            }
            sections.push((7, body));
        }
    }

    // Start section (8)
    if let Some(start) = image.start {
        let mut body = vec![];
        write_uleb128(&mut body, start as u64);
        sections.push((8, body));
    }

    // Element section (9)
    if !image.elements.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.elements.len() as u64);
        for ElementSegment { table, offset, functions } in &image.elements {
            if *table != 0 {
                return Err(CompileError::emit("active elements only target table 0").into());
            }
            body.push(0x00);
            body.push(0x41); // i32.const offset
            write_sleb128(&mut body, *offset as i64);
            body.push(0x0B);
            write_uleb128(&mut body, functions.len() as u64);
            for &function in functions {
                write_uleb128(&mut body, function as u64);
            }
        }
        sections.push((9, body));
    }

    // Code section (10): per function a ULEB128 body size, run-length encoded locals, then the
    // instruction stream. Source line marks record their offset within this section's payload.
    let mut code_index = None;
    if !image.functions.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.functions.len() as u64);
        for function in &image.functions {
            let mut func = vec![];
            write_uleb128(&mut func, function.locals.len() as u64);
            for &(count, ty) in &function.locals {
                write_uleb128(&mut func, count as u64);
                write_value_type(&mut func, ty)?;
            }
            let mut marks = vec![];
            for instruction in &function.body {
                if let Instruction::SourceLine(line) = instruction {
                    marks.push((func.len() as u32, *line));
                    continue;
                }
                encode_instruction(&mut func, instruction, &mut marks)?;
            }
            func.push(0x0B); // end

            // Rebase this function's marks onto the section payload
            let mut size = vec![];
            write_uleb128(&mut size, func.len() as u64);
            let func_start = (body.len() + size.len()) as u32;
            if let Some(source_file) = &function.source_file {
                for (offset, line) in marks {
                    code_mappings.push((func_start + offset, source_file.clone(), line));
                }
            }
            body.extend_from_slice(&size);
            body.extend_from_slice(&func);
        }
        code_index = Some(sections.len());
        sections.push((10, body));
    }

    // Data section (11)
    if !image.data.is_empty() {
        let mut body = vec![];
        write_uleb128(&mut body, image.data.len() as u64);
        for DataSegment { offset, bytes } in &image.data {
            body.push(0x00);
            body.push(0x41);
            write_sleb128(&mut body, *offset as i64);
            body.push(0x0B);
            write_uleb128(&mut body, bytes.len() as u64);
            body.extend_from_slice(bytes);
        }
        sections.push((11, body));
    }

    // Custom sections: name, then sourceMappingURL
    if image.debug_names {
        let mut body = vec![];
        write_name(&mut body, "name");
        let mut subsection = vec![];
        let named: Vec<(u32, &str)> = image
            .imports
            .iter()
            .enumerate()
            .filter(|(_, i)| matches!(i.kind, ImportKind::Func { .. }))
            .map(|(i, import)| (i as u32, import.debug_name.as_str()))
            .chain(image.functions.iter().map(|f| (f.index, f.debug_name.as_str())))
            .collect();
        write_uleb128(&mut subsection, named.len() as u64);
        for (index, name) in named {
            write_uleb128(&mut subsection, index as u64);
            write_name(&mut subsection, name);
        }
        body.push(0x01); // function names
        write_uleb128(&mut body, subsection.len() as u64);
        body.extend_from_slice(&subsection);
        sections.push((0, body));
    }
    if let Some(url) = &image.source_map_url {
        let mut body = vec![];
        write_name(&mut body, "sourceMappingURL");
        write_name(&mut body, url);
        sections.push((0, body));
    }

    // Assemble: magic, version, then every section with its ULEB128 size
    let mut out = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
    let mut mappings = vec![];
    for (i, (id, body)) in sections.iter().enumerate() {
        out.push(*id);
        let mut size = vec![];
        write_uleb128(&mut size, body.len() as u64);
        out.extend_from_slice(&size);
        if Some(i) == code_index {
            let section_start = out.len() as u32;
            for (offset, file, line) in &code_mappings {
                mappings.push((section_start + offset, file.clone(), *line));
            }
        }
        out.extend_from_slice(body);
    }

    Ok(BinaryOutput { bytes: out, mappings })
}

fn encode_instruction(
    out: &mut Vec<u8>,
    instruction: &Instruction,
    _marks: &mut Vec<(u32, u32)>,
) -> Result<(), CompileError> {
    match instruction {
        Instruction::Const(Value::I32(v)) => {
            out.push(0x41);
            write_sleb128(out, *v as i64);
        }
        Instruction::Const(Value::I64(v)) => {
            out.push(0x42);
            write_sleb128(out, *v);
        }
        Instruction::Const(Value::F32(v)) => {
            out.push(0x43);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Instruction::Const(Value::F64(v)) => {
            out.push(0x44);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Instruction::LocalGet(i) => {
            out.push(0x20);
            write_uleb128(out, *i as u64);
        }
        Instruction::LocalSet(i) => {
            out.push(0x21);
            write_uleb128(out, *i as u64);
        }
        Instruction::LocalTee(i) => {
            out.push(0x22);
            write_uleb128(out, *i as u64);
        }
        Instruction::GlobalGet(i) => {
            out.push(0x23);
            write_uleb128(out, *i as u64);
        }
        Instruction::GlobalSet(i) => {
            out.push(0x24);
            write_uleb128(out, *i as u64);
        }
        Instruction::Numeric { op, ty } => out.push(numeric_opcode(*op, *ty)?),
        Instruction::Convert(kind) => out.extend_from_slice(conversion_bytes(*kind)),
        Instruction::Call(i) => {
            out.push(0x10);
            write_uleb128(out, *i as u64);
        }
        Instruction::CallIndirect { type_index } => {
            out.push(0x11);
            write_uleb128(out, *type_index as u64);
            write_uleb128(out, 0); // table 0
        }
        Instruction::RefNull(ty) => {
            out.push(0xD0);
            match ty {
                ValueType::ExternRef => out.push(0x6F),
                ValueType::FuncRef => out.push(0x70),
                _ => out.push(0x6D), // eq
            }
        }
        Instruction::RefIsNull => out.push(0xD1),
        Instruction::RefEq => out.push(0xD3),
        Instruction::RefCast(type_index) => {
            out.push(0xFB);
            write_uleb128(out, 23); // ref.cast (ref null t)
            write_sleb128(out, *type_index as i64);
        }
        Instruction::StructNew(type_index) => {
            out.push(0xFB);
            write_uleb128(out, 0);
            write_uleb128(out, *type_index as u64);
        }
        Instruction::StructNewDefault(type_index) => {
            out.push(0xFB);
            write_uleb128(out, 1);
            write_uleb128(out, *type_index as u64);
        }
        Instruction::StructGet { type_index, field, signed } => {
            out.push(0xFB);
            write_uleb128(out, if *signed { 3 } else { 2 });
            write_uleb128(out, *type_index as u64);
            write_uleb128(out, *field as u64);
        }
        Instruction::StructSet { type_index, field } => {
            out.push(0xFB);
            write_uleb128(out, 5);
            write_uleb128(out, *type_index as u64);
            write_uleb128(out, *field as u64);
        }
        Instruction::ArrayNew(type_index) => {
            out.push(0xFB);
            write_uleb128(out, 7); // array.new_default
            write_uleb128(out, *type_index as u64);
        }
        Instruction::ArrayGet { type_index, signed } => {
            out.push(0xFB);
            write_uleb128(out, if *signed { 12 } else { 11 });
            write_uleb128(out, *type_index as u64);
        }
        Instruction::ArraySet(type_index) => {
            out.push(0xFB);
            write_uleb128(out, 14);
            write_uleb128(out, *type_index as u64);
        }
        Instruction::ArrayLen => {
            out.push(0xFB);
            write_uleb128(out, 15);
        }
        Instruction::Load { ty, offset, align, signed } => {
            out.push(load_opcode(*ty, *signed)?);
            write_mem_arg(out, *align, *offset);
        }
        Instruction::Store { ty, offset, align } => {
            out.push(store_opcode(*ty)?);
            write_mem_arg(out, *align, *offset);
        }
        Instruction::TableGet(i) => {
            out.push(0x25);
            write_uleb128(out, *i as u64);
        }
        Instruction::TableSet(i) => {
            out.push(0x26);
            write_uleb128(out, *i as u64);
        }
        Instruction::Block(bt) => {
            out.push(0x02);
            write_block_type(out, *bt)?;
        }
        Instruction::Loop(bt) => {
            out.push(0x03);
            write_block_type(out, *bt)?;
        }
        Instruction::If(bt) => {
            out.push(0x04);
            write_block_type(out, *bt)?;
        }
        Instruction::Else => out.push(0x05),
        Instruction::Try(bt) => {
            out.push(0x06);
            write_block_type(out, *bt)?;
        }
        Instruction::Catch(tag) => {
            out.push(0x07);
            write_uleb128(out, *tag as u64);
        }
        Instruction::CatchAll => out.push(0x19),
        Instruction::Throw(tag) => {
            out.push(0x08);
            write_uleb128(out, *tag as u64);
        }
        Instruction::Rethrow(depth) => {
            out.push(0x09);
            write_uleb128(out, *depth as u64);
        }
        Instruction::End => out.push(0x0B),
        Instruction::Br(depth) => {
            out.push(0x0C);
            write_uleb128(out, *depth as u64);
        }
        Instruction::BrIf(depth) => {
            out.push(0x0D);
            write_uleb128(out, *depth as u64);
        }
        Instruction::BrTable { targets, default } => {
            out.push(0x0E);
            write_uleb128(out, targets.len() as u64);
            for &target in targets {
                write_uleb128(out, target as u64);
            }
            write_uleb128(out, *default as u64);
        }
        Instruction::Return => out.push(0x0F),
        Instruction::Unreachable => out.push(0x00),
        Instruction::Drop => out.push(0x1A),
        Instruction::Nop => out.push(0x01),
        Instruction::SourceLine(_) => {
            // Handled by the code section writer; reaching here means a mark escaped a body
            return Err(CompileError::emit("source line mark outside a function body"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb(value: u64) -> Vec<u8> {
        let mut out = vec![];
        write_uleb128(&mut out, value);
        out
    }

    fn sleb(value: i64) -> Vec<u8> {
        let mut out = vec![];
        write_sleb128(&mut out, value);
        out
    }

    #[test]
    fn uleb128_examples() {
        assert_eq!(uleb(0), vec![0x00]);
        assert_eq!(uleb(127), vec![0x7F]);
        assert_eq!(uleb(128), vec![0x80, 0x01]);
        assert_eq!(uleb(624485), vec![0xE5, 0x8E, 0x26]);
    }

    #[test]
    fn sleb128_examples() {
        assert_eq!(sleb(0), vec![0x00]);
        assert_eq!(sleb(-1), vec![0x7F]);
        assert_eq!(sleb(63), vec![0x3F]);
        assert_eq!(sleb(64), vec![0xC0, 0x00]);
        assert_eq!(sleb(-64), vec![0x40]);
        assert_eq!(sleb(-123456), vec![0xC0, 0xBB, 0x78]);
    }

    #[test]
    fn empty_module_is_just_the_header() {
        let image = ModuleImage::default();
        let output = encode_module(&image).unwrap();
        assert_eq!(
            output.bytes,
            vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn type_section_encodes_function_types() {
        use crate::class::descriptors::FunctionType;
        let mut image = ModuleImage::default();
        image.types.push(TypeDef::Func(FunctionType {
            params: vec![ValueType::I32, ValueType::I32],
            results: vec![ValueType::I32],
        }));
        let output = encode_module(&image).unwrap();
        // header, section id 1, size 7, one entry: 0x60 2 i32 i32 1 i32
        assert_eq!(
            &output.bytes[8..],
            &[0x01, 0x07, 0x01, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F]
        );
    }

    #[test]
    fn branches_carry_uleb_depths() {
        let mut out = vec![];
        encode_instruction(&mut out, &Instruction::Br(200), &mut vec![]).unwrap();
        assert_eq!(out, vec![0x0C, 0xC8, 0x01]);
    }
}
