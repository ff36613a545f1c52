use crate::class::descriptors::{StorageType, ValueType};
use crate::error::CompileError;
use crate::function::{BlockType, Conversion, Instruction, NumOp, Value};
use lazy_static::lazy_static;
use maplit::hashmap;
use std::collections::HashMap;

lazy_static! {
    /// Mnemonics that take no operand.
    static ref SIMPLE: HashMap<&'static str, Instruction> = hashmap! {
        "unreachable" => Instruction::Unreachable,
        "nop" => Instruction::Nop,
        "drop" => Instruction::Drop,
        "return" => Instruction::Return,
        "else" => Instruction::Else,
        "end" => Instruction::End,
        "block" => Instruction::Block(BlockType::Empty),
        "loop" => Instruction::Loop(BlockType::Empty),
        "if" => Instruction::If(BlockType::Empty),
        "ref.is_null" => Instruction::RefIsNull,
        "i64.extend_i32_s" => Instruction::Convert(Conversion::I2L),
        "i32.wrap_i64" => Instruction::Convert(Conversion::L2I),
        "f32.convert_i32_s" => Instruction::Convert(Conversion::I2F),
        "f64.convert_i32_s" => Instruction::Convert(Conversion::I2D),
        "f32.convert_i64_s" => Instruction::Convert(Conversion::L2F),
        "f64.convert_i64_s" => Instruction::Convert(Conversion::L2D),
        "f64.promote_f32" => Instruction::Convert(Conversion::F2D),
        "f32.demote_f64" => Instruction::Convert(Conversion::D2F),
        "i32.trunc_sat_f32_s" => Instruction::Convert(Conversion::F2I),
        "i32.trunc_sat_f64_s" => Instruction::Convert(Conversion::D2I),
        "i64.trunc_sat_f32_s" => Instruction::Convert(Conversion::F2L),
        "i64.trunc_sat_f64_s" => Instruction::Convert(Conversion::D2L),
        "i32.extend8_s" => Instruction::Convert(Conversion::I2B),
        "i32.extend16_s" => Instruction::Convert(Conversion::I2S),
        "i32.reinterpret_f32" => Instruction::Convert(Conversion::F2IRe),
        "f32.reinterpret_i32" => Instruction::Convert(Conversion::I2FRe),
        "i64.reinterpret_f64" => Instruction::Convert(Conversion::D2LRe),
        "f64.reinterpret_i64" => Instruction::Convert(Conversion::L2DRe),
    };
}

fn numeric_ty(prefix: &str) -> Option<ValueType> {
    Some(match prefix {
        "i32" => ValueType::I32,
        "i64" => ValueType::I64,
        "f32" => ValueType::F32,
        "f64" => ValueType::F64,
        _ => return None,
    })
}

fn numeric_op(name: &str, float: bool) -> Option<NumOp> {
    Some(match (name, float) {
        ("add", _) => NumOp::Add,
        ("sub", _) => NumOp::Sub,
        ("mul", _) => NumOp::Mul,
        ("div_s", false) | ("div", true) => NumOp::DivS,
        ("rem_s", false) => NumOp::RemS,
        ("and", false) => NumOp::And,
        ("or", false) => NumOp::Or,
        ("xor", false) => NumOp::Xor,
        ("shl", false) => NumOp::Shl,
        ("shr_s", false) => NumOp::ShrS,
        ("shr_u", false) => NumOp::ShrU,
        ("eq", _) => NumOp::Eq,
        ("ne", _) => NumOp::Ne,
        ("lt_s", false) | ("lt", true) => NumOp::LtS,
        ("le_s", false) | ("le", true) => NumOp::LeS,
        ("gt_s", false) | ("gt", true) => NumOp::GtS,
        ("ge_s", false) | ("ge", true) => NumOp::GeS,
        ("eqz", false) => NumOp::Eqz,
        ("neg", true) => NumOp::Neg,
        ("trunc", true) => NumOp::Trunc,
        _ => return None,
    })
}

/// Parses the literal instruction text of a `@WasmTextCode` method body.
///
/// The grammar is a flat token stream: one mnemonic per instruction followed by its immediate.
/// Folded S-expressions are not accepted; memory instructions take an optional `offset=N`
/// token. Unknown mnemonics are unsupported, never silently skipped.
pub fn parse_wasm_text(text: &str) -> anyhow::Result<Vec<Instruction>> {
    let mut out = vec![];
    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Some(simple) = SIMPLE.get(token) {
            out.push(simple.clone());
            continue;
        }
        let mut operand = |what: &str| -> Result<String, CompileError> {
            tokens
                .next()
                .map(String::from)
                .ok_or_else(|| CompileError::decode(format!("wasm text: missing {}", what)))
        };
        let parsed = match token {
            "local.get" => Instruction::LocalGet(parse_index(&operand("local index")?)?),
            "local.set" => Instruction::LocalSet(parse_index(&operand("local index")?)?),
            "local.tee" => Instruction::LocalTee(parse_index(&operand("local index")?)?),
            "global.get" => Instruction::GlobalGet(parse_index(&operand("global index")?)?),
            "global.set" => Instruction::GlobalSet(parse_index(&operand("global index")?)?),
            "br" => Instruction::Br(parse_index(&operand("branch depth")?)?),
            "br_if" => Instruction::BrIf(parse_index(&operand("branch depth")?)?),
            "i32.const" => {
                let raw = operand("i32 constant")?;
                Instruction::Const(Value::I32(raw.parse().map_err(|_| {
                    CompileError::decode(format!("wasm text: bad i32 constant {}", raw))
                })?))
            }
            "i64.const" => {
                let raw = operand("i64 constant")?;
                Instruction::Const(Value::I64(raw.parse().map_err(|_| {
                    CompileError::decode(format!("wasm text: bad i64 constant {}", raw))
                })?))
            }
            "f32.const" => {
                let raw = operand("f32 constant")?;
                Instruction::Const(Value::F32(raw.parse().map_err(|_| {
                    CompileError::decode(format!("wasm text: bad f32 constant {}", raw))
                })?))
            }
            "f64.const" => {
                let raw = operand("f64 constant")?;
                Instruction::Const(Value::F64(raw.parse().map_err(|_| {
                    CompileError::decode(format!("wasm text: bad f64 constant {}", raw))
                })?))
            }
            _ => {
                // Numeric, load and store forms share the ty.name shape
                if let Some((prefix, name)) = token.split_once('.') {
                    if let Some(ty) = numeric_ty(prefix) {
                        let float = matches!(ty, ValueType::F32 | ValueType::F64);
                        if let Some(op) = numeric_op(name, float) {
                            out.push(Instruction::Numeric { op, ty });
                            continue;
                        }
                        if name == "load" || name == "store" {
                            let offset = parse_offset(&mut tokens)?;
                            let storage = StorageType::Val(ty);
                            out.push(match name {
                                "load" => Instruction::load(storage, offset, true),
                                _ => Instruction::store(storage, offset),
                            });
                            continue;
                        }
                    }
                }
                return Err(CompileError::unsupported(format!(
                    "wasm text mnemonic {}",
                    token
                ))
                .into());
            }
        };
        out.push(parsed);
    }
    Ok(out)
}

fn parse_index(raw: &str) -> Result<u32, CompileError> {
    raw.parse()
        .map_err(|_| CompileError::decode(format!("wasm text: bad index {}", raw)))
}

fn parse_offset(
    tokens: &mut std::iter::Peekable<std::str::SplitWhitespace<'_>>,
) -> Result<u32, CompileError> {
    match tokens.peek() {
        Some(token) if token.starts_with("offset=") => {
            let raw = &tokens.next().unwrap()["offset=".len()..];
            raw.parse()
                .map_err(|_| CompileError::decode(format!("wasm text: bad offset {}", raw)))
        }
        _ => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_instruction_stream() {
        let body = parse_wasm_text("local.get 0 i32.const 1 i32.add return").unwrap();
        assert_eq!(
            body,
            vec![
                Instruction::LocalGet(0),
                Instruction::Const(Value::I32(1)),
                Instruction::Numeric { op: NumOp::Add, ty: ValueType::I32 },
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn parses_memory_offsets() {
        let body = parse_wasm_text("local.get 0 i32.load offset=4").unwrap();
        assert_eq!(
            body[1],
            Instruction::Load {
                ty: StorageType::Val(ValueType::I32),
                offset: 4,
                align: 2,
                signed: true
            }
        );
    }

    #[test]
    fn unknown_mnemonics_fail_loudly() {
        let err = parse_wasm_text("v128.splat").unwrap_err();
        let compile = crate::error::find_compile_error(&err).unwrap();
        assert_eq!(compile.kind, crate::error::ErrorKind::Unsupported);
    }
}
