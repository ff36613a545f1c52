use crate::function::Inst::I;
use crate::function::{Inst, Instruction, Value};
use crate::options::Config;
use crate::tests::helpers::*;

fn body_of(code: &[u8], handlers: &[(u16, u16, u16, u16)], config: &Config) -> Vec<Inst> {
    let mut builder = ClassBuilder::new("Test");
    builder.method_with(
        ACC_PUBLIC | ACC_STATIC,
        "test",
        "(I)I",
        4,
        2,
        code,
        handlers,
        &[],
        vec![],
    );
    lower(&builder.build(), "test", config)
        .expect("lowering succeeds")
        .body
        .expect("method has a body")
}

#[test]
fn straight_line_method_has_no_frames() {
    let body = body_of(&[0x1a, 0x04, 0x60, 0xac], &[], &Config::default());
    assert_well_nested(&body);
    assert!(!body.iter().any(|i| matches!(i, I(Instruction::Block(_)))));
    assert_eq!(body.last(), Some(&I(Instruction::Return)));
}

#[test]
fn conditional_becomes_if_else() {
    // if (n == 0) return 1; return 0;
    // 0: iload_0, 1: ifne -> 6, 4: iconst_1, 5: ireturn, 6: iconst_0, 7: ireturn
    let body = body_of(&[0x1a, 0x9a, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac], &[], &Config::default());
    assert_well_nested(&body);
    let has_if = body.iter().any(|i| matches!(i, I(Instruction::If(_))));
    let has_else = body.iter().any(|i| matches!(i, I(Instruction::Else)));
    assert!(has_if && has_else);
}

#[test]
fn while_loop_becomes_loop_with_backward_branch() {
    // while (n > 0) n--; return n;
    // 0: iload_0, 1: ifle -> 10, 4: iinc 0 -1, 7: goto -> 0, 10: iload_0, 11: ireturn
    let code = [
        0x1a, 0x9e, 0x00, 0x09, 0x84, 0x00, 0xff, 0xa7, 0xff, 0xf9, 0x1a, 0xac,
    ];
    let body = body_of(&code, &[], &Config::default());
    assert_well_nested(&body);
    assert!(body.iter().any(|i| matches!(i, I(Instruction::Loop(_)))));
    // The back edge branches through at least one enclosing frame
    assert!(body
        .iter()
        .any(|i| matches!(i, I(Instruction::Br(k)) if *k >= 1)));
}

#[test]
fn tableswitch_lowers_to_nested_blocks_and_one_br_table() {
    // switch (n) { case 0: return 1; case 1: return 2; case 2: return 3; default: return 0; }
    let mut code = vec![0x1a, 0xaa, 0x00, 0x00];
    code.extend_from_slice(&33i32.to_be_bytes()); // default -> 34
    code.extend_from_slice(&0i32.to_be_bytes()); // low
    code.extend_from_slice(&2i32.to_be_bytes()); // high
    code.extend_from_slice(&27i32.to_be_bytes()); // -> 28
    code.extend_from_slice(&29i32.to_be_bytes()); // -> 30
    code.extend_from_slice(&31i32.to_be_bytes()); // -> 32
    code.extend_from_slice(&[0x04, 0xac, 0x05, 0xac, 0x06, 0xac, 0x03, 0xac]);
    let body = body_of(&code, &[], &Config::default());
    assert_well_nested(&body);

    let tables: Vec<&Inst> = body
        .iter()
        .filter(|i| matches!(i, I(Instruction::BrTable { .. })))
        .collect();
    assert_eq!(tables.len(), 1);
    match tables[0] {
        I(Instruction::BrTable { targets, default }) => {
            assert_eq!(targets, &[0, 1, 2]);
            assert_eq!(*default, 3); // The default depth is always provided
        }
        _ => unreachable!(),
    }
    let blocks = body
        .iter()
        .filter(|i| matches!(i, I(Instruction::Block(_))))
        .count();
    assert!(blocks >= 3, "expected the case ladder, found {} blocks", blocks);
}

#[test]
fn exception_handling_degrades_without_the_proposal() {
    // try { throw null; } catch (any) { return 1; }
    // 0: aconst_null, 1: athrow, 2: iconst_1, 3: ireturn
    let body = body_of(&[0x01, 0xbf, 0x04, 0xac], &[(0, 2, 2, 0)], &Config::default());
    assert_well_nested(&body);

    // Pinned degradation: try becomes block, throw becomes unreachable, the catch becomes a
    // branch past the handler body
    let positions: Vec<usize> = body
        .iter()
        .enumerate()
        .filter_map(|(i, inst)| match inst {
            I(Instruction::Block(_)) => Some(i),
            I(Instruction::Unreachable) => Some(i),
            I(Instruction::Br(0)) => Some(i),
            _ => None,
        })
        .collect();
    assert!(positions.len() >= 3, "missing degradation shape: {:?}", body);
    assert!(!body.iter().any(|i| matches!(i, I(Instruction::Try(_)))));
    assert!(!body.iter().any(|i| matches!(i, I(Instruction::Throw(_)))));
    // The catch arm body survives only behind the branch
    let br = body
        .iter()
        .position(|i| matches!(i, I(Instruction::Br(0))))
        .unwrap();
    let handler_const = body
        .iter()
        .position(|i| matches!(i, I(Instruction::Const(Value::I32(1)))))
        .unwrap();
    assert!(handler_const > br);
}

#[test]
fn exception_handling_uses_try_catch_when_enabled() {
    let config = Config { use_eh: true, ..Config::default() };
    let body = body_of(&[0x01, 0xbf, 0x04, 0xac], &[(0, 2, 2, 0)], &config);
    assert_well_nested(&body);
    assert!(body.iter().any(|i| matches!(i, I(Instruction::Try(_)))));
    assert!(body.iter().any(|i| matches!(i, I(Instruction::Throw(0)))));
    assert!(body.iter().any(|i| matches!(i, I(Instruction::Catch(0)))));
}

#[test]
fn monitor_instructions_are_accepted_and_dropped() {
    // synchronized-style body: aload_0 via reference param, monitorenter/exit, iconst_0 return
    let mut builder = ClassBuilder::new("Test");
    builder.method(
        ACC_PUBLIC | ACC_STATIC,
        "locked",
        "(Ljava/lang/Thread;)I",
        1,
        1,
        &[0x2a, 0xc2, 0x2a, 0xc3, 0x03, 0xac],
    );
    let compiled = lower(&builder.build(), "locked", &Config::default()).unwrap();
    let body = compiled.body.unwrap();
    assert_well_nested(&body);
    // Locks have no semantics here: each monitor instruction is a plain drop
    let drops = body
        .iter()
        .filter(|i| matches!(i, I(Instruction::Drop)))
        .count();
    assert_eq!(drops, 2);
}

#[test]
fn source_line_marks_precede_translated_code() {
    let mut builder = ClassBuilder::new("Test");
    builder.method_with(
        ACC_PUBLIC | ACC_STATIC,
        "lined",
        "()I",
        1,
        0,
        &[0x04, 0xac],
        &[],
        &[(0, 41)],
        vec![],
    );
    let body = lower(&builder.build(), "lined", &Config::default())
        .unwrap()
        .body
        .unwrap();
    assert_eq!(body[0], I(Instruction::SourceLine(41)));
}
