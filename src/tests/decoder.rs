use crate::class::parse_class;
use crate::error::{find_compile_error, ErrorKind};
use crate::tests::helpers::*;

#[test]
fn bad_magic_fails_before_anything_else() {
    // Any input whose first four bytes are not CA FE BA BE is rejected outright
    let err = parse_class(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00]).unwrap_err();
    let compile = find_compile_error(&err).unwrap();
    assert_eq!(compile.kind, ErrorKind::Decode);
    assert!(compile.message.contains("magic"));
}

#[test]
fn truncated_class_is_a_decode_error() {
    let mut data = ClassBuilder::new("Test").build();
    data.truncate(data.len() - 3);
    let err = parse_class(&data).unwrap_err();
    assert_eq!(find_compile_error(&err).unwrap().kind, ErrorKind::Decode);
}

#[test]
fn parses_names_and_methods() {
    let mut builder = ClassBuilder::new("Test");
    // static int add(int, int) { return a + b; }
    builder.method(
        ACC_PUBLIC | ACC_STATIC,
        "add",
        "(II)I",
        2,
        2,
        &[0x1a, 0x1b, 0x60, 0xac],
    );
    let class = load(&builder.build());
    assert_eq!(*class.class_name, "Test");
    assert_eq!(class.super_class_name.as_deref().map(|s| s.as_str()), Some("java/lang/Object"));
    assert_eq!(class.methods.len(), 1);
    let method = &class.methods[0];
    assert_eq!(format!("{}", method.name), "Test.add(II)I");
    let code = method.code().unwrap().unwrap();
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 2);
    assert_eq!(code.bytecode.len(), 4);
}

#[test]
fn native_and_abstract_methods_have_no_code() {
    let mut builder = ClassBuilder::new("Test");
    builder.bodyless_method(ACC_PUBLIC | ACC_NATIVE, "log", "(I)V", vec![]);
    let class = load(&builder.build());
    assert!(class.methods[0].code().unwrap().is_none());
}

#[test]
fn decodes_exception_table_and_line_numbers() {
    let mut builder = ClassBuilder::new("Test");
    builder.method_with(
        ACC_PUBLIC | ACC_STATIC,
        "risky",
        "()I",
        1,
        1,
        // aconst_null, athrow, iconst_1, ireturn
        &[0x01, 0xbf, 0x04, 0xac],
        &[(0, 2, 2, 0)],
        &[(0, 10), (2, 12)],
        vec![],
    );
    let class = load(&builder.build());
    let code = class.methods[0].code().unwrap().unwrap();
    assert_eq!(code.exception_table.len(), 1);
    let handler = &code.exception_table[0];
    assert_eq!((handler.start, handler.end, handler.handler), (0, 2, 2));
    assert!(handler.catch_type.is_none()); // catch type 0 is a finally handler
    assert_eq!(code.line_at(1), Some(10));
    assert_eq!(code.line_at(3), Some(12));
}

#[test]
fn reads_method_annotations_with_elements() {
    let mut builder = ClassBuilder::new("Test");
    let annotations = builder.annotations(&[(
        "Lapi/annotation/Import;",
        &[("module", "M"), ("name", "f")],
    )]);
    builder.bodyless_method(ACC_PUBLIC | ACC_STATIC | ACC_NATIVE, "f", "(I)I", vec![annotations]);
    let class = load(&builder.build());
    let method = &class.methods[0];
    let import = crate::class::find_annotation(&method.annotations, "Import").unwrap();
    assert_eq!(import.type_name, "api.annotation.Import");
    assert_eq!(import.string_element("module"), Some("M"));
    assert_eq!(import.string_element("name"), Some("f"));
}

#[test]
fn partial_classes_merge_into_their_target() {
    let mut target = ClassBuilder::new("Target");
    target.method(ACC_PUBLIC | ACC_STATIC, "keep", "()I", 1, 0, &[0x04, 0xac]);
    let mut partial = ClassBuilder::new("Shim");
    partial.class_annotations(&[("Lapi/annotation/Partial;", &[("value", "Target")])]);
    partial.method(ACC_PUBLIC | ACC_STATIC, "extra", "()I", 1, 0, &[0x05, 0xac]);
    // A method the target already has must not be replaced
    partial.method(ACC_PUBLIC | ACC_STATIC, "keep", "()I", 1, 0, &[0x06, 0xac]);

    let mut target = load(&target.build());
    let partial = load(&partial.build());
    assert!(crate::class::partial_target(&partial).is_some());
    crate::class::merge_partial(&mut target, partial);

    assert_eq!(target.methods.len(), 2);
    let extra = target
        .methods
        .iter()
        .find(|m| m.name.name.as_str() == "extra")
        .unwrap();
    // Merged members are rebound to the target class
    assert_eq!(*extra.name.class_name, "Target");
    // The pre-existing method keeps its original body (iconst_1, not iconst_3)
    let keep = target
        .methods
        .iter()
        .find(|m| m.name.name.as_str() == "keep")
        .unwrap();
    let code = keep.code().unwrap().unwrap();
    assert_eq!(code.bytecode[0].1, crate::class::Opcode::Iconst(1));
}
