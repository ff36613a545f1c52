use crate::options::Config;
use crate::tests::helpers::*;

fn exported_add_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("Test");
    let annotations = builder.annotations(&[("Lapi/annotation/Export;", &[])]);
    builder.method_with(
        ACC_PUBLIC | ACC_STATIC,
        "add",
        "(II)I",
        2,
        2,
        &[0x1a, 0x1b, 0x60, 0xac],
        &[],
        &[],
        vec![annotations],
    );
    builder.build()
}

#[test]
fn exported_add_compiles_to_expected_text() {
    let (text, glue) = compile_text(vec![exported_add_class()], Config::default()).unwrap();

    // The function body is three instructions over the two parameters
    assert!(text.contains("(func $Test.add_II_I (param i32) (param i32) (result i32)"), "{}", text);
    let body_start = text.find("$Test.add_II_I").unwrap();
    let body = &text[body_start..];
    let local0 = body.find("local.get 0").unwrap();
    let local1 = body.find("local.get 1").unwrap();
    let add = body.find("i32.add").unwrap();
    assert!(local0 < local1 && local1 < add);

    // The export entry maps the chosen name to that function
    assert!(text.contains("(export \"add\" (func $Test.add_II_I))"), "{}", text);
    // No @Import carried a js body, so no glue is produced
    assert!(glue.is_none());
}

#[test]
fn import_with_js_body_produces_import_and_glue() {
    let mut builder = ClassBuilder::new("Test");
    let annotations = builder.annotations(&[(
        "Lapi/annotation/Import;",
        &[("module", "M"), ("name", "f"), ("js", "(x)=>x+1")],
    )]);
    builder.bodyless_method(
        ACC_PUBLIC | ACC_STATIC | ACC_NATIVE,
        "f",
        "(I)I",
        vec![annotations],
    );
    // An exported caller keeps the import reachable
    let export = builder.annotations(&[("Lapi/annotation/Export;", &[])]);
    let call = builder.method_ref("Test", "f", "(I)I");
    let mut code = vec![0x1a, 0xb8];
    code.extend_from_slice(&call.to_be_bytes());
    code.push(0xac);
    builder.method_with(ACC_PUBLIC | ACC_STATIC, "call", "(I)I", 1, 1, &code, &[], &[], vec![export]);

    let (text, glue) = compile_text(vec![builder.build()], Config::default()).unwrap();
    assert!(
        text.contains("(import \"M\" \"f\" (func $Test.f_I_I (param i32) (result i32)))"),
        "{}",
        text
    );
    let glue = glue.unwrap();
    assert!(glue.contains("module.exports = {"));
    assert!(glue.contains("M: {"));
    assert!(glue.contains("f: (x)=>x+1,"));
}

#[test]
fn binary_output_starts_with_the_wasm_header() {
    let bytes = compile_binary(vec![exported_add_class()], Config::default()).unwrap();
    assert_eq!(&bytes[..8], &[0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]);
}

#[test]
fn emission_is_idempotent() {
    // Emitting the same class set twice produces byte-identical text
    let (first, _) = compile_text(vec![exported_add_class()], Config::default()).unwrap();
    let (second, _) = compile_text(vec![exported_add_class()], Config::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn string_literals_reach_the_data_section() {
    let mut builder = ClassBuilder::new("Test");
    let annotations = builder.annotations(&[("Lapi/annotation/Export;", &[])]);
    let hello = builder.string_const("hello, data");
    assert!(hello < 256);
    // ldc "hello, data"; astore_0; iconst_0; ireturn
    let code = vec![0x12, hello as u8, 0x4b, 0x03, 0xac];
    builder.method_with(ACC_PUBLIC | ACC_STATIC, "s", "()I", 1, 1, &code, &[], &[], vec![annotations]);

    let (text, _) = compile_text(vec![builder.build()], Config::default()).unwrap();
    assert!(text.contains("hello, data"), "{}", text);
    // The accessor goes through the string cache table
    assert!(text.contains("table.get 1"), "{}", text);
}

#[test]
fn virtual_calls_dispatch_through_the_vtable() {
    let mut builder = ClassBuilder::new("Test");
    builder.method(ACC_PUBLIC, "speak", "()I", 1, 1, &[0x04, 0xac]);
    let export = builder.annotations(&[("Lapi/annotation/Export;", &[])]);
    let callee = builder.method_ref("Test", "speak", "()I");
    // The receiver arrives as a parameter of the exported static caller
    let mut code = vec![0x2a, 0xb6];
    code.extend_from_slice(&callee.to_be_bytes());
    code.push(0xac);
    builder.method_with(
        ACC_PUBLIC | ACC_STATIC,
        "call",
        "(LTest;)I",
        2,
        1,
        &code,
        &[],
        &[],
        vec![export],
    );

    let (text, _) = compile_text(vec![builder.build()], Config::default()).unwrap();
    // The call site pushes the slot index and calls the shared dispatcher
    assert!(text.contains("call $!runtime.vdispatch"), "{}", text);
    assert!(text.contains("call_indirect"), "{}", text);
    // The instance method body made it into the module
    assert!(text.contains("$Test.speak__I"), "{}", text);
}

#[test]
fn source_map_renders_v3_fields() {
    let mut builder = ClassBuilder::new("Test");
    let annotations = builder.annotations(&[("Lapi/annotation/Export;", &[])]);
    builder.method_with(
        ACC_PUBLIC | ACC_STATIC,
        "add",
        "(II)I",
        2,
        2,
        &[0x1a, 0x1b, 0x60, 0xac],
        &[],
        &[(0, 7)],
        vec![annotations],
    );
    let config = Config { source_map: true, ..Config::default() };
    let mut compilation = crate::output::Compilation::new(config);
    compilation.add_class_bytes(&builder.build()).unwrap();
    let compiled = compilation
        .compile(crate::options::OutputFormat::Binary, Some(String::from("out.wasm.map")))
        .unwrap();
    let map = compiled.source_map.unwrap();
    assert!(map.contains("\"version\":3"));
    assert!(map.contains("\"names\":[]"));
    assert!(map.contains("\"mappings\""));
}
