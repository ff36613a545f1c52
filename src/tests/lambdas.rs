use crate::function::lower_function;
use crate::options::Config;
use crate::output::dynamic::{plan_dynamic_sites, DynamicPlan, DynamicPlans};
use crate::output::functions::FunctionManager;
use crate::output::render::register_runtime_imports;
use crate::output::strings::StringPool;
use crate::tests::helpers::*;
use crate::virtuals::StructKind;

/// `Runnable r = () -> lambda$run$0(); return r;` as a class image: the call site references a
/// LambdaMetafactory bootstrap whose implementation handle points at the synthetic body.
fn lambda_class() -> Vec<u8> {
    let mut builder = ClassBuilder::new("Test");
    builder.method(
        ACC_STATIC | ACC_SYNTHETIC,
        "lambda$run$0",
        "()V",
        0,
        0,
        &[0xb1],
    );
    let factory = builder.method_ref(
        "java/lang/invoke/LambdaMetafactory",
        "metafactory",
        "()Ljava/lang/invoke/CallSite;",
    );
    let factory_handle = builder.method_handle(6, factory);
    let sam_type = builder.method_type("()V");
    let implementation = builder.method_ref("Test", "lambda$run$0", "()V");
    let implementation_handle = builder.method_handle(6, implementation);
    let specialized = builder.method_type("()V");
    let bootstrap =
        builder.bootstrap_method(factory_handle, &[sam_type, implementation_handle, specialized]);
    let call_site = builder.invoke_dynamic(bootstrap, "run", "()Ljava/lang/Runnable;");
    // invokedynamic; areturn
    let mut code = vec![0xba];
    code.extend_from_slice(&call_site.to_be_bytes());
    code.extend_from_slice(&[0x00, 0x00, 0xb0]);
    builder.method(ACC_PUBLIC | ACC_STATIC, "make", "()Ljava/lang/Runnable;", 1, 0, &code);
    builder.build()
}

#[test]
fn lambda_call_site_synthesizes_a_capture_struct() {
    let config = Config::default();
    let class = load(&lambda_class());
    let method = class
        .methods
        .iter()
        .find(|m| m.name.name.as_str() == "make")
        .unwrap();
    let compiled = lower_function(method, &config).unwrap();
    let body = compiled.body.unwrap();

    let mut plans = DynamicPlans::new();
    let mut functions = FunctionManager::new();
    register_runtime_imports(&mut functions, &config).unwrap();
    functions.freeze_imports().unwrap();
    let mut strings = StringPool::new();
    let discovered =
        plan_dynamic_sites(&body, &class, &mut plans, &mut functions, &mut strings, &config)
            .unwrap();

    // The implementation method joins the reachable set
    assert_eq!(discovered.len(), 1);
    assert_eq!(format!("{}", discovered[0]), "Test.lambda$run$0()V");

    // A fresh struct type with the functional interface and no captured fields
    assert_eq!(plans.lambda_shapes.len(), 1);
    let shape = &plans.lambda_shapes[0];
    assert_eq!(shape.kind, StructKind::Lambda);
    assert_eq!(shape.interfaces.len(), 1);
    assert_eq!(*shape.interfaces[0], "java/lang/Runnable");
    assert!(shape.fields.is_empty());
    // Its single virtual slot points at the bridge for the implementation
    assert_eq!(shape.methods.len(), 1);
    assert_eq!(*shape.methods[0].0.name, "run");

    assert_eq!(plans.bridges.len(), 1);
    let bridge = &plans.bridges[0];
    assert_eq!(format!("{}", bridge.implementation), "Test.lambda$run$0()V");

    match plans.plans.values().next().unwrap() {
        DynamicPlan::Lambda { class_name, captures } => {
            assert!(class_name.starts_with("Test$$Lambda$"));
            assert!(captures.is_empty());
        }
        other => panic!("expected a lambda plan, got {:?}", other),
    }
}

#[test]
fn unknown_bootstrap_factories_fail_hard() {
    let mut builder = ClassBuilder::new("Test");
    let factory = builder.method_ref("java/lang/invoke/Weird", "factory", "()V");
    let handle = builder.method_handle(6, factory);
    let bootstrap = builder.bootstrap_method(handle, &[]);
    let call_site = builder.invoke_dynamic(bootstrap, "x", "()Ljava/lang/Runnable;");
    let mut code = vec![0xba];
    code.extend_from_slice(&call_site.to_be_bytes());
    code.extend_from_slice(&[0x00, 0x00, 0xb0]);
    builder.method(ACC_PUBLIC | ACC_STATIC, "make", "()Ljava/lang/Runnable;", 1, 0, &code);

    let config = Config::default();
    let class = load(&builder.build());
    let method = class.methods.iter().find(|m| m.name.name.as_str() == "make").unwrap();
    let body = lower_function(method, &config).unwrap().body.unwrap();

    let mut plans = DynamicPlans::new();
    let mut functions = FunctionManager::new();
    functions.freeze_imports().unwrap();
    let mut strings = StringPool::new();
    let err = plan_dynamic_sites(&body, &class, &mut plans, &mut functions, &mut strings, &config)
        .unwrap_err();
    let compile = crate::error::find_compile_error(&err).unwrap();
    assert_eq!(compile.kind, crate::error::ErrorKind::Unsupported);
    assert!(compile.message.contains("Weird"));
}

#[test]
fn string_concat_sites_plan_a_recipe_function() {
    let mut builder = ClassBuilder::new("Test");
    let factory = builder.method_ref(
        "java/lang/invoke/StringConcatFactory",
        "makeConcatWithConstants",
        "()Ljava/lang/invoke/CallSite;",
    );
    let handle = builder.method_handle(6, factory);
    let recipe = builder.string_const("n = \u{1}!");
    let bootstrap = builder.bootstrap_method(handle, &[recipe]);
    let call_site =
        builder.invoke_dynamic(bootstrap, "makeConcatWithConstants", "(I)Ljava/lang/String;");
    // iload_0; invokedynamic; areturn
    let mut code = vec![0x1a, 0xba];
    code.extend_from_slice(&call_site.to_be_bytes());
    code.extend_from_slice(&[0x00, 0x00, 0xb0]);
    builder.method(ACC_PUBLIC | ACC_STATIC, "fmt", "(I)Ljava/lang/String;", 2, 1, &code);

    let config = Config::default();
    let class = load(&builder.build());
    let method = class.methods.iter().find(|m| m.name.name.as_str() == "fmt").unwrap();
    let body = lower_function(method, &config).unwrap().body.unwrap();

    let mut plans = DynamicPlans::new();
    let mut functions = FunctionManager::new();
    register_runtime_imports(&mut functions, &config).unwrap();
    functions.freeze_imports().unwrap();
    let mut strings = StringPool::new();
    plan_dynamic_sites(&body, &class, &mut plans, &mut functions, &mut strings, &config).unwrap();

    assert_eq!(plans.concats.len(), 1);
    let concat = &plans.concats[0];
    // The recipe interleaves the literal fragments with the dynamic argument
    assert_eq!(concat.pieces.len(), 3);
    assert!(matches!(&concat.pieces[0], crate::output::dynamic::ConcatPiece::Literal(s) if s.as_str() == "n = "));
    assert!(matches!(&concat.pieces[1], crate::output::dynamic::ConcatPiece::Arg(0)));
    assert!(matches!(&concat.pieces[2], crate::output::dynamic::ConcatPiece::Literal(s) if s.as_str() == "!"));
    // Literals are interned before the pool freezes
    assert_eq!(strings.len(), 2);
}
