use crate::class::descriptors::{
    method_descriptor_parser, FieldDescriptor, MethodDescriptor, ReturnDescriptor, ValueType,
};
use crate::class::{Class, FieldRef, FunctionName, HandleKind, JAVA_LANG_OBJECT};
use crate::error::CompileError;
use crate::function::{Inst, Instruction};
use crate::options::Config;
use crate::output::functions::{FunctionKind, FunctionManager};
use crate::output::render::{Renderer, SyntheticFunction};
use crate::output::strings::StringPool;
use crate::virtuals::{ClassShape, FieldLocation, StructKind};
use std::collections::HashMap;
use std::rc::Rc;

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";
const STRING_CONCAT_FACTORY: &str = "java/lang/invoke/StringConcatFactory";

/// Identity of one `invokedynamic` call site.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DynamicKey {
    pub class_name: Rc<String>,
    pub bootstrap_index: u16,
    pub name: Rc<String>,
    pub descriptor: Rc<MethodDescriptor>,
}

/// How a planned call site lowers.
#[derive(Debug, Clone)]
pub enum DynamicPlan {
    /// Allocate the synthesized capture struct; its single virtual slot dispatches to the
    /// bridge calling the implementation method.
    Lambda { class_name: Rc<String>, captures: Vec<ValueType> },
    /// Call the synthesized recipe function.
    StringConcat { function: FunctionName },
}

/// A synthesized lambda bridge: unpacks the captured fields and tail-calls the implementation.
#[derive(Debug, Clone)]
pub struct BridgeSpec {
    pub function: FunctionName,
    pub implementation: FunctionName,
    pub lambda_class: Rc<String>,
    pub captures: Vec<(Rc<String>, Rc<FieldDescriptor>)>,
    pub sam_params: Vec<FieldDescriptor>,
}

/// One fragment of a string-concat recipe.
#[derive(Debug, Clone)]
pub enum ConcatPiece {
    Literal(Rc<String>),
    Arg(usize),
}

/// A synthesized string-concat function interleaving literal fragments with to-string
/// conversions of the dynamic arguments.
#[derive(Debug, Clone)]
pub struct ConcatSpec {
    pub function: FunctionName,
    pub pieces: Vec<ConcatPiece>,
    pub args: Vec<FieldDescriptor>,
}

/// Accumulated output of the `invokedynamic` planning scan.
#[derive(Default)]
pub struct DynamicPlans {
    pub plans: HashMap<DynamicKey, DynamicPlan>,
    pub lambda_shapes: Vec<ClassShape>,
    pub bridges: Vec<BridgeSpec>,
    pub concats: Vec<ConcatSpec>,
}

impl DynamicPlans {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scans a lowered body for `invokedynamic` call sites and plans their synthesis.
///
/// Dispatch on the bootstrap factory happens here, at translation time, not at run time: the
/// lambda meta-factory and the string-concat factory are the two supported families, everything
/// else fails hard. Returns the implementation methods the plans reference so the orchestrator
/// can extend its worklist.
pub fn plan_dynamic_sites(
    body: &[Inst],
    class: &Class,
    plans: &mut DynamicPlans,
    functions: &mut FunctionManager,
    strings: &mut StringPool,
    config: &Config,
) -> anyhow::Result<Vec<FunctionName>> {
    let mut discovered = vec![];
    for inst in body {
        let (name, descriptor, bootstrap_index) = match inst {
            Inst::InvokeDynamic { name, descriptor, bootstrap_index, .. } => {
                (name, descriptor, bootstrap_index)
            }
            _ => continue,
        };
        let key = DynamicKey {
            class_name: Rc::clone(&class.class_name),
            bootstrap_index: *bootstrap_index,
            name: Rc::clone(name),
            descriptor: Rc::clone(descriptor),
        };
        if plans.plans.contains_key(&key) {
            continue;
        }

        let bootstrap_methods = class.bootstrap_methods()?;
        let bootstrap = bootstrap_methods
            .get(*bootstrap_index as usize)
            .ok_or_else(|| {
                CompileError::decode(format!("bootstrap method {} out of range", bootstrap_index))
            })?;
        let factory = &bootstrap.handle.member;
        match (factory.class_name.as_str(), factory.name.as_str()) {
            (LAMBDA_METAFACTORY, "metafactory") | (LAMBDA_METAFACTORY, "altMetafactory") => {
                let plan = plan_lambda(&key, class, bootstrap, plans, functions, config)?;
                discovered.push(plan);
            }
            (STRING_CONCAT_FACTORY, "makeConcatWithConstants") => {
                plan_concat(&key, class, bootstrap, plans, functions, strings, config)?;
            }
            (factory_class, factory_name) => {
                return Err(CompileError::unsupported(format!(
                    "invokedynamic bootstrap factory {}.{}",
                    factory_class, factory_name
                ))
                .into());
            }
        }
    }
    Ok(discovered)
}

/// Plans a lambda call site: a fresh struct type whose fields are the captured variables and
/// whose vtable entry for the single abstract method points at the bridge to the implementation
/// referenced by the bootstrap handle.
fn plan_lambda(
    key: &DynamicKey,
    class: &Class,
    bootstrap: &crate::class::BootstrapMethod,
    plans: &mut DynamicPlans,
    functions: &mut FunctionManager,
    config: &Config,
) -> anyhow::Result<FunctionName> {
    // Static arguments: [0] erased SAM method type, [1] implementation handle, [2] specialized
    // method type
    let sam_descriptor_raw = bootstrap
        .arguments
        .first()
        .map(|&index| class.const_pool.method_type(index))
        .transpose()?
        .ok_or_else(|| CompileError::decode("lambda bootstrap without a SAM method type"))?;
    let (_, sam_descriptor) = method_descriptor_parser(&sam_descriptor_raw)
        .map_err(|_| CompileError::decode(format!("bad SAM descriptor {}", sam_descriptor_raw)))?;
    let implementation = bootstrap
        .arguments
        .get(1)
        .map(|&index| class.const_pool.method_handle(index))
        .transpose()?
        .ok_or_else(|| CompileError::decode("lambda bootstrap without an implementation"))?;
    if matches!(implementation.kind, HandleKind::GetField | HandleKind::PutField) {
        return Err(CompileError::unsupported("field method handles in lambdas").into());
    }

    // The functional interface is the call site descriptor's return type
    let interface = match &key.descriptor.returns {
        ReturnDescriptor::Field(FieldDescriptor::Object(interface)) => {
            Rc::new(interface.clone())
        }
        other => {
            return Err(CompileError::decode(format!(
                "lambda call site returning {:?}",
                other
            ))
            .into())
        }
    };

    let lambda_class = Rc::new(format!("{}$$Lambda${}", class.class_name, plans.plans.len()));
    let captures: Vec<(Rc<String>, Rc<FieldDescriptor>)> = key
        .descriptor
        .params
        .iter()
        .enumerate()
        .map(|(i, d)| (Rc::new(format!("cap${}", i)), Rc::new(d.clone())))
        .collect();

    let sam_descriptor = Rc::new(sam_descriptor);
    let bridge = FunctionName {
        class_name: Rc::clone(&lambda_class),
        name: Rc::clone(&key.name),
        descriptor: Rc::clone(&sam_descriptor),
    };
    // Register the bridge now so the vtable serialization can reference its id
    let this_type = match config.use_gc {
        true => ValueType::EqRef,
        false => ValueType::I32,
    };
    let bridge_type = sam_descriptor
        .function_type(config.use_gc)
        .with_implicit_this(this_type);
    functions.resolve(&bridge, &bridge_type, FunctionKind::Code)?;

    plans.lambda_shapes.push(ClassShape {
        name: Rc::clone(&lambda_class),
        super_name: Some(Rc::new(String::from(JAVA_LANG_OBJECT))),
        interfaces: vec![Rc::clone(&interface)],
        is_interface: false,
        kind: StructKind::Lambda,
        fields: captures.clone(),
        methods: vec![(bridge.clone(), false)],
    });
    plans.bridges.push(BridgeSpec {
        function: bridge,
        implementation: implementation.member.clone(),
        lambda_class: Rc::clone(&lambda_class),
        captures,
        sam_params: sam_descriptor.params.clone(),
    });
    plans.plans.insert(
        key.clone(),
        DynamicPlan::Lambda {
            class_name: lambda_class,
            captures: key
                .descriptor
                .params
                .iter()
                .map(|d| d.as_type(config.use_gc))
                .collect(),
        },
    );
    Ok(implementation.member)
}

/// Plans a string-concat call site: a fresh function interleaving the recipe's literal
/// fragments with to-string conversions of the dynamic arguments. The recipe marks dynamic
/// arguments with `\u{1}` and trailing constants with `\u{2}`.
fn plan_concat(
    key: &DynamicKey,
    class: &Class,
    bootstrap: &crate::class::BootstrapMethod,
    plans: &mut DynamicPlans,
    functions: &mut FunctionManager,
    strings: &mut StringPool,
    config: &Config,
) -> anyhow::Result<()> {
    let recipe = bootstrap
        .arguments
        .first()
        .map(|&index| class.const_pool.loadable(index))
        .transpose()?
        .and_then(|loadable| match loadable {
            crate::class::Loadable::Str(s) => Some(s),
            _ => None,
        })
        .ok_or_else(|| CompileError::decode("string concat bootstrap without a recipe"))?;

    let mut pieces = vec![];
    let mut literal = String::new();
    let mut next_constant = 1;
    let mut arg = 0;
    for c in recipe.chars() {
        match c {
            '\u{1}' => {
                if !literal.is_empty() {
                    pieces.push(ConcatPiece::Literal(Rc::new(std::mem::take(&mut literal))));
                }
                pieces.push(ConcatPiece::Arg(arg));
                arg += 1;
            }
            '\u{2}' => {
                let constant = bootstrap
                    .arguments
                    .get(next_constant)
                    .map(|&index| class.const_pool.loadable(index))
                    .transpose()?
                    .and_then(|loadable| match loadable {
                        crate::class::Loadable::Str(s) => Some(s),
                        _ => None,
                    })
                    .ok_or_else(|| CompileError::decode("missing string concat constant"))?;
                next_constant += 1;
                literal.push_str(&constant);
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        pieces.push(ConcatPiece::Literal(Rc::new(literal)));
    }
    // Intern all literals now; the pool freezes before bodies are generated
    for piece in &pieces {
        if let ConcatPiece::Literal(s) = piece {
            strings.intern(s)?;
        }
    }
    if pieces.is_empty() {
        // An empty recipe falls back to the empty string at generation time
        strings.intern(&Rc::new(String::new()))?;
    }

    let function = FunctionName {
        class_name: Rc::clone(&class.class_name),
        name: Rc::new(format!("concat${}", plans.concats.len())),
        descriptor: Rc::clone(&key.descriptor),
    };
    functions.resolve(
        &function,
        &key.descriptor.function_type(config.use_gc),
        FunctionKind::Code,
    )?;
    plans.concats.push(ConcatSpec {
        function: function.clone(),
        pieces,
        args: key.descriptor.params.clone(),
    });
    plans
        .plans
        .insert(key.clone(), DynamicPlan::StringConcat { function });
    Ok(())
}

/// Generates the bodies of all planned bridges and concat functions. Runs during rendering,
/// once layouts and helper ids are available.
pub fn generate_dynamic_bodies(renderer: &mut Renderer<'_>, plans: &DynamicPlans) -> anyhow::Result<()> {
    for bridge in &plans.bridges {
        generate_bridge(renderer, bridge)?;
    }
    for concat in &plans.concats {
        generate_concat(renderer, concat)?;
    }
    Ok(())
}

fn generate_bridge(renderer: &mut Renderer<'_>, spec: &BridgeSpec) -> anyhow::Result<()> {
    let id = renderer.functions.id_of(&spec.function)?;
    let implementation_id = renderer.functions.id_of(&spec.implementation)?;
    let mut body = vec![];
    // Captured values travel as fields of the receiver struct
    for (field_name, descriptor) in &spec.captures {
        let field = FieldRef {
            class_name: Rc::clone(&spec.lambda_class),
            name: Rc::clone(field_name),
            descriptor: Rc::clone(descriptor),
        };
        body.push(Instruction::LocalGet(0));
        match renderer.virtuals.field_location(&field)? {
            FieldLocation::Memory { ty, offset } => {
                body.push(Instruction::load(ty, offset, true));
            }
            FieldLocation::Struct { class_index, field: index, ty } => {
                let type_index = renderer.virtuals.get(class_index).type_index;
                body.push(Instruction::RefCast(type_index));
                body.push(Instruction::StructGet {
                    type_index,
                    field: index,
                    signed: matches!(
                        ty,
                        crate::class::descriptors::StorageType::I8
                            | crate::class::descriptors::StorageType::I16
                    ),
                });
            }
        }
    }
    // Then the abstract method's own arguments
    for i in 0..spec.sam_params.len() {
        body.push(Instruction::LocalGet(1 + i as u32));
    }
    body.push(Instruction::Call(implementation_id));
    renderer.push_synthetic(SyntheticFunction {
        id,
        debug_name: format!("{}", spec.function),
        locals: vec![],
        body,
    });
    Ok(())
}

fn generate_concat(renderer: &mut Renderer<'_>, spec: &ConcatSpec) -> anyhow::Result<()> {
    let id = renderer.functions.id_of(&spec.function)?;
    // Parameter locals follow the JVM convention: wide types advance the local index by one
    // here (wasm locals), so a simple running index suffices
    let mut body = vec![];
    let mut first = true;
    for piece in &spec.pieces {
        match piece {
            ConcatPiece::Literal(s) => {
                let index = renderer.strings.intern(s)?;
                let accessor = renderer.string_accessor()?;
                body.push(Instruction::Const(crate::function::Value::I32(index as i32)));
                body.push(Instruction::Call(accessor));
            }
            ConcatPiece::Arg(i) => {
                let descriptor = spec.args.get(*i).ok_or_else(|| {
                    CompileError::decode("string concat recipe argument out of range")
                })?;
                body.push(Instruction::LocalGet(*i as u32));
                let ty = descriptor.as_type(false);
                match ty {
                    ValueType::ExternRef => {}
                    ValueType::I32 if matches!(descriptor, FieldDescriptor::Object(_) | FieldDescriptor::Array(_)) => {
                        return Err(CompileError::unsupported(
                            "string concatenation of object arguments",
                        )
                        .into())
                    }
                    ValueType::I32 => body.push(Instruction::Call(renderer.runtime.str_i32)),
                    ValueType::I64 => body.push(Instruction::Call(renderer.runtime.str_i64)),
                    ValueType::F32 => body.push(Instruction::Call(renderer.runtime.str_f32)),
                    ValueType::F64 => body.push(Instruction::Call(renderer.runtime.str_f64)),
                    other => {
                        return Err(CompileError::unsupported(format!(
                            "string concatenation of {} arguments",
                            other
                        ))
                        .into())
                    }
                }
            }
        }
        if !first {
            body.push(Instruction::Call(renderer.runtime.concat));
        }
        first = false;
    }
    if first {
        // Empty recipe: the empty string
        let empty = Rc::new(String::new());
        let index = renderer.strings.intern(&empty)?;
        let accessor = renderer.string_accessor()?;
        body.push(Instruction::Const(crate::function::Value::I32(index as i32)));
        body.push(Instruction::Call(accessor));
    }
    renderer.push_synthetic(SyntheticFunction {
        id,
        debug_name: format!("{}", spec.function),
        locals: vec![],
        body,
    });
    Ok(())
}
