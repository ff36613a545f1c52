use crate::class::descriptors::{FunctionType, ValueType};
use crate::class::{
    find_annotation, merge_partial, parse_class, partial_target, Class, Function, FunctionName,
    JAVA_LANG_OBJECT,
};
use crate::error::CompileError;
use crate::function::locals::LocalAllocation;
use crate::function::{lower_function, CompiledFunction, Inst, Instruction};
use crate::options::{Config, OutputFormat};
use crate::output::dynamic::{generate_dynamic_bodies, plan_dynamic_sites, DynamicPlans};
use crate::output::functions::{
    synthetic_name, FunctionKind, FunctionManager, GlobalManager,
};
use crate::output::glue::JsGlue;
use crate::output::render::{register_runtime_imports, Renderer, RuntimeImports};
use crate::output::sourcemap::SourceMapBuilder;
use crate::output::strings::{serialize_tables, DispatchArraySpec, StringPool};
use crate::output::types::{
    DataSegment, ElementSegment, FunctionBody, GlobalDef, ImportEntry, ImportKind, ModuleImage,
    TableDef, TypeDef,
};
use crate::output::{binary, text, wat};
use crate::virtuals::{ClassShape, StructKind, VirtualTable};
use anyhow::Context;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory offset where the serialized metadata stream begins; offset 0 stays reserved as the
/// null reference, 8-byte aligned.
const DATA_BASE: u32 = 8;

/// Finished compilation outputs.
pub struct CompiledModule {
    /// UTF-8 text or binary module bytes, depending on the requested format.
    pub module: Vec<u8>,
    pub source_map: Option<String>,
    pub js_glue: Option<String>,
}

/// The module orchestrator: owns every manager, drives the two-pass compilation and feeds the
/// chosen emitter.
///
/// The **prepare** pass walks every input class, registers types, imports, exports and the
/// start method, and seeds the worklist with the entry points. The **finish** pass drains the
/// worklist, loading library classes on demand and lowering each method; referenced functions
/// and virtual slots extend the worklist. Finalization freezes the string and type tables,
/// renders every body and closes the emitter.
///
/// All managers are fields of this value, never process-wide state, so concurrent compilations
/// cannot interfere.
pub struct Compilation {
    config: Config,
    cancel: Arc<AtomicBool>,
    classes: HashMap<Rc<String>, Class>,
    class_order: Vec<Rc<String>>,
    pending_partials: HashMap<String, Vec<Class>>,
    libraries: Vec<PathBuf>,
    functions: FunctionManager,
    globals: GlobalManager,
    strings: StringPool,
    plans: DynamicPlans,
    glue: JsGlue,
    runtime: Option<RuntimeImports>,
    worklist: VecDeque<FunctionName>,
    processed: HashSet<FunctionName>,
    lowered: HashMap<FunctionName, CompiledFunction>,
    literal_bodies: HashMap<FunctionName, Vec<Instruction>>,
    replacements: HashMap<String, FunctionName>,
    referenced_virtuals: Vec<FunctionName>,
    class_initializers: Vec<FunctionName>,
    source_files: HashMap<Rc<String>, String>,
}

impl Compilation {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            classes: HashMap::new(),
            class_order: vec![],
            pending_partials: HashMap::new(),
            libraries: vec![],
            functions: FunctionManager::new(),
            globals: GlobalManager::new(),
            strings: StringPool::new(),
            plans: DynamicPlans::new(),
            glue: JsGlue::new(),
            runtime: None,
            worklist: VecDeque::new(),
            processed: HashSet::new(),
            lowered: HashMap::new(),
            literal_bodies: HashMap::new(),
            replacements: HashMap::new(),
            referenced_virtuals: vec![],
            class_initializers: vec![],
            source_files: HashMap::new(),
        }
    }

    /// Cooperative cancellation flag, checked between method translations.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Adds a primary input class from its raw bytes. The stream is consumed here; nothing is
    /// retained beyond the parsed class.
    pub fn add_class_bytes(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let class = parse_class(data).context("unable to load class")?;
        class.dump();
        self.insert_class(class);
        Ok(())
    }

    /// Appends a library archive to the classpath; archives are searched in addition order and
    /// opened lazily.
    pub fn add_library(&mut self, path: PathBuf) {
        self.libraries.push(path);
    }

    fn insert_class(&mut self, class: Class) {
        if let Some(target) = partial_target(&class) {
            // Merge now if the target is present, otherwise when it loads
            if let Some(existing) = self.classes.get_mut(&String::from(target.as_str())) {
                merge_partial(existing, class);
            } else {
                self.pending_partials.entry(target).or_default().push(class);
            }
            return;
        }
        let name = Rc::clone(&class.class_name);
        if let Some(pending) = self.pending_partials.remove(name.as_str()) {
            let mut class = class;
            for partial in pending {
                merge_partial(&mut class, partial);
            }
            self.class_order.push(Rc::clone(&name));
            self.classes.insert(name, class);
            return;
        }
        self.class_order.push(Rc::clone(&name));
        self.classes.insert(name, class);
    }

    /// Runs the whole compilation and returns the emitted module.
    ///
    /// `source_map_url` names the sidecar map in the module's `sourceMappingURL` custom section
    /// (binary) or trailer comment (text).
    pub fn compile(
        mut self,
        format: OutputFormat,
        source_map_url: Option<String>,
    ) -> anyhow::Result<CompiledModule> {
        self.prepare()?;
        self.finish()?;
        self.finalize(format, source_map_url)
    }

    /// Prepare pass: registers imports, exports and the start method over every input class and
    /// seeds the worklist. Imports register first across all classes so their dense ids occupy
    /// the leading function indices; after this pass the import index space is frozen.
    fn prepare(&mut self) -> anyhow::Result<()> {
        log::info!("Preparing {} input class(es)...", self.classes.len());
        self.runtime = Some(register_runtime_imports(&mut self.functions, &self.config)?);

        for class_name in self.class_order.clone() {
            let class = &self.classes[&class_name];
            let methods: Vec<Rc<Function>> = class.methods.clone();
            if let Some(source_file) = class.source_file()? {
                self.source_files
                    .insert(Rc::clone(&class_name), source_file.to_string());
            }
            for method in methods {
                self.prepare_import(&method)?;
            }
        }
        self.functions.freeze_imports()?;

        for class_name in self.class_order.clone() {
            let methods: Vec<Rc<Function>> = self.classes[&class_name].methods.clone();
            for method in methods {
                self.prepare_entry(&method)?;
            }
        }

        if !self.class_initializers.is_empty() {
            self.functions.resolve(
                &start_name(),
                &FunctionType { params: vec![], results: vec![] },
                FunctionKind::Start,
            )?;
        }
        Ok(())
    }

    fn prepare_import(&mut self, method: &Function) -> anyhow::Result<()> {
        let name = &method.name;
        if let Some(import) = find_annotation(&method.annotations, "Import") {
            // The method body, if any, is ignored: only the import declaration survives
            let module = import.string_element("module").unwrap_or("imports").to_string();
            let import_name = import
                .string_element("name")
                .map(String::from)
                .unwrap_or_else(|| name.name.to_string());
            if let Some(js) = import.string_element("js") {
                self.glue.add(&module, &import_name, js);
            }
            self.functions.resolve(
                name,
                &self.signature_type(method),
                FunctionKind::Imported { module, name: import_name, js: None },
            )?;
            self.processed.insert(name.clone());
        } else if method.is_native() {
            // Plain native methods import under their full signature
            self.functions.resolve(
                name,
                &self.signature_type(method),
                FunctionKind::Imported {
                    module: String::from("imports"),
                    name: format!("{}", name),
                    js: None,
                },
            )?;
            self.processed.insert(name.clone());
        }
        Ok(())
    }

    fn prepare_entry(&mut self, method: &Function) -> anyhow::Result<()> {
        let name = &method.name;
        if self.processed.contains(name) {
            return Ok(()); // Imported during the first sweep
        }

        if let Some(replace) = find_annotation(&method.annotations, "Replace") {
            if let Some(target) = replace
                .string_element("value")
                .or_else(|| replace.string_element("target"))
            {
                let target_class = target.replace('.', "/");
                let key = format!("{}.{}{}", target_class, name.name, name.descriptor);
                self.replacements.insert(key, name.clone());
            }
            return Ok(());
        }

        if let Some(export) = find_annotation(&method.annotations, "Export") {
            let export_name = export
                .string_element("value")
                .or_else(|| export.string_element("name"))
                .map(String::from)
                .unwrap_or_else(|| name.name.to_string());
            let id = self.functions.resolve(
                name,
                &self.signature_type(method),
                FunctionKind::Code,
            )?;
            self.functions.set_export(id, export_name);
            self.worklist.push_back(name.clone());
        }

        if name.name.as_str() == "<clinit>" {
            self.class_initializers.push(name.clone());
            self.worklist.push_back(name.clone());
        }
        Ok(())
    }

    /// Function type of a method, with the implicit receiver for instance methods.
    fn signature_type(&self, method: &Function) -> FunctionType {
        let func_type = method.name.descriptor.function_type(self.config.use_gc);
        match method.is_static() {
            true => func_type,
            false => func_type.with_implicit_this(self.reference_type()),
        }
    }

    fn reference_type(&self) -> ValueType {
        match self.config.use_gc {
            true => ValueType::EqRef,
            false => ValueType::I32,
        }
    }

    /// Finish pass: drains the worklist, lowering one method at a time and discovering new
    /// reachable functions, until a fixed point also covers every override of a referenced
    /// virtual slot.
    fn finish(&mut self) -> anyhow::Result<()> {
        loop {
            while let Some(name) = self.worklist.pop_front() {
                if self.cancel.load(Ordering::Relaxed) {
                    return Err(CompileError::cancelled().into());
                }
                self.process(&name)
                    .with_context(|| format!("unable to compile {}", name))?;
            }
            if !self.enqueue_virtual_overrides() {
                return Ok(());
            }
        }
    }

    /// Enqueues loaded overrides of every referenced virtual slot. Returns whether anything new
    /// was scheduled.
    fn enqueue_virtual_overrides(&mut self) -> bool {
        let mut scheduled = false;
        for slot in self.referenced_virtuals.clone() {
            // Registration order, not map order: function ids must come out deterministic
            for class_name in self.class_order.clone() {
                let class = &self.classes[&class_name];
                for method in &class.methods {
                    if method.is_static()
                        || method.name.name != slot.name
                        || method.name.descriptor != slot.descriptor
                    {
                        continue;
                    }
                    if !self.processed.contains(&method.name) {
                        self.worklist.push_back(method.name.clone());
                        scheduled = true;
                    }
                }
            }
        }
        scheduled
    }

    /// Lowered function names in dense id order, for deterministic scanning and rendering.
    fn lowered_in_id_order(&self) -> Vec<FunctionName> {
        let mut names: Vec<(u32, FunctionName)> = self
            .lowered
            .keys()
            .filter_map(|name| self.functions.id_of(name).ok().map(|id| (id, name.clone())))
            .collect();
        names.sort_by_key(|(id, _)| *id);
        names.into_iter().map(|(_, name)| name).collect()
    }

    fn process(&mut self, name: &FunctionName) -> anyhow::Result<()> {
        if self.processed.contains(name) {
            return Ok(());
        }
        self.processed.insert(name.clone());

        // A replacement substitutes its body for the target in the reachable set
        let source = match self.replacements.get(&format!("{}", name)) {
            Some(replacement) => replacement.clone(),
            None => name.clone(),
        };

        self.ensure_class(&source.class_name)?;
        let class = self.classes.get(&source.class_name).ok_or_else(|| {
            CompileError::link(format!("class {} has no definition", source.class_name))
        })?;
        let method = class
            .methods
            .iter()
            .find(|m| m.name.name == source.name && m.name.descriptor == source.descriptor)
            .cloned()
            .ok_or_else(|| CompileError::link(format!("method {} not found", source)))?;

        let kind = match method.is_abstract() {
            true => FunctionKind::Abstract,
            false => FunctionKind::Code,
        };
        if method.is_native() {
            // Library natives surface here; primary natives were imported during prepare
            self.functions.resolve(
                name,
                &self.signature_type(&method),
                FunctionKind::Imported {
                    module: String::from("imports"),
                    name: format!("{}", name),
                    js: None,
                },
            )?;
            return Ok(());
        }
        self.functions
            .resolve(name, &self.signature_type(&method), kind)?;
        if method.is_abstract() {
            return Ok(());
        }

        if let Some(text_code) = find_annotation(&method.annotations, "WasmTextCode") {
            let body_text = text_code
                .string_element("value")
                .or_else(|| text_code.string_element("text"))
                .ok_or_else(|| CompileError::decode("WasmTextCode without a body"))?;
            let body = wat::parse_wasm_text(body_text)
                .with_context(|| format!("bad wasm text on {}", name))?;
            self.literal_bodies.insert(name.clone(), body);
            return Ok(());
        }

        log::info!("Compiling {}...", name);
        let compiled = lower_function(&method, &self.config)?;
        if let Some(body) = &compiled.body {
            self.discover(body, &source.class_name)?;
        }
        let mut compiled = compiled;
        compiled.name = name.clone();
        self.lowered.insert(name.clone(), compiled);
        Ok(())
    }

    /// Walks a lowered body, extending the worklist with referenced functions and loading the
    /// classes that layout and dispatch will need.
    fn discover(&mut self, body: &[Inst], class_name: &Rc<String>) -> anyhow::Result<()> {
        for inst in body {
            match inst {
                Inst::CallStatic(callee) => {
                    self.worklist.push_back(callee.clone());
                }
                Inst::CallVirtual(callee) | Inst::CallInterface(callee) => {
                    self.ensure_class(&callee.class_name).ok();
                    self.referenced_virtuals.push(callee.clone());
                    self.worklist.push_back(callee.clone());
                }
                Inst::New(class) | Inst::InstanceOf(class) | Inst::CheckCast(class)
                | Inst::LdcClass(class) => {
                    self.ensure_class(class)?;
                }
                Inst::GetStatic(field) | Inst::PutStatic(field) => {
                    // Static state needs the owning class's initializer; tolerate classes that
                    // exist only as globals
                    if self.ensure_class(&field.class_name).is_ok() {
                        let initializer = clinit_name(&field.class_name);
                        let has_initializer = self
                            .classes
                            .get(&field.class_name)
                            .map_or(false, |c| {
                                c.methods.iter().any(|m| m.name.name.as_str() == "<clinit>")
                            });
                        if has_initializer && !self.processed.contains(&initializer) {
                            self.register_initializer(initializer);
                        }
                    }
                }
                _ => {}
            }
        }

        // Lambda and string concat call sites synthesize functions and shapes
        let class = &self.classes[class_name];
        let discovered = plan_dynamic_sites(
            body,
            class,
            &mut self.plans,
            &mut self.functions,
            &mut self.strings,
            &self.config,
        )?;
        for implementation in discovered {
            self.worklist.push_back(implementation);
        }
        Ok(())
    }

    fn register_initializer(&mut self, initializer: FunctionName) {
        self.class_initializers.push(initializer.clone());
        self.worklist.push_back(initializer);
        // The start function entry may not exist yet when the first initializer comes from a
        // library class
        let _ = self.functions.resolve(
            &start_name(),
            &FunctionType { params: vec![], results: vec![] },
            FunctionKind::Start,
        );
    }

    /// Ensures a class is loaded, searching the registered library archives in order when it is
    /// not part of the primary inputs. The root object class needs no definition.
    fn ensure_class(&mut self, name: &Rc<String>) -> anyhow::Result<()> {
        if self.classes.contains_key(name)
            || name.as_str() == JAVA_LANG_OBJECT
            || name.starts_with('[')
        {
            return Ok(());
        }
        let file_name = format!("{}.class", name);
        for library in self.libraries.clone() {
            let file = match fs::File::open(&library) {
                Ok(file) => file,
                Err(e) => {
                    return Err(CompileError::link(format!(
                        "unable to open library {}: {}",
                        library.display(),
                        e
                    ))
                    .into())
                }
            };
            let mut archive = zip::ZipArchive::new(file)
                .map_err(|e| CompileError::link(format!("bad library archive: {}", e)))?;
            let mut entry = match archive.by_name(&file_name) {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let mut data = vec![];
            entry
                .read_to_end(&mut data)
                .map_err(|e| CompileError::link(format!("unable to read {}: {}", file_name, e)))?;
            log::info!("Loading {} from {}...", name, library.display());
            let class = parse_class(&data)
                .with_context(|| format!("unable to load library class {}", name))?;
            let class_name = Rc::clone(&class.class_name);
            self.insert_class(class);

            // Library classes initialize through the start function too
            let initializer = clinit_name(&class_name);
            let has_initializer = self.classes[&class_name]
                .methods
                .iter()
                .any(|m| m.name.name.as_str() == "<clinit>");
            if has_initializer && !self.processed.contains(&initializer) {
                self.register_initializer(initializer);
            }

            // Supers and interfaces are needed for layout and dispatch
            let (super_name, interfaces) = {
                let class = &self.classes[&class_name];
                (class.super_class_name.clone(), class.interfaces.clone())
            };
            if let Some(super_name) = super_name {
                self.ensure_class(&super_name)?;
            }
            for interface in interfaces {
                if self.ensure_class(&interface).is_err() {
                    log::warn!("Interface {} not found, treating as opaque", interface);
                }
            }
            return Ok(());
        }
        Err(CompileError::link(format!("class {} not found in inputs or libraries", name)).into())
    }

    /// Finalization: freeze the tables, lay out the data section, render every body and emit.
    fn finalize(
        mut self,
        format: OutputFormat,
        source_map_url: Option<String>,
    ) -> anyhow::Result<CompiledModule> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(CompileError::cancelled().into());
        }
        log::info!("Rendering WebAssembly module...");

        // Shapes for every loaded class plus the synthesized lambda capture structs
        let mut shapes: Vec<ClassShape> = self
            .classes
            .values()
            .map(|class| ClassShape {
                name: Rc::clone(&class.class_name),
                super_name: class.super_class_name.clone().or_else(|| {
                    match class.class_name.as_str() {
                        JAVA_LANG_OBJECT => None,
                        _ => Some(Rc::new(String::from(JAVA_LANG_OBJECT))),
                    }
                }),
                interfaces: class.interfaces.clone(),
                is_interface: class.is_interface(),
                kind: StructKind::Normal,
                fields: class
                    .fields
                    .iter()
                    .filter(|f| !f.flags.contains(crate::class::FieldAccessFlags::STATIC))
                    .map(|f| (Rc::clone(&f.name), Rc::clone(&f.descriptor)))
                    .collect(),
                methods: class
                    .methods
                    .iter()
                    .filter(|m| {
                        !m.is_static()
                            && !m.flags.contains(crate::class::MethodAccessFlags::PRIVATE)
                            && m.name.name.as_str() != "<init>"
                    })
                    .map(|m| (m.name.clone(), m.is_abstract()))
                    .collect(),
            })
            .collect();
        shapes.extend(self.plans.lambda_shapes.clone());
        let mut virtuals = VirtualTable::build(shapes, self.config.use_gc)?;
        virtuals.dump();

        // Pre-register array types, intern every string literal and collect interface dispatch
        // arrays, so the data layout can freeze before rendering
        let mut dispatch_specs: Vec<DispatchArraySpec> = vec![];
        let mut seen_specs = HashSet::new();
        let lowered_names = self.lowered_in_id_order();
        for name in &lowered_names {
            let body = match self.lowered[name].body.as_ref() {
                Some(body) => body,
                None => continue,
            };
            for inst in body {
                match inst {
                    Inst::NewArray(element) => {
                        virtuals.array_type(element)?;
                    }
                    Inst::NewMultiArray { element, .. } => {
                        let mut descriptor = element.clone();
                        while let crate::class::descriptors::FieldDescriptor::Array(component) =
                            descriptor
                        {
                            virtuals.array_type(&component)?;
                            descriptor = *component;
                        }
                    }
                    Inst::LdcString(s) => {
                        self.strings.intern(s)?;
                    }
                    Inst::CallInterface(callee) => {
                        let spec = DispatchArraySpec {
                            interface: Rc::clone(&callee.class_name),
                            method_name: Rc::clone(&callee.name),
                            descriptor: Rc::clone(&callee.descriptor),
                        };
                        if seen_specs.insert(spec.key()) {
                            dispatch_specs.push(spec);
                        }
                    }
                    _ => {}
                }
            }
        }

        // GC struct and array types take the leading type section indices
        let type_base = match self.config.use_gc {
            true => {
                let mut next = 0;
                for t in virtuals.iter_mut() {
                    t.type_index = next;
                    next += 1;
                    if matches!(t.kind, StructKind::Array) {
                        t.native_array_type = Some(next);
                        next += 1;
                    }
                }
                next
            }
            false => 0,
        };

        let (data_bytes, layout) = serialize_tables(
            DATA_BASE,
            &virtuals,
            &mut self.strings,
            &self.functions,
            &dispatch_specs,
        )?;

        // Render every body with program-wide knowledge
        let this_reference = self.reference_type();
        let runtime = self.runtime.as_ref().expect("prepare ran");
        let mut renderer = Renderer::new(
            &mut self.functions,
            &mut virtuals,
            &mut self.strings,
            &mut self.globals,
            &layout,
            runtime,
            &self.plans.plans,
            &self.config,
            type_base,
        );
        let mut rendered: HashMap<u32, (Vec<(u32, ValueType)>, Vec<Instruction>)> = HashMap::new();
        for name in &lowered_names {
            let compiled = self.lowered.get_mut(name).expect("lowered function");
            let (body, locals) = (compiled.body.take(), compiled.locals.take());
            let (body, mut locals) = match (body, locals) {
                (Some(body), Some(locals)) => (body, locals),
                _ => continue,
            };
            let instructions = renderer
                .render_body(&body, &mut locals)
                .with_context(|| format!("unable to render {}", name))?;
            let id = renderer.functions.id_of(name)?;
            rendered.insert(id, (locals.run_length_encode(), instructions));
        }
        generate_dynamic_bodies(&mut renderer, &self.plans)?;

        // Literal @WasmTextCode bodies pass through for the call_indirect type rebase
        for (name, body) in &self.literal_bodies {
            let method_params = name.descriptor.params.clone();
            let mut locals = LocalAllocation::from_code(
                true,
                this_reference,
                &method_params,
                self.config.use_gc,
                &[],
            );
            let pseudo: Vec<Inst> = body.iter().cloned().map(Inst::I).collect();
            let instructions = renderer.render_body(&pseudo, &mut locals)?;
            let id = renderer.functions.id_of(name)?;
            rendered.insert(id, (locals.run_length_encode(), instructions));
        }

        let synthetics = renderer.into_synthetics();

        // Assemble the module image in section order
        let mut image = ModuleImage::default();
        if self.config.use_gc {
            for t in virtuals.iter() {
                image.types.push(TypeDef::Struct {
                    name: Rc::clone(&t.name),
                    fields: t.fields.iter().map(|f| (f.ty, f.mutable)).collect(),
                });
                if let (StructKind::Array, Some(component)) = (t.kind, &t.component) {
                    image.types.push(TypeDef::Array {
                        name: Rc::new(format!("{}!data", t.name)),
                        element: component.storage_type(true),
                    });
                }
            }
        }
        for func_type in self.functions.function_types() {
            image.types.push(TypeDef::Func(func_type.clone()));
        }

        for entry in self.functions.iter() {
            if let FunctionKind::Imported { module, name, .. } = &entry.kind {
                image.imports.push(ImportEntry {
                    module: module.clone(),
                    name: name.clone(),
                    kind: ImportKind::Func { type_index: type_base + entry.type_id },
                    debug_name: format!("{}", entry.name),
                });
            }
        }
        if self.config.use_eh {
            let tag_type = FunctionType {
                params: vec![self.reference_type()],
                results: vec![],
            };
            let type_id = self.functions.type_id(&tag_type);
            image.types.push(TypeDef::Func(tag_type));
            image.imports.push(ImportEntry {
                module: String::from("runtime"),
                name: String::from("exception"),
                kind: ImportKind::Tag { type_index: type_base + type_id },
                debug_name: String::from("!exception"),
            });
        }

        // Function bodies in final index order: imports first, then code ids
        let mut synthetic_bodies: HashMap<u32, crate::output::render::SyntheticFunction> =
            synthetics.into_iter().map(|s| (s.id, s)).collect();
        let import_count = self.functions.import_count();
        for entry in self.functions.iter() {
            if matches!(entry.kind, FunctionKind::Imported { .. }) {
                continue;
            }
            debug_assert!(entry.id >= import_count);
            let source_file = self.source_files.get(&entry.name.class_name).cloned();
            let (locals, body) = match entry.kind {
                FunctionKind::Abstract => (vec![], vec![Instruction::Unreachable]),
                FunctionKind::Start => {
                    let mut body = vec![];
                    for initializer in &self.class_initializers {
                        body.push(Instruction::Call(self.functions.id_of(initializer)?));
                    }
                    (vec![], body)
                }
                _ => match rendered.remove(&entry.id) {
                    Some(rendered) => rendered,
                    None => match synthetic_bodies.remove(&entry.id) {
                        Some(synthetic) => (synthetic.locals, synthetic.body),
                        None => {
                            return Err(CompileError::emit(format!(
                                "function {} has no body",
                                entry.name
                            ))
                            .into())
                        }
                    },
                },
            };
            image.functions.push(FunctionBody {
                index: entry.id,
                debug_name: format!("{}", entry.name),
                type_index: type_base + entry.type_id,
                locals,
                body,
                export: entry.export.clone(),
                source_file,
            });
        }

        // Tables: funcref for call_indirect, externref caches for strings and classes
        image.tables.push(TableDef {
            element: ValueType::FuncRef,
            min: self.functions.len() as u32,
            export: None,
        });
        image.tables.push(TableDef {
            element: ValueType::ExternRef,
            min: self.strings.len() as u32,
            export: None,
        });
        image.tables.push(TableDef {
            element: ValueType::ExternRef,
            min: virtuals.len() as u32,
            export: None,
        });
        image.elements.push(ElementSegment {
            table: 0,
            offset: 0,
            functions: (0..self.functions.len() as u32).collect(),
        });

        let data_end = DATA_BASE + data_bytes.len() as u32;
        image.memory_pages = (data_end / 65536) + 1;
        image.memory_export = Some(String::from("memory"));
        if !data_bytes.is_empty() {
            image.data.push(DataSegment { offset: DATA_BASE, bytes: data_bytes });
        }

        for (field, ty) in self.globals.iter() {
            image.globals.push(GlobalDef {
                ty: *ty,
                mutable: true,
                init: GlobalManager::zero_value(*ty),
                debug_name: format!("{}", field),
                export: None,
            });
        }
        if !self.config.use_gc {
            // The host bump allocator starts the heap after the data stream
            image.globals.push(GlobalDef {
                ty: ValueType::I32,
                mutable: true,
                init: crate::function::Value::I32(data_end as i32),
                debug_name: String::from("!heap"),
                export: Some(String::from("!heap")),
            });
        }

        image.start = self
            .functions
            .iter()
            .find(|e| matches!(e.kind, FunctionKind::Start))
            .map(|e| e.id);
        image.debug_names = self.config.debug_names;
        image.source_map_url = source_map_url;

        self.functions.dump();

        // Close the emitter last; the source map consumes the binary offsets it recorded
        match format {
            OutputFormat::Text => {
                let rendered = text::render_module(&image)?;
                let source_map = match self.config.source_map {
                    true => Some(SourceMapBuilder::new().render(&self.config.source_map_base)),
                    false => None,
                };
                Ok(CompiledModule {
                    module: rendered.into_bytes(),
                    source_map,
                    js_glue: self.render_glue(),
                })
            }
            OutputFormat::Binary => {
                let output = binary::encode_module(&image)?;
                let source_map = match self.config.source_map {
                    true => {
                        let mut builder = SourceMapBuilder::new();
                        for (offset, file, line) in &output.mappings {
                            builder.add_mapping(*offset, file, *line);
                        }
                        Some(builder.render(&self.config.source_map_base))
                    }
                    false => None,
                };
                Ok(CompiledModule {
                    module: output.bytes,
                    source_map,
                    js_glue: self.render_glue(),
                })
            }
        }
    }

    fn render_glue(&self) -> Option<String> {
        match self.glue.is_empty() {
            true => None,
            false => Some(self.glue.render()),
        }
    }
}

fn start_name() -> FunctionName {
    synthetic_name("start", "()V")
}

fn clinit_name(class_name: &Rc<String>) -> FunctionName {
    let (_, descriptor) = crate::class::descriptors::method_descriptor_parser("()V")
        .expect("valid descriptor");
    FunctionName {
        class_name: Rc::clone(class_name),
        name: Rc::new(String::from("<clinit>")),
        descriptor: Rc::new(descriptor),
    }
}
