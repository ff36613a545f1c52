mod class;
mod error;
mod function;
mod graph;
mod options;
mod output;
#[cfg(test)]
mod tests;
mod virtuals;

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use crate::error::find_compile_error;
use crate::options::Options;
use crate::output::Compilation;
use anyhow::Context;
use clap::Parser;
use std::process::exit;
use std::time::Instant;
use std::fs;

fn try_main() -> anyhow::Result<()> {
    let start = Instant::now();
    let opts = Options::parse();
    let config = opts.config();

    let mut compilation = Compilation::new(config.clone());
    for path in &opts.input_paths {
        info!("Loading {}...", path.display());
        let data = fs::read(path)
            .with_context(|| format!("unable to read class file: {}", path.display()))?;
        compilation
            .add_class_bytes(&data)
            .with_context(|| format!("unable to load {}", path.display()))?;
    }
    for library in &opts.libraries {
        compilation.add_library(library.clone());
    }

    let source_map_url = match config.source_map {
        true => Some(format!(
            "{}.map",
            opts.output_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("module")
        )),
        false => None,
    };
    let compiled = compilation.compile(opts.format(), source_map_url)?;

    if let Some(parent) = opts.output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create output directory: {}", parent.display()))?;
    }
    info!("Writing WebAssembly module...");
    fs::write(&opts.output_path, &compiled.module).context("unable to write module")?;
    if let Some(source_map) = &compiled.source_map {
        let path = opts.output_path.with_extension(format!(
            "{}.map",
            opts.output_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("wasm")
        ));
        fs::write(path, source_map).context("unable to write source map")?;
    }
    if let Some(js_glue) = &compiled.js_glue {
        let path = opts.output_path.with_extension("js");
        fs::write(path, js_glue).context("unable to write JavaScript glue")?;
    }

    info!("Finished in {}ms!", start.elapsed().as_millis());
    Ok(())
}

fn main() {
    env_logger::builder().format_timestamp(None).init();

    try_main().unwrap_or_else(|e| {
        error!("{:?}", e);
        // I/O and other unclassified failures report the generic code
        let code = find_compile_error(&e).map(|c| c.kind.exit_code()).unwrap_or(4);
        exit(code);
    })
}
