use clap::Parser;
use std::path::PathBuf;

/// Output form of the compiled module.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OutputFormat {
    Text,
    Binary,
}

#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Options {
    /// Path to output file (.wasm or .wat)
    #[clap(short = 'o', long = "output", value_name = "PATH", parse(from_os_str))]
    pub output_path: PathBuf,

    /// Library archives (.jar/.zip) searched in order for referenced classes
    #[clap(short = 'l', long = "library", value_name = "JAR", parse(from_os_str))]
    pub libraries: Vec<PathBuf>,

    /// Emit field, local and type names in debug form
    #[clap(long = "debug-names")]
    pub debug_names: bool,

    /// Relative path prepended to source file names in the source map
    #[clap(long = "source-map-base", value_name = "PATH", default_value = "")]
    pub source_map_base: String,

    /// Write a V3 source map next to the output module
    #[clap(long = "source-map")]
    pub source_map: bool,

    /// Lower allocations to the WebAssembly GC proposal instead of imported allocator functions
    #[clap(long = "use-gc")]
    pub use_gc: bool,

    /// Lower throw/catch to the exception handling proposal instead of trapping
    #[clap(long = "use-eh")]
    pub use_eh: bool,

    /// Input class files (.class)
    #[clap(required = true, value_name = "CLASS", parse(from_os_str))]
    pub input_paths: Vec<PathBuf>,
}

impl Options {
    /// Output format, chosen by the output file extension (`.wat` is text, anything else binary).
    pub fn format(&self) -> OutputFormat {
        match self.output_path.extension().and_then(|e| e.to_str()) {
            Some("wat") | Some("wast") => OutputFormat::Text,
            _ => OutputFormat::Binary,
        }
    }

    pub fn config(&self) -> Config {
        Config {
            debug_names: self.debug_names,
            source_map_base: self.source_map_base.clone(),
            source_map: self.source_map,
            use_gc: self.use_gc,
            use_eh: self.use_eh,
        }
    }
}

/// Compilation configuration, decoupled from the command line so embedders and tests can
/// construct it directly.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub debug_names: bool,
    pub source_map_base: String,
    pub source_map: bool,
    pub use_gc: bool,
    pub use_eh: bool,
}
