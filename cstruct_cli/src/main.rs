mod config;
mod values;

use anyhow::{anyhow, bail, Context as _};
use clap::{Parser, Subcommand};
use cstruct_layout::{NoProbe, ResolvedRecord, SizeProbe, TypeResolver};
use cstruct_loader::{load_definitions, load_size_table, NativeLibrary};
use cstruct_reflect::{format_record_with_options, Context, FormatOptions, NameRegistry};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, Overrides};
use crate::values::ValueFile;

#[derive(Parser)]
#[command(name = "cstruct")]
#[command(about = "Inspect, check and emit C records described by YAML field tables")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./cstruct.yaml when present)
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Definition files containing enums and records
    #[arg(short = 'f', long = "files", value_name = "FILE", global = true)]
    files: Vec<PathBuf>,

    /// Include directories for imported definition files
    #[arg(short = 'i', long = "include-dir", value_name = "DIR", global = true)]
    include_dirs: Vec<PathBuf>,

    /// Native library providing `<Type>_size` accessors
    #[arg(short = 'l', long = "library", value_name = "NAME", env = "CSTRUCT_LIBRARY", global = true)]
    library: Option<String>,

    /// YAML size table used instead of a native library
    #[arg(long = "sizes", value_name = "FILE", global = true)]
    sizes: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print resolved record layouts
    Layout {
        /// Only print this record
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        type_name: Option<String>,

        /// Print JSON instead of a table
        #[arg(long = "json")]
        json: bool,
    },

    /// Compare every resolved size against the native library or size table
    Check,

    /// Build a record from a YAML values file and print it as C source
    Emit {
        /// Record type to build
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        type_name: String,

        /// YAML mapping of field names to values
        #[arg(long = "values", value_name = "FILE")]
        values: PathBuf,

        /// Name of the emitted C variable
        #[arg(short = 'n', long = "name", value_name = "NAME")]
        name: Option<String>,
    },

    /// Decode a raw binary image of a record
    Decode {
        /// Record type stored in the file
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        type_name: String,

        /// Binary data file
        #[arg(short = 'd', long = "data", value_name = "FILE")]
        data: PathBuf,

        /// Print JSON instead of the indented tree
        #[arg(long = "json")]
        json: bool,

        /// Include byte offset information in JSON output
        #[arg(long = "include-byte-offsets")]
        include_byte_offsets: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = Config::load(cli.config.as_deref())?.merge(Overrides {
        library: cli.library,
        include_dirs: cli.include_dirs,
        sizes: cli.sizes,
        files: cli.files,
    });

    match cli.command {
        Commands::Layout { type_name, json } => run_layout(&config, type_name, json),
        Commands::Check => run_check(&config),
        Commands::Emit { type_name, values, name } => run_emit(&config, type_name, values, name),
        Commands::Decode {
            type_name,
            data,
            json,
            include_byte_offsets,
        } => run_decode(&config, type_name, data, json, include_byte_offsets),
    }
}

/* Size source chosen from the configuration: library, then size table, then nothing */
fn open_probe(config: &Config) -> anyhow::Result<Box<dyn SizeProbe + Send + Sync>> {
    if let Some(library) = &config.library {
        let library = NativeLibrary::find(library, &[])?;
        return Ok(Box::new(library));
    }
    if let Some(path) = &config.sizes {
        let table = load_size_table(path)?;
        info!(path = %path.display(), entries = table.len(), "loaded size table");
        return Ok(Box::new(table));
    }
    warn!("no native library or size table configured, sizes fall back to defaults");
    Ok(Box::new(NoProbe))
}

fn load_types(config: &Config, probe: &dyn SizeProbe) -> anyhow::Result<TypeResolver> {
    if config.files.is_empty() {
        bail!("no definition files given; pass --files or list them in cstruct.yaml");
    }
    let mut types = load_definitions(&config.files, &config.include_dirs)?;
    types.resolve_all(probe).context("resolving record layouts")?;
    Ok(types)
}

fn load_context(config: &Config) -> anyhow::Result<Context> {
    let probe = open_probe(config)?;
    let types = load_types(config, probe.as_ref())?;
    Ok(Context::new(types, probe))
}

fn selected<'t>(types: &'t TypeResolver, type_name: Option<&str>) -> anyhow::Result<Vec<&'t ResolvedRecord>> {
    match type_name {
        Some(name) => {
            let record = types.get_record(name).ok_or_else(|| anyhow!("type '{}' not found", name))?;
            Ok(vec![record])
        }
        None => Ok(types.records.values().collect()),
    }
}

fn bit_slot(record: &ResolvedRecord, index: usize) -> String {
    record.fields[index]
        .bits
        .map_or_else(String::new, |slot| format!("{}:{}", slot.offset, slot.width))
}

fn run_layout(config: &Config, type_name: Option<String>, json: bool) -> anyhow::Result<()> {
    let probe = open_probe(config)?;
    let types = load_types(config, probe.as_ref())?;
    let records = selected(&types, type_name.as_deref())?;

    if json {
        let rendered: Vec<_> = records
            .iter()
            .map(|record| {
                json!({
                    "name": record.name,
                    "kind": if record.is_union() { "union" } else { "struct" },
                    "size": record.size,
                    "alignment": record.alignment,
                    "packed": record.packed,
                    "fields": record.fields.iter().map(|field| json!({
                        "name": field.name,
                        "offset": field.offset,
                        "size": field.size,
                        "bits": field.bits.map(|slot| json!({ "offset": slot.offset, "width": slot.width })),
                        "decode": field.decode.to_string(),
                        "anonymous": field.transparent,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    for record in records {
        let kind = if record.is_union() { "union" } else { "struct" };
        println!("{} ({}, size {}, align {})", record.name, kind, record.size, record.alignment);
        if let Some(comment) = &record.comment {
            println!("  // {}", comment);
        }
        println!("  {:>6}  {:>4}  {:<6}  {:<24}  {}", "offset", "size", "bits", "field", "decode");
        for (index, field) in record.fields.iter().enumerate() {
            let name = if field.transparent { format!("{} (anonymous)", field.name) } else { field.name.clone() };
            println!(
                "  {:>6}  {:>4}  {:<6}  {:<24}  {}",
                field.offset,
                field.size,
                bit_slot(record, index),
                name,
                field.decode
            );
        }
        println!();
    }
    Ok(())
}

fn run_check(config: &Config) -> anyhow::Result<()> {
    let context = load_context(config)?;
    let mut failures = 0;
    for (name, result) in context.check_all() {
        match result {
            Ok(size) => println!("ok    {:<32} {}", name, size),
            Err(err) => {
                failures += 1;
                println!("FAIL  {:<32} {}", name, err.to_string().replace('\n', " "));
            }
        }
    }
    if failures > 0 {
        bail!("{} record(s) do not match the installed library", failures);
    }
    Ok(())
}

fn run_emit(config: &Config, type_name: String, values: PathBuf, name: Option<String>) -> anyhow::Result<()> {
    let context = load_context(config)?;
    let contents = std::fs::read_to_string(&values).with_context(|| format!("reading {}", values.display()))?;
    let value_file = ValueFile::parse(&contents)?;
    let record = context.record(&type_name, value_file.fields()?)?;

    let name = name.unwrap_or_else(|| type_name.to_lowercase());
    let mut names = NameRegistry::new();
    println!("{}", record.to_c_code(&name, &mut names));
    Ok(())
}

fn run_decode(config: &Config, type_name: String, data: PathBuf, json: bool, include_byte_offsets: bool) -> anyhow::Result<()> {
    let context = load_context(config)?;
    let bytes = std::fs::read(&data).with_context(|| format!("reading {}", data.display()))?;

    let mut record = context.zeroed(&type_name)?;
    record.update_from_buffer(&bytes)?;
    if bytes.len() as u64 > record.layout().size {
        warn!(extra = bytes.len() as u64 - record.layout().size, "ignoring trailing bytes");
    }

    if json {
        let options = FormatOptions { include_byte_offsets };
        let formatted = format_record_with_options(&record.view(), &options);
        println!("{}", serde_json::to_string_pretty(&formatted)?);
    } else {
        println!("{}", record);
    }
    Ok(())
}
