//! tabulua CLI
//!
//! Entry point for the command-line tool.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tabulua::registry::TypeRegistry;

#[derive(Parser, Debug)]
#[command(name = "tabulua")]
#[command(about = "Process typed tab-separated data packages", long_about = None)]
struct Args {
    /// Package directories to process.
    directories: Vec<PathBuf>,

    /// Path to configuration file.
    #[arg(short, long, default_value = "tabulua.toml")]
    config: PathBuf,

    /// Restrict processing to files whose descriptor type_name matches;
    /// repeatable.
    #[arg(long = "file")]
    file_formats: Vec<String>,

    /// Restrict accepted raw data formats; repeatable.
    #[arg(long = "data")]
    data_formats: Vec<String>,

    /// Write joined/published output under this directory.
    #[arg(long = "export-dir")]
    export_dir: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Print the built-in/aliased meaning of a type name and exit.
    #[arg(long = "explain-type")]
    explain_type: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(type_name) = &args.explain_type {
        return explain_type(type_name);
    }

    let config = if args.config.exists() {
        tabulua::Config::from_file(&args.config).context("failed to load configuration")?
    } else {
        tabulua::Config::default()
    };

    let level_text = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let level = tabulua::logging::parse_level(level_text).unwrap_or(log::LevelFilter::Info);
    tabulua::logging::init(level);

    if args.directories.is_empty() {
        anyhow::bail!("no package directories given");
    }

    let sink = tabulua::Diagnostics::new();
    let Some(result) = tabulua::process_files(&args.directories, Some(&sink)) else {
        for err in sink.errors() {
            eprintln!("{err}");
        }
        anyhow::bail!("processing failed");
    };

    println!("packages: {:?}", result.package_order);
    println!("files processed: {}", result.tsv_files.len());
    println!("validation passed: {}", result.validation_passed);
    for warning in &result.validation_warnings {
        println!("warning: {}: {}", warning.validator, warning.message);
    }

    if let Some(export_dir) = args.export_dir.or(config.output.export_dir) {
        std::fs::create_dir_all(&export_dir).context("failed to create export directory")?;
        for (path, dataset) in &result.tsv_files {
            let file_name = path.file_name().context("file with no name")?;
            let text = dataset.to_string_tsv().context("failed to re-encode dataset")?;
            std::fs::write(export_dir.join(file_name), text).context("failed to write exported file")?;
        }
    }

    if !result.validation_passed {
        anyhow::bail!("validation failed");
    }

    Ok(())
}

fn explain_type(name: &str) -> Result<()> {
    let registry = TypeRegistry::new();
    if registry.is_built_in_type(name) {
        println!("{name} is a built-in type");
        return Ok(());
    }
    match registry.get_type_kind(name) {
        Some(kind) => println!("{name}: {kind:?}"),
        None => anyhow::bail!("unknown type: {name}"),
    }
    Ok(())
}
