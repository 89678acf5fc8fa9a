//! tlkify CLI
//!
//! Command-line tool for building Neverwinter Nights TLK and HAK files from
//! 2DA tables and JSON overlays.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tlkify_core::{
    load_inputs, load_talk_table, parse_2da, run_build, writer, BuildConfig, NwnErf, NwnTlk,
    TlkCompiler, CONFIG_FILE_NAME,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tlkify")]
#[command(about = "Build NWN talk tables and HAKs from 2DA overlays", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full build: merge, allocate, write and pack
    Build {
        /// Path to the build configuration
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,

        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and check every input without writing anything
    Validate {
        /// Path to the build configuration
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,
    },

    /// Parse and display a single 2DA file
    Parse {
        /// Path to 2DA file
        #[arg(short, long)]
        file: PathBuf,

        /// Maximum number of rows to display
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Convert a 2DA file to CSV or JSON
    Export {
        /// Path to 2DA file
        #[arg(short, long)]
        file: PathBuf,

        /// Output format
        #[arg(long, default_value = "csv", value_parser = ["csv", "json"])]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Display the entries of a talk table (.tlk or .json)
    DumpTlk {
        /// Path to the talk table
        #[arg(short, long)]
        file: PathBuf,

        /// Maximum number of entries to display
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Write a configuration file with default settings
    InitConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "tlkify=debug,tlkify_core=debug"
    } else {
        "tlkify=info,tlkify_core=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> tlkify_core::Result<()> {
    match cli.command {
        Commands::Build { config, json } => cmd_build(&config, json),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Parse { file, limit } => cmd_parse(&file, limit),
        Commands::Export { file, format, output } => cmd_export(&file, &format, &output),
        Commands::DumpTlk { file, limit } => cmd_dump_tlk(&file, limit),
        Commands::InitConfig { output, force } => cmd_init_config(&output, force),
    }
}

fn cmd_build(config_path: &Path, json: bool) -> tlkify_core::Result<()> {
    let config = BuildConfig::load(config_path)?;
    tracing::info!(config = %config_path.display(), "starting build");

    let packager = NwnErf::new(&config.tools.nwn_erf);
    let compiler = config.tools.nwn_tlk.as_ref().map(NwnTlk::new);
    let report = run_build(
        &config,
        &packager,
        compiler.as_ref().map(|c| c as &dyn TlkCompiler),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Built {} table(s) ({} static), {} overlay(s)",
        report.tables, report.static_tables, report.overlays
    );
    println!(
        "Strings: {} from overlays, {} derived, {} new, {} reused",
        report.overlay_changes, report.derived, report.allocated, report.reused
    );
    if !report.modified_tables.is_empty() {
        println!("Modified: {}", report.modified_tables.join(", "));
    }
    println!();
    println!("HAK: {}", report.artifacts.hak.display());
    println!("TLK: {} ({} entries)", report.artifacts.tlk.display(), report.talk_table_entries);
    for mirror in &report.artifacts.mirrors {
        println!("  copied to {}", mirror.display());
    }

    Ok(())
}

fn cmd_validate(config_path: &Path) -> tlkify_core::Result<()> {
    let config = BuildConfig::load(config_path)?;
    config.validate()?;

    let inputs = load_inputs(&config)?;
    let fields: usize = inputs.overlays.values().map(|o| o.field_count()).sum();

    println!("Tables: {}", inputs.tables.len());
    println!("Static tables: {}", inputs.statics.len());
    println!("Overlays: {} ({} fields)", inputs.overlays.len(), fields);
    for path in &inputs.orphan_overlays {
        println!("  no input table for {}", path.display());
    }
    println!("OK");

    Ok(())
}

fn cmd_parse(file: &Path, limit: usize) -> tlkify_core::Result<()> {
    let table = parse_2da(file)?;

    println!("File: {}", file.display());
    println!("Table: {}", table.name);
    println!("Columns: {}", table.column_count());
    println!("Rows: {}", table.row_count());
    if let Some(default) = &table.default {
        println!("Default: {}", default.to_token());
    }
    println!();

    // Print header
    let mut header = vec!["#"];
    header.extend(table.columns.iter().map(|c| c.name.as_str()));
    println!("{}", header.join("\t"));
    println!("{}", "-".repeat(header.len() * 12));

    for row in table.rows.iter().take(limit) {
        let mut values = vec![row.index.to_string()];
        values.extend(row.cells.iter().map(|c| c.to_token()));
        println!("{}", values.join("\t"));
    }

    if table.row_count() > limit {
        println!("... ({} more rows)", table.row_count() - limit);
    }

    Ok(())
}

fn cmd_export(file: &Path, format: &str, output: &Path) -> tlkify_core::Result<()> {
    let table = parse_2da(file)?;

    match format {
        "json" => writer::write_json(&table, output)?,
        _ => writer::write_csv(&table, output)?,
    }

    println!("Exported {} rows to {}", table.row_count(), output.display());

    Ok(())
}

fn cmd_dump_tlk(file: &Path, limit: Option<usize>) -> tlkify_core::Result<()> {
    let table = load_talk_table(file)?;

    println!("File: {}", file.display());
    println!("Language: {}", table.language);
    println!("Entries: {} (references 0..{})", table.len(), table.dense_len());
    println!();

    let limit = limit.unwrap_or(table.len());
    for (id, text) in table.entries.iter().take(limit) {
        println!("{}\t{}", id, text);
    }

    if table.len() > limit {
        println!("... ({} more entries)", table.len() - limit);
    }

    Ok(())
}

fn cmd_init_config(output: &Path, force: bool) -> tlkify_core::Result<()> {
    if output.exists() && !force {
        return Err(tlkify_core::Error::Config(format!(
            "'{}' already exists (use --force to overwrite)",
            output.display()
        )));
    }

    BuildConfig::default().save(output)?;
    println!("Created config: {}", output.display());

    Ok(())
}
