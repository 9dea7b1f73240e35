//! LookML Deprecation Audit CLI
//!
//! Scans a LookML checkout, reads the system-activity usage exports, and
//! writes one deprecation verdict per entity.
//!
//! Usage:
//!   lookml-audit --lookml-root ./looker-master --history-csv raw/history.csv
//!   lookml-audit --config audit.toml --format json
//!   lookml-audit --help

use std::path::PathBuf;

use clap::Parser;
use lookml_audit::{pipeline, AuditConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookml-audit")]
#[command(about = "Find LookML explores, views and joins that are safe to deprecate")]
struct Cli {
    /// Configuration file (layered over lookml-audit.toml and LOOKML_AUDIT__* variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root of the LookML checkout
    #[arg(short, long)]
    lookml_root: Option<PathBuf>,

    /// Dashboard usage export
    #[arg(long)]
    dashboard_csv: Option<PathBuf>,

    /// Look usage export
    #[arg(long)]
    look_csv: Option<PathBuf>,

    /// History export with query field lists
    #[arg(long)]
    history_csv: Option<PathBuf>,

    /// Verdict CSV path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the reference edge list
    #[arg(long)]
    edges: Option<PathBuf>,

    /// Also write dashboard → explore → tables lineage
    #[arg(long)]
    lineage: Option<PathBuf>,

    /// Append a generated_at column to the verdict CSV
    #[arg(long)]
    generated_at: bool,

    /// Summary format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn apply_overrides(config: &mut AuditConfig, cli: &Cli) {
    if let Some(root) = &cli.lookml_root {
        config.lookml.root = root.clone();
    }
    if let Some(path) = &cli.dashboard_csv {
        config.usage.dashboard_csv = Some(path.clone());
    }
    if let Some(path) = &cli.look_csv {
        config.usage.look_csv = Some(path.clone());
    }
    if let Some(path) = &cli.history_csv {
        config.usage.history_csv = Some(path.clone());
    }
    if let Some(path) = &cli.output {
        config.output.verdicts = path.clone();
    }
    if let Some(path) = &cli.edges {
        config.output.edges = Some(path.clone());
    }
    if let Some(path) = &cli.lineage {
        config.output.lineage = Some(path.clone());
    }
    if cli.generated_at {
        config.output.include_generated_at = true;
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AuditConfig::load_from(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let summary = pipeline::run(&config)?;

    match cli.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        "text" => {
            println!("🔍 LookML Deprecation Audit\n");
            print!("{}", summary.to_text());
        }
        other => anyhow::bail!("Invalid format '{}'. Use 'text' or 'json'", other),
    }

    Ok(())
}
