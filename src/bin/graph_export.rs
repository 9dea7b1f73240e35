use std::path::PathBuf;

use clap::Parser;
use lookml_audit::{pipeline, AuditConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookml-graph-export")]
#[command(about = "Export the LookML reference graph to DOT or SVG")]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root of the LookML checkout
    #[arg(short, long)]
    lookml_root: Option<PathBuf>,

    /// Output file (defaults to lookml.dot / lookml.svg)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: dot or svg
    #[arg(short, long, default_value = "dot")]
    format: String,

    /// List unresolved references with suggestions
    #[arg(long)]
    dangling: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AuditConfig::load_from(cli.config.as_deref())?;
    if let Some(root) = cli.lookml_root {
        config.lookml.root = root;
    }

    println!("Loading LookML graph from: {:?}", config.lookml_root());
    let (graph, summary) = pipeline::load_graph(&config)?;

    println!(
        "Graph loaded: {} entities, {} edges ({} dangling)",
        summary.entities, summary.edges, summary.dangling_edges
    );

    if cli.dangling {
        for dangling in graph.dangling(3) {
            let hint = if dangling.suggestions.is_empty() {
                String::new()
            } else {
                format!(" (did you mean: {}?)", dangling.suggestions.join(", "))
            };
            println!(
                "⚠️  {} -[{}]-> {}{}",
                dangling.edge.from, dangling.edge.kind, dangling.edge.to_name, hint
            );
        }
    }

    let dot_content = graph.to_dot();

    match cli.format.as_str() {
        "dot" => {
            let output_path = cli.output.unwrap_or_else(|| PathBuf::from("lookml.dot"));
            std::fs::write(&output_path, &dot_content)?;
            println!("✅ Exported DOT to: {:?}", output_path);
        }
        "svg" => {
            let output_path = cli.output.unwrap_or_else(|| PathBuf::from("lookml.svg"));

            let temp_dot = output_path.with_extension("temp.dot");
            std::fs::write(&temp_dot, &dot_content)?;

            let output = std::process::Command::new("dot")
                .arg("-Tsvg")
                .arg(&temp_dot)
                .arg("-o")
                .arg(&output_path)
                .output()?;

            let _ = std::fs::remove_file(&temp_dot);

            if output.status.success() {
                println!("✅ Exported SVG to: {:?}", output_path);
            } else {
                eprintln!("❌ GraphViz conversion failed:");
                eprintln!("{}", String::from_utf8_lossy(&output.stderr));
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("❌ Invalid format. Use 'dot' or 'svg'");
            std::process::exit(1);
        }
    }

    Ok(())
}
