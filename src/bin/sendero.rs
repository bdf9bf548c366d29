//! Binary entry point for the Sendero administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use sendero::{
    Node, NodeId, PathConfig, RebuildReport, SqliteSchema, SqliteStore, TreeEngine, VerifyReport,
};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sendero",
    version,
    about = "Maintain materialized tree paths in a SQLite table",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SENDERO_DATABASE",
        value_name = "DB",
        help = "SQLite database file"
    )]
    database: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "TOML path field configuration (defaults apply when omitted)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = sendero::store::DEFAULT_TABLE,
        help = "Table holding the nodes"
    )]
    table: String,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Recompute paths from parent references and rank fields")]
    Rebuild {
        #[arg(long, value_name = "ID", help = "Only rebuild the subtree below this node")]
        from: Option<NodeId>,
    },

    #[command(about = "Check stored paths without modifying them")]
    Verify,

    #[command(about = "Print the tree in path order")]
    Tree {
        #[arg(long, value_name = "ID", help = "Only print the subtree of this node")]
        root: Option<NodeId>,

        #[arg(long, value_name = "FIELD", default_value = "name", help = "Attribute to print")]
        label: String,
    },

    #[command(about = "Print the effective configuration as TOML")]
    Config,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct TreeRow {
    id: NodeId,
    parent: Option<NodeId>,
    path: Option<String>,
    depth: Option<usize>,
    label: Option<String>,
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("SENDERO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PathConfig::load(path)?,
        None => PathConfig::default(),
    };
    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let database = cli
        .database
        .clone()
        .ok_or("no database given; pass --database or set SENDERO_DATABASE")?;
    debug!(database = %database.display(), table = %cli.table, "cli.open");
    let schema = SqliteSchema::for_config(cli.table.clone(), &config)?;
    let store = SqliteStore::open_with_schema(&database, config.encoding.clone(), schema)?;
    let mut engine = TreeEngine::new(store, config)?;

    match cli.command {
        Command::Rebuild { from } => {
            let report = match from {
                Some(id) => engine.rebuild_from(id)?,
                None => engine.rebuild()?,
            };
            emit(cli.format, &report, || print_rebuild_text(&report))?;
        }
        Command::Verify => {
            let report = engine.verify()?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                process::exit(2);
            }
        }
        Command::Tree { root, label } => {
            let nodes = match root {
                Some(id) => {
                    let node = engine.get(id)?;
                    engine.query().descendants(&node, true)?
                }
                None => engine.query().all()?,
            };
            let rows = nodes
                .iter()
                .map(|node| tree_row(&engine, node, &label))
                .collect::<Result<Vec<_>, _>>()?;
            emit(cli.format, &rows, || print_tree_text(&rows))?;
        }
        Command::Config => {}
    }
    Ok(())
}

fn tree_row(
    engine: &TreeEngine<SqliteStore>,
    node: &Node,
    label: &str,
) -> Result<TreeRow, sendero::TreeError> {
    let path = node
        .path
        .as_ref()
        .map(|path| engine.config().encoding.format(path))
        .transpose()?;
    Ok(TreeRow {
        id: node.id,
        parent: node.parent,
        path,
        depth: engine.query().level(node),
        label: node.text(label).map(str::to_string),
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_rebuild_text(report: &RebuildReport) {
    println!(
        "Rebuilt {} paths ({})",
        report.nodes,
        if report.set_based {
            "set-based"
        } else {
            "node by node"
        }
    );
    if !report.orphans_as_roots.is_empty() {
        println!("Orphans placed as roots: {:?}", report.orphans_as_roots);
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} nodes={} roots={} unset_paths={} max_depth={} largest_group={}",
        report.success,
        report.counts.nodes,
        report.counts.roots,
        report.counts.unset_paths,
        report.counts.max_depth,
        report.counts.largest_group,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_tree_text(rows: &[TreeRow]) {
    let base = rows.iter().filter_map(|r| r.depth).min().unwrap_or(1);
    for row in rows {
        let indent = row.depth.map_or(0, |d| d.saturating_sub(base));
        println!(
            "{}{} [{}] #{}",
            "  ".repeat(indent),
            row.label.as_deref().unwrap_or("-"),
            row.path.as_deref().unwrap_or("unset"),
            row.id
        );
    }
}
