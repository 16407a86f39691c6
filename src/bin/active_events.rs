use active_events::{
    config::{self, RuntimeConfig},
    lambda,
    node::json,
    Error, Expression, InternalResult, Loader, NodePath,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate an expression against a JSON tree and print the matches
    Query {
        /// JSON file holding the tree
        #[arg(short, long)]
        tree: PathBuf,

        expression: String,
    },
    /// Raise `eval` on a JSON tree and print the resulting tree
    Eval {
        /// JSON file holding the tree
        #[arg(short, long)]
        tree: PathBuf,
    },
}

fn load_config(cli: &Cli) -> InternalResult<RuntimeConfig> {
    match &cli.config {
        Some(path) => config::from_file(path),
        None => Ok(RuntimeConfig::default()),
    }
}

fn read_tree(path: &PathBuf) -> InternalResult<active_events::Node> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Internal(format!("Failed to read tree file: {}", e)))?;
    json::from_str(&content)
}

fn print_json(value: &serde_json::Value) -> InternalResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to render JSON: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn run(cli: &Cli, config: RuntimeConfig) -> InternalResult<()> {
    match &cli.command {
        Command::Query { tree, expression } => {
            let tree = read_tree(tree)?;
            let expression = Expression::parse(expression)?;
            let matched = expression.evaluate(&tree, &NodePath::root())?;
            debug!("{} matches for '{}'", matched.count(), expression);
            let values: Vec<serde_json::Value> = matched.values().map(json::value_to_json).collect();
            print_json(&serde_json::json!({
                "count": matched.count(),
                "values": values,
            }))
        }
        Command::Eval { tree } => {
            let mut tree = read_tree(tree)?;
            let mut loader = Loader::new(config);
            loader.load(lambda::module())?;
            let context = loader.create_context()?;
            info!("context {} ready", context.id());
            context.raise("eval", &mut tree)?;
            print_json(&json::to_json(&tree))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
