//! JSON Magic CLI
//!
//! Command-line interface for bundling, diffing, and patching JSON/YAML documents.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use json_magic::{
    apply, bundle_source, dereference, diff, json_type_name, BundleOptions, Difference, LoadError,
    ReadFiles, ResolverPlugin,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "json-magic")]
#[command(about = "Bundle, diff, and patch multi-file JSON and YAML documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file (stdout if not specified)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Log resolution details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Hoist every external $ref into the document
    Bundle {
        /// Document source: file path or URL (http:// or https://)
        source: String,

        /// Drop hoisted definitions nothing references
        #[arg(long)]
        tree_shake: bool,

        /// Emit x-ext-urls mapping hoisting keys to their sources
        #[arg(long)]
        url_map: bool,

        /// Maximum concurrent fetches
        #[arg(long)]
        limit: Option<usize>,

        /// Only bundle references up to this many path segments deep
        #[arg(long)]
        depth: Option<usize>,

        /// Base for relative references (defaults to the source)
        #[arg(long)]
        origin: Option<String>,

        /// Inline every local $ref after bundling
        #[arg(long)]
        inline: bool,
    },

    /// Print the differences that turn <base> into <updated>
    Diff {
        /// Base document: file path or URL
        base: String,

        /// Updated document: file path or URL
        updated: String,
    },

    /// Apply a JSON array of differences to a document
    Apply {
        /// Document: file path or URL
        document: String,

        /// Differences file (output of `diff`)
        diffs: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = Output {
        path: cli.output,
        pretty: cli.pretty,
    };

    let result = match cli.command {
        Commands::Bundle {
            source,
            tree_shake,
            url_map,
            limit,
            depth,
            origin,
            inline,
        } => {
            run_bundle(
                BundleArgs {
                    source,
                    tree_shake,
                    url_map,
                    limit,
                    depth,
                    origin,
                    inline,
                },
                &output,
            )
            .await
        }
        Commands::Diff { base, updated } => run_diff(&base, &updated, &output).await,
        Commands::Apply { document, diffs } => run_apply(&document, &diffs, &output).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "json_magic=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Output {
    path: Option<PathBuf>,
    pretty: bool,
}

impl Output {
    fn write(&self, value: &Value) -> Result<(), u8> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;

        match &self.path {
            Some(path) => {
                std::fs::write(path, &text).map_err(|e| {
                    eprintln!("Error writing to {}: {}", path.display(), e);
                    3u8
                })?;
            }
            None => {
                println!("{}", text);
            }
        }

        Ok(())
    }
}

fn plugins() -> Result<Vec<Arc<dyn ResolverPlugin>>, LoadError> {
    let mut plugins: Vec<Arc<dyn ResolverPlugin>> = Vec::new();
    #[cfg(feature = "remote")]
    plugins.push(Arc::new(json_magic::FetchUrls::new()?));
    plugins.push(Arc::new(ReadFiles::new()));
    Ok(plugins)
}

async fn load_input(source: &str) -> Result<Value, u8> {
    let report = |e: LoadError| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    };

    let plugins = plugins().map_err(report)?;
    let plugin = plugins
        .iter()
        .find(|plugin| plugin.validate(source))
        .ok_or_else(|| {
            report(LoadError::Unsupported {
                input: source.to_string(),
            })
        })?;
    plugin.exec(source).await.map_err(report)
}

struct BundleArgs {
    source: String,
    tree_shake: bool,
    url_map: bool,
    limit: Option<usize>,
    depth: Option<usize>,
    origin: Option<String>,
    inline: bool,
}

async fn run_bundle(args: BundleArgs, output: &Output) -> Result<(), u8> {
    let mut options = BundleOptions::new()
        .with_tree_shake(args.tree_shake)
        .with_url_map(args.url_map);
    options.plugins = plugins().map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    options.limit = args.limit;
    options.depth = args.depth;
    options.origin = args.origin;

    let (document, report) = bundle_source(&args.source, &options).await.map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let document = if args.inline {
        dereference(&document)
    } else {
        document
    };
    output.write(&document)?;

    if report.success {
        Ok(())
    } else {
        for error in &report.errors {
            eprintln!("Error: {}", error);
        }
        Err(2)
    }
}

async fn run_diff(base: &str, updated: &str, output: &Output) -> Result<(), u8> {
    let base = load_input(base).await?;
    let updated = load_input(updated).await?;

    let differences = diff(&base, &updated);
    let value = serde_json::to_value(&differences).map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    output.write(&value)
}

async fn run_apply(document: &str, diffs: &str, output: &Output) -> Result<(), u8> {
    let mut document = load_input(document).await?;
    let diffs_value = load_input(diffs).await?;

    if !diffs_value.is_array() {
        eprintln!(
            "Error: differences must be an array, got {}",
            json_type_name(&diffs_value)
        );
        return Err(2);
    }
    let differences: Vec<Difference> = serde_json::from_value(diffs_value).map_err(|source| {
        let e = LoadError::InvalidJson { source };
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    apply(&mut document, &differences).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    output.write(&document)
}
