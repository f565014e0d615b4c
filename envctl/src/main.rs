use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use contracts::{CommandSpec, InferenceError};
use graphdb::GraphResolver;
use inference::{EdgeSelection, InferenceContext, InferenceOptions, InferenceOutcome, SearchKind};
use tracing_subscriber::{fmt, EnvFilter};

mod consul;
mod emit;

use emit::OutputFormat;

#[derive(Parser)]
#[command(name = "envctl", version, about = "Infer working container environments for code snippets")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build all sandbox container images
    Build,
    /// Push all sandbox images to the configured registry
    Push,
    /// Infer a working environment for a code location
    Run {
        /// Path to the snippet file or directory
        #[arg(value_name = "PACKAGE", default_value = ".")]
        package: PathBuf,
        /// Language to parse the codebase as
        #[arg(long, default_value = "python")]
        language: String,
        /// Mutation search strategy
        #[arg(long, value_enum, default_value = "feedback-directed")]
        search: SearchArg,
        /// Replacement entry command
        #[arg(long)]
        cmd: Option<String>,
        /// Argument for the replacement entry command (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Output artifact
        #[arg(long, value_enum, default_value = "dockerfile")]
        format: FormatArg,
        #[arg(long)]
        verbose: bool,
        /// Restrict transitive resolution to one edge kind, or skip it
        #[arg(long, value_enum)]
        only: Option<OnlyArg>,
        /// Consul address for the metadata sink
        #[arg(long)]
        consul: Option<String>,
        #[arg(long, default_value = "envctl")]
        consul_key_prefix: String,
        /// Emit the first resolved environment without validating it
        #[arg(long)]
        no_validate: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SearchArg {
    LevelOrder,
    IdDfs,
    FeedbackDirected,
}

impl From<SearchArg> for SearchKind {
    fn from(arg: SearchArg) -> Self {
        match arg {
            SearchArg::LevelOrder => SearchKind::LevelOrder,
            SearchArg::IdDfs => SearchKind::IdDfs,
            SearchArg::FeedbackDirected => SearchKind::FeedbackDirected,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Dockerfile,
    InstallCommands,
    Metadata,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Dockerfile => OutputFormat::Dockerfile,
            FormatArg::InstallCommands => OutputFormat::InstallCommands,
            FormatArg::Metadata => OutputFormat::Metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnlyArg {
    Deps,
    Assoc,
    None,
}

impl From<OnlyArg> for EdgeSelection {
    fn from(arg: OnlyArg) -> Self {
        match arg {
            OnlyArg::Deps => EdgeSelection::Deps,
            OnlyArg::Assoc => EdgeSelection::Assoc,
            OnlyArg::None => EdgeSelection::None,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.cmd {
        Commands::Build => {
            init_tracing(false);
            build_images().await
        }
        Commands::Push => {
            init_tracing(false);
            sandboxes::images::push_all()
                .await
                .map_err(InferenceError::from_unexpected)
        }
        Commands::Run {
            package,
            language,
            search,
            cmd,
            args,
            format,
            verbose,
            only,
            consul,
            consul_key_prefix,
            no_validate,
        } => {
            init_tracing(verbose);
            run_inference(RunConfig {
                package,
                language,
                search: search.into(),
                entry_override: cmd.map(|command| CommandSpec::new(command, args)),
                format: format.into(),
                only: only.map(EdgeSelection::from).unwrap_or(EdgeSelection::Union),
                consul,
                consul_key_prefix,
                no_validate,
            })
            .await
        }
    };

    match result {
        Ok(()) => {}
        Err(error) => {
            let doc = error.to_json();
            eprintln!("{}", serde_json::to_string(&doc).unwrap_or_default());
            std::process::exit(error.exit_code());
        }
    }
}

async fn build_images() -> Result<(), InferenceError> {
    let repo_root = std::env::current_dir().map_err(|err| InferenceError::UnexpectedInference {
        cause: err.to_string(),
    })?;
    sandboxes::images::build_all(&repo_root)
        .await
        .map_err(InferenceError::from_unexpected)
}

struct RunConfig {
    package: PathBuf,
    language: String,
    search: SearchKind,
    entry_override: Option<CommandSpec>,
    format: OutputFormat,
    only: EdgeSelection,
    consul: Option<String>,
    consul_key_prefix: String,
    no_validate: bool,
}

async fn run_inference(config: RunConfig) -> Result<(), InferenceError> {
    let options = InferenceOptions {
        language: config.language,
        search: config.search,
        only: config.only,
        no_validate: config.no_validate,
        entry_override: config.entry_override,
        ..InferenceOptions::default()
    };
    let ctx = InferenceContext::new(config.package, options);
    let graph = Arc::new(GraphResolver::from_env());

    let outcome = infer_with_signals(&ctx, graph).await?;

    if let Some(addr) = &config.consul {
        let sink = consul::ConsulSink::new(addr, &config.consul_key_prefix);
        if let Err(err) = sink.publish(&outcome).await {
            tracing::warn!(error = %format!("{:#}", err), "consul sink write failed");
        }
    }

    let rendered =
        emit::render(&outcome, config.format).map_err(InferenceError::from_unexpected)?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(unix)]
async fn infer_with_signals(
    ctx: &InferenceContext,
    graph: Arc<GraphResolver>,
) -> Result<InferenceOutcome, InferenceError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).map_err(|err| {
        InferenceError::UnexpectedInference {
            cause: format!("cannot install signal handler: {}", err),
        }
    })?;
    let mut terminate = signal(SignalKind::terminate()).map_err(|err| {
        InferenceError::UnexpectedInference {
            cause: format!("cannot install signal handler: {}", err),
        }
    })?;

    tokio::select! {
        result = inference::infer(ctx, graph) => result,
        _ = interrupt.recv() => Err(InferenceError::InferenceTerminated { signal: 2, code: 130 }),
        _ = terminate.recv() => Err(InferenceError::InferenceTerminated { signal: 15, code: 143 }),
    }
}

#[cfg(not(unix))]
async fn infer_with_signals(
    ctx: &InferenceContext,
    graph: Arc<GraphResolver>,
) -> Result<InferenceOutcome, InferenceError> {
    inference::infer(ctx, graph).await
}
