//! RustRunner CLI Entry Point
//!
//! Provides command-line interface for workflow execution.
//!
//! # Usage
//!
//! ```bash
//! # Run rustrunner.yml from the current directory
//! rustrunner run
//!
//! # Run a specific file with at most 8 concurrent actions
//! rustrunner run deploy.yml -j 8
//!
//! # Read the workflow from stdin, stop at the first failure
//! cat deploy.yml | rustrunner run - --failure-policy fail-fast
//!
//! # Check a workflow without running it
//! rustrunner validate deploy.yml --actions-dir ./actions
//!
//! # List every option with its environment variable
//! rustrunner info options
//! ```

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};

use rustrunner::config::{self, RunConfig};
use rustrunner::error::{EngineError, Error, EXIT_INTERNAL, EXIT_RUN_FAILED};
use rustrunner::execution::{ActionRegistry, Engine, RenderingMode, StrategyKind};
use rustrunner::workflow::{detect_source, read_document, FailurePolicy, Workflow};
use rustrunner::{APP_NAME, VERSION};

#[derive(Parser, Debug)]
#[command(name = "rustrunner")]
#[command(about = "Runs declarative graphs of actions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short,
        long,
        global = true,
        env = config::ENV_LOG_LEVEL,
        default_value = "info",
        value_parser = ["off", "error", "warn", "info", "debug", "trace"],
        help = "Log verbosity"
    )]
    log_level: String,

    #[arg(long, global = true, env = config::ENV_LOG_FILE, help = "Write logs to this file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a workflow
    Run(RunArgs),

    /// Build the graph and check action types without running anything
    Validate(SourceArgs),

    /// Show program information
    Info {
        #[command(subcommand)]
        topic: InfoTopic,
    },
}

#[derive(Subcommand, Debug)]
enum InfoTopic {
    /// Print the version
    Version,
    /// List recognized options and their environment variables
    Options,
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    #[arg(env = config::ENV_WORKFLOW_FILE, help = "Workflow file, or - for standard input")]
    workflow: Option<String>,

    #[arg(
        long,
        env = config::ENV_CONTEXT_DIRECTORY,
        default_value = ".",
        help = "Directory searched for rustrunner.yml / rustrunner.yaml"
    )]
    context_dir: PathBuf,

    #[arg(
        long = "actions-dir",
        env = config::ENV_ACTION_DIRECTORIES,
        value_delimiter = ':',
        help = "Directory of executable actions (repeatable)"
    )]
    actions_dirs: Vec<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(short, long, env = config::ENV_STRATEGY, default_value = "free", help = "Scheduling strategy: free or sequential")]
    strategy: StrategyKind,

    #[arg(
        short = 'j',
        long,
        env = config::ENV_MAX_PARALLEL,
        default_value_t = num_cpus::get(),
        help = "Maximum concurrent actions (0 = unbounded)"
    )]
    max_parallel: usize,

    #[arg(long, env = config::ENV_FAILURE_POLICY, default_value = "best-effort", help = "fail-fast or best-effort")]
    failure_policy: FailurePolicy,

    #[arg(long, env = config::ENV_LENIENT_OUTCOMES, help = "Render missing outcomes as empty strings")]
    lenient_outcomes: bool,

    #[arg(long, env = config::ENV_ACTION_TIMEOUT, value_parser = parse_timeout, help = "Default per-action timeout in seconds")]
    timeout: Option<Duration>,

    #[arg(long, env = config::ENV_NO_YIELD_FUNCTION, help = "Do not inject yield_outcome into shell actions")]
    no_yield_function: bool,

    #[arg(long, help = "Write the JSON run report to this file")]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn run_config(&self) -> RunConfig {
        RunConfig::default()
            .with_strategy(self.strategy)
            .with_max_parallel(self.max_parallel)
            .with_failure_policy(self.failure_policy)
            .with_rendering(if self.lenient_outcomes {
                RenderingMode::Lenient
            } else {
                RenderingMode::Strict
            })
            .with_action_timeout(self.timeout)
            .with_yield_function(!self.no_yield_function)
    }
}

/// Parses a positive number of seconds.
fn parse_timeout(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("Invalid timeout: {}", value))?;
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(format!("Timeout must be positive: {}", value));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid timeout {}: {}", value, e))
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(level: &str, log_file: Option<&PathBuf>) -> io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    builder.format(|buf, record| match record.level() {
        log::Level::Warn | log::Level::Error => {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        }
        _ => writeln!(buf, "{}", record.args()),
    });

    if let Some(path) = log_file {
        let file = File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Loads the workflow and the action registry named by the arguments.
fn load(args: &SourceArgs) -> Result<(Workflow, ActionRegistry), Error> {
    let source = detect_source(args.workflow.as_deref(), &args.context_dir)?;
    info!("Loading workflow: {}", source);

    let workflow = read_document(&source)?.into_workflow()?;
    let registry = ActionRegistry::builder()
        .with_builtins()
        .load_directories(&args.actions_dirs)?
        .build();

    info!(
        "Workflow loaded: {} actions, {} action types",
        workflow.len(),
        registry.len()
    );
    Ok((workflow, registry))
}

/// Executes a workflow; returns whether the run succeeded.
async fn run(args: RunArgs) -> Result<bool, Error> {
    let (workflow, registry) = load(&args.source)?;
    let engine = Engine::new(workflow, registry, args.run_config())?;

    let report = match engine.run().await {
        Ok(report) => report,
        Err(e) => {
            let EngineError::InvariantViolation { report, .. } = &e;
            println!("{}", report.summary());
            return Err(e.into());
        }
    };

    println!();
    println!("{}", report.summary());
    if log::log_enabled!(log::Level::Debug) {
        println!("{}", report.timeline_chart());
    }

    if let Some(path) = &args.report {
        let written = report
            .to_json()
            .map_err(io::Error::from)
            .and_then(|json| std::fs::write(path, json));
        written.map_err(|source| Error::Report {
            path: path.clone(),
            source,
        })?;
        info!("Report written to {}", path.display());
    }

    Ok(report.is_success())
}

/// Checks a workflow and prints its execution plan.
fn validate(args: SourceArgs) -> Result<(), Error> {
    let (workflow, registry) = load(&args)?;
    let engine = Engine::new(workflow, registry, RunConfig::default())?;
    let workflow = engine.workflow();

    let entry_points: Vec<&str> = workflow.roots().iter().map(|n| n.name()).collect();
    println!("Workflow valid: {} actions", workflow.len());
    println!("Entry points: {}", entry_points.join(", "));
    for (position, &index) in workflow.topological_order().iter().enumerate() {
        let Some(node) = workflow.node(index) else {
            continue;
        };
        let spec = node.spec();
        let mut line = format!("  {:>3}. {} ({})", position + 1, spec.name, spec.action_type);
        if !spec.dependencies.is_empty() {
            let dependencies: Vec<String> =
                spec.dependencies.iter().map(ToString::to_string).collect();
            line.push_str(&format!(" <- {}", dependencies.join(", ")));
        }
        println!("{}", line);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli.log_level, cli.log_file.as_ref()) {
        eprintln!("Error: cannot open log file: {}", e);
        return ExitCode::from(EXIT_INTERNAL);
    }

    let result = match cli.command {
        Commands::Run(args) => {
            info!("{} v{}", APP_NAME, VERSION);
            run(args).await.map(|success| {
                if success {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(EXIT_RUN_FAILED)
                }
            })
        }
        Commands::Validate(args) => validate(args).map(|_| ExitCode::SUCCESS),
        Commands::Info { topic } => {
            match topic {
                InfoTopic::Version => println!("{} {}", APP_NAME, VERSION),
                InfoTopic::Options => print!("{}", config::describe_options()),
            }
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "rustrunner",
            "run",
            "deploy.yml",
            "-s",
            "sequential",
            "-j",
            "3",
            "--failure-policy",
            "fail-fast",
            "--lenient-outcomes",
            "--timeout",
            "1.5",
            "--actions-dir",
            "a",
            "--actions-dir",
            "b",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.source.workflow.as_deref(), Some("deploy.yml"));
        assert_eq!(args.source.actions_dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);

        let config = args.run_config();
        assert_eq!(config.strategy, StrategyKind::Sequential);
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.rendering, RenderingMode::Lenient);
        assert_eq!(config.action_timeout, Some(Duration::from_millis(1500)));
        assert!(config.yield_function);
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["rustrunner", "run", "-s", "random"]).is_err());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("2"), Ok(Duration::from_secs(2)));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("soon").is_err());
    }
}
