use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use local_agents::agent::AdapterRegistry;
use local_agents::config::settings::DEFAULT_SETTINGS_FILE;
use local_agents::config::{AgentKind, Settings, StepSpec, WorkflowCatalog, WorkflowDefinition};
use local_agents::engine::{FailurePolicy, WorkflowExecutor, WorkflowResult};
use local_agents::error::ConfigError;
use local_agents::provider::create_provider;
use local_agents::report;

#[derive(Parser)]
#[command(
    name = "local-agents",
    version,
    about = "Chain local LLM agents through dependency-ordered workflows"
)]
struct Cli {
    /// Path to settings file
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an implementation plan
    Plan {
        /// What to plan
        task: String,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Generate or modify code
    Code {
        /// What to implement
        task: String,
        /// File to modify or create (its current content is passed along)
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Detailed specification or requirements
        #[arg(short, long)]
        spec: Option<String>,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Generate tests for a file, a directory or a description
    Test {
        /// File, directory or description of what to test
        target: String,
        /// Testing framework to use
        #[arg(long)]
        framework: Option<String>,
        /// Run the generated tests with this configured handler afterwards
        #[arg(long, value_name = "HANDLER")]
        run: Option<String>,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Review a file, a directory or a description
    Review {
        /// File, directory or description of what to review
        target: String,
        /// Focus area (security, performance, style, ...)
        #[arg(long)]
        focus: Option<String>,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Run a named workflow or a workflow definition file (*.toml)
    Run {
        /// Workflow name (see `list`) or path to a TOML definition
        workflow: String,
        /// Task description handed to every step
        task: String,
        #[command(flatten)]
        exec: ExecArgs,
    },
    /// Run an ad-hoc linear chain of agents
    Chain {
        /// Agents in order (plan, code, test, review, custom:<handler>)
        #[arg(required = true, num_args = 1..)]
        agents: Vec<String>,
        /// Task description handed to every step
        #[arg(short, long)]
        task: String,
        #[command(flatten)]
        exec: ExecArgs,
    },
    /// List available workflows
    List,
    /// Inspect the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List models available on the inference service
    Models,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Validate the settings file and configured workflows
    Validate,
    /// Set a value by dotted key (e.g. agents.coding, engine.step_timeout_secs)
    Set { key: String, value: String },
    /// Reset the settings file to defaults
    Reset {
        /// Required; the current file is overwritten
        #[arg(long)]
        force: bool,
    },
    /// Copy the settings file to <file>.backup
    Backup,
    /// Replace the settings file with a validated backup
    Restore { backup: PathBuf },
}

#[derive(Args)]
struct AgentArgs {
    /// Override the model for this agent
    #[arg(short, long)]
    model: Option<String>,

    /// File (read into `file_content`) or directory (stored as `directory`) to seed the context
    #[arg(short, long)]
    context: Option<PathBuf>,

    /// Save the agent output to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Timeout in seconds (overrides the settings file)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the full result as JSON instead of the agent output
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ExecArgs {
    /// File (read into `file_content`) or directory (stored as `directory`) to seed the context
    #[arg(long)]
    context: Option<PathBuf>,

    /// Directory for the summary report and step outputs
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Failure policy (overrides the settings file)
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Default per-step timeout in seconds (overrides the settings file)
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the full result as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    FailFast,
    Continue,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FailFast => FailurePolicy::FailFast,
            PolicyArg::Continue => FailurePolicy::Continue,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli)?;

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    match cli.command {
        Commands::Plan { task, agent } => {
            run_agent(&settings, AgentKind::Plan, &task, BTreeMap::new(), None, agent).await
        }
        Commands::Code {
            task,
            file,
            spec,
            agent,
        } => {
            let mut extra = BTreeMap::new();
            if let Some(file) = file {
                if file.is_file() {
                    let code = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    extra.insert("existing_code".to_string(), Value::String(code));
                }
                extra.insert(
                    "target_file".to_string(),
                    Value::String(file.display().to_string()),
                );
            }
            if let Some(spec) = spec {
                extra.insert("specification".to_string(), Value::String(spec));
            }
            run_agent(&settings, AgentKind::Code, &task, extra, None, agent).await
        }
        Commands::Test {
            target,
            framework,
            run,
            agent,
        } => {
            let mut extra = target_context(&target)?;
            if let Some(framework) = framework {
                extra.insert("framework".to_string(), Value::String(framework));
            }
            run_agent(&settings, AgentKind::Test, &target, extra, run.as_deref(), agent).await
        }
        Commands::Review {
            target,
            focus,
            agent,
        } => {
            let mut extra = target_context(&target)?;
            if let Some(focus) = focus {
                extra.insert("focus_area".to_string(), Value::String(focus));
            }
            run_agent(&settings, AgentKind::Review, &target, extra, None, agent).await
        }
        Commands::Run {
            workflow,
            task,
            exec,
        } => {
            let definition = if is_definition_file(&workflow) {
                WorkflowDefinition::from_file(&workflow)?
            } else {
                WorkflowCatalog::with_settings(&settings)?
                    .get(&workflow)?
                    .clone()
            };
            execute(&settings, &definition, &task, exec).await
        }
        Commands::Chain { agents, task, exec } => {
            let kinds = agents
                .iter()
                .map(|a| a.parse::<AgentKind>())
                .collect::<Result<Vec<_>, _>>()?;
            let definition = WorkflowDefinition::linear("chain", kinds)?;
            execute(&settings, &definition, &task, exec).await
        }
        Commands::List => {
            let catalog = WorkflowCatalog::with_settings(&settings)?;
            for workflow in catalog.iter() {
                let chain: Vec<&str> = workflow.steps().iter().map(|s| s.id()).collect();
                println!("{:<14} {}", workflow.name(), workflow.description().unwrap_or(""));
                println!("{:<14} {}", "", chain.join(" -> "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", settings.to_toml_string()?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Validate => {
                let catalog = WorkflowCatalog::with_settings(&settings)?;
                println!(
                    "{} is valid ({} workflows, {} handlers)",
                    cli.config.display(),
                    catalog.names().count(),
                    settings.handlers.len()
                );
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Set { key, value } => {
                let mut settings = settings;
                settings.set_value(&key, &value)?;
                settings.save(&cli.config)?;
                println!("Set {} = {} in {}", key, value, cli.config.display());
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Reset { force } => {
                if !force {
                    bail!(
                        "This overwrites {} with defaults; pass --force to confirm",
                        cli.config.display()
                    );
                }
                Settings::default().save(&cli.config)?;
                println!("Reset {} to defaults", cli.config.display());
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Backup => {
                let backup = settings.backup(&cli.config)?;
                println!("Backup created: {}", backup.display());
                Ok(ExitCode::SUCCESS)
            }
            ConfigAction::Restore { backup } => {
                Settings::restore(&backup, &cli.config)
                    .with_context(|| format!("Invalid backup file: {}", backup.display()))?;
                println!("Restored {} from {}", cli.config.display(), backup.display());
                Ok(ExitCode::SUCCESS)
            }
        },
        Commands::Models => {
            let client = create_provider(&settings);
            let models = client
                .list_models()
                .await
                .with_context(|| format!("Failed to list models from {}", settings.ollama_host))?;
            for model in models {
                let marker = if model == settings.default_model { "*" } else { " " };
                println!("{} {}", marker, model);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Runs a workflow and prints and saves the result.
async fn execute(
    settings: &Settings,
    definition: &WorkflowDefinition,
    task: &str,
    exec: ExecArgs,
) -> anyhow::Result<ExitCode> {
    let seed = seed_context(exec.context.as_deref(), exec.output.as_deref())?;
    let result = run_workflow(
        settings,
        definition,
        task,
        seed,
        exec.policy.map(Into::into),
        exec.timeout,
    )
    .await?;

    print_result(&result, exec.json)?;

    if let Some(dir) = &exec.output {
        let files = report::write_report(&result, dir, exec.json)
            .with_context(|| format!("Failed to write report to {}", dir.display()))?;
        for path in files.all() {
            info!(path = %path.display(), "report written");
        }
    }

    Ok(exit_code(&result))
}

/// Runs a single built-in agent, optionally followed by a handler step.
async fn run_agent(
    settings: &Settings,
    kind: AgentKind,
    task: &str,
    extra: BTreeMap<String, Value>,
    run_handler: Option<&str>,
    args: AgentArgs,
) -> anyhow::Result<ExitCode> {
    let inputs: Vec<String> = extra.keys().cloned().collect();
    let definition = agent_workflow(&kind, args.model.as_deref(), inputs, run_handler)?;

    let mut seed = seed_context(args.context.as_deref(), None)?;
    seed.extend(extra);

    let result = run_workflow(settings, &definition, task, seed, None, args.timeout).await?;

    let output = result
        .step(kind.default_step_id())
        .and_then(|step| step.output.as_deref());
    if args.json {
        println!("{}", result.to_json()?);
    } else if let Some(output) = output {
        println!("{}", output);
        if run_handler.is_some() {
            print_result(&result, false)?;
        }
    } else {
        print_result(&result, false)?;
    }

    if let (Some(path), Some(output)) = (&args.output, output) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, output)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "agent output saved");
    }

    Ok(exit_code(&result))
}

/// Runs a workflow with Ctrl-C wired to cancellation.
async fn run_workflow(
    settings: &Settings,
    definition: &WorkflowDefinition,
    task: &str,
    seed: BTreeMap<String, Value>,
    policy: Option<FailurePolicy>,
    timeout: Option<u64>,
) -> anyhow::Result<WorkflowResult> {
    let mut config = settings.engine_config();
    if let Some(policy) = policy {
        config = config.with_failure_policy(policy);
    }
    if let Some(secs) = timeout {
        if secs == 0 {
            bail!("--timeout must be at least 1 second");
        }
        config = config.with_default_timeout(Duration::from_secs(secs));
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current step before stopping");
            cancel_clone.cancel();
        }
    });

    let registry = AdapterRegistry::from_settings(settings, create_provider(settings));
    let executor = WorkflowExecutor::new(registry, config).with_cancellation(cancel);
    Ok(executor.run(definition, task, seed).await?)
}

fn exit_code(result: &WorkflowResult) -> ExitCode {
    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// One-step workflow for a built-in agent; `run_handler` appends a `custom:<id>` step after it.
fn agent_workflow(
    kind: &AgentKind,
    model: Option<&str>,
    inputs: Vec<String>,
    run_handler: Option<&str>,
) -> Result<WorkflowDefinition, ConfigError> {
    let id = kind.default_step_id();
    let mut step = StepSpec::new(id, kind.clone()).with_inputs(inputs);
    if let Some(model) = model {
        step = step.with_model(model);
    }

    let mut steps = vec![step];
    if let Some(handler) = run_handler {
        steps.push(
            StepSpec::new("run", AgentKind::Custom(handler.to_string()))
                .with_description("Run the generated tests")
                .depends_on([id]),
        );
    }

    WorkflowDefinition::new(id, steps)
}

/// Context for `test` / `review` targets: a file, a directory or a free-form description.
fn target_context(target: &str) -> anyhow::Result<BTreeMap<String, Value>> {
    let path = Path::new(target);
    let mut context = BTreeMap::new();
    if path.is_file() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        context.insert("target_file".to_string(), Value::String(target.to_string()));
        context.insert("code_content".to_string(), Value::String(content));
    } else if path.is_dir() {
        context.insert("target_directory".to_string(), Value::String(target.to_string()));
    } else {
        context.insert("target_description".to_string(), Value::String(target.to_string()));
    }
    Ok(context)
}

fn print_result(result: &WorkflowResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    for (i, step) in result.steps.iter().enumerate() {
        let status = match (&step.error, &step.skip_reason) {
            (Some(error), _) => format!("failed: {}", error),
            (None, Some(reason)) => format!("skipped: {}", reason),
            (None, None) => format!("ok ({:.1}s)", step.duration.as_secs_f64()),
        };
        println!("{}. {:<12} {:<8} {}", i + 1, step.step_id, step.agent.to_string(), status);
    }
    println!();
    println!("{}", result.summary());
    if let Some(error) = &result.error {
        println!("{}", error);
    }
    Ok(())
}

/// Builds the initial context from `--context` and `--output`.
fn seed_context(
    context: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<BTreeMap<String, Value>> {
    let mut seed = BTreeMap::new();

    if let Some(path) = context {
        if path.is_file() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            seed.insert("file_content".to_string(), Value::String(content));
        } else if path.is_dir() {
            seed.insert(
                "directory".to_string(),
                Value::String(path.display().to_string()),
            );
        } else {
            bail!("Context path does not exist: {}", path.display());
        }
    }

    let output_dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    seed.insert(
        "output_directory".to_string(),
        Value::String(output_dir.display().to_string()),
    );

    Ok(seed)
}

/// Workflow arguments ending in `.toml` are definition files; anything else is a catalog name.
fn is_definition_file(workflow: &str) -> bool {
    Path::new(workflow)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn init_tracing(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let level = match cli.verbose {
        0 => "local_agents=info,warn",
        1 => "local_agents=debug,info",
        _ => "local_agents=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let Some(path) = &cli.log_file else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        if cli.log_json {
            registry.with(layer.json()).try_init()?;
        } else {
            registry.with(layer).try_init()?;
        }
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
    if cli.log_json {
        registry.with(layer.json()).try_init()?;
    } else {
        registry.with(layer).try_init()?;
    }
    Ok(Some(guard))
}
