//! Flywheel CLI
//!
//! Drives the task lifecycle against a local data directory. Every command
//! prints its response body as JSON on stdout; rejections print the
//! structured error body on stderr and exit non-zero.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use flywheel::api::{
    CompleteRequest, CompleteResponse, CreateTaskRequest, ErrorBody, EscalateRequest,
    LearningsResponse, ProcessResponse, QueueRequest, QueueResponse, StatsRequest, StatsResponse,
    SweepResponse, TaskResponse, TaskStatusResponse,
};
use flywheel::{
    Engine, FileStore, FlywheelConfig, FlywheelError, HandlerRegistry, LearningContext, Result,
    TaskId, TaskType,
};

#[derive(Parser)]
#[command(name = "flywheel")]
#[command(version = "0.1.0")]
#[command(about = "Task automation with human escalation and a learning flywheel", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory holding tasks.json, learnings.json and flywheel.toml
    #[arg(short, long, global = true, env = "FLYWHEEL_DATA_DIR", default_value = ".flywheel")]
    data_dir: PathBuf,

    /// Caller identity recorded on escalations and completions
    #[arg(long, global = true, env = "FLYWHEEL_ACTOR", default_value = "operator")]
    actor: String,

    /// Output format for responses
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task
    Create {
        /// Task type, e.g. permit_submit
        #[arg(value_name = "TYPE")]
        task_type: String,

        /// Owning project id
        #[arg(long)]
        project: String,

        /// Task input as JSON
        #[arg(long, default_value = "{}")]
        input: String,

        /// Priority 1 (critical) to 5 (low)
        #[arg(long)]
        priority: Option<u8>,

        /// Failed automated attempts allowed before escalation
        #[arg(long)]
        max_retries: Option<u32>,

        /// Run automation immediately
        #[arg(long)]
        auto_process: bool,
    },

    /// Run one automated attempt on a pending or failed task
    Process { task_id: String },

    /// Route a task to a human
    Escalate {
        task_id: String,

        /// Why the task needs a human
        #[arg(long)]
        reason: Option<String>,

        /// Assign the task to someone right away
        #[arg(long, value_name = "WHO")]
        assign: Option<String>,
    },

    /// Record a human resolution and synthesize a learning
    Complete {
        task_id: String,

        /// What the human did
        #[arg(long)]
        action: String,

        /// Resolution output as JSON
        #[arg(long)]
        output: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Retry automation on a failed or escalated task
    Retry { task_id: String },

    /// List tasks, most urgent first
    Queue {
        #[arg(long)]
        status: Option<String>,

        #[arg(long = "type", value_name = "TYPE")]
        task_type: Option<String>,

        #[arg(long)]
        priority: Option<u8>,

        #[arg(long)]
        assigned_to: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Maximum tasks returned (capped at 200)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show queue and automation statistics
    Stats {
        #[arg(long)]
        project: Option<String>,

        /// Only tasks created at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Recover tasks stranded in an in-flight status
    Sweep,

    /// Show one task
    Show { task_id: String },

    /// List learnings that would be offered to a task
    Learnings {
        /// Task type, e.g. permit_submit
        #[arg(value_name = "TYPE")]
        task_type: String,

        /// Task context as JSON, e.g. '{"jurisdiction": "Austin"}'
        #[arg(long)]
        context: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays a single JSON document
    let filter = if cli.verbose {
        "flywheel=debug,info"
    } else {
        "flywheel=info,warn"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match run(&cli).await {
        Ok(body) => print_response(&body, cli.format),
        Err(err) => {
            print_error(&err, cli.format);
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: &Cli) -> Result<Value> {
    let engine = open_engine(&cli.data_dir)?;
    let actor = cli.actor.as_str();

    let body = match &cli.command {
        Commands::Create {
            task_type,
            project,
            input,
            priority,
            max_retries,
            auto_process,
        } => {
            let request = CreateTaskRequest {
                task_type: task_type.clone(),
                project_id: project.clone(),
                input: parse_json("input", input)?,
                priority: *priority,
                auto_process: *auto_process,
                max_retries: *max_retries,
            };
            let task = engine.create_task(request.into_new_task()?).await?;
            serde_json::to_value(TaskStatusResponse::from(&task))?
        }

        Commands::Process { task_id } => {
            let outcome = engine.process_task(&TaskId::from(task_id.as_str())).await?;
            serde_json::to_value(ProcessResponse::from(&outcome))?
        }

        Commands::Escalate {
            task_id,
            reason,
            assign,
        } => {
            let request = EscalateRequest {
                task_id: TaskId::from(task_id.as_str()),
                reason: reason.clone(),
                assigned_to: assign.clone(),
            };
            let task = engine
                .escalate_to_human(&request.task_id, request.reason, request.assigned_to, actor)
                .await?;
            serde_json::to_value(TaskStatusResponse::from(&task))?
        }

        Commands::Complete {
            task_id,
            action,
            output,
            notes,
        } => {
            let request = CompleteRequest {
                task_id: TaskId::from(task_id.as_str()),
                action: action.clone(),
                output: output
                    .as_deref()
                    .map(|raw| parse_json("output", raw))
                    .transpose()?,
                notes: notes.clone(),
            };
            let (id, completion) = request.into_completion();
            let outcome = engine.complete_human_task(&id, completion, actor).await?;
            serde_json::to_value(CompleteResponse::from(&outcome))?
        }

        Commands::Retry { task_id } => {
            let outcome = engine.retry_ai_task(&TaskId::from(task_id.as_str())).await?;
            serde_json::to_value(ProcessResponse::from(&outcome))?
        }

        Commands::Queue {
            status,
            task_type,
            priority,
            assigned_to,
            project,
            limit,
        } => {
            let request = QueueRequest {
                status: status.clone(),
                task_type: task_type.clone(),
                priority: *priority,
                assigned_to: assigned_to.clone(),
                project_id: project.clone(),
                limit: *limit,
            };
            let tasks = engine
                .get_task_queue(&request.to_filter()?, request.limit)
                .await?;
            serde_json::to_value(QueueResponse::from(tasks))?
        }

        Commands::Stats { project, since } => {
            let request = StatsRequest {
                project_id: project.clone(),
                since: *since,
            };
            let stats = engine
                .get_task_stats(request.project_id, request.since)
                .await?;
            serde_json::to_value(StatsResponse {
                success: true,
                stats,
            })?
        }

        Commands::Sweep => {
            let report = engine.sweep_stale(Utc::now()).await?;
            serde_json::to_value(SweepResponse::from(report))?
        }

        Commands::Show { task_id } => {
            let task = engine.get_task(&TaskId::from(task_id.as_str())).await?;
            serde_json::to_value(TaskResponse {
                success: true,
                task,
            })?
        }

        Commands::Learnings { task_type, context } => {
            let task_type: TaskType = task_type.parse()?;
            let context = context
                .as_deref()
                .map(|raw| parse_json("context", raw).map(LearningContext::from))
                .transpose()?;
            let learnings = engine.query_learnings(task_type, context.as_ref()).await?;
            serde_json::to_value(LearningsResponse::from(learnings))?
        }
    };

    Ok(body)
}

fn open_engine(data_dir: &Path) -> Result<Engine> {
    let config = FlywheelConfig::load(data_dir)?;
    let store = Arc::new(FileStore::open(data_dir)?);
    debug!("Using data directory {}", data_dir.display());
    Engine::new(store.clone(), store, HandlerRegistry::placeholders(), config)
}

fn parse_json(field: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| FlywheelError::invalid_field(field, format!("is not valid JSON: {e}")))
}

fn print_response(body: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(body) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{body}"),
        },
        OutputFormat::Text => {
            println!("{}", "OK".green().bold());
            if let Value::Object(fields) = body {
                for (key, value) in fields.iter().filter(|(k, _)| k.as_str() != "success") {
                    match value {
                        Value::String(s) => println!("  {}: {}", key.bold(), s),
                        other => println!("  {}: {}", key.bold(), other),
                    }
                }
            }
        }
    }
}

fn print_error(err: &FlywheelError, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(&ErrorBody::from(err)) {
            Ok(json) => eprintln!("{json}"),
            Err(_) => eprintln!("{err}"),
        },
        OutputFormat::Text => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            if err.is_retryable() {
                eprintln!("  {}", "This operation may succeed if retried.".yellow());
            }
        }
    }
}
