//! ralphd - spec-driven task orchestrator
//!
//! CLI entry point: run a spec, inspect its state, manage the gateway.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use ralphd::cli::{Cli, Command, OutputFormat, get_log_path};
use ralphd::config::Config;
use ralphd::domain::{StateSnapshot, TaskStatus};
use ralphd::exec::{CommandRunner, DirectRunner, FallbackRunner, ShellTestRunner, TestRunner};
use ralphd::gateway::server::shutdown_signal;
use ralphd::gateway::{GatewayProcess, GatewayServer, StartOutcome};
use ralphd::llm::create_client;
use ralphd::orchestrator::{LogHook, Orchestrator, RunReport, ShellHook};
use ralphd::ralph::{ActivityLog, AtomicApplier, ChainGenerator, LlmGenerator, PatternAnalyzer, RalphLoop, read_activity};
use ralphd::spec::{SpecParser, YamlSpecParser};
use ralphd::tasks::TaskManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            spec_dir,
            max_attempts,
            no_gateway,
            state_dir,
            timeout_ms,
        } => {
            let options = RunOptions {
                max_attempts,
                no_gateway,
                state_dir,
                timeout_ms,
            };
            let code = cmd_run(&config, &spec_dir, options).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Status {
            spec_dir,
            state_dir,
            format,
            history,
        } => cmd_status(&config, &spec_dir, state_dir, format, history),
        Command::GatewayStart { foreground } => {
            cmd_gateway_start(&config, foreground, cli.config.as_ref(), cli.log_level.as_deref()).await
        }
        Command::GatewayStop => cmd_gateway_stop(&config).await,
        Command::GatewayStatus { format } => cmd_gateway_status(&config, format).await,
        Command::GatewayServe => run_gateway(&config, &GatewayProcess::new(config.gateway.clone())).await,
    }
}

/// `run` overrides on top of the config file
struct RunOptions {
    max_attempts: Option<u32>,
    no_gateway: bool,
    state_dir: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

/// Command runner for this invocation: gateway-first when one is recorded
fn build_command_runner(config: &Config, no_gateway: bool) -> Arc<dyn CommandRunner> {
    if no_gateway || !config.gateway.enabled {
        debug!("build_command_runner: gateway disabled");
        return Arc::new(DirectRunner);
    }
    match GatewayProcess::new(config.gateway.clone()).client() {
        Some(client) => {
            debug!(port = client.port(), "build_command_runner: gateway recorded");
            Arc::new(FallbackRunner::new(client, config.gateway.health_timeout()))
        }
        None => {
            debug!("build_command_runner: no gateway port file");
            Arc::new(DirectRunner)
        }
    }
}

fn build_generator(config: &Config) -> ChainGenerator {
    if !config.llm.enabled {
        return ChainGenerator::standard(None);
    }
    let llm = create_client(&config.llm)
        .map_err(|e| e.to_string())
        .and_then(|client| LlmGenerator::new(Arc::from(client), config.llm.max_tokens).map_err(|e| e.to_string()));
    match llm {
        Ok(generator) => ChainGenerator::standard(Some(generator)),
        Err(e) => {
            warn!(error = %e, "LLM generator unavailable, using rules and fallback only");
            eprintln!("{} LLM corrections disabled: {}", "Warning:".yellow(), e);
            ChainGenerator::standard(None)
        }
    }
}

/// Execute a spec; returns the process exit code
async fn cmd_run(config: &Config, spec_dir: &Path, options: RunOptions) -> Result<i32> {
    debug!(?spec_dir, "cmd_run: called");
    let spec_dir = spec_dir
        .canonicalize()
        .context(format!("Spec directory not found: {}", spec_dir.display()))?;

    let descriptors = YamlSpecParser::new(&config.spec.tasks_file).parse(&spec_dir)?;

    let state_dir = options
        .state_dir
        .unwrap_or_else(|| config.state.resolve_dir(&spec_dir));
    let state_path = state_dir.join(&config.state.state_file);
    let timeout_ms = options.timeout_ms.unwrap_or(config.ralph.command_timeout_ms);
    let max_attempts = options.max_attempts.unwrap_or(config.ralph.max_attempts);

    let command_runner = build_command_runner(config, options.no_gateway);
    let runner: Arc<dyn TestRunner> = Arc::new(ShellTestRunner::new(command_runner, &spec_dir, timeout_ms));

    let ralph = RalphLoop::new(
        Arc::new(PatternAnalyzer),
        Arc::new(build_generator(config)),
        Arc::new(AtomicApplier::default()),
        runner.clone(),
        &spec_dir,
    )
    .with_activity_log(ActivityLog::new(state_dir.join(&config.state.activity_log)));

    let mut orchestrator = Orchestrator::new(runner, ralph, &state_path, max_attempts).with_hook(Box::new(LogHook));
    if let Some(command) = &config.hooks.on_complete {
        orchestrator = orchestrator.with_hook(Box::new(ShellHook::new(command, &spec_dir)));
    }

    println!("Running {} task(s) from {}", descriptors.len(), spec_dir.display());
    let report = orchestrator.run(descriptors).await?;
    print_report(&report);

    Ok(if report.is_success() { 0 } else { 1 })
}

fn print_report(report: &RunReport) {
    println!();
    for id in &report.completed {
        println!("  {} {}", "completed".green(), id);
    }
    if let Some(blocked) = &report.blocked {
        println!("  {} {} after {} attempt(s)", "blocked".red(), blocked.task_id, blocked.attempts);
        for attempt in &blocked.history {
            println!(
                "      #{} {} - {}",
                attempt.attempt,
                attempt.outcome.to_string().yellow(),
                attempt.analysis_summary
            );
        }
    }
    for id in &report.pending {
        println!("  {} {}", "pending".dimmed(), id);
    }
    for id in &report.skipped {
        println!("  {} {} (optional)", "skipped".yellow(), id);
    }
    println!();

    let summary = format!(
        "{} completed, {} pending, {} blocked in {}ms",
        report.completed.len(),
        report.pending.len(),
        usize::from(report.blocked.is_some()),
        report.duration_ms
    );
    if !report.is_success() {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}

fn colored_status(status: TaskStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        TaskStatus::Completed => text.green(),
        TaskStatus::Blocked => text.red(),
        TaskStatus::InProgress => text.yellow(),
        TaskStatus::Queued => text.cyan(),
        TaskStatus::NotStarted => text.dimmed(),
    }
}

fn cmd_status(
    config: &Config,
    spec_dir: &Path,
    state_dir: Option<PathBuf>,
    format: OutputFormat,
    history: bool,
) -> Result<()> {
    debug!(?spec_dir, ?format, history, "cmd_status: called");
    let state_dir = state_dir.unwrap_or_else(|| config.state.resolve_dir(spec_dir));
    let state_path = state_dir.join(&config.state.state_file);
    let snapshot = TaskManager::load_snapshot(&state_path)
        .context(format!("Failed to read state from {}", state_path.display()))?;
    let activity = if history {
        read_activity(state_dir.join(&config.state.activity_log))?
    } else {
        Vec::new()
    };

    match format {
        OutputFormat::Json => {
            let mut json = serde_json::json!({ "state": snapshot });
            if history {
                json["activity"] = serde_json::to_value(&activity)?;
            }
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            let Some(snapshot) = snapshot else {
                println!("No execution state at {}", state_path.display());
                return Ok(());
            };
            print_snapshot(&snapshot);
            if history {
                println!();
                println!("Activity");
                println!("--------");
                if activity.is_empty() {
                    println!("(no correction attempts)");
                }
                for entry in &activity {
                    println!(
                        "{} {} #{} {} - {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.task_id,
                        entry.attempt_number,
                        entry.outcome.to_string().yellow(),
                        entry.error_summary
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &StateSnapshot) {
    let execution = &snapshot.execution;
    println!("Execution State");
    println!("---------------");
    println!("Version: {}", execution.version);
    println!("Updated: {}", execution.updated_at.to_rfc3339());
    println!("Current: {}", execution.current_task_id.as_deref().unwrap_or("-"));
    println!("Completed: {}", execution.completed_task_ids.join(", "));
    println!();
    println!("{:<20} {:<12} {:>8}  LAST ERROR", "TASK", "STATUS", "ATTEMPTS");
    for task in &snapshot.tasks {
        println!(
            "{:<20} {:<12} {:>8}  {}",
            task.id,
            colored_status(task.status),
            task.attempts,
            task.last_error.as_deref().unwrap_or("")
        );
    }
}

async fn cmd_gateway_start(
    config: &Config,
    foreground: bool,
    config_path: Option<&PathBuf>,
    log_level: Option<&str>,
) -> Result<()> {
    debug!(foreground, "cmd_gateway_start: called");
    let process = GatewayProcess::new(config.gateway.clone());

    if foreground {
        let status = process.status().await;
        if status.healthy {
            println!("Gateway is already running (port: {})", status.port.unwrap_or_default());
            return Ok(());
        }
        println!("Starting gateway in foreground mode...");
        return run_gateway(config, &process).await;
    }

    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let mut extra_args = Vec::new();
    if let Some(path) = config_path {
        extra_args.push("--config".to_string());
        extra_args.push(path.display().to_string());
    }
    if let Some(level) = log_level {
        extra_args.push("--log-level".to_string());
        extra_args.push(level.to_string());
    }

    match process.start(&exe, &extra_args).await? {
        StartOutcome::AlreadyRunning { pid: Some(pid), port } => {
            println!("Gateway is already running (PID: {}, port: {})", pid, port)
        }
        StartOutcome::AlreadyRunning { pid: None, port } => println!("Gateway is already running (port: {})", port),
        StartOutcome::Started { pid, port } => {
            println!("{} (PID: {}, port: {})", "Gateway started".green(), pid, port)
        }
    }
    Ok(())
}

/// Serve until SIGINT/SIGTERM or a Shutdown request
async fn run_gateway(config: &Config, process: &GatewayProcess) -> Result<()> {
    debug!("run_gateway: called");
    process.register_self()?;

    let gateway = &config.gateway;
    let server = match GatewayServer::bind(&gateway.host, gateway.preferred_port, gateway.port_attempts).await {
        Ok(server) => server.with_port_file(process.port_file()),
        Err(e) => {
            process.cleanup();
            return Err(e).context("Failed to bind gateway");
        }
    };
    println!("Gateway listening on {}:{}", gateway.host, server.port());

    let result = server.serve(shutdown_signal()).await;
    process.cleanup();
    let served = result.context("Gateway server failed")?;
    info!(served, "Gateway exited");
    Ok(())
}

async fn cmd_gateway_stop(config: &Config) -> Result<()> {
    debug!("cmd_gateway_stop: called");
    let process = GatewayProcess::new(config.gateway.clone());
    if process.stop().await? {
        println!("Gateway stopped");
    } else {
        println!("Gateway is not running");
    }
    Ok(())
}

async fn cmd_gateway_status(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_gateway_status: called");
    let process = GatewayProcess::new(config.gateway.clone());
    let status = process.status().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            println!("Gateway Status");
            println!("--------------");
            if status.healthy {
                println!("Status: {}", "running".green());
            } else {
                println!("Status: {}", "stopped".red());
            }
            if let Some(pid) = status.pid {
                println!("PID: {}", pid);
            }
            if let Some(port) = status.port {
                println!("Port: {}", port);
            }
            if let Some(version) = &status.version {
                println!("Version: {}", version);
            }
            if let Some(served) = status.served {
                println!("Requests served: {}", served);
            }
            println!("PID file: {}", process.pid_file().display());
        }
    }
    Ok(())
}
