//! dg - quality-driven Mermaid diagram generation
//!
//! CLI entry point: admits one request, runs it, prints the result.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use diagramgen::capability::Capabilities;
use diagramgen::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path, get_prompts_dir};
use diagramgen::config::Config;
use diagramgen::domain::{Complexity, DetailLevel, DiagramType, OutcomeKind, Preferences, SessionResult};
use diagramgen::events::{EventBus, PipelineEvent};
use diagramgen::executor::{RetryPolicy, StageExecutor};
use diagramgen::health::{self, ApiStatus, HealthReport};
use diagramgen::llm::create_client;
use diagramgen::pipeline::SessionOrchestrator;
use diagramgen::prompts::HandlebarsPromptBuilder;
use diagramgen::registry::SessionRegistry;
use diagramgen::validation::{MermaidValidator, SyntaxValidator};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
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
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(provider = %config.llm.provider, model = %config.llm.model, "dg loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Generate {
            request,
            types,
            threshold,
            no_auto_fix,
            complexity,
            detail,
            format,
        } => {
            let options = GenerateOptions {
                types,
                threshold,
                auto_fix: !no_auto_fix,
                complexity,
                detail,
                format,
            };
            cmd_generate(&config, &request, options).await
        }
        Command::Types => cmd_types(),
        Command::Config => cmd_config(&config),
        Command::Health { format } => cmd_health(&config, format).await,
    }
}

struct GenerateOptions {
    types: Vec<DiagramType>,
    threshold: Option<f64>,
    auto_fix: bool,
    complexity: Complexity,
    detail: DetailLevel,
    format: OutputFormat,
}

/// Admit one request, run it to completion and print the result
async fn cmd_generate(config: &Config, request: &str, options: GenerateOptions) -> Result<()> {
    debug!(request_len = request.len(), types = options.types.len(), "cmd_generate: called");
    config.validate().context("Invalid configuration")?;

    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    let prompts = Arc::new(HandlebarsPromptBuilder::new(get_prompts_dir().as_deref()));
    let validator: Arc<dyn SyntaxValidator> = Arc::new(MermaidValidator::new(
        config.quality.weights,
        config.quality.thresholds,
    ));
    let executor = StageExecutor::new(
        Capabilities::llm(client, prompts, validator.clone(), config),
        RetryPolicy::from_config(&config.retry),
    );

    let registry = SessionRegistry::spawn(
        config.pipeline.max_concurrent_sessions,
        config.pipeline.session_timeout(),
    );
    let sweeper = registry.spawn_sweeper(config.pipeline.sweep_interval());
    let bus = EventBus::with_default_capacity();
    let progress = (options.format == OutputFormat::Text).then(|| spawn_progress(&bus));

    let orchestrator = SessionOrchestrator::new(
        registry.clone(),
        executor,
        validator,
        bus,
        config.pipeline.clone(),
    );

    let preferences = Preferences {
        complexity: options.complexity,
        detail_level: options.detail,
        quality_threshold: options.threshold.unwrap_or(config.pipeline.quality_threshold),
        auto_fix: options.auto_fix,
    };
    if !(0.0..=100.0).contains(&preferences.quality_threshold) {
        return Err(eyre::eyre!(
            "--threshold must be within 0..=100 (got {})",
            preferences.quality_threshold
        ));
    }

    let session_id = registry
        .admit(request, preferences)
        .await
        .context("Session was not admitted")?;
    let result = orchestrator
        .run(&session_id, &options.types)
        .await
        .context("Session could not run")?;

    sweeper.abort();
    if let Some(progress) = progress {
        progress.abort();
    }

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_result(&result),
    }
    Ok(())
}

/// Print pipeline progress to stderr as events arrive
fn spawn_progress(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_progress(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "spawn_progress: lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_progress(event: &PipelineEvent) {
    match event {
        PipelineEvent::SessionStarted { diagram_types, .. } => {
            let names: Vec<&str> = diagram_types.iter().map(|t| t.as_str()).collect();
            eprintln!("{} {}", "Generating".bold(), names.join(", "));
        }
        PipelineEvent::AnalysisCompleted { stage, .. } => {
            eprintln!("  {} {} analysis", "✓".green(), stage);
        }
        PipelineEvent::AnalysisSkipped { stage, error, .. } => {
            eprintln!("  {} {} analysis skipped: {}", "!".yellow(), stage, error);
        }
        PipelineEvent::TaskEvaluated {
            diagram_type,
            attempt,
            score,
            ..
        } => {
            eprintln!("  {} attempt {} scored {:.1}", diagram_type.as_str().cyan(), attempt, score);
        }
        PipelineEvent::StageRetry {
            stage, retry, delay_ms, ..
        } => {
            eprintln!("  {} retry {} in {}ms", stage.dimmed(), retry, delay_ms);
        }
        PipelineEvent::SessionExpired { .. } => {
            eprintln!("{}", "Session timed out".red());
        }
        _ => {}
    }
}

fn print_result(result: &SessionResult) {
    println!();
    println!(
        "Session {} {} in {:.1}s",
        result.session_id.to_string().cyan(),
        result.status,
        result.summary.processing_time_ms as f64 / 1000.0
    );

    if let Some(guidance) = &result.guidance {
        println!("\n{}\n{}", "Guidance:".bold(), guidance);
    }

    for diagram in &result.diagrams {
        let name = diagram.diagram_type.display_name();
        let score = diagram
            .quality
            .as_ref()
            .map(|q| format!("{:.1} ({})", q.aggregate(), q.rating()))
            .unwrap_or_else(|| "-".to_string());
        let (icon, label) = match diagram.outcome {
            OutcomeKind::Succeeded => ("✓".green(), "succeeded".green()),
            OutcomeKind::BelowThreshold => ("!".yellow(), "below threshold".yellow()),
            OutcomeKind::Failed => ("✗".red(), "failed".red()),
        };
        println!(
            "\n{} {} {} score {} after {} attempt(s)",
            icon,
            name.bold(),
            label,
            score,
            diagram.attempts
        );
        if let Some(warning) = &diagram.warning {
            println!("  {}", warning.yellow());
        }
        if let Some(failure) = &diagram.failure
            && diagram.diagram.is_none()
        {
            println!("  {}", failure.to_string().red());
        }
        if let Some(code) = &diagram.diagram {
            println!("```mermaid\n{}\n```", code);
        }
    }

    let s = &result.summary;
    println!(
        "\n{} {} succeeded, {} below threshold, {} failed of {}; average quality {:.1}",
        "Summary:".bold(),
        s.successful_diagrams,
        s.below_threshold_diagrams,
        s.failed_diagrams,
        s.total_requested,
        s.average_quality_score
    );
}

/// List supported diagram types
fn cmd_types() -> Result<()> {
    debug!("cmd_types: called");
    for t in DiagramType::ALL {
        println!("{:<20} {}", t.as_str().cyan(), t.display_name());
    }
    Ok(())
}

/// Check the completion service and report session capacity
///
/// Exits non-zero when the service is not healthy.
async fn cmd_health(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_health: called");
    let registry = SessionRegistry::spawn(
        config.pipeline.max_concurrent_sessions,
        config.pipeline.session_timeout(),
    );

    let report = match create_client(&config.llm) {
        Ok(client) => health::check(client.as_ref(), &registry)
            .await
            .context("Failed to read registry statistics")?,
        Err(e) => {
            debug!(error = %e, "cmd_health: no client");
            let stats = registry.stats().await.context("Failed to read registry statistics")?;
            HealthReport::new(ApiStatus::Error { message: e.to_string() }, None, &stats)
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            let api = if report.is_healthy() {
                report.api_status.to_string().green()
            } else {
                report.api_status.to_string().red()
            };
            println!("{}", "dg health".bold());
            println!("API status:      {}", api);
            if let Some(model) = &report.model {
                println!("Model:           {}", model);
            }
            println!("Active sessions: {}", report.active_sessions);
            println!("Max concurrent:  {}", report.max_concurrent_sessions);
            println!("System status:   {}", report.system_status);
        }
    }

    if !report.is_healthy() {
        return Err(eyre::eyre!("Completion service is not healthy"));
    }
    Ok(())
}

/// Print the resolved configuration; the API key itself is never stored
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    println!("{}", yaml);
    let key = if config.llm.api_key_set() {
        "set".green()
    } else {
        "not set".red()
    };
    println!("# {} is {}", config.llm.api_key_env, key);
    Ok(())
}
