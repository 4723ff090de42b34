//! `caduceus assess` — Run one task through the agent loop.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use caduceus_agent::{Controller, ControllerSettings, Emitter, Outcome, RunReport, RunRequest};
use caduceus_providers::{ProviderSettings, build};
use caduceus_stream::{StreamHandler, consume};
use caduceus_telemetry::TelemetryEngine;
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::{Map, Value};

/// How much of an observation the live view prints.
const OBSERVATION_PREVIEW_CHARS: usize = 240;

#[derive(Args)]
pub struct AssessArgs {
    /// The task. Use `-` to read it from stdin.
    pub task: String,

    /// Override the configured iteration budget
    #[arg(short, long)]
    pub max_iterations: Option<u32>,

    /// Replace the built-in system prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Print steps live as the run produces them
    #[arg(long)]
    pub stream: bool,

    /// Print the full run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Correlation id for logs and traces
    #[arg(long)]
    pub thread_id: Option<String>,

    /// Run without the built-in calculators
    #[arg(long)]
    pub no_tools: bool,
}

pub async fn run(path: Option<&Path>, args: AssessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = build(&ProviderSettings::from_config(&config.provider)).map_err(|e| {
        format!(
            "{e}\n  Set CADUCEUS_API_KEY or add api_key to {}",
            caduceus_config::AppConfig::config_dir().join("config.toml").display()
        )
    })?;

    let telemetry = config
        .telemetry
        .enabled
        .then(|| Arc::new(TelemetryEngine::from_config(&config.telemetry)));

    let mut controller = Controller::new(provider, ControllerSettings::from_config(&config));
    if let Some(engine) = &telemetry {
        controller = controller.with_trace_sink(engine.clone());
    }

    let request = build_request(&args, config.agent.max_iterations)?;

    let (report, failure) = if args.stream {
        stream_run(controller, config.stream.channel_capacity, request).await
    } else {
        eprint!("  Thinking...");
        let result = controller.run(request).await;
        eprint!("\r              \r");
        match result {
            Ok(report) => (Some(report), None),
            Err(e) => {
                let message = e.to_string();
                (Some(e.into_report()), Some(message))
            }
        }
    };

    if let Some(engine) = &telemetry {
        let usage = engine.usage_snapshot();
        tracing::info!(
            model_calls = usage.model_calls,
            capability_calls = usage.capability_calls,
            total_tokens = usage.total_tokens,
            "Usage"
        );
    }

    if let Some(report) = &report {
        print_report(report, args.json)?;
    }
    match failure {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn build_request(args: &AssessArgs, default_iterations: u32) -> Result<RunRequest, Box<dyn std::error::Error>> {
    let task = if args.task == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        args.task.clone()
    };
    if task.trim().is_empty() {
        return Err("Task is empty".into());
    }

    let mut request = RunRequest::new(task.trim())
        .with_max_iterations(args.max_iterations.unwrap_or(default_iterations));
    if !args.no_tools {
        request = request.with_tools(caduceus_tools::default_registry());
    }
    if let Some(system) = &args.system {
        request = request.with_system_prompt(system);
    }
    if let Some(thread_id) = &args.thread_id {
        request = request.with_thread_id(thread_id);
    }
    Ok(request)
}

/// Run through the emitter and decode our own stream, the same path a
/// remote observer would take.
async fn stream_run(
    controller: Controller,
    capacity: usize,
    request: RunRequest,
) -> (Option<RunReport>, Option<String>) {
    let emitter = Emitter::new(Arc::new(controller), capacity);
    let (frames, handle) = emitter.spawn(request).into_byte_stream();

    let mut printer = LivePrinter;
    if let Err(e) = consume(frames, &mut printer).await {
        tracing::warn!(error = %e, "Progress stream ended early");
    }

    match handle.join().await {
        Some(report) => {
            let failure = match &report.outcome {
                Outcome::Failed { reason } => Some(reason.clone()),
                _ => None,
            };
            (Some(report), failure)
        }
        None => (None, Some("run was cancelled".into())),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    match (&report.outcome, &report.answer) {
        (Outcome::Answer, Some(answer)) => println!("{answer}"),
        (Outcome::Exhausted, _) => eprintln!(
            "  ⚠️  No final answer after {} iteration(s). Review the reasoning trace with --json.",
            report.iterations
        ),
        (Outcome::Failed { .. }, _) | (Outcome::Answer, None) => {}
    }
    if !report.tools_used.is_empty() {
        eprintln!("  Tools used: {}", report.tools_used.join(", "));
    }
    Ok(())
}

/// Prints each streamed step to stderr as it arrives.
struct LivePrinter;

impl StreamHandler for LivePrinter {
    fn on_thought(&mut self, iteration: u32, thought: &str, _timestamp: DateTime<Utc>) {
        eprintln!("  [{iteration}] 💭 {thought}");
    }

    fn on_action(&mut self, iteration: u32, tool: &str, args: &Map<String, Value>, _timestamp: DateTime<Utc>) {
        let args = serde_json::to_string(args).unwrap_or_default();
        eprintln!("  [{iteration}] 🔧 {tool}({args})");
    }

    fn on_observation(&mut self, iteration: u32, observation: &str, _timestamp: DateTime<Utc>) {
        let mut preview: String = observation.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        if preview.len() < observation.len() {
            preview.push('…');
        }
        eprintln!("  [{iteration}] 👁  {preview}");
    }

    fn on_error(&mut self, error: &str) {
        eprintln!("  ❌ {error}");
    }
}
