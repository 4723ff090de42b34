//! The agent loop: think, act, observe, until an answer or the budget runs
//! out.
//!
//! Each cycle makes one model call and records at most three steps:
//!
//! - **Thought**: the model's reasoning, when it gave any
//! - **Action**: the one capability it asked for
//! - **Observation**: the bounded result, or what went wrong
//!
//! Capability failures, unknown capabilities, and unparsable responses
//! all become Observations and the loop continues. Only a provider failure
//! or a transport failure (the observer rejecting a step) ends a run
//! early, and both hand back the partial report.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use caduceus_config::AppConfig;
use caduceus_core::{
    BestEffortSink, Capability, CapabilityError, GenerateOptions, GenerateRequest, Provider,
    ProviderError, Step, ToolArgs, TraceEvent, TraceRecord, TraceSink, Transcript,
    TransportError, Usage,
};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::decision::{self, Decision};
use crate::prompt;
use crate::run::{Outcome, RunError, RunReport, RunRequest};

/// Marker appended to observations cut at the length bound.
const TRUNCATION_MARKER: &str = " …[truncated]";

/// How much raw model text a parse-failure Thought keeps.
const RAW_THOUGHT_CHARS: usize = 500;

/// Receives each step as soon as it is committed to the transcript.
#[async_trait]
pub trait RunObserver: Send {
    async fn on_step(&mut self, step: &Step) -> Result<(), TransportError>;
}

/// An observer that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl RunObserver for NoopObserver {
    async fn on_step(&mut self, _step: &Step) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Model and loop settings shared by every run of one controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub observation_max_chars: usize,
    pub capability_timeout: Duration,
}

impl ControllerSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            observation_max_chars: 4000,
            capability_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: Some(config.provider.max_tokens),
            observation_max_chars: config.agent.observation_max_chars,
            capability_timeout: Duration::from_secs(config.agent.capability_timeout_secs),
        }
    }

    fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..GenerateOptions::new(&self.model)
        }
    }
}

/// Runs the agent loop against one provider. Holds no per-run state, so
/// one controller serves any number of concurrent runs.
pub struct Controller {
    provider: Arc<dyn Provider>,
    settings: ControllerSettings,
    sink: BestEffortSink,
}

impl Controller {
    pub fn new(provider: Arc<dyn Provider>, settings: ControllerSettings) -> Self {
        Self {
            provider,
            settings,
            sink: BestEffortSink::noop(),
        }
    }

    /// Send trace records to `sink`. Sink failures never reach the run.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = BestEffortSink::new(sink);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Run to a terminal state without observing steps.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, RunError> {
        self.run_observed(request, &mut NoopObserver).await
    }

    /// Run to a terminal state, handing each committed step to `observer`.
    pub async fn run_observed<O>(
        &self,
        request: RunRequest,
        observer: &mut O,
    ) -> Result<RunReport, RunError>
    where
        O: RunObserver + ?Sized,
    {
        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = RunState::new(thread_id);

        info!(
            thread_id = %state.thread_id,
            provider = %self.provider.name(),
            model = %self.settings.model,
            max_iterations = request.max_iterations,
            capabilities = request.tools.len(),
            "Run starting"
        );
        self.trace(
            &state.thread_id,
            TraceEvent::RunStarted {
                max_iterations: request.max_iterations,
                capabilities: request.tools.names().iter().map(|s| s.to_string()).collect(),
                metadata: request.metadata.clone(),
            },
        );

        let system = prompt::system_prompt(request.system_prompt.as_deref(), &request.tools);

        for iteration in 1..=request.max_iterations {
            debug!(thread_id = %state.thread_id, iteration, "Cycle starting");

            let generation = match self
                .generate(&mut state, &system, &request, iteration)
                .await
            {
                Ok(generation) => generation,
                Err(source) => {
                    warn!(thread_id = %state.thread_id, iteration, error = %source, "Provider failed");
                    let report = self.finish(
                        state,
                        Outcome::Failed {
                            reason: source.to_string(),
                        },
                        None,
                    );
                    return Err(RunError::Provider {
                        source,
                        report: Box::new(report),
                    });
                }
            };

            let content = generation.content;
            let decision = match decision::parse(&content) {
                Ok(decision) => decision,
                Err(reason) => {
                    warn!(thread_id = %state.thread_id, iteration, %reason, "Unparsable model response");
                    self.trace(
                        &state.thread_id,
                        TraceEvent::ParseFailure {
                            iteration,
                            reason: reason.clone(),
                        },
                    );
                    let raw = truncate_chars(content.trim(), RAW_THOUGHT_CHARS, TRUNCATION_MARKER);
                    if !raw.is_empty() {
                        self.commit(&mut state, observer, Step::thought(iteration, raw))
                            .await?;
                    }
                    let note = format!(
                        "Error: your response could not be used ({reason}). Respond with a single JSON object containing either an action or a final_answer."
                    );
                    self.commit(&mut state, observer, Step::observation(iteration, note))
                        .await?;
                    state.iterations = iteration;
                    continue;
                }
            };

            if let Some(thought) = decision.thought() {
                self.commit(&mut state, observer, Step::thought(iteration, thought))
                    .await?;
            }

            match decision {
                Decision::Final { answer, .. } => {
                    state.iterations = iteration;
                    let report = self.finish(state, Outcome::Answer, Some(answer));
                    return Ok(report);
                }
                Decision::Invoke { tool, args, .. } => {
                    let action_args = match &args {
                        Value::Object(map) => map.clone(),
                        _ => serde_json::Map::new(),
                    };
                    self.commit(&mut state, observer, Step::action(iteration, &tool, action_args))
                        .await?;

                    let text = self.act(&mut state, &request, &tool, args).await;
                    let text = truncate_chars(
                        &text,
                        self.settings.observation_max_chars,
                        TRUNCATION_MARKER,
                    );
                    self.commit(&mut state, observer, Step::observation(iteration, text))
                        .await?;
                    state.iterations = iteration;
                }
            }
        }

        warn!(
            thread_id = %state.thread_id,
            max_iterations = request.max_iterations,
            "Iteration budget exhausted without a final answer"
        );
        Ok(self.finish(state, Outcome::Exhausted, None))
    }

    async fn generate(
        &self,
        state: &mut RunState,
        system: &str,
        request: &RunRequest,
        iteration: u32,
    ) -> Result<caduceus_core::Generation, ProviderError> {
        let generate_request = GenerateRequest {
            system: Some(system.to_string()),
            prompt: prompt::cycle_prompt(
                &request.prompt,
                &state.transcript,
                iteration,
                request.max_iterations,
            ),
            options: self.settings.generate_options(),
        };

        let started = Instant::now();
        let result = self.provider.generate(generate_request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.trace(
            &state.thread_id,
            TraceEvent::ModelCall {
                model: result
                    .as_ref()
                    .map(|g| g.model.clone())
                    .ok()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| self.settings.model.clone()),
                duration_ms,
                usage: result.as_ref().ok().and_then(|g| g.usage),
                success: result.is_ok(),
            },
        );

        let generation = result?;
        state.model_calls += 1;
        if let Some(usage) = &generation.usage {
            state.usage.accumulate(usage);
        }
        Ok(generation)
    }

    /// Resolve and invoke one capability. Always yields observation text.
    async fn act(
        &self,
        state: &mut RunState,
        request: &RunRequest,
        tool: &str,
        args: Value,
    ) -> String {
        let result = match Self::resolve(request, tool, args) {
            Ok((capability, args)) => {
                state.record_tool(tool);
                let started = Instant::now();
                let result = self.invoke(capability, args).await;
                self.trace(
                    &state.thread_id,
                    TraceEvent::CapabilityCall {
                        name: tool.to_string(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        success: result.is_ok(),
                    },
                );
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(Value::String(text)) => text,
            Ok(value) => value.to_string(),
            Err(e) => {
                warn!(thread_id = %state.thread_id, %tool, error = %e, "Capability call failed");
                format!("Error: {e}")
            }
        }
    }

    /// Look up `tool` and check `args` against its schema.
    fn resolve<'r>(
        request: &'r RunRequest,
        tool: &str,
        args: Value,
    ) -> Result<(&'r Capability, ToolArgs), CapabilityError> {
        let Some(capability) = request.tools.get(tool) else {
            let available = request.tools.names();
            return Err(CapabilityError::NotFound {
                name: tool.to_string(),
                available: if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                },
            });
        };
        let args = ToolArgs::from_value(args)?;
        capability.validate(&args)?;
        Ok((capability, args))
    }

    /// Run the handler under a timeout with panics caught.
    async fn invoke(&self, capability: &Capability, args: ToolArgs) -> Result<Value, CapabilityError> {
        let call = AssertUnwindSafe(capability.invoke(args)).catch_unwind();
        match tokio::time::timeout(self.settings.capability_timeout, call).await {
            Err(_) => Err(CapabilityError::Timeout {
                name: capability.name().to_string(),
                timeout_secs: self.settings.capability_timeout.as_secs(),
            }),
            Ok(Err(panic)) => Err(CapabilityError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        }
    }

    /// Append a step and hand it to the observer.
    async fn commit<O>(
        &self,
        state: &mut RunState,
        observer: &mut O,
        step: Step,
    ) -> Result<(), RunError>
    where
        O: RunObserver + ?Sized,
    {
        let delivered = observer.on_step(&step).await;
        state.transcript.push(step);
        if let Err(source) = delivered {
            warn!(thread_id = %state.thread_id, error = %source, "Observer rejected step; stopping run");
            let report = self.finish(
                state.clone(),
                Outcome::Failed {
                    reason: source.to_string(),
                },
                None,
            );
            return Err(RunError::Transport {
                source,
                report: Box::new(report),
            });
        }
        Ok(())
    }

    fn finish(&self, state: RunState, outcome: Outcome, answer: Option<String>) -> RunReport {
        info!(
            thread_id = %state.thread_id,
            outcome = outcome.label(),
            iterations = state.iterations,
            steps = state.transcript.len(),
            tools_used = state.tools_used.len(),
            "Run finished"
        );
        self.trace(
            &state.thread_id,
            TraceEvent::RunFinished {
                outcome: outcome.label().to_string(),
                iterations: state.iterations,
            },
        );

        RunReport {
            reasoning_trace: state.transcript.render(),
            thread_id: state.thread_id,
            outcome,
            answer,
            steps: state.transcript.into_steps(),
            iterations: state.iterations,
            tools_used: state.tools_used,
            usage: state.usage,
            model_calls: state.model_calls,
        }
    }

    fn trace(&self, thread_id: &str, event: TraceEvent) {
        self.sink.record(TraceRecord::new(thread_id, event));
    }
}

/// Mutable bookkeeping for one run.
#[derive(Debug, Clone)]
struct RunState {
    thread_id: String,
    transcript: Transcript,
    iterations: u32,
    tools_used: Vec<String>,
    usage: Usage,
    model_calls: u32,
}

impl RunState {
    fn new(thread_id: String) -> Self {
        Self {
            thread_id,
            transcript: Transcript::new(),
            iterations: 0,
            tools_used: Vec::new(),
            usage: Usage::default(),
            model_calls: 0,
        }
    }

    fn record_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|t| t == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

/// Cut `text` to at most `max` characters, marker included.
pub(crate) fn truncate_chars(text: &str, max: usize, marker: &str) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(marker.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(marker);
    out
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
