//! Single-shot structured assessment and peer critique.
//!
//! Not every task needs the full loop. An [`Assessor`] asks once for a
//! structured value, recovers it from whatever the model wrapped it in, and
//! deserializes it. When recovery fails it asks once more, quoting the
//! failure. [`Assessor::critique`] sends a finished assessment back for
//! review.

use std::sync::Arc;
use std::time::Instant;

use caduceus_core::{
    BestEffortSink, GenerateOptions, GenerateRequest, Provider, ProviderError, TraceEvent,
    TraceRecord, TraceSink, Usage,
};
use caduceus_recovery::{RecoveryError, recover_as};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

const CRITIC_PROMPT: &str = "You are a senior clinician reviewing a colleague's structured \
assessment. Check it against the task for factual errors, unsafe recommendations, and missing \
considerations. Respond with a single JSON object: \
{\"verdict\": \"agree\" | \"revise\" | \"disagree\", \"issues\": [string], \"confidence\": number between 0 and 1}.";

/// A recovered, typed response.
#[derive(Debug, Clone)]
pub struct Assessment<T> {
    pub value: T,
    /// The model text the value was recovered from.
    pub raw: String,
    /// Model calls made, 1 or 2.
    pub attempts: u32,
    pub usage: Usage,
}

/// A reviewer's opinion of an assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Critique {
    pub verdict: Verdict,
    pub issues: Vec<String>,
    /// Clamped to `[0, 1]`.
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Agree,
    Revise,
    Disagree,
}

impl Verdict {
    /// Lenient parse of the reviewer's wording.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "agree" | "approve" | "approved" | "accept" | "accepted" | "concur" => Some(Self::Agree),
            "revise" | "revision" | "partial" | "partially_agree" | "modify" => Some(Self::Revise),
            "disagree" | "reject" | "rejected" | "dispute" => Some(Self::Disagree),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawCritique {
    verdict: String,
    #[serde(default)]
    issues: Vec<Value>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl TryFrom<RawCritique> for Critique {
    type Error = RecoveryError;

    fn try_from(raw: RawCritique) -> Result<Self, Self::Error> {
        let verdict = Verdict::parse(&raw.verdict).ok_or_else(|| RecoveryError::Shape {
            reason: format!("unknown verdict '{}'", raw.verdict),
        })?;
        let issues = raw
            .issues
            .into_iter()
            .map(|issue| match issue {
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect();
        Ok(Self {
            verdict,
            issues,
            confidence: raw.confidence.map(|c| c.clamp(0.0, 1.0)),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssessError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no usable structured response: {source}")]
    Recovery { source: RecoveryError, raw: String },
}

impl AssessError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Recovery { .. } => false,
        }
    }
}

/// Produces structured values from single model calls.
pub struct Assessor {
    provider: Arc<dyn Provider>,
    options: GenerateOptions,
    sink: BestEffortSink,
}

impl Assessor {
    pub fn new(provider: Arc<dyn Provider>, options: GenerateOptions) -> Self {
        Self {
            provider,
            options,
            sink: BestEffortSink::noop(),
        }
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = BestEffortSink::new(sink);
        self
    }

    /// Ask for a `T`, re-asking once if the first response is unusable.
    pub async fn assess<T: DeserializeOwned>(
        &self,
        system: Option<&str>,
        prompt: &str,
    ) -> Result<Assessment<T>, AssessError> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        let mut usage = Usage::default();

        let raw = self.call(&thread_id, system, prompt, &mut usage).await?;
        let error = match recover_as::<T>(&raw) {
            Ok(value) => {
                return Ok(Assessment {
                    value,
                    raw,
                    attempts: 1,
                    usage,
                });
            }
            Err(e) => e,
        };

        warn!(%thread_id, error = %error, "Assessment unusable; asking again");
        let retry = format!(
            "{prompt}\n\nYour previous response could not be used: {error}\nRespond with only the JSON value. No prose, no code fences."
        );
        let raw = self.call(&thread_id, system, &retry, &mut usage).await?;
        match recover_as::<T>(&raw) {
            Ok(value) => Ok(Assessment {
                value,
                raw,
                attempts: 2,
                usage,
            }),
            Err(source) => Err(AssessError::Recovery { source, raw }),
        }
    }

    /// Have the model review `assessment` against `task`.
    pub async fn critique(
        &self,
        task: &str,
        assessment: &Value,
    ) -> Result<Assessment<Critique>, AssessError> {
        let rendered =
            serde_json::to_string_pretty(assessment).unwrap_or_else(|_| assessment.to_string());
        let prompt = format!("## Task\n{task}\n\n## Assessment under review\n{rendered}");

        let raw: Assessment<RawCritique> = self.assess(Some(CRITIC_PROMPT), &prompt).await?;
        let Assessment {
            value,
            raw,
            attempts,
            usage,
        } = raw;
        match Critique::try_from(value) {
            Ok(critique) => {
                info!(verdict = ?critique.verdict, issues = critique.issues.len(), "Critique received");
                Ok(Assessment {
                    value: critique,
                    raw,
                    attempts,
                    usage,
                })
            }
            Err(source) => Err(AssessError::Recovery { source, raw }),
        }
    }

    async fn call(
        &self,
        thread_id: &str,
        system: Option<&str>,
        prompt: &str,
        usage: &mut Usage,
    ) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            system: system.map(str::to_string),
            prompt: prompt.to_string(),
            options: self.options.clone(),
        };

        let started = Instant::now();
        let result = self.provider.generate(request).await;
        self.sink.record(TraceRecord::new(
            thread_id,
            TraceEvent::ModelCall {
                model: self.options.model.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                usage: result.as_ref().ok().and_then(|g| g.usage),
                success: result.is_ok(),
            },
        ));

        let generation = result?;
        if let Some(u) = &generation.usage {
            usage.accumulate(u);
        }
        debug!(%thread_id, chars = generation.content.len(), "Assessment response received");
        Ok(generation.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Risk {
        level: String,
        score: u32,
    }

    fn assessor(provider: Arc<ScriptedProvider>) -> Assessor {
        Assessor::new(provider, GenerateOptions::new("mock-model"))
    }

    #[tokio::test]
    async fn recovers_wrapped_value_first_time() {
        let provider = Arc::new(ScriptedProvider::new([
            "<think>renal function matters</think>```json\n{\"level\": \"high\", \"score\": 7}\n```",
        ]));
        let out: Assessment<Risk> = assessor(provider.clone())
            .assess(Some("You assess risk."), "Assess this patient")
            .await
            .unwrap();

        assert_eq!(
            out.value,
            Risk {
                level: "high".into(),
                score: 7
            }
        );
        assert_eq!(out.attempts, 1);
        assert_eq!(out.usage.total_tokens, 15);
        assert_eq!(
            provider.requests()[0].system.as_deref(),
            Some("You assess risk.")
        );
    }

    #[tokio::test]
    async fn reasks_once_after_unusable_response() {
        let provider = Arc::new(ScriptedProvider::new([
            "The risk is high, around 7.",
            "{\"level\": \"high\", \"score\": 7}",
        ]));
        let out: Assessment<Risk> = assessor(provider.clone())
            .assess(None, "Assess")
            .await
            .unwrap();

        assert_eq!(out.attempts, 2);
        assert_eq!(out.usage.total_tokens, 30);
        assert!(provider.requests()[1].prompt.contains("could not be used"));
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let provider = Arc::new(ScriptedProvider::new(["no", "{\"level\": 3}"]));
        let err = assessor(provider.clone())
            .assess::<Risk>(None, "Assess")
            .await
            .unwrap_err();

        match err {
            AssessError::Recovery { source, raw } => {
                assert!(matches!(source, RecoveryError::Shape { .. }));
                assert_eq!(raw, "{\"level\": 3}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new(Vec::<String>::new())
                .then_error(ProviderError::Timeout("slow".into())),
        );
        let err = assessor(provider.clone())
            .assess::<Risk>(None, "Assess")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn critique_normalizes_reviewer_output() {
        let provider = Arc::new(ScriptedProvider::new([
            r#"Review: {"verdict": "Partial", "issues": ["dose not renally adjusted", {"field": "score"}], "confidence": 1.4}"#,
        ]));
        let out = assessor(provider.clone())
            .critique("Dose metformin", &json!({"dose_mg": 2000}))
            .await
            .unwrap();

        assert_eq!(out.value.verdict, Verdict::Revise);
        assert_eq!(out.value.issues.len(), 2);
        assert_eq!(out.value.issues[0], "dose not renally adjusted");
        assert_eq!(out.value.confidence, Some(1.0));

        let request = &provider.requests()[0];
        assert!(request.prompt.contains("\"dose_mg\": 2000"));
        assert!(request.system.as_deref().unwrap().contains("verdict"));
    }

    #[tokio::test]
    async fn unknown_verdict_is_a_shape_error() {
        let provider = Arc::new(ScriptedProvider::new([r#"{"verdict": "maybe"}"#]));
        let err = assessor(provider)
            .critique("task", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown verdict"));
    }

    #[test]
    fn verdict_aliases() {
        assert_eq!(Verdict::parse(" APPROVE "), Some(Verdict::Agree));
        assert_eq!(Verdict::parse("reject"), Some(Verdict::Disagree));
        assert_eq!(Verdict::parse("unsure"), None);
    }
}
