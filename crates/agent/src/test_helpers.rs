//! Shared test helpers.

use std::collections::VecDeque;
use std::sync::Mutex;

use caduceus_core::error::ProviderError;
use caduceus_core::provider::{GenerateRequest, Generation, Provider, Usage};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `generate` returns the next response in the queue. With a
/// fallback set, the fallback answers once the queue is empty; otherwise an
/// empty queue panics.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that gives the same response forever.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            fallback: Some(response.into()),
            ..Self::new(Vec::<String>::new())
        }
    }

    /// Queue a failure after the responses queued so far.
    pub fn then_error(self, error: ProviderError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };

        let next = self.responses.lock().unwrap().pop_front();
        let content = match (next, &self.fallback) {
            (Some(response), _) => response?,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => panic!("ScriptedProvider: no more responses (call #{call})"),
        };

        Ok(Generation {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
        })
    }
}

/// A tool-call response in the format the prompt asks for.
pub fn action(thought: &str, tool: &str, args: serde_json::Value) -> String {
    serde_json::json!({
        "thought": thought,
        "action": {"tool": tool, "args": args}
    })
    .to_string()
}

/// A final-answer response.
pub fn answer(thought: &str, answer: &str) -> String {
    serde_json::json!({"thought": thought, "final_answer": answer}).to_string()
}
