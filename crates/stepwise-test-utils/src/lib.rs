//! Deterministic collaborators for engine and loop tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use stepwise_core::config::{AppConfig, ModelConfig};
use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::traits::{ModelClient, Tool};
use stepwise_core::types::{ChatMessage, ModelResponse, ToolCall, ToolDefinition};

/// Model client that replays queued responses in order and records every
/// request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    tool_names: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Queue another response.
    pub fn push(&self, response: ModelResponse) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(response);
        }
    }

    /// Conversations sent so far, one per call.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Tool names advertised on each call.
    pub fn advertised_tools(&self) -> Vec<Vec<String>> {
        self.tool_names.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or_default()
    }
}

impl ModelClient for ScriptedModel {
    fn complete(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        Box::pin(async move {
            if let Ok(mut r) = self.requests.lock() {
                r.push(messages);
            }
            if let Ok(mut t) = self.tool_names.lock() {
                t.push(names);
            }
            self.responses
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .ok_or_else(|| StepwiseError::LlmRequest("scripted model exhausted".into()))
        })
    }
}

/// Model client that always fails.
pub struct FailingModel {
    pub message: String,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ModelClient for FailingModel {
    fn complete(
        &self,
        _config: &ModelConfig,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let message = self.message.clone();
        Box::pin(async move { Err(StepwiseError::LlmRequest(message)) })
    }
}

/// Tool returning a fixed value and counting its invocations.
pub struct CountingTool {
    name: String,
    output: Value,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<Value>>>,
}

impl CountingTool {
    pub fn new(name: impl Into<String>, output: Value) -> Self {
        Self {
            name: name.into(),
            output,
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the call counter, usable after the tool is registered.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Shared handle to the recorded inputs.
    pub fn inputs(&self) -> Arc<Mutex<Vec<Value>>> {
        self.inputs.clone()
    }
}

impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Test tool with a fixed output."
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    fn execute(&self, input: Value) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.inputs.lock() {
                seen.push(input);
            }
            Ok(self.output.clone())
        })
    }
}

/// Assistant reply with no tool calls.
pub fn text_response(text: &str, tokens: u64) -> ModelResponse {
    ModelResponse::text(text).with_usage(tokens)
}

/// Assistant reply requesting a single tool call.
pub fn tool_call_response(id: &str, name: &str, arguments: Value, tokens: u64) -> ModelResponse {
    ModelResponse::default()
        .with_tool_calls(vec![ToolCall::new(id, name, arguments.to_string())])
        .with_usage(tokens)
}

/// Minimal valid configuration.
pub fn test_config() -> AppConfig {
    AppConfig::from_toml(
        r#"
[model]
model_id = "test-model"
"#,
    )
    .expect("static test config parses")
}

/// Write `content` to a temporary `.toml` file.
pub fn temp_config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new([text_response("one", 1), text_response("two", 2)]);
        let config = ModelConfig::new("m");
        let first = model
            .complete(&config, vec![ChatMessage::user("a")], &[])
            .await
            .unwrap();
        let second = model.complete(&config, vec![], &[]).await.unwrap();
        assert_eq!(first.content.as_deref(), Some("one"));
        assert_eq!(second.content.as_deref(), Some("two"));
        assert!(model.complete(&config, vec![], &[]).await.is_err());
        assert_eq!(model.calls(), 3);
        assert_eq!(model.requests()[0][0].text(), "a");
    }

    #[tokio::test]
    async fn test_counting_tool() {
        let tool = CountingTool::new("probe", serde_json::json!("ok"));
        let counter = tool.counter();
        tool.execute(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(tool.inputs().lock().unwrap()[0]["x"], 1);
    }
}
