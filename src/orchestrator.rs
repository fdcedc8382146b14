//! Chat Orchestrator: drives a provider, extracts tool-call directives
//! from its output, gates them through the allow-list, fans them out to
//! agents, and reassembles a structured reply.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::envelope::extract_tool_calls;
use crate::error::{AfeError, Result};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::{AgentInput, GenReq};

/// Only these agent names may be invoked by the chat orchestrator. Kept as
/// data, not inline branches, so extending it is a single-point change.
pub const ALLOW_LIST: &[&str] = &["ls", "cat", "pwd", "whoami", "df", "uname"];

pub const SAFETY_ERROR: &str = "Command not allowed for safety reasons";

fn is_allow_listed(name: &str) -> bool {
    ALLOW_LIST.contains(&name)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub verbosity: u8,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<FunctionResponse>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub function_calls: Vec<FunctionCall>,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Broadcast on the event stream that backs `/api/v1/events`. The control
/// plane (`status.rs`) and the HTTP layer forward these verbatim as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Value,
}

pub struct ChatOrchestrator {
    registry: PluginRegistry,
    default_model: String,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl ChatOrchestrator {
    pub fn new(registry: PluginRegistry, default_model: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(1000);
        Self { registry, default_model: default_model.into(), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: &str, payload: Value) {
        let _ = self.events.send(OrchestratorEvent { kind: kind.to_string(), timestamp: Utc::now(), payload });
    }

    /// Drive one full chat turn per §4.5's numbered procedure.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let started_at = Utc::now();
        let started = Instant::now();

        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let provider = self
            .registry
            .get_provider(&model)
            .ok_or_else(|| AfeError::NoProvider(model.clone()))?;

        self.emit("chat_start", serde_json::json!({ "model": model, "message": request.message }));

        let gen_req = GenReq {
            prompt: request.message.clone(),
            max_tokens: 1024,
            temperature: 0.7,
            stop_tokens: Vec::new(),
            stream: false,
        };
        let gen_resp = provider
            .generate(gen_req)
            .await
            .map_err(|e| AfeError::network_model(e.to_string()))?;
        if let Some(err) = &gen_resp.error {
            return Err(AfeError::network_model(err.clone()));
        }

        let calls = extract_tool_calls(&gen_resp.text);
        let mut function_calls = Vec::with_capacity(calls.len());

        for call in calls {
            let call_started = Instant::now();
            let call_started_at = Utc::now();

            let response = if !is_allow_listed(&call.name) {
                warn!("rejected disallowed tool call: {}", call.name);
                FunctionResponse { success: false, data: None, error: Some(SAFETY_ERROR.to_string()) }
            } else if let Some(agent) = self.registry.get_agent(&call.name) {
                let payload = match &call.arguments {
                    Value::Object(map) => map.clone().into_iter().collect(),
                    other => {
                        let mut m = HashMap::new();
                        m.insert("value".to_string(), other.clone());
                        m
                    }
                };
                let input = AgentInput { kind: "execute".to_string(), payload, metadata: None };
                match agent.process(input).await {
                    Ok(output) => FunctionResponse { success: output.success, data: output.data, error: output.error },
                    Err(e) => {
                        let runtime_err = AfeError::runtime_agent(&call.name, e);
                        FunctionResponse { success: false, data: None, error: Some(runtime_err.to_string()) }
                    }
                }
            } else {
                FunctionResponse { success: false, data: None, error: Some(format!("agent not found: {}", call.name)) }
            };

            function_calls.push(FunctionCall {
                name: call.name,
                arguments: call.arguments,
                response: Some(response),
                started_at: call_started_at,
                duration_ms: call_started.elapsed().as_millis() as u64,
            });
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!("chat turn completed in {duration_ms}ms with {} tool call(s)", function_calls.len());

        self.emit(
            "chat_complete",
            serde_json::json!({ "model": model, "function_calls": function_calls.len(), "duration_ms": duration_ms }),
        );

        Ok(ChatResponse {
            message: gen_resp.text,
            function_calls,
            completed: true,
            started_at,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as AfeResult;
    use crate::plugin::{Agent, AgentOutput, GenResp, Provider};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoProvider(String);

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "llamacpp"
        }
        async fn initialize(&self, _config: &Value) -> AfeResult<()> {
            Ok(())
        }
        async fn generate(&self, _req: GenReq) -> AfeResult<GenResp> {
            Ok(GenResp { text: self.0.clone(), tokens: 1, finished: true, model: "llamacpp".to_string(), error: None })
        }
        async fn health_check(&self) -> AfeResult<()> {
            Ok(())
        }
        async fn shutdown(&self) -> AfeResult<()> {
            Ok(())
        }
    }

    struct LsAgent;

    #[async_trait]
    impl Agent for LsAgent {
        fn name(&self) -> &str {
            "ls"
        }
        async fn initialize(&self, _config: &Value) -> AfeResult<()> {
            Ok(())
        }
        async fn process(&self, input: AgentInput) -> AfeResult<AgentOutput> {
            Ok(AgentOutput::ok(input.payload))
        }
        async fn health_check(&self) -> AfeResult<()> {
            Ok(())
        }
        async fn shutdown(&self) -> AfeResult<()> {
            Ok(())
        }
    }

    fn registry_with(model_text: &str) -> PluginRegistry {
        let registry = PluginRegistry::new();
        registry.insert_provider("llamacpp".to_string(), Arc::new(EchoProvider(model_text.to_string()))).unwrap();
        registry.insert_agent("ls".to_string(), Arc::new(LsAgent)).unwrap();
        registry
    }

    #[tokio::test]
    async fn zero_directives_yields_empty_calls_and_completed() {
        let orchestrator = ChatOrchestrator::new(registry_with("just plain text"), "llamacpp");
        let resp = orchestrator.chat(ChatRequest { message: "hi".into(), model: None, verbosity: 0, timeout_sec: 30 }).await.unwrap();
        assert!(resp.function_calls.is_empty());
        assert!(resp.completed);
    }

    #[tokio::test]
    async fn disallowed_name_yields_safety_error() {
        let text = r#"<function_call name="rm">{"path":"/"}</function_call>"#;
        let orchestrator = ChatOrchestrator::new(registry_with(text), "llamacpp");
        let resp = orchestrator.chat(ChatRequest { message: "hi".into(), model: None, verbosity: 0, timeout_sec: 30 }).await.unwrap();
        assert_eq!(resp.function_calls.len(), 1);
        let response = resp.function_calls[0].response.as_ref().unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(SAFETY_ERROR));
    }

    #[tokio::test]
    async fn allow_listed_call_dispatches_to_the_agent() {
        let text = r#"hello <function_call name="ls">{"path":"."}</function_call> bye"#;
        let orchestrator = ChatOrchestrator::new(registry_with(text), "llamacpp");
        let resp = orchestrator.chat(ChatRequest { message: "hi".into(), model: None, verbosity: 0, timeout_sec: 30 }).await.unwrap();
        assert_eq!(resp.function_calls.len(), 1);
        let call = &resp.function_calls[0];
        assert_eq!(call.name, "ls");
        assert_eq!(call.arguments, serde_json::json!({"path": "."}));
        assert!(call.response.as_ref().unwrap().success);
    }

    #[tokio::test]
    async fn missing_provider_is_a_no_provider_error() {
        let orchestrator = ChatOrchestrator::new(PluginRegistry::new(), "llamacpp");
        let err = orchestrator.chat(ChatRequest { message: "hi".into(), model: None, verbosity: 0, timeout_sec: 30 }).await.unwrap_err();
        assert!(matches!(err, AfeError::NoProvider(_)));
    }
}
