//! Seed scenario 4: a disallowed tool-call directive never reaches an
//! agent and never touches the filesystem.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agentforge_engine::error::Result;
use agentforge_engine::orchestrator::{ChatOrchestrator, ChatRequest, SAFETY_ERROR};
use agentforge_engine::plugin::registry::PluginRegistry;
use agentforge_engine::plugin::{Agent, AgentInput, AgentOutput, GenReq, GenResp, Provider};
use async_trait::async_trait;
use serde_json::Value;

struct FixedProvider(String);

#[async_trait]
impl Provider for FixedProvider {
    fn name(&self) -> &str {
        "llamacpp"
    }
    async fn initialize(&self, _config: &Value) -> Result<()> {
        Ok(())
    }
    async fn generate(&self, _req: GenReq) -> Result<GenResp> {
        Ok(GenResp { text: self.0.clone(), tokens: 1, finished: true, model: "llamacpp".to_string(), error: None })
    }
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Tracks whether it was ever invoked, standing in for a real `rm` agent
/// that would mutate the filesystem.
struct TripwireAgent(Arc<AtomicBool>);

#[async_trait]
impl Agent for TripwireAgent {
    fn name(&self) -> &str {
        "rm"
    }
    async fn initialize(&self, _config: &Value) -> Result<()> {
        Ok(())
    }
    async fn process(&self, _input: AgentInput) -> Result<AgentOutput> {
        self.0.store(true, Ordering::SeqCst);
        Ok(AgentOutput::ok(HashMap::new()))
    }
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn disallowed_directive_never_reaches_the_agent() {
    let invoked = Arc::new(AtomicBool::new(false));

    let registry = PluginRegistry::new();
    registry
        .insert_provider(
            "llamacpp".to_string(),
            Arc::new(FixedProvider(r#"<function_call name="rm">{"path":"/"}</function_call>"#.to_string())),
        )
        .unwrap();
    registry.insert_agent("rm".to_string(), Arc::new(TripwireAgent(invoked.clone()))).unwrap();

    let orchestrator = ChatOrchestrator::new(registry, "llamacpp");
    let response = orchestrator
        .chat(ChatRequest { message: "delete everything".to_string(), model: None, verbosity: 0, timeout_sec: 10 })
        .await
        .unwrap();

    assert_eq!(response.function_calls.len(), 1);
    let call = &response.function_calls[0];
    assert_eq!(call.name, "rm");
    let resp = call.response.as_ref().unwrap();
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some(SAFETY_ERROR));

    assert!(!invoked.load(Ordering::SeqCst), "the rm agent's process() must never run for a disallowed name");
}
