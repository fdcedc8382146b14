//! Plugin capability contract for AgentForgeEngine.
//!
//! A loaded plugin is one of two shapes — `Agent` or `Provider` — and the
//! registry, loader, discovery, and hot-reload submodules below operate on
//! those shapes uniformly regardless of which one a given plugin exposes.

pub mod discovery;
pub mod hotreload;
pub mod loader;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Input handed to an agent's `Process` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

/// Output returned by an agent's `Process` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutput {
    pub fn ok(data: HashMap<String, Value>) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self { success: false, data: None, error: Some(error.to_string()) }
    }
}

/// Request handed to a provider's `Generate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenReq {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub stop_tokens: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Response returned by a provider's `Generate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenResp {
    pub text: String,
    pub tokens: u32,
    pub finished: bool,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A named, loadable unit exposing `Process(input) -> output`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;
    async fn initialize(&self, config: &Value) -> Result<()>;
    async fn process(&self, input: AgentInput) -> Result<AgentOutput>;
    async fn health_check(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// A named, loadable adapter in front of a model backend, exposing
/// `Generate(req) -> resp`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn initialize(&self, config: &Value) -> Result<()>;
    async fn generate(&self, req: GenReq) -> Result<GenResp>;
    async fn health_check(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// The kind half of a plugin's `(kind, name)` identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Agent,
    Provider,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Agent => "agent",
            PluginKind::Provider => "provider",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
