//! # AgentForgeEngine
//!
//! Host process that sits between local model backends and a set of
//! dynamically loaded, independently built agents. Drives a model to
//! produce tool-call directives, dispatches each to the named agent
//! through an allow-list, and reassembles the aggregated reply.

pub mod accounts;
pub mod build;
pub mod cache;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod model_adapter;
pub mod orchestrator;
pub mod paths;
pub mod plugin;
pub mod server;
pub mod status;
pub mod supervisor;

pub use config::AfeConfig;
pub use engine::Engine;
pub use error::{AfeError, Result};
