use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AfeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plugin library error: {0}")]
    Library(#[from] libloading::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Build failed for {name}: {output}")]
    Build { name: String, output: String },

    #[error("Invalid capability shape for {0}: expected Agent or Provider entry point")]
    LoadShape(String),

    #[error("Agent {0} reported failure: {1}")]
    RuntimeAgent(String, String),

    #[error("Supervisor gave up on {0} after {1} consecutive failures")]
    SupervisorGaveUp(String, u32),

    #[error("Command not allowed for safety reasons")]
    Safety,

    #[error("Model error: {0}")]
    NetworkModel(String),

    #[error("No provider registered for model {0}")]
    NoProvider(String),

    #[error("Operation cancelled")]
    Cancellation,

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("{0}")]
    NotImplemented(String),
}

impl AfeError {
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Configuration(msg.to_string())
    }

    pub fn runtime_agent<T: ToString, E: ToString>(name: T, err: E) -> Self {
        Self::RuntimeAgent(name.to_string(), err.to_string())
    }

    pub fn network_model<T: ToString>(msg: T) -> Self {
        Self::NetworkModel(msg.to_string())
    }
}

impl IntoResponse for AfeError {
    fn into_response(self) -> Response {
        let status = match &self {
            AfeError::Configuration(_) => StatusCode::BAD_REQUEST,
            AfeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AfeError::Yaml(_) => StatusCode::BAD_REQUEST,
            AfeError::Json(_) => StatusCode::BAD_REQUEST,
            AfeError::Library(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AfeError::Request(_) => StatusCode::BAD_GATEWAY,
            AfeError::Build { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AfeError::LoadShape(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AfeError::RuntimeAgent(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
            AfeError::SupervisorGaveUp(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
            AfeError::Safety => StatusCode::BAD_REQUEST,
            AfeError::NetworkModel(_) => StatusCode::BAD_GATEWAY,
            AfeError::NoProvider(_) => StatusCode::BAD_REQUEST,
            AfeError::Cancellation => StatusCode::SERVICE_UNAVAILABLE,
            AfeError::PluginNotFound(_) => StatusCode::NOT_FOUND,
            AfeError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AfeError>;
