//! Error types for Microhost

use thiserror::Error;

use crate::registry::AppState;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to load resource {url}: {reason}")]
    ResourceLoad { url: String, reason: String },

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Sub-application '{name}' did not register within {timeout_ms}ms")]
    RegistrationTimeout { name: String, timeout_ms: u64 },

    #[error("Cannot {operation} '{name}' while it is {state}")]
    LifecycleState {
        name: String,
        operation: &'static str,
        state: AppState,
    },

    #[error("Sub-application not found: {0}")]
    NotFound(String),

    #[error("Sandbox already active for '{0}'")]
    SandboxReentry(String),

    #[error("{phase} hook of '{name}' failed: {source}")]
    Hook {
        name: String,
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Load of '{name}' failed: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Dynamic evaluation is not available in this host")]
    EvalUnavailable,

    #[error("Evaluation error: {0}")]
    Eval(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Stable error code for structured logs
    pub fn code(&self) -> &'static str {
        match self {
            HostError::ResourceLoad { .. } => "resource_load",
            HostError::Registration(_) => "registration",
            HostError::RegistrationTimeout { .. } => "registration_timeout",
            HostError::LifecycleState { .. } => "lifecycle_state",
            HostError::NotFound(_) => "not_found",
            HostError::SandboxReentry(_) => "sandbox_reentry",
            HostError::Hook { .. } => "hook_failed",
            HostError::LoadFailed { .. } => "load_failed",
            HostError::EvalUnavailable => "eval_unavailable",
            HostError::Eval(_) => "eval",
            HostError::ParseError(_) => "parse",
            HostError::Selector(_) => "selector",
            HostError::InvalidDescriptor(_) => "invalid_descriptor",
            HostError::Config(_) => "config",
            HostError::IoError(_) => "io",
            HostError::Json(_) => "json",
        }
    }

    /// Whether the error aborts a load and requires an explicit unload to recover
    pub fn requires_unload(&self) -> bool {
        matches!(
            self,
            HostError::ResourceLoad { .. }
                | HostError::Registration(_)
                | HostError::RegistrationTimeout { .. }
                | HostError::SandboxReentry(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
