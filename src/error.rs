//! Provisioning error types and their client-facing bodies
use crate::sandbox::SandboxError;
use serde_json::{json, Value};

/// Main error type for a provisioning request
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The provider credential is missing; raised before any remote call
    #[error("E2B API key not configured")]
    Configuration,
    /// The provider refused or failed to create the sandbox
    #[error("Failed to create sandbox: {message}")]
    SandboxCreation { message: String, api_key_set: bool },
    /// The dependency install command failed or exited non-zero
    #[error("Dependency install failed in sandbox {sandbox_id}: {reason}")]
    DependencyInstall { sandbox_id: String, reason: String },
    /// Writing a fragment file into the sandbox failed
    #[error("Failed to write {path} in sandbox {sandbox_id}: {source}")]
    FileWrite {
        sandbox_id: String,
        path: String,
        #[source]
        source: SandboxError,
    },
    /// The interpreter run itself failed (not a runtime error in user code)
    #[error("Code execution failed in sandbox {sandbox_id}: {source}")]
    Execution {
        sandbox_id: String,
        #[source]
        source: SandboxError,
    },
}

impl ProvisionError {
    /// Whether the failure happened before a sandbox existed.
    pub fn is_guarded(&self) -> bool {
        matches!(
            self,
            ProvisionError::Configuration | ProvisionError::SandboxCreation { .. }
        )
    }

    /// JSON body returned to the caller alongside a 500 status.
    pub fn response_body(&self) -> Value {
        match self {
            ProvisionError::Configuration => json!({ "error": self.to_string() }),
            ProvisionError::SandboxCreation {
                message,
                api_key_set,
            } => json!({
                "error": "Failed to create sandbox",
                "details": message,
                "apiKeySet": api_key_set,
            }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}
