use crate::fragment::RuntimeError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub mod e2b;
pub mod envelope;

/// Everything the provider needs to create one sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub api_key: String,
    pub metadata: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Extra request headers forwarded to the provider on creation.
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Captured output of one interpreter run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeExecution {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub error: Option<RuntimeError>,
    pub results: Vec<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Non-success status from the provider; `message` is the provider's text
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Process error ({code}): {message}")]
    Process { code: String, message: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Protocol(err.to_string())
    }
}

/// Creates sandboxes from a template.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(
        &self,
        template: &str,
        options: CreateOptions,
    ) -> Result<Arc<dyn SandboxSession>, SandboxError>;
}

/// A live sandbox. Teardown is left to the provider's own timeout.
#[async_trait]
pub trait SandboxSession: Send + Sync {
    fn sandbox_id(&self) -> &str;

    /// Run a shell command and wait for it to exit.
    async fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError>;

    /// Write `content` to `path`. Safe to call concurrently for different paths.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn run_code(&self, code: &str) -> Result<CodeExecution, SandboxError>;

    /// Externally reachable host (no scheme) for `port`.
    fn get_host(&self, port: u16) -> String;
}
