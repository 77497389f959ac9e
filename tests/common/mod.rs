#![allow(dead_code)]

use async_trait::async_trait;
use fragments::sandbox::{
    CodeExecution, CommandResult, CreateOptions, SandboxError, SandboxProvider, SandboxSession,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create {
        template: String,
        options: CreateOptions,
    },
    RunCommand(String),
    WriteFile {
        path: String,
        content: String,
    },
    RunCode(String),
    GetHost(u16),
}

/// In-memory provider that records every call in order.
#[derive(Clone)]
pub struct RecordingProvider {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub sandbox_id: String,
    pub create_error: Option<String>,
    pub command_result: CommandResult,
    pub command_error: Option<String>,
    pub execution: CodeExecution,
    pub run_code_error: Option<String>,
    pub failing_path: Option<String>,
    pub write_delay: Duration,
}

impl RecordingProvider {
    pub fn new(sandbox_id: &str) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            sandbox_id: sandbox_id.to_string(),
            create_error: None,
            command_result: CommandResult::default(),
            command_error: None,
            execution: CodeExecution::default(),
            run_code_error: None,
            failing_path: None,
            write_delay: Duration::ZERO,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::WriteFile { path, content } => Some((path, content)),
                _ => None,
            })
            .collect()
    }

    pub fn created(&self) -> bool {
        self.calls()
            .iter()
            .any(|c| matches!(c, Call::Create { .. }))
    }
}

#[async_trait]
impl SandboxProvider for RecordingProvider {
    async fn create(
        &self,
        template: &str,
        options: CreateOptions,
    ) -> Result<Arc<dyn SandboxSession>, SandboxError> {
        self.calls.lock().push(Call::Create {
            template: template.to_string(),
            options,
        });
        if let Some(message) = &self.create_error {
            return Err(SandboxError::Api {
                status: 400,
                message: message.clone(),
            });
        }
        Ok(Arc::new(RecordingSession {
            provider: self.clone(),
        }))
    }
}

pub struct RecordingSession {
    provider: RecordingProvider,
}

#[async_trait]
impl SandboxSession for RecordingSession {
    fn sandbox_id(&self) -> &str {
        &self.provider.sandbox_id
    }

    async fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError> {
        self.provider
            .calls
            .lock()
            .push(Call::RunCommand(command.to_string()));
        if let Some(message) = &self.provider.command_error {
            return Err(SandboxError::Process {
                code: "unavailable".to_string(),
                message: message.clone(),
            });
        }
        Ok(self.provider.command_result.clone())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        if !self.provider.write_delay.is_zero() {
            tokio::time::sleep(self.provider.write_delay).await;
        }
        self.provider.calls.lock().push(Call::WriteFile {
            path: path.to_string(),
            content: content.to_string(),
        });
        if self.provider.failing_path.as_deref() == Some(path) {
            return Err(SandboxError::Api {
                status: 507,
                message: "disk full".to_string(),
            });
        }
        Ok(())
    }

    async fn run_code(&self, code: &str) -> Result<CodeExecution, SandboxError> {
        self.provider
            .calls
            .lock()
            .push(Call::RunCode(code.to_string()));
        if let Some(message) = &self.provider.run_code_error {
            return Err(SandboxError::Api {
                status: 502,
                message: message.clone(),
            });
        }
        Ok(self.provider.execution.clone())
    }

    fn get_host(&self, port: u16) -> String {
        self.provider.calls.lock().push(Call::GetHost(port));
        format!("{}-{}.provider.dev", port, self.provider.sandbox_id)
    }
}
