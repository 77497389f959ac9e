use crate::sandbox::e2b::DEFAULT_DOMAIN;
use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Idle lifetime requested for every sandbox (10 minutes).
pub const SANDBOX_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Upper bound on how long one request may be handled.
pub const MAX_REQUEST_DURATION: Duration = Duration::from_secs(60);

/// How multi-file fragments are written into the sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FileWriteMode {
    /// Write all files concurrently and wait for every write before running.
    #[default]
    Awaited,
    /// Spawn each write and continue immediately; failures are only logged.
    Detached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Settings handed to the provisioner explicitly rather than read from the environment.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub api_key: Option<String>,
    pub sandbox_timeout: Duration,
    pub file_writes: FileWriteMode,
}

impl ProvisionerConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            sandbox_timeout: SANDBOX_TIMEOUT,
            file_writes: FileWriteMode::default(),
        }
    }

    pub fn with_file_writes(mut self, mode: FileWriteMode) -> Self {
        self.file_writes = mode;
        self
    }

    /// The provider credential; an empty string counts as unset.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "fragments", about = "Run code fragments in remote sandboxes")]
pub struct ServeArgs {
    #[arg(long, env = "FRAGMENTS_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "FRAGMENTS_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Sandbox provider credential
    #[arg(long, env = "E2B_API_KEY", hide_env_values = true)]
    pub e2b_api_key: Option<String>,

    #[arg(long, env = "E2B_DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub e2b_domain: String,

    #[arg(long, default_value_t = SANDBOX_TIMEOUT.as_secs())]
    pub sandbox_timeout_secs: u64,

    #[arg(long, default_value_t = MAX_REQUEST_DURATION.as_secs())]
    pub max_request_secs: u64,

    #[arg(long, value_enum, default_value_t = FileWriteMode::Awaited)]
    pub file_writes: FileWriteMode,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ServeArgs {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn max_request_duration(&self) -> Duration {
        Duration::from_secs(self.max_request_secs)
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            api_key: self.e2b_api_key.clone(),
            sandbox_timeout: Duration::from_secs(self.sandbox_timeout_secs),
            file_writes: self.file_writes,
        }
    }
}
