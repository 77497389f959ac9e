use crate::config::{FileWriteMode, ProvisionerConfig};
use crate::error::ProvisionError;
use crate::fragment::{
    CallerContext, ExecutionMode, ExecutionResult, FileEntry, FragmentCode, FragmentDescriptor,
    InterpreterResult, WebResult,
};
use crate::sandbox::{CreateOptions, SandboxError, SandboxProvider, SandboxSession};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const TEAM_HEADER: &str = "X-Firebase-Team";
pub const TOKEN_HEADER: &str = "X-Firebase-Token";

/// Acquires a sandbox for a fragment, prepares it, and runs or exposes it.
///
/// Every call is independent; the only state lives in the remote sandbox,
/// which is left to expire under its own timeout.
pub struct SessionProvisioner {
    config: ProvisionerConfig,
    provider: Arc<dyn SandboxProvider>,
}

impl SessionProvisioner {
    pub fn new(config: ProvisionerConfig, provider: Arc<dyn SandboxProvider>) -> Self {
        Self { config, provider }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    #[instrument(skip_all, fields(template = %fragment.template))]
    pub async fn provision(
        &self,
        fragment: &FragmentDescriptor,
        caller: &CallerContext,
    ) -> Result<ExecutionResult, ProvisionError> {
        let api_key = self.config.api_key();
        debug!(?fragment, "fragment");
        info!(
            user_id = caller.user_id.as_deref().unwrap_or_default(),
            api_key_set = api_key.is_some(),
            api_key_len = api_key.map(str::len).unwrap_or(0),
            "provisioning fragment"
        );

        let Some(api_key) = api_key else {
            error!("E2B_API_KEY is not set");
            return Err(ProvisionError::Configuration);
        };

        // 1. Acquire the sandbox
        let sbx = self.acquire(fragment, caller, api_key).await?;

        // 2. Install dependencies
        if fragment.has_additional_dependencies {
            install_dependencies(sbx.as_ref(), fragment).await?;
        }

        // 3. Copy code to the sandbox filesystem
        self.write_files(&sbx, fragment).await?;

        // 4. Execute, or hand back a URL to the running service
        match fragment.mode() {
            ExecutionMode::Interpreter => run_interpreter(sbx.as_ref(), fragment).await,
            ExecutionMode::Web => Ok(expose(sbx.as_ref(), fragment)),
        }
    }

    async fn acquire(
        &self,
        fragment: &FragmentDescriptor,
        caller: &CallerContext,
        api_key: &str,
    ) -> Result<Arc<dyn SandboxSession>, ProvisionError> {
        let options = create_options(
            &fragment.template,
            caller,
            api_key,
            self.config.sandbox_timeout,
        );

        self.provider
            .create(&fragment.template, options)
            .await
            .map_err(|e| {
                error!(error = %e, "sandbox creation failed");
                ProvisionError::SandboxCreation {
                    message: e.to_string(),
                    api_key_set: true,
                }
            })
    }

    async fn write_files(
        &self,
        sbx: &Arc<dyn SandboxSession>,
        fragment: &FragmentDescriptor,
    ) -> Result<(), ProvisionError> {
        match &fragment.code {
            Some(FragmentCode::Files(files)) => match self.config.file_writes {
                FileWriteMode::Awaited => write_all(sbx.as_ref(), files).await,
                FileWriteMode::Detached => {
                    spawn_writes(sbx, files);
                    Ok(())
                }
            },
            Some(FragmentCode::Source(source)) => write_single(sbx.as_ref(), fragment, source).await,
            None => write_single(sbx.as_ref(), fragment, "").await,
        }
    }
}

/// Creation options: attribution metadata always, team headers only with a token.
pub fn create_options(
    template: &str,
    caller: &CallerContext,
    api_key: &str,
    timeout: std::time::Duration,
) -> CreateOptions {
    let mut metadata = BTreeMap::new();
    metadata.insert("template".to_string(), template.to_string());
    metadata.insert(
        "userID".to_string(),
        caller.user_id.clone().unwrap_or_default(),
    );
    metadata.insert(
        "teamID".to_string(),
        caller.team_id.clone().unwrap_or_default(),
    );

    let mut headers = BTreeMap::new();
    let team = caller.team_id.as_deref().filter(|t| !t.is_empty());
    let token = caller.access_token.as_deref().filter(|t| !t.is_empty());
    if let (Some(team), Some(token)) = (team, token) {
        headers.insert(TEAM_HEADER.to_string(), team.to_string());
        headers.insert(TOKEN_HEADER.to_string(), token.to_string());
    }

    CreateOptions {
        api_key: api_key.to_string(),
        metadata,
        timeout,
        headers,
    }
}

async fn install_dependencies(
    sbx: &dyn SandboxSession,
    fragment: &FragmentDescriptor,
) -> Result<(), ProvisionError> {
    let failed = |reason: String| ProvisionError::DependencyInstall {
        sandbox_id: sbx.sandbox_id().to_string(),
        reason,
    };

    let result = sbx
        .run_command(&fragment.install_dependencies_command)
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !result.success() {
        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| format!("exit code {}", result.exit_code));
        warn!(sandbox_id = sbx.sandbox_id(), stderr = %result.stderr, "dependency install failed");
        return Err(failed(reason));
    }

    info!(
        sandbox_id = sbx.sandbox_id(),
        "Installed dependencies: {}",
        fragment.additional_dependencies.join(", ")
    );
    Ok(())
}

async fn write_single(
    sbx: &dyn SandboxSession,
    fragment: &FragmentDescriptor,
    content: &str,
) -> Result<(), ProvisionError> {
    let path = fragment.file_path.as_deref().unwrap_or_default();
    let result = if path.is_empty() {
        Err(SandboxError::InvalidRequest(
            "fragment has no file_path".to_string(),
        ))
    } else {
        sbx.write_file(path, content).await
    };

    result.map_err(|source| ProvisionError::FileWrite {
        sandbox_id: sbx.sandbox_id().to_string(),
        path: path.to_string(),
        source,
    })?;
    info!(sandbox_id = sbx.sandbox_id(), file_path = path, "copied file");
    Ok(())
}

async fn write_all(sbx: &dyn SandboxSession, files: &[FileEntry]) -> Result<(), ProvisionError> {
    let writes = files.iter().map(|file| async move {
        sbx.write_file(&file.file_path, &file.file_content)
            .await
            .map_err(|source| ProvisionError::FileWrite {
                sandbox_id: sbx.sandbox_id().to_string(),
                path: file.file_path.clone(),
                source,
            })?;
        info!(sandbox_id = sbx.sandbox_id(), file_path = %file.file_path, "copied file");
        Ok::<_, ProvisionError>(())
    });

    try_join_all(writes).await?;
    Ok(())
}

/// Fire-and-forget writes. Execution may start before these land.
fn spawn_writes(sbx: &Arc<dyn SandboxSession>, files: &[FileEntry]) {
    for file in files.iter().cloned() {
        let sbx = Arc::clone(sbx);
        tokio::spawn(async move {
            match sbx.write_file(&file.file_path, &file.file_content).await {
                Ok(()) => {
                    info!(sandbox_id = sbx.sandbox_id(), file_path = %file.file_path, "copied file")
                }
                Err(e) => {
                    warn!(sandbox_id = sbx.sandbox_id(), file_path = %file.file_path, error = %e, "detached file write failed")
                }
            }
        });
    }
}

async fn run_interpreter(
    sbx: &dyn SandboxSession,
    fragment: &FragmentDescriptor,
) -> Result<ExecutionResult, ProvisionError> {
    let execution = sbx
        .run_code(fragment.interpreter_source())
        .await
        .map_err(|source| ProvisionError::Execution {
            sandbox_id: sbx.sandbox_id().to_string(),
            source,
        })?;

    Ok(ExecutionResult::Interpreter(InterpreterResult {
        sbx_id: sbx.sandbox_id().to_string(),
        template: fragment.template.clone(),
        stdout: execution.stdout,
        stderr: execution.stderr,
        runtime_error: execution.error,
        cell_results: execution.results,
    }))
}

fn expose(sbx: &dyn SandboxSession, fragment: &FragmentDescriptor) -> ExecutionResult {
    let host = sbx.get_host(fragment.port());
    ExecutionResult::Web(WebResult {
        sbx_id: sbx.sandbox_id().to_string(),
        template: fragment.template.clone(),
        url: format!("https://{}", host),
    })
}
