//! HTTP client for the hosted E2B sandbox service.
//!
//! Three surfaces are involved:
//! - the control plane at `https://api.<domain>` creates sandboxes,
//! - the in-sandbox daemon (`envd`, port 49983) uploads files and runs processes,
//! - the code interpreter (port 49999) executes cells and streams their output.

use super::envelope;
use super::{
    CodeExecution, CommandResult, CreateOptions, SandboxError, SandboxProvider, SandboxSession,
};
use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_DOMAIN: &str = "e2b.app";
const ENVD_PORT: u16 = 49983;
const INTERPRETER_PORT: u16 = 49999;
const SANDBOX_USER: &str = "user";

#[derive(Debug, Clone)]
pub struct E2bProvider {
    client: Client,
    domain: String,
    api_url: String,
    sandbox_url: Option<String>,
}

impl E2bProvider {
    pub fn new(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            client: Client::new(),
            api_url: format!("https://api.{}", domain),
            domain,
            sandbox_url: None,
        }
    }

    /// Send control-plane calls to `url` instead of `https://api.<domain>`.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Route every in-sandbox call to `url` instead of the per-port hosts.
    pub fn with_sandbox_url(mut self, url: impl Into<String>) -> Self {
        self.sandbox_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    async fn create(
        &self,
        template: &str,
        options: CreateOptions,
    ) -> Result<Arc<dyn SandboxSession>, SandboxError> {
        let mut req = self
            .client
            .post(format!("{}/sandboxes", self.api_url))
            .header("X-API-KEY", options.api_key.as_str())
            .json(&json!({
                "templateID": template,
                "timeout": options.timeout.as_secs(),
                "metadata": options.metadata,
            }));
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = check_status(req.send().await?).await?;
        let created: CreatedSandbox = resp.json().await?;
        debug!(sandbox_id = %created.sandbox_id, template, "sandbox created");

        Ok(Arc::new(E2bSession {
            client: self.client.clone(),
            domain: created.domain.unwrap_or_else(|| self.domain.clone()),
            sandbox_id: created.sandbox_id,
            access_token: created.envd_access_token,
            sandbox_url: self.sandbox_url.clone(),
        }))
    }
}

pub struct E2bSession {
    client: Client,
    sandbox_id: String,
    domain: String,
    access_token: Option<String>,
    sandbox_url: Option<String>,
}

impl E2bSession {
    fn service_url(&self, port: u16, path: &str) -> String {
        match &self.sandbox_url {
            Some(base) => format!("{}{}", base, path),
            None => format!("https://{}{}", self.get_host(port), path),
        }
    }

    fn with_access_token(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => req.header("X-Access-Token", token.as_str()),
            None => req,
        }
    }

    fn envd(&self, req: RequestBuilder) -> RequestBuilder {
        self.with_access_token(req.basic_auth(SANDBOX_USER, None::<&str>))
    }
}

#[derive(Debug, Default, Deserialize)]
struct StartResponse {
    #[serde(default)]
    event: ProcessEvent,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessEvent {
    #[serde(default)]
    data: Option<DataEvent>,
    #[serde(default)]
    end: Option<EndEvent>,
}

#[derive(Debug, Deserialize)]
struct DataEvent {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndEvent {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EndOfStream {
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl SandboxSession for E2bSession {
    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run_command(&self, command: &str) -> Result<CommandResult, SandboxError> {
        let request = json!({
            "process": {
                "cmd": "/bin/bash",
                "args": ["-l", "-c", command],
                "envs": {},
            }
        });
        let body = envelope::encode(0, &serde_json::to_vec(&request)?);
        let req = self
            .client
            .post(self.service_url(ENVD_PORT, "/process.Process/Start"))
            .header(CONTENT_TYPE, "application/connect+json")
            .header("Connect-Protocol-Version", "1")
            .body(body);

        let resp = check_status(self.envd(req).send().await?).await?;
        let bytes = resp.bytes().await?;
        collect_process_output(&bytes)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let form = Form::new().part(
            "file",
            Part::text(content.to_string()).file_name(path.to_string()),
        );
        let req = self
            .client
            .post(self.service_url(ENVD_PORT, "/files"))
            .query(&[("path", path), ("username", SANDBOX_USER)])
            .multipart(form);

        check_status(self.envd(req).send().await?).await?;
        Ok(())
    }

    async fn run_code(&self, code: &str) -> Result<CodeExecution, SandboxError> {
        let req = self
            .client
            .post(self.service_url(INTERPRETER_PORT, "/execute"))
            .json(&json!({ "code": code }));

        let resp = check_status(self.with_access_token(req).send().await?).await?;
        let body = resp.text().await?;
        parse_execution(&body)
    }

    fn get_host(&self, port: u16) -> String {
        format!("{}-{}.{}", port, self.sandbox_id, self.domain)
    }
}

async fn check_status(resp: Response) -> Result<Response, SandboxError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("{}: {}", status.as_u16(), body));

    Err(SandboxError::Api {
        status: status.as_u16(),
        message,
    })
}

fn decode_output(chunk: &str) -> Result<String, SandboxError> {
    let bytes = BASE64_STANDARD
        .decode(chunk)
        .map_err(|e| SandboxError::Protocol(format!("invalid process output: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn collect_process_output(body: &[u8]) -> Result<CommandResult, SandboxError> {
    let mut result = CommandResult::default();
    let mut exited = false;

    for frame in envelope::decode_all(body)? {
        if frame.is_end_stream() {
            let trailer: EndOfStream = if frame.payload.is_empty() {
                EndOfStream::default()
            } else {
                serde_json::from_slice(&frame.payload)?
            };
            if let Some(err) = trailer.error {
                return Err(SandboxError::Process {
                    code: err.code,
                    message: err.message,
                });
            }
            continue;
        }

        let msg: StartResponse = serde_json::from_slice(&frame.payload)?;
        if let Some(data) = msg.event.data {
            if let Some(out) = data.stdout {
                result.stdout.push_str(&decode_output(&out)?);
            }
            if let Some(err) = data.stderr {
                result.stderr.push_str(&decode_output(&err)?);
            }
        }
        if let Some(end) = msg.event.end {
            result.exit_code = end.exit_code;
            result.error = end.error.filter(|e| !e.is_empty());
            exited = true;
        }
    }

    if !exited {
        return Err(SandboxError::Protocol(
            "process stream ended without an exit event".to_string(),
        ));
    }
    Ok(result)
}

fn record_text(record: &Value) -> String {
    record
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Fold the interpreter's newline-delimited records into one execution.
fn parse_execution(body: &str) -> Result<CodeExecution, SandboxError> {
    let mut execution = CodeExecution::default();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut record: Value = serde_json::from_str(line)?;
        let kind = record
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "stdout" => execution.stdout.push(record_text(&record)),
            "stderr" => execution.stderr.push(record_text(&record)),
            "error" => execution.error = Some(serde_json::from_value(record)?),
            "result" => {
                if let Some(obj) = record.as_object_mut() {
                    obj.remove("type");
                }
                execution.results.push(record);
            }
            other => debug!(kind = other, "ignoring interpreter record"),
        }
    }

    Ok(execution)
}
