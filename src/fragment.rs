use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Template id that selects inline execution instead of an exposed service.
pub const CODE_INTERPRETER_TEMPLATE: &str = "code-interpreter-v1";

pub const DEFAULT_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_path: String,
    pub file_content: String,
}

/// Fragment source: a single file body, or a set of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FragmentCode {
    Files(Vec<FileEntry>),
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    pub template: String,
    #[serde(default)]
    pub code: Option<FragmentCode>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub has_additional_dependencies: bool,
    #[serde(default)]
    pub additional_dependencies: Vec<String>,
    #[serde(default)]
    pub install_dependencies_command: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commentary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Interpreter,
    Web,
}

impl FragmentDescriptor {
    pub fn mode(&self) -> ExecutionMode {
        if self.template == CODE_INTERPRETER_TEMPLATE {
            ExecutionMode::Interpreter
        } else {
            ExecutionMode::Web
        }
    }

    /// Port to expose; absent or zero falls back to 80.
    pub fn port(&self) -> u16 {
        self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT)
    }

    /// Source handed to the interpreter.
    ///
    /// For multi-file fragments this is the entry at `file_path`, else the
    /// first entry. Missing code runs as an empty string.
    pub fn interpreter_source(&self) -> &str {
        match &self.code {
            Some(FragmentCode::Source(src)) => src,
            Some(FragmentCode::Files(files)) => {
                let main = self
                    .file_path
                    .as_deref()
                    .and_then(|p| files.iter().find(|f| f.file_path == p));
                main.or_else(|| files.first())
                    .map(|f| f.file_content.as_str())
                    .unwrap_or("")
            }
            None => "",
        }
    }
}

/// Optional identity of the requester, used for attribution only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub access_token: Option<String>,
}

/// Body of `POST /api/sandbox`.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxRequest {
    pub fragment: FragmentDescriptor,
    #[serde(default, rename = "userID")]
    pub user_id: Option<String>,
    #[serde(default, rename = "teamID")]
    pub team_id: Option<String>,
    #[serde(default, rename = "accessToken")]
    pub access_token: Option<String>,
}

impl SandboxRequest {
    pub fn into_parts(self) -> (FragmentDescriptor, CallerContext) {
        let caller = CallerContext {
            user_id: self.user_id,
            team_id: self.team_id,
            access_token: self.access_token,
        };
        (self.fragment, caller)
    }
}

/// Error raised by user code inside the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterResult {
    pub sbx_id: String,
    pub template: String,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub runtime_error: Option<RuntimeError>,
    pub cell_results: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebResult {
    pub sbx_id: String,
    pub template: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Interpreter(InterpreterResult),
    Web(WebResult),
}

impl ExecutionResult {
    pub fn sbx_id(&self) -> &str {
        match self {
            ExecutionResult::Interpreter(r) => &r.sbx_id,
            ExecutionResult::Web(r) => &r.sbx_id,
        }
    }
}
