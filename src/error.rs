//! Error types for tasks-plan
//!
//! Exit codes:
//! - 0: Success
//! - 2: Precondition failed (no workspace, not authenticated, bad args)
//! - 3: Rejected by validation (self-dependency, cycle, duplicate edge)
//! - 4: Operation failed (remote API, transport, local I/O)

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Exit codes for the tp CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const PRECONDITION: i32 = 2;
    pub const VALIDATION: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Coarse error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Validation,
    Transport,
    Local,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::Validation => "validation",
            ErrorKind::Transport => "transport",
            ErrorKind::Local => "local",
        }
    }
}

/// Main error type for tasks-plan operations
#[derive(Error, Debug)]
pub enum Error {
    // Preconditions (exit code 2)
    #[error("No workspace configured. Connect a workspace first.")]
    NoWorkspace,

    #[error("No fragment type configured. Select a fragment type for the workspace.")]
    NoFragmentType,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    // Validation (exit code 3)
    #[error("A task cannot depend on itself")]
    SelfDependency,

    #[error("Adding dependency {task_id} -> {depends_on_id} would create a circular dependency")]
    DependencyCycle {
        task_id: String,
        depends_on_id: String,
    },

    #[error("Dependency already exists: {task_id} -> {depends_on_id}")]
    DuplicateDependency {
        task_id: String,
        depends_on_id: String,
    },

    // Remote failures (exit code 4)
    #[error("Usable API error: {status} {body}")]
    Api { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to parse Usable API response: {0}")]
    MalformedResponse(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    // Local failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    /// An error observed by a deduplicated caller that awaited someone
    /// else's in-flight operation.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoWorkspace
            | Error::NoFragmentType
            | Error::NotAuthenticated
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::TaskNotFound(_) => ErrorKind::Precondition,

            Error::SelfDependency
            | Error::DependencyCycle { .. }
            | Error::DuplicateDependency { .. } => ErrorKind::Validation,

            Error::Api { .. }
            | Error::Transport(_)
            | Error::MalformedResponse(_)
            | Error::TokenRefresh(_) => ErrorKind::Transport,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => ErrorKind::Local,

            Error::Shared(inner) => inner.kind(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Precondition => exit_codes::PRECONDITION,
            ErrorKind::Validation => exit_codes::VALIDATION,
            ErrorKind::Transport | ErrorKind::Local => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured fields for JSON output, when the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::DependencyCycle {
                task_id,
                depends_on_id,
            }
            | Error::DuplicateDependency {
                task_id,
                depends_on_id,
            } => Some(serde_json::json!({
                "taskId": task_id,
                "dependsOnId": depends_on_id,
            })),
            Error::Api { status, body } => Some(serde_json::json!({
                "status": status,
                "body": body,
            })),
            Error::TaskNotFound(id) => Some(serde_json::json!({ "id": id })),
            Error::Shared(inner) => inner.details(),
            _ => None,
        }
    }

    /// Unwrap a shared error back into an owned one where possible.
    pub(crate) fn from_shared(err: Arc<Error>) -> Error {
        match Arc::try_unwrap(err) {
            Ok(owned) => owned,
            Err(shared) => Error::Shared(shared),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::MalformedResponse(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

/// Result type alias for tasks-plan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind().as_str(),
            details: err.details(),
        }
    }
}
