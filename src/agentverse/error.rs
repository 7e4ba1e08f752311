// src/agentverse/error.rs

use std::error::Error;
use std::fmt;

/// Cross-cutting failure taxonomy shared by the transport, LLM client, and
/// inference backend.
///
/// # Examples
///
/// ```rust
/// use agentverse::AgentverseError;
///
/// let err = AgentverseError::ConnectFailed("http://127.0.0.1:9".into());
/// assert_eq!(err.to_string(), "connect failed: http://127.0.0.1:9");
/// ```
#[derive(Debug, Clone)]
pub enum AgentverseError {
    /// Raised before any I/O when an endpoint or required setting is missing or empty.
    ConfigError(String),

    /// Parsing free-form model output into structured data failed even after
    /// the tolerant fallback path. Callers recover locally; this variant
    /// exists mainly so parser internals have somewhere to report partial
    /// failure for logging.
    ParseError(String),

    /// Transport-level unreachable endpoint (DNS failure, refused connection).
    ConnectFailed(String),

    /// The call exceeded its configured per-call deadline.
    Timeout(String),

    /// The remote endpoint answered with a non-2xx status.
    RemoteError { status: u16, body_prefix: String },

    /// The inference backend failed internally; callers treat this the same
    /// as a `RemoteError`.
    BackendError(String),

    /// A `tokio::spawn`ed fan-out task could not be joined (panicked or was
    /// cancelled).
    TaskJoin(String),
}

impl fmt::Display for AgentverseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentverseError::ConfigError(msg) => write!(f, "config error: {}", msg),
            AgentverseError::ParseError(msg) => write!(f, "parse error: {}", msg),
            AgentverseError::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            AgentverseError::Timeout(msg) => write!(f, "timed out: {}", msg),
            AgentverseError::RemoteError { status, body_prefix } => {
                write!(f, "remote error ({}): {}", status, body_prefix)
            }
            AgentverseError::BackendError(msg) => write!(f, "backend error: {}", msg),
            AgentverseError::TaskJoin(msg) => write!(f, "task join failed: {}", msg),
        }
    }
}

impl Error for AgentverseError {}

impl AgentverseError {
    /// True for failure kinds the spec classifies as per-call, non-fatal:
    /// the stage continues and records a failure marker rather than
    /// aborting the workflow.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AgentverseError::ConfigError(_))
    }
}
