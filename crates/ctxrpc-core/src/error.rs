use std::time::Duration;

use ctxrpc_transport::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::env::{Endpoint, Env, PeerId};

/// Errors surfaced to callers of the RPC facade.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("procedure '{0}' is not registered in the target context")]
    ProcedureNotFound(String),

    #[error("surface '{0}' is missing or has been torn down")]
    InvalidSurface(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("call rejected: {0}")]
    Rejected(Value),

    #[error("namespace '{0}' is already in use in this context")]
    NamespaceInUse(String),

    #[error("rpc instance is already initialized")]
    AlreadyInitialized,

    #[error("a non-empty namespace is required")]
    NamespaceRequired,

    #[error("rpc instance is not initialized")]
    NotInitialized,

    #[error("init must be called from within a tokio runtime")]
    NoRuntime,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("message needs {parts} parts; peers accept at most {max}")]
    MessageTooLarge { parts: usize, max: u32 },

    #[error("{verb} is not available in the {env} context")]
    WrongContext { verb: &'static str, env: Env },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no client is attached with player id '{0}'")]
    UnknownPeer(PeerId),

    #[error("no link to {0}")]
    NotConnected(Endpoint),

    #[error("{0} went away before responding")]
    Disconnected(Endpoint),

    #[error("no route from the {from} context to the {to} context")]
    Unroutable { from: Env, to: Env },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Failure reported by a procedure, carried back to the caller in an `err`
/// response.
///
/// Procedures usually return [`Fault::Rejected`] through [`Fault::reject`];
/// the other kinds are produced by the engine and keep their meaning across
/// hops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    ProcedureNotFound { name: String },
    InvalidSurface { surface: String },
    Timeout { after_ms: u64 },
    Malformed { reason: String },
    Rejected { reason: Value },
}

impl Fault {
    /// Reject a call with an arbitrary reason.
    pub fn reject(reason: impl Into<Value>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

impl From<Value> for Fault {
    fn from(reason: Value) -> Self {
        Self::Rejected { reason }
    }
}

impl From<&str> for Fault {
    fn from(reason: &str) -> Self {
        Self::reject(reason)
    }
}

impl From<String> for Fault {
    fn from(reason: String) -> Self {
        Self::reject(reason)
    }
}

impl From<RpcError> for Fault {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::ProcedureNotFound(name) => Self::ProcedureNotFound { name },
            RpcError::InvalidSurface(surface) => Self::InvalidSurface { surface },
            RpcError::Timeout(after) => Self::Timeout {
                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            },
            RpcError::Rejected(reason) => Self::Rejected { reason },
            RpcError::MalformedEnvelope(reason) => Self::Malformed { reason },
            err @ RpcError::MessageTooLarge { .. } => Self::Malformed {
                reason: err.to_string(),
            },
            other => Self::reject(other.to_string()),
        }
    }
}

impl From<Fault> for RpcError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::ProcedureNotFound { name } => Self::ProcedureNotFound(name),
            Fault::InvalidSurface { surface } => Self::InvalidSurface(surface),
            Fault::Timeout { after_ms } => Self::Timeout(Duration::from_millis(after_ms)),
            Fault::Malformed { reason } => Self::MalformedEnvelope(reason),
            Fault::Rejected { reason } => Self::Rejected(reason),
        }
    }
}
