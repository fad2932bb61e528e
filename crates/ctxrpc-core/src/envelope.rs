use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::env::Env;
use crate::error::{Result, RpcError};

const ID_LEN: usize = 16;

/// Correlation id shared by a request, its parts, and its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh random id: 16 lowercase hex characters.
    pub fn random() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(ID_LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[serde(rename = "req")]
    Request,
    #[serde(rename = "ok")]
    ResponseOk,
    #[serde(rename = "err")]
    ResponseErr,
}

impl EnvelopeKind {
    pub fn is_request(self) -> bool {
        self == Self::Request
    }
}

/// One wire message. A logical request or response is one or more
/// envelopes sharing `id`, numbered `part` of `total` (1-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: CorrelationId,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Procedure name; requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Context that sent this envelope.
    pub env: Env,
    /// Context the request originated from when it was relayed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fenv: Option<Env>,
    pub part: u32,
    pub total: u32,
    /// This part's slice of the serialized arguments or result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    /// Caller is not waiting for a response.
    #[serde(default, skip_serializing_if = "is_false")]
    pub noret: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Envelope {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an inbound payload. Any decoding failure is reported as a
    /// malformed envelope.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|err| RpcError::MalformedEnvelope(err.to_string()))
    }

    /// Check the part numbering against `max_parts`.
    pub fn validate(&self, max_parts: u32) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(RpcError::MalformedEnvelope("empty correlation id".to_string()));
        }
        if self.total == 0 || self.total > max_parts {
            return Err(RpcError::MalformedEnvelope(format!(
                "total {} outside 1..={max_parts}",
                self.total
            )));
        }
        if self.part == 0 || self.part > self.total {
            return Err(RpcError::MalformedEnvelope(format!(
                "part {} outside 1..={}",
                self.part, self.total
            )));
        }
        if self.kind.is_request() && self.name.as_deref().is_none_or(str::is_empty) {
            return Err(RpcError::MalformedEnvelope(
                "request without a procedure name".to_string(),
            ));
        }
        Ok(())
    }

    pub fn header(&self) -> Header {
        Header {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            env: self.env,
            fenv: self.fenv,
            noret: self.noret,
        }
    }
}

/// Fields shared by every envelope of one logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: CorrelationId,
    pub kind: EnvelopeKind,
    pub name: Option<String>,
    pub env: Env,
    pub fenv: Option<Env>,
    pub noret: bool,
}

impl Header {
    pub fn request(id: CorrelationId, name: &str, env: Env) -> Self {
        Self {
            id,
            kind: EnvelopeKind::Request,
            name: Some(name.to_string()),
            env,
            fenv: None,
            noret: false,
        }
    }

    pub fn response(id: CorrelationId, ok: bool, env: Env) -> Self {
        Self {
            id,
            kind: if ok {
                EnvelopeKind::ResponseOk
            } else {
                EnvelopeKind::ResponseErr
            },
            name: None,
            env,
            fenv: None,
            noret: false,
        }
    }

    /// The context a request effectively came from: `fenv` when it was
    /// relayed, the sender otherwise.
    pub fn origin(&self) -> Env {
        self.fenv.unwrap_or(self.env)
    }

    pub(crate) fn envelope(&self, part: u32, total: u32, args: Option<String>) -> Envelope {
        Envelope {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            env: self.env,
            fenv: self.fenv,
            part,
            total,
            args,
            noret: self.noret,
        }
    }
}

/// A complete logical message, after reassembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub args: Option<String>,
}
