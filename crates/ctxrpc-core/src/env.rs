use std::fmt;

use serde::{Deserialize, Serialize};

/// The three execution contexts an RPC instance can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Server,
    Client,
    Surface,
}

impl Env {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Surface => "surface",
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one attached client (a player) as seen from the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifies one surface attached to a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SurfaceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The far side of one link, as seen from the local context.
///
/// Responses are matched against the endpoint a request was sent to, so the
/// identity carried here is what makes a forged response detectable.
/// `Client(None)` is the single client a surface is embedded in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Server,
    Client(Option<PeerId>),
    Surface(SurfaceId),
}

impl Endpoint {
    /// The context living on the far side of this endpoint.
    pub fn env(&self) -> Env {
        match self {
            Self::Server => Env::Server,
            Self::Client(_) => Env::Client,
            Self::Surface(_) => Env::Surface,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client(Some(peer)) => write!(f, "client {peer}"),
            Self::Client(None) => f.write_str("client"),
            Self::Surface(id) => write!(f, "surface {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Env::Surface).unwrap(), "\"surface\"");
        let env: Env = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(env, Env::Client);
        assert!(serde_json::from_str::<Env>("\"browser\"").is_err());
    }

    #[test]
    fn endpoint_display_names_the_peer() {
        assert_eq!(Endpoint::Client(Some(PeerId::from("p1"))).to_string(), "client p1");
        assert_eq!(Endpoint::Client(None).to_string(), "client");
        assert_eq!(Endpoint::Surface(SurfaceId::from("hud")).to_string(), "surface hud");
        assert_eq!(Endpoint::Surface("hud".into()).env(), Env::Surface);
    }
}
