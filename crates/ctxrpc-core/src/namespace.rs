use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::env::Env;
use crate::error::{Result, RpcError};

const CHANNEL_PREFIX: &str = "ctxrpc";

/// Namespaces claimed by the RPC instances of one context.
///
/// Each context (server, client, surface) gets one process-wide set from
/// [`NamespaceSet::process`]. Tests and embedders that host several logical
/// contexts in one process can hand an explicit set to the builder instead.
///
/// The set is not add-only: dropping the last handle to an initialized
/// [`Rpc`](crate::Rpc) releases its namespace, so a later instance in the
/// same context may claim it again. Only live instances hold names.
#[derive(Debug, Clone, Default)]
pub struct NamespaceSet {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl NamespaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide set for `env`.
    pub fn process(env: Env) -> Self {
        static SETS: OnceLock<[NamespaceSet; 3]> = OnceLock::new();
        let sets = SETS.get_or_init(Default::default);
        match env {
            Env::Server => sets[0].clone(),
            Env::Client => sets[1].clone(),
            Env::Surface => sets[2].clone(),
        }
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.lock().contains(namespace)
    }

    /// Claimed namespaces, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().iter().cloned().collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn claim(&self, namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(RpcError::NamespaceRequired);
        }
        if !self.lock().insert(namespace.to_string()) {
            return Err(RpcError::NamespaceInUse(namespace.to_string()));
        }
        Ok(())
    }

    pub(crate) fn release(&self, namespace: &str) {
        self.lock().remove(namespace);
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Channel names derived from a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    /// Envelopes (requests and responses).
    pub rpc: String,
    /// Surface procedure claims.
    pub claim: String,
    /// Surface procedure releases.
    pub release: String,
    /// Client asking a surface to announce every procedure again.
    pub announce: String,
}

impl Channels {
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            rpc: format!("{CHANNEL_PREFIX}:rpc:{namespace}"),
            claim: format!("{CHANNEL_PREFIX}:claim:{namespace}"),
            release: format!("{CHANNEL_PREFIX}:release:{namespace}"),
            announce: format!("{CHANNEL_PREFIX}:announce:{namespace}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_of_the_same_namespace_fails() {
        let set = NamespaceSet::new();
        set.claim("game").unwrap();
        assert!(matches!(set.claim("game"), Err(RpcError::NamespaceInUse(ns)) if ns == "game"));
        set.claim("chat").unwrap();
        assert_eq!(set.names(), vec!["chat".to_string(), "game".to_string()]);
    }

    #[test]
    fn empty_namespace_is_required_error() {
        assert!(matches!(
            NamespaceSet::new().claim(""),
            Err(RpcError::NamespaceRequired)
        ));
    }

    #[test]
    fn released_namespace_can_be_claimed_again() {
        let set = NamespaceSet::new();
        set.claim("game").unwrap();
        set.release("game");
        assert!(!set.contains("game"));
        set.claim("game").unwrap();
    }

    #[test]
    fn process_sets_are_per_context() {
        let server = NamespaceSet::process(Env::Server);
        let surface = NamespaceSet::process(Env::Surface);
        server.claim("process-sets-are-per-context").unwrap();
        assert!(NamespaceSet::process(Env::Server).contains("process-sets-are-per-context"));
        assert!(!surface.contains("process-sets-are-per-context"));
        server.release("process-sets-are-per-context");
    }

    #[test]
    fn channel_names_embed_the_namespace() {
        let channels = Channels::for_namespace("game");
        assert_eq!(channels.rpc, "ctxrpc:rpc:game");
        assert_eq!(channels.claim, "ctxrpc:claim:game");
        assert_eq!(channels.release, "ctxrpc:release:game");
        assert_eq!(channels.announce, "ctxrpc:announce:game");
    }
}
