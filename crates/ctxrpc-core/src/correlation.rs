use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::env::Endpoint;
use crate::envelope::CorrelationId;
use crate::error::{Result, RpcError};

/// Receives the outcome of one outstanding call.
pub type Completion = oneshot::Receiver<Result<Value>>;

#[derive(Debug)]
struct PendingCall {
    complete: oneshot::Sender<Result<Value>>,
    expected: Endpoint,
    name: String,
}

/// What happened to an inbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting call was completed.
    Delivered,
    /// No call is waiting on this id (expired, cancelled or never sent).
    Unknown,
    /// The id is pending, but on a different endpoint. The entry is kept.
    WrongResponder { expected: Endpoint },
}

/// Outstanding calls awaiting a response, keyed by correlation id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<CorrelationId, PendingCall>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A random id not currently pending.
    pub fn new_id(&self) -> CorrelationId {
        loop {
            let id = CorrelationId::random();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Record a call sent to `expected`. Only that endpoint may answer it.
    pub fn insert(&mut self, id: CorrelationId, expected: Endpoint, name: &str) -> Completion {
        let (complete, completion) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                complete,
                expected,
                name: name.to_string(),
            },
        );
        completion
    }

    /// Complete the call `id` with `outcome`, if `from` is the endpoint it
    /// was sent to.
    pub fn resolve(&mut self, id: &CorrelationId, from: &Endpoint, outcome: Result<Value>) -> Resolution {
        match self.pending.get(id) {
            None => return Resolution::Unknown,
            Some(call) if &call.expected != from => {
                return Resolution::WrongResponder {
                    expected: call.expected.clone(),
                }
            }
            Some(_) => {}
        }
        if let Some(call) = self.pending.remove(id) {
            // The caller may have stopped waiting already.
            let _ = call.complete.send(outcome);
        }
        Resolution::Delivered
    }

    /// Forget a call without completing it.
    pub fn cancel(&mut self, id: &CorrelationId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Fail every call waiting on `endpoint` with the error `make` builds.
    pub fn fail_endpoint(&mut self, endpoint: &Endpoint, make: impl Fn() -> RpcError) -> usize {
        let ids: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, call)| &call.expected == endpoint)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(call) = self.pending.remove(id) {
                tracing::debug!(%id, procedure = %call.name, %endpoint, "failing pending call");
                let _ = call.complete.send(Err(make()));
            }
        }
        ids.len()
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    /// Name of the procedure a pending call invoked.
    pub fn procedure(&self, id: &CorrelationId) -> Option<&str> {
        self.pending.get(id).map(|call| call.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
