use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::env::{Endpoint, Env};
use crate::envelope::CorrelationId;
use crate::error::Fault;

/// Boxed future returned by procedures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a procedure resolves to.
pub type ProcedureResult = std::result::Result<Value, Fault>;

/// Metadata handed to procedures and event handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    /// Correlation id of the request (fresh for local calls).
    pub id: CorrelationId,
    /// Context the call originated from, looking through relays.
    pub origin: Env,
    /// The link the request arrived on; `None` for local calls.
    pub peer: Option<Endpoint>,
}

impl CallInfo {
    pub(crate) fn local(env: Env) -> Self {
        Self {
            id: CorrelationId::random(),
            origin: env,
            peer: None,
        }
    }
}

/// A callable procedure.
pub trait Procedure: Send + Sync + 'static {
    fn call(&self, args: Value, info: CallInfo) -> BoxFuture<'static, ProcedureResult>;
}

struct FnProcedure<F>(F);

impl<F, Fut> Procedure for FnProcedure<F>
where
    F: Fn(Value, CallInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    fn call(&self, args: Value, info: CallInfo) -> BoxFuture<'static, ProcedureResult> {
        Box::pin((self.0)(args, info))
    }
}

/// Wrap an async closure as a [`Procedure`].
pub fn procedure_fn<F, Fut>(f: F) -> Arc<dyn Procedure>
where
    F: Fn(Value, CallInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcedureResult> + Send + 'static,
{
    Arc::new(FnProcedure(f))
}

/// Procedures callable in this context, at most one per name.
#[derive(Default)]
pub struct ProcedureRegistry {
    handlers: HashMap<String, Arc<dyn Procedure>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. Returns true if it replaced one.
    pub fn register(&mut self, name: &str, handler: Arc<dyn Procedure>) -> bool {
        self.handlers.insert(name.to_string(), handler).is_some()
    }

    /// Returns true if something was registered under `name`.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Procedure>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// A subscriber to a named event.
pub type EventHandler = Arc<dyn Fn(&Value, &CallInfo) + Send + Sync + 'static>;

/// Handle returned by [`EventRegistry::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Event subscribers, many per name, kept in subscription order.
#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<String, Vec<(HandlerId, EventHandler)>>,
    next_id: u64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, name: &str, handler: EventHandler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one subscription. Returns false if it was not subscribed.
    pub fn off(&mut self, name: &str, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(name);
        }
        removed
    }

    /// Snapshot of the subscribers for `name`.
    pub fn subscribers(&self, name: &str) -> Vec<EventHandler> {
        self.handlers
            .get(name)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }
}

/// Run each subscriber in order. A panicking subscriber is logged and does
/// not stop the others. Returns how many ran to completion.
pub fn fan_out(name: &str, subscribers: &[EventHandler], args: &Value, info: &CallInfo) -> usize {
    let mut completed = 0;
    for handler in subscribers {
        match catch_unwind(AssertUnwindSafe(|| handler(args, info))) {
            Ok(()) => completed += 1,
            Err(_) => warn!(event = name, id = %info.id, "event handler panicked"),
        }
    }
    completed
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventHandler {
        let log = log.clone();
        Arc::new(move |args: &Value, _info: &CallInfo| {
            log.lock().unwrap().push(format!("{tag}:{args}"));
        })
    }

    #[tokio::test]
    async fn registered_procedure_is_callable() {
        let mut registry = ProcedureRegistry::new();
        registry.register(
            "double",
            procedure_fn(|args: Value, _info: CallInfo| async move {
                Ok(json!(args.as_i64().unwrap_or(0) * 2))
            }),
        );
        let handler = registry.get("double").unwrap();
        let out = handler.call(json!(21), CallInfo::local(Env::Server)).await;
        assert_eq!(out.unwrap(), json!(42));
    }

    #[test]
    fn last_registration_wins_and_unregister_removes() {
        let mut registry = ProcedureRegistry::new();
        let noop = || procedure_fn(|_args: Value, _info: CallInfo| async { Ok(Value::Null) });
        assert!(!registry.register("a", noop()));
        assert!(registry.register("a", noop()));
        registry.register("b", noop());
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn subscribers_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut events = EventRegistry::new();
        events.on("tick", recorder(&log, "first"));
        events.on("tick", recorder(&log, "second"));

        let ran = fan_out(
            "tick",
            &events.subscribers("tick"),
            &json!(1),
            &CallInfo::local(Env::Client),
        );
        assert_eq!(ran, 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn off_removes_only_that_subscription() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut events = EventRegistry::new();
        let first = events.on("tick", recorder(&log, "first"));
        events.on("tick", recorder(&log, "second"));

        assert!(events.off("tick", first));
        assert!(!events.off("tick", first));
        assert_eq!(events.count("tick"), 1);
        assert!(!events.off("other", first));
    }

    #[test]
    fn panicking_subscriber_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut events = EventRegistry::new();
        events.on("tick", Arc::new(|_: &Value, _: &CallInfo| panic!("boom")));
        events.on("tick", recorder(&log, "after"));

        let ran = fan_out(
            "tick",
            &events.subscribers("tick"),
            &Value::Null,
            &CallInfo::local(Env::Surface),
        );
        assert_eq!(ran, 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
