//! Engine-owned procedures.
//!
//! Every context answers [`TRIGGER_EVENT`], which is how remote triggers are
//! delivered. Clients additionally forward traffic between the server and
//! their surfaces, which never share a link.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CallOptions;
use crate::env::Env;
use crate::error::Fault;
use crate::registry::{procedure_fn, CallInfo, ProcedureResult};
use crate::rpc::{Inner, Rpc, Target};

/// Delivers a remote trigger to local subscribers.
pub const TRIGGER_EVENT: &str = "__rpc:triggerEvent";
/// Client: forward a surface's call to the server.
pub const CALL_SERVER: &str = "__rpc:callServer";
/// Client: forward a call to the surface that claimed the procedure.
pub const CALL_SURFACES: &str = "__rpc:callSurfaces";
/// Client: trigger an event on every open surface.
pub const TRIGGER_SURFACES: &str = "__rpc:triggerSurfaces";

/// Arguments of a relayed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RelayRequest {
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) args: Option<Value>,
    #[serde(default)]
    pub(crate) noret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) timeout_ms: Option<u64>,
}

impl RelayRequest {
    fn options(&self) -> CallOptions {
        CallOptions {
            timeout: self.timeout_ms.map(Duration::from_millis),
            suppress_response: self.noret,
        }
    }
}

/// Arguments of a remote trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EventRequest {
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) args: Option<Value>,
}

pub(crate) fn install(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    let mut state = inner.lock();

    let events = weak.clone();
    state.procedures.register(
        TRIGGER_EVENT,
        procedure_fn(move |args: Value, info: CallInfo| {
            let events = events.clone();
            async move {
                let event: EventRequest = parse(args)?;
                let inner = events
                    .upgrade()
                    .ok_or_else(|| Fault::reject("rpc instance dropped"))?;
                inner.emit(&event.name, &event.args.unwrap_or(Value::Null), &info);
                Ok(Value::Null)
            }
        }),
    );

    if inner.env != Env::Client {
        return;
    }

    let server = weak.clone();
    state.procedures.register(
        CALL_SERVER,
        procedure_fn(move |args: Value, info: CallInfo| {
            forward(server.clone(), args, info, Target::Server, "call_server")
        }),
    );

    let surfaces = weak.clone();
    state.procedures.register(
        CALL_SURFACES,
        procedure_fn(move |args: Value, info: CallInfo| {
            forward(surfaces.clone(), args, info, Target::Claimant(None), "call_surfaces")
        }),
    );

    state.procedures.register(
        TRIGGER_SURFACES,
        procedure_fn(move |args: Value, info: CallInfo| {
            let weak = weak.clone();
            async move {
                let event: EventRequest = parse(args)?;
                let rpc = upgrade(&weak)?;
                rpc.broadcast_surfaces(&event.name, event.args, Some(info.origin))?;
                Ok(Value::Null)
            }
        }),
    );
}

/// Send the relayed call on, marked with the context it came from, and hand
/// back whatever the target answers.
async fn forward(
    weak: Weak<Inner>,
    args: Value,
    info: CallInfo,
    target: Target,
    verb: &'static str,
) -> ProcedureResult {
    let hop: RelayRequest = parse(args)?;
    let rpc = upgrade(&weak)?;
    let opts = hop.options();
    let started = rpc.start(verb, target, &hop.name, hop.args, opts, Some(info.origin))?;
    Ok(started.finish().await?)
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, Fault> {
    serde_json::from_value(args).map_err(|err| Fault::Malformed {
        reason: err.to_string(),
    })
}

fn upgrade(weak: &Weak<Inner>) -> Result<Rpc, Fault> {
    weak.upgrade()
        .map(Rpc::from_inner)
        .ok_or_else(|| Fault::reject("rpc instance dropped"))
}
