//! Inbound envelope handling.
//!
//! Runs on whatever thread the transport delivers on. Nothing here blocks:
//! procedures are spawned onto the runtime captured at init, and responses
//! are matched against the correlation table under a short lock.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::codec;
use crate::correlation::Resolution;
use crate::env::Endpoint;
use crate::envelope::{Envelope, EnvelopeKind, Header, Message};
use crate::error::{Fault, RpcError};
use crate::reassembly::Progress;
use crate::registry::{CallInfo, ProcedureResult};
use crate::rpc::Inner;

pub(crate) fn handle_inbound(inner: &Arc<Inner>, from: &Endpoint, payload: &str) {
    let envelope = match Envelope::from_json(payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(peer = %from, error = %err, "dropping malformed envelope");
            return;
        }
    };
    if let Err(err) = envelope.validate(inner.config.max_message_parts) {
        warn!(peer = %from, id = %envelope.id, error = %err, "dropping malformed envelope");
        return;
    }
    if envelope.env != from.env() {
        warn!(
            peer = %from,
            id = %envelope.id,
            claimed = %envelope.env,
            "envelope claims to come from another context; dropped"
        );
        return;
    }

    let progress = inner.lock().reassembly.push(from, envelope);
    let message = match progress {
        Progress::Complete(message) => message,
        Progress::Pending | Progress::Duplicate => return,
        Progress::Rejected(reason) => {
            warn!(peer = %from, %reason, "dropping malformed message");
            return;
        }
    };

    match message.header.kind {
        EnvelopeKind::Request => handle_request(inner, from, message),
        EnvelopeKind::ResponseOk | EnvelopeKind::ResponseErr => {
            handle_response(inner, from, message)
        }
    }
}

fn handle_request(inner: &Arc<Inner>, from: &Endpoint, message: Message) {
    let Message { header, args } = message;
    let Ok(setup) = inner.setup() else {
        return;
    };
    let runtime = setup.runtime.clone();
    let name = header.name.clone().unwrap_or_default();

    let args = match args.as_deref().map(|text| codec::deserialize_args(text, &*inner.refs)) {
        None => Value::Null,
        Some(Ok(args)) => args,
        Some(Err(err)) => {
            warn!(id = %header.id, procedure = %name, error = %err, "undecodable arguments");
            respond(
                inner,
                from,
                &header,
                Err(Fault::Malformed {
                    reason: err.to_string(),
                }),
            );
            return;
        }
    };

    let handler = inner.lock().procedures.get(&name);
    let Some(handler) = handler else {
        debug!(id = %header.id, procedure = %name, peer = %from, "procedure not found");
        respond(inner, from, &header, Err(Fault::ProcedureNotFound { name }));
        return;
    };

    let info = CallInfo {
        id: header.id.clone(),
        origin: header.origin(),
        peer: Some(from.clone()),
    };
    debug!(id = %header.id, procedure = %name, peer = %from, origin = %info.origin, "invoking procedure");

    let inner = inner.clone();
    let from = from.clone();
    runtime.spawn(async move {
        let outcome = match tokio::spawn(handler.call(args, info)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(id = %header.id, procedure = %name, error = %err, "procedure task failed");
                Err(Fault::reject(format!("procedure '{name}' failed")))
            }
        };
        respond(&inner, &from, &header, outcome);
    });
}

/// Send the response to `request` back to the endpoint it came from.
fn respond(inner: &Inner, to: &Endpoint, request: &Header, outcome: ProcedureResult) {
    if request.noret {
        return;
    }

    let encoded = match outcome {
        Ok(value) => codec::serialize_args(&value, &*inner.refs).map(|text| (true, text)),
        Err(fault) => serde_json::to_string(&fault)
            .map(|text| (false, text))
            .map_err(RpcError::from),
    };
    let (ok, payload) = match encoded {
        Ok(encoded) => encoded,
        Err(err) => {
            let fault = Fault::Malformed {
                reason: format!("result could not be serialized: {err}"),
            };
            match serde_json::to_string(&fault) {
                Ok(text) => (false, text),
                Err(_) => return,
            }
        }
    };

    let link = inner.lock().link_for(inner.env, to);
    let link = match link {
        Ok(link) => link,
        Err(err) => {
            debug!(id = %request.id, peer = %to, error = %err, "no route back; response dropped");
            return;
        }
    };
    let header = Header::response(request.id.clone(), ok, inner.env);
    match inner.send_message(&link, &header, Some(&payload)) {
        Ok(()) => {}
        Err(err @ RpcError::MessageTooLarge { .. }) => {
            warn!(id = %request.id, peer = %to, error = %err, "response too large; answering with a fault");
            let fault = Fault::from(err);
            let sent = serde_json::to_string(&fault)
                .map_err(RpcError::from)
                .and_then(|text| {
                    let header = Header::response(request.id.clone(), false, inner.env);
                    inner.send_message(&link, &header, Some(&text))
                });
            if let Err(err) = sent {
                warn!(id = %request.id, peer = %to, error = %err, "failed to deliver response");
            }
        }
        Err(err) => warn!(id = %request.id, peer = %to, error = %err, "failed to deliver response"),
    }
}

fn handle_response(inner: &Inner, from: &Endpoint, message: Message) {
    let Message { header, args } = message;
    let outcome = match header.kind {
        EnvelopeKind::ResponseOk => match args.as_deref() {
            Some(text) => codec::deserialize_args(text, &*inner.refs)
                .map_err(|err| RpcError::MalformedEnvelope(err.to_string())),
            None => Ok(Value::Null),
        },
        _ => Err(match args.as_deref() {
            Some(text) => serde_json::from_str::<Fault>(text)
                .map(RpcError::from)
                .unwrap_or_else(|err| RpcError::MalformedEnvelope(err.to_string())),
            None => RpcError::MalformedEnvelope("error response without a reason".to_string()),
        }),
    };

    let resolution = inner.lock().correlation.resolve(&header.id, from, outcome);
    match resolution {
        Resolution::Delivered => debug!(id = %header.id, peer = %from, "response delivered"),
        Resolution::Unknown => {
            debug!(id = %header.id, peer = %from, "response for an unknown or expired call dropped")
        }
        Resolution::WrongResponder { expected } => warn!(
            id = %header.id,
            peer = %from,
            %expected,
            "response from an endpoint the call was not sent to; dropped"
        ),
    }
}
