//! Cross-context RPC correlation and routing.
//!
//! An [`Rpc`] instance lives in one of three contexts ([`Env`]): the server,
//! a client (one per player), or a surface embedded in a client. Instances
//! exchange JSON envelopes over [`ctxrpc_transport::Transport`] links:
//!
//! ```text
//! server ──(one link per player)── client ──(one link per surface)── surface
//! ```
//!
//! Server and surfaces have no direct link; the client relays between them
//! using engine procedures registered at [`Rpc::init`].
//!
//! Calls are asynchronous and correlated by id. Large arguments are split
//! into numbered parts and reassembled by position on the far side.
//! Triggers are fire-and-forget events delivered to every subscriber.

pub mod codec;
pub mod config;
pub mod correlation;
mod dispatcher;
pub mod env;
pub mod envelope;
pub mod error;
pub mod namespace;
pub mod reassembly;
pub mod registry;
mod relay;
pub mod router;
mod rpc;
pub mod surfaces;

pub use codec::{NoRefs, RefCodec};
pub use config::{
    CallOptions, RpcConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_PARTS,
    DEFAULT_MAX_PARTIAL_MESSAGES, DEFAULT_PARTIAL_MESSAGE_TTL,
};
pub use env::{Endpoint, Env, PeerId, SurfaceId};
pub use envelope::{CorrelationId, Envelope, EnvelopeKind, Header};
pub use error::{Fault, Result, RpcError};
pub use namespace::{Channels, NamespaceSet};
pub use registry::{procedure_fn, BoxFuture, CallInfo, HandlerId, Procedure, ProcedureResult};
pub use relay::{CALL_SERVER, CALL_SURFACES, TRIGGER_EVENT, TRIGGER_SURFACES};
pub use rpc::{Rpc, RpcBuilder, WeakRpc, INTERNAL_PREFIX};
