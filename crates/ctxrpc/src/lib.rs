//! Correlated RPC and events across a server, its clients and their
//! embedded UI surfaces.
//!
//! # Crate Structure
//!
//! - [`transport`]: the `Transport` capability and its in-process and Unix socket implementations
//! - [`frame`]: named-channel framing and the framed stream link
//! - [`rpc`]: correlation, routing, registries and the `Rpc` facade
//! - [`peer`]: handshake, listener and connector (behind the `peer` feature)
//!
//! The most used types are re-exported at the root.

/// Re-export transport types.
pub mod transport {
    pub use ctxrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ctxrpc_frame::*;
}

/// Re-export the RPC engine.
pub mod rpc {
    pub use ctxrpc_core::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ctxrpc_peer::*;
}

pub use ctxrpc_core::{
    CallInfo, CallOptions, Endpoint, Env, Fault, PeerId, Rpc, RpcConfig, RpcError, SurfaceId,
};
pub use ctxrpc_transport::{MemoryLink, Transport};
