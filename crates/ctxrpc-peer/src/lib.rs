//! Process-to-process plumbing for ctxrpc.
//!
//! A server process binds an [`RpcListener`]; each client process calls
//! [`connect`]. The two exchange a short handshake on the control channel
//! in which the server assigns the client its [`PeerId`](ctxrpc_core::PeerId).
//! After that the stream becomes a `FramedLink` attached to each side's
//! `Rpc` instance.

pub mod error;
pub mod handshake;

#[cfg(unix)]
pub mod connector;
#[cfg(unix)]
pub mod listener;

pub use error::{PeerError, Result};
pub use handshake::{
    handshake_client, handshake_client_with_config, handshake_server, handshake_server_with_config,
    HandshakeConfig, HandshakeRequest, HandshakeResponse, HandshakeResult, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};

#[cfg(unix)]
pub use connector::{connect, connect_with_config, Connection};
#[cfg(unix)]
pub use listener::{Accepted, ListenerConfig, RpcListener};
