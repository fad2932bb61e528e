//! Static routing between contexts.
//!
//! Server and surfaces never share a link: traffic between them is relayed
//! by the client that owns the surface.

use crate::env::Env;
use crate::error::{Result, RpcError};

/// How a message reaches its target context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The local context holds a link to the target.
    Direct,
    /// The message is handed to a client, which forwards it.
    ViaClient,
}

const ROUTES: [(Env, Env, Route); 7] = [
    (Env::Server, Env::Client, Route::Direct),
    (Env::Client, Env::Server, Route::Direct),
    (Env::Client, Env::Surface, Route::Direct),
    (Env::Surface, Env::Client, Route::Direct),
    (Env::Server, Env::Surface, Route::ViaClient),
    (Env::Surface, Env::Server, Route::ViaClient),
    (Env::Surface, Env::Surface, Route::ViaClient),
];

/// Look up the route from one context to another.
pub fn route(from: Env, to: Env) -> Result<Route> {
    ROUTES
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, route)| *route)
        .ok_or(RpcError::Unroutable { from, to })
}
