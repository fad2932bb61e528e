/// Errors that can occur while connecting contexts over a socket.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctxrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ctxrpc_frame::FrameError),

    /// The RPC instance refused the link.
    #[error("rpc error: {0}")]
    Rpc(#[from] ctxrpc_core::RpcError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake timed out.
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connecting process is not allowed to attach.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
