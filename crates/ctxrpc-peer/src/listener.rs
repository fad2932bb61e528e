use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ctxrpc_core::{PeerId, Rpc};
use ctxrpc_frame::{FrameConfig, FrameReader, FrameWriter, FramedLink, DEFAULT_MAX_PAYLOAD};
use ctxrpc_transport::{IpcStream, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::handshake::{handshake_server_with_config, HandshakeConfig};

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub handshake: HandshakeConfig,
    /// Refuse connections from processes running as a different user.
    /// Only enforced where the OS reports peer credentials (Linux).
    pub require_same_uid: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            require_same_uid: true,
        }
    }
}

/// A client that completed the handshake.
///
/// The link is not reading yet; [`Accepted::attach`] wires it into a server
/// [`Rpc`] and then starts it, so no early request is lost.
#[derive(Debug)]
pub struct Accepted {
    pub peer_id: PeerId,
    pub link: Arc<FramedLink>,
}

impl Accepted {
    /// Attach to `rpc` as a player's client. The client is detached again
    /// when the link closes.
    pub fn attach(self, rpc: &Rpc) -> Result<PeerId> {
        let Accepted { peer_id, link } = self;
        rpc.attach_client(peer_id.clone(), link.clone())?;

        let weak = rpc.downgrade();
        let departed = peer_id.clone();
        link.on_close(move || {
            if let Some(rpc) = weak.upgrade() {
                rpc.detach_client(&departed);
            }
        });
        link.start()?;
        Ok(peer_id)
    }
}

/// Accepts client processes on a Unix socket and hands them to a server
/// [`Rpc`].
pub struct RpcListener {
    socket: UnixDomainSocket,
    config: ListenerConfig,
    next_peer_id: AtomicU64,
}

impl RpcListener {
    /// Bind to a Unix domain socket path.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            config: ListenerConfig::default(),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Override listener config.
    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next client and assign it `peer-<n>`.
    pub fn accept(&self) -> Result<Accepted> {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        self.accept_with_id(PeerId::new(format!("peer-{id}")))
    }

    /// Accept the next client under an explicit identity.
    pub fn accept_with_id(&self, peer_id: PeerId) -> Result<Accepted> {
        let stream = self.socket.accept()?;
        if self.config.require_same_uid {
            check_same_uid(&stream)?;
        }
        let reader_stream = stream.try_clone()?;

        let handshake = &self.config.handshake;
        let frame_config = FrameConfig {
            max_payload_size: handshake.max_handshake_payload,
            read_timeout: Some(handshake.timeout),
            write_timeout: Some(handshake.timeout),
        };

        let mut reader = FrameReader::with_config_ipc(reader_stream, frame_config.clone())?;
        let mut writer = FrameWriter::with_config_ipc(stream, frame_config)?;

        let result = handshake_server_with_config(&mut reader, &mut writer, &peer_id, handshake)?;
        // Handshake uses a tighter pre-auth payload budget; restore runtime defaults after auth.
        reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
        writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);

        debug!(peer = %peer_id, version = %result.remote_version, "client handshake complete");
        let link = FramedLink::new(peer_id.as_str(), reader, writer)?;
        Ok(Accepted { peer_id, link })
    }

    /// Accept clients and attach each to `rpc` until the socket fails.
    ///
    /// A client that fails the handshake or the identity check is dropped
    /// and logged; it does not stop the loop.
    pub fn serve(&self, rpc: &Rpc) -> Result<()> {
        info!(path = ?self.path(), "serving rpc clients");
        loop {
            match self.accept() {
                Ok(accepted) => {
                    accepted.attach(rpc)?;
                }
                Err(PeerError::Transport(err)) => return Err(PeerError::Transport(err)),
                Err(err) => warn!(error = %err, "rejected client connection"),
            }
        }
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

fn check_same_uid(stream: &IpcStream) -> Result<()> {
    let Some(creds) = stream.peer_credentials() else {
        return Ok(());
    };
    // SAFETY: geteuid has no preconditions and cannot fail.
    let own = unsafe { libc::geteuid() };
    if creds.uid != own {
        return Err(PeerError::PermissionDenied(format!(
            "pid {} runs as uid {}, server runs as uid {own}",
            creds.pid, creds.uid
        )));
    }
    Ok(())
}
