use std::path::Path;
use std::sync::Arc;

use ctxrpc_core::{PeerId, Rpc};
use ctxrpc_frame::{FrameConfig, FrameReader, FrameWriter, FramedLink, DEFAULT_MAX_PAYLOAD};
use ctxrpc_transport::UnixDomainSocket;

use crate::error::Result;
use crate::handshake::{handshake_client_with_config, HandshakeConfig, HandshakeResult};

/// A handshaken connection to a server process.
#[derive(Debug)]
pub struct Connection {
    handshake: HandshakeResult,
    link: Arc<FramedLink>,
}

impl Connection {
    /// Identity the server knows this client by.
    pub fn peer_id(&self) -> &PeerId {
        &self.handshake.peer_id
    }

    /// Protocol version the server announced.
    pub fn server_version(&self) -> &str {
        &self.handshake.remote_version
    }

    pub fn link(&self) -> &Arc<FramedLink> {
        &self.link
    }

    /// Use this connection as `rpc`'s server link and start reading.
    ///
    /// `rpc` is disconnected when the server goes away.
    pub fn attach(&self, rpc: &Rpc) -> Result<()> {
        rpc.connect_server(self.link.clone())?;

        let weak = rpc.downgrade();
        self.link.on_close(move || {
            if let Some(rpc) = weak.upgrade() {
                rpc.disconnect();
            }
        });
        self.link.start()?;
        Ok(())
    }

    /// Close the connection.
    pub fn close(&self) {
        self.link.close();
    }
}

/// Connect to a listening server as a client.
pub fn connect(path: impl AsRef<Path>) -> Result<Connection> {
    connect_with_config(path, &HandshakeConfig::default())
}

/// Connect with explicit handshake configuration.
pub fn connect_with_config(
    path: impl AsRef<Path>,
    handshake_config: &HandshakeConfig,
) -> Result<Connection> {
    let stream = UnixDomainSocket::connect(path)?;
    let reader_stream = stream.try_clone()?;

    let frame_config = FrameConfig {
        max_payload_size: handshake_config.max_handshake_payload,
        read_timeout: Some(handshake_config.timeout),
        write_timeout: Some(handshake_config.timeout),
    };

    let mut reader = FrameReader::with_config_ipc(reader_stream, frame_config.clone())?;
    let mut writer = FrameWriter::with_config_ipc(stream, frame_config)?;

    let handshake = handshake_client_with_config(&mut reader, &mut writer, handshake_config)?;
    // Handshake uses a tighter pre-auth payload budget; restore runtime defaults after auth.
    reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
    writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);

    let link = FramedLink::new("server", reader, writer)?;
    Ok(Connection { handshake, link })
}
