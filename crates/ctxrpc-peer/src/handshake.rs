use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use ctxrpc_core::PeerId;
use ctxrpc_frame::{FrameError, FrameReader, FrameWriter, CONTROL};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PeerError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_PEER_ID_LEN: usize = 128;

/// Protocol name both sides must agree on.
pub const PROTOCOL_NAME: &str = "ctxrpc";

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Client hello, sent on the control channel right after connecting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol name. Must be `ctxrpc` by default.
    pub protocol: String,
    /// Protocol version string (`<major>.<minor>`).
    pub version: String,
}

/// Server reply. Carries the identity the server will know this client by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Protocol name. Must match request protocol.
    pub protocol: String,
    /// Server protocol version.
    pub version: String,
    /// Identity assigned to the client.
    pub peer_id: String,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Identity the server assigned to the client.
    pub peer_id: PeerId,
    /// Version announced by the remote side.
    pub remote_version: String,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Overall deadline for the exchange.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

/// Perform client-side handshake using default configuration.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<HandshakeResult> {
    handshake_client_with_config(reader, writer, &HandshakeConfig::default())
}

/// Perform client-side handshake using explicit configuration.
pub fn handshake_client_with_config<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let req = HandshakeRequest {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
    };
    send_control_json(writer, &req)?;

    let deadline = Instant::now() + config.timeout;
    let payload = recv_control_payload(
        reader,
        deadline,
        config.timeout,
        config.max_handshake_payload,
    )?;
    let resp: HandshakeResponse = serde_json::from_slice(&payload)?;

    validate_protocol_name(&resp.protocol)?;
    validate_version(&resp.version)?;
    validate_peer_id(&resp.peer_id)?;

    if resp.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            resp.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&config.protocol_version, &resp.version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            resp.version, config.protocol_version
        )));
    }

    debug!(peer = %resp.peer_id, version = %resp.version, "handshake accepted by server");
    Ok(HandshakeResult {
        peer_id: PeerId::new(resp.peer_id),
        remote_version: resp.version,
    })
}

/// Perform server-side handshake using default configuration.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    peer_id: &PeerId,
) -> Result<HandshakeResult> {
    handshake_server_with_config(reader, writer, peer_id, &HandshakeConfig::default())
}

/// Perform server-side handshake using explicit configuration.
///
/// On any validation failure nothing is written back; the caller drops the
/// stream and the client observes a disconnect.
pub fn handshake_server_with_config<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    peer_id: &PeerId,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_peer_id(peer_id.as_str())?;

    let deadline = Instant::now() + config.timeout;
    let payload = recv_control_payload(
        reader,
        deadline,
        config.timeout,
        config.max_handshake_payload,
    )?;
    let req: HandshakeRequest = serde_json::from_slice(&payload)?;

    validate_protocol_name(&req.protocol)?;
    validate_version(&req.version)?;

    if req.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            req.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&req.version, &config.protocol_version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (server '{}')",
            req.version, config.protocol_version
        )));
    }

    let resp = HandshakeResponse {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        peer_id: peer_id.to_string(),
    };
    send_control_json(writer, &resp)?;

    Ok(HandshakeResult {
        peer_id: peer_id.clone(),
        remote_version: req.version,
    })
}

fn send_control_json<T: Serialize, W: Write>(writer: &mut FrameWriter<W>, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    writer.send(CONTROL, &payload)?;
    Ok(())
}

fn recv_control_payload<R: Read>(
    reader: &mut FrameReader<R>,
    deadline: Instant,
    timeout: Duration,
    max_handshake_payload: usize,
) -> Result<Vec<u8>> {
    loop {
        if Instant::now() >= deadline {
            return Err(PeerError::Timeout(timeout));
        }

        match reader.read_frame() {
            Ok(frame) => {
                if frame.channel != CONTROL {
                    return Err(PeerError::HandshakeFailed(format!(
                        "expected channel {}, got {}",
                        CONTROL, frame.channel
                    )));
                }
                if frame.payload.len() > max_handshake_payload {
                    return Err(PeerError::HandshakeFailed(format!(
                        "handshake payload too large: {} (max {})",
                        frame.payload.len(),
                        max_handshake_payload
                    )));
                }
                return Ok(frame.payload.to_vec());
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(PeerError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(FrameError::PayloadTooLarge { size, max }) => {
                return Err(PeerError::HandshakeFailed(format!(
                    "handshake payload too large: {size} (max {max})"
                )));
            }
            Err(err) => return Err(PeerError::Frame(err)),
        }
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_peer_id(peer_id: &str) -> Result<()> {
    if peer_id.is_empty() || peer_id.len() > MAX_PEER_ID_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid peer_id length: {}",
            peer_id.len()
        )));
    }
    Ok(())
}

/// Same major, and the client is at least as new as the server's minor.
fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| PeerError::HandshakeFailed(format!("invalid version '{version}': {why}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    if minor.contains('.') {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Cursor, ErrorKind, Read};
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn server_side(
        stream: UnixStream,
        peer: &str,
        config: HandshakeConfig,
    ) -> thread::JoinHandle<Result<HandshakeResult>> {
        let peer = PeerId::from(peer);
        thread::spawn(move || {
            let mut reader = FrameReader::new(stream.try_clone().unwrap());
            let mut writer = FrameWriter::new(stream);
            handshake_server_with_config(&mut reader, &mut writer, &peer, &config)
        })
    }

    fn client_side(stream: UnixStream, config: &HandshakeConfig) -> Result<HandshakeResult> {
        let mut reader = FrameReader::new(stream.try_clone().unwrap());
        let mut writer = FrameWriter::new(stream);
        handshake_client_with_config(&mut reader, &mut writer, config)
    }

    #[test]
    fn successful_handshake_assigns_identity() {
        let (left, right) = UnixStream::pair().unwrap();
        let server = server_side(left, "p1", HandshakeConfig::default());

        let client_result = client_side(right, &HandshakeConfig::default()).unwrap();
        let server_result = server.join().unwrap().unwrap();

        assert_eq!(client_result.peer_id, PeerId::from("p1"));
        assert_eq!(client_result.remote_version, "1.0");
        assert_eq!(server_result.peer_id, PeerId::from("p1"));
        assert_eq!(server_result.remote_version, "1.0");
    }

    #[test]
    fn newer_client_minor_is_accepted() {
        let (left, right) = UnixStream::pair().unwrap();
        let server = server_side(left, "p2", HandshakeConfig::default());

        let cfg = HandshakeConfig {
            protocol_version: "1.3".to_string(),
            ..HandshakeConfig::default()
        };
        let client_result = client_side(right, &cfg).unwrap();
        let server_result = server.join().unwrap().unwrap();

        assert_eq!(client_result.remote_version, "1.0");
        assert_eq!(server_result.remote_version, "1.3");
    }

    #[test]
    fn wrong_protocol_name_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let server = server_side(left, "p3", HandshakeConfig::default());

        let cfg = HandshakeConfig {
            protocol_name: "foobar".to_string(),
            ..HandshakeConfig::default()
        };
        let client_result = client_side(right, &cfg);
        let server_result = server.join().unwrap();

        assert!(matches!(server_result, Err(PeerError::HandshakeFailed(_))));
        assert!(matches!(client_result, Err(PeerError::Disconnected(_))));
    }

    #[test]
    fn major_version_mismatch_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let server = server_side(
            left,
            "p4",
            HandshakeConfig {
                protocol_version: "2.0".to_string(),
                ..HandshakeConfig::default()
            },
        );

        let client_result = client_side(right, &HandshakeConfig::default());

        assert!(matches!(client_result, Err(PeerError::Disconnected(_))));
        assert!(matches!(
            server.join().unwrap(),
            Err(PeerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn invalid_json_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw_writer = FrameWriter::new(left);
        raw_writer.send(CONTROL, b"{not-json").unwrap();

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, &PeerId::from("p5"));

        assert!(matches!(result, Err(PeerError::Json(_))));
    }

    #[test]
    fn rpc_traffic_before_handshake_is_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw_writer = FrameWriter::new(left);
        raw_writer.send("ctxrpc:rpc:game", b"{}").unwrap();

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, &PeerId::from("p6"));

        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn handshake_timeout() {
        let mut reader = FrameReader::new(AlwaysTimedOutReader);
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = HandshakeConfig {
            timeout: Duration::from_millis(25),
            ..HandshakeConfig::default()
        };

        let result = handshake_client_with_config(&mut reader, &mut writer, &cfg);
        assert!(matches!(result, Err(PeerError::Timeout(_))));
    }

    #[test]
    fn rejects_oversized_handshake_payload() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw_writer = FrameWriter::new(left);
        let padded = format!(
            r#"{{"protocol":"ctxrpc","version":"1.0","pad":"{}"}}"#,
            "a".repeat(256)
        );
        raw_writer.send(CONTROL, padded.as_bytes()).unwrap();

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let cfg = HandshakeConfig {
            max_handshake_payload: 64,
            ..HandshakeConfig::default()
        };
        let result =
            handshake_server_with_config(&mut reader, &mut writer, &PeerId::from("p7"), &cfg);

        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn empty_peer_id_is_refused_before_reading() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let result = handshake_server(&mut reader, &mut writer, &PeerId::from(""));

        assert!(matches!(result, Err(PeerError::HandshakeFailed(_))));
    }

    #[test]
    fn uds_integration_handshake_roundtrip() {
        let dir = std::env::temp_dir().join(format!(
            "ctxrpc-peer-handshake-uds-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("test.sock");
        let listener = ctxrpc_transport::UnixDomainSocket::bind(&sock_path).unwrap();

        let server = thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let mut reader = FrameReader::new(stream.try_clone().unwrap());
            let mut writer = FrameWriter::new(stream);
            handshake_server(&mut reader, &mut writer, &PeerId::from("peer-uds")).unwrap()
        });

        let stream = ctxrpc_transport::UnixDomainSocket::connect(&sock_path).unwrap();
        let mut reader = FrameReader::new(stream.try_clone().unwrap());
        let mut writer = FrameWriter::new(stream);
        let client_result = handshake_client(&mut reader, &mut writer).unwrap();
        let server_result = server.join().unwrap();

        assert_eq!(client_result.peer_id.as_str(), "peer-uds");
        assert_eq!(server_result.peer_id.as_str(), "peer-uds");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("1.0").unwrap(), (1, 0));
        assert_eq!(parse_version("12.34").unwrap(), (12, 34));
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.0.0").is_err());
        assert!(parse_version("one.0").is_err());

        assert!(is_version_compatible("1.2", "1.0").unwrap());
        assert!(!is_version_compatible("1.0", "1.2").unwrap());
        assert!(!is_version_compatible("2.0", "1.0").unwrap());
    }

    struct AlwaysTimedOutReader;

    impl Read for AlwaysTimedOutReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }
}
