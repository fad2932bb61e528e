//! Named-channel message framing for ctxrpc.
//!
//! Every message on a stream is framed with:
//! - A 2-byte magic number ("CR") for stream synchronization
//! - A 2-byte little-endian channel-name length
//! - A 4-byte little-endian payload length
//! - The channel name, then the payload
//!
//! [`FramedLink`] turns a connected stream into a `ctxrpc_transport::Transport`
//! so a server process and a client process can exchange RPC envelopes.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(unix)]
pub mod link;

pub use channel::{is_reserved, validate_channel_name, CONTROL, MAX_CHANNEL_NAME_LEN};
pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(unix)]
pub use link::FramedLink;
