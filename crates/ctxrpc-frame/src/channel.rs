//! Channel naming rules.
//!
//! Frames are routed by channel *name*. Names beginning with `ctxrpc:` are
//! reserved for the library: the handshake runs on [`CONTROL`] and every RPC
//! instance derives its own channels from its namespace.

use crate::error::{FrameError, Result};

/// Connection management (handshake).
pub const CONTROL: &str = "ctxrpc:control";

/// Prefix of every library-owned channel.
pub const RESERVED_PREFIX: &str = "ctxrpc:";

/// Longest channel name a frame header can carry.
pub const MAX_CHANNEL_NAME_LEN: usize = 255;

/// Returns true if the channel name is library-owned.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Check that `name` can be carried in a frame header.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FrameError::InvalidChannelName("empty".to_string()));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(FrameError::ChannelNameTooLong {
            len: name.len(),
            max: MAX_CHANNEL_NAME_LEN,
        });
    }
    Ok(())
}
