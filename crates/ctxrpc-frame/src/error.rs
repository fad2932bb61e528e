/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4352 \"CR\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The channel name does not fit the header's length field.
    #[error("channel name too long ({len} bytes, max {max})")]
    ChannelNameTooLong { len: usize, max: usize },

    /// The channel name is empty or not UTF-8.
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    /// The payload is not UTF-8 (links carry string payloads only).
    #[error("payload on channel '{0}' is not valid UTF-8")]
    InvalidPayload(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
