use std::time::Duration;

/// Maximum characters of serialized arguments per envelope.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Upper bound on `total` accepted from an inbound envelope.
pub const DEFAULT_MAX_MESSAGE_PARTS: u32 = 4096;

/// Partial messages held per sender before the oldest is evicted.
pub const DEFAULT_MAX_PARTIAL_MESSAGES: usize = 64;

/// How long a partial message may wait for its remaining parts.
pub const DEFAULT_PARTIAL_MESSAGE_TTL: Duration = Duration::from_secs(30);

/// Per-instance engine configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Characters of serialized arguments per envelope. Default: 10 000.
    pub chunk_size: usize,
    /// Largest part count accepted from a peer. Default: 4096.
    pub max_message_parts: u32,
    /// Timeout applied to calls that do not set one. Default: none.
    pub default_timeout: Option<Duration>,
    /// Partial messages held per sender. Default: 64.
    pub max_partial_messages: usize,
    /// Age at which an incomplete message is discarded. Default: 30s.
    pub partial_message_ttl: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_parts: DEFAULT_MAX_MESSAGE_PARTS,
            default_timeout: None,
            max_partial_messages: DEFAULT_MAX_PARTIAL_MESSAGES,
            partial_message_ttl: DEFAULT_PARTIAL_MESSAGE_TTL,
        }
    }
}

/// Options for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Fail with `Timeout` if no response arrives in time.
    pub timeout: Option<Duration>,
    /// Do not wait for a response; the call resolves immediately with null.
    pub suppress_response: bool,
}

impl CallOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn no_response() -> Self {
        Self {
            suppress_response: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_no_response(mut self) -> Self {
        self.suppress_response = true;
        self
    }

    pub(crate) fn timeout_or(&self, fallback: Option<Duration>) -> Option<Duration> {
        self.timeout.or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.chunk_size, 10_000);
        assert_eq!(config.max_message_parts, 4096);
        assert!(config.default_timeout.is_none());
        assert_eq!(config.max_partial_messages, 64);
        assert_eq!(config.partial_message_ttl, Duration::from_secs(30));
        assert_eq!(CallOptions::default().timeout, None);
        assert!(!CallOptions::default().suppress_response);
    }

    #[test]
    fn explicit_timeout_wins_over_fallback() {
        let fallback = Some(Duration::from_secs(9));
        let opts = CallOptions::no_response().with_timeout(Duration::from_millis(5));
        assert!(opts.suppress_response);
        assert_eq!(opts.timeout_or(fallback), Some(Duration::from_millis(5)));
        assert_eq!(CallOptions::default().timeout_or(fallback), fallback);
    }
}
