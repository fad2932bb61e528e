use std::sync::Arc;

use crate::error::Result;

/// Callback invoked with each payload that arrives on a registered channel.
pub type InboundHook = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// One direction-agnostic link between two contexts.
///
/// A transport is instantiated per context pair (server ↔ one client,
/// client ↔ one surface) and always addresses an implicit recipient: the
/// context on the other end of this link. Delivery is fire-and-forget; the
/// RPC layer above provides correlation and timeouts.
pub trait Transport: Send + Sync + 'static {
    /// Send `payload` on `channel` to the other end of the link.
    fn send(&self, channel: &str, payload: &str) -> Result<()>;

    /// Register `hook` for payloads arriving on `channel`.
    ///
    /// Registering a second hook for the same channel replaces the first.
    fn on_receive(&self, channel: &str, hook: InboundHook);

    /// Whether the link can still carry messages.
    ///
    /// Once this returns `false` it never returns `true` again.
    fn is_open(&self) -> bool {
        true
    }

    /// Whether several sends to the same channel are delivered in send order.
    ///
    /// Links that cannot promise this receive every payload as a single
    /// message instead of a chunk sequence.
    fn ordered_delivery(&self) -> bool {
        true
    }

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
