use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{InboundHook, Transport};

type HookTable = Arc<Mutex<HashMap<String, InboundHook>>>;

/// One end of an in-process link.
///
/// Sends are delivered synchronously: `send` runs the other end's hook for
/// the channel before returning. That makes ordering trivially preserved, but
/// embedders that hand payloads across a non-reentrant boundary can build the
/// pair with [`MemoryLink::pair_unchunked`] so every logical message arrives
/// as one payload.
pub struct MemoryLink {
    local: HookTable,
    remote: HookTable,
    open: Arc<AtomicBool>,
    ordered: bool,
}

impl MemoryLink {
    /// Create both ends of a new link.
    pub fn pair() -> (Self, Self) {
        Self::build(true)
    }

    /// Create a pair whose ends ask the RPC layer not to split payloads.
    pub fn pair_unchunked() -> (Self, Self) {
        Self::build(false)
    }

    fn build(ordered: bool) -> (Self, Self) {
        let left: HookTable = Arc::default();
        let right: HookTable = Arc::default();
        let open = Arc::new(AtomicBool::new(true));

        let a = Self {
            local: left.clone(),
            remote: right.clone(),
            open: open.clone(),
            ordered,
        };
        let b = Self {
            local: right,
            remote: left,
            open,
            ordered,
        };
        (a, b)
    }

    /// Tear the link down. Both ends observe the closure.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("memory link closed");
        }
    }

    /// Channels with a hook registered on this end.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.local).keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl Transport for MemoryLink {
    fn send(&self, channel: &str, payload: &str) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed(format!(
                "memory link closed (channel '{channel}')"
            )));
        }

        // Clone the hook out so it runs without the table lock held; hooks
        // commonly send on the reverse direction of the same link.
        let hook = lock(&self.remote).get(channel).cloned();
        match hook {
            Some(hook) => hook(payload),
            None => debug!(channel, "no receiver registered; payload dropped"),
        }
        Ok(())
    }

    fn on_receive(&self, channel: &str, hook: InboundHook) {
        lock(&self.local).insert(channel.to_string(), hook);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn ordered_delivery(&self) -> bool {
        self.ordered
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("open", &self.is_open())
            .field("ordered", &self.ordered)
            .finish()
    }
}

fn lock(table: &HookTable) -> std::sync::MutexGuard<'_, HashMap<String, InboundHook>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
