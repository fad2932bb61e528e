use std::collections::HashMap;
use std::sync::Arc;

use ctxrpc_transport::Transport;
use tracing::debug;

use crate::env::SurfaceId;
use crate::error::{Result, RpcError};

/// Surfaces attached to a client, and which surface answers each procedure
/// name.
///
/// Claims outlive detachment on purpose: a call routed to a claim whose
/// surface is gone fails with `InvalidSurface` instead of `ProcedureNotFound`.
#[derive(Default)]
pub struct SurfaceRegistry {
    links: HashMap<SurfaceId, Arc<dyn Transport>>,
    claims: HashMap<String, SurfaceId>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a surface link, returning the link it replaced.
    pub fn attach(&mut self, id: SurfaceId, link: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        self.links.insert(id, link)
    }

    pub fn detach(&mut self, id: &SurfaceId) -> Option<Arc<dyn Transport>> {
        self.links.remove(id)
    }

    /// Record that `surface` answers `name`. The latest claim wins.
    pub fn claim(&mut self, name: &str, surface: &SurfaceId) {
        if let Some(previous) = self.claims.insert(name.to_string(), surface.clone()) {
            if &previous != surface {
                debug!(procedure = name, %previous, %surface, "procedure claim moved");
            }
        }
    }

    /// Drop the claim on `name` if `surface` still holds it.
    pub fn release(&mut self, name: &str, surface: &SurfaceId) -> bool {
        if self.claims.get(name) != Some(surface) {
            debug!(procedure = name, %surface, "release from a surface that does not hold the claim");
            return false;
        }
        self.claims.remove(name);
        true
    }

    pub fn claimant(&self, name: &str) -> Option<&SurfaceId> {
        self.claims.get(name)
    }

    /// The open link to `id`.
    pub fn link(&self, id: &SurfaceId) -> Result<Arc<dyn Transport>> {
        match self.links.get(id) {
            Some(link) if link.is_open() => Ok(link.clone()),
            _ => Err(RpcError::InvalidSurface(id.to_string())),
        }
    }

    /// The surface that claimed `name`, with its open link.
    pub fn resolve(&self, name: &str) -> Result<(SurfaceId, Arc<dyn Transport>)> {
        let id = self
            .claims
            .get(name)
            .ok_or_else(|| RpcError::ProcedureNotFound(name.to_string()))?;
        Ok((id.clone(), self.link(id)?))
    }

    /// Every attached surface whose link is still open.
    pub fn open_surfaces(&self) -> Vec<(SurfaceId, Arc<dyn Transport>)> {
        let mut open: Vec<(SurfaceId, Arc<dyn Transport>)> = self
            .links
            .iter()
            .filter(|(_, link)| link.is_open())
            .map(|(id, link)| (id.clone(), link.clone()))
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        open
    }

    pub fn ids(&self) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self.links.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Current claims, sorted by procedure name.
    pub fn claims(&self) -> Vec<(String, SurfaceId)> {
        let mut claims: Vec<(String, SurfaceId)> = self
            .claims
            .iter()
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect();
        claims.sort_unstable();
        claims
    }
}
