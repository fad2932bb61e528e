use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use ctxrpc_transport::Transport;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::codec::{self, NoRefs, RefCodec};
use crate::config::{CallOptions, RpcConfig};
use crate::correlation::{Completion, CorrelationTable};
use crate::dispatcher;
use crate::env::{Endpoint, Env, PeerId, SurfaceId};
use crate::envelope::{CorrelationId, Header};
use crate::error::{Result, RpcError};
use crate::namespace::{Channels, NamespaceSet};
use crate::reassembly::ReassemblyTable;
use crate::registry::{
    fan_out, procedure_fn, CallInfo, EventRegistry, HandlerId, Procedure, ProcedureRegistry,
    ProcedureResult,
};
use crate::relay::{self, EventRequest, RelayRequest};
use crate::router::{self, Route};
use crate::surfaces::SurfaceRegistry;

/// Procedure names with this prefix belong to the engine.
pub const INTERNAL_PREFIX: &str = "__rpc:";

pub(crate) struct Setup {
    pub(crate) namespace: String,
    pub(crate) channels: Channels,
    pub(crate) runtime: Handle,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) procedures: ProcedureRegistry,
    pub(crate) events: EventRegistry,
    pub(crate) surfaces: SurfaceRegistry,
    pub(crate) correlation: CorrelationTable,
    pub(crate) reassembly: ReassemblyTable,
    /// Server link (client context) or client link (surface context).
    pub(crate) upstream: Option<Arc<dyn Transport>>,
    pub(crate) clients: HashMap<PeerId, Arc<dyn Transport>>,
}

impl State {
    /// The link that reaches `target` from a context of kind `env`.
    pub(crate) fn link_for(&self, env: Env, target: &Endpoint) -> Result<Arc<dyn Transport>> {
        match (env, target) {
            (Env::Server, Endpoint::Client(Some(peer))) => self
                .clients
                .get(peer)
                .cloned()
                .ok_or_else(|| RpcError::UnknownPeer(peer.clone())),
            (Env::Client, Endpoint::Server) | (Env::Surface, Endpoint::Client(None)) => self
                .upstream
                .clone()
                .ok_or_else(|| RpcError::NotConnected(target.clone())),
            (Env::Client, Endpoint::Surface(id)) => self.surfaces.link(id),
            _ => Err(RpcError::Unroutable {
                from: env,
                to: target.env(),
            }),
        }
    }

    fn links(&self) -> Vec<(Endpoint, Arc<dyn Transport>)> {
        let mut links: Vec<(Endpoint, Arc<dyn Transport>)> = self
            .clients
            .iter()
            .map(|(peer, link)| (Endpoint::Client(Some(peer.clone())), link.clone()))
            .collect();
        for id in self.surfaces.ids() {
            if let Ok(link) = self.surfaces.link(&id) {
                links.push((Endpoint::Surface(id), link));
            }
        }
        links
    }
}

pub(crate) struct Inner {
    pub(crate) env: Env,
    pub(crate) config: RpcConfig,
    pub(crate) refs: Arc<dyn RefCodec>,
    namespaces: NamespaceSet,
    setup: OnceLock<Setup>,
    state: Mutex<State>,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn setup(&self) -> Result<&Setup> {
        self.setup.get().ok_or(RpcError::NotInitialized)
    }

    /// Encode one logical message and send every envelope on the rpc channel.
    pub(crate) fn send_message(
        &self,
        link: &Arc<dyn Transport>,
        header: &Header,
        payload: Option<&str>,
    ) -> Result<()> {
        let setup = self.setup()?;
        let chunk_size = link.ordered_delivery().then_some(self.config.chunk_size);
        let envelopes = codec::encode(header, payload, chunk_size);
        // The far side drops every part of a message over its limit.
        if envelopes.len() > self.config.max_message_parts as usize {
            return Err(RpcError::MessageTooLarge {
                parts: envelopes.len(),
                max: self.config.max_message_parts,
            });
        }
        for envelope in envelopes {
            link.send(&setup.channels.rpc, &envelope.to_json()?)?;
        }
        Ok(())
    }

    /// Run the local subscribers of `name`.
    pub(crate) fn emit(&self, name: &str, args: &Value, info: &CallInfo) -> usize {
        let subscribers = self.lock().events.subscribers(name);
        if subscribers.is_empty() {
            debug!(event = name, "no subscribers");
            return 0;
        }
        fan_out(name, &subscribers, args, info)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(setup) = self.setup.get() {
            self.namespaces.release(&setup.namespace);
        }
    }
}

/// Who a remote call is addressed to, before routing.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Server,
    Client(Option<PeerId>),
    Surface(SurfaceId),
    /// The surface that claimed the procedure; behind the given player's
    /// client when called from the server.
    Claimant(Option<PeerId>),
}

impl Target {
    fn env(&self) -> Env {
        match self {
            Self::Server => Env::Server,
            Self::Client(_) => Env::Client,
            Self::Surface(_) | Self::Claimant(_) => Env::Surface,
        }
    }
}

/// A request that has been sent.
pub(crate) enum Started {
    Detached,
    Waiting(PendingReply),
}

impl Started {
    pub(crate) async fn finish(self) -> Result<Value> {
        match self {
            Self::Detached => Ok(Value::Null),
            Self::Waiting(reply) => reply.wait().await,
        }
    }
}

/// Waits for one response. Dropping it before the response arrives removes
/// the correlation entry, so timeouts and abandoned calls leave nothing
/// behind.
pub(crate) struct PendingReply {
    inner: Arc<Inner>,
    id: CorrelationId,
    target: Endpoint,
    timeout: Option<Duration>,
    completion: Completion,
    armed: bool,
}

impl PendingReply {
    async fn wait(mut self) -> Result<Value> {
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.completion).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(id = %self.id, peer = %self.target, ?limit, "call timed out");
                    return Err(RpcError::Timeout(limit));
                }
            },
            None => (&mut self.completion).await,
        };
        self.armed = false;
        outcome.unwrap_or_else(|_| Err(RpcError::Disconnected(self.target.clone())))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().correlation.cancel(&self.id);
        }
    }
}

/// Builder for an [`Rpc`] instance.
pub struct RpcBuilder {
    env: Env,
    config: RpcConfig,
    namespaces: Option<NamespaceSet>,
    refs: Option<Arc<dyn RefCodec>>,
}

impl RpcBuilder {
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Claim namespaces from `set` instead of the process-wide set for this
    /// context.
    pub fn namespaces(mut self, set: NamespaceSet) -> Self {
        self.namespaces = Some(set);
        self
    }

    pub fn ref_codec(mut self, refs: impl RefCodec) -> Self {
        self.refs = Some(Arc::new(refs));
        self
    }

    pub fn build(self) -> Rpc {
        let mut config = self.config;
        config.chunk_size = config.chunk_size.max(1);
        let state = State {
            reassembly: ReassemblyTable::with_limits(
                config.max_partial_messages,
                config.partial_message_ttl,
            ),
            ..State::default()
        };
        Rpc {
            inner: Arc::new(Inner {
                env: self.env,
                config,
                refs: self.refs.unwrap_or_else(|| Arc::new(NoRefs)),
                namespaces: self
                    .namespaces
                    .unwrap_or_else(|| NamespaceSet::process(self.env)),
                setup: OnceLock::new(),
                state: Mutex::new(state),
            }),
        }
    }
}

/// One RPC instance in one context.
///
/// Cloning is cheap; clones share the same registries and tables.
#[derive(Clone)]
pub struct Rpc {
    inner: Arc<Inner>,
}

/// Non-owning counterpart of [`Rpc`], for callbacks owned by a link.
#[derive(Clone)]
pub struct WeakRpc {
    inner: Weak<Inner>,
}

impl WeakRpc {
    pub fn upgrade(&self) -> Option<Rpc> {
        self.inner.upgrade().map(Rpc::from_inner)
    }
}

impl Rpc {
    /// An instance with default configuration.
    pub fn new(env: Env) -> Self {
        Self::builder(env).build()
    }

    pub fn builder(env: Env) -> RpcBuilder {
        RpcBuilder {
            env,
            config: RpcConfig::default(),
            namespaces: None,
            refs: None,
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// A handle that does not keep this instance alive.
    pub fn downgrade(&self) -> WeakRpc {
        WeakRpc {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn env(&self) -> Env {
        self.inner.env
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    pub fn namespace(&self) -> Option<&str> {
        self.inner.setup.get().map(|setup| setup.namespace.as_str())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.setup.get().is_some()
    }

    /// Claim `namespace` and start listening on every attached link.
    ///
    /// Must run inside a tokio runtime; procedures invoked by remote peers
    /// are spawned onto it.
    pub fn init(&self, namespace: &str) -> Result<()> {
        if self.is_initialized() {
            return Err(RpcError::AlreadyInitialized);
        }
        if namespace.is_empty() {
            return Err(RpcError::NamespaceRequired);
        }
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        self.inner.namespaces.claim(namespace)?;

        let setup = Setup {
            namespace: namespace.to_string(),
            channels: Channels::for_namespace(namespace),
            runtime,
        };
        if self.inner.setup.set(setup).is_err() {
            self.inner.namespaces.release(namespace);
            return Err(RpcError::AlreadyInitialized);
        }

        relay::install(&self.inner);
        let (links, upstream) = {
            let state = self.inner.lock();
            (state.links(), state.upstream.clone())
        };
        for (endpoint, link) in links {
            self.wire(endpoint, &link);
        }
        if let Some(link) = upstream {
            let endpoint = match self.env() {
                Env::Surface => Endpoint::Client(None),
                _ => Endpoint::Server,
            };
            self.wire(endpoint, &link);
            self.announce_all();
        }

        info!(env = %self.env(), namespace, "rpc initialized");
        Ok(())
    }

    // ---- links ----

    /// Attach the link to one player's client (server context).
    pub fn attach_client(&self, peer: PeerId, link: Arc<dyn Transport>) -> Result<()> {
        self.require(Env::Server, "attach_client")?;
        let replaced = self.inner.lock().clients.insert(peer.clone(), link.clone());
        if replaced.is_some() {
            self.fail_endpoint(&Endpoint::Client(Some(peer.clone())));
            debug!(%peer, "client link replaced");
        }
        self.wire(Endpoint::Client(Some(peer.clone())), &link);
        info!(%peer, transport = link.transport_name(), "client attached");
        Ok(())
    }

    /// Forget a player's client. Calls waiting on it fail with
    /// `Disconnected`.
    pub fn detach_client(&self, peer: &PeerId) -> bool {
        // Dropped outside the lock: a link's close hook may call back in.
        let link = self.inner.lock().clients.remove(peer);
        let removed = link.is_some();
        drop(link);
        if removed {
            self.fail_endpoint(&Endpoint::Client(Some(peer.clone())));
            info!(%peer, "client detached");
        }
        removed
    }

    /// Attach the link to the server (client context).
    pub fn connect_server(&self, link: Arc<dyn Transport>) -> Result<()> {
        self.require(Env::Client, "connect_server")?;
        self.connect_upstream(Endpoint::Server, link);
        Ok(())
    }

    /// Attach the link to the owning client (surface context). Every
    /// procedure registered so far is announced to it.
    pub fn connect_client(&self, link: Arc<dyn Transport>) -> Result<()> {
        self.require(Env::Surface, "connect_client")?;
        self.connect_upstream(Endpoint::Client(None), link);
        self.announce_all();
        Ok(())
    }

    /// Drop the server link (client context) or client link (surface
    /// context).
    pub fn disconnect(&self) -> bool {
        let link = self.inner.lock().upstream.take();
        let removed = link.is_some();
        drop(link);
        if removed {
            let endpoint = match self.env() {
                Env::Surface => Endpoint::Client(None),
                _ => Endpoint::Server,
            };
            self.fail_endpoint(&endpoint);
            info!(peer = %endpoint, "disconnected");
        }
        removed
    }

    /// Attach a surface (client context).
    pub fn attach_surface(&self, id: SurfaceId, link: Arc<dyn Transport>) -> Result<()> {
        self.require(Env::Client, "attach_surface")?;
        let replaced = self.inner.lock().surfaces.attach(id.clone(), link.clone());
        if replaced.is_some() {
            self.fail_endpoint(&Endpoint::Surface(id.clone()));
            debug!(surface = %id, "surface link replaced");
        }
        self.wire(Endpoint::Surface(id.clone()), &link);
        info!(surface = %id, transport = link.transport_name(), "surface attached");
        Ok(())
    }

    /// Tear a surface down. Calls waiting on it fail with `InvalidSurface`;
    /// procedures it claimed now route to `InvalidSurface` too.
    pub fn detach_surface(&self, id: &SurfaceId) -> bool {
        let link = self.inner.lock().surfaces.detach(id);
        let removed = link.is_some();
        drop(link);
        if removed {
            self.fail_endpoint(&Endpoint::Surface(id.clone()));
            info!(surface = %id, "surface detached");
        }
        removed
    }

    fn connect_upstream(&self, endpoint: Endpoint, link: Arc<dyn Transport>) {
        let replaced = self.inner.lock().upstream.replace(link.clone());
        if replaced.is_some() {
            self.fail_endpoint(&endpoint);
        }
        self.wire(endpoint.clone(), &link);
        info!(peer = %endpoint, transport = link.transport_name(), "connected");
    }

    fn fail_endpoint(&self, endpoint: &Endpoint) {
        let (failed, dropped) = {
            let mut state = self.inner.lock();
            let failed = state.correlation.fail_endpoint(endpoint, || match endpoint {
                Endpoint::Surface(id) => RpcError::InvalidSurface(id.to_string()),
                other => RpcError::Disconnected(other.clone()),
            });
            (failed, state.reassembly.drop_endpoint(endpoint))
        };
        if failed > 0 || dropped > 0 {
            debug!(peer = %endpoint, failed, dropped, "endpoint state cleared");
        }
    }

    /// Install inbound hooks on `link`. A no-op before init; `init` wires
    /// every link attached so far.
    fn wire(&self, endpoint: Endpoint, link: &Arc<dyn Transport>) {
        let Ok(setup) = self.inner.setup() else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let from = endpoint.clone();
        link.on_receive(
            &setup.channels.rpc,
            Arc::new(move |payload: &str| {
                if let Some(inner) = weak.upgrade() {
                    dispatcher::handle_inbound(&inner, &from, payload);
                }
            }),
        );

        if let (Env::Client, Endpoint::Surface(id)) = (self.env(), &endpoint) {
            let weak = Arc::downgrade(&self.inner);
            let surface = id.clone();
            link.on_receive(
                &setup.channels.claim,
                Arc::new(move |name: &str| {
                    if name.is_empty() || name.starts_with(INTERNAL_PREFIX) {
                        warn!(%surface, procedure = name, "ignoring claim on a reserved name");
                        return;
                    }
                    if let Some(inner) = weak.upgrade() {
                        inner.lock().surfaces.claim(name, &surface);
                    }
                }),
            );

            let weak = Arc::downgrade(&self.inner);
            let surface = id.clone();
            link.on_receive(
                &setup.channels.release,
                Arc::new(move |name: &str| {
                    if let Some(inner) = weak.upgrade() {
                        inner.lock().surfaces.release(name, &surface);
                    }
                }),
            );

            // Claims the surface sent before these hooks existed were dropped.
            if let Err(err) = link.send(&setup.channels.announce, "") {
                debug!(surface = %id, error = %err, "could not request procedure claims");
            }
        }

        if let (Env::Surface, Endpoint::Client(None)) = (self.env(), &endpoint) {
            let weak = Arc::downgrade(&self.inner);
            link.on_receive(
                &setup.channels.announce,
                Arc::new(move |_: &str| {
                    if let Some(inner) = weak.upgrade() {
                        Rpc::from_inner(inner).announce_all();
                    }
                }),
            );
        }
    }

    // ---- registries ----

    /// Register an async procedure under `name`, replacing any previous one.
    ///
    /// In a surface, the name is also claimed on the owning client.
    pub fn register<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value, CallInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        self.register_procedure(name, procedure_fn(handler))
    }

    pub fn register_procedure(&self, name: &str, handler: Arc<dyn Procedure>) -> Result<()> {
        check_name(name)?;
        if name.starts_with(INTERNAL_PREFIX) {
            return Err(RpcError::InvalidArgument(format!(
                "procedure names starting with '{INTERNAL_PREFIX}' are reserved"
            )));
        }
        if self.inner.lock().procedures.register(name, handler) {
            debug!(procedure = name, "procedure replaced");
        }
        if self.env() == Env::Surface {
            self.announce(name, true);
        }
        Ok(())
    }

    /// Remove a procedure. Returns false if none was registered.
    pub fn unregister(&self, name: &str) -> bool {
        if name.starts_with(INTERNAL_PREFIX) {
            return false;
        }
        let removed = self.inner.lock().procedures.unregister(name);
        if removed && self.env() == Env::Surface {
            self.announce(name, false);
        }
        removed
    }

    /// Registered procedure names, engine procedures excluded.
    pub fn procedures(&self) -> Vec<String> {
        let mut names = self.inner.lock().procedures.names();
        names.retain(|name| !name.starts_with(INTERNAL_PREFIX));
        names
    }

    /// Subscribe to an event.
    pub fn on<F>(&self, name: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value, &CallInfo) + Send + Sync + 'static,
    {
        self.inner.lock().events.on(name, Arc::new(handler))
    }

    /// Unsubscribe. Returns false if `id` was not subscribed to `name`.
    pub fn off(&self, name: &str, id: HandlerId) -> bool {
        self.inner.lock().events.off(name, id)
    }

    /// Surface procedure claims known to this client.
    pub fn claims(&self) -> Vec<(String, SurfaceId)> {
        self.inner.lock().surfaces.claims()
    }

    pub fn clients(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.lock().clients.keys().cloned().collect();
        peers.sort_unstable();
        peers
    }

    pub fn surfaces(&self) -> Vec<SurfaceId> {
        self.inner.lock().surfaces.ids()
    }

    /// Calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.lock().correlation.len()
    }

    /// Inbound messages still missing parts.
    pub fn partial_messages(&self) -> usize {
        self.inner.lock().reassembly.len()
    }

    fn announce(&self, name: &str, claim: bool) {
        let Ok(setup) = self.inner.setup() else {
            return;
        };
        let Some(link) = self.inner.lock().upstream.clone() else {
            return;
        };
        let channel = if claim {
            &setup.channels.claim
        } else {
            &setup.channels.release
        };
        if let Err(err) = link.send(channel, name) {
            warn!(procedure = name, error = %err, "failed to announce procedure to client");
        }
    }

    fn announce_all(&self) {
        if self.env() != Env::Surface {
            return;
        }
        for name in self.procedures() {
            self.announce(&name, true);
        }
    }

    // ---- calls ----

    /// Call a procedure registered in this context.
    pub async fn call(&self, name: &str, args: Option<Value>, opts: CallOptions) -> Result<Value> {
        let handler = self
            .inner
            .lock()
            .procedures
            .get(name)
            .ok_or_else(|| RpcError::ProcedureNotFound(name.to_string()))?;
        let work = handler.call(args.unwrap_or(Value::Null), CallInfo::local(self.env()));

        if opts.suppress_response {
            let _detached = tokio::spawn(work);
            return Ok(Value::Null);
        }
        let outcome = match opts.timeout_or(self.inner.config.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| RpcError::Timeout(limit))?,
            None => work.await,
        };
        outcome.map_err(RpcError::from)
    }

    /// Call a procedure on the server. From a surface, the call is relayed
    /// by the owning client.
    pub async fn call_server(
        &self,
        name: &str,
        args: Option<Value>,
        opts: CallOptions,
    ) -> Result<Value> {
        check_name(name)?;
        self.start("call_server", Target::Server, name, args, opts, None)?
            .finish()
            .await
    }

    /// Call a procedure on a client: the given player's from the server, the
    /// owning client (`None`) from a surface.
    pub async fn call_client(
        &self,
        player: Option<&PeerId>,
        name: &str,
        args: Option<Value>,
        opts: CallOptions,
    ) -> Result<Value> {
        check_name(name)?;
        let target = self.client_target("call_client", player)?;
        self.start("call_client", target, name, args, opts, None)?
            .finish()
            .await
    }

    /// Call a procedure on one specific surface (client context).
    pub async fn call_surface(
        &self,
        surface: &SurfaceId,
        name: &str,
        args: Option<Value>,
        opts: CallOptions,
    ) -> Result<Value> {
        self.require(Env::Client, "call_surface")?;
        check_name(name)?;
        let target = Target::Surface(surface.clone());
        self.start("call_surface", target, name, args, opts, None)?
            .finish()
            .await
    }

    /// Call whichever surface claimed `name`. From the server, `player`
    /// picks the client whose surfaces are searched.
    pub async fn call_surfaces(
        &self,
        player: Option<&PeerId>,
        name: &str,
        args: Option<Value>,
        opts: CallOptions,
    ) -> Result<Value> {
        check_name(name)?;
        let target = self.claimant_target("call_surfaces", player)?;
        self.start("call_surfaces", target, name, args, opts, None)?
            .finish()
            .await
    }

    // ---- events ----

    /// Run this context's subscribers of `name` synchronously.
    pub fn trigger(&self, name: &str, args: Option<Value>) {
        let info = CallInfo::local(self.env());
        self.inner.emit(name, &args.unwrap_or(Value::Null), &info);
    }

    pub fn trigger_server(&self, name: &str, args: Option<Value>) -> Result<()> {
        self.fire("trigger_server", Target::Server, name, args)
    }

    pub fn trigger_client(&self, player: Option<&PeerId>, name: &str, args: Option<Value>) -> Result<()> {
        let target = self.client_target("trigger_client", player)?;
        self.fire("trigger_client", target, name, args)
    }

    /// Trigger an event on one surface (client context).
    pub fn trigger_surface(&self, surface: &SurfaceId, name: &str, args: Option<Value>) -> Result<()> {
        self.require(Env::Client, "trigger_surface")?;
        self.fire("trigger_surface", Target::Surface(surface.clone()), name, args)
    }

    /// Trigger an event on every open surface of a client. From the server,
    /// `player` picks the client.
    pub fn trigger_surfaces(
        &self,
        player: Option<&PeerId>,
        name: &str,
        args: Option<Value>,
    ) -> Result<()> {
        check_name(name)?;
        let verb = "trigger_surfaces";
        match (self.env(), player) {
            (Env::Client, None) => self.broadcast_surfaces(name, args, None).map(|_| ()),
            (Env::Server, Some(peer)) => {
                self.relay_broadcast(Endpoint::Client(Some(peer.clone())), name, args)
            }
            (Env::Surface, None) => self.relay_broadcast(Endpoint::Client(None), name, args),
            (Env::Server, None) => Err(missing_player(verb)),
            (_, Some(_)) => Err(unexpected_player(verb)),
        }
    }

    fn fire(&self, verb: &'static str, target: Target, name: &str, args: Option<Value>) -> Result<()> {
        check_name(name)?;
        let event = serde_json::to_value(EventRequest {
            name: name.to_string(),
            args,
        })?;
        self.start(
            verb,
            target,
            relay::TRIGGER_EVENT,
            Some(event),
            CallOptions::no_response(),
            None,
        )
        .map(|_| ())
    }

    /// Send an event to every open surface (client context). Returns how
    /// many surfaces it was handed to.
    pub(crate) fn broadcast_surfaces(
        &self,
        name: &str,
        args: Option<Value>,
        fenv: Option<Env>,
    ) -> Result<usize> {
        self.inner.setup()?;
        let event = serde_json::to_value(EventRequest {
            name: name.to_string(),
            args,
        })?;
        let surfaces = self.inner.lock().surfaces.open_surfaces();
        let mut reached = 0;
        for (id, _) in surfaces {
            let sent = self.send_request(
                Endpoint::Surface(id.clone()),
                relay::TRIGGER_EVENT,
                Some(event.clone()),
                CallOptions::no_response(),
                fenv,
            );
            match sent {
                Ok(_) => reached += 1,
                Err(err) => warn!(surface = %id, event = name, error = %err, "event not delivered"),
            }
        }
        Ok(reached)
    }

    fn relay_broadcast(&self, client: Endpoint, name: &str, args: Option<Value>) -> Result<()> {
        let event = serde_json::to_value(EventRequest {
            name: name.to_string(),
            args,
        })?;
        self.send_request(
            client,
            relay::TRIGGER_SURFACES,
            Some(event),
            CallOptions::no_response(),
            None,
        )
        .map(|_| ())
    }

    // ---- routing ----

    fn require(&self, env: Env, verb: &'static str) -> Result<()> {
        if self.env() != env {
            return Err(RpcError::WrongContext {
                verb,
                env: self.env(),
            });
        }
        Ok(())
    }

    fn client_target(&self, verb: &'static str, player: Option<&PeerId>) -> Result<Target> {
        match (self.env(), player) {
            (Env::Server, Some(peer)) => Ok(Target::Client(Some(peer.clone()))),
            (Env::Server, None) => Err(missing_player(verb)),
            (Env::Surface, None) => Ok(Target::Client(None)),
            (Env::Surface, Some(_)) => Err(unexpected_player(verb)),
            (Env::Client, _) => Err(RpcError::WrongContext {
                verb,
                env: Env::Client,
            }),
        }
    }

    fn claimant_target(&self, verb: &'static str, player: Option<&PeerId>) -> Result<Target> {
        match (self.env(), player) {
            (Env::Server, Some(peer)) => Ok(Target::Claimant(Some(peer.clone()))),
            (Env::Server, None) => Err(missing_player(verb)),
            (_, None) => Ok(Target::Claimant(None)),
            (_, Some(_)) => Err(unexpected_player(verb)),
        }
    }

    /// Route and send a request.
    pub(crate) fn start(
        &self,
        verb: &'static str,
        target: Target,
        name: &str,
        args: Option<Value>,
        opts: CallOptions,
        fenv: Option<Env>,
    ) -> Result<Started> {
        let env = self.env();
        let route =
            router::route(env, target.env()).map_err(|_| RpcError::WrongContext { verb, env })?;

        match route {
            Route::Direct => {
                let endpoint = match target {
                    Target::Server => Endpoint::Server,
                    Target::Client(peer) => Endpoint::Client(peer),
                    Target::Surface(id) => Endpoint::Surface(id),
                    Target::Claimant(_) => {
                        let (id, _) = self.inner.lock().surfaces.resolve(name)?;
                        Endpoint::Surface(id)
                    }
                };
                self.send_request(endpoint, name, args, opts, fenv)
            }
            Route::ViaClient => {
                let (relay_name, client) = match (env, target) {
                    (Env::Server, Target::Claimant(Some(peer))) => {
                        (relay::CALL_SURFACES, Endpoint::Client(Some(peer)))
                    }
                    (Env::Surface, Target::Server) => (relay::CALL_SERVER, Endpoint::Client(None)),
                    (Env::Surface, Target::Claimant(None)) => {
                        (relay::CALL_SURFACES, Endpoint::Client(None))
                    }
                    _ => return Err(RpcError::WrongContext { verb, env }),
                };
                let timeout = opts.timeout_or(self.inner.config.default_timeout);
                let hop = RelayRequest {
                    name: name.to_string(),
                    args,
                    noret: opts.suppress_response,
                    timeout_ms: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
                };
                debug!(procedure = name, via = %client, relay = relay_name, "relaying call");
                self.send_request(client, relay_name, Some(serde_json::to_value(hop)?), opts, None)
            }
        }
    }

    fn send_request(
        &self,
        target: Endpoint,
        name: &str,
        args: Option<Value>,
        opts: CallOptions,
        fenv: Option<Env>,
    ) -> Result<Started> {
        self.inner.setup()?;
        let link = self.inner.lock().link_for(self.env(), &target)?;
        if !link.is_open() {
            return Err(match target {
                Endpoint::Surface(id) => RpcError::InvalidSurface(id.to_string()),
                other => RpcError::NotConnected(other),
            });
        }
        let payload = match &args {
            Some(value) => Some(codec::serialize_args(value, &*self.inner.refs)?),
            None => None,
        };

        let (id, completion) = {
            let mut state = self.inner.lock();
            let id = state.correlation.new_id();
            let completion = (!opts.suppress_response)
                .then(|| state.correlation.insert(id.clone(), target.clone(), name));
            (id, completion)
        };

        let mut header = Header::request(id.clone(), name, self.env());
        header.fenv = fenv;
        header.noret = opts.suppress_response;
        if let Err(err) = self.inner.send_message(&link, &header, payload.as_deref()) {
            if completion.is_some() {
                self.inner.lock().correlation.cancel(&id);
            }
            warn!(%id, procedure = name, peer = %target, error = %err, "failed to send request");
            return Err(err);
        }
        debug!(%id, procedure = name, peer = %target, noret = opts.suppress_response, "request sent");

        Ok(match completion {
            None => Started::Detached,
            Some(completion) => Started::Waiting(PendingReply {
                inner: self.inner.clone(),
                id,
                target,
                timeout: opts.timeout_or(self.inner.config.default_timeout),
                completion,
                armed: true,
            }),
        })
    }
}

impl fmt::Debug for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("env", &self.env())
            .field("namespace", &self.namespace())
            .finish()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RpcError::InvalidArgument("name must not be empty".to_string()));
    }
    Ok(())
}

fn missing_player(verb: &str) -> RpcError {
    RpcError::InvalidArgument(format!("{verb} from the server needs a player id"))
}

fn unexpected_player(verb: &str) -> RpcError {
    RpcError::InvalidArgument(format!("{verb} takes a player id only on the server"))
}
