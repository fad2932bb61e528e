use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use ctxrpc_transport::{InboundHook, IpcStream, Transport, TransportError};
use tracing::{debug, warn};

use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

type HookTable = HashMap<String, InboundHook>;
type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// State shared between the link and its reader thread.
struct Shared {
    label: String,
    hooks: Mutex<HookTable>,
    open: AtomicBool,
    on_close: Mutex<Vec<CloseHook>>,
}

impl Shared {
    fn mark_closed(&self, reason: &str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!(link = %self.label, reason, "framed link closed");
        let hooks = std::mem::take(&mut *lock(&self.on_close));
        for hook in hooks {
            hook();
        }
    }
}

/// A [`Transport`] over a framed byte stream.
///
/// Outbound payloads are written as frames on the caller's thread. Inbound
/// frames are read by a dedicated thread and handed to the hook registered
/// for their channel, in stream order. Frames that arrive before a hook
/// exists for their channel are dropped, so register hooks between
/// [`FramedLink::new`] and [`FramedLink::start`].
pub struct FramedLink {
    shared: Arc<Shared>,
    writer: Mutex<FrameWriter<IpcStream>>,
    stream: IpcStream,
    idle: Mutex<Option<FrameReader<IpcStream>>>,
}

impl FramedLink {
    /// Wrap an already-handshaken reader/writer pair without reading yet.
    ///
    /// `label` identifies the remote side in logs (typically its peer id).
    pub fn new(
        label: impl Into<String>,
        mut reader: FrameReader<IpcStream>,
        writer: FrameWriter<IpcStream>,
    ) -> Result<Arc<Self>> {
        // The reader thread blocks until data or EOF; handshake-era timeouts
        // would only make it spin.
        reader.set_read_timeout(None)?;
        let stream = writer
            .get_ref()
            .try_clone()
            .map_err(crate::reader::transport_to_frame_error)?;

        Ok(Arc::new(Self {
            shared: Arc::new(Shared {
                label: label.into(),
                hooks: Mutex::new(HashMap::new()),
                open: AtomicBool::new(true),
                on_close: Mutex::new(Vec::new()),
            }),
            writer: Mutex::new(writer),
            stream,
            idle: Mutex::new(Some(reader)),
        }))
    }

    /// Start the reader thread. Later calls do nothing.
    pub fn start(&self) -> Result<()> {
        let Some(reader) = lock(&self.idle).take() else {
            return Ok(());
        };
        let pump = self.shared.clone();
        thread::Builder::new()
            .name(format!("ctxrpc-link-{}", self.shared.label))
            .spawn(move || pump_frames(pump, reader))
            .map_err(FrameError::Io)?;
        Ok(())
    }

    /// [`FramedLink::new`] followed by [`FramedLink::start`].
    pub fn spawn(
        label: impl Into<String>,
        reader: FrameReader<IpcStream>,
        writer: FrameWriter<IpcStream>,
    ) -> Result<Arc<Self>> {
        let link = Self::new(label, reader, writer)?;
        link.start()?;
        Ok(link)
    }

    /// Register a callback to run once when the link closes for any reason.
    ///
    /// Runs immediately if the link is already closed.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        if !self.is_open() {
            hook();
            return;
        }
        lock(&self.shared.on_close).push(Box::new(hook));
    }

    /// Close the link. The reader thread exits and close hooks run.
    pub fn close(&self) {
        let _ = self.stream.shutdown();
        self.shared.mark_closed("closed locally");
    }

    /// Label of the remote side.
    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl Transport for FramedLink {
    fn send(&self, channel: &str, payload: &str) -> ctxrpc_transport::Result<()> {
        if !self.is_open() {
            return Err(TransportError::Closed(format!(
                "framed link to {} is closed",
                self.shared.label
            )));
        }

        let result = lock(&self.writer).send(channel, payload.as_bytes());
        result.map_err(|err| {
            if matches!(err, FrameError::ConnectionClosed | FrameError::Io(_)) {
                self.shared.mark_closed("write failed");
            }
            TransportError::SendFailed {
                channel: channel.to_string(),
                message: err.to_string(),
            }
        })
    }

    fn on_receive(&self, channel: &str, hook: InboundHook) {
        lock(&self.shared.hooks).insert(channel.to_string(), hook);
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn transport_name(&self) -> &'static str {
        "framed-unix-socket"
    }
}

impl Drop for FramedLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FramedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedLink")
            .field("label", &self.shared.label)
            .field("open", &self.is_open())
            .finish()
    }
}

fn pump_frames(shared: Arc<Shared>, mut reader: FrameReader<IpcStream>) {
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                shared.mark_closed("peer closed the stream");
                return;
            }
            Err(err) => {
                if shared.open.load(Ordering::SeqCst) {
                    warn!(link = %shared.label, error = %err, "framed link read failed");
                }
                shared.mark_closed("read failed");
                return;
            }
        };

        let payload = match frame.payload_str() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(link = %shared.label, error = %err, "dropping frame");
                continue;
            }
        };

        let hook = lock(&shared.hooks).get(&frame.channel).cloned();
        match hook {
            Some(hook) => hook(payload),
            None => debug!(
                link = %shared.label,
                channel = %frame.channel,
                "no receiver registered; frame dropped"
            ),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
