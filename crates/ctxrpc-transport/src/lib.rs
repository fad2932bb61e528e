//! Transport capability boundary for ctxrpc.
//!
//! The RPC core never touches sockets or process plumbing directly. It asks
//! each context pair for a [`Transport`]: a way to send a string payload on a
//! named channel to one implicit recipient, and a way to hear payloads coming
//! back on a named channel.
//!
//! Two implementations live here:
//! - [`MemoryLink`]: an in-process pair, used for embedded surfaces and tests
//! - [`UnixDomainSocket`] and [`IpcStream`]: the byte stream beneath
//!   `ctxrpc-frame`'s framed link (Linux/macOS)

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryLink;
pub use traits::{InboundHook, Transport};

#[cfg(unix)]
pub use stream::{IpcStream, PeerCredentials};
#[cfg(unix)]
pub use uds::UnixDomainSocket;
