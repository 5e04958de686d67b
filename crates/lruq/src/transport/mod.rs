//! A small multipart-message transport with router and request sockets.
//!
//! Sockets are created from a [`Context`], which owns the in-process endpoint
//! registry and the shutdown signal. Interrupting the context makes every
//! blocked or future operation on its sockets return
//! [`Error::Interrupted`](crate::Error::Interrupted).

mod codec;
mod endpoint;
mod req;
mod router;
mod stream;

pub use codec::*;
pub use endpoint::*;
pub use req::*;
pub use router::*;

use crate::{Error, Message, Result};
use core::fmt;
use futures::Stream;
use parking_lot::Mutex;
use std::{collections::HashMap, io, sync::Arc};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::sync::CancellationToken;

/// A socket the dispatcher can read messages from and write messages to.
///
/// Reads are a [`Stream`] so several channels can be polled together. Writes
/// never block: the message is queued for delivery or dropped.
pub trait Channel: Stream<Item = Result<Message>> + Send + Unpin {
    /// Queues `msg` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] once the owning context is shutting
    /// down, or a routing error if `msg` cannot be addressed.
    fn send(&mut self, msg: Message) -> Result<()>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send(&mut self, msg: Message) -> Result<()> {
        (**self).send(msg)
    }
}

struct Inner {
    shutdown: CancellationToken,
    inproc: Mutex<HashMap<String, Attacher>>,
    max_frame_len: usize,
}

/// Shared state for a group of sockets.
///
/// Cloning is cheap and every clone refers to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a context whose stream connections reject frames larger than
    /// `max_frame_len` bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                shutdown: CancellationToken::new(),
                inproc: Mutex::new(HashMap::new()),
                max_frame_len,
            }),
        }
    }

    /// Interrupts every socket of this context.
    ///
    /// Pending and subsequent reads return
    /// [`Error::Interrupted`](crate::Error::Interrupted). Idempotent.
    pub fn interrupt(&self) {
        if !self.inner.shutdown.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::info!("Interrupting transport context");
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Binds a [`RouterSocket`] at `endpoint`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if `endpoint` does not parse.
    /// - [`Error::AddressInUse`] if the address is taken.
    /// - [`Error::Interrupted`] if the context is already interrupted.
    pub async fn bind(&self, endpoint: &str) -> Result<RouterSocket> {
        if self.is_interrupted() {
            return Err(Error::Interrupted);
        }
        let endpoint: Endpoint = endpoint.parse()?;
        let (mut socket, attacher) =
            RouterSocket::new(endpoint.clone(), self.inner.shutdown.clone());

        match &endpoint {
            Endpoint::Inproc(name) => {
                let mut registry = self.inner.inproc.lock();
                if registry
                    .get(name)
                    .is_some_and(|bound| !bound.closed().is_cancelled())
                {
                    return Err(Error::AddressInUse {
                        endpoint: endpoint.to_string(),
                    });
                }
                registry.insert(name.clone(), attacher);
            }
            Endpoint::Tcp(addr) => {
                let bound = stream::listen_tcp(addr, attacher, self.inner.max_frame_len)
                    .await
                    .map_err(|e| in_use(e, &endpoint))?;
                socket.set_endpoint(bound);
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                stream::listen_ipc(path, attacher, self.inner.max_frame_len)
                    .map_err(|e| in_use(e, &endpoint))?;
            }
            #[cfg(not(unix))]
            Endpoint::Ipc(_) => {
                return Err(Error::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: "ipc is only supported on unix",
                });
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Bound router socket at {}", socket.endpoint());

        Ok(socket)
    }

    /// Connects a [`ReqSocket`] to the router bound at `endpoint`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if `endpoint` does not parse.
    /// - [`Error::ConnectionRefused`] if nothing is bound there.
    /// - [`Error::Interrupted`] if the context is already interrupted.
    pub async fn connect(&self, endpoint: &str) -> Result<ReqSocket> {
        if self.is_interrupted() {
            return Err(Error::Interrupted);
        }
        let endpoint: Endpoint = endpoint.parse()?;
        let shutdown = self.inner.shutdown.clone();

        match &endpoint {
            Endpoint::Inproc(name) => {
                let registry = self.inner.inproc.lock();
                let attacher = registry
                    .get(name)
                    .filter(|bound| !bound.closed().is_cancelled())
                    .ok_or_else(|| Error::ConnectionRefused {
                        endpoint: endpoint.to_string(),
                    })?;
                let (to_router, to_router_rx) = mpsc::unbounded_channel();
                let from_router = attacher.attach(to_router_rx);
                Ok(ReqSocket::new(to_router, from_router, shutdown, None))
            }
            Endpoint::Tcp(addr) => {
                let io = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| refused(e, &endpoint))?;
                io.set_nodelay(true)?;
                Ok(stream::connect(io, shutdown, self.inner.max_frame_len))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let io = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| refused(e, &endpoint))?;
                Ok(stream::connect(io, shutdown, self.inner.max_frame_len))
            }
            #[cfg(not(unix))]
            Endpoint::Ipc(_) => Err(Error::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "ipc is only supported on unix",
            }),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("interrupted", &self.is_interrupted())
            .field("max_frame_len", &self.inner.max_frame_len)
            .finish_non_exhaustive()
    }
}

fn in_use(err: Error, endpoint: &Endpoint) -> Error {
    match err {
        Error::Io(e) if e.kind() == io::ErrorKind::AddrInUse => Error::AddressInUse {
            endpoint: endpoint.to_string(),
        },
        other => other,
    }
}

fn refused(err: io::Error, endpoint: &Endpoint) -> Error {
    match err.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => Error::ConnectionRefused {
            endpoint: endpoint.to_string(),
        },
        _ => Error::Io(err),
    }
}
