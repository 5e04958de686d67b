use super::{Channel, Endpoint};
use crate::{Error, Message, Result};
use bytes::{BufMut, Bytes, BytesMut};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use portable_atomic::{AtomicU32, Ordering};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};

type PeerTable = Arc<Mutex<HashMap<Bytes, mpsc::UnboundedSender<Message>>>>;

/// A bound socket that addresses its peers by identity.
///
/// Every message received is prefixed with the sending peer's identity frame.
/// Every message sent is routed to the peer named by its first frame, which is
/// removed; messages for unknown peers are dropped without error.
///
/// Identities are five bytes, `0x00` followed by a big-endian counter, and are
/// never reused by the same socket.
pub struct RouterSocket {
    endpoint: Endpoint,
    inbound: UnboundedReceiverStream<Message>,
    peers: PeerTable,
    shutdown: CancellationToken,
    interrupted: Pin<Box<WaitForCancellationFutureOwned>>,
    // Stops the accept loop and peer tasks when the socket goes away.
    _closed: DropGuard,
}

impl RouterSocket {
    /// Creates a socket and the [`Attacher`] that feeds it peers.
    pub(crate) fn new(endpoint: Endpoint, shutdown: CancellationToken) -> (Self, Attacher) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peers = PeerTable::default();
        let closed = shutdown.child_token();

        let attacher = Attacher {
            inbound: inbound_tx,
            peers: peers.clone(),
            next_id: Arc::new(AtomicU32::new(1)),
            closed: closed.clone(),
        };
        let socket = Self {
            endpoint,
            inbound: UnboundedReceiverStream::new(inbound_rx),
            peers,
            interrupted: Box::pin(shutdown.clone().cancelled_owned()),
            shutdown,
            _closed: closed.drop_guard(),
        };
        (socket, attacher)
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    /// The endpoint this socket is bound to, with any ephemeral TCP port
    /// resolved.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

impl Stream for RouterSocket {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.shutdown.is_cancelled() || this.interrupted.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Some(Err(Error::Interrupted)));
        }
        this.inbound
            .poll_next_unpin(cx)
            .map(|received| received.map(Ok))
    }
}

impl Channel for RouterSocket {
    fn send(&mut self, mut msg: Message) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Interrupted);
        }
        let identity = msg
            .pop_front()
            .filter(|frame| !frame.is_empty())
            .ok_or(Error::MalformedEnvelope {
                reason: "no routing identity",
            })?;

        match self.peers.lock().get(&identity) {
            Some(peer) => {
                if peer.send(msg).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(
                        peer = %identity.escape_ascii(),
                        "Peer went away, dropping message"
                    );
                }
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::trace!(
                    peer = %identity.escape_ascii(),
                    "Unroutable message dropped"
                );
            }
        }
        Ok(())
    }
}

/// Connects new peers to a [`RouterSocket`].
///
/// Held by the accept loop of stream transports and by the context's
/// in-process registry.
#[derive(Clone)]
pub(crate) struct Attacher {
    inbound: mpsc::UnboundedSender<Message>,
    peers: PeerTable,
    next_id: Arc<AtomicU32>,
    closed: CancellationToken,
}

impl Attacher {
    /// Registers a peer whose messages arrive on `from_peer`.
    ///
    /// Returns the receiver for messages routed to that peer. The peer is
    /// forgotten once `from_peer` closes or the router goes away.
    pub(crate) fn attach(
        &self,
        mut from_peer: mpsc::UnboundedReceiver<Message>,
    ) -> mpsc::UnboundedReceiver<Message> {
        let identity = self.next_identity();
        let (to_peer, to_peer_rx) = mpsc::unbounded_channel();
        self.peers.lock().insert(identity.clone(), to_peer);

        #[cfg(feature = "tracing")]
        tracing::trace!(peer = %identity.escape_ascii(), "Peer attached");

        let inbound = self.inbound.clone();
        let peers = self.peers.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = closed.cancelled() => break,
                    received = from_peer.recv() => match received {
                        Some(mut msg) => {
                            msg.push_front(identity.clone());
                            if inbound.send(msg).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            peers.lock().remove(&identity);

            #[cfg(feature = "tracing")]
            tracing::trace!(peer = %identity.escape_ascii(), "Peer detached");
        });

        to_peer_rx
    }

    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    fn next_identity(&self) -> Bytes {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut identity = BytesMut::with_capacity(5);
        identity.put_u8(0);
        identity.put_u32(id);
        identity.freeze()
    }
}
