use crate::{Error, Message, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// A connected request socket with strict send/receive turn-taking.
///
/// Outgoing messages get an empty delimiter frame in front, and the delimiter
/// is stripped from replies, so a router on the other side sees
/// `[identity] [] [body...]` and the application only ever sees the body (plus
/// whatever address stack it chose to carry).
pub struct ReqSocket {
    to_router: mpsc::UnboundedSender<Message>,
    from_router: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
    awaiting_reply: bool,
    // Stream transports tear down their I/O tasks with this.
    _closed: Option<DropGuard>,
}

impl ReqSocket {
    pub(crate) fn new(
        to_router: mpsc::UnboundedSender<Message>,
        from_router: mpsc::UnboundedReceiver<Message>,
        shutdown: CancellationToken,
        closed: Option<DropGuard>,
    ) -> Self {
        Self {
            to_router,
            from_router,
            shutdown,
            awaiting_reply: false,
            _closed: closed,
        }
    }

    /// Sends a request.
    ///
    /// # Errors
    ///
    /// - [`Error::Interrupted`] if the context is shutting down.
    /// - [`Error::InvalidState`] if the previous request has not been
    ///   answered yet.
    /// - [`Error::Disconnected`] if the connection is gone.
    pub fn send(&mut self, mut msg: Message) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Interrupted);
        }
        if self.awaiting_reply {
            return Err(Error::InvalidState {
                reason: "send while a reply is outstanding",
            });
        }

        msg.push_front(Bytes::new());
        self.to_router.send(msg).map_err(|_| {
            if self.shutdown.is_cancelled() {
                Error::Interrupted
            } else {
                Error::Disconnected
            }
        })?;
        self.awaiting_reply = true;
        Ok(())
    }

    /// Waits for the reply to the last request.
    ///
    /// Messages that arrive without the leading delimiter are not replies to
    /// this socket and are skipped.
    ///
    /// # Errors
    ///
    /// - [`Error::Interrupted`] if the context is shutting down.
    /// - [`Error::InvalidState`] if no request is outstanding.
    /// - [`Error::Disconnected`] if the connection is gone.
    pub async fn recv(&mut self) -> Result<Message> {
        if !self.awaiting_reply {
            return Err(Error::InvalidState {
                reason: "recv without an outstanding request",
            });
        }

        loop {
            // Interruption closes the peer side too; it must win that tie.
            let mut msg = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(Error::Interrupted),
                received = self.from_router.recv() => match received {
                    Some(msg) => msg,
                    None if self.shutdown.is_cancelled() => return Err(Error::Interrupted),
                    None => return Err(Error::Disconnected),
                },
            };

            match msg.pop_front() {
                Some(delimiter) if delimiter.is_empty() => {
                    self.awaiting_reply = false;
                    return Ok(msg);
                }
                _ => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Skipping reply without delimiter: {msg:?}");
                }
            }
        }
    }

    /// Sends `msg` and waits for its reply.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send) and [`recv`](Self::recv).
    pub async fn request(&mut self, msg: Message) -> Result<Message> {
        self.send(msg)?;
        self.recv().await
    }
}
