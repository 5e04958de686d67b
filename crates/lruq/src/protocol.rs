//! The LRU routing protocol.
//!
//! [`Broker`] owns the ready-queue and the client state and turns each
//! incoming message into a [`Step`]: what to forward, and whether the frontend
//! subscription has to change. It does no I/O, so both dispatcher loops share
//! it unchanged.
//!
//! ## Rules
//!
//! - **Backend**: every message re-enqueues its sender *before* the body is
//!   looked at. A worker's reply doubles as its next readiness signal. If the
//!   body is exactly [`READY`], the message is discarded; otherwise the
//!   remainder (whose outermost address is the client) goes to the frontend.
//! - **Frontend**: pop the least recently used worker and wrap the request
//!   with its address for the backend.

use crate::{ClientState, Error, Message, ReadyQueue, Result, metrics};
use bytes::Bytes;

/// The body a worker sends to announce that it is ready for a job.
pub const READY: &[u8] = b"\x01";

/// Result of routing one message.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Message to send on the opposite channel, if any.
    pub forward: Option<Message>,
    /// New client state, present only when it changed.
    pub transition: Option<ClientState>,
}

/// Running totals kept by a [`Broker`].
///
/// `requests_dispatched` and `replies_forwarded` count routed messages. A
/// routed message the dispatcher then fails to send is also counted in
/// `dropped`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub ready_signals: u64,
    pub requests_dispatched: u64,
    pub replies_forwarded: u64,
    pub dropped: u64,
}

/// Routing state for one frontend/backend pair.
#[derive(Debug, Default)]
pub struct Broker {
    workers: ReadyQueue,
    state: ClientState,
    stats: BrokerStats,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> ClientState {
        self.state
    }

    pub const fn workers(&self) -> &ReadyQueue {
        &self.workers
    }

    pub const fn stats(&self) -> BrokerStats {
        self.stats
    }

    /// Routes a message received on the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEnvelope`] if the message carries no worker
    /// address. Nothing is changed in that case.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn on_backend(&mut self, msg: Message) -> Result<Step> {
        let (worker, reply) = match msg.unwrap() {
            Ok(parts) => parts,
            Err(e) => {
                self.record_drop();
                return Err(e);
            }
        };

        self.enqueue(worker);
        let transition = self.state.advance(self.workers.len());

        let forward = match reply.first_body_frame() {
            Ok(frame) if frame.as_ref() == READY => {
                self.stats.ready_signals += 1;
                metrics::increment_ready_signals();
                None
            }
            Ok(_) => {
                self.stats.replies_forwarded += 1;
                metrics::increment_replies_forwarded();
                Some(reply)
            }
            Err(_e) => {
                // The worker is queued already; only the message goes.
                #[cfg(feature = "tracing")]
                tracing::warn!("Dropping backend message: {_e}");
                self.record_drop();
                None
            }
        };

        Ok(Step {
            forward,
            transition,
        })
    }

    /// Routes a client request received on the frontend.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedEnvelope`] if the request carries no client
    ///   address. No worker is consumed.
    /// - [`Error::QueueEmpty`] if no worker is ready. The dispatchers never
    ///   read the frontend in that state, so debug builds panic instead.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn on_frontend(&mut self, msg: Message) -> Result<Step> {
        if msg.address().is_none() {
            self.record_drop();
            return Err(Error::MalformedEnvelope {
                reason: "request without client address",
            });
        }

        debug_assert!(
            !self.workers.is_empty(),
            "frontend read while no worker was ready"
        );
        let worker = match self.workers.pop_front() {
            Ok(worker) => worker,
            Err(e) => {
                self.record_drop();
                return Err(e);
            }
        };
        metrics::adjust_ready_workers(-1);
        let transition = self.state.advance(self.workers.len());

        #[cfg(feature = "tracing")]
        tracing::trace!(
            worker = %worker.escape_ascii(),
            ready = self.workers.len(),
            "Dispatching request"
        );
        self.stats.requests_dispatched += 1;
        metrics::increment_requests_dispatched();

        Ok(Step {
            forward: Some(msg.wrap(worker)),
            transition,
        })
    }

    /// Releases every worker still held in the ready-queue and returns how
    /// many there were. The broker is left blocked.
    pub fn release(&mut self) -> usize {
        let released = self.workers.drain().count();
        metrics::adjust_ready_workers(-(released as i64));
        self.state.advance(0);
        released
    }

    fn enqueue(&mut self, worker: Bytes) {
        if self.workers.append(worker) {
            metrics::adjust_ready_workers(1);
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker reported ready while already queued; ignoring repeat");
        }
    }

    pub(crate) fn record_drop(&mut self) {
        self.stats.dropped += 1;
        metrics::increment_dropped();
    }
}
