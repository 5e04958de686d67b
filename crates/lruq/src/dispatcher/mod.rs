//! Event loops that drive a [`Broker`] between two channels.
//!
//! A [`Dispatcher`] owns the frontend (client-facing) and backend
//! (worker-facing) channels and runs one of two equivalent loops:
//!
//! - [`Mode::Poll`]: each iteration builds a fresh poll set with the backend
//!   always and the frontend only while workers are ready.
//! - [`Mode::Reactor`]: handlers are registered on a [`Reactor`]; the frontend
//!   reader is added on the 0→1 edge of the ready-queue and cancelled on 1→0.
//!
//! Both loops end with `Ok(())` when the transport reports
//! [`Error::Interrupted`].

mod poll;
mod reactor;
mod state;
#[cfg(test)]
mod testing;

pub use reactor::*;
pub use state::*;

use crate::{Broker, Channel, Error, Result};
use core::{fmt, ops::ControlFlow, str::FromStr};

/// Which loop realization to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Poll,
    Reactor,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Reactor => write!(f, "reactor"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "reactor" => Ok(Self::Reactor),
            _ => Err(Error::InvalidMode {
                value: s.to_string(),
            }),
        }
    }
}

/// Names a channel in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Frontend,
    Backend,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frontend => write!(f, "frontend"),
            Self::Backend => write!(f, "backend"),
        }
    }
}

/// Routes requests from `frontend` to the least recently used worker on
/// `backend`, and replies back.
pub struct Dispatcher<F, B> {
    broker: Broker,
    frontend: F,
    backend: B,
}

impl<F, B> Dispatcher<F, B>
where
    F: Channel,
    B: Channel,
{
    pub fn new(frontend: F, backend: B) -> Self {
        Self {
            broker: Broker::new(),
            frontend,
            backend,
        }
    }

    pub const fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Runs the chosen loop until the transport is interrupted.
    ///
    /// The broker state is kept between runs, so a loop may be resumed (even
    /// in the other mode) after it returns.
    ///
    /// # Errors
    ///
    /// Returns any transport error other than [`Error::Interrupted`].
    pub async fn run(&mut self, mode: Mode) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Starting {mode} dispatcher");

        match mode {
            Mode::Poll => self.run_polling().await,
            Mode::Reactor => self.run_reactor().await,
        }
    }

    /// Releases the workers still held by the broker and hands the channels
    /// back. Returns the number of released workers alongside.
    pub fn shutdown(mut self) -> (usize, F, B) {
        let released = self.broker.release();
        #[cfg(feature = "tracing")]
        tracing::debug!("Released {released} ready workers");
        (released, self.frontend, self.backend)
    }

    pub fn into_parts(self) -> (Broker, F, B) {
        (self.broker, self.frontend, self.backend)
    }
}

/// Applies the error policy to the outcome of handling one message.
///
/// - `Interrupted` ends the loop normally.
/// - Per-message errors drop the message and keep the loop going.
/// - Anything else is returned to the caller.
fn settle(_side: Side, result: Result<()>) -> Result<ControlFlow<()>> {
    match result {
        Ok(()) => Ok(ControlFlow::Continue(())),
        Err(e) if e.is_interrupted() => {
            #[cfg(feature = "tracing")]
            tracing::debug!("{_side} interrupted, leaving dispatcher loop");
            Ok(ControlFlow::Break(()))
        }
        Err(_e) if _e.is_recoverable() => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Dropping {_side} message: {_e}");
            Ok(ControlFlow::Continue(()))
        }
        Err(e) => Err(e),
    }
}

/// Sends are best effort: only an interruption is passed on, other failures
/// drop the message and count it on `broker`.
fn best_effort(_side: Side, broker: &mut Broker, sent: Result<()>) -> Result<()> {
    match sent {
        Err(e) if e.is_interrupted() => Err(e),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to send on {_side}: {_e}");
            broker.record_drop();
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
