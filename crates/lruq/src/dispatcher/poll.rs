use super::{Dispatcher, Side, best_effort, settle};
use crate::{Channel, Error, Message, Result};
use core::task::{Context, Poll};
use futures::{StreamExt, future::poll_fn};

/// Channels that woke up in one poll.
struct Wake {
    backend: Option<Result<Message>>,
    frontend: Option<Result<Message>>,
}

impl<F, B> Dispatcher<F, B>
where
    F: Channel,
    B: Channel,
{
    /// Poll-driven loop.
    ///
    /// Every iteration polls the backend, and the frontend only if the broker
    /// is [`ClientState::Enabled`](crate::ClientState::Enabled). When both wake
    /// together the backend message is handled first; it can only grow the
    /// ready-queue, so the frontend message that was read alongside it can
    /// always be dispatched.
    pub async fn run_polling(&mut self) -> Result<()> {
        loop {
            let poll_frontend = self.broker.state().is_enabled();
            let wake = poll_set(&mut self.frontend, &mut self.backend, poll_frontend).await;

            if let Some(received) = wake.backend {
                let handled = received.and_then(|msg| self.route_backend(msg));
                if settle(Side::Backend, handled)?.is_break() {
                    break;
                }
            }

            if let Some(received) = wake.frontend {
                let handled = received.and_then(|msg| self.route_frontend(msg));
                if settle(Side::Frontend, handled)?.is_break() {
                    break;
                }
            }

            debug_assert_eq!(
                self.broker.state().is_enabled(),
                !self.broker.workers().is_empty()
            );
        }

        Ok(())
    }

    fn route_backend(&mut self, msg: Message) -> Result<()> {
        let step = self.broker.on_backend(msg)?;
        if let Some(_state) = step.transition {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ready workers changed, now {_state}");
        }
        match step.forward {
            Some(reply) => best_effort(Side::Frontend, &mut self.broker, self.frontend.send(reply)),
            None => Ok(()),
        }
    }

    fn route_frontend(&mut self, msg: Message) -> Result<()> {
        let step = self.broker.on_frontend(msg)?;
        if let Some(_state) = step.transition {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ready workers changed, now {_state}");
        }
        match step.forward {
            Some(request) => {
                best_effort(Side::Backend, &mut self.broker, self.backend.send(request))
            }
            None => Ok(()),
        }
    }
}

/// Waits until at least one channel of the poll set has a message.
///
/// A closed channel counts as interrupted.
async fn poll_set<F, B>(frontend: &mut F, backend: &mut B, poll_frontend: bool) -> Wake
where
    F: Channel,
    B: Channel,
{
    poll_fn(|cx| {
        let from_backend = poll_channel(backend, cx);
        let from_frontend = if poll_frontend {
            poll_channel(frontend, cx)
        } else {
            None
        };

        if from_backend.is_none() && from_frontend.is_none() {
            return Poll::Pending;
        }
        Poll::Ready(Wake {
            backend: from_backend,
            frontend: from_frontend,
        })
    })
    .await
}

fn poll_channel<C: Channel>(channel: &mut C, cx: &mut Context<'_>) -> Option<Result<Message>> {
    match channel.poll_next_unpin(cx) {
        Poll::Ready(Some(received)) => Some(received),
        Poll::Ready(None) => Some(Err(Error::Interrupted)),
        Poll::Pending => None,
    }
}
