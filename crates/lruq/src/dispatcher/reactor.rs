use super::{Dispatcher, Side, best_effort, settle};
use crate::{Broker, Channel, ClientState, Error, Message, Result};
use core::{
    fmt,
    task::{Context, Poll},
};
use futures::{StreamExt, future::poll_fn};

/// Handle to a channel added to a [`Reactor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(usize);

/// Callback invoked with each message read from a channel.
///
/// Handlers get the reactor itself, so they can send, add readers, or cancel
/// them (including their own) while running.
pub type ReadHandler<'a, S> = fn(&mut Reactor<'a, S>, &mut S, Message) -> Result<()>;

struct Slot<'a, S> {
    channel: &'a mut dyn Channel,
    reader: Option<ReadHandler<'a, S>>,
}

/// A callback-driven event loop over a set of borrowed channels.
///
/// Channels are [`add`](Self::add)ed once; reading from one is switched on
/// and off with [`reader`](Self::reader) and [`cancel`](Self::cancel). When
/// several readers are ready at the same time, the one added first is served
/// first.
pub struct Reactor<'a, S> {
    slots: Vec<Slot<'a, S>>,
}

impl<'a, S> Reactor<'a, S> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn add(&mut self, channel: &'a mut dyn Channel) -> SocketId {
        self.slots.push(Slot {
            channel,
            reader: None,
        });
        SocketId(self.slots.len() - 1)
    }

    /// Registers `handler` for messages on `id`, replacing any previous one.
    pub fn reader(&mut self, id: SocketId, handler: ReadHandler<'a, S>) {
        self.slots[id.0].reader = Some(handler);
    }

    /// Stops reading from `id`. Pending messages stay in the channel.
    pub fn cancel(&mut self, id: SocketId) {
        self.slots[id.0].reader = None;
    }

    pub fn is_reading(&self, id: SocketId) -> bool {
        self.slots[id.0].reader.is_some()
    }

    /// Sends `msg` on the channel behind `id`.
    ///
    /// # Errors
    ///
    /// Returns whatever the channel's send returns.
    pub fn send(&mut self, id: SocketId, msg: Message) -> Result<()> {
        self.slots[id.0].channel.send(msg)
    }

    /// Runs the loop.
    ///
    /// Returns `Ok(())` when a channel is interrupted or closed, or when no
    /// reader is left registered. An error returned by a handler stops the
    /// loop and is passed on, unless it is [`Error::Interrupted`].
    pub async fn start(&mut self, state: &mut S) -> Result<()> {
        loop {
            if self.slots.iter().all(|slot| slot.reader.is_none()) {
                #[cfg(feature = "tracing")]
                tracing::debug!("No readers registered, stopping reactor");
                return Ok(());
            }

            let (id, received) = poll_fn(|cx| self.poll_readers(cx)).await;
            let msg = match received {
                Ok(msg) => msg,
                Err(e) if e.is_interrupted() => return Ok(()),
                Err(e) => return Err(e),
            };

            // Nothing can cancel the reader between the poll and here.
            let Some(handler) = self.slots[id.0].reader else {
                continue;
            };
            match handler(self, state, msg) {
                Err(e) if e.is_interrupted() => return Ok(()),
                handled => handled?,
            }
        }
    }

    fn poll_readers(&mut self, cx: &mut Context<'_>) -> Poll<(SocketId, Result<Message>)> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.reader.is_none() {
                continue;
            }
            match slot.channel.poll_next_unpin(cx) {
                Poll::Ready(Some(received)) => return Poll::Ready((SocketId(index), received)),
                Poll::Ready(None) => return Poll::Ready((SocketId(index), Err(Error::Interrupted))),
                Poll::Pending => {}
            }
        }
        Poll::Pending
    }
}

impl<S> Default for Reactor<'_, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for Reactor<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field(
                "readers",
                &self
                    .slots
                    .iter()
                    .map(|slot| slot.reader.is_some())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// State shared by the broker's reactor handlers.
struct Routes<'b> {
    broker: &'b mut Broker,
    frontend: SocketId,
    backend: SocketId,
}

impl<F, B> Dispatcher<F, B>
where
    F: Channel,
    B: Channel,
{
    /// Reactor-driven loop.
    ///
    /// The backend reader is registered once. The frontend reader follows the
    /// broker's [`ClientState`]: registered on `Enabled`, cancelled on
    /// `Blocked`.
    pub async fn run_reactor(&mut self) -> Result<()> {
        let mut reactor = Reactor::new();
        // Added first so it wins ties with the frontend.
        let backend = reactor.add(&mut self.backend);
        let frontend = reactor.add(&mut self.frontend);
        let mut routes = Routes {
            broker: &mut self.broker,
            frontend,
            backend,
        };

        reactor.reader(routes.backend, handle_backend);
        if routes.broker.state().is_enabled() {
            reactor.reader(routes.frontend, handle_frontend);
        }

        reactor.start(&mut routes).await
    }
}

fn handle_backend<'a, 'b>(
    reactor: &mut Reactor<'a, Routes<'b>>,
    routes: &mut Routes<'b>,
    msg: Message,
) -> Result<()> {
    let handled = routes.broker.on_backend(msg).and_then(|step| {
        follow(reactor, routes, step.transition);
        match step.forward {
            Some(reply) => {
                let sent = reactor.send(routes.frontend, reply);
                best_effort(Side::Frontend, routes.broker, sent)
            }
            None => Ok(()),
        }
    });
    finish(reactor, routes, Side::Backend, handled)
}

fn handle_frontend<'a, 'b>(
    reactor: &mut Reactor<'a, Routes<'b>>,
    routes: &mut Routes<'b>,
    msg: Message,
) -> Result<()> {
    let handled = routes.broker.on_frontend(msg).and_then(|step| {
        follow(reactor, routes, step.transition);
        match step.forward {
            Some(request) => {
                let sent = reactor.send(routes.backend, request);
                best_effort(Side::Backend, routes.broker, sent)
            }
            None => Ok(()),
        }
    });
    finish(reactor, routes, Side::Frontend, handled)
}

/// Subscribes or unsubscribes the frontend on a client state edge.
fn follow<'a, 'b>(
    reactor: &mut Reactor<'a, Routes<'b>>,
    routes: &Routes<'b>,
    transition: Option<ClientState>,
) {
    match transition {
        Some(ClientState::Enabled) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker available, reading frontend");
            reactor.reader(routes.frontend, handle_frontend);
        }
        Some(ClientState::Blocked) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("No worker available, cancelling frontend reader");
            reactor.cancel(routes.frontend);
        }
        None => {}
    }
}

fn finish<'a, 'b>(
    reactor: &Reactor<'a, Routes<'b>>,
    routes: &Routes<'b>,
    side: Side,
    handled: Result<()>,
) -> Result<()> {
    debug_assert_eq!(
        reactor.is_reading(routes.frontend),
        routes.broker.state().is_enabled()
    );
    match settle(side, handled)? {
        core::ops::ControlFlow::Continue(()) => Ok(()),
        core::ops::ControlFlow::Break(()) => Err(Error::Interrupted),
    }
}
