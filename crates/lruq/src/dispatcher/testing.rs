use crate::{Channel, Error, Message, Result};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

/// Sends made across several scripted channels, in order, tagged with the
/// channel's name.
pub(crate) type Journal = Arc<Mutex<Vec<(&'static str, Message)>>>;

/// A channel with a fixed inbox that records what is sent on it.
///
/// Each inbox entry is ready immediately, except pauses, which make one poll
/// return pending (and wake the task again). Once the inbox is empty the
/// channel stays pending.
#[derive(Default)]
pub(crate) struct Script {
    pub(crate) inbox: VecDeque<Option<Result<Message>>>,
    pub(crate) sent: Vec<Message>,
    pub(crate) fail_sends: bool,
    journal: Option<(&'static str, Journal)>,
}

impl Script {
    pub(crate) fn new(inbox: impl IntoIterator<Item = Message>) -> Self {
        Self {
            inbox: inbox.into_iter().map(|msg| Some(Ok(msg))).collect(),
            ..Self::default()
        }
    }

    /// Ends the inbox with an interruption.
    pub(crate) fn then_interrupt(mut self) -> Self {
        self.inbox.push_back(Some(Err(Error::Interrupted)));
        self
    }

    /// Lets other channels be read once before the rest of the inbox.
    pub(crate) fn then_pause(mut self) -> Self {
        self.inbox.push_back(None);
        self
    }

    pub(crate) fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub(crate) fn journal(mut self, name: &'static str, journal: &Journal) -> Self {
        self.journal = Some((name, Arc::clone(journal)));
        self
    }
}

impl Stream for Script {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().inbox.pop_front() {
            Some(Some(received)) => Poll::Ready(Some(received)),
            Some(None) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            None => Poll::Pending,
        }
    }
}

impl Channel for Script {
    fn send(&mut self, msg: Message) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Disconnected);
        }
        if let Some((name, journal)) = &self.journal {
            journal.lock().push((*name, msg.clone()));
        }
        self.sent.push(msg);
        Ok(())
    }
}
