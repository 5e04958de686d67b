use crate::{Error, Result};
use bytes::Bytes;
use core::fmt;
use std::collections::VecDeque;

/// A multipart message: an address stack followed by opaque body frames.
///
/// Addresses are pushed onto the front by each routing hop. Each address is
/// followed by an empty delimiter frame, so a request from a client that went
/// through the broker to a worker looks like:
///
/// ```text
/// [worker] [] [client] [] [body...]
/// ```
///
/// [`Message::wrap`] and [`Message::unwrap`] are exact inverses:
///
/// ```
/// use lruq::{Bytes, Message};
///
/// let msg = Message::from_strs(["client", "", "HELLO"]);
/// let wrapped = msg.clone().wrap(Bytes::from_static(b"worker"));
/// let (address, rest) = wrapped.unwrap().unwrap();
///
/// assert_eq!(address, "worker");
/// assert_eq!(rest, msg);
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: VecDeque<Bytes>,
}

impl Message {
    pub const fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    /// Builds a message from UTF-8 frames. Mostly useful in tests and demos.
    pub fn from_strs<'a, I>(frames: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        frames
            .into_iter()
            .map(|frame| Bytes::copy_from_slice(frame.as_bytes()))
            .collect()
    }

    /// Pushes `address` as the new outermost frame, followed by an empty
    /// delimiter.
    #[must_use]
    pub fn wrap(mut self, address: Bytes) -> Self {
        self.frames.push_front(Bytes::new());
        self.frames.push_front(address);
        self
    }

    /// Pops the outermost address (and its delimiter, if present).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEnvelope`] if the message has no frames or its
    /// first frame is empty.
    pub fn unwrap(mut self) -> Result<(Bytes, Self)> {
        let address = match self.frames.pop_front() {
            Some(frame) if !frame.is_empty() => frame,
            Some(_) => {
                return Err(Error::MalformedEnvelope {
                    reason: "empty address frame",
                });
            }
            None => {
                return Err(Error::MalformedEnvelope {
                    reason: "no frames",
                });
            }
        };
        if self.frames.front().is_some_and(Bytes::is_empty) {
            self.frames.pop_front();
        }
        Ok((address, self))
    }

    /// Returns the first frame of the message, which after an
    /// [`unwrap`](Self::unwrap) is the first body frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyBody`] if there are no frames left.
    pub fn first_body_frame(&self) -> Result<&Bytes> {
        self.frames.front().ok_or(Error::EmptyBody)
    }

    /// Returns the outermost address without consuming it, if there is a
    /// non-empty first frame.
    pub fn address(&self) -> Option<&Bytes> {
        self.frames.front().filter(|frame| !frame.is_empty())
    }

    pub fn push_front(&mut self, frame: Bytes) {
        self.frames.push_front(frame);
    }

    pub fn push_back(&mut self, frame: Bytes) {
        self.frames.push_back(frame);
    }

    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    pub fn first(&self) -> Option<&Bytes> {
        self.frames.front()
    }

    pub fn last(&self) -> Option<&Bytes> {
        self.frames.back()
    }

    /// Replaces the last frame, or appends `frame` if the message is empty.
    ///
    /// Workers use this to turn a request into a reply while keeping the
    /// return address stack untouched.
    pub fn set_last(&mut self, frame: Bytes) {
        match self.frames.back_mut() {
            Some(last) => *last = frame,
            None => self.frames.push_back(frame),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Bytes> {
        self.frames.iter()
    }

    /// Total payload size across all frames.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Frames are usually short ASCII tokens or binary identities, so print
        // them escaped rather than as byte arrays.
        f.debug_list()
            .entries(self.frames.iter().map(|frame| frame.escape_ascii().to_string()))
            .finish()
    }
}

impl FromIterator<Bytes> for Message {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl From<Message> for Vec<Bytes> {
    fn from(msg: Message) -> Self {
        msg.frames.into()
    }
}

impl IntoIterator for Message {
    type Item = Bytes;
    type IntoIter = std::collections::vec_deque::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}
