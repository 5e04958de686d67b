#![doc = include_str!("../README.md")]

mod dispatcher;
mod error;
mod message;
pub mod metrics;
mod protocol;
mod ready_queue;
pub mod transport;

pub use crate::dispatcher::*;
pub use crate::error::*;
pub use crate::message::*;
pub use crate::protocol::*;
pub use crate::ready_queue::*;
pub use crate::transport::{Channel, Context, Endpoint, ReqSocket, RouterSocket};
// Frames are `bytes::Bytes`; re-export so callers don't need a direct
// dependency to build messages.
pub use bytes::Bytes;
