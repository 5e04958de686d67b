//! Byte-stream transports (TCP and Unix domain sockets).
//!
//! Each connection is split into a reader task and a writer task that move
//! [`Message`]s between the framed socket and the unbounded channels the
//! router and request sockets work with.

use super::{Attacher, Endpoint, MultipartCodec, ReqSocket};
use crate::{Error, Message, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::mpsc,
};
use tokio_util::{codec::Framed, sync::CancellationToken};

/// Attaches an accepted connection to a router.
pub(crate) fn serve<IO>(io: IO, attacher: &Attacher, max_frame_len: usize)
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (sink, frames) = Framed::new(io, MultipartCodec::new(max_frame_len)).split();
    let (from_peer, from_peer_rx) = mpsc::unbounded_channel();
    let to_peer = attacher.attach(from_peer_rx);

    tokio::spawn(pump_in(frames, from_peer, attacher.closed().clone()));
    tokio::spawn(pump_out(to_peer, sink, attacher.closed().clone()));
}

/// Wraps a connected stream in a [`ReqSocket`].
pub(crate) fn connect<IO>(io: IO, shutdown: CancellationToken, max_frame_len: usize) -> ReqSocket
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (sink, frames) = Framed::new(io, MultipartCodec::new(max_frame_len)).split();
    let (to_router, to_router_rx) = mpsc::unbounded_channel();
    let (from_router, from_router_rx) = mpsc::unbounded_channel();
    let closed = shutdown.child_token();

    tokio::spawn(pump_in(frames, from_router, closed.clone()));
    tokio::spawn(pump_out(to_router_rx, sink, closed.clone()));

    ReqSocket::new(to_router, from_router_rx, shutdown, Some(closed.drop_guard()))
}

/// Binds a TCP listener and attaches every accepted connection.
///
/// Returns the bound endpoint with the real port.
pub(crate) async fn listen_tcp(
    addr: &str,
    attacher: Attacher,
    max_frame_len: usize,
) -> Result<Endpoint> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = attacher.closed().cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Accepted connection from {_peer}");
                        if let Err(_e) = stream.set_nodelay(true) {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Failed to set TCP_NODELAY: {_e}");
                        }
                        serve(stream, &attacher, max_frame_len);
                    }
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Accept failed: {_e}");
                    }
                },
            }
        }
    });

    Ok(Endpoint::Tcp(local.to_string()))
}

#[cfg(unix)]
pub(crate) fn listen_ipc(
    path: &std::path::Path,
    attacher: Attacher,
    max_frame_len: usize,
) -> Result<Endpoint> {
    use tokio::net::UnixListener;

    let listener = UnixListener::bind(path)?;
    let path = path.to_path_buf();
    let endpoint = Endpoint::Ipc(path.clone());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = attacher.closed().cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => serve(stream, &attacher, max_frame_len),
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Accept failed: {_e}");
                    }
                },
            }
        }
        // Best effort: a crash still leaves the socket file behind.
        let _ = std::fs::remove_file(&path);
    });

    Ok(endpoint)
}

async fn pump_in<S>(mut frames: S, to: mpsc::UnboundedSender<Message>, closed: CancellationToken)
where
    S: Stream<Item = Result<Message>> + Unpin,
{
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            next = frames.next() => match next {
                Some(Ok(msg)) => {
                    if to.send(msg).is_err() {
                        break;
                    }
                }
                Some(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Closing connection: {_e}");
                    break;
                }
                None => break,
            },
        }
    }
}

async fn pump_out<S>(
    mut from: mpsc::UnboundedReceiver<Message>,
    mut sink: S,
    closed: CancellationToken,
) where
    S: Sink<Message, Error = Error> + Unpin,
{
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            next = from.recv() => match next {
                Some(msg) => {
                    if let Err(_e) = sink.send(msg).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Closing connection: {_e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = sink.close().await;
}
