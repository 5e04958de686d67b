//! In-process clients and workers for trying the broker out.
//!
//! They speak the same protocol any external peer would, over whatever
//! endpoints the broker is bound to.

use core::time::Duration;
use lruq::{Bytes, Context, Error, Message, READY, Result};
use tokio::task::{JoinError, JoinSet};

/// How long [`stop`] waits for demo tasks to notice the interruption.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

/// Spawns `clients` demo clients on `frontend` and `workers` demo workers on
/// `backend`.
pub async fn spawn(
    ctx: &Context,
    frontend: &str,
    backend: &str,
    clients: usize,
    workers: usize,
    interval: Duration,
) -> Result<JoinSet<Result<()>>> {
    let mut tasks = JoinSet::new();

    for id in 0..workers {
        let socket = ctx.connect(backend).await?;
        tasks.spawn(worker_task(id, socket));
    }
    for id in 0..clients {
        let socket = ctx.connect(frontend).await?;
        tasks.spawn(client_task(id, socket, interval));
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Started {clients} demo clients and {workers} demo workers");

    Ok(tasks)
}

/// Collects the demo tasks after the context was interrupted.
///
/// Tasks get up to `grace` to finish on their own; the rest (clients asleep
/// between requests) are aborted. Failed and panicked tasks are logged.
/// Returns how many there were.
pub async fn stop(mut tasks: JoinSet<Result<()>>, grace: Duration) -> usize {
    let mut failed = 0;
    let _ = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            failed += usize::from(!report(joined));
        }
    })
    .await;

    tasks.abort_all();
    while let Some(joined) = tasks.join_next().await {
        failed += usize::from(!report(joined));
    }
    failed
}

/// Logs the outcome of one demo task. Returns `false` if it failed.
fn report(joined: core::result::Result<Result<()>, JoinError>) -> bool {
    match joined {
        Ok(Ok(())) => true,
        Err(e) if e.is_cancelled() => true,
        Ok(Err(_e)) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Demo task failed: {_e}");
            false
        }
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Demo task panicked: {_e}");
            false
        }
    }
}

/// Sends `HELLO`, waits for the reply, sleeps, repeats.
async fn client_task(_id: usize, mut socket: lruq::ReqSocket, interval: Duration) -> Result<()> {
    loop {
        match socket.request(Message::from_strs(["HELLO"])).await {
            Ok(_reply) => {
                #[cfg(feature = "tracing")]
                tracing::info!(client = _id, "Client: {_reply:?}");
            }
            Err(Error::Interrupted) => return Ok(()),
            Err(e) => return Err(e),
        }
        tokio::time::sleep(interval).await;
    }
}

/// Announces itself, then answers every request with `OK`.
async fn worker_task(id: usize, mut socket: lruq::ReqSocket) -> Result<()> {
    match serve(id, &mut socket).await {
        Err(Error::Interrupted) => Ok(()),
        other => other,
    }
}

async fn serve(_id: usize, socket: &mut lruq::ReqSocket) -> Result<()> {
    socket.send(Message::from(vec![Bytes::from_static(READY)]))?;
    loop {
        let mut request = socket.recv().await?;
        #[cfg(feature = "tracing")]
        tracing::debug!(worker = _id, "Worker: {request:?}");
        request.set_last(Bytes::from_static(b"OK"));
        socket.send(request)?;
    }
}
