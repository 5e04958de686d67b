use core::time::Duration;
use futures::StreamExt;
use lruq::{
    Bytes, ClientState, Context, Dispatcher, Error, Message, Mode, READY, ReqSocket, RouterSocket,
};
use tokio::{task::JoinHandle, time::timeout};

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(50);
const MODES: [Mode; 2] = [Mode::Poll, Mode::Reactor];

type Running = JoinHandle<(lruq::Result<()>, Dispatcher<RouterSocket, RouterSocket>)>;

async fn bind_pair(ctx: &Context, frontend: &str, backend: &str) -> (RouterSocket, RouterSocket) {
    (
        ctx.bind(frontend).await.unwrap(),
        ctx.bind(backend).await.unwrap(),
    )
}

fn spawn(frontend: RouterSocket, backend: RouterSocket, mode: Mode) -> Running {
    tokio::spawn(async move {
        let mut dispatcher = Dispatcher::new(frontend, backend);
        let result = dispatcher.run(mode).await;
        (result, dispatcher)
    })
}

async fn ready_worker(ctx: &Context, backend: &str) -> ReqSocket {
    let mut worker = ctx.connect(backend).await.unwrap();
    worker.send(Message::from(vec![Bytes::from_static(READY)])).unwrap();
    worker
}

/// Answers one request with `OK` and returns the request body.
async fn serve_one(worker: &mut ReqSocket) -> Bytes {
    let mut request = timeout(WAIT, worker.recv()).await.unwrap().unwrap();
    let body = request.last().cloned().unwrap();
    request.set_last(Bytes::from_static(b"OK"));
    worker.send(request).unwrap();
    body
}

#[tokio::test]
async fn one_worker_one_client_round_trip() {
    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "inproc://front", "inproc://back").await;
        let running = spawn(frontend, backend, mode);

        let mut worker = ready_worker(&ctx, "inproc://back").await;
        let mut client = ctx.connect("inproc://front").await.unwrap();
        client.send(Message::from_strs(["HELLO"])).unwrap();

        // The worker sees `[client] [] [HELLO]`.
        let request = timeout(WAIT, worker.recv()).await.unwrap().unwrap();
        assert_eq!(request.len(), 3, "{mode}");
        assert!(request.iter().nth(1).unwrap().is_empty());
        assert_eq!(request.last().unwrap().as_ref(), b"HELLO");

        let mut reply = request;
        reply.set_last(Bytes::from_static(b"OK"));
        worker.send(reply).unwrap();

        let got = timeout(WAIT, client.recv()).await.unwrap().unwrap();
        assert_eq!(got, Message::from_strs(["OK"]), "{mode}");

        ctx.interrupt();
        let (result, dispatcher) = timeout(WAIT, running).await.unwrap().unwrap();
        assert!(result.is_ok(), "{mode}: {result:?}");

        // The worker's reply put it back in the queue.
        let stats = dispatcher.broker().stats();
        assert_eq!(stats.ready_signals, 1);
        assert_eq!(stats.requests_dispatched, 1);
        assert_eq!(stats.replies_forwarded, 1);
        assert_eq!(dispatcher.broker().state(), ClientState::Enabled);

        let (released, _, _) = dispatcher.shutdown();
        assert_eq!(released, 1);
    }
}

#[tokio::test]
async fn requests_wait_while_no_worker_is_ready() {
    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "inproc://front", "inproc://back").await;
        let mut client = ctx.connect("inproc://front").await.unwrap();
        client.send(Message::from_strs(["HELLO"])).unwrap();

        let mut dispatcher = Dispatcher::new(frontend, backend);
        assert!(
            timeout(Duration::from_millis(100), dispatcher.run(mode))
                .await
                .is_err(),
            "{mode}: loop returned without a worker"
        );

        // Nothing was read from the frontend.
        let (broker, mut frontend, _backend) = dispatcher.into_parts();
        assert_eq!(broker.state(), ClientState::Blocked);
        assert_eq!(broker.stats().requests_dispatched, 0);

        let pending = timeout(WAIT, frontend.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(pending.last().unwrap().as_ref(), b"HELLO", "{mode}");
    }
}

#[tokio::test]
async fn late_worker_picks_up_queued_request() {
    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "inproc://front", "inproc://back").await;
        let running = spawn(frontend, backend, mode);

        let mut client = ctx.connect("inproc://front").await.unwrap();
        client.send(Message::from_strs(["HELLO"])).unwrap();
        tokio::time::sleep(SETTLE).await;

        let mut worker = ready_worker(&ctx, "inproc://back").await;
        assert_eq!(serve_one(&mut worker).await.as_ref(), b"HELLO", "{mode}");

        let got = timeout(WAIT, client.recv()).await.unwrap().unwrap();
        assert_eq!(got, Message::from_strs(["OK"]));

        ctx.interrupt();
        let (result, _) = timeout(WAIT, running).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}

#[tokio::test]
async fn requests_go_to_the_least_recently_used_worker() {
    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "inproc://front", "inproc://back").await;
        let running = spawn(frontend, backend, mode);

        let mut workers = Vec::new();
        for _ in 0..3 {
            workers.push(ready_worker(&ctx, "inproc://back").await);
            tokio::time::sleep(SETTLE).await;
        }

        let mut client = ctx.connect("inproc://front").await.unwrap();
        for (i, worker) in workers.iter_mut().enumerate() {
            let body = format!("job-{i}");
            client.send(Message::from_strs([body.as_str()])).unwrap();
            assert_eq!(serve_one(worker).await.as_ref(), body.as_bytes(), "{mode}");
            timeout(WAIT, client.recv()).await.unwrap().unwrap();
            tokio::time::sleep(SETTLE).await;
        }

        // Served in order, so worker 0 is again the least recently used.
        client.send(Message::from_strs(["again"])).unwrap();
        assert_eq!(serve_one(&mut workers[0]).await.as_ref(), b"again", "{mode}");

        ctx.interrupt();
        let (result, dispatcher) = timeout(WAIT, running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(dispatcher.broker().stats().requests_dispatched, 4);
    }
}

#[tokio::test]
async fn ready_worker_is_released_on_shutdown() {
    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "inproc://front", "inproc://back").await;
        let running = spawn(frontend, backend, mode);

        let mut worker = ready_worker(&ctx, "inproc://back").await;
        tokio::time::sleep(SETTLE).await;
        ctx.interrupt();

        let (result, dispatcher) = timeout(WAIT, running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(dispatcher.broker().workers().len(), 1);
        assert!(matches!(worker.recv().await, Err(Error::Interrupted)));

        let (released, _, _) = dispatcher.shutdown();
        assert_eq!(released, 1);
    }
}

#[tokio::test]
async fn interrupt_stops_an_idle_dispatcher() {
    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "inproc://front", "inproc://back").await;
        let running = spawn(frontend, backend, mode);

        tokio::time::sleep(SETTLE).await;
        ctx.interrupt();

        let (result, dispatcher) = timeout(WAIT, running).await.unwrap().unwrap();
        assert!(result.is_ok(), "{mode}");
        let (released, _, _) = dispatcher.shutdown();
        assert_eq!(released, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_clients_over_tcp() {
    const CLIENTS: usize = 6;
    const WORKERS: usize = 3;
    const ROUNDS: usize = 4;

    for mode in MODES {
        let ctx = Context::new();
        let (frontend, backend) = bind_pair(&ctx, "tcp://127.0.0.1:0", "tcp://127.0.0.1:0").await;
        let frontend_at = frontend.endpoint().to_string();
        let backend_at = backend.endpoint().to_string();
        let running = spawn(frontend, backend, mode);

        for _ in 0..WORKERS {
            let mut worker = ready_worker(&ctx, &backend_at).await;
            tokio::spawn(async move {
                while let Ok(mut request) = worker.recv().await {
                    request.set_last(Bytes::from_static(b"OK"));
                    if worker.send(request).is_err() {
                        break;
                    }
                }
            });
        }

        let mut clients = Vec::new();
        for _ in 0..CLIENTS {
            let mut client = ctx.connect(&frontend_at).await.unwrap();
            clients.push(tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    let reply = client.request(Message::from_strs(["HELLO"])).await?;
                    assert_eq!(reply, Message::from_strs(["OK"]));
                }
                Ok::<_, Error>(())
            }));
        }
        for client in clients {
            timeout(WAIT, client).await.unwrap().unwrap().unwrap();
        }

        ctx.interrupt();
        let (result, dispatcher) = timeout(WAIT, running).await.unwrap().unwrap();
        assert!(result.is_ok(), "{mode}: {result:?}");

        let stats = dispatcher.broker().stats();
        assert_eq!(stats.requests_dispatched, (CLIENTS * ROUNDS) as u64);
        assert_eq!(stats.replies_forwarded, (CLIENTS * ROUNDS) as u64);
        assert_eq!(stats.ready_signals, WORKERS as u64);
    }
}
