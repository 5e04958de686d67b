#![doc = include_str!("../README.md")]

mod broker;

use broker::config::{BrokerConfig, CliArgs};
use broker::telemetry::init_telemetry;
use clap::Parser;
use lruq::{Context, Dispatcher};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = BrokerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let ctx = Context::with_max_frame_len(config.max_frame_bytes);
    let frontend = ctx.bind(&config.frontend.to_string()).await?;
    let backend = ctx.bind(&config.backend.to_string()).await?;
    log_startup_info(frontend.endpoint(), backend.endpoint(), &config);

    let demo = broker::demo::spawn(
        &ctx,
        &frontend.endpoint().to_string(),
        &backend.endpoint().to_string(),
        config.demo_clients,
        config.demo_workers,
        config.demo_interval,
    )
    .await?;

    tokio::spawn(shutdown_signal(ctx.clone()));

    let mut dispatcher = Dispatcher::new(frontend, backend);
    let result = dispatcher.run(config.mode).await;

    let _stats = dispatcher.broker().stats();
    let (_released, _frontend, _backend) = dispatcher.shutdown();
    #[cfg(feature = "tracing")]
    tracing::info!(
        released = _released,
        dispatched = _stats.requests_dispatched,
        forwarded = _stats.replies_forwarded,
        dropped = _stats.dropped,
        "Broker stopped"
    );

    let _failed = broker::demo::stop(demo, broker::demo::STOP_GRACE).await;
    #[cfg(feature = "tracing")]
    if _failed > 0 {
        tracing::warn!("{_failed} demo tasks failed");
    }
    providers.shutdown();

    result?;
    #[cfg(feature = "tracing")]
    tracing::info!("Broker shut down successfully");
    Ok(())
}

fn log_startup_info(
    _frontend: &lruq::Endpoint,
    _backend: &lruq::Endpoint,
    _config: &BrokerConfig,
) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting broker, frontend {} backend {}, with full config: {:#?}",
            _frontend,
            _backend,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting {} broker, frontend {} backend {}",
            _config.mode,
            _frontend,
            _backend
        );
    }
}

async fn shutdown_signal(ctx: Context) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    ctx.interrupt();
}
