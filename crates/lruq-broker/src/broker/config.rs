use anyhow::{Context as _, bail};
use clap::Parser;
use core::time::Duration;
use lruq::{Endpoint, Mode};

/// Runtime configuration for the `lruq-broker` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lruq-broker",
    version,
    about = "A least-recently-used load-balancing message broker"
)]
pub struct CliArgs {
    /// Endpoint clients connect to.
    ///
    /// One of `tcp://host:port`, `ipc://path` or `inproc://name` (the last is
    /// only reachable by the demo tasks).
    ///
    /// Environment variable: `LRUQ_FRONTEND`
    #[arg(long, env = "LRUQ_FRONTEND", default_value_t = String::from("tcp://0.0.0.0:5555"))]
    pub frontend: String,

    /// Endpoint workers connect to.
    ///
    /// Environment variable: `LRUQ_BACKEND`
    #[arg(long, env = "LRUQ_BACKEND", default_value_t = String::from("tcp://0.0.0.0:5556"))]
    pub backend: String,

    /// Dispatcher loop: `poll` rebuilds a poll set every iteration, `reactor`
    /// registers and cancels the frontend reader as workers come and go.
    ///
    /// Environment variable: `LRUQ_MODE`
    #[arg(long, env = "LRUQ_MODE", default_value_t = String::from("poll"))]
    pub mode: String,

    /// Largest frame accepted from a stream connection. Peers sending more are
    /// disconnected.
    ///
    /// Environment variable: `LRUQ_MAX_FRAME_BYTES`
    #[arg(long, env = "LRUQ_MAX_FRAME_BYTES", default_value_t = lruq::transport::DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_bytes: usize,

    /// Number of in-process demo clients to start.
    ///
    /// Environment variable: `LRUQ_DEMO_CLIENTS`
    #[arg(long, env = "LRUQ_DEMO_CLIENTS", default_value_t = 0)]
    pub demo_clients: usize,

    /// Number of in-process demo workers to start.
    ///
    /// Environment variable: `LRUQ_DEMO_WORKERS`
    #[arg(long, env = "LRUQ_DEMO_WORKERS", default_value_t = 0)]
    pub demo_workers: usize,

    /// Pause between two requests of the same demo client, in milliseconds.
    ///
    /// Environment variable: `LRUQ_DEMO_INTERVAL_MS`
    #[arg(long, env = "LRUQ_DEMO_INTERVAL_MS", default_value_t = 1000)]
    pub demo_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub frontend: Endpoint,
    pub backend: Endpoint,
    pub mode: Mode,
    pub max_frame_bytes: usize,
    pub demo_clients: usize,
    pub demo_workers: usize,
    pub demo_interval: Duration,
}

impl TryFrom<CliArgs> for BrokerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let frontend: Endpoint = args
            .frontend
            .parse()
            .context("invalid LRUQ_FRONTEND")?;
        let backend: Endpoint = args.backend.parse().context("invalid LRUQ_BACKEND")?;
        let mode: Mode = args.mode.parse().context("invalid LRUQ_MODE")?;

        if frontend == backend {
            bail!("LRUQ_FRONTEND and LRUQ_BACKEND must differ (both are {frontend})");
        }

        if args.max_frame_bytes == 0 {
            bail!("LRUQ_MAX_FRAME_BYTES must be greater than 0");
        }

        if args.demo_interval_ms == 0 {
            bail!("LRUQ_DEMO_INTERVAL_MS must be greater than 0");
        }

        Ok(Self {
            frontend,
            backend,
            mode,
            max_frame_bytes: args.max_frame_bytes,
            demo_clients: args.demo_clients,
            demo_workers: args.demo_workers,
            demo_interval: Duration::from_millis(args.demo_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<BrokerConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("lruq-broker").chain(args.iter().copied()))?;
        BrokerConfig::try_from(args)
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.frontend, Endpoint::Tcp("0.0.0.0:5555".into()));
        assert_eq!(config.backend, Endpoint::Tcp("0.0.0.0:5556".into()));
        assert_eq!(config.mode, Mode::Poll);
        assert_eq!(config.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.demo_clients, 0);
        assert_eq!(config.demo_workers, 0);
        assert_eq!(config.demo_interval, Duration::from_secs(1));
    }

    #[test]
    fn accepts_overrides() {
        let config = parse(&[
            "--frontend",
            "inproc://front",
            "--backend",
            "ipc:///tmp/back.ipc",
            "--mode",
            "reactor",
            "--demo-clients",
            "10",
            "--demo-workers",
            "3",
        ])
        .unwrap();
        assert_eq!(config.frontend, Endpoint::Inproc("front".into()));
        assert_eq!(config.backend, Endpoint::Ipc("/tmp/back.ipc".into()));
        assert_eq!(config.mode, Mode::Reactor);
        assert_eq!(config.demo_clients, 10);
        assert_eq!(config.demo_workers, 3);
    }

    #[test]
    fn rejects_same_endpoint_twice() {
        let err = parse(&["--frontend", "tcp://127.0.0.1:1", "--backend", "tcp://127.0.0.1:1"])
            .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--frontend", "localhost:5555"]).is_err());
        assert!(parse(&["--mode", "epoll"]).is_err());
        assert!(parse(&["--max-frame-bytes", "0"]).is_err());
        assert!(parse(&["--demo-interval-ms", "0"]).is_err());
    }
}
