//! Broker metrics.
//!
//! With the `metrics` feature, [`init`] registers the instruments on an
//! OpenTelemetry [`Meter`](opentelemetry::metrics::Meter) supplied by the
//! application. Without it every function here compiles to a no-op. Calls made
//! before [`init`] are dropped.

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static REQUESTS_DISPATCHED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REPLIES_FORWARDED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static READY_SIGNALS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static DROPPED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static READY_WORKERS: OnceLock<UpDownCounter<i64>> = OnceLock::new();

/// Registers the broker's instruments. Only the first call has any effect.
#[cfg(feature = "metrics")]
pub fn init(meter: &Meter) {
    let _ = REQUESTS_DISPATCHED.set(
        meter
            .u64_counter("requests_dispatched")
            .with_description("Client requests handed to a ready worker")
            .build(),
    );

    let _ = REPLIES_FORWARDED.set(
        meter
            .u64_counter("replies_forwarded")
            .with_description("Worker replies forwarded to clients")
            .build(),
    );

    let _ = READY_SIGNALS.set(
        meter
            .u64_counter("ready_signals")
            .with_description("READY sentinels received from workers")
            .build(),
    );

    let _ = DROPPED.set(
        meter
            .u64_counter("dropped")
            .with_description("Malformed or undeliverable messages discarded")
            .build(),
    );

    let _ = READY_WORKERS.set(
        meter
            .i64_up_down_counter("ready_workers")
            .with_description("Workers waiting in the ready queue")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_requests_dispatched() {
    if let Some(counter) = REQUESTS_DISPATCHED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests_dispatched() {}

#[cfg(feature = "metrics")]
pub fn increment_replies_forwarded() {
    if let Some(counter) = REPLIES_FORWARDED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_replies_forwarded() {}

#[cfg(feature = "metrics")]
pub fn increment_ready_signals() {
    if let Some(counter) = READY_SIGNALS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_ready_signals() {}

#[cfg(feature = "metrics")]
pub fn increment_dropped() {
    if let Some(counter) = DROPPED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_dropped() {}

#[cfg(feature = "metrics")]
pub fn adjust_ready_workers(delta: i64) {
    if let Some(counter) = READY_WORKERS.get() {
        counter.add(delta, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn adjust_ready_workers(_delta: i64) {}
