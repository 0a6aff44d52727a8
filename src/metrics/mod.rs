//! Watch health metrics.
//!
//! Background watch and resolve failures never reach the subscriber, so these
//! counters are the place to notice a path that stopped delivering.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref WATCH_FIRED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confsync_watch_fired_total", "Watches that fired, per path"),
        &["path"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_LOOP_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "confsync_watch_loop_failures_total",
            "Watch loops that terminated in the failed state, per path"
        ),
        &["path"]
    )
    .expect("metric can not be created");

    pub static ref RECONNECT_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "confsync_reconnect_attempts_total",
            "Session reconnect attempts made by watch loops, per path"
        ),
        &["path"]
    )
    .expect("metric can not be created");

    pub static ref DECODE_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confsync_decode_errors_total", "Payloads dropped as undecodable, per path"),
        &["path"]
    )
    .expect("metric can not be created");

    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("confsync_deliveries_total", "Snapshots handed to the subscriber, per path"),
        &["path"]
    )
    .expect("metric can not be created");

    /// Numeric `WatchState` of each watch loop
    pub static ref WATCH_STATE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("confsync_watch_state", "Current state of each watch loop"),
        &["path"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(WATCH_FIRED_TOTAL.clone()),
        Box::new(WATCH_LOOP_FAILURES_TOTAL.clone()),
        Box::new(RECONNECT_ATTEMPTS_TOTAL.clone()),
        Box::new(DECODE_ERRORS_TOTAL.clone()),
        Box::new(DELIVERIES_TOTAL.clone()),
        Box::new(WATCH_STATE.clone()),
    ];
    for c in collectors {
        if let Err(e) = registry.register(c) {
            error!("collector can not be registered: {}", e);
        }
    }
}

/// Render every sync metric in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::new()
    })
}
