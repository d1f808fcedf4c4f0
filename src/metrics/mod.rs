use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref ACTIVE_SESSIONS: IntGauge =
        IntGauge::new("xtables_active_sessions", "Currently connected client sessions")
            .expect("metric can not be created");

    pub static ref RECEIVED_MESSAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("xtables_received_messages", "Frames received by the server, by method"),
        &["method"]
    )
    .expect("metric can not be created");

    pub static ref BROADCAST_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("xtables_broadcast_events", "Push events delivered to sessions, by kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref REQUEST_LATENCY_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("xtables_request_latency_ms", "Client request round trip in ms")
            .buckets(exponential_buckets(0.25, 2.0, 14).expect("valid buckets")),
        &["method"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(ACTIVE_SESSIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(RECEIVED_MESSAGES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(BROADCAST_EVENTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REQUEST_LATENCY_MS.clone()))
        .expect("collector can be registered");
}

/// Serves `/metrics` until the shutdown signal fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (addr, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        let _ = shutdown_signal.changed().await;
    });
    info!(%addr, "metrics server listening");
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text())
}

/// Text exposition of every registered collector.
pub fn gather_text() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
