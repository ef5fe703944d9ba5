use hyper::{
    Body, Request, Response, Server,
    service::{make_service_fn, service_fn},
};
use prometheus::{
    CounterVec, HistogramVec, Opts, Registry, register_counter_vec_with_registry,
    register_histogram_vec_with_registry,
};
use std::{convert::Infallible, net::SocketAddr};

/// Per-controller Prometheus metrics, gated behind the `metrics` feature
/// exactly as the reference operator gates its own `ControllerMetrics`.
pub struct ControllerMetrics {
    pub registry: Registry,
    pub reconcile_counter: CounterVec,
    pub action_counter: CounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(controller_name: &str) -> Self {
        let registry = Registry::new();
        let reconcile_counter = register_counter_vec_with_registry!(
            Opts::new(
                format!("{controller_name}_reconcile_total"),
                "Total number of reconciliations for a session."
            ),
            &["name", "namespace"],
            registry
        )
        .unwrap();
        let action_counter = register_counter_vec_with_registry!(
            Opts::new(
                format!("{controller_name}_action_total"),
                "Total number of times a given phase action was taken."
            ),
            &["name", "namespace", "action"],
            registry
        )
        .unwrap();
        let read_histogram = register_histogram_vec_with_registry!(
            format!("{controller_name}_read_seconds"),
            "Time spent determining the action to take.",
            &["name", "namespace", "action"],
            registry
        )
        .unwrap();
        let write_histogram = register_histogram_vec_with_registry!(
            format!("{controller_name}_write_seconds"),
            "Time spent applying the action to take.",
            &["name", "namespace", "action"],
            registry
        )
        .unwrap();
        ControllerMetrics {
            registry,
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }
}

async fn serve(req: Request<Body>, registry: std::sync::Arc<Registry>) -> Result<Response<Body>, Infallible> {
    if req.uri().path() != "/metrics" {
        return Ok(Response::builder()
            .status(404)
            .body(Body::from("not found"))
            .unwrap());
    }
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    Ok(Response::new(Body::from(buffer)))
}

/// Runs the `/metrics` scrape endpoint until the process exits. Intended to
/// be `tokio::spawn`-ed once at startup, mirroring the reference's
/// `metrics::run_server`.
pub async fn run_server(registry: Registry, port: u16) {
    let registry = std::sync::Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| serve(req, registry.clone()))) }
    });
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        eprintln!("metrics server error: {e}");
    }
}
