use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use cdp_adapter::metrics as cdp_metrics;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use roundcast_event_bus::metrics as hub_metrics;
use roundcast_pipeline::metrics as pipeline_metrics;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        cdp_metrics::register_metrics(registry);
        pipeline_metrics::register_metrics(registry);
        hub_metrics::register_metrics(registry);
    });
}

/// Serves `/metrics` on `port`; `0` disables the endpoint.
pub fn spawn_metrics_server(port: u16) -> Option<JoinHandle<()>> {
    if port == 0 {
        return None;
    }

    register_metrics();
    let app = metrics_router();
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "metrics server listening");
    Some(tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    error!(?err, "metrics server exited with error");
                }
            }
            Err(err) => {
                error!(?err, "failed to bind metrics listener");
            }
        }
    }))
}

pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(global_registry().clone()))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    match render(&registry) {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(reason) => {
            error!(%reason, "failed to render prometheus metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}

fn render(registry: &Registry) -> Result<(HeaderValue, String), String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|err| err.to_string())?;
    let body = String::from_utf8(buffer).map_err(|err| err.to_string())?;
    let content_type =
        HeaderValue::from_str(encoder.format_type()).map_err(|err| err.to_string())?;
    Ok((content_type, body))
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}
