//! Prometheus scrape endpoint

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use crate::collector::MetricsCollector;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Serves `GET /metrics` and nothing else
pub struct MetricsServer {
    collector: Arc<MetricsCollector>,
    addr: String,
}

impl MetricsServer {
    pub fn new(collector: Arc<MetricsCollector>, addr: String) -> Self {
        Self { collector, addr }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(scrape))
            .with_state(self.collector.clone())
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), MetricsServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| MetricsServerError::Bind {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(addr = %self.addr, "Metrics endpoint listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| MetricsServerError::Serve(e.to_string()))
    }
}

async fn scrape(State(collector): State<Arc<MetricsCollector>>) -> Response {
    match collector.export_metrics() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, error_type = "metrics", "Metrics export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("metrics server failed: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new());
        collector.record_order_submitted(100);
        let server = MetricsServer::new(collector, "127.0.0.1:0".to_string());

        let response = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("boostline_orders_submitted_total"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let server = MetricsServer::new(Arc::new(MetricsCollector::new()), "127.0.0.1:0".into());

        let response = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
