//! Arbitrator transport
//!
//! One request, one verdict. The HTTP implementation bounds every exchange
//! with the configured read timeout.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::{ArbitrationError, ArbitrationResult};
use super::wire::{ArbitrationRequest, ArbitrationResponse};
use crate::config::ArbitrationConfig;

#[async_trait]
pub trait ArbitratorTransport: Send + Sync {
    async fn send(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationResponse>;
}

/// JSON over HTTP to `<url>/arbitrator`.
pub struct HttpArbitratorTransport {
    endpoint: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpArbitratorTransport {
    pub fn new(config: &ArbitrationConfig) -> ArbitrationResult<Self> {
        if config.url.trim().is_empty() {
            return Err(ArbitrationError::NotConfigured);
        }
        Ok(Self {
            endpoint: config.endpoint(),
            timeout: Duration::from_millis(config.read_timeout_ms),
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ArbitratorTransport for HttpArbitratorTransport {
    async fn send(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| ArbitrationError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArbitrationError::Status(status.as_u16()));
        }

        response
            .json::<ArbitrationResponse>()
            .await
            .map_err(|e| ArbitrationError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request() -> ArbitrationRequest {
        ArbitrationRequest {
            uuid: "run-1".to_string(),
            secret: "s3cr3t".to_string(),
            cluster: "shard1".to_string(),
            master: "db1:3306".to_string(),
            id: 1,
            status: "active".to_string(),
            hosts: 3,
            failed: 2,
        }
    }

    fn config(url: String) -> ArbitrationConfig {
        ArbitrationConfig {
            enabled: true,
            url,
            read_timeout_ms: 2000,
            ..ArbitrationConfig::default()
        }
    }

    #[test]
    fn test_empty_url_is_not_configured() {
        let result = HttpArbitratorTransport::new(&ArbitrationConfig::default());
        assert!(matches!(result, Err(ArbitrationError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_posts_claim_and_reads_verdict() {
        let app = Router::new().route(
            "/arbitrator",
            post(|Json(claim): Json<ArbitrationRequest>| async move {
                let verdict = if claim.secret == "s3cr3t" {
                    ArbitrationResponse::winner(claim.master)
                } else {
                    ArbitrationResponse::loser("")
                };
                Json(verdict)
            }),
        );
        let url = serve(app).await;
        let transport = HttpArbitratorTransport::new(&config(url.clone())).unwrap();
        assert_eq!(transport.endpoint(), format!("{}/arbitrator", url));

        let verdict = transport.send(&request()).await.unwrap();
        assert!(verdict.is_winner());
        assert_eq!(verdict.master, "db1:3306");
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let app = Router::new().route(
            "/arbitrator",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let url = serve(app).await;
        let transport = HttpArbitratorTransport::new(&config(url)).unwrap();

        let result = transport.send(&request()).await;
        assert_eq!(result, Err(ArbitrationError::Status(503)));
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid() {
        let app = Router::new().route("/arbitrator", post(|| async { "not json" }));
        let url = serve(app).await;
        let transport = HttpArbitratorTransport::new(&config(url)).unwrap();

        let result = transport.send(&request()).await;
        assert!(matches!(result, Err(ArbitrationError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpArbitratorTransport::new(&config(format!("http://{}", addr))).unwrap();
        let result = transport.send(&request()).await;
        assert!(matches!(result, Err(ArbitrationError::Unreachable(_))));
    }
}
