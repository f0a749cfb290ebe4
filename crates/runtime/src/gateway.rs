//! Compute gateway - the external endpoint that executes encrypted payloads
//!
//! The leader POSTs `{encryptedData, leader, timestamp, type}` and expects
//! `{result, status, taskId}` back. A body that does not parse is not an
//! error: the raw body becomes the result.

use crate::task_store::generate_task_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Request kind sent with every dispatch
pub const ENCRYPTED_EXECUTION: &str = "encrypted_execution";

/// Gateway call errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway did not respond within {0:?}")]
    Timeout(Duration),

    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected the task: {0}")]
    Rejected(String),
}

/// Outbound dispatch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub encrypted_data: String,
    /// Identity of the leader making the call
    pub leader: String,
    /// Unix seconds at dispatch
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl GatewayRequest {
    pub fn new(encrypted_data: impl Into<String>, leader: impl Into<String>, timestamp: i64) -> Self {
        Self {
            encrypted_data: encrypted_data.into(),
            leader: leader.into(),
            timestamp,
            kind: ENCRYPTED_EXECUTION.to_string(),
        }
    }
}

/// Gateway response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub result: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub task_id: String,
}

impl GatewayResponse {
    /// Whether the gateway reported a failure in the body
    pub fn is_failure(&self) -> bool {
        ["error", "failed", "failure"]
            .iter()
            .any(|s| self.status.eq_ignore_ascii_case(s))
    }
}

/// Decode a gateway body, falling back to the raw text
///
/// The fallback synthesizes a gateway task id from the payload and dispatch
/// time.
pub fn parse_response(body: &[u8], request: &GatewayRequest) -> GatewayResponse {
    match serde_json::from_slice::<GatewayResponse>(body) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Gateway body is not a structured response ({}), using raw body", e);
            GatewayResponse {
                result: String::from_utf8_lossy(body).into_owned(),
                status: "success".to_string(),
                task_id: generate_task_id(&request.encrypted_data, request.timestamp),
            }
        }
    }
}

/// External compute endpoint
#[async_trait]
pub trait ComputeGateway: Send + Sync {
    /// Execute a payload
    async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;

    /// Endpoint description, for status reporting
    fn endpoint(&self) -> &str;
}

/// Gateway reached over HTTP
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpGateway {
    /// Create a gateway client with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ComputeGateway for HttpGateway {
    async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(parse_response(&body, &request))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/run", addr)
    }

    fn request() -> GatewayRequest {
        GatewayRequest::new("encrypted_program_logic_123", "0xleader", 1_700_000_000)
    }

    #[test]
    fn test_request_wire_format() {
        let value = serde_json::to_value(request()).unwrap();
        assert_eq!(
            value,
            json!({
                "encryptedData": "encrypted_program_logic_123",
                "leader": "0xleader",
                "timestamp": 1_700_000_000,
                "type": "encrypted_execution",
            })
        );
    }

    #[test]
    fn test_parse_structured() {
        let body = br#"{"result":"42","status":"success","taskId":"abc"}"#;
        let response = parse_response(body, &request());
        assert_eq!(response.result, "42");
        assert_eq!(response.task_id, "abc");
        assert!(!response.is_failure());
    }

    #[test]
    fn test_parse_raw_fallback() {
        let req = request();
        let response = parse_response(b"raw42", &req);
        assert_eq!(response.result, "raw42");
        assert_eq!(response.status, "success");
        assert_eq!(response.task_id, generate_task_id(&req.encrypted_data, req.timestamp));
    }

    #[test]
    fn test_parse_object_without_result_falls_back() {
        let response = parse_response(br#"{"output":1}"#, &request());
        assert_eq!(response.result, r#"{"output":1}"#);
    }

    #[test]
    fn test_failure_status() {
        let body = br#"{"result":"boom","status":"error"}"#;
        assert!(parse_response(body, &request()).is_failure());
    }

    #[tokio::test]
    async fn test_http_structured_response() {
        let router = Router::new().route(
            "/run",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["type"], "encrypted_execution");
                Json(json!({
                    "result": format!("done:{}", body["encryptedData"].as_str().unwrap()),
                    "status": "success",
                    "taskId": "gw-1",
                }))
            }),
        );
        let endpoint = serve(router).await;
        let gateway = HttpGateway::new(endpoint.clone(), Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.endpoint(), endpoint);

        let response = gateway.execute(request()).await.unwrap();
        assert_eq!(response.result, "done:encrypted_program_logic_123");
        assert_eq!(response.task_id, "gw-1");
    }

    #[tokio::test]
    async fn test_http_raw_body() {
        let router = Router::new().route("/run", post(|| async { "raw42" }));
        let gateway = HttpGateway::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let response = gateway.execute(request()).await.unwrap();
        assert_eq!(response.result, "raw42");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let router = Router::new().route(
            "/run",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "exploded") }),
        );
        let gateway = HttpGateway::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = gateway.execute(request()).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Status {
                status: 500,
                body: "exploded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let router = Router::new().route(
            "/run",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let gateway = HttpGateway::new(serve(router).await, Duration::from_millis(100)).unwrap();

        let err = gateway.execute(request()).await.unwrap_err();
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_http_unreachable() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway =
            HttpGateway::new(format!("http://{}/run", addr), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            gateway.execute(request()).await,
            Err(GatewayError::Transport(_))
        ));
    }
}
