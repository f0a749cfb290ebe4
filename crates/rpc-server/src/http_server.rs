//! HTTP Server
//!
//! Routes:
//! - POST /tasks/process
//! - POST /attestations/submit
//! - GET  /results/get?taskId=<id>
//! - GET  /attestations/get?taskId=<id>
//! - GET  /leader/current
//! - GET  /leader/schedule?count=<n>
//! - GET  /status

use crate::methods::{
    handle_current_leader, handle_get_attestations, handle_get_result, handle_leader_schedule,
    handle_process_task, handle_status, handle_submit_attestation, CurrentLeaderResponse,
    GetAttestationsResponse, GetResultResponse, ProcessTaskRequest, ProcessTaskResponse, RpcError,
    ScheduleEntry, ScheduleQuery, StatusResponse, SubmitAttestationRequest,
    SubmitAttestationResponse, TaskQuery,
};
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coproc_runtime::Coordinator;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// HTTP server over a shared coordinator
pub struct HttpServer {
    context: Arc<Coordinator>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(context: Arc<Coordinator>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/tasks/process", post(process_task))
            .route("/attestations/submit", post(submit_attestation))
            .route("/attestations/get", get(get_attestations))
            .route("/results/get", get(get_result))
            .route("/leader/current", get(current_leader))
            .route("/leader/schedule", get(leader_schedule))
            .route("/status", get(status))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server until `shutdown` resolves
    pub async fn run<F>(self, addr: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP API listening on {}", addr);
        self.serve(listener, shutdown).await
    }

    /// Serve on a bound listener. Once `shutdown` resolves no new requests are
    /// accepted and the call returns after in-flight requests have finished.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("HTTP API stopped");
        Ok(())
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = match self {
            RpcError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            RpcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RpcError::NoLeader(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type Ctx = State<Arc<Coordinator>>;

async fn process_task(
    State(ctx): Ctx,
    Json(request): Json<ProcessTaskRequest>,
) -> Result<Json<ProcessTaskResponse>, RpcError> {
    handle_process_task(&ctx, request).map(Json)
}

async fn submit_attestation(
    State(ctx): Ctx,
    Json(request): Json<SubmitAttestationRequest>,
) -> Result<Json<SubmitAttestationResponse>, RpcError> {
    handle_submit_attestation(&ctx, request).map(Json)
}

async fn get_attestations(
    State(ctx): Ctx,
    Query(query): Query<TaskQuery>,
) -> Result<Json<GetAttestationsResponse>, RpcError> {
    handle_get_attestations(&ctx, query).map(Json)
}

async fn get_result(
    State(ctx): Ctx,
    Query(query): Query<TaskQuery>,
) -> Result<Json<GetResultResponse>, RpcError> {
    handle_get_result(&ctx, query).map(Json)
}

async fn current_leader(State(ctx): Ctx) -> Result<Json<CurrentLeaderResponse>, RpcError> {
    handle_current_leader(&ctx).map(Json)
}

async fn leader_schedule(
    State(ctx): Ctx,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Vec<ScheduleEntry>>, RpcError> {
    handle_leader_schedule(&ctx, query).map(Json)
}

async fn status(State(ctx): Ctx) -> Json<StatusResponse> {
    Json(handle_status(&ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use coproc_consensus::{elect_leader, ElectionRound, ManualClock};
    use coproc_runtime::{
        ComputeGateway, CoordinatorConfig, GatewayError, GatewayRequest, GatewayResponse,
    };
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct EchoGateway;

    #[async_trait]
    impl ComputeGateway for EchoGateway {
        async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
            Ok(GatewayResponse {
                result: format!("computed:{}", request.encrypted_data),
                status: "success".to_string(),
                task_id: String::new(),
            })
        }

        fn endpoint(&self) -> &str {
            "mock://echo"
        }
    }

    const VALIDATORS: [&str; 3] = ["V1", "V2", "V3"];

    fn leader() -> String {
        let set: Vec<String> = VALIDATORS.iter().map(|s| s.to_string()).collect();
        elect_leader(ElectionRound(42), &set).unwrap()
    }

    fn coordinator(local_id: &str) -> Arc<Coordinator> {
        let config = CoordinatorConfig {
            local_id: local_id.to_string(),
            validators: VALIDATORS.iter().map(|s| s.to_string()).collect(),
            round_window_secs: 100,
            dispatch_timeout: Duration::from_secs(5),
        };
        Arc::new(Coordinator::new(
            config,
            Arc::new(EchoGateway),
            Arc::new(ManualClock::new(4_250)),
        ))
    }

    async fn call(ctx: &Arc<Coordinator>, request: Request<Body>) -> (StatusCode, Value) {
        let response = HttpServer::new(ctx.clone())
            .router()
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_poll_on_leader() {
        let ctx = coordinator(&leader());

        let (status, body) = call(
            &ctx,
            post_json(
                "/tasks/process",
                json!({"taskId": "T1", "encryptedData": "abc", "caller": "0xcaller"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["taskId"], "T1");
        assert_eq!(body["leader"], leader());
        assert_eq!(body["isLeader"], true);
        assert_eq!(body["status"], "submitted");

        ctx.wait_for_dispatches().await;

        let (status, body) = call(&ctx, get("/results/get?taskId=T1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["result"], "computed:abc");
    }

    #[tokio::test]
    async fn test_submit_on_follower() {
        let follower = VALIDATORS.iter().find(|v| **v != leader()).unwrap();
        let ctx = coordinator(follower);

        let (_, body) = call(
            &ctx,
            post_json("/tasks/process", json!({"taskId": "T1", "encryptedData": "abc"})),
        )
        .await;
        assert_eq!(body["isLeader"], false);
        assert_eq!(body["leader"], leader());

        let (_, body) = call(&ctx, get("/results/get?taskId=T1")).await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["result"], "");
    }

    #[tokio::test]
    async fn test_generated_task_id() {
        let ctx = coordinator("V1");
        let (status, body) =
            call(&ctx, post_json("/tasks/process", json!({"encryptedData": "abc"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["taskId"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_result_requires_task_id() {
        let ctx = coordinator("V1");
        let (status, body) = call(&ctx, get("/results/get")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "taskId parameter required");
    }

    #[tokio::test]
    async fn test_attestation_flow() {
        let ctx = coordinator("V1");

        let (status, body) = call(
            &ctx,
            post_json(
                "/attestations/submit",
                json!({"taskId": "T1", "validator": "V2", "attestation": "ok", "timestamp": 5}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");

        let (status, _) = call(
            &ctx,
            post_json(
                "/attestations/submit",
                json!({"taskId": "T1", "validator": "0xintruder", "attestation": "bad"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, body) = call(&ctx, get("/attestations/get?taskId=T1")).await;
        assert_eq!(body["attestations"], json!({"V2": "ok"}));
    }

    #[tokio::test]
    async fn test_leader_and_status() {
        let ctx = coordinator("V1");

        let (status, body) = call(&ctx, get("/leader/current")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currentRound"], 42);
        assert_eq!(body["leader"], leader());
        assert_eq!(body["me"], "V1");
        assert_eq!(body["isLeader"], leader() == "V1");

        let (_, body) = call(&ctx, get("/status")).await;
        assert_eq!(body["address"], "V1");
        assert_eq!(body["role"], if leader() == "V1" { "leader" } else { "validator" });
        assert_eq!(body["currentRound"], 42);
        assert_eq!(body["totalTasks"], 0);
        assert_eq!(body["totalAttestations"], 0);
        assert_eq!(body["endpoint"], "mock://echo");
    }

    #[tokio::test]
    async fn test_serve_stops_accepting_after_shutdown() {
        let ctx = coordinator(&leader());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(HttpServer::new(ctx.clone()).serve(listener, async move {
            let _ = stop_rx.await;
        }));

        tokio::net::TcpStream::connect(addr).await.unwrap();

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        assert_eq!(ctx.wait_for_dispatches().await, 0);
        assert_eq!(ctx.status().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_leader_schedule() {
        let ctx = coordinator("V1");

        let (status, body) = call(&ctx, get("/leader/schedule?count=3")).await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["round"], 42);
        assert_eq!(entries[0]["leader"], leader());

        let (status, _) = call(&ctx, get("/leader/schedule?count=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
