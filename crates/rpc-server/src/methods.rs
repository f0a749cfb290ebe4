//! RPC Methods - request/response types and handlers
//!
//! Handlers are plain functions over the coordinator; the HTTP layer only
//! extracts parameters and maps errors to status codes.

use coproc_consensus::NodeRole;
use coproc_runtime::{Coordinator, CoordinatorError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Upper bound for schedule queries
pub const MAX_SCHEDULE_ROUNDS: usize = 100;

/// RPC errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NoLeader(String),
}

impl From<CoordinatorError> for RpcError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Election(e) => RpcError::NoLeader(e.to_string()),
            CoordinatorError::Attestation(e) => RpcError::Unauthorized(e.to_string()),
        }
    }
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTaskRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    pub encrypted_data: String,
    #[serde(default)]
    pub caller: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTaskResponse {
    pub task_id: String,
    pub leader: String,
    pub is_leader: bool,
    pub status: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResultResponse {
    pub task_id: String,
    pub result: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttestationRequest {
    pub task_id: String,
    pub validator: String,
    pub attestation: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAttestationResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAttestationsResponse {
    pub task_id: String,
    pub attestations: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLeaderResponse {
    pub current_round: u64,
    pub leader: String,
    pub me: String,
    pub is_leader: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScheduleQuery {
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub round: u64,
    pub leader: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub address: String,
    pub role: NodeRole,
    pub is_leader: bool,
    pub current_round: u64,
    pub total_tasks: usize,
    pub total_attestations: usize,
    pub endpoint: String,
}

// ============ RPC Handlers ============

fn required_task_id(query: TaskQuery) -> Result<String, RpcError> {
    query
        .task_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RpcError::InvalidParams("taskId parameter required".to_string()))
}

/// Handle task submission
pub fn handle_process_task(
    ctx: &Coordinator,
    request: ProcessTaskRequest,
) -> Result<ProcessTaskResponse, RpcError> {
    tracing::debug!(
        "Task submission from {}",
        request.caller.as_deref().unwrap_or("unknown caller")
    );

    let outcome = ctx.submit_task(request.task_id, request.encrypted_data)?;

    Ok(ProcessTaskResponse {
        task_id: outcome.task_id,
        leader: outcome.leader,
        is_leader: outcome.is_local_leader,
        status: "submitted".to_string(),
    })
}

/// Handle result query
pub fn handle_get_result(ctx: &Coordinator, query: TaskQuery) -> Result<GetResultResponse, RpcError> {
    let task_id = required_task_id(query)?;
    let result = ctx.get_result(&task_id);

    Ok(GetResultResponse {
        status: result.status().to_string(),
        result: result.result.unwrap_or_default(),
        task_id,
    })
}

/// Handle attestation submission
pub fn handle_submit_attestation(
    ctx: &Coordinator,
    request: SubmitAttestationRequest,
) -> Result<SubmitAttestationResponse, RpcError> {
    ctx.submit_attestation(
        &request.task_id,
        &request.validator,
        request.attestation,
        request.timestamp,
        request.signature,
    )?;

    Ok(SubmitAttestationResponse {
        status: "accepted".to_string(),
    })
}

/// Handle attestation query
pub fn handle_get_attestations(
    ctx: &Coordinator,
    query: TaskQuery,
) -> Result<GetAttestationsResponse, RpcError> {
    let task_id = required_task_id(query)?;
    Ok(GetAttestationsResponse {
        attestations: ctx.get_attestations(&task_id),
        task_id,
    })
}

/// Handle current leader query
pub fn handle_current_leader(ctx: &Coordinator) -> Result<CurrentLeaderResponse, RpcError> {
    let view = ctx.current_leader()?;
    Ok(CurrentLeaderResponse {
        current_round: view.round.as_u64(),
        leader: view.leader,
        me: view.local_id,
        is_leader: view.is_local_leader,
    })
}

/// Handle leader schedule query
pub fn handle_leader_schedule(
    ctx: &Coordinator,
    query: ScheduleQuery,
) -> Result<Vec<ScheduleEntry>, RpcError> {
    let count = query.count.unwrap_or(5);
    if count == 0 || count > MAX_SCHEDULE_ROUNDS {
        return Err(RpcError::InvalidParams(format!(
            "count must be between 1 and {}",
            MAX_SCHEDULE_ROUNDS
        )));
    }

    Ok(ctx
        .leader_schedule(count)?
        .into_iter()
        .map(|(round, leader)| ScheduleEntry {
            round: round.as_u64(),
            leader,
        })
        .collect())
}

/// Handle status query
pub fn handle_status(ctx: &Coordinator) -> StatusResponse {
    let status = ctx.status();
    StatusResponse {
        address: status.local_id,
        role: status.role,
        is_leader: status.is_local_leader,
        current_round: status.round.as_u64(),
        total_tasks: status.total_tasks,
        total_attestations: status.total_attestation_sets,
        endpoint: status.gateway_endpoint,
    }
}
