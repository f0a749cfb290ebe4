//! Coprocessor runtime - task lifecycle and gateway dispatch
//!
//! This crate provides the node-local execution side of the coprocessor:
//! - Task table with at-most-once dispatch
//! - Compute gateway trait and its HTTP client
//! - Coordinator tying election, tasks and attestations together

pub mod coordinator;
pub mod gateway;
pub mod task_store;

pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorError, LeaderView, NodeStatus, SubmitOutcome,
    TaskCompleted, DEFAULT_DISPATCH_TIMEOUT,
};
pub use gateway::{
    parse_response, ComputeGateway, GatewayError, GatewayRequest, GatewayResponse, HttpGateway,
};
pub use task_store::{generate_task_id, Task, TaskResult, TaskState, TaskStore};

/// Default interval of the periodic re-election
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
