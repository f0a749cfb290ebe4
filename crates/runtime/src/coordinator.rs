//! Coordinator - owns the registry, election, task table and attestation pool
//!
//! Submissions consult the election; only the current leader dispatches. A
//! dispatch is a spawned future whose handle is recorded, so the periodic
//! sync and shutdown can wait for every in-flight gateway call. No lock is
//! held while the gateway is being called.

use crate::gateway::{ComputeGateway, GatewayError, GatewayRequest, GatewayResponse};
use crate::task_store::{generate_task_id, TaskResult, TaskState, TaskStore};
use coproc_consensus::{
    Attestation, AttestationError, AttestationPool, Clock, ElectionError, ElectionRound,
    LeaderElection, NodeRole, TaskId, ValidatorId, ValidatorRegistry, DEFAULT_ROUND_WINDOW_SECS,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Default timeout for a single gateway call
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the completed-result broadcast channel
const RESULT_CHANNEL_CAPACITY: usize = 1000;

/// Coordinator errors surfaced to callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error(transparent)]
    Election(#[from] ElectionError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This node's identity
    pub local_id: ValidatorId,
    /// Configured validators (the local identity is always added)
    pub validators: Vec<ValidatorId>,
    /// Election round length in seconds
    pub round_window_secs: u64,
    /// Timeout for a single gateway call
    pub dispatch_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            local_id: String::new(),
            validators: Vec::new(),
            round_window_secs: DEFAULT_ROUND_WINDOW_SECS,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

/// Result of a task submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub task_id: TaskId,
    pub round: ElectionRound,
    /// Leader elected for the round
    pub leader: ValidatorId,
    /// False means the caller should route to `leader` instead
    pub is_local_leader: bool,
    /// Whether this submission started a gateway call
    pub dispatched: bool,
}

/// Current leader as seen by this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderView {
    pub round: ElectionRound,
    pub leader: ValidatorId,
    pub local_id: ValidatorId,
    pub is_local_leader: bool,
}

/// Node status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub local_id: ValidatorId,
    pub role: NodeRole,
    pub is_local_leader: bool,
    pub round: ElectionRound,
    pub total_tasks: usize,
    pub total_attestation_sets: usize,
    pub gateway_endpoint: String,
}

/// Published by the leader when a task completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCompleted {
    pub task_id: TaskId,
    pub result: String,
    pub leader: ValidatorId,
}

/// Coordination core for one validator node
pub struct Coordinator {
    registry: ValidatorRegistry,
    election: LeaderElection,
    tasks: TaskStore,
    attestations: AttestationPool,
    gateway: Arc<dyn ComputeGateway>,
    clock: Arc<dyn Clock>,
    dispatch_timeout: Duration,
    /// Handles of spawned gateway calls not yet joined
    dispatches: Mutex<Vec<JoinHandle<()>>>,
    results_tx: broadcast::Sender<TaskCompleted>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        gateway: Arc<dyn ComputeGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = ValidatorRegistry::new(config.local_id, config.validators);
        let election = LeaderElection::new(clock.clone(), config.round_window_secs);
        let (results_tx, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);

        Self {
            registry,
            election,
            tasks: TaskStore::new(),
            attestations: AttestationPool::new(),
            gateway,
            clock,
            dispatch_timeout: config.dispatch_timeout,
            dispatches: Mutex::new(Vec::new()),
            results_tx,
        }
    }

    /// This node's identity
    pub fn local_id(&self) -> &str {
        self.registry.local_id()
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn election(&self) -> &LeaderElection {
        &self.election
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    fn now(&self) -> i64 {
        self.clock.unix_seconds() as i64
    }

    /// Submit a task
    ///
    /// The task is always recorded. If this node leads the current round and
    /// the task has not been claimed yet, a gateway call is spawned. Must be
    /// called from within a Tokio runtime.
    pub fn submit_task(
        &self,
        task_id: Option<TaskId>,
        payload: String,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        let now = self.now();
        let task_id = task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_task_id(&payload, now));

        self.tasks.submit(&task_id, payload, now);
        let election = self.election.evaluate(&self.registry)?;

        let mut dispatched = false;
        if election.is_local_leader {
            if let Some(payload) = self.tasks.claim_dispatch(&task_id) {
                self.spawn_dispatch(task_id.clone(), payload, election.leader.clone());
                dispatched = true;
            }
        } else {
            tracing::debug!(
                "Not leader for round {}, task {} should go to {}",
                election.round,
                task_id,
                election.leader
            );
        }

        Ok(SubmitOutcome {
            task_id,
            round: election.round,
            leader: election.leader,
            is_local_leader: election.is_local_leader,
            dispatched,
        })
    }

    fn spawn_dispatch(&self, task_id: TaskId, payload: String, leader: ValidatorId) {
        let tasks = self.tasks.clone();
        let gateway = self.gateway.clone();
        let clock = self.clock.clone();
        let results_tx = self.results_tx.clone();
        let timeout = self.dispatch_timeout;
        let request = GatewayRequest::new(payload, leader.clone(), self.now());

        tracing::info!("Dispatching task {} to {}", task_id, gateway.endpoint());

        // Held across spawn and push so a concurrent join never misses this call
        let mut dispatches = self.dispatches.lock();
        dispatches.retain(|h| !h.is_finished());
        dispatches.push(tokio::spawn(async move {
            let outcome = call_gateway(gateway.as_ref(), request, timeout).await;
            let now = clock.unix_seconds() as i64;

            match outcome {
                Ok(response) => {
                    let gateway_task_id =
                        Some(response.task_id).filter(|id| !id.is_empty());
                    if tasks.complete(&task_id, response.result.clone(), gateway_task_id, now) {
                        tracing::info!(
                            "Task {} completed by leader {}, ready for attestation",
                            task_id,
                            leader
                        );
                        // No subscribers is fine
                        let _ = results_tx.send(TaskCompleted {
                            task_id,
                            result: response.result,
                            leader,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Dispatch of task {} failed: {}", task_id, e);
                    tasks.fail(&task_id, e.to_string(), now);
                }
            }
        }));
    }

    /// Wait for every gateway call spawned so far. Returns how many were joined.
    pub async fn wait_for_dispatches(&self) -> usize {
        let handles = std::mem::take(&mut *self.dispatches.lock());
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Dispatch task aborted: {}", e);
            }
        }
        count
    }

    /// Number of gateway calls still running
    pub fn pending_dispatches(&self) -> usize {
        self.dispatches
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Result of a task; never waits on an in-flight dispatch
    pub fn get_result(&self, task_id: &str) -> TaskResult {
        self.tasks.result(task_id)
    }

    /// Record an attestation from a registered validator
    pub fn submit_attestation(
        &self,
        task_id: &str,
        validator_id: &str,
        payload: String,
        timestamp: Option<i64>,
        signature: Option<String>,
    ) -> Result<(), CoordinatorError> {
        let mut attestation = Attestation::new(payload, timestamp.unwrap_or_else(|| self.now()));
        attestation.signature = signature;
        self.attestations
            .submit(&self.registry, task_id, validator_id, attestation)?;
        Ok(())
    }

    /// Attestation payloads for a task, keyed by validator
    pub fn get_attestations(&self, task_id: &str) -> HashMap<ValidatorId, String> {
        self.attestations.get(task_id)
    }

    /// Full attestation records for a task
    pub fn get_attestation_records(&self, task_id: &str) -> HashMap<ValidatorId, Attestation> {
        self.attestations.get_detailed(task_id)
    }

    /// Evaluate the election for the current round
    pub fn current_leader(&self) -> Result<LeaderView, CoordinatorError> {
        let election = self.election.evaluate(&self.registry)?;
        Ok(LeaderView {
            round: election.round,
            leader: election.leader,
            local_id: self.local_id().to_string(),
            is_local_leader: election.is_local_leader,
        })
    }

    /// Upcoming leaders, starting with the current round
    pub fn leader_schedule(
        &self,
        count: usize,
    ) -> Result<Vec<(ElectionRound, ValidatorId)>, CoordinatorError> {
        let from = self.election.current_round();
        Ok(self.election.schedule(&self.registry, from, count)?)
    }

    /// Status snapshot
    pub fn status(&self) -> NodeStatus {
        let (round, role) = match self.election.evaluate(&self.registry) {
            Ok(election) => (election.round, election.role()),
            Err(_) => (self.election.cached().round, NodeRole::Validator),
        };

        NodeStatus {
            local_id: self.local_id().to_string(),
            role,
            is_local_leader: role == NodeRole::Leader,
            round,
            total_tasks: self.tasks.len(),
            total_attestation_sets: self.attestations.task_count(),
            gateway_endpoint: self.gateway.endpoint().to_string(),
        }
    }

    /// Subscribe to completed results published by this node as leader
    pub fn subscribe_results(&self) -> broadcast::Receiver<TaskCompleted> {
        self.results_tx.subscribe()
    }

    /// One sync step: join outstanding dispatches, then re-evaluate the election
    pub async fn sync_once(&self) {
        let joined = self.wait_for_dispatches().await;
        if joined > 0 {
            tracing::debug!("Joined {} dispatches before re-election", joined);
        }
        if let Err(e) = self.election.evaluate(&self.registry) {
            tracing::warn!("Periodic re-election failed: {}", e);
        }
    }

    /// Run `sync_once` on a fixed interval until `shutdown` flips to true
    ///
    /// A sync step in progress is finished before the loop exits.
    pub async fn run_sync_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sync_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Sync loop stopped");
    }

    /// Count of tasks per state
    pub fn task_counts(&self) -> HashMap<TaskState, usize> {
        [
            TaskState::Submitted,
            TaskState::Dispatched,
            TaskState::Completed,
            TaskState::Failed,
        ]
        .into_iter()
        .map(|state| (state, self.tasks.count_in_state(state)))
        .collect()
    }
}

/// Call the gateway with a timeout, treating a body-level failure as an error
async fn call_gateway(
    gateway: &dyn ComputeGateway,
    request: GatewayRequest,
    timeout: Duration,
) -> Result<GatewayResponse, GatewayError> {
    let response = tokio::time::timeout(timeout, gateway.execute(request))
        .await
        .map_err(|_| GatewayError::Timeout(timeout))??;

    if response.is_failure() {
        return Err(GatewayError::Rejected(response.result));
    }
    Ok(response)
}
