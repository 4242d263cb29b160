use crate::binder::Binder;
use crate::filter::FeasibilityFilter;
use crate::inventory::DeviceInventory;
use crate::score::{select_device, ScoringEngine, ScoringPolicy};
use crate::types::{FilterOutcome, ScoreResult};
use crate::{Result, SchedulerError};
use gpushare_core::{Allocation, AllocationId, AllocationRequest, GpushareError, PodKey};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Node scoring policy
    pub policy: ScoringPolicy,
    /// How long a filtered request is remembered for a later bind
    pub attempt_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: ScoringPolicy::BinPack,
            attempt_ttl: Duration::from_secs(600),
        }
    }
}

/// Progress of one pod's scheduling attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptState {
    Received,
    Filtered,
    Scored,
    BindAttempted,
    Bound,
    Rejected,
}

struct Attempt {
    /// None for pods passed through without a GPU share
    request: Option<AllocationRequest>,
    state: AttemptState,
    updated_at: Instant,
}

/// Filter, score and bind pipeline over a device inventory
pub struct Scheduler {
    inventory: Arc<dyn DeviceInventory>,
    config: SchedulerConfig,
    filter: FeasibilityFilter,
    scoring: ScoringEngine,
    binder: Binder,
    attempts: RwLock<HashMap<PodKey, Attempt>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(inventory: Arc<dyn DeviceInventory>, config: SchedulerConfig) -> Self {
        Self {
            binder: Binder::new(inventory.clone()),
            filter: FeasibilityFilter::default(),
            scoring: ScoringEngine::new(config.policy),
            inventory,
            config,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// Active scoring policy
    pub fn policy(&self) -> ScoringPolicy {
        self.config.policy
    }

    /// Nodes that can host the request, and why the others cannot
    pub fn filter(&self, request: &AllocationRequest, candidates: &[String]) -> Result<FilterOutcome> {
        request.validate()?;
        self.record(&request.pod, Some(request.clone()), AttemptState::Received);

        let snapshot = self.inventory.snapshot(candidates);
        let outcome = self.filter.filter(candidates, request, &snapshot);

        info!(
            "Filtered pod {}: {} of {} nodes feasible",
            request.pod,
            outcome.nodes.len(),
            candidates.len()
        );

        let state = if outcome.is_empty() {
            AttemptState::Rejected
        } else {
            AttemptState::Filtered
        };
        self.transition(&request.pod, state);

        Ok(outcome)
    }

    /// Score every candidate; infeasible candidates score 0
    pub fn prioritize(
        &self,
        request: &AllocationRequest,
        candidates: &[String],
    ) -> Result<Vec<ScoreResult>> {
        request.validate()?;
        if self.attempt_state(&request.pod).is_none() {
            self.record(&request.pod, Some(request.clone()), AttemptState::Received);
        }

        let snapshot = self.inventory.snapshot(candidates);
        let outcome = self.filter.filter(candidates, request, &snapshot);

        let mut scores = self.scoring.score(&outcome.nodes, request, &snapshot);
        scores.extend(
            outcome
                .failed
                .keys()
                .map(|name| ScoreResult::new(name.clone(), 0)),
        );

        self.transition(&request.pod, AttemptState::Scored);

        Ok(scores)
    }

    /// Bind a previously filtered pod to a node
    pub fn bind(&self, pod: &PodKey, node: &str) -> Result<Allocation> {
        if let Some(existing) = self.inventory.allocation_for(pod) {
            if existing.node == node {
                info!("Pod {} already bound to {}", pod, node);
                self.transition(pod, AttemptState::Bound);
                return Ok(existing);
            }
            return Err(SchedulerError::AlreadyBound {
                pod: pod.to_string(),
                node: existing.node,
                device: existing.device,
            });
        }

        let request = self
            .attempts
            .read()
            .get(pod)
            .and_then(|a| a.request.clone())
            .ok_or_else(|| {
                GpushareError::invalid_request(
                    pod.to_string(),
                    "no filtered request recorded for pod",
                    "Bind is only valid after the filter call for the same pod",
                )
            })?;

        self.bind_request(&request, node)
    }

    /// Remember a pod that requests no GPU share so its bind is acknowledged
    pub fn pass_through(&self, pod: &PodKey) {
        debug!("Pod {} passed through without a GPU share", pod);
        self.record(pod, None, AttemptState::Filtered);
    }

    /// Whether filter passed the pod through without a GPU share
    pub fn is_pass_through(&self, pod: &PodKey) -> bool {
        self.attempts
            .read()
            .get(pod)
            .is_some_and(|a| a.request.is_none())
    }

    /// Mark a passed-through pod as bound by the downstream binder
    pub fn pass_through_bound(&self, pod: &PodKey) {
        self.transition(pod, AttemptState::Bound);
    }

    /// Run filter, scoring and bind for one request
    pub fn schedule(&self, request: &AllocationRequest, candidates: &[String]) -> Result<Allocation> {
        let outcome = self.filter(request, candidates)?;
        if outcome.is_empty() {
            let reason = outcome
                .failed
                .iter()
                .map(|(node, reason)| format!("{}: {}", node, reason))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SchedulerError::infeasible(
                request.pod.to_string(),
                if reason.is_empty() {
                    "no candidate nodes".to_string()
                } else {
                    reason
                },
            ));
        }

        let snapshot = self.inventory.snapshot(&outcome.nodes);
        let scores = self.scoring.score(&outcome.nodes, request, &snapshot);
        self.transition(&request.pod, AttemptState::Scored);

        let best = scores.first().ok_or_else(|| {
            SchedulerError::infeasible(request.pod.to_string(), "no node left after scoring")
        })?;

        debug!("Best node for pod {}: {} ({})", request.pod, best.node_name, best.score);

        self.bind_request(request, &best.node_name)
    }

    fn bind_request(&self, request: &AllocationRequest, node: &str) -> Result<Allocation> {
        self.transition(&request.pod, AttemptState::BindAttempted);

        let result = self.choose_device(request, node).and_then(|device| {
            self.binder.bind(request, node, device)
        });

        match &result {
            Ok(_) => self.transition(&request.pod, AttemptState::Bound),
            Err(e) => {
                warn!("Bind of pod {} to {} failed: {}", request.pod, node, e);
                self.transition(&request.pod, AttemptState::Rejected);
            }
        }

        result
    }

    fn choose_device(&self, request: &AllocationRequest, node: &str) -> Result<u32> {
        let snapshot = self.inventory.snapshot(&[node.to_string()]);
        let node_snapshot = snapshot.get(node).ok_or_else(|| {
            SchedulerError::inventory_inconsistency(format!("node {} not found", node))
        })?;

        select_device(node_snapshot, request).ok_or_else(|| {
            SchedulerError::capacity_race(
                request.pod.to_string(),
                node,
                request.device_hint.unwrap_or(0),
                "no device on node fits the request any more",
            )
        })
    }

    /// Release an allocation whose API-server binding failed
    pub fn abort_bind(&self, pod: &PodKey, id: &AllocationId) -> Option<Allocation> {
        let released = self.binder.unbind(id);
        self.transition(pod, AttemptState::Rejected);
        released
    }

    /// Drop the recorded attempt for a pod
    pub fn forget(&self, pod: &PodKey) {
        self.attempts.write().remove(pod);
    }

    /// Pod deleted: release its allocation and forget the attempt
    pub fn pod_deleted(&self, pod: &PodKey) -> Option<Allocation> {
        self.forget(pod);
        let released = self.inventory.release_pod(pod);
        if released.is_some() {
            info!("Pod {} deleted, GPU share released", pod);
        }
        released
    }

    /// Current attempt state for a pod
    pub fn attempt_state(&self, pod: &PodKey) -> Option<AttemptState> {
        self.attempts.read().get(pod).map(|a| a.state)
    }

    /// Attempts not yet bound or rejected
    pub fn pending_attempts(&self) -> usize {
        self.attempts
            .read()
            .values()
            .filter(|a| !matches!(a.state, AttemptState::Bound | AttemptState::Rejected))
            .count()
    }

    fn record(&self, pod: &PodKey, request: Option<AllocationRequest>, state: AttemptState) {
        let ttl = self.config.attempt_ttl;
        let mut attempts = self.attempts.write();
        attempts.retain(|_, a| a.updated_at.elapsed() < ttl);
        attempts.insert(
            pod.clone(),
            Attempt {
                request,
                state,
                updated_at: Instant::now(),
            },
        );
    }

    fn transition(&self, pod: &PodKey, state: AttemptState) {
        if let Some(attempt) = self.attempts.write().get_mut(pod) {
            debug!("Pod {} attempt {:?} -> {:?}", pod, attempt.state, state);
            attempt.state = state;
            attempt.updated_at = Instant::now();
        }
    }
}
