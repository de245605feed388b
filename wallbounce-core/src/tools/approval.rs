//! Approval manager — risk-graded gating of tool operations.
//!
//! Every proposed tool invocation becomes an [`ApprovalRequest`] that
//! moves through a small state machine: `pending` resolves to exactly one
//! of `auto_approved`, `manually_approved`, `rejected`, or `expired`, and
//! terminal states never change again. Pending requests expire on an
//! absolute TTL measured from creation. An append-only audit trail
//! records every transition and is the sole authority for [`stats`].
//!
//! [`stats`]: ApprovalManager::stats

use super::{ApprovalPolicy, Risk, ToolDescriptor};
use crate::metrics::MetricsSurface;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    AutoApproved,
    ManuallyApproved,
    Rejected,
    Expired,
}

impl ApprovalState {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::AutoApproved => "auto_approved",
            ApprovalState::ManuallyApproved => "manually_approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::Expired => "expired",
        }
    }

    /// Whether an execution may proceed under this state.
    pub fn is_approving(self) -> bool {
        matches!(
            self,
            ApprovalState::AutoApproved | ApprovalState::ManuallyApproved
        )
    }
}

/// One gated tool operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_label: String,
    pub operation: String,
    pub parameters: serde_json::Value,
    pub risk: Risk,
    pub requester: String,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decider: Option<String>,
    pub notes: Option<String>,
}

/// One audit-trail entry. `from_state` is `None` for the creation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub from_state: Option<ApprovalState>,
    pub to_state: ApprovalState,
    pub at: DateTime<Utc>,
    pub decider: Option<String>,
    pub notes: Option<String>,
}

/// Snapshot of approval activity, computed from the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub total: u64,
    pub pending: u64,
    pub auto_approved: u64,
    pub manually_approved: u64,
    pub rejected: u64,
    pub expired: u64,
}

/// Predicate consulted for tools with `ApprovalPolicy::Conditional`.
pub type ApprovalPredicate = dyn Fn(&ApprovalRequest) -> bool + Send + Sync;

struct Inner {
    requests: HashMap<Uuid, ApprovalRequest>,
    trail: Vec<AuditRecord>,
}

/// Owns the approval state machine. All mutation funnels through one
/// mutex, giving the single-writer discipline the audit trail needs.
pub struct ApprovalManager {
    inner: Mutex<Inner>,
    ttl: Duration,
    metrics: Arc<MetricsSurface>,
    predicate: Option<Box<ApprovalPredicate>>,
}

impl ApprovalManager {
    pub fn new(ttl: Duration, metrics: Arc<MetricsSurface>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                requests: HashMap::new(),
                trail: Vec::new(),
            }),
            ttl,
            metrics,
            predicate: None,
        }
    }

    /// Install the predicate consulted for `Conditional` tools.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&ApprovalRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// File a new approval request and apply the auto-approval rules.
    /// Returns the request id for later `process`/`execute` calls.
    pub fn request(
        &self,
        tool: &ToolDescriptor,
        operation: impl Into<String>,
        parameters: serde_json::Value,
        risk: Risk,
        requester: impl Into<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let request = ApprovalRequest {
            id,
            tool_label: tool.label.clone(),
            operation: operation.into(),
            parameters,
            risk,
            requester: requester.into(),
            state: ApprovalState::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decider: None,
            notes: None,
        };

        let auto = match (risk, tool.approval_policy) {
            (Risk::Low, ApprovalPolicy::Never) => true,
            (Risk::Low, ApprovalPolicy::Conditional) => self
                .predicate
                .as_ref()
                .map(|p| p(&request))
                .unwrap_or(false),
            _ => false,
        };

        let mut inner = self.inner.lock().expect("approval state poisoned");
        inner.trail.push(AuditRecord {
            id,
            from_state: None,
            to_state: ApprovalState::Pending,
            at: request.created_at,
            decider: None,
            notes: None,
        });
        self.metrics.record_approval_transition("pending");
        self.metrics.inc_pending_approvals();
        inner.requests.insert(id, request);

        if auto {
            Self::transition(
                &mut inner,
                &self.metrics,
                id,
                ApprovalState::AutoApproved,
                Some("policy:auto".to_string()),
                None,
            );
            debug!(%id, tool = %tool.label, "auto-approved");
        } else {
            info!(%id, tool = %tool.label, risk = %risk, "approval pending");
        }

        id
    }

    /// Resolve a pending request. Returns `true` iff the request actually
    /// transitioned; expired and already-terminal requests return `false`.
    pub fn process(
        &self,
        id: Uuid,
        approve: bool,
        decider: impl Into<String>,
        notes: Option<String>,
    ) -> bool {
        let mut inner = self.inner.lock().expect("approval state poisoned");
        Self::expire_overdue(&mut inner, &self.metrics, self.ttl);

        match inner.requests.get(&id) {
            Some(request) if request.state == ApprovalState::Pending => {}
            _ => return false,
        }

        let to_state = if approve {
            ApprovalState::ManuallyApproved
        } else {
            ApprovalState::Rejected
        };
        Self::transition(&mut inner, &self.metrics, id, to_state, Some(decider.into()), notes);
        true
    }

    /// Fetch a request snapshot, applying lazy expiry first.
    pub fn get(&self, id: Uuid) -> Option<ApprovalRequest> {
        let mut inner = self.inner.lock().expect("approval state poisoned");
        Self::expire_overdue(&mut inner, &self.metrics, self.ttl);
        inner.requests.get(&id).cloned()
    }

    /// Stats snapshot computed from the audit trail alone.
    pub fn stats(&self) -> ApprovalStats {
        let mut inner = self.inner.lock().expect("approval state poisoned");
        Self::expire_overdue(&mut inner, &self.metrics, self.ttl);

        let mut stats = ApprovalStats::default();
        for record in &inner.trail {
            match record.to_state {
                ApprovalState::Pending => {
                    stats.total += 1;
                    stats.pending += 1;
                }
                ApprovalState::AutoApproved => {
                    stats.pending -= 1;
                    stats.auto_approved += 1;
                }
                ApprovalState::ManuallyApproved => {
                    stats.pending -= 1;
                    stats.manually_approved += 1;
                }
                ApprovalState::Rejected => {
                    stats.pending -= 1;
                    stats.rejected += 1;
                }
                ApprovalState::Expired => {
                    stats.pending -= 1;
                    stats.expired += 1;
                }
            }
        }
        stats
    }

    /// Full audit trail, in append order.
    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.inner
            .lock()
            .expect("approval state poisoned")
            .trail
            .clone()
    }

    fn transition(
        inner: &mut Inner,
        metrics: &MetricsSurface,
        id: Uuid,
        to_state: ApprovalState,
        decider: Option<String>,
        notes: Option<String>,
    ) {
        let Some(request) = inner.requests.get_mut(&id) else {
            return;
        };
        let from_state = request.state;
        let now = Utc::now();
        request.state = to_state;
        request.decided_at = Some(now);
        request.decider = decider.clone();
        request.notes = notes.clone();

        inner.trail.push(AuditRecord {
            id,
            from_state: Some(from_state),
            to_state,
            at: now,
            decider,
            notes,
        });
        metrics.record_approval_transition(to_state.as_str());
        if from_state == ApprovalState::Pending {
            metrics.dec_pending_approvals();
        }
    }

    /// Move pending requests past their TTL to `expired`. The TTL clock
    /// is absolute from `created_at`.
    fn expire_overdue(inner: &mut Inner, metrics: &MetricsSurface, ttl: Duration) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let overdue: Vec<Uuid> = inner
            .requests
            .values()
            .filter(|r| r.state == ApprovalState::Pending && r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
        for id in overdue {
            info!(%id, "approval expired");
            Self::transition(inner, metrics, id, ApprovalState::Expired, None, None);
        }
    }
}
