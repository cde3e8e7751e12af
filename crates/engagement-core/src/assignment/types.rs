//! Assignment records and request/result shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::policy;
use crate::presence::AgentPresence;
use crate::types::{
    AgentId, AgentSkill, AlarmId, AssignmentId, AssignmentStatus, CustomerId, Priority, ProjectId,
    RequestType, SessionId, TenantId, Urgency,
};

/// Binding of one customer session to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub customer_id: CustomerId,
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub request_type: RequestType,
    pub urgency: Urgency,
    pub priority: Priority,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    /// Set on every terminal transition other than accept
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: DateTime<Utc>,
    pub customer_message: String,
    /// Skills the originating request asked for
    pub required_skills: Vec<AgentSkill>,
    /// Response window the originating request asked for
    pub timeout: Duration,
    pub preferred_agent: Option<AgentId>,
    pub agent_notes: Option<String>,
    pub transfer_reason: Option<String>,
    /// Why this agent was picked
    pub reason: String,
    /// Agents already tried for this session, never picked again down the chain
    pub exclusions: BTreeSet<AgentId>,
    /// Assignment this one replaced after a decline or transfer
    pub predecessor_id: Option<AssignmentId>,
    pub alarm_id: Option<AlarmId>,
    /// Timeout fired but could not be recorded
    pub needs_attention: bool,
}

impl Assignment {
    pub fn is_pending(&self) -> bool {
        self.status == AssignmentStatus::Pending
    }
}

/// Input to [`AssignmentEngine::create`](super::AssignmentEngine::create)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub customer_id: CustomerId,
    pub session_id: SessionId,
    pub customer_message: String,
    pub request_type: RequestType,
    pub urgency: Urgency,
    pub required_skills: Vec<AgentSkill>,
    pub timeout: Duration,
    pub preferred_agent: Option<AgentId>,
    pub exclusions: BTreeSet<AgentId>,
    pub predecessor_id: Option<AssignmentId>,
}

impl AssignmentRequest {
    /// Request with skills and timeout derived from type and urgency
    pub fn new(
        tenant_id: TenantId,
        project_id: ProjectId,
        customer_id: CustomerId,
        session_id: SessionId,
        request_type: RequestType,
        urgency: Urgency,
        customer_message: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            project_id,
            customer_id,
            session_id,
            customer_message: customer_message.into(),
            request_type,
            urgency,
            required_skills: policy::required_skills(request_type),
            timeout: policy::assignment_timeout(urgency),
            preferred_agent: None,
            exclusions: BTreeSet::new(),
            predecessor_id: None,
        }
    }

    pub fn with_preferred(mut self, agent_id: AgentId) -> Self {
        self.preferred_agent = Some(agent_id);
        self
    }

    pub fn excluding(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.exclusions.extend(agents);
        self
    }

    /// Same request as the one behind `previous`, also skipping its assignee
    pub(crate) fn successor_of(previous: &Assignment) -> Self {
        let mut exclusions = previous.exclusions.clone();
        exclusions.insert(previous.agent_id);
        Self {
            tenant_id: previous.tenant_id,
            project_id: previous.project_id,
            customer_id: previous.customer_id,
            session_id: previous.session_id,
            customer_message: previous.customer_message.clone(),
            request_type: previous.request_type,
            urgency: previous.urgency,
            required_skills: previous.required_skills.clone(),
            timeout: previous.timeout,
            preferred_agent: previous.preferred_agent,
            exclusions,
            predecessor_id: Some(previous.id),
        }
    }
}

/// Outcome of placing a request with an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub success: bool,
    pub assignment: Option<Assignment>,
    pub selected: Option<AgentPresence>,
    pub alternate: Option<AgentPresence>,
    /// Set when nobody could take the request
    pub retry_after: Option<Duration>,
    pub reason: String,
}

impl AssignmentResult {
    /// Nothing was attempted
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            assignment: None,
            selected: None,
            alternate: None,
            retry_after: None,
            reason: reason.into(),
        }
    }

    pub fn no_agents(retry_after: Duration, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            assignment: None,
            selected: None,
            alternate: None,
            retry_after: Some(retry_after),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentStats {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub declined: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub transferred: usize,
    /// Mean seconds from assignment to acceptance over accepted assignments
    pub avg_acceptance_secs: Option<f64>,
    pub by_type: BTreeMap<RequestType, usize>,
    pub by_urgency: BTreeMap<Urgency, usize>,
}
