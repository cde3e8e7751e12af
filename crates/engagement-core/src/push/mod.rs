//! Push delivery to agent subscribers
//!
//! The pipeline talks to the real-time transport through the [`Pusher`] capability.
//! Messages are a tagged union serialized as a flat JSON envelope:
//!
//! ```json
//! {
//!   "id": "…", "type": "alarm_triggered", "priority": "high", "level": "loud",
//!   "title": "New urgent Assignment", "body": "…",
//!   "assignment_id": "…", "alarm_id": "…", "metadata": { … }
//! }
//! ```
//!
//! Delivery is best-effort at-least-once. Alarm ids are stable across re-pushes so
//! receivers can dedupe.

pub mod hub;
pub mod presentation;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alarm::{Alarm, EscalationConfig, Metadata};
use crate::assignment::Assignment;
use crate::error::Result;
use crate::types::{
    AgentId, AlarmId, AlarmLevel, AssignmentId, CustomerId, NotificationPriority, ProjectId,
    RequestType, SessionId, TenantId, Urgency,
};

pub use hub::{PushHub, PushSubscription};
pub use presentation::Presentation;

/// Delivery capability consumed by the assignment and alarm engines
#[async_trait]
pub trait Pusher: Send + Sync {
    /// Deliver `message` to `target`. A saturated outbound queue yields
    /// [`EngagementError::Busy`](crate::EngagementError::Busy).
    async fn push(&self, target: PushTarget, message: PushMessage) -> Result<()>;
}

/// Recipient scope; without an agent the message goes to the whole tenant/project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushTarget {
    pub tenant_id: TenantId,
    pub project_id: Option<ProjectId>,
    pub agent_id: Option<AgentId>,
}

impl PushTarget {
    pub fn agent(tenant_id: TenantId, project_id: ProjectId, agent_id: AgentId) -> Self {
        Self {
            tenant_id,
            project_id: Some(project_id),
            agent_id: Some(agent_id),
        }
    }

    pub fn project(tenant_id: TenantId, project_id: ProjectId) -> Self {
        Self {
            tenant_id,
            project_id: Some(project_id),
            agent_id: None,
        }
    }

    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            project_id: None,
            agent_id: None,
        }
    }
}

/// Envelope shared by every push
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub id: Uuid,
    pub priority: NotificationPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<AlarmLevel>,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_id: Option<AlarmId>,
    #[serde(flatten)]
    pub payload: PushPayload,
}

/// Kind-specific part of a push, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "metadata", rename_all = "snake_case")]
pub enum PushPayload {
    AgentAssignment(AssignmentNotice),
    AlarmTriggered(AlarmNotice),
    AlarmAcknowledged(AcknowledgementNotice),
    NotificationCount(CountNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentNotice {
    pub agent_id: AgentId,
    pub customer_id: CustomerId,
    pub session_id: SessionId,
    pub request_type: RequestType,
    pub urgency: Urgency,
    pub timeout_at: DateTime<Utc>,
    pub action_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmNotice {
    pub current_level: AlarmLevel,
    pub escalation_count: u32,
    pub start_time: DateTime<Utc>,
    pub config: EscalationConfig,
    pub presentation: Presentation,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgementNotice {
    pub acknowledged_by: AgentId,
    pub acknowledged_at: DateTime<Utc>,
    pub response: Option<String>,
    pub final_level: AlarmLevel,
    pub total_duration_secs: i64,
    pub escalation_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountNotice {
    pub agent_id: AgentId,
    pub pending_assignments: usize,
}

impl PushMessage {
    /// Value of the `type` tag
    pub fn kind(&self) -> &'static str {
        match self.payload {
            PushPayload::AgentAssignment(_) => "agent_assignment",
            PushPayload::AlarmTriggered(_) => "alarm_triggered",
            PushPayload::AlarmAcknowledged(_) => "alarm_acknowledged",
            PushPayload::NotificationCount(_) => "notification_count",
        }
    }

    pub fn agent_assignment(assignment: &Assignment, title: String, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: assignment.priority.into(),
            level: None,
            title,
            body,
            assignment_id: Some(assignment.id),
            alarm_id: None,
            payload: PushPayload::AgentAssignment(AssignmentNotice {
                agent_id: assignment.agent_id,
                customer_id: assignment.customer_id,
                session_id: assignment.session_id,
                request_type: assignment.request_type,
                urgency: assignment.urgency,
                timeout_at: assignment.timeout_at,
                action_url: format!("/assignments/{}", assignment.id),
            }),
        }
    }

    /// Trigger or escalation push for the alarm's current level
    pub fn alarm_triggered(alarm: &Alarm) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: alarm.priority,
            level: Some(alarm.current_level),
            title: alarm.title.clone(),
            body: alarm.message.clone(),
            assignment_id: alarm.assignment_id,
            alarm_id: Some(alarm.id),
            payload: PushPayload::AlarmTriggered(AlarmNotice {
                current_level: alarm.current_level,
                escalation_count: alarm.escalation_count,
                start_time: alarm.start_time,
                config: alarm.config.clone(),
                presentation: presentation::for_level(alarm.current_level, &alarm.config),
                metadata: alarm.metadata.clone(),
            }),
        }
    }

    /// Acknowledgement push; `None` unless the alarm carries acknowledgement fields
    pub fn alarm_acknowledged(alarm: &Alarm) -> Option<Self> {
        let acknowledged_by = alarm.acknowledged_by?;
        let acknowledged_at = alarm.acknowledged_at?;
        Some(Self {
            id: Uuid::new_v4(),
            priority: alarm.priority,
            level: Some(alarm.current_level),
            title: alarm.title.clone(),
            body: format!("Alarm acknowledged by agent {}", acknowledged_by),
            assignment_id: alarm.assignment_id,
            alarm_id: Some(alarm.id),
            payload: PushPayload::AlarmAcknowledged(AcknowledgementNotice {
                acknowledged_by,
                acknowledged_at,
                response: alarm.response.clone(),
                final_level: alarm.current_level,
                total_duration_secs: (acknowledged_at - alarm.start_time).num_seconds(),
                escalation_count: alarm.escalation_count,
            }),
        })
    }

    pub fn notification_count(agent_id: AgentId, pending_assignments: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: NotificationPriority::Low,
            level: None,
            title: "Pending assignments".to_string(),
            body: format!("{} pending assignment(s)", pending_assignments),
            assignment_id: None,
            alarm_id: None,
            payload: PushPayload::NotificationCount(CountNotice {
                agent_id,
                pending_assignments,
            }),
        }
    }
}
