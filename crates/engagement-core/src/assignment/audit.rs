//! Durable record of assignment transitions
//!
//! Every transition is written through [`AssignmentAudit`] before it becomes visible
//! in memory. An error from the sink aborts the transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{AgentId, AssignmentId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentEventKind {
    Created,
    Accepted,
    Declined,
    TimedOut,
    /// Timeout could not be recorded after every retry
    TimeoutUnresolved,
    Cancelled,
    Transferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub assignment_id: AssignmentId,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub kind: AssignmentEventKind,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

#[async_trait]
pub trait AssignmentAudit: Send + Sync {
    async fn record(&self, event: AssignmentEvent) -> Result<()>;
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

#[async_trait]
impl AssignmentAudit for NoopAudit {
    async fn record(&self, _event: AssignmentEvent) -> Result<()> {
        Ok(())
    }
}

/// Keeps events in memory, in arrival order
#[derive(Debug, Default)]
pub struct InMemoryAudit {
    events: Mutex<Vec<AssignmentEvent>>,
}

impl InMemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AssignmentEvent> {
        self.events.lock().clone()
    }

    pub fn kinds_for(&self, assignment_id: AssignmentId) -> Vec<AssignmentEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.assignment_id == assignment_id)
            .map(|event| event.kind)
            .collect()
    }
}

#[async_trait]
impl AssignmentAudit for InMemoryAudit {
    async fn record(&self, event: AssignmentEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
