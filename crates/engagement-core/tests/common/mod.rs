//! Shared harness for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tms_engagement_core::assignment::InMemoryAudit;
use tms_engagement_core::presence::AgentPresence;
use tms_engagement_core::push::{PushMessage, PushSubscription};
use tms_engagement_core::types::{AgentId, AgentSkill, CustomerId, ProjectId, SessionId, TenantId};
use tms_engagement_core::{Dispatcher, EngagementConfig, ManualClock};

pub struct Harness {
    pub clock: ManualClock,
    pub audit: Arc<InMemoryAudit>,
    pub dispatcher: Dispatcher,
    pub tenant: TenantId,
    pub project: ProjectId,
}

pub fn test_config() -> EngagementConfig {
    EngagementConfig {
        timeout_retry_backoff_ms: 0,
        ..EngagementConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngagementConfig) -> Self {
        let clock = ManualClock::default();
        let audit = Arc::new(InMemoryAudit::new());
        let dispatcher = Dispatcher::builder()
            .with_config(config)
            .with_clock(clock.shared())
            .with_audit(audit.clone())
            .build()
            .expect("valid test configuration");
        Self {
            clock,
            audit,
            dispatcher,
            tenant: TenantId::new(),
            project: ProjectId::new(),
        }
    }

    /// Register an online agent with the given skills and chat load
    pub fn agent(&self, name: &str, skills: &[AgentSkill], active: u32, max: u32) -> AgentId {
        let id = AgentId::new();
        self.dispatcher.presence().register(
            AgentPresence::new(self.tenant, id, name)
                .with_skills(skills.iter().copied())
                .with_chats(active, max),
        );
        id
    }

    pub fn subscribe(&self, agent_id: AgentId) -> PushSubscription {
        self.dispatcher
            .hub()
            .expect("default push hub")
            .subscribe(self.tenant, None, agent_id)
    }

    pub async fn message(&self, text: &str) -> tms_engagement_core::AssignmentResult {
        self.dispatcher
            .on_message(self.tenant, self.project, CustomerId::new(), SessionId::new(), text)
            .await
            .expect("dispatch succeeds")
    }

    /// Move virtual time forward and let woken tasks run
    pub async fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
        settle().await;
    }
}

/// Yield enough times for spawned loops and timers to finish their pass
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub fn of_kind<'a>(messages: &'a [PushMessage], kind: &str) -> Vec<&'a PushMessage> {
    messages.iter().filter(|m| m.kind() == kind).collect()
}
