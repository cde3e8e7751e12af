//! # Dispatcher
//!
//! Single entry point for visitor messages plus the agent and admin operations the
//! surrounding application exposes over HTTP and websockets.
//!
//! ```text
//! on_message ──▶ RequestClassifier ──▶ AssignmentEngine ──▶ AgentSelector
//!                                          │                    ▲
//!                                          │              PresenceRegistry
//!                                          ▼
//!                                     AlarmEngine ──▶ AlarmStore / Pusher
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tms_engagement_core::dispatcher::Dispatcher;
//! use tms_engagement_core::presence::AgentPresence;
//! use tms_engagement_core::types::{AgentId, AgentSkill, CustomerId, ProjectId, SessionId, TenantId};
//!
//! # async fn example() -> tms_engagement_core::Result<()> {
//! let dispatcher = Dispatcher::builder().build()?;
//! dispatcher.start();
//!
//! let tenant = TenantId::new();
//! dispatcher.presence().register(
//!     AgentPresence::new(tenant, AgentId::new(), "Alice").with_skills([AgentSkill::Support, AgentSkill::General]),
//! );
//!
//! let result = dispatcher
//!     .on_message(tenant, ProjectId::new(), CustomerId::new(), SessionId::new(), "I need a human, it's urgent!")
//!     .await?;
//! if let Some(retry_after) = result.retry_after {
//!     println!("No agent free, try again in {:?}", retry_after);
//! }
//!
//! dispatcher.stop().await;
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::alarm::{Alarm, AlarmEngine, AlarmStats, AlarmStore, InMemoryAlarmStore};
use crate::assignment::{
    Assignment, AssignmentAudit, AssignmentEngine, AssignmentRequest, AssignmentResult, AssignmentStats,
    NoopAudit,
};
use crate::classifier::{ClassificationResult, RequestClassifier};
use crate::clock::{SharedClock, SystemClock};
use crate::config::EngagementConfig;
use crate::error::{EngagementError, Result};
use crate::presence::PresenceRegistry;
use crate::push::{PushHub, Pusher};
use crate::types::{AgentId, AlarmId, AssignmentId, CustomerId, ProjectId, SessionId, TenantId};

pub struct Dispatcher {
    config: EngagementConfig,
    classifier: RequestClassifier,
    presence: Arc<PresenceRegistry>,
    assignments: Arc<AssignmentEngine>,
    alarms: Arc<AlarmEngine>,
    hub: Option<Arc<PushHub>>,
    running: Mutex<Option<CancellationToken>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Classify a visitor message and, when it asks for a human, assign an agent
    ///
    /// Disabled features, non-requests and an empty agent pool are reported through the
    /// result rather than as errors; `retry_after` is set in the last case.
    pub async fn on_message(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        customer_id: CustomerId,
        session_id: SessionId,
        text: &str,
    ) -> Result<AssignmentResult> {
        if !self.classifier.is_enabled() {
            return Ok(AssignmentResult::skipped("agent request detection disabled"));
        }
        if !self.assignments.is_enabled() {
            return Ok(AssignmentResult::skipped("agent assignment disabled"));
        }

        let classification = self.classifier.classify(text);
        if !classification.is_agent_request {
            debug!(
                session_id = %session_id,
                confidence = classification.confidence,
                "Message is not an agent request"
            );
            return Ok(AssignmentResult::skipped(not_a_request_reason(&classification)));
        }

        info!(
            session_id = %session_id,
            request_type = %classification.request_type,
            urgency = %classification.urgency,
            confidence = classification.confidence,
            "🙋 Agent request detected"
        );
        let request = AssignmentRequest::new(
            tenant_id,
            project_id,
            customer_id,
            session_id,
            classification.request_type,
            classification.urgency,
            text,
        );
        surface_back_pressure(self.assignments.create(request).await)
    }

    /// Classification only, for callers that want the reasoning trace
    pub fn classify(&self, text: &str) -> ClassificationResult {
        self.classifier.classify(text)
    }

    pub async fn accept(&self, assignment_id: AssignmentId, agent_id: AgentId) -> Result<Assignment> {
        self.assignments.accept(assignment_id, agent_id).await
    }

    /// Decline; the successor search result is returned, with back-pressure as data
    pub async fn decline(
        &self,
        assignment_id: AssignmentId,
        agent_id: AgentId,
        reason: Option<String>,
    ) -> Result<AssignmentResult> {
        surface_back_pressure(self.assignments.decline(assignment_id, agent_id, reason).await)
    }

    pub async fn transfer(
        &self,
        assignment_id: AssignmentId,
        agent_id: AgentId,
        reason: impl Into<String>,
        target: Option<AgentId>,
    ) -> Result<AssignmentResult> {
        surface_back_pressure(
            self.assignments
                .transfer(assignment_id, agent_id, reason, target)
                .await,
        )
    }

    pub async fn cancel(&self, assignment_id: AssignmentId, reason: Option<String>) -> Result<Assignment> {
        self.assignments.cancel(assignment_id, reason).await
    }

    pub async fn acknowledge(
        &self,
        tenant_id: TenantId,
        alarm_id: AlarmId,
        agent_id: AgentId,
        response: Option<String>,
    ) -> Result<Alarm> {
        self.alarms.acknowledge(tenant_id, alarm_id, agent_id, response).await
    }

    pub async fn list_pending(&self, tenant_id: TenantId) -> Vec<Assignment> {
        self.assignments.list_pending(tenant_id).await
    }

    pub async fn assignment_stats(&self, tenant_id: TenantId) -> AssignmentStats {
        self.assignments.stats(tenant_id).await
    }

    pub async fn active_alarms(&self, tenant_id: TenantId, project_id: Option<ProjectId>) -> Result<Vec<Alarm>> {
        self.alarms.list_active(tenant_id, project_id).await
    }

    pub async fn alarm_stats(&self, tenant_id: TenantId, project_id: Option<ProjectId>) -> Result<AlarmStats> {
        self.alarms.stats(tenant_id, project_id).await
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn assignments(&self) -> &Arc<AssignmentEngine> {
        &self.assignments
    }

    pub fn alarms(&self) -> &Arc<AlarmEngine> {
        &self.alarms
    }

    /// The in-process hub, when no custom pusher was supplied
    pub fn hub(&self) -> Option<&Arc<PushHub>> {
        self.hub.as_ref()
    }

    /// Spawn the presence GC and the alarm escalator; idempotent
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        self.presence.start_gc(token.child_token());
        self.alarms.start(token.child_token());
        *running = Some(token);
        info!("🚀 Engagement dispatcher started");
    }

    /// Stop both loops, waiting for in-flight passes, and cancel assignment timers
    pub async fn stop(&self) {
        let token = self.running.lock().take();
        if let Some(token) = token {
            token.cancel();
        }
        self.presence.stop().await;
        self.alarms.stop().await;
        self.assignments.stop();
        info!("🛑 Engagement dispatcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

fn not_a_request_reason(classification: &ClassificationResult) -> String {
    classification
        .reasoning
        .last()
        .cloned()
        .unwrap_or_else(|| "not an agent request".to_string())
}

fn surface_back_pressure(outcome: Result<AssignmentResult>) -> Result<AssignmentResult> {
    match outcome {
        Err(EngagementError::NoAgents { retry_after, reason }) => Ok(AssignmentResult::no_agents(retry_after, reason)),
        Err(EngagementError::Disabled(feature)) => Ok(AssignmentResult::skipped(format!("{} disabled", feature))),
        other => other,
    }
}

/// Wires a [`Dispatcher`]; every collaborator has an in-process default
#[derive(Default)]
pub struct DispatcherBuilder {
    config: Option<EngagementConfig>,
    clock: Option<SharedClock>,
    alarm_store: Option<Arc<dyn AlarmStore>>,
    audit: Option<Arc<dyn AssignmentAudit>>,
    pusher: Option<Arc<dyn Pusher>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngagementConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_alarm_store(mut self, store: Arc<dyn AlarmStore>) -> Self {
        self.alarm_store = Some(store);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AssignmentAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replace the in-process hub with another transport
    pub fn with_pusher(mut self, pusher: Arc<dyn Pusher>) -> Self {
        self.pusher = Some(pusher);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let (pusher, hub) = match self.pusher {
            Some(pusher) => (pusher, None),
            None => {
                let hub = Arc::new(PushHub::new(config.push_queue_capacity));
                (hub.clone() as Arc<dyn Pusher>, Some(hub))
            }
        };
        let alarm_store = self
            .alarm_store
            .unwrap_or_else(|| Arc::new(InMemoryAlarmStore::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(NoopAudit));

        let presence = Arc::new(PresenceRegistry::new(clock.clone(), &config));
        let alarms = Arc::new(AlarmEngine::new(
            alarm_store,
            pusher.clone(),
            clock.clone(),
            config.escalator_tick(),
            config.alarm_soft_expiry(),
        ));
        let assignments = Arc::new(AssignmentEngine::new(
            clock,
            presence.clone(),
            alarms.clone(),
            pusher,
            audit,
            &config,
        ));

        Ok(Dispatcher {
            classifier: RequestClassifier::from_config(&config),
            config,
            presence,
            assignments,
            alarms,
            hub,
            running: Mutex::new(None),
        })
    }
}
