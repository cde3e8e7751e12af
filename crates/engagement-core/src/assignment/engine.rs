//! Assignment state machine
//!
//! ```text
//! pending ──accept──▶ accepted
//!   ├──decline──▶ declined ──▶ successor (pending) or NoAgents
//!   ├──transfer─▶ transferred ──▶ successor preferring the target
//!   ├──timer────▶ timed_out
//!   └──cancel───▶ cancelled
//! ```
//!
//! Every transition is a check-then-set under the write lock of the assignment map and
//! is audited before it lands. Presence and push side effects run after the lock is
//! released; their failures are logged and never roll back the assignment.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::audit::{AssignmentAudit, AssignmentEvent, AssignmentEventKind};
use super::policy;
use super::types::{Assignment, AssignmentRequest, AssignmentResult, AssignmentStats};
use crate::alarm::{AlarmEngine, AlarmRequest, Metadata};
use crate::classifier::truncate;
use crate::clock::{to_chrono, SharedClock};
use crate::config::EngagementConfig;
use crate::error::{EngagementError, Result};
use crate::presence::PresenceRegistry;
use crate::push::{PushMessage, PushTarget, Pusher};
use crate::selector;
use crate::types::{
    AgentId, AssignmentId, AssignmentStatus, Priority, ProjectId, TenantId,
};

pub struct AssignmentEngine {
    clock: SharedClock,
    presence: Arc<PresenceRegistry>,
    alarms: Arc<AlarmEngine>,
    pusher: Arc<dyn Pusher>,
    audit: Arc<dyn AssignmentAudit>,
    enabled: bool,
    max_message_bytes: usize,
    retry_attempts: u32,
    retry_backoff: Duration,
    assignments: RwLock<HashMap<AssignmentId, Assignment>>,
    timers: DashMap<AssignmentId, CancellationToken>,
    shutdown: Mutex<CancellationToken>,
}

impl AssignmentEngine {
    pub fn new(
        clock: SharedClock,
        presence: Arc<PresenceRegistry>,
        alarms: Arc<AlarmEngine>,
        pusher: Arc<dyn Pusher>,
        audit: Arc<dyn AssignmentAudit>,
        config: &EngagementConfig,
    ) -> Self {
        Self {
            clock,
            presence,
            alarms,
            pusher,
            audit,
            enabled: config.agent_assignment,
            max_message_bytes: config.max_message_bytes,
            retry_attempts: config.timeout_retry_attempts.max(1),
            retry_backoff: config.timeout_retry_backoff(),
            assignments: RwLock::new(HashMap::new()),
            timers: DashMap::new(),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pick an agent for `request` and hand them a pending assignment
    ///
    /// Fails with [`EngagementError::NoAgents`] when nobody qualifies; the error carries
    /// the retry hint for the request's urgency.
    pub async fn create(self: &Arc<Self>, request: AssignmentRequest) -> Result<AssignmentResult> {
        if !self.enabled {
            return Err(EngagementError::Disabled("agent assignment"));
        }

        let now = self.clock.now();
        let criteria = policy::criteria_for(&request);
        let snapshot = self.presence.available(request.tenant_id);
        let selection = selector::select(&snapshot, &criteria, now);

        let Some(selected) = selection.selected.clone() else {
            let retry_after = policy::retry_after(request.urgency);
            warn!(
                tenant_id = %request.tenant_id,
                session_id = %request.session_id,
                considered = selection.total_agents,
                "No agent available for assignment: {}",
                selection.reason
            );
            return Err(EngagementError::no_agents(retry_after, selection.reason));
        };

        let priority = Priority::from(request.urgency);
        let assignment = Assignment {
            id: AssignmentId::new(),
            tenant_id: request.tenant_id,
            project_id: request.project_id,
            customer_id: request.customer_id,
            session_id: request.session_id,
            agent_id: selected.agent_id,
            agent_name: selected.name.clone(),
            request_type: request.request_type,
            urgency: request.urgency,
            priority,
            status: AssignmentStatus::Pending,
            assigned_at: now,
            accepted_at: None,
            completed_at: None,
            timeout_at: now + to_chrono(request.timeout),
            customer_message: truncate(&request.customer_message, self.max_message_bytes).to_string(),
            required_skills: request.required_skills.clone(),
            timeout: request.timeout,
            preferred_agent: request.preferred_agent,
            agent_notes: None,
            transfer_reason: None,
            reason: format!("Auto-assigned based on {}", selection.reason),
            exclusions: request.exclusions.clone(),
            predecessor_id: request.predecessor_id,
            alarm_id: None,
            needs_attention: false,
        };

        {
            let mut assignments = self.assignments.write().await;
            self.audit
                .record(Self::event(&assignment, AssignmentEventKind::Created, now, None))
                .await?;
            assignments.insert(assignment.id, assignment.clone());
        }
        info!(
            assignment_id = %assignment.id,
            agent_id = %assignment.agent_id,
            request_type = %assignment.request_type,
            priority = %assignment.priority,
            predecessor = ?assignment.predecessor_id,
            "📋 Assignment created"
        );

        if let Err(e) = self.presence.record_assignment(assignment.tenant_id, assignment.agent_id) {
            warn!(assignment_id = %assignment.id, "Failed to bump agent workload: {}", e);
        }
        self.arm_timer(assignment.id, assignment.timeout_at);

        let assignment = self.notify_created(assignment).await;
        self.push_count(assignment.tenant_id, assignment.project_id, assignment.agent_id)
            .await;

        Ok(AssignmentResult {
            success: true,
            reason: format!("Successfully assigned to {}", selected.name),
            assignment: Some(assignment),
            selected: Some(selected),
            alternate: selection.alternate,
            retry_after: None,
        })
    }

    pub async fn accept(&self, id: AssignmentId, agent_id: AgentId) -> Result<Assignment> {
        let accepted = {
            let mut assignments = self.assignments.write().await;
            let assignment = Self::pending_for(&mut assignments, id, agent_id, "accept")?;
            let now = self.clock.now();
            self.audit
                .record(Self::event(assignment, AssignmentEventKind::Accepted, now, None))
                .await?;
            assignment.status = AssignmentStatus::Accepted;
            assignment.accepted_at = Some(now);
            assignment.clone()
        };
        self.disarm_timer(id);

        info!(assignment_id = %id, agent_id = %agent_id, "✅ Assignment accepted");
        self.push_count(accepted.tenant_id, accepted.project_id, agent_id).await;
        Ok(accepted)
    }

    /// Decline and immediately look for someone else
    ///
    /// The declined record stays declined even if the successor search comes up empty.
    pub async fn decline(
        self: &Arc<Self>,
        id: AssignmentId,
        agent_id: AgentId,
        reason: Option<String>,
    ) -> Result<AssignmentResult> {
        let declined = {
            let mut assignments = self.assignments.write().await;
            let assignment = Self::pending_for(&mut assignments, id, agent_id, "decline")?;
            let now = self.clock.now();
            self.audit
                .record(Self::event(assignment, AssignmentEventKind::Declined, now, reason.clone()))
                .await?;
            assignment.status = AssignmentStatus::Declined;
            assignment.agent_notes = reason;
            assignment.completed_at = Some(now);
            assignment.clone()
        };
        info!(
            assignment_id = %id,
            agent_id = %agent_id,
            notes = ?declined.agent_notes,
            "↩️ Assignment declined, reassigning"
        );
        self.wind_down(&declined).await;

        self.create(AssignmentRequest::successor_of(&declined)).await
    }

    /// Hand a pending assignment over, optionally to a named colleague
    pub async fn transfer(
        self: &Arc<Self>,
        id: AssignmentId,
        agent_id: AgentId,
        reason: impl Into<String>,
        target: Option<AgentId>,
    ) -> Result<AssignmentResult> {
        let reason = reason.into();
        let transferred = {
            let mut assignments = self.assignments.write().await;
            let assignment = Self::pending_for(&mut assignments, id, agent_id, "transfer")?;
            let now = self.clock.now();
            self.audit
                .record(Self::event(assignment, AssignmentEventKind::Transferred, now, Some(reason.clone())))
                .await?;
            assignment.status = AssignmentStatus::Transferred;
            assignment.transfer_reason = Some(reason);
            assignment.completed_at = Some(now);
            assignment.clone()
        };
        info!(assignment_id = %id, agent_id = %agent_id, target = ?target, "🔀 Assignment transferred");
        self.wind_down(&transferred).await;

        let mut successor = AssignmentRequest::successor_of(&transferred);
        successor.preferred_agent = target.or(successor.preferred_agent);
        self.create(successor).await
    }

    /// Admin cancellation; never reassigns
    pub async fn cancel(&self, id: AssignmentId, reason: Option<String>) -> Result<Assignment> {
        let cancelled = {
            let mut assignments = self.assignments.write().await;
            let assignment = assignments
                .get_mut(&id)
                .ok_or_else(|| EngagementError::not_found("assignment", id))?;
            if !assignment.is_pending() {
                return Err(EngagementError::invalid_transition(id, "cancel", assignment.status.as_str()));
            }
            let now = self.clock.now();
            self.audit
                .record(Self::event(assignment, AssignmentEventKind::Cancelled, now, reason.clone()))
                .await?;
            assignment.status = AssignmentStatus::Cancelled;
            assignment.agent_notes = reason;
            assignment.completed_at = Some(now);
            assignment.clone()
        };
        info!(assignment_id = %id, "🚫 Assignment cancelled");
        self.wind_down(&cancelled).await;
        Ok(cancelled)
    }

    /// Expire a pending assignment
    ///
    /// The audit write is retried with exponential back-off while the lock is held.
    /// When every attempt fails the assignment stays pending, is flagged for operator
    /// attention, and the storage error is returned.
    pub async fn timeout(&self, id: AssignmentId) -> Result<Assignment> {
        let timed_out = {
            let mut assignments = self.assignments.write().await;
            let assignment = assignments
                .get_mut(&id)
                .ok_or_else(|| EngagementError::not_found("assignment", id))?;
            if !assignment.is_pending() {
                return Err(EngagementError::invalid_transition(id, "time out", assignment.status.as_str()));
            }

            let now = self.clock.now();
            let event = Self::event(assignment, AssignmentEventKind::TimedOut, now, None);
            if let Err(e) = self.record_with_retry(event).await {
                assignment.needs_attention = true;
                let unresolved = Self::event(
                    assignment,
                    AssignmentEventKind::TimeoutUnresolved,
                    self.clock.now(),
                    Some(e.to_string()),
                );
                if let Err(audit_err) = self.audit.record(unresolved).await {
                    debug!(assignment_id = %id, "Could not record unresolved timeout: {}", audit_err);
                }
                error!(assignment_id = %id, "Timeout could not be recorded, left pending: {}", e);
                return Err(e);
            }

            assignment.status = AssignmentStatus::TimedOut;
            assignment.completed_at = Some(now);
            assignment.clone()
        };
        warn!(
            assignment_id = %id,
            agent_id = %timed_out.agent_id,
            "⏰ Assignment timed out without response"
        );
        self.wind_down(&timed_out).await;
        Ok(timed_out)
    }

    pub async fn get(&self, id: AssignmentId) -> Result<Assignment> {
        self.assignments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngagementError::not_found("assignment", id))
    }

    /// Pending assignments of a tenant, oldest first
    pub async fn list_pending(&self, tenant_id: TenantId) -> Vec<Assignment> {
        self.matching(|a| a.tenant_id == tenant_id && a.is_pending()).await
    }

    /// Every assignment ever handed to `agent_id`, oldest first
    pub async fn list_for_agent(&self, tenant_id: TenantId, agent_id: AgentId) -> Vec<Assignment> {
        self.matching(|a| a.tenant_id == tenant_id && a.agent_id == agent_id).await
    }

    pub async fn stats(&self, tenant_id: TenantId) -> AssignmentStats {
        let assignments = self.assignments.read().await;
        let mut stats = AssignmentStats::default();
        let mut acceptance_secs = Vec::new();

        for assignment in assignments.values().filter(|a| a.tenant_id == tenant_id) {
            stats.total += 1;
            match assignment.status {
                AssignmentStatus::Pending => stats.pending += 1,
                AssignmentStatus::Accepted => stats.accepted += 1,
                AssignmentStatus::Declined => stats.declined += 1,
                AssignmentStatus::TimedOut => stats.timed_out += 1,
                AssignmentStatus::Cancelled => stats.cancelled += 1,
                AssignmentStatus::Transferred => stats.transferred += 1,
            }
            *stats.by_type.entry(assignment.request_type).or_insert(0) += 1;
            *stats.by_urgency.entry(assignment.urgency).or_insert(0) += 1;
            if let Some(accepted_at) = assignment.accepted_at {
                acceptance_secs.push((accepted_at - assignment.assigned_at).num_milliseconds() as f64 / 1000.0);
            }
        }

        if !acceptance_secs.is_empty() {
            stats.avg_acceptance_secs =
                Some(acceptance_secs.iter().sum::<f64>() / acceptance_secs.len() as f64);
        }
        stats
    }

    /// Number of armed timeout timers
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every armed timer; timers armed afterwards start from a fresh token
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.shutdown.lock(), CancellationToken::new());
        previous.cancel();
        self.timers.clear();
        debug!("Assignment timers cancelled");
    }

    fn pending_for<'a>(
        assignments: &'a mut HashMap<AssignmentId, Assignment>,
        id: AssignmentId,
        agent_id: AgentId,
        action: &'static str,
    ) -> Result<&'a mut Assignment> {
        let assignment = assignments
            .get_mut(&id)
            .ok_or_else(|| EngagementError::not_found("assignment", id))?;
        if !assignment.is_pending() {
            return Err(EngagementError::invalid_transition(id, action, assignment.status.as_str()));
        }
        if assignment.agent_id != agent_id {
            return Err(EngagementError::invalid_transition(
                id,
                action,
                format!("assigned to agent {}", assignment.agent_id),
            ));
        }
        Ok(assignment)
    }

    fn event(
        assignment: &Assignment,
        kind: AssignmentEventKind,
        at: DateTime<Utc>,
        detail: Option<String>,
    ) -> AssignmentEvent {
        AssignmentEvent {
            assignment_id: assignment.id,
            tenant_id: assignment.tenant_id,
            agent_id: assignment.agent_id,
            kind,
            at,
            detail,
        }
    }

    async fn record_with_retry(&self, event: AssignmentEvent) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.audit.record(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 >= self.retry_attempts => return Err(e),
                Err(e) => {
                    let backoff = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        assignment_id = %event.assignment_id,
                        attempt = attempt + 1,
                        "Audit write failed, retrying in {:?}: {}",
                        backoff,
                        e
                    );
                    self.clock.sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn matching<F>(&self, keep: F) -> Vec<Assignment>
    where
        F: Fn(&Assignment) -> bool,
    {
        let mut matching: Vec<Assignment> = self
            .assignments
            .read()
            .await
            .values()
            .filter(|a| keep(*a))
            .cloned()
            .collect();
        matching.sort_by_key(|a| (a.assigned_at, a.id));
        matching
    }

    /// Post-transition cleanup shared by every non-accept terminal state
    async fn wind_down(&self, assignment: &Assignment) {
        self.disarm_timer(assignment.id);
        if let Err(e) = self.presence.release_assignment(assignment.tenant_id, assignment.agent_id) {
            warn!(assignment_id = %assignment.id, "Failed to release agent workload: {}", e);
        }
        self.push_count(assignment.tenant_id, assignment.project_id, assignment.agent_id)
            .await;
    }

    fn arm_timer(self: &Arc<Self>, id: AssignmentId, deadline: DateTime<Utc>) {
        let token = self.shutdown.lock().child_token();
        self.timers.insert(id, token.clone());

        let engine = Arc::downgrade(self);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = clock.sleep_until(deadline) => {
                    if let Some(engine) = engine.upgrade() {
                        engine.on_timer(id).await;
                    }
                }
            }
        });
    }

    fn disarm_timer(&self, id: AssignmentId) {
        if let Some((_, token)) = self.timers.remove(&id) {
            token.cancel();
        }
    }

    async fn on_timer(&self, id: AssignmentId) {
        match self.timeout(id).await {
            Ok(_) => {}
            Err(EngagementError::InvalidTransition { from, .. }) => {
                debug!(assignment_id = %id, "Timer fired after assignment became {}", from);
                self.timers.remove(&id);
            }
            Err(e) => {
                error!(assignment_id = %id, "Timeout handling failed: {}", e);
                self.timers.remove(&id);
            }
        }
    }

    /// Push the assignment to its agent and raise an alarm when warranted
    async fn notify_created(&self, mut assignment: Assignment) -> Assignment {
        let title = policy::notification_title(assignment.request_type);
        let body = policy::notification_body(assignment.priority, &assignment.customer_message);

        let target = PushTarget::agent(assignment.tenant_id, assignment.project_id, assignment.agent_id);
        let message = PushMessage::agent_assignment(&assignment, title.clone(), body.clone());
        if let Err(e) = self.pusher.push(target, message).await {
            warn!(assignment_id = %assignment.id, "Failed to push assignment: {}", e);
        }

        if !policy::raises_alarm(assignment.priority, assignment.urgency) {
            return assignment;
        }

        let mut metadata = Metadata::new();
        metadata.insert("assignment_id".to_string(), json!(assignment.id));
        metadata.insert("urgency".to_string(), json!(assignment.urgency));
        metadata.insert("assignment_type".to_string(), json!("agent_assignment"));

        let request = AlarmRequest {
            tenant_id: assignment.tenant_id,
            project_id: assignment.project_id,
            assignment_id: Some(assignment.id),
            agent_id: Some(assignment.agent_id),
            title,
            message: body,
            priority: assignment.priority.into(),
            metadata,
        };
        match self.alarms.trigger(request).await {
            Ok(alarm) => {
                assignment.alarm_id = Some(alarm.id);
                if let Some(stored) = self.assignments.write().await.get_mut(&assignment.id) {
                    stored.alarm_id = Some(alarm.id);
                }
            }
            Err(e) => error!(assignment_id = %assignment.id, "Failed to raise alarm: {}", e),
        }
        assignment
    }

    async fn push_count(&self, tenant_id: TenantId, project_id: ProjectId, agent_id: AgentId) {
        let pending = self
            .assignments
            .read()
            .await
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.agent_id == agent_id && a.is_pending())
            .count();
        let target = PushTarget::agent(tenant_id, project_id, agent_id);
        if let Err(e) = self
            .pusher
            .push(target, PushMessage::notification_count(agent_id, pending))
            .await
        {
            debug!(agent_id = %agent_id, "Failed to push notification count: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::InMemoryAlarmStore;
    use crate::assignment::{InMemoryAudit, NoopAudit};
    use crate::clock::ManualClock;
    use crate::presence::AgentPresence;
    use crate::push::PushHub;
    use crate::types::{AgentSkill, CustomerId, RequestType, SessionId, Urgency};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        clock: ManualClock,
        presence: Arc<PresenceRegistry>,
        engine: Arc<AssignmentEngine>,
        tenant: TenantId,
        project: ProjectId,
    }

    fn fixture_with(audit: Arc<dyn AssignmentAudit>) -> Fixture {
        let config = EngagementConfig {
            timeout_retry_backoff_ms: 0,
            ..EngagementConfig::default()
        };
        let clock = ManualClock::default();
        let hub: Arc<dyn Pusher> = Arc::new(PushHub::new(64));
        let presence = Arc::new(PresenceRegistry::new(clock.shared(), &config));
        let alarms = Arc::new(AlarmEngine::new(
            Arc::new(InMemoryAlarmStore::new()),
            hub.clone(),
            clock.shared(),
            config.escalator_tick(),
            None,
        ));
        let engine = Arc::new(AssignmentEngine::new(
            clock.shared(),
            presence.clone(),
            alarms,
            hub,
            audit,
            &config,
        ));
        Fixture {
            clock,
            presence,
            engine,
            tenant: TenantId::new(),
            project: ProjectId::new(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(NoopAudit))
    }

    impl Fixture {
        fn agent(&self, name: &str, skills: &[AgentSkill]) -> AgentId {
            let id = AgentId::new();
            self.presence.register(
                AgentPresence::new(self.tenant, id, name).with_skills(skills.iter().copied()),
            );
            id
        }

        fn request(&self, request_type: RequestType, urgency: Urgency) -> AssignmentRequest {
            AssignmentRequest::new(
                self.tenant,
                self.project,
                CustomerId::new(),
                SessionId::new(),
                request_type,
                urgency,
                "please help",
            )
        }
    }

    /// Fails the first `failures` writes of a given kind
    struct FlakyAudit {
        kind: AssignmentEventKind,
        failures: usize,
        seen: AtomicUsize,
        inner: InMemoryAudit,
    }

    #[async_trait]
    impl AssignmentAudit for FlakyAudit {
        async fn record(&self, event: AssignmentEvent) -> Result<()> {
            if event.kind == self.kind && self.seen.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(EngagementError::storage("audit unavailable"));
            }
            self.inner.record(event).await
        }
    }

    #[tokio::test]
    async fn test_create_bumps_workload_and_arms_timer() {
        let fx = fixture();
        let agent = fx.agent("Ada", &[AgentSkill::General]);

        let result = fx.engine.create(fx.request(RequestType::General, Urgency::Normal)).await.unwrap();
        let assignment = result.assignment.unwrap();

        assert!(result.success);
        assert_eq!(assignment.agent_id, agent);
        assert_eq!(assignment.status, AssignmentStatus::Pending);
        assert_eq!(assignment.timeout_at - assignment.assigned_at, chrono::Duration::minutes(5));
        assert!(assignment.reason.starts_with("Auto-assigned based on "));
        assert!(assignment.alarm_id.is_none());
        assert_eq!(fx.presence.get(fx.tenant, agent).unwrap().active_chats, 1);
        assert_eq!(fx.engine.pending_timers(), 1);
    }

    #[tokio::test]
    async fn test_accept_requires_assignee() {
        let fx = fixture();
        fx.agent("Ada", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Low))
            .await
            .unwrap()
            .assignment
            .unwrap();

        let err = fx.engine.accept(assignment.id, AgentId::new()).await.unwrap_err();
        assert!(matches!(err, EngagementError::InvalidTransition { .. }));

        let accepted = fx.engine.accept(assignment.id, assignment.agent_id).await.unwrap();
        assert_eq!(accepted.status, AssignmentStatus::Accepted);
        assert!(accepted.accepted_at.is_some());
        assert_eq!(fx.engine.pending_timers(), 0);

        let err = fx.engine.accept(assignment.id, assignment.agent_id).await.unwrap_err();
        assert!(matches!(err, EngagementError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_cancel_releases_workload_without_reassigning() {
        let fx = fixture();
        fx.agent("Ada", &[AgentSkill::General]);
        fx.agent("Bob", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Low))
            .await
            .unwrap()
            .assignment
            .unwrap();

        let cancelled = fx.engine.cancel(assignment.id, Some("duplicate".into())).await.unwrap();
        assert_eq!(cancelled.status, AssignmentStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert_eq!(fx.presence.get(fx.tenant, assignment.agent_id).unwrap().active_chats, 0);
        assert_eq!(fx.engine.pending_timers(), 0);
        assert!(fx.engine.list_pending(fx.tenant).await.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_prefers_target() {
        let fx = fixture();
        let first = fx.agent("Ada", &[AgentSkill::General]);
        let target = fx.agent("Bob", &[AgentSkill::General]);
        let request = fx.request(RequestType::General, Urgency::Low).with_preferred(first);
        let original = fx.engine.create(request).await.unwrap().assignment.unwrap();
        assert_eq!(original.agent_id, first);

        let result = fx
            .engine
            .transfer(original.id, first, "needs billing access", Some(target))
            .await
            .unwrap();
        let successor = result.assignment.unwrap();

        assert_eq!(successor.agent_id, target);
        assert_eq!(successor.predecessor_id, Some(original.id));
        assert!(successor.exclusions.contains(&first));
        let original = fx.engine.get(original.id).await.unwrap();
        assert_eq!(original.status, AssignmentStatus::Transferred);
        assert_eq!(original.transfer_reason.as_deref(), Some("needs billing access"));
    }

    #[tokio::test]
    async fn test_timer_fires_timeout() {
        let fx = fixture();
        let agent = fx.agent("Ada", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Critical))
            .await
            .unwrap()
            .assignment
            .unwrap();

        fx.clock.advance(Duration::from_secs(61));
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }

        let stored = fx.engine.get(assignment.id).await.unwrap();
        assert_eq!(stored.status, AssignmentStatus::TimedOut);
        assert_eq!(fx.presence.get(fx.tenant, agent).unwrap().active_chats, 0);
        assert_eq!(fx.engine.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_timeout_retries_transient_audit_failure() {
        let audit = Arc::new(FlakyAudit {
            kind: AssignmentEventKind::TimedOut,
            failures: 2,
            seen: AtomicUsize::new(0),
            inner: InMemoryAudit::new(),
        });
        let fx = fixture_with(audit.clone());
        fx.agent("Ada", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Low))
            .await
            .unwrap()
            .assignment
            .unwrap();

        let timed_out = fx.engine.timeout(assignment.id).await.unwrap();
        assert_eq!(timed_out.status, AssignmentStatus::TimedOut);
        assert_eq!(
            audit.inner.kinds_for(assignment.id),
            vec![AssignmentEventKind::Created, AssignmentEventKind::TimedOut]
        );
    }

    #[tokio::test]
    async fn test_timeout_left_pending_after_retries_exhausted() {
        let audit = Arc::new(FlakyAudit {
            kind: AssignmentEventKind::TimedOut,
            failures: usize::MAX,
            seen: AtomicUsize::new(0),
            inner: InMemoryAudit::new(),
        });
        let fx = fixture_with(audit.clone());
        let agent = fx.agent("Ada", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Low))
            .await
            .unwrap()
            .assignment
            .unwrap();

        let err = fx.engine.timeout(assignment.id).await.unwrap_err();
        assert!(matches!(err, EngagementError::Storage(_)));
        assert_eq!(audit.seen.load(Ordering::SeqCst), 3);

        let stored = fx.engine.get(assignment.id).await.unwrap();
        assert_eq!(stored.status, AssignmentStatus::Pending);
        assert!(stored.needs_attention);
        assert_eq!(fx.presence.get(fx.tenant, agent).unwrap().active_chats, 1);
        assert_eq!(
            audit.inner.kinds_for(assignment.id),
            vec![AssignmentEventKind::Created, AssignmentEventKind::TimeoutUnresolved]
        );
    }

    #[tokio::test]
    async fn test_unrecorded_timeout_disarms_timer() {
        let audit = Arc::new(FlakyAudit {
            kind: AssignmentEventKind::TimedOut,
            failures: usize::MAX,
            seen: AtomicUsize::new(0),
            inner: InMemoryAudit::new(),
        });
        let fx = fixture_with(audit);
        fx.agent("Ada", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Critical))
            .await
            .unwrap()
            .assignment
            .unwrap();
        assert_eq!(fx.engine.pending_timers(), 1);

        fx.clock.advance(Duration::from_secs(61));
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }

        let stored = fx.engine.get(assignment.id).await.unwrap();
        assert!(stored.is_pending());
        assert!(stored.needs_attention);
        assert_eq!(fx.engine.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_timers_fire_again_after_stop() {
        let fx = fixture();
        fx.agent("Ada", &[AgentSkill::General]);
        fx.engine.stop();

        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Critical))
            .await
            .unwrap()
            .assignment
            .unwrap();
        assert_eq!(fx.engine.pending_timers(), 1);

        fx.clock.advance(Duration::from_secs(61));
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            fx.engine.get(assignment.id).await.unwrap().status,
            AssignmentStatus::TimedOut
        );
    }

    #[tokio::test]
    async fn test_decline_carries_request_overrides() {
        let fx = fixture();
        fx.agent("Ada", &[AgentSkill::Billing, AgentSkill::General]);
        fx.agent("Bo", &[AgentSkill::Billing, AgentSkill::General]);
        let mut request = fx.request(RequestType::General, Urgency::Low);
        request.timeout = Duration::from_secs(42);
        request.required_skills = vec![AgentSkill::Billing];

        let first = fx.engine.create(request).await.unwrap().assignment.unwrap();
        assert_eq!(first.timeout_at - first.assigned_at, chrono::Duration::seconds(42));

        let successor = fx
            .engine
            .decline(first.id, first.agent_id, None)
            .await
            .unwrap()
            .assignment
            .unwrap();
        assert_ne!(successor.agent_id, first.agent_id);
        assert_eq!(successor.timeout, Duration::from_secs(42));
        assert_eq!(successor.timeout_at - successor.assigned_at, chrono::Duration::seconds(42));
        assert_eq!(successor.required_skills, vec![AgentSkill::Billing]);
    }

    #[tokio::test]
    async fn test_failed_audit_aborts_transition() {
        let audit = Arc::new(FlakyAudit {
            kind: AssignmentEventKind::Accepted,
            failures: 1,
            seen: AtomicUsize::new(0),
            inner: InMemoryAudit::new(),
        });
        let fx = fixture_with(audit);
        fx.agent("Ada", &[AgentSkill::General]);
        let assignment = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Low))
            .await
            .unwrap()
            .assignment
            .unwrap();

        assert!(fx.engine.accept(assignment.id, assignment.agent_id).await.is_err());
        assert!(fx.engine.get(assignment.id).await.unwrap().is_pending());
        assert!(fx.engine.accept(assignment.id, assignment.agent_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let fx = fixture();
        fx.agent("Ada", &[AgentSkill::General]);
        let first = fx
            .engine
            .create(fx.request(RequestType::General, Urgency::Low))
            .await
            .unwrap()
            .assignment
            .unwrap();
        fx.engine
            .create(fx.request(RequestType::General, Urgency::Normal))
            .await
            .unwrap();

        fx.clock.advance(Duration::from_secs(4));
        fx.engine.accept(first.id, first.agent_id).await.unwrap();

        let stats = fx.engine.stats(fx.tenant).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.avg_acceptance_secs, Some(4.0));
        assert_eq!(stats.by_urgency.get(&Urgency::Low), Some(&1));
        assert_eq!(fx.engine.list_for_agent(fx.tenant, first.agent_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_engine_refuses() {
        let fx = fixture();
        let config = EngagementConfig {
            agent_assignment: false,
            ..EngagementConfig::default()
        };
        let clock = fx.clock.shared();
        let hub: Arc<dyn Pusher> = Arc::new(PushHub::new(8));
        let engine = Arc::new(AssignmentEngine::new(
            clock.clone(),
            fx.presence.clone(),
            Arc::new(AlarmEngine::new(
                Arc::new(InMemoryAlarmStore::new()),
                hub.clone(),
                clock,
                Duration::from_secs(30),
                None,
            )),
            hub,
            Arc::new(NoopAudit),
            &config,
        ));
        let err = engine.create(fx.request(RequestType::General, Urgency::Low)).await.unwrap_err();
        assert_eq!(err, EngagementError::Disabled("agent assignment"));
    }
}
