//! Alarm lifecycle and the escalation loop

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::AlarmStore;
use super::types::{Alarm, AlarmStats, EscalationConfig, Metadata};
use crate::clock::SharedClock;
use crate::error::{EngagementError, Result};
use crate::push::{PushMessage, PushTarget, Pusher};
use crate::tasks::BackgroundLoop;
use crate::types::{AgentId, AlarmId, AssignmentId, NotificationPriority, ProjectId, TenantId};

/// Everything needed to raise an alarm
#[derive(Debug, Clone)]
pub struct AlarmRequest {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub assignment_id: Option<AssignmentId>,
    pub agent_id: Option<AgentId>,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub metadata: Metadata,
}

/// Outcome of one escalator pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub escalated: usize,
    pub expired: usize,
    pub push_failures: usize,
}

pub struct AlarmEngine {
    store: Arc<dyn AlarmStore>,
    pusher: Arc<dyn Pusher>,
    clock: SharedClock,
    tick: Duration,
    soft_expiry: Option<Duration>,
    escalator: Mutex<Option<BackgroundLoop>>,
}

impl AlarmEngine {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        pusher: Arc<dyn Pusher>,
        clock: SharedClock,
        tick: Duration,
        soft_expiry: Option<Duration>,
    ) -> Self {
        Self {
            store,
            pusher,
            clock,
            tick,
            soft_expiry,
            escalator: Mutex::new(None),
        }
    }

    /// Persist a new alarm at its initial level and push it
    ///
    /// A failed push is logged; the alarm stays stored and the next escalation
    /// re-pushes it.
    pub async fn trigger(&self, request: AlarmRequest) -> Result<Alarm> {
        let now = self.clock.now();
        let config = EscalationConfig::for_priority(request.priority);
        let alarm = Alarm {
            id: AlarmId::new(),
            tenant_id: request.tenant_id,
            project_id: request.project_id,
            assignment_id: request.assignment_id,
            agent_id: request.agent_id,
            title: request.title,
            message: request.message,
            priority: request.priority,
            current_level: config.initial_level,
            start_time: now,
            last_escalation: now,
            escalation_count: 0,
            is_acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            response: None,
            expired_at: None,
            config,
            metadata: request.metadata,
        };

        self.store.create_alarm(&alarm).await?;
        info!(
            alarm_id = %alarm.id,
            tenant_id = %alarm.tenant_id,
            priority = %alarm.priority,
            level = %alarm.current_level,
            "🚨 Alarm triggered"
        );

        if let Err(e) = self.push_level(&alarm).await {
            warn!(alarm_id = %alarm.id, "Failed to push alarm: {}", e);
        }
        Ok(alarm)
    }

    /// Mark an alarm acknowledged and tell the tenant
    pub async fn acknowledge(
        &self,
        tenant_id: TenantId,
        alarm_id: AlarmId,
        agent_id: AgentId,
        response: Option<String>,
    ) -> Result<Alarm> {
        let alarm = self
            .store
            .ack_alarm(tenant_id, alarm_id, agent_id, response, self.clock.now())
            .await?;
        info!(
            alarm_id = %alarm_id,
            agent_id = %agent_id,
            level = %alarm.current_level,
            escalations = alarm.escalation_count,
            "✅ Alarm acknowledged"
        );

        if let Some(message) = PushMessage::alarm_acknowledged(&alarm) {
            if let Err(e) = self.pusher.push(PushTarget::tenant(tenant_id), message).await {
                warn!(alarm_id = %alarm_id, "Failed to push acknowledgement: {}", e);
            }
        }
        Ok(alarm)
    }

    pub async fn get(&self, tenant_id: TenantId, alarm_id: AlarmId) -> Result<Alarm> {
        self.store.get_by_id(tenant_id, alarm_id).await
    }

    pub async fn list_active(&self, tenant_id: TenantId, project_id: Option<ProjectId>) -> Result<Vec<Alarm>> {
        self.store.get_active(tenant_id, project_id).await
    }

    pub async fn stats(&self, tenant_id: TenantId, project_id: Option<ProjectId>) -> Result<AlarmStats> {
        self.store.stats(tenant_id, project_id, self.clock.now()).await
    }

    /// One escalator pass: raise every due alarm by one level, then soft-expire
    ///
    /// Alarms acknowledged between the query and the write are skipped, since the
    /// store refuses to update an inactive record.
    pub async fn escalate_due(&self) -> Result<EscalationReport> {
        let now = self.clock.now();
        let mut report = EscalationReport::default();

        for mut alarm in self.store.get_for_escalation(now).await? {
            if !alarm.is_due(now) {
                continue;
            }
            let Some(next) = alarm.current_level.next().filter(|level| *level <= alarm.config.max_level) else {
                continue;
            };

            let previous = alarm.current_level;
            alarm.current_level = next;
            alarm.last_escalation = now;
            alarm.escalation_count += 1;

            match self.store.update_alarm(&alarm).await {
                Ok(()) => {}
                Err(e @ (EngagementError::InvalidTransition { .. } | EngagementError::NotFound { .. })) => {
                    debug!(alarm_id = %alarm.id, "Skipping escalation: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!(alarm_id = %alarm.id, "Failed to persist escalation: {}", e);
                    continue;
                }
            }

            report.escalated += 1;
            info!(
                alarm_id = %alarm.id,
                from = %previous,
                to = %alarm.current_level,
                count = alarm.escalation_count,
                "📢 Alarm escalated"
            );
            if let Err(e) = self.push_level(&alarm).await {
                report.push_failures += 1;
                warn!(alarm_id = %alarm.id, "Failed to push escalation: {}", e);
            }
        }

        if let Some(quiescence) = self.soft_expiry {
            for alarm in self.store.get_for_expiry(now, quiescence).await? {
                match self.store.expire_alarm(alarm.tenant_id, alarm.id, now).await {
                    Ok(_) => {
                        report.expired += 1;
                        info!(alarm_id = %alarm.id, "⌛ Alarm soft-expired");
                    }
                    Err(e) => debug!(alarm_id = %alarm.id, "Skipping expiry: {}", e),
                }
            }
        }

        Ok(report)
    }

    /// Start the escalator; a second call while running is a no-op
    pub fn start(self: &Arc<Self>, token: CancellationToken) {
        let mut slot = self.escalator.lock();
        if slot.is_some() {
            debug!("Alarm escalator already running");
            return;
        }
        let engine = Arc::downgrade(self);
        *slot = Some(BackgroundLoop::spawn(
            "alarm-escalator",
            self.clock.clone(),
            self.tick,
            token,
            move || {
                let engine = engine.clone();
                async move {
                    let Some(engine) = engine.upgrade() else {
                        return;
                    };
                    match engine.escalate_due().await {
                        Ok(report) if report.escalated > 0 || report.expired > 0 => {
                            debug!(?report, "Escalator pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!("Escalator pass failed: {}", e),
                    }
                }
            },
        ));
    }

    pub async fn stop(&self) {
        let running = self.escalator.lock().take();
        if let Some(escalator) = running {
            escalator.stop().await;
        }
    }

    fn target_for(alarm: &Alarm) -> PushTarget {
        match alarm.agent_id {
            Some(agent_id) if !alarm.config.broadcast_to_all => {
                PushTarget::agent(alarm.tenant_id, alarm.project_id, agent_id)
            }
            _ => PushTarget::project(alarm.tenant_id, alarm.project_id),
        }
    }

    async fn push_level(&self, alarm: &Alarm) -> Result<()> {
        self.pusher
            .push(Self::target_for(alarm), PushMessage::alarm_triggered(alarm))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::InMemoryAlarmStore;
    use crate::clock::ManualClock;
    use crate::push::PushHub;
    use crate::types::AlarmLevel;

    struct Fixture {
        clock: ManualClock,
        hub: Arc<PushHub>,
        engine: AlarmEngine,
    }

    fn fixture(soft_expiry: Option<Duration>) -> Fixture {
        let clock = ManualClock::default();
        let hub = Arc::new(PushHub::new(64));
        let engine = AlarmEngine::new(
            Arc::new(InMemoryAlarmStore::new()),
            hub.clone(),
            clock.shared(),
            Duration::from_secs(30),
            soft_expiry,
        );
        Fixture { clock, hub, engine }
    }

    fn request(tenant_id: TenantId, priority: NotificationPriority) -> AlarmRequest {
        AlarmRequest {
            tenant_id,
            project_id: ProjectId::new(),
            assignment_id: None,
            agent_id: Some(AgentId::new()),
            title: "Urgent customer".to_string(),
            message: "Customer waiting".to_string(),
            priority,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_trigger_pushes_initial_level() {
        let fx = fixture(None);
        let tenant = TenantId::new();
        let mut subscription = fx.hub.subscribe(tenant, None, AgentId::new());

        let alarm = fx.engine.trigger(request(tenant, NotificationPriority::High)).await.unwrap();
        assert_eq!(alarm.current_level, AlarmLevel::Loud);
        assert_eq!(alarm.escalation_count, 0);

        let pushed = subscription.try_recv().unwrap();
        assert_eq!(pushed.kind(), "alarm_triggered");
        assert_eq!(pushed.alarm_id, Some(alarm.id));
        assert_eq!(pushed.level, Some(AlarmLevel::Loud));
    }

    #[tokio::test]
    async fn test_escalation_stops_at_max_level() {
        let fx = fixture(None);
        let tenant = TenantId::new();
        let alarm = fx.engine.trigger(request(tenant, NotificationPriority::Critical)).await.unwrap();
        let mut subscription = fx.hub.subscribe(tenant, None, AgentId::new());

        fx.clock.advance(Duration::from_secs(29));
        assert_eq!(fx.engine.escalate_due().await.unwrap().escalated, 0);

        fx.clock.advance(Duration::from_secs(1));
        assert_eq!(fx.engine.escalate_due().await.unwrap().escalated, 1);
        let stored = fx.engine.get(tenant, alarm.id).await.unwrap();
        assert_eq!(stored.current_level, AlarmLevel::Critical);
        assert_eq!(stored.escalation_count, 1);
        assert_eq!(subscription.drain().len(), 1);

        fx.clock.advance(Duration::from_secs(30));
        assert_eq!(fx.engine.escalate_due().await.unwrap().escalated, 0);
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_acknowledged_alarm_never_escalates() {
        let fx = fixture(None);
        let tenant = TenantId::new();
        let alarm = fx.engine.trigger(request(tenant, NotificationPriority::Critical)).await.unwrap();
        let agent = AgentId::new();

        fx.engine.acknowledge(tenant, alarm.id, agent, None).await.unwrap();
        fx.clock.advance(Duration::from_secs(300));
        assert_eq!(fx.engine.escalate_due().await.unwrap().escalated, 0);

        let stored = fx.engine.get(tenant, alarm.id).await.unwrap();
        assert_eq!(stored.current_level, AlarmLevel::Urgent);
        assert_eq!(stored.acknowledged_by, Some(agent));
    }

    #[tokio::test]
    async fn test_double_acknowledgement_fails() {
        let fx = fixture(None);
        let tenant = TenantId::new();
        let alarm = fx.engine.trigger(request(tenant, NotificationPriority::High)).await.unwrap();

        fx.engine.acknowledge(tenant, alarm.id, AgentId::new(), None).await.unwrap();
        let err = fx
            .engine
            .acknowledge(tenant, alarm.id, AgentId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngagementError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_soft_expiry_only_for_non_persistent() {
        let fx = fixture(Some(Duration::from_secs(60)));
        let tenant = TenantId::new();
        let low = fx.engine.trigger(request(tenant, NotificationPriority::Low)).await.unwrap();
        let high = fx.engine.trigger(request(tenant, NotificationPriority::High)).await.unwrap();

        fx.clock.advance(Duration::from_secs(600));
        let report = fx.engine.escalate_due().await.unwrap();
        assert_eq!(report.escalated, 2);
        assert_eq!(report.expired, 0);

        fx.clock.advance(Duration::from_secs(60));
        let report = fx.engine.escalate_due().await.unwrap();
        assert_eq!(report.expired, 1);

        assert!(!fx.engine.get(tenant, low.id).await.unwrap().is_active());
        assert!(fx.engine.get(tenant, high.id).await.unwrap().is_active());
    }
}
