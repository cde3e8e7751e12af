//! Alarm persistence
//!
//! [`AlarmStore`] is the durability seam for alarms. Every write commits before the
//! call returns and per-record updates are serialized by the implementation. The
//! in-memory store here backs tests and single-node deployments; a relational store
//! implements the same trait with row-level locking.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

use super::types::{Alarm, AlarmStats};
use crate::error::{EngagementError, Result};
use crate::types::{AgentId, AlarmId, AlarmLevel, ProjectId, TenantId};

#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Persist a new alarm; fails on a duplicate id
    async fn create_alarm(&self, alarm: &Alarm) -> Result<()>;

    /// Full replace of an existing, still active alarm
    async fn update_alarm(&self, alarm: &Alarm) -> Result<()>;

    /// Atomically mark acknowledged; fails if already acknowledged
    async fn ack_alarm(
        &self,
        tenant_id: TenantId,
        alarm_id: AlarmId,
        agent_id: AgentId,
        response: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Alarm>;

    async fn get_by_id(&self, tenant_id: TenantId, alarm_id: AlarmId) -> Result<Alarm>;

    /// Active alarms of a tenant, optionally narrowed to a project, oldest first
    async fn get_active(&self, tenant_id: TenantId, project_id: Option<ProjectId>) -> Result<Vec<Alarm>>;

    /// Active alarms below their max level whose interval has elapsed at `now`
    async fn get_for_escalation(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>>;

    /// Non-persistent alarms that sat at max level for `quiescence`
    async fn get_for_expiry(&self, now: DateTime<Utc>, quiescence: Duration) -> Result<Vec<Alarm>>;

    /// Soft-expire an active alarm
    async fn expire_alarm(&self, tenant_id: TenantId, alarm_id: AlarmId, at: DateTime<Utc>) -> Result<Alarm>;

    async fn stats(&self, tenant_id: TenantId, project_id: Option<ProjectId>, now: DateTime<Utc>) -> Result<AlarmStats>;
}

fn inactive_state(alarm: &Alarm) -> &'static str {
    if alarm.is_acknowledged {
        "acknowledged"
    } else {
        "expired"
    }
}

/// Alarm store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryAlarmStore {
    alarms: RwLock<HashMap<AlarmId, Alarm>>,
}

impl InMemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alarms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.read().is_empty()
    }
}

#[async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn create_alarm(&self, alarm: &Alarm) -> Result<()> {
        let mut alarms = self.alarms.write();
        if alarms.contains_key(&alarm.id) {
            return Err(EngagementError::storage(format!("duplicate alarm id {}", alarm.id)));
        }
        alarms.insert(alarm.id, alarm.clone());
        Ok(())
    }

    async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        if alarm.current_level > alarm.config.max_level {
            return Err(EngagementError::internal(format!(
                "alarm {} level {} exceeds max {}",
                alarm.id, alarm.current_level, alarm.config.max_level
            )));
        }

        let mut alarms = self.alarms.write();
        let stored = alarms
            .get_mut(&alarm.id)
            .filter(|stored| stored.tenant_id == alarm.tenant_id)
            .ok_or_else(|| EngagementError::not_found("alarm", alarm.id))?;
        if !stored.is_active() {
            return Err(EngagementError::invalid_transition(alarm.id, "update", inactive_state(stored)));
        }
        if alarm.current_level < stored.current_level {
            return Err(EngagementError::invalid_transition(
                alarm.id,
                "lower the level of",
                format!("at {}", stored.current_level),
            ));
        }
        *stored = alarm.clone();
        Ok(())
    }

    async fn ack_alarm(
        &self,
        tenant_id: TenantId,
        alarm_id: AlarmId,
        agent_id: AgentId,
        response: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Alarm> {
        let mut alarms = self.alarms.write();
        let alarm = alarms
            .get_mut(&alarm_id)
            .filter(|alarm| alarm.tenant_id == tenant_id)
            .ok_or_else(|| EngagementError::not_found("alarm", alarm_id))?;
        if alarm.is_acknowledged {
            return Err(EngagementError::invalid_transition(alarm_id, "acknowledge", "acknowledged"));
        }
        alarm.is_acknowledged = true;
        alarm.acknowledged_by = Some(agent_id);
        alarm.acknowledged_at = Some(at);
        alarm.response = response;
        Ok(alarm.clone())
    }

    async fn get_by_id(&self, tenant_id: TenantId, alarm_id: AlarmId) -> Result<Alarm> {
        self.alarms
            .read()
            .get(&alarm_id)
            .filter(|alarm| alarm.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| EngagementError::not_found("alarm", alarm_id))
    }

    async fn get_active(&self, tenant_id: TenantId, project_id: Option<ProjectId>) -> Result<Vec<Alarm>> {
        let mut active: Vec<Alarm> = self
            .alarms
            .read()
            .values()
            .filter(|alarm| alarm.tenant_id == tenant_id && alarm.is_active())
            .filter(|alarm| project_id.map_or(true, |project| alarm.project_id == project))
            .cloned()
            .collect();
        active.sort_by_key(|alarm| alarm.start_time);
        Ok(active)
    }

    async fn get_for_escalation(&self, now: DateTime<Utc>) -> Result<Vec<Alarm>> {
        Ok(self
            .alarms
            .read()
            .values()
            .filter(|alarm| alarm.is_due(now))
            .cloned()
            .collect())
    }

    async fn get_for_expiry(&self, now: DateTime<Utc>, quiescence: Duration) -> Result<Vec<Alarm>> {
        Ok(self
            .alarms
            .read()
            .values()
            .filter(|alarm| alarm.is_expirable(now, quiescence))
            .cloned()
            .collect())
    }

    async fn expire_alarm(&self, tenant_id: TenantId, alarm_id: AlarmId, at: DateTime<Utc>) -> Result<Alarm> {
        let mut alarms = self.alarms.write();
        let alarm = alarms
            .get_mut(&alarm_id)
            .filter(|alarm| alarm.tenant_id == tenant_id)
            .ok_or_else(|| EngagementError::not_found("alarm", alarm_id))?;
        if !alarm.is_active() {
            return Err(EngagementError::invalid_transition(alarm_id, "expire", inactive_state(alarm)));
        }
        alarm.expired_at = Some(at);
        Ok(alarm.clone())
    }

    async fn stats(&self, tenant_id: TenantId, project_id: Option<ProjectId>, now: DateTime<Utc>) -> Result<AlarmStats> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(now);

        let alarms = self.alarms.read();
        let mut stats = AlarmStats::default();
        for alarm in alarms
            .values()
            .filter(|alarm| alarm.tenant_id == tenant_id)
            .filter(|alarm| project_id.map_or(true, |project| alarm.project_id == project))
        {
            if alarm.start_time >= midnight {
                stats.total_today += 1;
            }
            if alarm.is_acknowledged {
                stats.acknowledged_count += 1;
            } else {
                stats.unacknowledged_count += 1;
            }
            if alarm.is_active() {
                stats.active_count += 1;
                if alarm.current_level >= AlarmLevel::Urgent {
                    stats.critical_count += 1;
                }
                *stats.by_level.entry(alarm.current_level).or_insert(0) += 1;
                *stats.by_priority.entry(alarm.priority).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }
}
