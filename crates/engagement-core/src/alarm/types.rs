//! Alarm records and escalation configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::{AgentId, AlarmId, AlarmLevel, AssignmentId, NotificationPriority, ProjectId, TenantId};

/// Free-form alarm metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// How an alarm escalates over time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub initial_level: AlarmLevel,
    pub escalation_interval: Duration,
    pub max_level: AlarmLevel,
    pub persist_until_acknowledged: bool,
    pub audio_enabled: bool,
    pub visual_enabled: bool,
    pub broadcast_to_all: bool,
}

impl EscalationConfig {
    /// Escalation ladder for a priority
    pub fn for_priority(priority: NotificationPriority) -> Self {
        let (initial_level, interval, max_level, persist, audio, broadcast) = match priority {
            NotificationPriority::Low => (AlarmLevel::Soft, 600, AlarmLevel::Medium, false, false, false),
            NotificationPriority::Normal => (AlarmLevel::Medium, 300, AlarmLevel::Loud, true, true, false),
            NotificationPriority::High => (AlarmLevel::Loud, 120, AlarmLevel::Urgent, true, true, true),
            NotificationPriority::Urgent => (AlarmLevel::Urgent, 60, AlarmLevel::Critical, true, true, true),
            NotificationPriority::Critical => (AlarmLevel::Urgent, 30, AlarmLevel::Critical, true, true, true),
        };

        Self {
            initial_level,
            escalation_interval: Duration::from_secs(interval),
            max_level,
            persist_until_acknowledged: persist,
            audio_enabled: audio,
            visual_enabled: true,
            broadcast_to_all: broadcast,
        }
    }
}

/// An escalating notification attached to a high-priority assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub assignment_id: Option<AssignmentId>,
    pub agent_id: Option<AgentId>,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub current_level: AlarmLevel,
    pub start_time: DateTime<Utc>,
    pub last_escalation: DateTime<Utc>,
    pub escalation_count: u32,
    pub is_acknowledged: bool,
    pub acknowledged_by: Option<AgentId>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub response: Option<String>,
    /// Set when a non-persistent alarm soft-expires
    pub expired_at: Option<DateTime<Utc>>,
    pub config: EscalationConfig,
    pub metadata: Metadata,
}

impl Alarm {
    /// Neither acknowledged nor expired
    pub fn is_active(&self) -> bool {
        !self.is_acknowledged && self.expired_at.is_none()
    }

    /// Whether the escalator should advance this alarm at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active()
            && self.current_level < self.config.max_level
            && self.last_escalation + crate::clock::to_chrono(self.config.escalation_interval) <= now
    }

    /// Whether a non-persistent alarm has sat at max level for `quiescence`
    pub fn is_expirable(&self, now: DateTime<Utc>, quiescence: Duration) -> bool {
        self.is_active()
            && !self.config.persist_until_acknowledged
            && self.current_level >= self.config.max_level
            && self.last_escalation + crate::clock::to_chrono(quiescence) <= now
    }
}

/// Aggregate counts for a tenant (optionally narrowed to one project)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmStats {
    pub active_count: usize,
    /// Active alarms at level urgent or above
    pub critical_count: usize,
    pub unacknowledged_count: usize,
    pub acknowledged_count: usize,
    /// Alarms started since UTC midnight
    pub total_today: usize,
    pub by_level: BTreeMap<AlarmLevel, usize>,
    pub by_priority: BTreeMap<NotificationPriority, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_table() {
        let low = EscalationConfig::for_priority(NotificationPriority::Low);
        assert_eq!(low.initial_level, AlarmLevel::Soft);
        assert_eq!(low.escalation_interval, Duration::from_secs(600));
        assert_eq!(low.max_level, AlarmLevel::Medium);
        assert!(!low.persist_until_acknowledged);
        assert!(!low.audio_enabled);

        let high = EscalationConfig::for_priority(NotificationPriority::High);
        assert_eq!(high.initial_level, AlarmLevel::Loud);
        assert_eq!(high.escalation_interval, Duration::from_secs(120));
        assert_eq!(high.max_level, AlarmLevel::Urgent);
        assert!(high.broadcast_to_all);

        let critical = EscalationConfig::for_priority(NotificationPriority::Critical);
        assert_eq!(critical.initial_level, AlarmLevel::Urgent);
        assert_eq!(critical.escalation_interval, Duration::from_secs(30));
        assert_eq!(critical.max_level, AlarmLevel::Critical);
    }

    #[test]
    fn test_every_initial_level_within_max() {
        for priority in NotificationPriority::ALL {
            let config = EscalationConfig::for_priority(*priority);
            assert!(config.initial_level <= config.max_level, "{}", priority);
        }
    }
}
