//! Live agent presence
//!
//! The registry keeps one [`AgentPresence`] per `(tenant, agent)` behind a single
//! reader/writer lock. Readers get deep copies so they can iterate without holding the
//! lock. Entries that stop reporting activity first drop out of [`PresenceRegistry::available`]
//! (liveness window) and are later evicted by the GC loop (stale window).

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{to_chrono, SharedClock};
use crate::config::EngagementConfig;
use crate::error::{EngagementError, Result};
use crate::tasks::BackgroundLoop;
use crate::types::{AgentId, AgentSkill, AgentStatus, TenantId};

/// Workload at or above which an agent counts as busy in stats
pub const BUSY_WORKLOAD: f64 = 0.8;

/// Presence record for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPresence {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub name: String,
    pub email: String,
    pub status: AgentStatus,
    pub skills: BTreeSet<AgentSkill>,
    pub active_chats: u32,
    pub max_chats: u32,
    /// Average response time in seconds, when known
    pub avg_response_time: Option<f64>,
    /// Customer satisfaction rating, when known
    pub rating: Option<f64>,
    pub last_activity: DateTime<Utc>,
    pub last_assignment: Option<DateTime<Utc>>,
}

impl AgentPresence {
    /// Online agent with `general` skill and room for three chats
    pub fn new(tenant_id: TenantId, agent_id: AgentId, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            agent_id,
            name: name.into(),
            email: String::new(),
            status: AgentStatus::Online,
            skills: BTreeSet::from([AgentSkill::General]),
            active_chats: 0,
            max_chats: 3,
            avg_response_time: None,
            rating: None,
            last_activity: Utc::now(),
            last_assignment: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_skills(mut self, skills: impl IntoIterator<Item = AgentSkill>) -> Self {
        self.skills = skills.into_iter().collect();
        self
    }

    pub fn with_chats(mut self, active_chats: u32, max_chats: u32) -> Self {
        self.active_chats = active_chats;
        self.max_chats = max_chats;
        self
    }

    pub fn with_response_time(mut self, seconds: f64) -> Self {
        self.avg_response_time = Some(seconds);
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_last_assignment(mut self, at: DateTime<Utc>) -> Self {
        self.last_assignment = Some(at);
        self
    }

    /// `active / max` clamped to `[0, 1]`; zero when `max` is zero
    pub fn workload(&self) -> f64 {
        if self.max_chats == 0 {
            return 0.0;
        }
        (self.active_chats as f64 / self.max_chats as f64).clamp(0.0, 1.0)
    }

    pub fn has_skill(&self, skill: AgentSkill) -> bool {
        self.skills.contains(&skill)
    }

    /// The availability predicate
    pub fn is_available(&self, now: DateTime<Utc>, liveness: Duration) -> bool {
        self.status.accepts_work()
            && self.active_chats < self.max_chats
            && self.workload() < 1.0
            && now - self.last_activity <= to_chrono(liveness)
    }
}

/// Coverage counts for a tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceStats {
    pub total_agents: usize,
    pub online_agents: usize,
    pub available_agents: usize,
    pub busy_agents: usize,
    pub avg_workload: f64,
    /// Number of available agents per skill
    pub skills_coverage: BTreeMap<AgentSkill, usize>,
}

type PresenceKey = (TenantId, AgentId);

pub struct PresenceRegistry {
    clock: SharedClock,
    liveness: Duration,
    stale: Duration,
    gc_interval: Duration,
    agents: RwLock<HashMap<PresenceKey, AgentPresence>>,
    gc_loop: Mutex<Option<BackgroundLoop>>,
}

impl PresenceRegistry {
    pub fn new(clock: SharedClock, config: &EngagementConfig) -> Self {
        Self {
            clock,
            liveness: config.presence_liveness(),
            stale: config.presence_stale(),
            gc_interval: config.presence_gc_interval(),
            agents: RwLock::new(HashMap::new()),
            gc_loop: Mutex::new(None),
        }
    }

    /// Insert or replace an entry; `last_activity` is reset to now
    pub fn register(&self, mut entry: AgentPresence) {
        entry.last_activity = self.clock.now();
        info!(
            tenant_id = %entry.tenant_id,
            agent_id = %entry.agent_id,
            status = %entry.status,
            "Agent registered for presence"
        );
        self.agents
            .write()
            .insert((entry.tenant_id, entry.agent_id), entry);
    }

    pub fn unregister(&self, tenant_id: TenantId, agent_id: AgentId) -> Option<AgentPresence> {
        let removed = self.agents.write().remove(&(tenant_id, agent_id));
        if removed.is_some() {
            info!(tenant_id = %tenant_id, agent_id = %agent_id, "Agent unregistered from presence");
        }
        removed
    }

    pub fn update_status(&self, tenant_id: TenantId, agent_id: AgentId, status: AgentStatus) -> Result<()> {
        self.mutate(tenant_id, agent_id, |entry, _| entry.status = status)
    }

    /// Set the active chat count
    pub fn update_workload(&self, tenant_id: TenantId, agent_id: AgentId, active_chats: u32) -> Result<()> {
        self.mutate(tenant_id, agent_id, |entry, _| entry.active_chats = active_chats)
    }

    /// Heartbeat
    pub fn touch(&self, tenant_id: TenantId, agent_id: AgentId) -> Result<()> {
        self.mutate(tenant_id, agent_id, |_, _| {})
    }

    /// One more active chat, stamped as the latest assignment
    pub fn record_assignment(&self, tenant_id: TenantId, agent_id: AgentId) -> Result<()> {
        self.mutate(tenant_id, agent_id, |entry, now| {
            entry.active_chats = entry.active_chats.saturating_add(1);
            entry.last_assignment = Some(now);
        })
    }

    /// Give back a chat slot taken by [`PresenceRegistry::record_assignment`]
    pub fn release_assignment(&self, tenant_id: TenantId, agent_id: AgentId) -> Result<()> {
        self.mutate(tenant_id, agent_id, |entry, _| {
            entry.active_chats = entry.active_chats.saturating_sub(1);
        })
    }

    fn mutate<F>(&self, tenant_id: TenantId, agent_id: AgentId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AgentPresence, DateTime<Utc>),
    {
        let now = self.clock.now();
        let mut agents = self.agents.write();
        let entry = agents
            .get_mut(&(tenant_id, agent_id))
            .ok_or_else(|| EngagementError::not_found("agent presence", agent_id))?;
        apply(entry, now);
        entry.last_activity = now;
        Ok(())
    }

    pub fn get(&self, tenant_id: TenantId, agent_id: AgentId) -> Option<AgentPresence> {
        self.agents.read().get(&(tenant_id, agent_id)).cloned()
    }

    /// Snapshot of the tenant's available agents, ordered by agent id
    pub fn available(&self, tenant_id: TenantId) -> Vec<AgentPresence> {
        let now = self.clock.now();
        let mut snapshot: Vec<AgentPresence> = self
            .agents
            .read()
            .values()
            .filter(|entry| entry.tenant_id == tenant_id && entry.is_available(now, self.liveness))
            .cloned()
            .collect();
        snapshot.sort_by_key(|entry| entry.agent_id);
        snapshot
    }

    pub fn stats(&self, tenant_id: TenantId) -> PresenceStats {
        let now = self.clock.now();
        let agents = self.agents.read();
        let mut stats = PresenceStats::default();
        let mut workload_sum = 0.0;

        for entry in agents.values().filter(|entry| entry.tenant_id == tenant_id) {
            stats.total_agents += 1;
            workload_sum += entry.workload();
            if entry.status == AgentStatus::Online {
                stats.online_agents += 1;
            }
            if entry.workload() >= BUSY_WORKLOAD {
                stats.busy_agents += 1;
            }
            if entry.is_available(now, self.liveness) {
                stats.available_agents += 1;
                for skill in &entry.skills {
                    *stats.skills_coverage.entry(*skill).or_insert(0) += 1;
                }
            }
        }

        if stats.total_agents > 0 {
            stats.avg_workload = workload_sum / stats.total_agents as f64;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Evict entries idle for longer than the stale window; returns how many went
    ///
    /// Victims are collected under the read lock and re-checked under the write lock,
    /// so an agent that reports activity in between survives.
    pub fn collect_garbage(&self) -> usize {
        let now = self.clock.now();
        let stale = to_chrono(self.stale);

        let victims: Vec<PresenceKey> = self
            .agents
            .read()
            .iter()
            .filter(|(_, entry)| now - entry.last_activity > stale)
            .map(|(key, _)| *key)
            .collect();
        if victims.is_empty() {
            return 0;
        }

        let mut agents = self.agents.write();
        let mut evicted = 0;
        for key in victims {
            let still_stale = agents
                .get(&key)
                .is_some_and(|entry| now - entry.last_activity > stale);
            if still_stale {
                agents.remove(&key);
                evicted += 1;
            }
        }
        drop(agents);

        if evicted > 0 {
            info!("🧹 Evicted {} stale agent presence entries", evicted);
        }
        evicted
    }

    /// Start the GC loop; a second call while running is a no-op
    pub fn start_gc(self: &Arc<Self>, token: CancellationToken) {
        let mut slot = self.gc_loop.lock();
        if slot.is_some() {
            debug!("Presence GC already running");
            return;
        }
        let registry = Arc::downgrade(self);
        *slot = Some(BackgroundLoop::spawn(
            "presence-gc",
            self.clock.clone(),
            self.gc_interval,
            token,
            move || {
                let registry = registry.clone();
                async move {
                    if let Some(registry) = registry.upgrade() {
                        registry.collect_garbage();
                    }
                }
            },
        ));
    }

    pub async fn stop(&self) {
        let running = self.gc_loop.lock().take();
        if let Some(gc) = running {
            gc.stop().await;
        }
    }
}
