//! In-process fan-out hub
//!
//! Each connected agent holds a [`PushSubscription`] backed by a bounded channel. The
//! websocket layer of the host application drains subscriptions onto its sockets.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::{PushMessage, PushTarget, Pusher};
use crate::error::{EngagementError, Result};
use crate::types::{AgentId, ProjectId, TenantId};

struct Subscriber {
    id: u64,
    project_id: Option<ProjectId>,
    agent_id: AgentId,
    tx: mpsc::Sender<PushMessage>,
}

impl Subscriber {
    fn routes(&self, target: &PushTarget) -> bool {
        let project_matches = match (self.project_id, target.project_id) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        };
        let agent_matches = target.agent_id.map_or(true, |agent| agent == self.agent_id);
        project_matches && agent_matches
    }
}

/// Receiving end handed to a connected agent
#[derive(Debug)]
pub struct PushSubscription {
    id: u64,
    rx: mpsc::Receiver<PushMessage>,
}

impl PushSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushMessage> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<PushMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Default [`Pusher`]: bounded per-subscriber queues keyed by tenant
pub struct PushHub {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: DashMap<TenantId, Vec<Subscriber>>,
}

impl PushHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
        }
    }

    /// Register an agent connection; `project_id = None` listens to every project
    pub fn subscribe(
        &self,
        tenant_id: TenantId,
        project_id: Option<ProjectId>,
        agent_id: AgentId,
    ) -> PushSubscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(tenant_id)
            .or_default()
            .push(Subscriber {
                id,
                project_id,
                agent_id,
                tx,
            });
        debug!(tenant_id = %tenant_id, agent_id = %agent_id, subscription = id, "Push subscriber registered");
        PushSubscription { id, rx }
    }

    pub fn unsubscribe(&self, tenant_id: TenantId, subscription: &PushSubscription) {
        if let Some(mut subscribers) = self.subscribers.get_mut(&tenant_id) {
            subscribers.retain(|s| s.id != subscription.id);
        }
    }

    pub fn subscriber_count(&self, tenant_id: TenantId) -> usize {
        self.subscribers
            .get(&tenant_id)
            .map(|subscribers| subscribers.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Pusher for PushHub {
    async fn push(&self, target: PushTarget, message: PushMessage) -> Result<()> {
        let Some(mut subscribers) = self.subscribers.get_mut(&target.tenant_id) else {
            debug!(tenant_id = %target.tenant_id, kind = message.kind(), "No subscribers for push");
            return Ok(());
        };

        let mut saturated = 0usize;
        subscribers.retain(|subscriber| {
            if !subscriber.routes(&target) {
                return true;
            }
            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    saturated += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        drop(subscribers);

        if saturated > 0 {
            return Err(EngagementError::busy(format!(
                "{} subscriber queue(s) full for {} push",
                saturated,
                message.kind()
            )));
        }
        Ok(())
    }
}
