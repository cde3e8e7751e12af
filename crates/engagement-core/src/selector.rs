//! Weighted agent selection over a presence snapshot
//!
//! Pure: no locks, no clock reads, no I/O. The caller passes the snapshot and the
//! instant to score against.
//!
//! Score terms (higher is better):
//!
//! | Term            | Value                                         |
//! |-----------------|-----------------------------------------------|
//! | preferred agent | 100, nothing else considered                  |
//! | workload        | `(1 - workload) * 30`                         |
//! | response time   | `min(20, 60 / (avg_rt + 1) * 20)` when known  |
//! | recency         | `min(20, minutes since last assignment / 10)` |
//! | skills          | match quality `* 20`                          |
//! | status          | online 10, away 5                             |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::presence::AgentPresence;
use crate::types::{AgentId, AgentSkill, AgentStatus, RequestType, Urgency};

/// Score given to the preferred agent
pub const PREFERRED_SCORE: f64 = 100.0;

/// Recency credit for an agent that was never assigned
const NEVER_ASSIGNED_RECENCY: f64 = 20.0;

/// What the caller is looking for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub required_skills: Vec<AgentSkill>,
    pub urgency: Urgency,
    pub request_type: RequestType,
    pub preferred_agent: Option<AgentId>,
    pub exclusions: BTreeSet<AgentId>,
    /// Seconds; agents known to answer slower are dropped
    pub max_response_time: Option<f64>,
    /// Agents with a known rating below this are dropped
    pub min_rating: Option<f64>,
}

impl SelectionCriteria {
    pub fn new(request_type: RequestType, urgency: Urgency) -> Self {
        Self {
            required_skills: Vec::new(),
            urgency,
            request_type,
            preferred_agent: None,
            exclusions: BTreeSet::new(),
            max_response_time: None,
            min_rating: None,
        }
    }

    pub fn with_required_skills(mut self, skills: impl IntoIterator<Item = AgentSkill>) -> Self {
        self.required_skills = skills.into_iter().collect();
        self
    }

    pub fn with_preferred(mut self, agent_id: AgentId) -> Self {
        self.preferred_agent = Some(agent_id);
        self
    }

    pub fn excluding(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.exclusions.extend(agents);
        self
    }

    pub fn with_max_response_time(mut self, seconds: f64) -> Self {
        self.max_response_time = Some(seconds);
        self
    }
}

/// Outcome of a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub selected: Option<AgentPresence>,
    pub alternate: Option<AgentPresence>,
    /// Audit string naming every score contribution of the selected agent
    pub reason: String,
    pub score: f64,
    /// Size of the snapshot considered
    pub total_agents: usize,
    /// Entries left after filtering
    pub candidates: usize,
}

/// One scored candidate
#[derive(Debug, Clone)]
pub struct ScoredAgent<'a> {
    pub agent: &'a AgentPresence,
    pub score: f64,
    pub reason: String,
    pub preferred: bool,
}

/// Skills that suit a request type, best first
pub fn preferred_skills(request_type: RequestType) -> &'static [AgentSkill] {
    match request_type {
        RequestType::Technical => &[AgentSkill::Technical, AgentSkill::Support],
        RequestType::Billing => &[AgentSkill::Billing, AgentSkill::Support],
        RequestType::Complaint => &[AgentSkill::Complaint, AgentSkill::Support],
        RequestType::Urgent | RequestType::Support => &[AgentSkill::Support, AgentSkill::General],
        RequestType::General => &[AgentSkill::General, AgentSkill::Support],
    }
}

/// How an entry satisfies the required skills
#[derive(Debug, Clone, Copy, PartialEq)]
enum SkillMatch {
    /// Every required skill held specifically
    Exact,
    /// Only via the `general` wildcard
    General,
    /// Fraction of the request type's preferred skills held
    Partial(f64),
}

impl SkillMatch {
    fn of(agent: &AgentPresence, criteria: &SelectionCriteria) -> Option<SkillMatch> {
        if criteria.required_skills.iter().all(|skill| agent.has_skill(*skill)) {
            return Some(SkillMatch::Exact);
        }
        if agent.has_skill(AgentSkill::General) {
            return Some(SkillMatch::General);
        }
        let preferred = preferred_skills(criteria.request_type);
        let held = preferred.iter().filter(|skill| agent.has_skill(**skill)).count();
        if held == 0 {
            return None;
        }
        Some(SkillMatch::Partial(held as f64 / preferred.len() as f64))
    }

    fn factor(self) -> f64 {
        match self {
            SkillMatch::Exact => 1.0,
            SkillMatch::General => 0.8,
            SkillMatch::Partial(fraction) => fraction,
        }
    }
}

fn passes_filter(agent: &AgentPresence, criteria: &SelectionCriteria) -> bool {
    if criteria.exclusions.contains(&agent.agent_id) {
        return false;
    }
    if SkillMatch::of(agent, criteria).is_none() {
        return false;
    }
    if let (Some(max), Some(actual)) = (criteria.max_response_time, agent.avg_response_time) {
        if actual > max {
            return false;
        }
    }
    if let (Some(min), Some(actual)) = (criteria.min_rating, agent.rating) {
        if actual < min {
            return false;
        }
    }
    true
}

/// Score one entry that already passed the filter
pub fn score<'a>(agent: &'a AgentPresence, criteria: &SelectionCriteria, now: DateTime<Utc>) -> ScoredAgent<'a> {
    if criteria.preferred_agent == Some(agent.agent_id) {
        return ScoredAgent {
            agent,
            score: PREFERRED_SCORE,
            reason: "preferred agent".to_string(),
            preferred: true,
        };
    }

    let mut total = 0.0;
    let mut parts = Vec::new();

    let workload = (1.0 - agent.workload()) * 30.0;
    total += workload;
    parts.push(format!("workload {:.1}", workload));

    if let Some(response_time) = agent.avg_response_time {
        let response = (60.0 / (response_time.max(0.0) + 1.0) * 20.0).min(20.0);
        total += response;
        parts.push(format!("response time {:.1}", response));
    }

    let recency = match agent.last_assignment {
        Some(at) => {
            let minutes = (now - at).num_milliseconds().max(0) as f64 / 60_000.0;
            (minutes / 10.0).min(20.0)
        }
        None => NEVER_ASSIGNED_RECENCY,
    };
    total += recency;
    parts.push(format!("assignment recency {:.1}", recency));

    let skills = SkillMatch::of(agent, criteria).map_or(0.0, SkillMatch::factor) * 20.0;
    total += skills;
    parts.push(format!("skills match {:.1}", skills));

    let status = match agent.status {
        AgentStatus::Online => 10.0,
        AgentStatus::Away => 5.0,
        _ => 0.0,
    };
    if status > 0.0 {
        total += status;
        parts.push(format!("status {:.1}", status));
    }

    ScoredAgent {
        agent,
        score: total,
        reason: format!("composite score from: [{}]", parts.join(" ")),
        preferred: false,
    }
}

/// Rank the snapshot and pick the best and runner-up
pub fn select(snapshot: &[AgentPresence], criteria: &SelectionCriteria, now: DateTime<Utc>) -> SelectionResult {
    let total_agents = snapshot.len();
    if snapshot.is_empty() {
        return SelectionResult {
            selected: None,
            alternate: None,
            reason: "No agents currently available".to_string(),
            score: 0.0,
            total_agents,
            candidates: 0,
        };
    }

    let mut ranked: Vec<ScoredAgent<'_>> = snapshot
        .iter()
        .filter(|agent| passes_filter(agent, criteria))
        .map(|agent| score(agent, criteria, now))
        .collect();

    if ranked.is_empty() {
        return SelectionResult {
            selected: None,
            alternate: None,
            reason: "No agents match the selection criteria".to_string(),
            score: 0.0,
            total_agents,
            candidates: 0,
        };
    }

    ranked.sort_by(|a, b| {
        b.preferred
            .cmp(&a.preferred)
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.agent.agent_id.cmp(&b.agent.agent_id))
    });

    let best = &ranked[0];
    let reason = if best.preferred {
        best.reason.clone()
    } else {
        format!("Best match based on {}", best.reason)
    };

    SelectionResult {
        selected: Some(best.agent.clone()),
        alternate: ranked.get(1).map(|runner_up| runner_up.agent.clone()),
        reason,
        score: best.score,
        total_agents,
        candidates: ranked.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TenantId;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    fn agent(name: &str, skills: &[AgentSkill], active: u32, max: u32) -> AgentPresence {
        AgentPresence::new(TenantId::new(), AgentId::new(), name)
            .with_skills(skills.iter().copied())
            .with_chats(active, max)
    }

    #[test]
    fn test_empty_snapshot() {
        let result = select(&[], &SelectionCriteria::new(RequestType::General, Urgency::Low), Utc::now());
        assert!(result.selected.is_none());
        assert_eq!(result.total_agents, 0);
        assert_eq!(result.reason, "No agents currently available");
    }

    #[test]
    fn test_composite_reason_lists_contributions() {
        let now = Utc::now();
        let b = agent("B", &[AgentSkill::Billing, AgentSkill::Support], 1, 5);
        let criteria = SelectionCriteria::new(RequestType::Billing, Urgency::High)
            .with_required_skills([AgentSkill::Billing]);

        let result = select(std::slice::from_ref(&b), &criteria, now);
        assert_close(result.score, 74.0);
        assert_eq!(
            result.reason,
            "Best match based on composite score from: \
             [workload 24.0 assignment recency 20.0 skills match 20.0 status 10.0]"
        );
    }

    #[test]
    fn test_general_skill_matches_with_penalty() {
        let now = Utc::now();
        let generalist = agent("G", &[AgentSkill::General], 0, 4);
        let criteria = SelectionCriteria::new(RequestType::Technical, Urgency::Normal)
            .with_required_skills([AgentSkill::Technical]);

        let scored = score(&generalist, &criteria, now);
        assert_close(scored.score, 30.0 + 20.0 + 16.0 + 10.0);
    }

    #[test]
    fn test_unrelated_skills_are_filtered() {
        let now = Utc::now();
        let sales = agent("S", &[AgentSkill::Sales], 0, 4);
        let criteria = SelectionCriteria::new(RequestType::Technical, Urgency::Normal)
            .with_required_skills([AgentSkill::Technical]);

        let result = select(&[sales], &criteria, now);
        assert!(result.selected.is_none());
        assert_eq!(result.total_agents, 1);
        assert_eq!(result.reason, "No agents match the selection criteria");
    }

    #[test]
    fn test_slow_responders_are_filtered_and_fast_ones_capped() {
        let now = Utc::now();
        let slow = agent("slow", &[AgentSkill::General], 0, 4).with_response_time(90.0);
        let fast = agent("fast", &[AgentSkill::General], 0, 4).with_response_time(1.0);
        let criteria = SelectionCriteria::new(RequestType::General, Urgency::High)
            .with_required_skills([AgentSkill::General])
            .with_max_response_time(30.0);

        let result = select(&[slow, fast.clone()], &criteria, now);
        assert_eq!(result.candidates, 1);
        assert_eq!(result.selected.unwrap().agent_id, fast.agent_id);
        assert_close(result.score, 30.0 + 20.0 + 20.0 + 20.0 + 10.0);
    }

    #[test]
    fn test_recency_grows_with_idle_time() {
        let now = Utc::now();
        let recent = agent("recent", &[AgentSkill::General], 0, 4)
            .with_last_assignment(now - Duration::minutes(50));
        let criteria = SelectionCriteria::new(RequestType::General, Urgency::Low)
            .with_required_skills([AgentSkill::General]);
        let scored = score(&recent, &criteria, now);
        assert_close(scored.score, 30.0 + 5.0 + 20.0 + 10.0);
    }

    #[test]
    fn test_ties_break_by_agent_id() {
        let now = Utc::now();
        let first = agent("one", &[AgentSkill::General], 0, 4);
        let second = agent("two", &[AgentSkill::General], 0, 4);
        let criteria = SelectionCriteria::new(RequestType::General, Urgency::Low)
            .with_required_skills([AgentSkill::General]);

        let lower = first.agent_id.min(second.agent_id);
        let result = select(&[first.clone(), second.clone()], &criteria, now);
        assert_eq!(result.selected.unwrap().agent_id, lower);
        let reversed = select(&[second, first], &criteria, now);
        assert_eq!(reversed.selected.unwrap().agent_id, lower);
    }

    #[test]
    fn test_excluded_preferred_agent_is_not_selected() {
        let now = Utc::now();
        let p = agent("P", &[AgentSkill::General], 0, 4);
        let q = agent("Q", &[AgentSkill::General], 0, 4);
        let criteria = SelectionCriteria::new(RequestType::General, Urgency::Low)
            .with_required_skills([AgentSkill::General])
            .with_preferred(p.agent_id)
            .excluding([p.agent_id]);

        let result = select(&[p, q.clone()], &criteria, now);
        assert_eq!(result.selected.unwrap().agent_id, q.agent_id);
        assert!(result.alternate.is_none());
    }
}
