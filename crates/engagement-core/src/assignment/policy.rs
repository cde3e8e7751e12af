//! Fixed per-type and per-urgency tables for assignments

use std::time::Duration;

use super::types::AssignmentRequest;
use crate::selector::SelectionCriteria;
use crate::types::{AgentSkill, Priority, RequestType, Urgency};

/// Longest customer message quoted in an assignment notification
const NOTIFICATION_QUOTE_CHARS: usize = 100;

pub fn required_skills(request_type: RequestType) -> Vec<AgentSkill> {
    let skill = match request_type {
        RequestType::Technical => AgentSkill::Technical,
        RequestType::Billing => AgentSkill::Billing,
        RequestType::Complaint => AgentSkill::Complaint,
        RequestType::Support => AgentSkill::Support,
        RequestType::General | RequestType::Urgent => AgentSkill::General,
    };
    vec![skill]
}

/// How long the agent has to accept before the assignment times out
pub fn assignment_timeout(urgency: Urgency) -> Duration {
    match urgency {
        Urgency::Critical => Duration::from_secs(60),
        Urgency::High => Duration::from_secs(3 * 60),
        Urgency::Normal => Duration::from_secs(5 * 60),
        Urgency::Low => Duration::from_secs(10 * 60),
    }
}

/// Seconds; agents with a slower average are not considered
pub fn max_response_time(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Critical => 10.0,
        Urgency::High => 30.0,
        Urgency::Normal => 60.0,
        Urgency::Low => 120.0,
    }
}

/// Hint returned to the caller when nobody is available
pub fn retry_after(urgency: Urgency) -> Duration {
    match urgency {
        Urgency::Critical => Duration::from_secs(30),
        Urgency::High => Duration::from_secs(60),
        Urgency::Normal => Duration::from_secs(2 * 60),
        Urgency::Low => Duration::from_secs(5 * 60),
    }
}

pub fn raises_alarm(priority: Priority, urgency: Urgency) -> bool {
    priority >= Priority::High || urgency == Urgency::Critical
}

pub fn criteria_for(request: &AssignmentRequest) -> SelectionCriteria {
    let mut criteria = SelectionCriteria::new(request.request_type, request.urgency)
        .with_required_skills(request.required_skills.iter().copied())
        .excluding(request.exclusions.iter().copied())
        .with_max_response_time(max_response_time(request.urgency));
    if let Some(preferred) = request.preferred_agent {
        criteria = criteria.with_preferred(preferred);
    }
    criteria
}

pub fn notification_title(request_type: RequestType) -> String {
    format!("New {} Assignment", request_type)
}

pub fn notification_body(priority: Priority, customer_message: &str) -> String {
    let mut body = format!(
        "You have been assigned to assist a customer. Priority: {}",
        priority
    );
    if !customer_message.is_empty() {
        body.push_str("\nCustomer message: ");
        body.push_str(&quote(customer_message));
    }
    body
}

fn quote(message: &str) -> String {
    if message.chars().count() <= NOTIFICATION_QUOTE_CHARS {
        return message.to_string();
    }
    let mut quoted: String = message.chars().take(NOTIFICATION_QUOTE_CHARS - 3).collect();
    quoted.push_str("...");
    quoted
}
