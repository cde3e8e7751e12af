//! Agent request detection
//!
//! Deterministic, rule-based classification of a visitor message. Six pattern stages run
//! in a fixed order over the lowercased text; every matching pattern adds its weight to
//! the running confidence, appends its keywords and leaves a line in the reasoning trace.
//! Request type and urgency are then read off the accumulated keywords.
//!
//! ```rust
//! use tms_engagement_core::classifier::RequestClassifier;
//! use tms_engagement_core::types::{RequestType, Urgency};
//!
//! let classifier = RequestClassifier::new(true, 0.7);
//! let result = classifier.classify("I need to speak to a human agent right now, it's urgent!");
//! assert!(result.is_agent_request);
//! assert_eq!(result.request_type, RequestType::Urgent);
//! assert_eq!(result.urgency, Urgency::High);
//! ```

mod patterns;

use serde::{Deserialize, Serialize};

use crate::config::{EngagementConfig, DEFAULT_REQUEST_THRESHOLD};
use crate::types::{RequestType, Urgency};
use patterns::STAGES;

/// Outcome of classifying one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_agent_request: bool,
    /// Accumulated pattern weight clamped to `[0, 1]`
    pub confidence: f64,
    pub request_type: RequestType,
    pub urgency: Urgency,
    /// Keywords of every matching pattern in match order; may repeat
    pub keywords: Vec<String>,
    pub reasoning: Vec<String>,
}

impl ClassificationResult {
    fn negative(reason: &str) -> Self {
        Self {
            is_agent_request: false,
            confidence: 0.0,
            request_type: RequestType::General,
            urgency: Urgency::Low,
            keywords: Vec::new(),
            reasoning: vec![reason.to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
    enabled: bool,
    threshold: f64,
    max_message_bytes: usize,
}

impl RequestClassifier {
    /// A threshold that is not positive falls back to 0.7
    pub fn new(enabled: bool, threshold: f64) -> Self {
        let threshold = if threshold <= 0.0 {
            DEFAULT_REQUEST_THRESHOLD
        } else {
            threshold
        };
        Self {
            enabled,
            threshold,
            max_message_bytes: usize::MAX,
        }
    }

    pub fn from_config(config: &EngagementConfig) -> Self {
        Self {
            max_message_bytes: config.max_message_bytes,
            ..Self::new(config.agent_request_detection, config.effective_threshold())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Effective threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, message: &str) -> ClassificationResult {
        if !self.enabled {
            return ClassificationResult::negative("disabled");
        }

        let normalized = truncate(message, self.max_message_bytes).trim().to_lowercase();
        if normalized.is_empty() {
            return ClassificationResult::negative("empty");
        }

        let mut confidence = 0.0;
        let mut keywords: Vec<String> = Vec::new();
        let mut reasoning = Vec::new();

        for stage in STAGES.iter() {
            for pattern in stage.patterns.iter().filter(|p| p.regex.is_match(&normalized)) {
                confidence += pattern.weight;
                keywords.extend(pattern.keywords.iter().map(|k| k.to_string()));
                reasoning.push(format!("{}: {}", stage.label, pattern.keywords[0]));
            }
        }

        let confidence = confidence.clamp(0.0, 1.0);
        let is_agent_request = confidence >= self.threshold;
        reasoning.push(format!(
            "Confidence {:.2} {} threshold {:.2}",
            confidence,
            if is_agent_request { "meets" } else { "below" },
            self.threshold
        ));

        let (request_type, urgency) = if is_agent_request {
            let joined = keywords.join(" ");
            (request_type_for(&joined), urgency_for(&joined))
        } else {
            (RequestType::General, Urgency::Low)
        };

        ClassificationResult {
            is_agent_request,
            confidence,
            request_type,
            urgency,
            keywords,
            reasoning,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn request_type_for(keywords: &str) -> RequestType {
    if contains_any(keywords, &["billing", "payment", "refund"]) {
        RequestType::Billing
    } else if contains_any(keywords, &["technical", "api", "configuration"]) {
        RequestType::Technical
    } else if contains_any(keywords, &["complaint", "frustrated", "unacceptable"]) {
        RequestType::Complaint
    } else if contains_any(keywords, &["urgent", "emergency", "critical"]) {
        RequestType::Urgent
    } else if contains_any(keywords, &["help", "support", "assistance"]) {
        RequestType::Support
    } else {
        RequestType::General
    }
}

fn urgency_for(keywords: &str) -> Urgency {
    if contains_any(keywords, &["legal threat", "critical", "outage"]) {
        Urgency::Critical
    } else if contains_any(keywords, &["urgent", "emergency", "business impact"]) {
        Urgency::High
    } else if contains_any(keywords, &["complaint", "billing error", "escalation"]) {
        Urgency::Normal
    } else {
        Urgency::Low
    }
}

/// Cut `text` to at most `max_bytes`, backing off to a char boundary
pub(crate) fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
