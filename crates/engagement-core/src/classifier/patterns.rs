//! Pattern tables for agent request detection
//!
//! Every table entry is `(regex, weight, keywords)`. Input is lowercased before matching.

use once_cell::sync::Lazy;
use regex::Regex;

pub(crate) struct Pattern {
    pub regex: Regex,
    pub weight: f64,
    pub keywords: &'static [&'static str],
}

/// One classification stage with its reasoning prefix
pub(crate) struct Stage {
    pub label: &'static str,
    pub patterns: Vec<Pattern>,
}

fn compile(table: &[(&'static str, f64, &'static [&'static str])]) -> Vec<Pattern> {
    table
        .iter()
        .map(|(source, weight, keywords)| Pattern {
            // Static tables; covered by test_all_patterns_compile.
            regex: Regex::new(source).unwrap_or_else(|e| panic!("invalid pattern {}: {}", source, e)),
            weight: *weight,
            keywords: *keywords,
        })
        .collect()
}

const EXPLICIT: &[(&str, f64, &[&str])] = &[
    (r"\b(speak|talk|chat)\s+(?:to|with)\s+(?:a\s+)?(?:human|person|agent|representative|someone)\b", 0.9, &["speak to human", "agent"]),
    (r"\b(?:can\s+i|i\s+(?:want|need|would\s+like)\s+to)\s+(?:speak|talk|chat)\s+(?:to|with)\s+(?:a\s+)?(?:human|person|agent|representative|someone)\b", 0.9, &["want to speak", "agent"]),
    (r"\b(?:connect|transfer)\s+me\s+(?:to|with)\s+(?:a\s+)?(?:human|person|agent|representative|someone|customer\s+service|support)\b", 0.85, &["connect me", "agent"]),
    (r"\b(?:i\s+need|get\s+me)\s+(?:a\s+)?(?:human|person|agent|representative|someone)\b", 0.8, &["need human", "agent"]),
    (r"\breal\s+(?:human|person|agent)\b", 0.8, &["real human", "agent"]),
    (r"\b(?:human|live)\s+(?:agent|support|person|representative)\b", 0.85, &["human agent", "live support"]),
    (r"\b(?:customer\s+)?(?:service|support)\s+(?:agent|representative|person)\b", 0.75, &["customer service", "agent"]),
    (r"\boperator\b", 0.7, &["operator"]),
    (r"\b(?:escalate|supervisor|manager)\b", 0.8, &["escalate", "supervisor"]),
];

const COMPLAINT: &[(&str, f64, &[&str])] = &[
    (r"\b(?:frustrated|angry|upset|disappointed|unsatisfied)\b", 0.4, &["frustrated", "complaint"]),
    (r"\b(?:terrible|awful|horrible|worst)\s+(?:service|experience|support)\b", 0.6, &["terrible service", "complaint"]),
    (r"\b(?:not\s+working|broken|doesn't\s+work|isn't\s+working)\b", 0.3, &["not working", "issue"]),
    (r"\b(?:charged|billed)\s+(?:twice|wrong|incorrectly|error)\b", 0.5, &["billing error", "complaint"]),
    (r"\bthis\s+is\s+(?:ridiculous|unacceptable|outrageous)\b", 0.7, &["unacceptable", "complaint"]),
    (r"\bi\s+(?:demand|want)\s+(?:a\s+)?(?:refund|compensation)\b", 0.7, &["demand refund", "complaint"]),
    (r"\b(?:sue|lawsuit|legal\s+action|attorney|lawyer)\b", 0.8, &["legal threat", "urgent"]),
];

const URGENCY: &[(&str, f64, &[&str])] = &[
    (r"\b(?:urgent|emergency|asap|immediately|right\s+now)\b", 0.6, &["urgent", "emergency"]),
    (r"\b(?:critical|mission\s+critical|production\s+down|outage)\b", 0.7, &["critical", "outage"]),
    (r"\b(?:losing\s+money|revenue\s+impact|business\s+impact)\b", 0.6, &["business impact", "urgent"]),
    (r"\b(?:deadline|time\s+sensitive|running\s+out\s+of\s+time)\b", 0.5, &["deadline", "time sensitive"]),
    (r"\bhelp\s+(?:me\s+)?(?:asap|now|immediately|urgently)\b", 0.6, &["help now", "urgent"]),
];

const CONTEXTUAL: &[(&str, f64, &[&str])] = &[
    (r"\b(?:can\s+someone|could\s+someone|is\s+there\s+someone)\s+(?:help|assist)\b", 0.6, &["someone help", "assistance"]),
    (r"\bi\s+(?:need|require)\s+(?:help|assistance|support)\s+(?:with|from)\b", 0.4, &["need help", "assistance"]),
    (r"\b(?:this\s+(?:bot|chatbot|system)|you)\s+(?:can't|cannot|isn't|doesn't)\s+(?:help|understand|solve)\b", 0.7, &["bot cannot help", "escalation"]),
    (r"\bi\s+(?:already\s+)?tried\s+(?:that|everything|this)\s+(?:and\s+it\s+(?:doesn't|didn't)\s+work|but\s+it\s+(?:doesn't|didn't)\s+work)\b", 0.5, &["tried everything", "escalation"]),
    (r"\b(?:still\s+not\s+working|still\s+having\s+(?:issues|problems)|doesn't\s+solve\s+my\s+problem)\b", 0.4, &["still not working", "escalation"]),
    (r"\b(?:complex|complicated)\s+(?:issue|problem|situation)\b", 0.3, &["complex issue", "escalation"]),
];

const TECHNICAL: &[(&str, f64, &[&str])] = &[
    (r"\b(?:api|integration|webhook|ssl|certificate|database|server)\s+(?:error|issue|problem|not\s+working)\b", 0.5, &["technical issue", "api error"]),
    (r"\b(?:deployment|production|staging|environment)\s+(?:issue|problem|error)\b", 0.6, &["deployment issue", "technical"]),
    (r"\b(?:authentication|authorization|login|access)\s+(?:issue|problem|error|denied)\b", 0.4, &["auth issue", "technical"]),
    (r"\b(?:configuration|setup|installation)\s+(?:help|issue|problem)\b", 0.4, &["configuration help", "technical"]),
];

const BILLING: &[(&str, f64, &[&str])] = &[
    (r"\b(?:billing|invoice|payment|charge|subscription)\s+(?:issue|problem|error|dispute)\b", 0.5, &["billing issue", "payment"]),
    (r"\b(?:refund|chargeback|dispute|cancel)\s+(?:request|charge|payment|subscription)\b", 0.6, &["refund request", "billing"]),
    (r"\b(?:overcharged|double\s+charged|incorrect\s+amount|wrong\s+charge)\b", 0.6, &["billing error", "overcharged"]),
    (r"\b(?:upgrade|downgrade|change\s+plan|billing\s+cycle)\b", 0.3, &["plan change", "billing"]),
];

/// The six stages in evaluation order
pub(crate) static STAGES: Lazy<Vec<Stage>> = Lazy::new(|| {
    vec![
        Stage { label: "Explicit agent request detected", patterns: compile(EXPLICIT) },
        Stage { label: "Complaint indicator detected", patterns: compile(COMPLAINT) },
        Stage { label: "Urgency indicator detected", patterns: compile(URGENCY) },
        Stage { label: "Contextual request detected", patterns: compile(CONTEXTUAL) },
        Stage { label: "Technical escalation detected", patterns: compile(TECHNICAL) },
        Stage { label: "Billing escalation detected", patterns: compile(BILLING) },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        let total: usize = STAGES.iter().map(|stage| stage.patterns.len()).sum();
        assert_eq!(STAGES.len(), 6);
        assert_eq!(total, 35);
        for stage in STAGES.iter() {
            for pattern in &stage.patterns {
                assert!(pattern.weight > 0.0 && pattern.weight <= 1.0);
                assert!(!pattern.keywords.is_empty());
            }
        }
    }
}
