//! Identifiers and shared vocabulary for the engagement pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(
    /// Organizational scope for isolation
    TenantId
);
uuid_id!(ProjectId);
uuid_id!(CustomerId);
uuid_id!(SessionId);
uuid_id!(
    /// Internal human operator; ordering is the selector's tie-break
    AgentId
);
uuid_id!(AssignmentId);
uuid_id!(AlarmId);

/// Error returned when parsing one of the vocabulary enums from text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Category of help the visitor is asking for
    RequestType, "request type" {
        General => "general",
        Urgent => "urgent",
        Complaint => "complaint",
        Technical => "technical",
        Billing => "billing",
        Support => "support",
    }
);

string_enum!(
    /// How pressing the classified request is
    Urgency, "urgency" {
        Low => "low",
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
);

string_enum!(
    /// Priority of an assignment, derived one-to-one from urgency
    Priority, "priority" {
        Low => "low",
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
);

string_enum!(
    /// Priority of notifications and alarms
    NotificationPriority, "notification priority" {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
        Critical => "critical",
    }
);

string_enum!(
    AgentSkill, "agent skill" {
        General => "general",
        Technical => "technical",
        Billing => "billing",
        Support => "support",
        Sales => "sales",
        Complaint => "complaint",
    }
);

string_enum!(
    AgentStatus, "agent status" {
        Online => "online",
        Away => "away",
        Busy => "busy",
        Offline => "offline",
        Dnd => "dnd",
    }
);

string_enum!(
    /// Rung of an alarm's escalation ladder, totally ordered
    AlarmLevel, "alarm level" {
        Soft => "soft",
        Medium => "medium",
        Loud => "loud",
        Urgent => "urgent",
        Critical => "critical",
    }
);

string_enum!(
    /// Lifecycle state of an assignment; everything but `pending` is terminal
    AssignmentStatus, "assignment status" {
        Pending => "pending",
        Accepted => "accepted",
        Declined => "declined",
        TimedOut => "timed_out",
        Cancelled => "cancelled",
        Transferred => "transferred",
    }
);

impl From<Urgency> for Priority {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Low => Priority::Low,
            Urgency::Normal => Priority::Normal,
            Urgency::High => Priority::High,
            Urgency::Critical => Priority::Critical,
        }
    }
}

impl From<Priority> for NotificationPriority {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => NotificationPriority::Low,
            Priority::Normal => NotificationPriority::Normal,
            Priority::High => NotificationPriority::High,
            Priority::Critical => NotificationPriority::Critical,
        }
    }
}

impl AlarmLevel {
    /// The next rung up, or `None` at the top of the ladder
    pub fn next(self) -> Option<AlarmLevel> {
        match self {
            AlarmLevel::Soft => Some(AlarmLevel::Medium),
            AlarmLevel::Medium => Some(AlarmLevel::Loud),
            AlarmLevel::Loud => Some(AlarmLevel::Urgent),
            AlarmLevel::Urgent => Some(AlarmLevel::Critical),
            AlarmLevel::Critical => None,
        }
    }
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssignmentStatus::Pending)
    }
}

impl AgentStatus {
    /// Statuses that may receive new assignments
    pub fn accepts_work(&self) -> bool {
        matches!(self, AgentStatus::Online | AgentStatus::Away)
    }
}
