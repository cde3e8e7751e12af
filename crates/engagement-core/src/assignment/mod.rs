//! Assignment of customer sessions to agents

pub mod audit;
pub mod engine;
pub mod policy;
pub mod types;

pub use audit::{AssignmentAudit, AssignmentEvent, AssignmentEventKind, InMemoryAudit, NoopAudit};
pub use engine::AssignmentEngine;
pub use types::{Assignment, AssignmentRequest, AssignmentResult, AssignmentStats};
