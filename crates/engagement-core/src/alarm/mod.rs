//! Escalating alarms
//!
//! An alarm starts at the initial level of its priority's [`EscalationConfig`] and is
//! raised one level per escalation interval by a background escalator until it reaches
//! the configured maximum or someone acknowledges it. Levels never go down.

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{AlarmEngine, AlarmRequest, EscalationReport};
pub use store::{AlarmStore, InMemoryAlarmStore};
pub use types::{Alarm, AlarmStats, EscalationConfig, Metadata};
