//! # Engagement-Core
//!
//! Agent engagement pipeline for the chat platform.
//!
//! This crate provides:
//! - Rule-based detection of visitors asking for a human
//! - Live agent presence with liveness filtering and garbage collection
//! - Weighted agent selection and an assignment state machine with timeouts
//! - Escalating alarms for high-priority assignments
//! - An in-process push hub feeding agent websockets
//!
//! ## Architecture
//!
//! [`Dispatcher`] is the entry point. It classifies a message, builds an
//! [`AssignmentRequest`](assignment::AssignmentRequest) and hands it to the
//! [`AssignmentEngine`](assignment::AssignmentEngine), which picks an agent from the
//! [`PresenceRegistry`](presence::PresenceRegistry) and asks the
//! [`AlarmEngine`](alarm::AlarmEngine) to raise an alarm when the priority calls for it.
//! Storage, delivery and time are injected through [`AlarmStore`](alarm::AlarmStore),
//! [`Pusher`](push::Pusher) and [`Clock`](clock::Clock).

pub mod alarm;
pub mod assignment;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod presence;
pub mod push;
pub mod selector;
pub mod tasks;
pub mod types;

pub use alarm::{Alarm, AlarmEngine, AlarmStore, InMemoryAlarmStore};
pub use assignment::{Assignment, AssignmentEngine, AssignmentRequest, AssignmentResult};
pub use classifier::{ClassificationResult, RequestClassifier};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::EngagementConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{EngagementError, Result};
pub use presence::{AgentPresence, PresenceRegistry};
pub use push::{PushHub, PushMessage, PushTarget, Pusher};
