//! Level-aware presentation hints attached to alarm pushes
//!
//! Receivers decide how to render; these records only say what the alarm wants.

use serde::{Deserialize, Serialize};

use crate::alarm::EscalationConfig;
use crate::types::{AlarmLevel, NotificationPriority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sound_type: String,
    pub volume: f32,
    pub repeat: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualConfig {
    pub persistent: bool,
    /// Zero means never auto-dismiss
    pub auto_dismiss_ms: u64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupConfig {
    pub position: String,
    pub persistent: bool,
    pub auto_dismiss_ms: u64,
    pub size: String,
    pub animation: String,
}

/// Everything a receiver needs to render one alarm level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popup: Option<PopupConfig>,
}

/// Bucket an alarm level into the priority its presentation follows
pub fn level_bucket(level: AlarmLevel) -> NotificationPriority {
    match level {
        AlarmLevel::Soft | AlarmLevel::Medium => NotificationPriority::Normal,
        AlarmLevel::Loud => NotificationPriority::High,
        AlarmLevel::Urgent => NotificationPriority::Urgent,
        AlarmLevel::Critical => NotificationPriority::Critical,
    }
}

pub fn audio_config(priority: NotificationPriority) -> AudioConfig {
    let (sound, volume, repeat, duration_ms) = match priority {
        NotificationPriority::High => ("notification", 0.7, 1, 2000),
        NotificationPriority::Urgent => ("alert", 0.8, 2, 3000),
        NotificationPriority::Critical => ("alarm", 0.9, 3, 5000),
        _ => ("soft", 0.5, 1, 1000),
    };
    AudioConfig {
        sound_type: sound.to_string(),
        volume,
        repeat,
        duration_ms,
    }
}

pub fn visual_config(priority: NotificationPriority) -> VisualConfig {
    let (auto_dismiss_ms, color) = match priority {
        NotificationPriority::Urgent => (10_000, "orange"),
        NotificationPriority::Critical => (0, "red"),
        _ => (5_000, "blue"),
    };
    VisualConfig {
        persistent: priority == NotificationPriority::Critical,
        auto_dismiss_ms,
        color: color.to_string(),
    }
}

pub fn popup_config(priority: NotificationPriority) -> PopupConfig {
    let (auto_dismiss_ms, size) = match priority {
        NotificationPriority::Urgent => (15_000, "medium"),
        NotificationPriority::Critical => (0, "large"),
        _ => (8_000, "small"),
    };
    PopupConfig {
        position: "top-right".to_string(),
        persistent: priority == NotificationPriority::Critical,
        auto_dismiss_ms,
        size: size.to_string(),
        animation: "bounce".to_string(),
    }
}

/// Presentation for an alarm at `level`, honouring its audio/visual switches
pub fn for_level(level: AlarmLevel, config: &EscalationConfig) -> Presentation {
    let bucket = level_bucket(level);
    Presentation {
        audio: config.audio_enabled.then(|| audio_config(bucket)),
        visual: config.visual_enabled.then(|| visual_config(bucket)),
        popup: config.visual_enabled.then(|| popup_config(bucket)),
    }
}
