use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type TimerId = u64;

/// A user defined countdown. The wire format keeps the historical camelCase
/// names, with `endTime` as epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: TimerId,
    pub label: String,
    /// Free form category name, picked from [Settings::timer_types].
    #[serde(rename = "type")]
    pub kind: String,
    /// Minutes.
    pub duration: u32,
    pub running: bool,
    pub color: String,
    /// Present exactly while the timer is running.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub end_time: Option<DateTime<Utc>>,
    /// Last known widget position, saved after a drag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
}

impl Timer {
    pub fn total(&self) -> Duration {
        Duration::minutes(self.duration as i64)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.end_time
            .map(|end| (end - now).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.running = true;
        self.end_time = Some(now + self.total());
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.end_time = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerType {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub timer_types: Vec<TimerType>,
    pub show_floating: bool,
    pub enable_notifications: bool,
    pub enable_sound: bool,
    /// Kept in [0, 1].
    pub volume: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let timer_type = |name: &str, color: &str| TimerType {
            name: name.to_string(),
            color: color.to_string(),
        };
        Self {
            timer_types: vec![
                timer_type("학습", "#3498db"),
                timer_type("업무", "#2ecc71"),
                timer_type("브레이크", "#e74c3c"),
            ],
            show_floating: true,
            enable_notifications: true,
            enable_sound: true,
            volume: 1.,
        }
    }
}

impl Settings {
    /// Merges a partial update. Absent fields keep their current value.
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(timer_types) = patch.timer_types {
            self.timer_types = timer_types;
        }
        if let Some(show_floating) = patch.show_floating {
            self.show_floating = show_floating;
        }
        if let Some(enable_notifications) = patch.enable_notifications {
            self.enable_notifications = enable_notifications;
        }
        if let Some(enable_sound) = patch.enable_sound {
            self.enable_sound = enable_sound;
        }
        if let Some(volume) = patch.volume {
            self.volume = volume.clamp(0., 1.);
        }
    }
}

/// A partial [Settings], as sent by `updateSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_types: Option<Vec<TimerType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_floating: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_sound: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// One completed session. Appended once per genuine expiry and never touched
/// again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRecord {
    pub label: String,
    /// Minutes.
    pub duration: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Category copied from the timer at completion time. Missing on records
    /// written before categories existed.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Last known category per label. Best effort, overwritten opportunistically,
/// only used to backfill [StatRecord::kind] on old records when displaying.
pub type LabelTypeMap = HashMap<String, String>;
