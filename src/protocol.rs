//! Wire protocol between the daemon and its clients (cli, widget surfaces).
//!
//! Everything is a single JSON object per line over the control socket.
//! Requests carry a camelCase `type` tag; each request is answered by exactly
//! one response. Surfaces additionally receive unsolicited push messages,
//! which are distinguishable from responses by their own `type` tag.

use serde::{Deserialize, Serialize};

use crate::daemon::storage::entities::{Settings, SettingsPatch, Timer, TimerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "getTimers")]
    GetTimers,
    #[serde(rename = "addTimer")]
    AddTimer { timer: Timer },
    #[serde(rename = "startTimer")]
    StartTimer { id: TimerId },
    #[serde(rename = "stopTimer")]
    StopTimer { id: TimerId },
    #[serde(rename = "removeTimer")]
    RemoveTimer { id: TimerId },
    #[serde(rename = "moveTimer")]
    MoveTimer { id: TimerId, x: i32, y: i32 },
    /// A surface observed its local countdown reach zero. Delivery is
    /// at-least-once; the daemon deduplicates.
    #[serde(rename = "timerEnded")]
    TimerEnded { id: TimerId, label: String },
    #[serde(rename = "getSettings")]
    GetSettings,
    #[serde(rename = "updateSettings")]
    UpdateSettings { updates: SettingsPatch },
    /// Marks the connection as a widget surface that wants pushes.
    #[serde(rename = "attachSurface")]
    AttachSurface,
    /// Marks the sending surface as the focused one.
    #[serde(rename = "surfaceFocused")]
    SurfaceFocused,
    // Directives kept for older clients. Acknowledged and folded into a
    // normal broadcast.
    #[serde(rename = "SET_TIMER")]
    SetTimer {
        #[serde(default)]
        data: Option<Timer>,
    },
    #[serde(rename = "SHOW_TIMER")]
    ShowTimer {
        #[serde(default)]
        timer: Option<Timer>,
    },
    #[serde(rename = "HIDE_TIMER")]
    HideTimer,
}

/// Untagged on the wire: `{"timerData": [...]}`, a bare [Settings] object, or
/// `{"status": "ok"}`. [Response::Settings] must stay the last variant, every
/// field of [Settings] has a default so it would swallow the other shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Timers { timer_data: Vec<Timer> },
    Ack { status: String },
    Settings(Settings),
}

impl Response {
    pub fn ok() -> Self {
        Self::Ack {
            status: "ok".into(),
        }
    }

    /// The timer list, if this is a timer response. Callers treat anything
    /// else as an empty list rather than an error.
    pub fn into_timers(self) -> Option<Vec<Timer>> {
        match self {
            Response::Timers { timer_data } => Some(timer_data),
            _ => None,
        }
    }

    pub fn into_settings(self) -> Option<Settings> {
        match self {
            Response::Settings(settings) => Some(settings),
            _ => None,
        }
    }
}

/// Daemon initiated messages to attached surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Push {
    /// Full visible timer list for this surface. An empty list tells the
    /// surface to clear all widgets.
    #[serde(rename = "timers")]
    Timers { timers: Vec<Timer> },
    #[serde(rename = "playSound")]
    PlaySound { volume: f64 },
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::daemon::storage::entities::{Settings, Timer};

    use super::{Push, Request, Response};

    fn test_timer() -> Timer {
        Timer {
            id: 3,
            label: "Focus".into(),
            kind: "업무".into(),
            duration: 25,
            running: true,
            color: "#2ecc71".into(),
            end_time: Some(Utc.timestamp_millis_opt(1_500_000).unwrap()),
            x: None,
            y: None,
        }
    }

    #[test]
    fn test_request_wire_tags() {
        let json = serde_json::to_value(Request::StartTimer { id: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "startTimer", "id": 3}));

        let parsed: Request =
            serde_json::from_str(r#"{"type":"moveTimer","id":3,"x":40,"y":0}"#).unwrap();
        assert_eq!(parsed, Request::MoveTimer { id: 3, x: 40, y: 0 });

        let legacy: Request = serde_json::from_str(r#"{"type":"SHOW_TIMER"}"#).unwrap();
        assert_eq!(legacy, Request::ShowTimer { timer: None });
    }

    #[test]
    fn test_response_shapes_distinguishable() {
        let timers = serde_json::to_string(&Response::Timers {
            timer_data: vec![test_timer()],
        })
        .unwrap();
        assert!(timers.contains("\"timerData\""));
        let parsed: Response = serde_json::from_str(&timers).unwrap();
        assert_eq!(parsed.into_timers().unwrap().len(), 1);

        let ack: Response = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert_eq!(ack, Response::ok());

        let settings: Response =
            serde_json::from_str(&serde_json::to_string(&Settings::default()).unwrap()).unwrap();
        assert_eq!(settings.into_settings(), Some(Settings::default()));
    }

    #[test]
    fn test_push_roundtrip() {
        let push = serde_json::to_string(&Push::Timers {
            timers: vec![test_timer()],
        })
        .unwrap();
        assert!(push.contains("\"type\":\"timers\""));
        // A push never parses as a response with data in it.
        let as_response: Result<Response, _> = serde_json::from_str(&push);
        assert!(!matches!(as_response, Ok(Response::Timers { .. })));

        let volume: Push = serde_json::from_str(r#"{"type":"playSound","volume":0.5}"#).unwrap();
        assert_eq!(volume, Push::PlaySound { volume: 0.5 });
    }
}
