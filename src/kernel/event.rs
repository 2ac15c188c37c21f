use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::time::Clock;

/// Event type tags understood by the collector. Callers may also pass their
/// own tag through `Session::track`.
pub mod kinds {
    pub const SESSION_START: &str = "session_start";
    pub const SESSION_END: &str = "session_end";
    pub const CLIENT_INFO: &str = "client_info";
    pub const ERROR: &str = "error";
    pub const HEATMAP_VOXELS: &str = "heatmap_voxels";
    pub const TASK_RESULT: &str = "task_result";
    pub const TASK_START: &str = "task_start";
    pub const TASK_END: &str = "task_end";
    pub const FIXATION: &str = "fixation";
    pub const STIMULUS_SHOWN: &str = "stimulus_shown";
    pub const SEQ: &str = "seq";
    pub const FPS_AVERAGE: &str = "fps_average";
}

/// One telemetry record. Wire shape: `{gameId, sessionId, type, timestamp, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub game_id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Milliseconds since epoch, read when the event was built.
    pub timestamp: i64,
    pub data: Value,
}

impl Event {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Stamps identity and time onto events.
#[derive(Clone)]
pub struct EventFactory {
    game_id: String,
    session_id: String,
    clock: Arc<dyn Clock>,
}

impl EventFactory {
    pub fn new(game_id: impl Into<String>, session_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            game_id: game_id.into(),
            session_id: session_id.into(),
            clock,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// `data` is passed through untouched; `None` and `null` become `{}`.
    pub fn event(&self, kind: impl Into<String>, data: Option<Value>) -> Event {
        let data = match data {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v) => v,
        };
        Event {
            game_id: self.game_id.clone(),
            session_id: self.session_id.clone(),
            kind: kind.into(),
            timestamp: self.clock.now_ms(),
            data,
        }
    }
}

// Typed payloads for the built-in event kinds.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub abandoned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixation {
    pub x: f64,
    pub y: f64,
    /// Dwell time in milliseconds.
    pub duration: f64,
    pub aoi: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StimulusShown {
    pub stimulus_id: String,
    pub aoi: Option<String>,
}

/// Single Ease Question answer for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeqRating {
    pub task_id: String,
    pub rating: u8,
}

/// Host metadata sent once the push channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub user_agent: String,
    pub language: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(|l| l.replace('_', "-")))
            .filter(|l| !l.is_empty() && l != "C" && l != "POSIX")
            .unwrap_or_else(|| "en-US".to_string());
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            language,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(i64);
    impl Clock for Fixed {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    fn factory() -> EventFactory {
        EventFactory::new("game", "sess", Arc::new(Fixed(42)))
    }

    #[test]
    fn missing_data_defaults_to_empty_object() {
        let event = factory().event(kinds::SESSION_END, None);
        assert_eq!(event.data, json!({}));
        assert_eq!(event.timestamp, 42);
    }

    #[test]
    fn wire_shape_uses_collector_field_names() {
        let event = factory().event("custom", Some(json!({"a": 1})));
        let wire: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({"gameId": "game", "sessionId": "sess", "type": "custom", "timestamp": 42, "data": {"a": 1}})
        );
    }

    #[test]
    fn non_object_data_is_passed_through() {
        let event = factory().event("custom", Some(json!([1, 2, 3])));
        assert_eq!(event.data, json!([1, 2, 3]));
    }
}
