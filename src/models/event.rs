//! Typed event payloads recorded in the session log.
//!
//! A record serializes flat as `{"timestamp", "timestampMs", "type", "data"}`.
//! Known types decode into their payload struct field by field: a missing,
//! null or wrongly typed field takes its default instead of failing the whole
//! event. Any other type is kept under its own name.

use chrono::{DateTime, Utc};
use serde::{
    de::DeserializeOwned, ser::SerializeStruct, Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::{json, Map, Value};

use super::region::Position;

/// Field decoders that never fail on a present value.
mod lenient {
    use serde::{de::DeserializeOwned, Deserialize, Deserializer};
    use serde_json::Value;

    /// Strings as-is; numbers and booleans in their JSON spelling.
    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => String::new(),
        })
    }

    /// Integers, truncated floats and numeric strings. Out of range is 0.
    pub fn int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<i64> + Default,
    {
        let value = Value::deserialize(deserializer)?;
        let raw = value
            .as_i64()
            .or_else(|| value.as_f64().map(|float| float as i64))
            .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()));
        Ok(raw.and_then(|raw| T::try_from(raw).ok()).unwrap_or_default())
    }

    pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(flag) => flag,
            Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
            Value::String(text) => text == "true" || text == "1",
            _ => false,
        })
    }

    pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(deserialize_with = "lenient::string")]
    pub url: String,
    #[serde(deserialize_with = "lenient::string")]
    pub referrer: String,
    #[serde(deserialize_with = "lenient::string")]
    pub user_agent: String,
    #[serde(deserialize_with = "lenient::string")]
    pub screen_resolution: String,
    #[serde(deserialize_with = "lenient::string")]
    pub window_size: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskCompleted {
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AnswerUpdate {
    #[serde(deserialize_with = "lenient::string")]
    pub question: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AoiEnter {
    #[serde(deserialize_with = "lenient::string")]
    pub aoi_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub aoi_name: String,
    #[serde(deserialize_with = "lenient::int")]
    pub timestamp: i64,
    #[serde(deserialize_with = "lenient::or_default")]
    pub position: Position,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AoiExit {
    #[serde(deserialize_with = "lenient::string")]
    pub aoi_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub aoi_name: String,
    #[serde(deserialize_with = "lenient::int")]
    pub timestamp: i64,
    #[serde(deserialize_with = "lenient::int")]
    pub duration: u64,
    #[serde(deserialize_with = "lenient::int")]
    pub total_visits: u32,
    #[serde(deserialize_with = "lenient::int")]
    pub total_time: u64,
    #[serde(deserialize_with = "lenient::or_default")]
    pub position: Position,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AoiClick {
    #[serde(deserialize_with = "lenient::string")]
    pub aoi_id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub aoi_name: String,
    #[serde(deserialize_with = "lenient::int")]
    pub timestamp: i64,
    #[serde(deserialize_with = "lenient::or_default")]
    pub position: Position,
    #[serde(deserialize_with = "lenient::string")]
    pub target: String,
    #[serde(deserialize_with = "lenient::string")]
    pub target_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VisibilityChange {
    #[serde(deserialize_with = "lenient::flag")]
    pub hidden: bool,
    #[serde(deserialize_with = "lenient::string")]
    pub visibility_state: String,
    #[serde(deserialize_with = "lenient::int")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PageUnload {
    #[serde(deserialize_with = "lenient::int")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ArticleSelected {
    #[serde(deserialize_with = "lenient::string")]
    pub article_id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Any event type the tracker does not model explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomEvent {
    pub name: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    PageLoaded(PageInfo),
    TaskCompleted(TaskCompleted),
    AnswerUpdated(AnswerUpdate),
    AoiEnter(AoiEnter),
    AoiExit(AoiExit),
    AoiClick(AoiClick),
    VisibilityChange(VisibilityChange),
    PageUnload(PageUnload),
    ArticleSelected(ArticleSelected),
    Custom(CustomEvent),
}

/// Payload fields for a known type. Non-object data is kept under `value`.
fn decode_fields<T: DeserializeOwned>(data: &Value) -> Option<T> {
    let fields = match data {
        Value::Object(_) => data.clone(),
        Value::Null => Value::Object(Map::new()),
        other => json!({ "value": other }),
    };
    serde_json::from_value(fields).ok()
}

impl EventPayload {
    /// Builds a payload from an event type name and loosely shaped data. The
    /// type name alone picks the variant.
    pub fn from_parts(event_type: &str, data: Value) -> Self {
        let typed = match event_type {
            "page_loaded" => decode_fields(&data).map(EventPayload::PageLoaded),
            "task_completed" => decode_fields(&data).map(EventPayload::TaskCompleted),
            "answer_updated" => decode_fields(&data).map(EventPayload::AnswerUpdated),
            "aoi_enter" => decode_fields(&data).map(EventPayload::AoiEnter),
            "aoi_exit" => decode_fields(&data).map(EventPayload::AoiExit),
            "aoi_click" => decode_fields(&data).map(EventPayload::AoiClick),
            "visibility_change" => decode_fields(&data).map(EventPayload::VisibilityChange),
            "page_unload" => decode_fields(&data).map(EventPayload::PageUnload),
            "article_selected" => decode_fields(&data).map(EventPayload::ArticleSelected),
            _ => None,
        };

        typed.unwrap_or_else(|| {
            EventPayload::Custom(CustomEvent {
                name: event_type.to_string(),
                data: match data {
                    Value::Null => Value::Object(Map::new()),
                    other => other,
                },
            })
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            EventPayload::PageLoaded(_) => "page_loaded",
            EventPayload::TaskCompleted(_) => "task_completed",
            EventPayload::AnswerUpdated(_) => "answer_updated",
            EventPayload::AoiEnter(_) => "aoi_enter",
            EventPayload::AoiExit(_) => "aoi_exit",
            EventPayload::AoiClick(_) => "aoi_click",
            EventPayload::VisibilityChange(_) => "visibility_change",
            EventPayload::PageUnload(_) => "page_unload",
            EventPayload::ArticleSelected(_) => "article_selected",
            EventPayload::Custom(custom) => &custom.name,
        }
    }

    /// The payload body without its type tag, as exported in CSV and text form.
    pub fn data_value(&self) -> Value {
        let serialized = match self {
            EventPayload::PageLoaded(data) => serde_json::to_value(data),
            EventPayload::TaskCompleted(data) => serde_json::to_value(data),
            EventPayload::AnswerUpdated(data) => serde_json::to_value(data),
            EventPayload::AoiEnter(data) => serde_json::to_value(data),
            EventPayload::AoiExit(data) => serde_json::to_value(data),
            EventPayload::AoiClick(data) => serde_json::to_value(data),
            EventPayload::VisibilityChange(data) => serde_json::to_value(data),
            EventPayload::PageUnload(data) => serde_json::to_value(data),
            EventPayload::ArticleSelected(data) => serde_json::to_value(data),
            EventPayload::Custom(custom) => Ok(custom.data.clone()),
        };
        serialized.unwrap_or(Value::Null)
    }
}

impl Serialize for EventPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("EventPayload", 2)?;
        state.serialize_field("type", self.event_type())?;
        state.serialize_field("data", &self.data_value())?;
        state.end()
    }
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl<'de> Deserialize<'de> for EventPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        Ok(EventPayload::from_parts(&raw.event_type, raw.data))
    }
}

/// One append-only entry of the session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub event: EventPayload,
}

impl LogRecord {
    pub fn event_type(&self) -> &str {
        self.event.event_type()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Enter,
    Exit {
        duration_ms: u64,
        total_visits: u32,
        total_time_ms: u64,
    },
    Click {
        target: String,
        target_id: String,
    },
}

/// A region occupancy change produced by the AOI tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub region_id: String,
    pub region_label: String,
    pub timestamp_ms: i64,
    pub position: Position,
    pub kind: Transition,
}

impl From<TransitionEvent> for EventPayload {
    fn from(event: TransitionEvent) -> Self {
        let TransitionEvent {
            region_id,
            region_label,
            timestamp_ms,
            position,
            kind,
        } = event;

        match kind {
            Transition::Enter => EventPayload::AoiEnter(AoiEnter {
                aoi_id: region_id,
                aoi_name: region_label,
                timestamp: timestamp_ms,
                position,
            }),
            Transition::Exit {
                duration_ms,
                total_visits,
                total_time_ms,
            } => EventPayload::AoiExit(AoiExit {
                aoi_id: region_id,
                aoi_name: region_label,
                timestamp: timestamp_ms,
                duration: duration_ms,
                total_visits,
                total_time: total_time_ms,
                position,
            }),
            Transition::Click { target, target_id } => EventPayload::AoiClick(AoiClick {
                aoi_id: region_id,
                aoi_name: region_label,
                timestamp: timestamp_ms,
                position,
                target,
                target_id,
            }),
        }
    }
}
