//! Session log data model: everything recorded for one participant and task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::event::LogRecord;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    #[default]
    Valid,
    PartiallyValid,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GazeSample {
    pub x: f64,
    pub y: f64,
    pub timestamp: DateTime<Utc>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub validity: Validity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    #[serde(rename = "type")]
    pub interaction_type: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Milestones {
    pub page_load: Option<DateTime<Utc>>,
    pub task_completed: Option<DateTime<Utc>>,
}

/// Running aggregate for one region as seen by the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AoiVisit {
    pub entries: u32,
    pub total_time: u64,
    /// Millisecond timestamp of the still-open dwell, if any.
    pub last_entry: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionLog {
    pub participant_id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    pub events: Vec<LogRecord>,
    pub gaze_data: Vec<GazeSample>,
    pub interactions: Vec<InteractionRecord>,
    pub answers: BTreeMap<String, AnswerRecord>,
    pub timestamps: Milestones,
    pub aoi_visits: BTreeMap<String, AoiVisit>,
}

impl SessionLog {
    pub fn new(participant_id: String, task_id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            participant_id,
            task_id,
            start_time,
            ..Self::default()
        }
    }

    pub fn clear_collections(&mut self) {
        self.events.clear();
        self.gaze_data.clear();
        self.interactions.clear();
        self.answers.clear();
        self.aoi_visits.clear();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AoiVisitStats {
    pub entries: u32,
    pub total_time: u64,
    pub average_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    pub participant_id: String,
    pub task_id: String,
    pub duration_ms: i64,
    pub total_events: usize,
    pub event_types: BTreeMap<String, usize>,
    pub aoi_statistics: BTreeMap<String, AoiVisitStats>,
    pub answer_count: usize,
    pub gaze_data_points: usize,
}
