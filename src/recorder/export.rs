//! Session log export: JSON, CSV and a plain-text summary.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::models::{LogRecord, SessionLog};

use super::store::RecordStore;

/// Event types listed in the text summary.
const IMPORTANT_EVENTS: [&str; 4] = [
    "page_loaded",
    "task_completed",
    "answer_updated",
    "article_selected",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
    Text,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Text => "text",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
            ExportFormat::Text => "text/plain",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Text => "txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportSnapshot<'a> {
    #[serde(flatten)]
    log: &'a SessionLog,
    export_time: DateTime<Utc>,
    export_format: &'static str,
}

/// A named file payload ready to hand to a download or write to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub content: String,
}

impl ExportFile {
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create export directory {}", dir.display()))?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.content)
            .with_context(|| format!("failed to write export to {}", path.display()))?;
        Ok(path)
    }
}

fn iso_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl RecordStore {
    pub fn export_data(&self, format: ExportFormat) -> Result<String> {
        let export_time = self.now();
        let log = self.log();

        match format {
            ExportFormat::Json => {
                let snapshot = ExportSnapshot {
                    log,
                    export_time,
                    export_format: format.as_str(),
                };
                serde_json::to_string_pretty(&snapshot).context("failed to serialize export")
            }
            ExportFormat::Csv => Ok(render_csv(&log.events)),
            ExportFormat::Text => Ok(render_text(log)),
        }
    }

    /// JSON export wrapped as a file. Without a name, the file is called
    /// `{prefix}_{participant}_{task}_{epoch ms}.json`.
    pub fn download_data(&self, filename: Option<&str>) -> Result<ExportFile> {
        self.export_file(ExportFormat::Json, filename)
    }

    pub fn export_file(&self, format: ExportFormat, filename: Option<&str>) -> Result<ExportFile> {
        let filename = match filename {
            Some(name) => name.to_string(),
            None => format!(
                "{}_{}_{}_{}.{}",
                self.settings().export_prefix,
                self.participant_id(),
                self.task_id(),
                self.now().timestamp_millis(),
                format.extension()
            ),
        };

        Ok(ExportFile {
            filename,
            mime_type: format.mime_type(),
            content: self.export_data(format)?,
        })
    }
}

fn csv_cell(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn render_csv(events: &[LogRecord]) -> String {
    let mut csv = String::from("Timestamp,EventType,Data\n");
    for event in events {
        let data = event.event.data_value().to_string();
        let row = [
            csv_cell(&iso_timestamp(&event.timestamp)),
            csv_cell(event.event_type()),
            csv_cell(&data),
        ];
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    csv
}

fn render_text(log: &SessionLog) -> String {
    let mut text = format!("Participant ID: {}\n", log.participant_id);
    text.push_str(&format!("Task ID: {}\n", log.task_id));
    text.push_str(&format!("Start time: {}\n", iso_timestamp(&log.start_time)));
    text.push_str(&format!("Total events: {}\n\n", log.events.len()));

    text.push_str("Important events:\n");
    text.push_str("----------\n");

    for event in log
        .events
        .iter()
        .filter(|event| IMPORTANT_EVENTS.contains(&event.event_type()))
    {
        text.push_str(&format!(
            "{} - {}: {}\n",
            iso_timestamp(&event.timestamp),
            event.event_type(),
            event.event.data_value()
        ));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::MemoryStore,
        models::{AoiVisit, SessionLog},
        recorder::IdentitySources,
        settings::TrackerSettings,
        utils::ManualClock,
    };
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store() -> RecordStore {
        RecordStore::new(
            "task2",
            &IdentitySources::from_query("participantId=P9"),
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            TrackerSettings::default(),
        )
    }

    fn populated() -> RecordStore {
        let mut store = store();
        store.log_raw_event("page_loaded", json!({ "url": "http://localhost/task2.html" }));
        store.log_raw_event("aoi_enter", json!({ "aoiId": "title" }));
        store.log_raw_event("aoi_exit", json!({ "aoiId": "title", "duration": 120 }));
        store.log_raw_event("answer_updated", json!({ "question": "q1", "value": "say \"hi\"" }));
        store.log_raw_event("article_selected", json!({ "articleId": "a2" }));
        store
    }

    #[test]
    fn json_export_reproduces_live_log() {
        let mut store = populated();
        store.log_raw_event("experiment_started", json!({ "k": 1 }));
        let exported = store.export_data(ExportFormat::Json).unwrap();

        let parsed: Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(parsed["exportFormat"], "json");
        assert!(parsed["exportTime"].is_string());
        assert_eq!(parsed["events"][0]["type"], "page_loaded");
        assert_eq!(parsed["events"][0]["data"]["url"], "http://localhost/task2.html");
        assert_eq!(parsed["events"][5]["type"], "experiment_started");
        assert_eq!(parsed["events"][5]["data"], json!({ "k": 1 }));

        let restored: SessionLog = serde_json::from_str(&exported).unwrap();
        assert_eq!(restored.events.len(), store.log().events.len());
        assert_eq!(restored.answers, store.log().answers);
        let visits: &BTreeMap<String, AoiVisit> = &store.log().aoi_visits;
        assert_eq!(&restored.aoi_visits, visits);
    }

    #[test]
    fn csv_has_one_row_per_event_with_doubled_quotes() {
        let store = populated();
        let csv = store.export_data(ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "Timestamp,EventType,Data");
        assert_eq!(lines.len(), 1 + store.log().events.len());
        assert!(lines[1].contains("\"page_loaded\""));

        let answer_row = lines[4];
        assert!(answer_row.contains(r#"""question"":""q1"""#));
        assert!(answer_row.contains(r#"say \""hi\"""#));
    }

    #[test]
    fn text_summary_lists_only_important_events() {
        let store = populated();
        let text = store.export_data(ExportFormat::Text).unwrap();

        assert!(text.starts_with("Participant ID: P9\nTask ID: task2\n"));
        assert!(text.contains("Total events: 5\n"));
        assert!(text.contains(" - page_loaded: "));
        assert!(text.contains(" - answer_updated: "));
        assert!(text.contains(" - article_selected: "));
        assert!(!text.contains("aoi_enter"));
        assert!(!text.contains("aoi_exit"));
    }

    #[test]
    fn default_download_name_follows_pattern() {
        let store = populated();
        let file = store.download_data(None).unwrap();
        assert_eq!(
            file.filename,
            "reading_assessment_P9_task2_1700000000000.json"
        );
        assert_eq!(file.mime_type, "application/json");

        let named = store.download_data(Some("custom.json")).unwrap();
        assert_eq!(named.filename, "custom.json");
    }

    #[test]
    fn export_file_writes_to_disk() {
        let store = populated();
        let dir = tempdir().unwrap();
        let file = store.export_file(ExportFormat::Csv, None).unwrap();
        assert!(file.filename.ends_with(".csv"));

        let path = file.write_to(&dir.path().join("exports")).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written, file.content);
    }
}
