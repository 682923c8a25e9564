use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    db::{BoxedStore, KeyValueStore},
    models::{
        AnswerRecord, AoiVisitStats, EventPayload, GazeSample, InteractionRecord, LogRecord,
        SessionLog, SessionStatistics, Validity,
    },
    settings::TrackerSettings,
    utils::SharedClock,
};

use super::identity::{resolve_participant_id, IdentitySources};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

pub type SharedRecordStore = Arc<Mutex<RecordStore>>;

pub fn storage_key(participant_id: &str, task_id: &str) -> String {
    format!("taskData_{participant_id}_{task_id}")
}

pub fn backup_key(storage_key: &str) -> String {
    format!("backup_{storage_key}")
}

/// Single owner of everything recorded for one participant and task.
///
/// Appends typed events, keeps the derived aggregates (answers, AOI visits,
/// milestones) in step with the log, and checkpoints the whole session log to
/// a durable store plus a session-scoped backup.
pub struct RecordStore {
    log: SessionLog,
    durable: BoxedStore,
    backup: BoxedStore,
    clock: SharedClock,
    settings: TrackerSettings,
    last_save_ms: Option<i64>,
}

impl RecordStore {
    /// Resolves the participant id, then restores a previously persisted log
    /// for the same participant and task if one parses.
    pub fn new(
        task_id: impl Into<String>,
        identity: &IdentitySources,
        durable: BoxedStore,
        backup: BoxedStore,
        clock: SharedClock,
        settings: TrackerSettings,
    ) -> Self {
        let task_id = task_id.into();
        let participant_id = resolve_participant_id(identity, durable.as_ref());
        let key = storage_key(&participant_id, &task_id);

        let log = restore_snapshot(durable.as_ref(), &key).unwrap_or_else(|| {
            SessionLog::new(participant_id.clone(), task_id.clone(), clock.now())
        });

        Self {
            log,
            durable,
            backup,
            clock,
            settings,
            last_save_ms: None,
        }
    }

    pub fn into_shared(self) -> SharedRecordStore {
        Arc::new(Mutex::new(self))
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn participant_id(&self) -> &str {
        &self.log.participant_id
    }

    pub fn task_id(&self) -> &str {
        &self.log.task_id
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn storage_key(&self) -> String {
        storage_key(&self.log.participant_id, &self.log.task_id)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn log_event(&mut self, event: EventPayload) -> LogRecord {
        let timestamp = self.clock.now();
        let timestamp_ms = timestamp.timestamp_millis();

        match &event {
            EventPayload::PageLoaded(_) => self.log.timestamps.page_load = Some(timestamp),
            EventPayload::TaskCompleted(_) => {
                self.log.timestamps.task_completed = Some(timestamp)
            }
            EventPayload::AnswerUpdated(update) if !update.question.is_empty() => {
                self.log.answers.insert(
                    update.question.clone(),
                    AnswerRecord {
                        question_id: update.question.clone(),
                        value: update.value.clone(),
                        timestamp,
                        metadata: Value::Null,
                    },
                );
            }
            EventPayload::AoiEnter(enter) => self.track_aoi_enter(&enter.aoi_id, timestamp_ms),
            EventPayload::AoiExit(exit) => self.track_aoi_exit(&exit.aoi_id, timestamp_ms),
            _ => {}
        }

        let record = LogRecord {
            timestamp,
            timestamp_ms,
            event,
        };
        self.log.events.push(record.clone());
        self.auto_save();

        record
    }

    /// Entry point for collaborators that only have a type name and loose data.
    pub fn log_raw_event(&mut self, event_type: &str, data: Value) -> LogRecord {
        self.log_event(EventPayload::from_parts(event_type, data))
    }

    fn track_aoi_enter(&mut self, aoi_id: &str, now_ms: i64) {
        if aoi_id.is_empty() {
            return;
        }
        let visit = self.log.aoi_visits.entry(aoi_id.to_string()).or_default();
        visit.entries = visit.entries.saturating_add(1);
        visit.last_entry = Some(now_ms);
    }

    fn track_aoi_exit(&mut self, aoi_id: &str, now_ms: i64) {
        if aoi_id.is_empty() {
            return;
        }
        let visit = self.log.aoi_visits.entry(aoi_id.to_string()).or_default();
        if let Some(started) = visit.last_entry.take() {
            visit.total_time = visit
                .total_time
                .saturating_add(now_ms.saturating_sub(started).max(0) as u64);
        }
    }

    /// Appends a position sample. Once the buffer holds more than the
    /// configured capacity it is cut back to the most recent samples in one go.
    pub fn log_gaze_data(
        &mut self,
        x: f64,
        y: f64,
        timestamp: Option<DateTime<Utc>>,
        validity: Validity,
    ) -> GazeSample {
        let now = self.clock.now();
        let sample = GazeSample {
            x,
            y,
            timestamp: timestamp.unwrap_or(now),
            timestamp_ms: now.timestamp_millis(),
            validity,
        };
        self.log.gaze_data.push(sample.clone());

        let capacity = self.settings.gaze_capacity;
        if self.log.gaze_data.len() > capacity {
            let retain = self.settings.gaze_retain.min(capacity);
            let excess = self.log.gaze_data.len() - retain;
            self.log.gaze_data.drain(..excess);
        }

        sample
    }

    pub fn log_interaction(&mut self, interaction_type: &str, details: Value) -> InteractionRecord {
        let timestamp = self.clock.now();
        let interaction = InteractionRecord {
            interaction_type: interaction_type.to_string(),
            timestamp,
            timestamp_ms: timestamp.timestamp_millis(),
            details,
        };
        self.log.interactions.push(interaction.clone());
        self.auto_save();

        interaction
    }

    pub fn log_answer(&mut self, question_id: &str, answer: Value, metadata: Value) -> AnswerRecord {
        let record = AnswerRecord {
            question_id: question_id.to_string(),
            value: answer,
            timestamp: self.clock.now(),
            metadata,
        };
        self.log
            .answers
            .insert(question_id.to_string(), record.clone());
        self.auto_save();

        record
    }

    /// Writes the full session log to both namespaces, durable first. Failures
    /// are logged and reported as `false`; the in-memory log is untouched
    /// either way. A failed backup write does not roll back the durable copy,
    /// which then already holds the new snapshot.
    pub fn save_data(&mut self) -> bool {
        match self.persist() {
            Ok(key) => {
                log_debug!("Session data saved: {}", key);
                true
            }
            Err(err) => {
                log_error!("Failed to save session data: {err:?}");
                false
            }
        }
    }

    fn persist(&mut self) -> Result<String> {
        let key = self.storage_key();
        let serialized =
            serde_json::to_string(&self.log).context("failed to serialize session log")?;

        self.durable
            .set(&key, &serialized)
            .with_context(|| format!("failed to write durable snapshot {key}"))?;
        let backup_key = backup_key(&key);
        self.backup
            .set(&backup_key, &serialized)
            .with_context(|| format!("failed to write backup snapshot {backup_key}"))?;

        Ok(key)
    }

    /// Debounced save: skipped while the last successful save is younger than
    /// the debounce window. Returns whether a write happened and succeeded.
    pub fn auto_save(&mut self) -> bool {
        let now_ms = self.clock.now_ms();
        if let Some(last) = self.last_save_ms {
            if now_ms.saturating_sub(last) < self.settings.save_debounce_ms as i64 {
                return false;
            }
        }

        self.save_now(now_ms)
    }

    /// Unconditional save that still resets the debounce window on success.
    pub fn force_save(&mut self) -> bool {
        let now_ms = self.clock.now_ms();
        self.save_now(now_ms)
    }

    fn save_now(&mut self, now_ms: i64) -> bool {
        let saved = self.save_data();
        if saved {
            self.last_save_ms = Some(now_ms);
        }
        saved
    }

    pub fn get_statistics(&self) -> SessionStatistics {
        let start_ms = self.log.start_time.timestamp_millis();
        let end_ms = self
            .log
            .events
            .last()
            .map(|event| event.timestamp_ms)
            .unwrap_or_else(|| self.clock.now_ms());

        let mut event_types = std::collections::BTreeMap::new();
        for event in &self.log.events {
            *event_types.entry(event.event_type().to_string()).or_insert(0) += 1;
        }

        let aoi_statistics = self
            .log
            .aoi_visits
            .iter()
            .map(|(aoi_id, visit)| {
                let average_time = if visit.entries > 0 {
                    visit.total_time as f64 / visit.entries as f64
                } else {
                    0.0
                };
                (
                    aoi_id.clone(),
                    AoiVisitStats {
                        entries: visit.entries,
                        total_time: visit.total_time,
                        average_time,
                    },
                )
            })
            .collect();

        SessionStatistics {
            participant_id: self.log.participant_id.clone(),
            task_id: self.log.task_id.clone(),
            duration_ms: end_ms - start_ms,
            total_events: self.log.events.len(),
            event_types,
            aoi_statistics,
            answer_count: self.log.answers.len(),
            gaze_data_points: self.log.gaze_data.len(),
        }
    }

    /// Drops both persisted copies and empties every collection. Identity and
    /// milestones are kept.
    pub fn clear_data(&mut self) {
        let key = self.storage_key();
        if let Err(err) = self.durable.remove(&key) {
            log_error!("Failed to remove durable snapshot {}: {err:?}", key);
        }
        if let Err(err) = self.backup.remove(&backup_key(&key)) {
            log_error!("Failed to remove backup snapshot {}: {err:?}", key);
        }

        self.log.clear_collections();
        log_info!("Session data cleared for {}", key);
    }
}

fn restore_snapshot(durable: &dyn KeyValueStore, key: &str) -> Option<SessionLog> {
    let raw = match durable.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            log_error!("Failed to read saved session {}: {err:?}", key);
            return None;
        }
    };

    match serde_json::from_str::<SessionLog>(&raw) {
        Ok(log) => {
            log_info!(
                "Restored saved session {} ({} events)",
                key,
                log.events.len()
            );
            Some(log)
        }
        Err(err) => {
            log_error!("Failed to load saved session {}: {err}", key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{AoiEnter, AoiExit, PageInfo, TaskCompleted};
    use crate::utils::ManualClock;
    use serde_json::json;

    struct Fixture {
        store: RecordStore,
        durable: MemoryStore,
        backup: MemoryStore,
        clock: ManualClock,
    }

    fn fixture_with(durable: MemoryStore, settings: TrackerSettings) -> Fixture {
        let backup = MemoryStore::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let store = RecordStore::new(
            "task1",
            &IdentitySources::from_query("participantId=P1"),
            Box::new(durable.clone()),
            Box::new(backup.clone()),
            Arc::new(clock.clone()),
            settings,
        );
        Fixture {
            store,
            durable,
            backup,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryStore::new(), TrackerSettings::default())
    }

    fn enter(aoi_id: &str) -> EventPayload {
        EventPayload::AoiEnter(AoiEnter {
            aoi_id: aoi_id.into(),
            ..AoiEnter::default()
        })
    }

    fn exit(aoi_id: &str) -> EventPayload {
        EventPayload::AoiExit(AoiExit {
            aoi_id: aoi_id.into(),
            ..AoiExit::default()
        })
    }

    #[test]
    fn events_keep_insertion_order() {
        let mut f = fixture();
        f.store.log_raw_event("first", json!({}));
        f.clock.advance_ms(10);
        f.store.log_raw_event("second", json!({}));
        f.store.log_raw_event("third", json!({}));

        let types: Vec<&str> = f.store.log().events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["first", "second", "third"]);
    }

    #[test]
    fn milestones_are_stamped() {
        let mut f = fixture();
        f.store.log_event(EventPayload::PageLoaded(PageInfo::default()));
        f.clock.advance_ms(5_000);
        f.store.log_event(EventPayload::TaskCompleted(TaskCompleted::default()));

        let timestamps = &f.store.log().timestamps;
        let page_load = timestamps.page_load.unwrap();
        let completed = timestamps.task_completed.unwrap();
        assert_eq!((completed - page_load).num_milliseconds(), 5_000);
    }

    #[test]
    fn answer_updated_upserts_answers() {
        let mut f = fixture();
        f.store
            .log_raw_event("answer_updated", json!({ "question": "q1", "value": "A" }));
        f.store
            .log_raw_event("answer_updated", json!({ "question": "q1", "value": "C" }));
        f.store.log_raw_event("answer_updated", json!({ "value": "ignored" }));

        let answers = &f.store.log().answers;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers["q1"].value, json!("C"));
        assert_eq!(f.store.log().events.len(), 3);
    }

    #[test]
    fn malformed_known_events_keep_their_side_effects() {
        let mut f = fixture();
        f.store.log_raw_event("task_completed", json!("done"));
        f.store
            .log_raw_event("page_loaded", json!({ "url": "http://x", "referrer": null }));
        f.store
            .log_raw_event("answer_updated", json!({ "question": 7, "value": "A" }));
        f.store
            .log_raw_event("aoi_enter", json!({ "aoiId": "title", "timestamp": 1.5 }));

        let log = f.store.log();
        assert!(log
            .events
            .iter()
            .all(|record| !matches!(record.event, EventPayload::Custom(_))));
        assert!(log.timestamps.task_completed.is_some());
        assert!(log.timestamps.page_load.is_some());
        assert_eq!(log.answers["7"].value, json!("A"));
        assert_eq!(log.aoi_visits["title"].entries, 1);
    }

    #[test]
    fn aoi_visit_aggregates_follow_enter_exit() {
        let mut f = fixture();
        f.store.log_event(enter("title"));
        f.clock.advance_ms(150);
        f.store.log_event(exit("title"));
        f.clock.advance_ms(50);
        f.store.log_event(enter("title"));
        f.clock.advance_ms(200);
        f.store.log_event(exit("title"));

        let visit = &f.store.log().aoi_visits["title"];
        assert_eq!(visit.entries, 2);
        assert_eq!(visit.total_time, 350);
        assert_eq!(visit.last_entry, None);
    }

    #[test]
    fn exit_without_enter_is_harmless() {
        let mut f = fixture();
        f.clock.advance_ms(500);
        f.store.log_event(exit("body"));

        let visit = &f.store.log().aoi_visits["body"];
        assert_eq!(visit.entries, 0);
        assert_eq!(visit.total_time, 0);
    }

    #[test]
    fn gaze_buffer_trims_to_most_recent() {
        let mut f = fixture();
        for i in 0..10_001 {
            f.store
                .log_gaze_data(i as f64, 0.0, None, Validity::Valid);
        }

        let gaze = &f.store.log().gaze_data;
        assert_eq!(gaze.len(), 5_000);
        assert_eq!(gaze.first().unwrap().x, 5_001.0);
        assert_eq!(gaze.last().unwrap().x, 10_000.0);
    }

    #[test]
    fn gaze_buffer_grows_until_capacity() {
        let mut f = fixture();
        for _ in 0..10_000 {
            f.store.log_gaze_data(1.0, 1.0, None, Validity::PartiallyValid);
        }
        assert_eq!(f.store.log().gaze_data.len(), 10_000);
        assert_eq!(f.store.log().gaze_data[0].validity, Validity::PartiallyValid);
    }

    #[test]
    fn auto_save_is_debounced() {
        let mut f = fixture();
        assert!(f.store.auto_save());
        f.clock.advance_ms(400);
        assert!(!f.store.auto_save());
        assert_eq!(f.durable.write_count(), 1);

        f.clock.advance_ms(600);
        assert!(f.store.auto_save());
        assert_eq!(f.durable.write_count(), 2);
        assert_eq!(f.backup.write_count(), 2);
    }

    #[test]
    fn logging_triggers_debounced_saves() {
        let mut f = fixture();
        f.store.log_raw_event("a", json!({}));
        f.store.log_raw_event("b", json!({}));
        f.store.log_interaction("scroll", json!({ "depth": 0.4 }));
        assert_eq!(f.durable.write_count(), 1);

        f.clock.advance_ms(1_000);
        f.store.log_answer("q2", json!(3), json!({ "source": "slider" }));
        assert_eq!(f.durable.write_count(), 2);
    }

    #[test]
    fn force_save_ignores_debounce() {
        let mut f = fixture();
        assert!(f.store.auto_save());
        assert!(f.store.force_save());
        assert_eq!(f.durable.write_count(), 2);
    }

    #[test]
    fn save_failure_is_reported_not_raised() {
        let durable = MemoryStore::with_quota(16);
        let mut f = fixture_with(durable, TrackerSettings::default());
        f.store.log_raw_event("page_loaded", json!({ "url": "http://localhost/task1.html" }));

        assert!(!f.store.save_data());
        assert_eq!(f.store.log().events.len(), 1);
        // A failed save must not open a debounce window.
        assert!(!f.store.auto_save());
        assert_eq!(f.backup.write_count(), 0);
    }

    #[test]
    fn backup_failure_leaves_durable_copy_written() {
        let durable = MemoryStore::new();
        let backup = MemoryStore::with_quota(8);
        let mut store = RecordStore::new(
            "task1",
            &IdentitySources::from_query("participantId=P1"),
            Box::new(durable.clone()),
            Box::new(backup.clone()),
            Arc::new(ManualClock::new(0)),
            TrackerSettings::default(),
        );

        assert!(!store.force_save());
        assert!(backup.is_empty());
        let saved = durable.get(&storage_key("P1", "task1")).unwrap().unwrap();
        let snapshot: SessionLog = serde_json::from_str(&saved).unwrap();
        assert_eq!(snapshot.participant_id, "P1");
    }

    #[test]
    fn snapshot_is_restored_for_same_participant_and_task() {
        let durable = MemoryStore::new();
        {
            let mut f = fixture_with(durable.clone(), TrackerSettings::default());
            f.store.log_raw_event("answer_updated", json!({ "question": "q1", "value": 1 }));
            assert!(f.store.force_save());
        }

        let f = fixture_with(durable, TrackerSettings::default());
        assert_eq!(f.store.log().events.len(), 1);
        assert!(f.store.log().answers.contains_key("q1"));
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_fresh_log() {
        let mut durable = MemoryStore::new();
        durable.set(&storage_key("P1", "task1"), "{ broken").unwrap();

        let f = fixture_with(durable.clone(), TrackerSettings::default());
        assert!(f.store.log().events.is_empty());
        assert_eq!(f.store.participant_id(), "P1");
        // The corrupt value is left in place for diagnosis.
        assert_eq!(
            durable.get(&storage_key("P1", "task1")).unwrap().as_deref(),
            Some("{ broken")
        );
    }

    #[test]
    fn statistics_project_without_mutating() {
        let mut f = fixture();
        f.store.log_event(EventPayload::PageLoaded(PageInfo::default()));
        f.store.log_event(enter("title"));
        f.clock.advance_ms(300);
        f.store.log_event(exit("title"));
        f.store.log_gaze_data(1.0, 2.0, None, Validity::Valid);
        f.store.log_answer("q1", json!("B"), Value::Null);

        let before = f.store.log().clone();
        let stats = f.store.get_statistics();

        assert_eq!(stats.participant_id, "P1");
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.duration_ms, 300);
        assert_eq!(stats.event_types["aoi_enter"], 1);
        assert_eq!(stats.aoi_statistics["title"].average_time, 300.0);
        assert_eq!(stats.answer_count, 1);
        assert_eq!(stats.gaze_data_points, 1);
        assert_eq!(f.store.log(), &before);
    }

    #[test]
    fn statistics_without_events_measure_until_now() {
        let f = fixture();
        f.clock.advance_ms(2_500);
        assert_eq!(f.store.get_statistics().duration_ms, 2_500);
    }

    #[test]
    fn clear_data_wipes_storage_but_keeps_identity() {
        let mut f = fixture();
        f.store.log_event(enter("title"));
        assert!(f.store.force_save());
        assert_eq!(f.durable.len(), 1);
        assert_eq!(f.backup.len(), 1);

        f.store.clear_data();
        assert!(f.durable.is_empty());
        assert!(f.backup.is_empty());
        assert!(f.store.log().events.is_empty());
        assert!(f.store.log().aoi_visits.is_empty());
        assert_eq!(f.store.participant_id(), "P1");
        assert_eq!(f.store.task_id(), "task1");
    }
}
