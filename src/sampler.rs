//! Pointer position sampling, standing in for a gaze signal.
//!
//! The latest sample sits in a single-slot `watch` mailbox: every push
//! overwrites it and readers only ever see the most recent position.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    models::{Position, Validity},
    recorder::SharedRecordStore,
    utils::SharedClock,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: i64,
}

impl PositionSample {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Clone)]
pub struct PositionSampler {
    latest: Arc<watch::Sender<Option<PositionSample>>>,
    clock: SharedClock,
    recorder: Option<SharedRecordStore>,
}

impl PositionSampler {
    pub fn new(clock: SharedClock) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest: Arc::new(latest),
            clock,
            recorder: None,
        }
    }

    /// Also append every pushed position to the record store's gaze buffer.
    pub fn with_recorder(mut self, recorder: SharedRecordStore) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Records a pointer position in page coordinates.
    pub async fn push(&self, x: f64, y: f64) -> PositionSample {
        let now = self.clock.now();
        let sample = PositionSample {
            x,
            y,
            timestamp_ms: now.timestamp_millis(),
        };
        self.latest.send_replace(Some(sample));

        if let Some(recorder) = &self.recorder {
            recorder
                .lock()
                .await
                .log_gaze_data(x, y, Some(now), Validity::Valid);
        }

        sample
    }

    pub fn latest(&self) -> Option<PositionSample> {
        *self.latest.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PositionSample>> {
        self.latest.subscribe()
    }
}
