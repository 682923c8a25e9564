use std::{sync::Arc, time::Duration};

use log::info;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::models::{EventPayload, LogRecord, PageInfo, PageUnload, VisibilityChange};

use super::store::SharedRecordStore;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

struct ForcedSaveTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ForcedSaveTask {
    async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.await {
            log_warn!("forced-save task failed to join: {err}");
        }
    }
}

/// Drives the record store from page lifecycle signals and owns the
/// periodic forced-save task.
#[derive(Clone)]
pub struct RecorderController {
    store: SharedRecordStore,
    ticker: Arc<Mutex<Option<ForcedSaveTask>>>,
    forced_save_interval: Duration,
}

impl RecorderController {
    pub fn new(store: SharedRecordStore, forced_save_interval: Duration) -> Self {
        Self {
            store,
            ticker: Arc::new(Mutex::new(None)),
            forced_save_interval,
        }
    }

    pub fn store(&self) -> SharedRecordStore {
        self.store.clone()
    }

    /// Starts the forced-save task. The first save happens one full interval
    /// after the call.
    pub async fn start(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            previous.stop().await;
        }

        let store = self.store.clone();
        let period = self.forced_save_interval;
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !store.lock().await.force_save() {
                            log_warn!("periodic save failed; keeping data in memory");
                        }
                    }
                    _ = token.cancelled() => {
                        log_info!("forced-save loop shutting down");
                        break;
                    }
                }
            }
        });

        *ticker_guard = Some(ForcedSaveTask {
            handle,
            cancel_token,
        });
    }

    pub async fn page_loaded(&self, info: PageInfo) -> LogRecord {
        self.store
            .lock()
            .await
            .log_event(EventPayload::PageLoaded(info))
    }

    pub async fn visibility_changed(&self, hidden: bool) -> LogRecord {
        let mut store = self.store.lock().await;
        let timestamp = store.now().timestamp_millis();
        store.log_event(EventPayload::VisibilityChange(VisibilityChange {
            hidden,
            visibility_state: if hidden { "hidden" } else { "visible" }.to_string(),
            timestamp,
        }))
    }

    /// Page-exit: records the unload and saves regardless of the debounce window.
    pub async fn page_hide(&self) -> bool {
        let mut store = self.store.lock().await;
        let timestamp = store.now().timestamp_millis();
        store.log_event(EventPayload::PageUnload(PageUnload { timestamp }));
        store.force_save()
    }

    /// Stops the forced-save task and performs a final save.
    pub async fn shutdown(&self) -> bool {
        let task = self.ticker.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
        }

        let saved = self.store.lock().await.force_save();
        info!("Recorder shut down (final save: {saved})");
        saved
    }
}
