use std::{collections::BTreeMap, sync::Arc};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use crate::{
    models::{Position, Region, RegionConfig, RegionStats, TransitionEvent},
    recorder::SharedRecordStore,
    sampler::{PositionSample, PositionSampler},
    settings::TrackerSettings,
    utils::SharedClock,
};

use super::{
    loop_worker::{overlay_loop, poll_loop},
    overlay::{self, OverlaySurface},
    source::RegionSource,
    tracker::RegionTracker,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

struct BackgroundTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl BackgroundTask {
    async fn stop(self, name: &str) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.await {
            log_warn!("{name} task failed to join: {err}");
        }
    }
}

#[derive(Default)]
struct ManagerTasks {
    poll: Option<BackgroundTask>,
    overlay: Option<BackgroundTask>,
}

/// Turns position samples and element callbacks into region transitions and
/// records each one in the record store.
///
/// Clones share state. The tracker lock is always taken before the store
/// lock, and is held while a tick's transitions are recorded, so records land
/// in the order their triggers ran.
#[derive(Clone)]
pub struct AoiManager {
    tracker: Arc<Mutex<RegionTracker>>,
    store: SharedRecordStore,
    source: Arc<dyn RegionSource>,
    samples: watch::Receiver<Option<PositionSample>>,
    clock: SharedClock,
    overlay: Arc<Mutex<Option<Box<dyn OverlaySurface>>>>,
    tasks: Arc<Mutex<ManagerTasks>>,
    poll_interval: Duration,
    overlay_interval: Duration,
}

impl AoiManager {
    pub fn new(
        configs: &[RegionConfig],
        source: Arc<dyn RegionSource>,
        sampler: &PositionSampler,
        store: SharedRecordStore,
        clock: SharedClock,
        settings: &TrackerSettings,
    ) -> Self {
        let mut tracker = RegionTracker::new();
        for config in configs {
            tracker.register(config, source.as_ref());
        }
        log_info!(
            "AOI manager initialized, tracking {} regions from {} configured",
            tracker.regions().len(),
            configs.len()
        );

        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            store,
            source,
            samples: sampler.subscribe(),
            clock,
            overlay: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(ManagerTasks::default())),
            poll_interval: settings.poll_interval(),
            overlay_interval: settings.overlay_refresh_interval(),
        }
    }

    /// Starts the poll loop. Calling it again restarts the loop.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.poll.take() {
            previous.stop("AOI poll").await;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.clone(),
            self.poll_interval,
            cancel_token.clone(),
        ));
        tasks.poll = Some(BackgroundTask {
            handle,
            cancel_token,
        });
    }

    pub async fn register_region(&self, config: &RegionConfig) -> Vec<String> {
        self.tracker
            .lock()
            .await
            .register(config, self.source.as_ref())
    }

    /// One poll tick: hit-tests the most recent sample, if any.
    pub async fn poll_once(&self) -> Vec<TransitionEvent> {
        let latest: Option<PositionSample> = *self.samples.borrow();
        let Some(sample) = latest else {
            return Vec::new();
        };

        let mut tracker = self.tracker.lock().await;
        let transitions = tracker.check_point(sample.position(), self.clock.now_ms());
        self.record(&transitions).await;
        transitions
    }

    pub async fn handle_pointer_enter(
        &self,
        region_id: &str,
        position: Position,
    ) -> Option<TransitionEvent> {
        let mut tracker = self.tracker.lock().await;
        let transition = tracker.enter(region_id, position, self.clock.now_ms())?;
        self.record(std::slice::from_ref(&transition)).await;
        Some(transition)
    }

    pub async fn handle_pointer_leave(
        &self,
        region_id: &str,
        position: Position,
    ) -> Option<TransitionEvent> {
        let mut tracker = self.tracker.lock().await;
        let transition = tracker.exit(region_id, position, self.clock.now_ms())?;
        self.record(std::slice::from_ref(&transition)).await;
        Some(transition)
    }

    /// A click on a region's element, recorded immediately.
    pub async fn handle_click(
        &self,
        region_id: &str,
        position: Position,
        target: &str,
        target_id: &str,
    ) -> Option<TransitionEvent> {
        let mut tracker = self.tracker.lock().await;
        let transition =
            tracker.click(region_id, position, target, target_id, self.clock.now_ms())?;
        self.record(std::slice::from_ref(&transition)).await;
        Some(transition)
    }

    async fn record(&self, transitions: &[TransitionEvent]) {
        if transitions.is_empty() {
            return;
        }
        let mut store = self.store.lock().await;
        for transition in transitions {
            store.log_event(transition.clone().into());
        }
    }

    pub async fn enable(&self) {
        self.tracker.lock().await.enable();
        log_info!("AOI tracking enabled");
    }

    /// Suspends transitions without closing open dwells.
    pub async fn disable(&self) {
        self.tracker.lock().await.disable();
        log_info!("AOI tracking disabled");
    }

    pub async fn is_enabled(&self) -> bool {
        self.tracker.lock().await.is_enabled()
    }

    /// Installs (or with `None`, removes) the debug overlay surface. While a
    /// surface is installed the overlays are redrawn on their own timer.
    pub async fn set_overlay(&self, surface: Option<Box<dyn OverlaySurface>>) {
        let enabled = surface.is_some();
        let previous = std::mem::replace(&mut *self.overlay.lock().await, surface);
        if let Some(mut previous) = previous {
            previous.remove_all();
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.overlay.take() {
            task.stop("AOI overlay").await;
        }

        if enabled {
            self.refresh_overlays().await;

            let cancel_token = CancellationToken::new();
            let handle = tokio::spawn(overlay_loop(
                self.clone(),
                self.overlay_interval,
                cancel_token.clone(),
            ));
            tasks.overlay = Some(BackgroundTask {
                handle,
                cancel_token,
            });
        }
        log_info!("AOI debug overlay {}", if enabled { "on" } else { "off" });
    }

    pub async fn refresh_overlays(&self) {
        let tracker = self.tracker.lock().await;
        let mut surface = self.overlay.lock().await;
        if let Some(surface) = surface.as_mut() {
            overlay::refresh_overlays(&tracker, self.source.as_ref(), surface.as_mut());
        }
    }

    /// Viewport resize or scroll.
    pub async fn viewport_changed(&self) {
        self.refresh_overlays().await;
    }

    pub async fn statistics(&self) -> BTreeMap<String, RegionStats> {
        self.tracker.lock().await.statistics()
    }

    pub async fn regions(&self) -> Vec<Region> {
        self.tracker.lock().await.regions().to_vec()
    }

    /// Drops all regions and their statistics.
    pub async fn reset(&self) {
        self.tracker.lock().await.reset();
    }

    /// Stops every timer, removes overlays and forgets open dwells. Region
    /// statistics are kept for the final export.
    pub async fn cleanup(&self) {
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(task) = tasks.poll.take() {
                task.stop("AOI poll").await;
            }
            if let Some(task) = tasks.overlay.take() {
                task.stop("AOI overlay").await;
            }
        }

        if let Some(mut surface) = self.overlay.lock().await.take() {
            surface.remove_all();
        }

        self.tracker.lock().await.clear_active();
        log_info!("AOI manager cleaned up");
    }
}
