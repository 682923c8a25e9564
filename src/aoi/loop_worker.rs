use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::manager::AoiManager;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Hit-tests the latest position sample once per period until cancelled.
pub async fn poll_loop(manager: AoiManager, period: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let transitions = manager.poll_once().await;
                if !transitions.is_empty() {
                    log_debug!("poll tick produced {} transitions", transitions.len());
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("AOI poll loop shutting down");
                break;
            }
        }
    }
}

/// Redraws debug overlays once per period until cancelled.
pub async fn overlay_loop(manager: AoiManager, period: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => manager.refresh_overlays().await,
            _ = cancel_token.cancelled() => {
                log_info!("AOI overlay loop shutting down");
                break;
            }
        }
    }
}
