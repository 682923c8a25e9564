//! Debug overlays: an outline and label per region, redrawn on a timer and on
//! viewport changes. Cosmetic only; hit-testing never reads these rectangles.

use log::debug;

use crate::models::BoundingBox;

use super::{source::RegionSource, tracker::RegionTracker};

pub trait OverlaySurface: Send {
    /// Draws or moves the overlay for one region, in page coordinates.
    fn place(&mut self, region_id: &str, label: &str, rect: BoundingBox);

    fn remove_all(&mut self);
}

/// Overlay surface that writes placements to the debug log.
#[derive(Debug, Default)]
pub struct LoggingOverlay {
    placed: usize,
}

impl LoggingOverlay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlaySurface for LoggingOverlay {
    fn place(&mut self, region_id: &str, label: &str, rect: BoundingBox) {
        self.placed += 1;
        debug!(
            "overlay {region_id} [{label}] at ({:.0}, {:.0}) {:.0}x{:.0}",
            rect.x, rect.y, rect.width, rect.height
        );
    }

    fn remove_all(&mut self) {
        debug!("removed {} overlay placements", self.placed);
        self.placed = 0;
    }
}

/// Re-measures each region through the source and moves its overlay. A region
/// whose target no longer resolves keeps its registration-time rectangle.
pub fn refresh_overlays(
    tracker: &RegionTracker,
    source: &dyn RegionSource,
    surface: &mut dyn OverlaySurface,
) {
    let scroll = source.scroll_offset();
    for region in tracker.regions() {
        let rect = source
            .resolve(&region.target)
            .get(region.match_index.unwrap_or(0))
            .map(|rect| rect.translated(scroll.x, scroll.y))
            .unwrap_or(region.bounding_box);
        surface.place(&region.id, &region.label, rect);
    }
}
