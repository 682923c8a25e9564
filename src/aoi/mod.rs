pub mod loop_worker;
pub mod manager;
pub mod overlay;
pub mod source;
pub mod tracker;

pub use manager::AoiManager;
pub use overlay::{LoggingOverlay, OverlaySurface};
pub use source::{FixedRegionSource, RegionSource};
pub use tracker::RegionTracker;
