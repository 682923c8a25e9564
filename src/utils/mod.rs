pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
