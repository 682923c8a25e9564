pub mod event;
pub mod region;
pub mod session;

pub use event::{
    AnswerUpdate, AoiClick, AoiEnter, AoiExit, ArticleSelected, CustomEvent, EventPayload,
    LogRecord, PageInfo, PageUnload, TaskCompleted, Transition, TransitionEvent,
    VisibilityChange,
};
pub use region::{BoundingBox, Position, Region, RegionConfig, RegionStats, RegionTarget};
pub use session::{
    AnswerRecord, AoiVisit, AoiVisitStats, GazeSample, InteractionRecord, Milestones,
    SessionLog, SessionStatistics, Validity,
};
