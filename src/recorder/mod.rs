pub mod controller;
pub mod export;
pub mod identity;
pub mod store;

pub use controller::RecorderController;
pub use export::{ExportFile, ExportFormat};
pub use identity::{resolve_participant_id, IdentitySources, PARTICIPANT_RECORD_KEY};
pub use store::{backup_key, storage_key, RecordStore, SharedRecordStore};
