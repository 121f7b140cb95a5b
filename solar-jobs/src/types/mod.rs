pub mod ids;
pub mod record;
pub mod events;

pub use ids::JobId;
pub use record::{JobRecord, JobState};
pub use events::JobStatusEvent;
