pub mod context;
pub mod job_engine;
pub mod job_registry;
pub mod merge;
pub mod scheduler;

pub use context::{AccountStats, build_context, build_stats};
pub use job_engine::{JobEngine, JobError, JobHandle};
pub use job_registry::JobRegistry;
pub use merge::{FetchedBatch, merge_batch};
pub use scheduler::JobReaper;
