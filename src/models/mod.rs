pub mod announcement;
pub mod assignment;
pub mod connection;
pub mod course;
pub mod job;

pub use announcement::{Announcement, AnnouncementRecord, UNKNOWN_COURSE};
pub use assignment::{Assignment, AssignmentKind, AssignmentRecord, SubmissionStatus};
pub use connection::{ConnectionConfig, ConnectionStatus};
pub use course::{Course, CourseRecord};
pub use job::{JobStatus, SyncJob, SyncSummary};
