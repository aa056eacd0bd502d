pub mod schema;
pub mod sqlite;
pub mod store;

pub use sqlite::{SubmissionLog, SubmissionLogConfig, init_global_logger, log_submission};
pub use store::MirrorStore;
