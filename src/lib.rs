pub mod checkpoint;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod identifier;
pub mod job;
pub mod progress;
pub mod rebuild;
pub mod scanner;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, JobKey};
pub use config::{AppConfig, JobParameters, Overrides};
pub use error::Error;
pub use job::{JobDriver, JobPlan, JobReport};
pub use progress::{JobReporter, SilentReporter};
pub use rebuild::{RebuildOutcome, RebuildStatus};
pub use scanner::RebuildCandidate;
