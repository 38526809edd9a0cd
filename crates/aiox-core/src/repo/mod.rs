pub mod types;
pub use types::{latest_completed_run, load_runs, RunInstance, StepSlot};
