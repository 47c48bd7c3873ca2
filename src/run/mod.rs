//! Processing runs: the per-schedule occurrence processor, the run lock
//! that keeps passes from overlapping, the run log, and the coordinator
//! that ties them together.

mod coordinator;
mod lock;
mod processor;
mod record;

pub use coordinator::run_once;
pub use lock::{RUN_LOCK_NAME, RunLock, RunLockGuard, create_run_lock_table};
pub use processor::{ProcessOutcome, process};
pub use record::{
    RunRecord, RunRecordId, RunStatus, RunStatusError, create_run_record_table, finalize_run,
    get_run, get_runs_in_range, start_run,
};
