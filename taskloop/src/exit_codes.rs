//! Stable exit codes for taskloop CLI commands.

/// Command succeeded (or the loop went idle with nothing left to do).
pub const OK: i32 = 0;
/// Invalid configuration, git failure, or any other error.
pub const ERROR: i32 = 1;
/// `taskloop next` found nothing runnable.
pub const NOTHING_RUNNABLE: i32 = 2;
/// Another live process holds the run lock.
pub const LOCK_HELD: i32 = 3;
/// The loop stopped on a failed or suspended item, or a failed planner.
pub const STOPPED: i32 = 4;
/// The loop was interrupted by SIGINT/SIGTERM between steps.
pub const INTERRUPTED: i32 = 130;
