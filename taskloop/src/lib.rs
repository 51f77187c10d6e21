//! Single-node orchestrator that drives a coding-agent CLI through a queue of
//! work items stored as markdown files in a git repository.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (record parsing, condition grammar,
//!   selection, status transitions). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, subprocesses,
//!   the run lock, workspaces).
//! - **[`agent`]**: Provider detection and streaming invocation of the agent CLI.
//!
//! Orchestration modules ([`select`], [`step`], [`plan`], [`looping`]) combine
//! them to implement the CLI commands.

pub mod agent;
pub mod context;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod plan;
pub mod select;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
