//! The five-phase commit orchestrator (C6): ordered module locking, the
//! `update → change → store → done` pipeline, and priority-ordered
//! `abort` unwind on veto or plugin failure.

pub mod error;
pub mod orchestrator;

pub use error::CommitError;
pub use orchestrator::{CommitOrchestrator, Delta};
