//! Per-task logs and event streams
//!
//! Two append-only files exist per task: a raw text log mirroring the
//! agent's combined output (ending in the done sentinel) and a JSONL
//! stream of structured [`TaskEvent`]s with a monotone sequence
//! number. Exactly one writer owns each file: the task's executor.

mod events;
mod tail;
mod writer;

pub use events::{EndStatus, EventEnvelope, OutputStream, PhaseName, TaskEvent};
pub use tail::LogTail;
pub use writer::{done_sentinel, parse_sentinel, EventWriter, TaskLogWriter, SENTINEL_PREFIX};
