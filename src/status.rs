//! Best-effort status snapshots.
//!
//! Workers publish counters through shared atomics; `status` reads them
//! without coordinating across partitions, so a snapshot may interleave with
//! in-flight processing.

use crate::ring::{NodeId, PartitionId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live phase of one worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
  /// Running `init` (or `handoff`).
  Init,
  /// Parked on the queue waiting for an input.
  Waiting,
  /// Inside a `process` call.
  Processing,
  /// Drained after end-of-input; `done` has run or is running.
  Done,
}

impl WorkerPhase {
  pub(crate) fn as_u8(self) -> u8 {
    match self {
      WorkerPhase::Init => 0,
      WorkerPhase::Waiting => 1,
      WorkerPhase::Processing => 2,
      WorkerPhase::Done => 3,
    }
  }

  pub(crate) fn from_u8(raw: u8) -> Self {
    match raw {
      0 => WorkerPhase::Init,
      1 => WorkerPhase::Waiting,
      2 => WorkerPhase::Processing,
      _ => WorkerPhase::Done,
    }
  }
}

/// Snapshot of one worker and its queue.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatus {
  /// Node hosting the worker.
  pub node: NodeId,
  /// Partition the worker serves.
  pub partition: PartitionId,
  /// Fitting name.
  pub fitting: String,
  /// Behavior id of the fitting.
  pub behavior: String,
  /// Live phase.
  pub state: WorkerPhase,
  /// True once the queue has received end-of-input.
  pub inputs_done: bool,
  /// Inputs waiting in the ready queue.
  pub queue_length: usize,
  /// Senders parked because the ready queue is full.
  pub blocking_length: usize,
  /// When the worker started.
  pub started: DateTime<Utc>,
  /// Inputs processed to an `Ok` verdict.
  pub processed: u64,
  /// Error verdicts plus callback crashes.
  pub failures: u64,
  /// Microseconds spent inside `process`.
  pub work_time_us: u64,
  /// Microseconds spent waiting for inputs.
  pub idle_time_us: u64,
}

/// Status of one stage: every live worker of one fitting.
#[derive(Clone, Debug, Serialize)]
pub struct StageStatus {
  /// Fitting name.
  pub fitting: String,
  /// Per-worker snapshots, in no particular order.
  pub workers: Vec<WorkerStatus>,
}
