//! Wire types: pipeline references, input envelopes, and enqueue outcomes.

use crate::behavior::Payload;
use crate::coordinator::CoordinatorHandle;
use crate::ring::{PartitionId, PreflistEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique reference to one pipeline execution.
///
/// Allocated per `exec` call and attached to every result, log, and EOI
/// record the pipeline emits, so many pipelines can share one sink.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct PipeRef(Uuid);

impl PipeRef {
  /// Allocates a fresh pipeline reference.
  #[must_use]
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }
}

impl Default for PipeRef {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for PipeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "PipeRef({})", self.0)
  }
}

impl fmt::Display for PipeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

/// Key of one queue record: a partition of one fitting of one pipeline.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct QueueKey {
  /// The owning pipeline.
  pub pipeline: PipeRef,
  /// The fitting name.
  pub fitting: String,
  /// The partition this queue serves.
  pub partition: PartitionId,
}

impl fmt::Display for QueueKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.pipeline, self.fitting, self.partition)
  }
}

/// One input on the wire, addressed to the head of its remaining preflist.
#[derive(Clone)]
pub struct InputEnvelope {
  /// The owning pipeline.
  pub pipeline: PipeRef,
  /// Address of the fitting's coordinator, for lazy details lookup.
  pub coordinator: CoordinatorHandle,
  /// Name of the target fitting.
  pub fitting: String,
  /// Partition of the worker that produced this input, if any. Always set
  /// for inputs routed with `follow` partitioning.
  pub source_partition: Option<PartitionId>,
  /// The input value.
  pub value: Payload,
  /// Remaining preflist; the head entry is the current target.
  pub preflist: Vec<PreflistEntry>,
}

impl InputEnvelope {
  /// Returns the current target entry, if the preflist is non-empty.
  #[must_use]
  pub fn head(&self) -> Option<&PreflistEntry> {
    self.preflist.first()
  }

  /// True when no fallback partitions remain beyond the current target.
  #[must_use]
  pub fn last_preflist(&self) -> bool {
    self.preflist.len() <= 1
  }

  /// Returns the queue key for the current target, if any.
  #[must_use]
  pub fn key(&self) -> Option<QueueKey> {
    self.head().map(|entry| QueueKey {
      pipeline: self.pipeline,
      fitting: self.fitting.clone(),
      partition: entry.partition,
    })
  }
}

impl fmt::Debug for InputEnvelope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InputEnvelope")
      .field("pipeline", &self.pipeline)
      .field("fitting", &self.fitting)
      .field("source_partition", &self.source_partition)
      .field("preflist", &self.preflist)
      .finish()
  }
}

/// Why an input was turned away.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
  /// The fitting already received end-of-input.
  EoiClosed,
  /// The fitting's details could not be fetched (coordinator gone).
  UnknownFitting,
  /// The pipeline was torn down while the input waited.
  TornDown,
}

impl fmt::Display for RejectReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RejectReason::EoiClosed => write!(f, "end-of-input already received"),
      RejectReason::UnknownFitting => write!(f, "fitting unknown"),
      RejectReason::TornDown => write!(f, "pipeline torn down"),
    }
  }
}

/// Reply to a blocking enqueue. The sender stays parked until the input sits
/// in the ready queue (`Accepted`) or is turned away (`Rejected`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnqueueOutcome {
  /// The input is in the ready queue.
  Accepted,
  /// The input was not accepted.
  Rejected(RejectReason),
}
