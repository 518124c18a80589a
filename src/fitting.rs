//! Fitting specifications and the immutable details published to workers.

use crate::behavior::{BehaviorSpec, Payload};
use crate::coordinator::CoordinatorHandle;
use crate::envelope::PipeRef;
use crate::hash::RingHash;
use crate::sink::{LogMode, SinkHandle, TraceFilter};
use std::fmt;
use std::sync::Arc;

/// Default per-worker queue limit when a fitting does not set one.
pub const DEFAULT_QUEUE_LIMIT: usize = 64;

/// Default preflist length when a fitting does not set one.
pub const DEFAULT_NVAL: usize = 1;

/// How inputs of a fitting are mapped to ring partitions.
#[derive(Clone)]
pub enum Partitioner {
  /// Deterministic function from input to a 160-bit ring hash.
  Hash(Arc<dyn Fn(&Payload) -> RingHash + Send + Sync>),
  /// Route to the partition that produced the input, on the same node.
  Follow,
}

impl Partitioner {
  /// Partitioner sending every input to the same ring point.
  #[must_use]
  pub fn constant(hash: RingHash) -> Self {
    Self::Hash(Arc::new(move |_| hash))
  }

  /// Partitioner from a hashing closure.
  #[must_use]
  pub fn hash_fn<F>(f: F) -> Self
  where
    F: Fn(&Payload) -> RingHash + Send + Sync + 'static,
  {
    Self::Hash(Arc::new(f))
  }

  /// True for `follow` partitioning.
  #[must_use]
  pub fn is_follow(&self) -> bool {
    matches!(self, Partitioner::Follow)
  }
}

impl fmt::Debug for Partitioner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Partitioner::Hash(_) => write!(f, "Partitioner::Hash"),
      Partitioner::Follow => write!(f, "Partitioner::Follow"),
    }
  }
}

impl Default for Partitioner {
  fn default() -> Self {
    Self::constant(RingHash::ZERO)
  }
}

/// Client-side specification of one pipeline stage.
#[derive(Clone)]
pub struct FittingSpec {
  /// Human label, attached to every emitted result and log for attribution.
  pub name: String,
  /// Registry identifier of the stage behavior.
  pub behavior: String,
  /// Opaque static configuration handed to the behavior's `init`.
  pub arg: Option<Payload>,
  /// Input-to-partition mapping.
  pub partitioner: Partitioner,
  /// Preflist length considered per input (attempts before exhaustion).
  pub nval: usize,
  /// Per-worker queue limit; capped by the node-wide ceiling.
  pub q_limit: usize,
}

impl FittingSpec {
  /// Creates a spec with default partitioner, `nval`, and queue limit.
  #[must_use]
  pub fn new(name: impl Into<String>, behavior: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      behavior: behavior.into(),
      arg: None,
      partitioner: Partitioner::default(),
      nval: DEFAULT_NVAL,
      q_limit: DEFAULT_QUEUE_LIMIT,
    }
  }

  /// Sets the behavior arg.
  #[must_use]
  pub fn with_arg(mut self, arg: Payload) -> Self {
    self.arg = Some(arg);
    self
  }

  /// Sets the partitioner.
  #[must_use]
  pub fn with_partitioner(mut self, partitioner: Partitioner) -> Self {
    self.partitioner = partitioner;
    self
  }

  /// Sets the preflist length.
  #[must_use]
  pub fn with_nval(mut self, nval: usize) -> Self {
    self.nval = nval;
    self
  }

  /// Sets the per-worker queue limit.
  #[must_use]
  pub fn with_q_limit(mut self, q_limit: usize) -> Self {
    self.q_limit = q_limit;
    self
  }
}

impl fmt::Debug for FittingSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FittingSpec")
      .field("name", &self.name)
      .field("behavior", &self.behavior)
      .field("partitioner", &self.partitioner)
      .field("nval", &self.nval)
      .field("q_limit", &self.q_limit)
      .finish()
  }
}

/// Where a fitting's outputs go.
#[derive(Clone)]
pub enum OutputTarget {
  /// The next fitting of the pipeline.
  Stage(Arc<FittingDetails>),
  /// The pipeline sink; this fitting is the tail.
  Sink,
}

impl fmt::Debug for OutputTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OutputTarget::Stage(next) => write!(f, "OutputTarget::Stage({})", next.name),
      OutputTarget::Sink => write!(f, "OutputTarget::Sink"),
    }
  }
}

/// Everything a worker needs about its fitting, published once at startup
/// and immutable afterwards, so workers hold their own copy without locking.
pub struct FittingDetails {
  /// The owning pipeline.
  pub pipeline: PipeRef,
  /// Fitting name.
  pub name: String,
  /// Behavior registry id.
  pub behavior_id: String,
  /// Resolved behavior factory.
  pub behavior: Arc<dyn BehaviorSpec>,
  /// Static behavior configuration.
  pub arg: Option<Payload>,
  /// Input-to-partition mapping for this fitting.
  pub partitioner: Partitioner,
  /// Preflist length for this fitting's inputs.
  pub nval: usize,
  /// Per-worker queue limit before the node ceiling is applied.
  pub q_limit: usize,
  /// Address of this fitting's coordinator.
  pub coordinator: CoordinatorHandle,
  /// Downstream target for emitted outputs.
  pub output: OutputTarget,
  /// The pipeline sink, for results and log records.
  pub sink: SinkHandle,
  /// Log routing mode of the pipeline.
  pub log: LogMode,
  /// Trace topic filter of the pipeline.
  pub trace: TraceFilter,
}

impl fmt::Debug for FittingDetails {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FittingDetails")
      .field("pipeline", &self.pipeline)
      .field("name", &self.name)
      .field("behavior_id", &self.behavior_id)
      .field("partitioner", &self.partitioner)
      .field("nval", &self.nval)
      .field("q_limit", &self.q_limit)
      .field("output", &self.output)
      .finish()
  }
}
