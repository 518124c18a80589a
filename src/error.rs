//! Crate-level error types.

use crate::envelope::RejectReason;
use thiserror::Error;

/// Pipeline creation failure, surfaced synchronously from `exec`.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The stage list was empty.
  #[error("pipeline has no fittings")]
  Empty,
  /// Two fittings shared a name.
  #[error("duplicate fitting name '{0}'")]
  DuplicateName(String),
  /// A fitting named a behavior the registry does not know.
  #[error("unknown behavior '{behavior}' in fitting '{fitting}'")]
  UnknownBehavior {
    /// The offending fitting.
    fitting: String,
    /// The unresolvable behavior id.
    behavior: String,
  },
  /// A behavior's `validate_arg` rejected the fitting's arg.
  #[error("invalid arg for fitting '{fitting}': {reason}")]
  InvalidArg {
    /// The offending fitting.
    fitting: String,
    /// The behavior's rejection reason.
    reason: String,
  },
  /// `nval` must be positive.
  #[error("fitting '{0}' has an nval of zero")]
  ZeroNval(String),
  /// `q_limit` must be positive.
  #[error("fitting '{0}' has a queue limit of zero")]
  ZeroQueueLimit(String),
  /// The head fitting has nothing to follow.
  #[error("head fitting '{0}' cannot use follow partitioning")]
  FollowAtHead(String),
}

/// Failure to queue an input into a pipeline.
#[derive(Debug, Error)]
pub enum QueueWorkError {
  /// The target queue turned the input away.
  #[error("input rejected: {0}")]
  Rejected(RejectReason),
  /// The ring produced an empty preflist for the input's hash.
  #[error("empty preflist for input hash")]
  PreflistExhausted,
  /// A `follow` input arrived without a source partition, or the source
  /// partition has no owner on the ring.
  #[error("follow routing failed: {0}")]
  FollowRouting(String),
  /// The target node is not registered with the router.
  #[error("no queue manager for node '{0}'")]
  UnknownNode(String),
}
