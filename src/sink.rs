//! Sink records and log/trace routing.
//!
//! Every pipeline delivers three kinds of records to its sink: results, logs,
//! and the final end-of-input marker. Log records additionally obey the
//! pipeline's log mode, and trace records pass through a topic filter before
//! they are emitted at all.

use crate::behavior::Payload;
use crate::envelope::PipeRef;
use crate::ring::PartitionId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;

/// Channel capacity of the default client sink.
pub(crate) const SINK_CAPACITY: usize = 256;

/// Kind of a pipeline log record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
  /// A stage returned an error verdict; the worker continued.
  Result,
  /// A stage callback panicked; the worker exited.
  Exception,
  /// A forward request could not be satisfied at routing time or in flight.
  ForwardPreflist,
  /// A forwarded input ran out of fallback partitions and was dropped.
  ForwardPreflistExhausted,
  /// The preflist was empty at routing time; the input was dropped.
  PreflistExhausted,
  /// A worker terminated with a reason the stage could not catch.
  UnreachableWorker,
  /// A crashed worker could not be restarted; its queue went into
  /// forwarding mode.
  RestartFailed,
  /// A downstream enqueue rejected an emitted output; it was discarded.
  RejectedOutput,
  /// A trace record that matched the pipeline's trace filter.
  Trace,
}

/// Structured log record attributed to one fitting.
#[derive(Clone)]
pub struct LogRecord {
  /// The owning pipeline.
  pub pipeline: PipeRef,
  /// Name of the fitting the record is attributed to.
  pub from: String,
  /// What happened.
  pub kind: LogKind,
  /// Behavior id of the fitting.
  pub behavior: String,
  /// Partition involved, when known.
  pub partition: Option<PartitionId>,
  /// Human-readable reason or message.
  pub reason: String,
  /// The input being processed when the record was produced, when available.
  pub input: Option<Payload>,
}

impl fmt::Debug for LogRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LogRecord")
      .field("pipeline", &self.pipeline)
      .field("from", &self.from)
      .field("kind", &self.kind)
      .field("partition", &self.partition)
      .field("reason", &self.reason)
      .finish()
  }
}

/// A record delivered to the pipeline's sink.
#[derive(Clone)]
pub enum SinkRecord {
  /// An output emitted by the pipeline's final fitting.
  Result {
    /// The owning pipeline.
    pipeline: PipeRef,
    /// Name of the emitting fitting.
    from: String,
    /// The output value.
    value: Payload,
  },
  /// A log record (see [`LogKind`]).
  Log(LogRecord),
  /// End-of-input: the pipeline has fully drained. Exactly one per pipeline.
  Eoi {
    /// The owning pipeline.
    pipeline: PipeRef,
  },
}

impl fmt::Debug for SinkRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SinkRecord::Result { pipeline, from, .. } => f
        .debug_struct("Result")
        .field("pipeline", pipeline)
        .field("from", from)
        .finish(),
      SinkRecord::Log(record) => f.debug_tuple("Log").field(record).finish(),
      SinkRecord::Eoi { pipeline } => f.debug_struct("Eoi").field("pipeline", pipeline).finish(),
    }
  }
}

/// Cloneable address of a sink.
#[derive(Clone, Debug)]
pub struct SinkHandle {
  tx: mpsc::Sender<SinkRecord>,
}

impl SinkHandle {
  /// Creates a sink backed by a bounded channel; the receiver side is handed
  /// to whoever consumes the records.
  #[must_use]
  pub fn channel() -> (Self, mpsc::Receiver<SinkRecord>) {
    let (tx, rx) = mpsc::channel(SINK_CAPACITY);
    (Self { tx }, rx)
  }

  /// Wraps an existing sender as a sink address.
  #[must_use]
  pub fn from_sender(tx: mpsc::Sender<SinkRecord>) -> Self {
    Self { tx }
  }

  /// Delivers a record, applying back-pressure. Records for a sink whose
  /// consumer is gone are silently discarded.
  pub async fn send(&self, record: SinkRecord) {
    let _ = self.tx.send(record).await;
  }
}

/// Where a pipeline's log records go.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
  /// Discard log records.
  #[default]
  Drop,
  /// Deliver log records to the pipeline sink.
  Sink,
  /// Emit log records as tracing events under the node target.
  NodeLog,
  /// Emit log records as tracing events under the system target.
  SystemLog,
}

/// Topic filter for trace records.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TraceFilter {
  /// Discard all traces.
  #[default]
  Off,
  /// Emit every trace.
  All,
  /// Emit traces carrying at least one of these topics.
  Topics(HashSet<String>),
}

impl TraceFilter {
  /// Builds a topic-set filter from anything iterable.
  #[must_use]
  pub fn topics<I, S>(topics: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::Topics(topics.into_iter().map(Into::into).collect())
  }

  /// True when a trace with the given topics should be emitted.
  #[must_use]
  pub fn matches(&self, topics: &[&str]) -> bool {
    match self {
      TraceFilter::Off => false,
      TraceFilter::All => true,
      TraceFilter::Topics(wanted) => topics.iter().any(|t| wanted.contains(*t)),
    }
  }
}

/// Routes a log record according to the pipeline's log mode.
pub(crate) async fn emit_log(mode: LogMode, sink: &SinkHandle, record: LogRecord) {
  match mode {
    LogMode::Drop => {}
    LogMode::Sink => sink.send(SinkRecord::Log(record)).await,
    LogMode::NodeLog => {
      tracing::warn!(
        target: "pipeweave::node",
        pipeline = %record.pipeline,
        from = %record.from,
        kind = ?record.kind,
        reason = %record.reason,
        "pipeline log record"
      );
    }
    LogMode::SystemLog => {
      tracing::warn!(
        target: "pipeweave::system",
        pipeline = %record.pipeline,
        from = %record.from,
        kind = ?record.kind,
        reason = %record.reason,
        "pipeline log record"
      );
    }
  }
}
