//! Per-(fitting, partition) workers.
//!
//! A worker is an event loop over one behavior instance: dequeue an input,
//! run `process`, emit outputs through the routing layer, repeat until the
//! queue reports the post-EOI drain, then run `done`. Behavior panics are
//! contained here and surfaced as exception log records; the queue manager
//! decides whether to restart.

use crate::behavior::{Behavior, BehaviorError, Payload, Verdict};
use crate::envelope::QueueKey;
use crate::fitting::{FittingDetails, OutputTarget};
use crate::manager::QueueManagerHandle;
use crate::metrics;
use crate::queue::DequeueReply;
use crate::ring::{NodeId, PartitionId};
use crate::router::Router;
use crate::sink::{emit_log, LogKind, LogRecord, SinkRecord};
use crate::status::WorkerPhase;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;

/// Counters one worker publishes for best-effort status snapshots.
pub struct WorkerStats {
  state: AtomicU8,
  processed: AtomicU64,
  failures: AtomicU64,
  work_time_us: AtomicU64,
  idle_time_us: AtomicU64,
  started: DateTime<Utc>,
}

impl WorkerStats {
  pub(crate) fn new() -> Self {
    Self {
      state: AtomicU8::new(WorkerPhase::Init.as_u8()),
      processed: AtomicU64::new(0),
      failures: AtomicU64::new(0),
      work_time_us: AtomicU64::new(0),
      idle_time_us: AtomicU64::new(0),
      started: Utc::now(),
    }
  }

  pub(crate) fn set_phase(&self, phase: WorkerPhase) {
    self.state.store(phase.as_u8(), Ordering::Relaxed);
  }

  /// Current phase.
  #[must_use]
  pub fn phase(&self) -> WorkerPhase {
    WorkerPhase::from_u8(self.state.load(Ordering::Relaxed))
  }

  /// When the worker started.
  #[must_use]
  pub fn started(&self) -> DateTime<Utc> {
    self.started
  }

  /// Inputs processed to an `Ok` verdict.
  #[must_use]
  pub fn processed(&self) -> u64 {
    self.processed.load(Ordering::Relaxed)
  }

  /// Error verdicts plus callback crashes.
  #[must_use]
  pub fn failures(&self) -> u64 {
    self.failures.load(Ordering::Relaxed)
  }

  /// Microseconds spent inside `process`.
  #[must_use]
  pub fn work_time_us(&self) -> u64 {
    self.work_time_us.load(Ordering::Relaxed)
  }

  /// Microseconds spent waiting for inputs.
  #[must_use]
  pub fn idle_time_us(&self) -> u64 {
    self.idle_time_us.load(Ordering::Relaxed)
  }

  fn add_work(&self, since: Instant) {
    let us = since.elapsed().as_micros() as u64;
    self.work_time_us.fetch_add(us, Ordering::Relaxed);
  }

  fn add_idle(&self, since: Instant) {
    let us = since.elapsed().as_micros() as u64;
    self.idle_time_us.fetch_add(us, Ordering::Relaxed);
  }
}

impl std::fmt::Debug for WorkerStats {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerStats")
      .field("phase", &self.phase())
      .field("processed", &self.processed())
      .field("failures", &self.failures())
      .finish()
  }
}

/// Manager-side record of a live worker.
pub(crate) struct WorkerEntry {
  pub stats: Arc<WorkerStats>,
  pub abort: AbortHandle,
}

/// Execution context handed to behavior callbacks.
///
/// Carries the fitting details and the routing layer; `emit` blocks until the
/// downstream enqueue resolves, which is what propagates back-pressure from
/// the sink all the way to the head of the pipeline.
pub struct WorkerContext {
  partition: PartitionId,
  node: NodeId,
  details: Arc<FittingDetails>,
  router: Arc<Router>,
}

impl WorkerContext {
  pub(crate) fn new(
    partition: PartitionId,
    node: NodeId,
    details: Arc<FittingDetails>,
    router: Arc<Router>,
  ) -> Self {
    Self {
      partition,
      node,
      details,
      router,
    }
  }

  /// The partition this worker serves.
  #[must_use]
  pub fn partition(&self) -> PartitionId {
    self.partition
  }

  /// The node hosting this worker.
  #[must_use]
  pub fn node(&self) -> &NodeId {
    &self.node
  }

  /// The name of the fitting this worker serves.
  #[must_use]
  pub fn fitting(&self) -> &str {
    &self.details.name
  }

  /// The fitting's static arg.
  #[must_use]
  pub fn arg(&self) -> Option<&Payload> {
    self.details.arg.as_ref()
  }

  /// Emits one output downstream, blocking until it is accepted. A rejected
  /// output is discarded with a log record; processing continues.
  pub async fn emit(&self, value: Payload) {
    match &self.details.output {
      OutputTarget::Stage(next) => {
        let sent = self
          .router
          .send_output(self.partition, self.node.clone(), next, value)
          .await;
        if let Err(error) = sent {
          self
            .log(
              LogKind::RejectedOutput,
              format!("output discarded: {}", error),
              None,
            )
            .await;
        }
      }
      OutputTarget::Sink => {
        metrics::record_result(&self.details.name);
        self
          .details
          .sink
          .send(SinkRecord::Result {
            pipeline: self.details.pipeline,
            from: self.details.name.clone(),
            value,
          })
          .await;
      }
    }
  }

  /// Emits a log record attributed to this worker's fitting.
  pub async fn log(&self, kind: LogKind, reason: String, input: Option<Payload>) {
    let record = LogRecord {
      pipeline: self.details.pipeline,
      from: self.details.name.clone(),
      kind,
      behavior: self.details.behavior_id.clone(),
      partition: Some(self.partition),
      reason,
      input,
    };
    emit_log(self.details.log, &self.details.sink, record).await;
  }

  /// Emits a trace record if the pipeline's filter matches. The fitting
  /// name, node id, and behavior id are always part of the topic set.
  pub async fn trace(&self, topics: &[&str], msg: String) {
    let mut all: Vec<&str> = vec![
      self.details.name.as_str(),
      self.node.as_str(),
      self.details.behavior_id.as_str(),
    ];
    all.extend_from_slice(topics);
    if self.details.trace.matches(&all) {
      self.log(LogKind::Trace, msg, None).await;
    }
  }
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "opaque panic payload".to_string()
  }
}

/// Body of one worker task.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_worker(
  key: QueueKey,
  node: NodeId,
  details: Arc<FittingDetails>,
  handoff_blob: Option<Payload>,
  stats: Arc<WorkerStats>,
  manager: QueueManagerHandle,
  router: Arc<Router>,
) {
  let ctx = WorkerContext::new(key.partition, node, details.clone(), router.clone());
  let mut behavior = details.behavior.build();

  stats.set_phase(WorkerPhase::Init);
  if let Err(error) = start_behavior(behavior.as_mut(), handoff_blob, &ctx).await {
    ctx.log(LogKind::Exception, error.clone(), None).await;
    manager.worker_crashed(key, error, false).await;
    return;
  }
  ctx.trace(&["lifecycle"], "worker started".to_string()).await;

  loop {
    stats.set_phase(WorkerPhase::Waiting);
    let idle_from = Instant::now();
    let reply = manager.dequeue(key.clone()).await;
    stats.add_idle(idle_from);

    match reply {
      DequeueReply::Item(envelope) => {
        stats.set_phase(WorkerPhase::Processing);
        let last_preflist = envelope.last_preflist();
        let input = envelope.value.clone();
        let work_from = Instant::now();
        let outcome = AssertUnwindSafe(behavior.process(input, last_preflist, &ctx))
          .catch_unwind()
          .await;
        stats.add_work(work_from);

        match outcome {
          Ok(Verdict::Ok) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
          }
          Ok(Verdict::ForwardPreflist) => {
            // Forward before the next dequeue: the queue must not read as
            // drained while this input is still looking for a partition.
            router.forward(envelope, Some(details.clone())).await;
          }
          Ok(Verdict::Error(reason)) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            ctx
              .log(LogKind::Result, reason, Some(envelope.value.clone()))
              .await;
          }
          Err(panic) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_worker_failure(&details.name);
            let reason = panic_reason(panic);
            ctx
              .log(
                LogKind::Exception,
                reason.clone(),
                Some(envelope.value.clone()),
              )
              .await;
            manager.worker_crashed(key, reason, false).await;
            return;
          }
        }
      }
      DequeueReply::Archive => {
        stats.set_phase(WorkerPhase::Done);
        let blob = match AssertUnwindSafe(behavior.archive()).catch_unwind().await {
          Ok(Ok(blob)) => blob,
          Ok(Err(error)) => {
            ctx.log(LogKind::Exception, error.to_string(), None).await;
            None
          }
          Err(panic) => {
            ctx.log(LogKind::Exception, panic_reason(panic), None).await;
            None
          }
        };
        manager.archive_done(key, blob).await;
        return;
      }
      DequeueReply::Drained => break,
    }
  }

  stats.set_phase(WorkerPhase::Done);
  match AssertUnwindSafe(behavior.done(&ctx)).catch_unwind().await {
    Ok(Ok(())) => {}
    Ok(Err(error)) => {
      ctx.log(LogKind::Exception, error.to_string(), None).await;
    }
    Err(panic) => {
      ctx.log(LogKind::Exception, panic_reason(panic), None).await;
    }
  }
  ctx.trace(&["lifecycle"], "worker drained".to_string()).await;
  manager.worker_finished(key).await;
}

async fn start_behavior(
  behavior: &mut dyn Behavior,
  handoff_blob: Option<Payload>,
  ctx: &WorkerContext,
) -> Result<(), String> {
  let init = AssertUnwindSafe(behavior.init(ctx)).catch_unwind().await;
  unwrap_lifecycle(init)?;
  if let Some(blob) = handoff_blob {
    let handoff = AssertUnwindSafe(behavior.handoff(blob, ctx))
      .catch_unwind()
      .await;
    unwrap_lifecycle(handoff)?;
  }
  Ok(())
}

fn unwrap_lifecycle(
  outcome: Result<Result<(), BehaviorError>, Box<dyn Any + Send>>,
) -> Result<(), String> {
  match outcome {
    Ok(Ok(())) => Ok(()),
    Ok(Err(error)) => Err(error.to_string()),
    Err(panic) => Err(panic_reason(panic)),
  }
}
