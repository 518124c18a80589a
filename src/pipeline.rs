//! Client-side pipeline handle.
//!
//! Returned by `exec`; the only way the client talks to a running pipeline.
//! Inputs go in through `queue_work` (blocking on back-pressure), end of
//! input is requested with `eoi`, and records come back through
//! `receive_result` / `collect_results` until the EOI record arrives.

use crate::behavior::Payload;
use crate::coordinator::CoordinatorHandle;
use crate::envelope::PipeRef;
use crate::error::QueueWorkError;
use crate::fitting::FittingDetails;
use crate::router::Router;
use crate::sink::{LogRecord, SinkHandle, SinkRecord};
use crate::status::StageStatus;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Handle to one running pipeline.
pub struct Pipeline {
  pipe_ref: PipeRef,
  stages: Vec<Arc<FittingDetails>>,
  sink: SinkHandle,
  results: Option<mpsc::Receiver<SinkRecord>>,
  router: Arc<Router>,
}

impl Pipeline {
  pub(crate) fn new(
    pipe_ref: PipeRef,
    stages: Vec<Arc<FittingDetails>>,
    sink: SinkHandle,
    results: Option<mpsc::Receiver<SinkRecord>>,
    router: Arc<Router>,
  ) -> Self {
    Self {
      pipe_ref,
      stages,
      sink,
      results,
      router,
    }
  }

  /// The unique reference of this pipeline execution.
  #[must_use]
  pub fn pipe_ref(&self) -> PipeRef {
    self.pipe_ref
  }

  /// Fitting names, head first.
  #[must_use]
  pub fn stage_names(&self) -> Vec<&str> {
    self.stages.iter().map(|stage| stage.name.as_str()).collect()
  }

  /// The sink address of this pipeline, for sharing with other pipelines.
  #[must_use]
  pub fn sink(&self) -> &SinkHandle {
    &self.sink
  }

  pub(crate) fn head_coordinator(&self) -> &CoordinatorHandle {
    &self.stages[0].coordinator
  }

  pub(crate) fn stage_details(&self, fitting: &str) -> Option<&Arc<FittingDetails>> {
    self.stages.iter().find(|stage| stage.name == fitting)
  }

  /// Queues one input into the head fitting. Blocks while the target queue
  /// is full; this is the pipeline's end-to-end back-pressure.
  pub async fn queue_work(&self, input: Payload) -> Result<(), QueueWorkError> {
    self.router.queue_work(&self.stages[0], input, None).await
  }

  /// Requests end-of-input. Completion is signalled by the EOI record
  /// arriving at the sink; repeated requests are ignored.
  pub async fn eoi(&self) {
    self.head_coordinator().eoi().await;
  }

  /// Receives the next sink record. `None` means the sink channel closed
  /// without an EOI record (teardown), or the sink was caller-provided.
  pub async fn receive_result(&mut self) -> Option<SinkRecord> {
    match self.results.as_mut() {
      Some(results) => results.recv().await,
      None => None,
    }
  }

  /// Drains the sink until the EOI record (or teardown), splitting records
  /// into results `(value, from)` and log records.
  pub async fn collect_results(&mut self) -> (Vec<(Payload, String)>, Vec<LogRecord>) {
    let mut values = Vec::new();
    let mut logs = Vec::new();
    while let Some(record) = self.receive_result().await {
      match record {
        SinkRecord::Result { value, from, .. } => values.push((value, from)),
        SinkRecord::Log(log) => logs.push(log),
        SinkRecord::Eoi { .. } => break,
      }
    }
    (values, logs)
  }

  /// Takes the sink receiver as a stream, for stream-combinator consumers.
  pub fn take_results_stream(&mut self) -> Option<ReceiverStream<SinkRecord>> {
    self.results.take().map(ReceiverStream::new)
  }

  /// Best-effort status: per stage, one row per live worker.
  pub async fn status(&self) -> Vec<StageStatus> {
    let mut rows = Vec::new();
    for manager in self.router.managers() {
      rows.extend(manager.status(self.pipe_ref).await);
    }
    self
      .stages
      .iter()
      .map(|stage| StageStatus {
        fitting: stage.name.clone(),
        workers: rows
          .iter()
          .filter(|row| row.fitting == stage.name)
          .cloned()
          .collect(),
      })
      .collect()
  }
}

impl fmt::Debug for Pipeline {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pipeline")
      .field("pipe_ref", &self.pipe_ref)
      .field("stages", &self.stage_names())
      .finish()
  }
}
