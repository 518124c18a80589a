//! Per-node queue managers.
//!
//! One manager task per node hosts every queue record for that node and
//! serializes all mutations through its inbox. Enqueues block their sender
//! until the input sits in the ready queue; workers pull through the same
//! inbox. Cross-actor notifications (details lookups, coordinator calls,
//! preflist forwards) are spawned so the manager loop never awaits another
//! actor's inbox.

use crate::behavior::Payload;
use crate::config::NodeConfig;
use crate::coordinator::CoordinatorHandle;
use crate::envelope::{EnqueueOutcome, InputEnvelope, PipeRef, QueueKey, RejectReason};
use crate::fitting::FittingDetails;
use crate::metrics;
use crate::queue::{DequeueReply, EnqueueEffect, QueueRecord};
use crate::ring::NodeId;
use crate::router::Router;
use crate::sink::{emit_log, LogKind, LogRecord};
use crate::status::WorkerStatus;
use crate::worker::{run_worker, WorkerEntry, WorkerStats};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

pub(crate) enum QueueCmd {
  Enqueue {
    envelope: InputEnvelope,
    reply: oneshot::Sender<EnqueueOutcome>,
  },
  Dequeue {
    key: QueueKey,
    reply: oneshot::Sender<DequeueReply>,
  },
  DetailsReady {
    key: QueueKey,
    details: Arc<FittingDetails>,
  },
  DetailsFailed {
    key: QueueKey,
  },
  MarkEoi {
    pipeline: PipeRef,
    fitting: String,
  },
  WorkerFinished {
    key: QueueKey,
  },
  WorkerCrashed {
    key: QueueKey,
    reason: String,
    unreachable: bool,
  },
  ArchiveWorker {
    key: QueueKey,
    reply: oneshot::Sender<Option<Payload>>,
  },
  ArchiveDone {
    key: QueueKey,
    blob: Option<Payload>,
  },
  HandoffDeliver {
    key: QueueKey,
    coordinator: CoordinatorHandle,
    blob: Payload,
  },
  Status {
    pipeline: PipeRef,
    reply: oneshot::Sender<Vec<WorkerStatus>>,
  },
  Teardown {
    pipeline: PipeRef,
  },
}

/// Cloneable address of one node's queue manager.
#[derive(Clone, Debug)]
pub struct QueueManagerHandle {
  node: NodeId,
  tx: mpsc::Sender<QueueCmd>,
}

impl QueueManagerHandle {
  /// The node this manager serves.
  #[must_use]
  pub fn node(&self) -> &NodeId {
    &self.node
  }

  /// Blocking enqueue: resolves once the input sits in the ready queue or
  /// was rejected.
  pub(crate) async fn enqueue(&self, envelope: InputEnvelope) -> EnqueueOutcome {
    let (reply, rx) = oneshot::channel();
    if self
      .tx
      .send(QueueCmd::Enqueue { envelope, reply })
      .await
      .is_err()
    {
      return EnqueueOutcome::Rejected(RejectReason::TornDown);
    }
    rx.await
      .unwrap_or(EnqueueOutcome::Rejected(RejectReason::TornDown))
  }

  /// Worker-side dequeue: resolves with the next input, the post-EOI drain,
  /// or an archive request.
  pub(crate) async fn dequeue(&self, key: QueueKey) -> DequeueReply {
    let (reply, rx) = oneshot::channel();
    if self.tx.send(QueueCmd::Dequeue { key, reply }).await.is_err() {
      return DequeueReply::Drained;
    }
    rx.await.unwrap_or(DequeueReply::Drained)
  }

  /// Announces that no further inputs will arrive for a fitting.
  pub(crate) async fn mark_eoi(&self, pipeline: PipeRef, fitting: String) {
    let _ = self.tx.send(QueueCmd::MarkEoi { pipeline, fitting }).await;
  }

  pub(crate) async fn worker_finished(&self, key: QueueKey) {
    let _ = self.tx.send(QueueCmd::WorkerFinished { key }).await;
  }

  pub(crate) async fn worker_crashed(&self, key: QueueKey, reason: String, unreachable: bool) {
    let cmd = QueueCmd::WorkerCrashed {
      key,
      reason,
      unreachable,
    };
    let _ = self.tx.send(cmd).await;
  }

  /// Archives the live worker for handoff; resolves with the archive blob
  /// once the worker has terminated. `None` when there is nothing to move.
  pub(crate) async fn archive_worker(&self, key: QueueKey) -> Option<Payload> {
    let (reply, rx) = oneshot::channel();
    if self
      .tx
      .send(QueueCmd::ArchiveWorker { key, reply })
      .await
      .is_err()
    {
      return None;
    }
    rx.await.ok().flatten()
  }

  pub(crate) async fn archive_done(&self, key: QueueKey, blob: Option<Payload>) {
    let _ = self.tx.send(QueueCmd::ArchiveDone { key, blob }).await;
  }

  /// Seeds a queue with archived state; the next spawned worker absorbs it
  /// through `handoff` before its first `process`.
  pub(crate) async fn handoff_deliver(
    &self,
    key: QueueKey,
    coordinator: CoordinatorHandle,
    blob: Payload,
  ) {
    let cmd = QueueCmd::HandoffDeliver {
      key,
      coordinator,
      blob,
    };
    let _ = self.tx.send(cmd).await;
  }

  /// Best-effort snapshot of every live worker of one pipeline on this node.
  pub(crate) async fn status(&self, pipeline: PipeRef) -> Vec<WorkerStatus> {
    let (reply, rx) = oneshot::channel();
    if self.tx.send(QueueCmd::Status { pipeline, reply }).await.is_err() {
      return Vec::new();
    }
    rx.await.unwrap_or_default()
  }

  /// Drops every queue of a pipeline, aborting its workers and unblocking
  /// parked senders with a rejection.
  pub(crate) async fn teardown(&self, pipeline: PipeRef) {
    let _ = self.tx.send(QueueCmd::Teardown { pipeline }).await;
  }

  /// Resolves when the manager task is gone; the coordinator's monitor.
  pub(crate) async fn closed(&self) {
    self.tx.closed().await;
  }
}

/// Spawns the queue manager task for one node.
pub(crate) fn spawn_queue_manager(
  node: NodeId,
  config: NodeConfig,
  router: Arc<Router>,
  shutdown: watch::Receiver<bool>,
) -> QueueManagerHandle {
  let (tx, rx) = mpsc::channel(config.inbox_capacity);
  let handle = QueueManagerHandle {
    node: node.clone(),
    tx,
  };
  let manager = QueueManager {
    node,
    config,
    router,
    self_handle: handle.clone(),
    queues: HashMap::new(),
  };
  tokio::spawn(manager.run(rx, shutdown));
  handle
}

struct QueueManager {
  node: NodeId,
  config: NodeConfig,
  router: Arc<Router>,
  self_handle: QueueManagerHandle,
  queues: HashMap<QueueKey, QueueRecord>,
}

impl QueueManager {
  async fn run(mut self, mut inbox: mpsc::Receiver<QueueCmd>, mut shutdown: watch::Receiver<bool>) {
    loop {
      tokio::select! {
        _ = shutdown.changed() => break,
        cmd = inbox.recv() => match cmd {
          Some(cmd) => self.handle(cmd),
          None => break,
        },
      }
    }
    debug!(node = %self.node, "queue manager stopping");
    for (_, mut record) in self.queues.drain() {
      record.reject_all(RejectReason::TornDown);
      if let Some(worker) = record.worker.take() {
        worker.abort.abort();
      }
    }
  }

  fn handle(&mut self, cmd: QueueCmd) {
    match cmd {
      QueueCmd::Enqueue { envelope, reply } => self.on_enqueue(envelope, reply),
      QueueCmd::Dequeue { key, reply } => self.on_dequeue(key, reply),
      QueueCmd::DetailsReady { key, details } => self.on_details_ready(key, details),
      QueueCmd::DetailsFailed { key } => self.on_details_failed(key),
      QueueCmd::MarkEoi { pipeline, fitting } => self.on_mark_eoi(pipeline, &fitting),
      QueueCmd::WorkerFinished { key } => self.on_worker_finished(key),
      QueueCmd::WorkerCrashed {
        key,
        reason,
        unreachable,
      } => self.on_worker_crashed(key, reason, unreachable),
      QueueCmd::ArchiveWorker { key, reply } => self.on_archive_worker(key, reply),
      QueueCmd::ArchiveDone { key, blob } => self.on_archive_done(key, blob),
      QueueCmd::HandoffDeliver {
        key,
        coordinator,
        blob,
      } => self.on_handoff_deliver(key, coordinator, blob),
      QueueCmd::Status { pipeline, reply } => self.on_status(pipeline, reply),
      QueueCmd::Teardown { pipeline } => self.on_teardown(pipeline),
    }
  }

  fn on_enqueue(&mut self, envelope: InputEnvelope, reply: oneshot::Sender<EnqueueOutcome>) {
    let Some(key) = envelope.key() else {
      let _ = reply.send(EnqueueOutcome::Rejected(RejectReason::UnknownFitting));
      return;
    };
    if !self.queues.contains_key(&key) {
      // A dead coordinator means the fitting is gone; do not open a queue
      // that could never fetch its details.
      if envelope.coordinator.is_closed() {
        let _ = reply.send(EnqueueOutcome::Rejected(RejectReason::UnknownFitting));
        return;
      }
      let record = QueueRecord::new(envelope.coordinator.clone(), self.config.queue_limit_ceiling);
      self.queues.insert(key.clone(), record);
      self.fetch_details(&key, envelope.coordinator.clone());
    }
    let Some(record) = self.queues.get_mut(&key) else {
      let _ = reply.send(EnqueueOutcome::Rejected(RejectReason::UnknownFitting));
      return;
    };
    match record.enqueue(envelope, reply) {
      EnqueueEffect::None => {}
      EnqueueEffect::Forward(envelope) => {
        let details = record.details.clone();
        self.spawn_forward(envelope, details);
      }
    }
  }

  fn on_dequeue(&mut self, key: QueueKey, reply: oneshot::Sender<DequeueReply>) {
    match self.queues.get_mut(&key) {
      Some(record) => record.dequeue(reply),
      None => {
        let _ = reply.send(DequeueReply::Drained);
      }
    }
  }

  fn on_details_ready(&mut self, key: QueueKey, details: Arc<FittingDetails>) {
    if let Some(record) = self.queues.get_mut(&key) {
      record.apply_details(details);
      self.spawn_worker_if_needed(&key);
    }
  }

  fn on_details_failed(&mut self, key: QueueKey) {
    if let Some(mut record) = self.queues.remove(&key) {
      warn!(node = %self.node, %key, "fitting details unavailable, dropping queue");
      record.reject_all(RejectReason::UnknownFitting);
    }
  }

  fn on_mark_eoi(&mut self, pipeline: PipeRef, fitting: &str) {
    let keys: Vec<QueueKey> = self
      .queues
      .keys()
      .filter(|key| key.pipeline == pipeline && key.fitting == fitting)
      .cloned()
      .collect();
    for key in keys {
      if let Some(record) = self.queues.get_mut(&key) {
        record.mark_eoi();
      }
      self.try_reclaim(&key);
    }
  }

  fn on_worker_finished(&mut self, key: QueueKey) {
    if let Some(record) = self.queues.get_mut(&key) {
      record.worker = None;
      self.try_reclaim(&key);
    }
  }

  fn on_worker_crashed(&mut self, key: QueueKey, reason: String, unreachable: bool) {
    let restart_limit = self.config.worker_restart_limit;
    let Some(record) = self.queues.get_mut(&key) else {
      return;
    };
    record.worker = None;
    metrics::record_worker_failure(&key.fitting);
    if unreachable {
      if let Some(details) = record.details.clone() {
        emit_queue_log(
          &details,
          &key,
          LogKind::UnreachableWorker,
          format!("worker terminated: {}", reason),
        );
      }
    }
    if let Some(reply) = record.archive_reply.take() {
      // The worker died before serving the archive request.
      let _ = reply.send(None);
    }
    if record.eoi_received && record.is_empty() {
      self.try_reclaim(&key);
      return;
    }
    if record.restarts < restart_limit {
      record.restarts += 1;
      warn!(node = %self.node, %key, %reason, restart = record.restarts, "restarting crashed worker");
      self.spawn_worker_if_needed(&key);
      return;
    }
    warn!(node = %self.node, %key, %reason, "worker restart limit reached, forwarding queue");
    let details = record.details.clone();
    if let Some(details) = &details {
      emit_queue_log(
        details,
        &key,
        LogKind::RestartFailed,
        format!("worker could not be restarted: {}", reason),
      );
    }
    let drained = record.drain_for_forwarding();
    for envelope in drained {
      self.spawn_forward(envelope, details.clone());
    }
    self.try_reclaim(&key);
  }

  fn on_archive_worker(&mut self, key: QueueKey, reply: oneshot::Sender<Option<Payload>>) {
    match self.queues.get_mut(&key) {
      Some(record) if record.worker.is_some() => record.request_archive(reply),
      _ => {
        let _ = reply.send(None);
      }
    }
  }

  fn on_archive_done(&mut self, key: QueueKey, blob: Option<Payload>) {
    let Some(record) = self.queues.get_mut(&key) else {
      return;
    };
    record.worker = None;
    if let Some(reply) = record.archive_reply.take() {
      let _ = reply.send(blob);
    }
    // Inputs left behind by the archived worker restart a fresh instance.
    if !record.is_empty() {
      self.spawn_worker_if_needed(&key);
    } else {
      self.try_reclaim(&key);
    }
  }

  fn on_handoff_deliver(&mut self, key: QueueKey, coordinator: CoordinatorHandle, blob: Payload) {
    if !self.queues.contains_key(&key) {
      let record = QueueRecord::new(coordinator.clone(), self.config.queue_limit_ceiling);
      self.queues.insert(key.clone(), record);
      self.fetch_details(&key, coordinator);
    }
    if let Some(record) = self.queues.get_mut(&key) {
      record.handoff_blob = Some(blob);
      self.spawn_worker_if_needed(&key);
    }
  }

  fn on_status(&self, pipeline: PipeRef, reply: oneshot::Sender<Vec<WorkerStatus>>) {
    let mut rows = Vec::new();
    for (key, record) in &self.queues {
      if key.pipeline != pipeline {
        continue;
      }
      let (Some(worker), Some(details)) = (&record.worker, &record.details) else {
        continue;
      };
      rows.push(WorkerStatus {
        node: self.node.clone(),
        partition: key.partition,
        fitting: key.fitting.clone(),
        behavior: details.behavior_id.clone(),
        state: worker.stats.phase(),
        inputs_done: record.eoi_received,
        queue_length: record.queue_length(),
        blocking_length: record.blocking_length(),
        started: worker.stats.started(),
        processed: worker.stats.processed(),
        failures: worker.stats.failures(),
        work_time_us: worker.stats.work_time_us(),
        idle_time_us: worker.stats.idle_time_us(),
      });
    }
    let _ = reply.send(rows);
  }

  fn on_teardown(&mut self, pipeline: PipeRef) {
    let keys: Vec<QueueKey> = self
      .queues
      .keys()
      .filter(|key| key.pipeline == pipeline)
      .cloned()
      .collect();
    for key in keys {
      if let Some(mut record) = self.queues.remove(&key) {
        record.reject_all(RejectReason::TornDown);
        if let Some(worker) = record.worker.take() {
          worker.abort.abort();
        }
      }
    }
  }

  /// Requests fitting details from the coordinator named in the envelope;
  /// the reply re-enters this manager's inbox.
  fn fetch_details(&self, key: &QueueKey, coordinator: CoordinatorHandle) {
    let node = self.node.clone();
    let manager = self.self_handle.clone();
    let key = key.clone();
    tokio::spawn(async move {
      let details = coordinator
        .get_details(node, key.partition, manager.clone())
        .await;
      let cmd = match details {
        Some(details) => QueueCmd::DetailsReady { key, details },
        None => QueueCmd::DetailsFailed { key },
      };
      let _ = manager.tx.send(cmd).await;
    });
  }

  fn spawn_worker_if_needed(&mut self, key: &QueueKey) {
    let node = self.node.clone();
    let router = self.router.clone();
    let manager = self.self_handle.clone();
    let Some(record) = self.queues.get_mut(key) else {
      return;
    };
    if record.worker.is_some() || record.forwarding {
      return;
    }
    let Some(details) = record.details.clone() else {
      return;
    };
    let stats = Arc::new(WorkerStats::new());
    let blob = record.handoff_blob.take();
    let join = tokio::spawn(run_worker(
      key.clone(),
      node,
      details,
      blob,
      stats.clone(),
      manager.clone(),
      router,
    ));
    record.worker = Some(WorkerEntry {
      stats,
      abort: join.abort_handle(),
    });
    // Crash monitor: a worker that dies without reporting becomes a crash
    // with a reason the stage could not catch.
    let key = key.clone();
    tokio::spawn(async move {
      if let Err(error) = join.await {
        if error.is_panic() {
          manager
            .worker_crashed(key, error.to_string(), true)
            .await;
        }
      }
    });
  }

  /// Reclaims a drained queue and reports `worker_done` to the coordinator.
  fn try_reclaim(&mut self, key: &QueueKey) {
    let Some(record) = self.queues.get(key) else {
      return;
    };
    if !record.eoi_received || !record.is_empty() || record.worker.is_some() {
      return;
    }
    // A queue whose details are still in flight reports once they land.
    if record.details.is_none() && !record.forwarding {
      return;
    }
    let Some(record) = self.queues.remove(key) else {
      return;
    };
    debug!(node = %self.node, %key, "queue drained, reclaiming");
    let coordinator = record.coordinator.clone();
    let partition = key.partition;
    let node = self.node.clone();
    tokio::spawn(async move {
      coordinator.worker_done(partition, node).await;
    });
  }

  fn spawn_forward(&self, envelope: InputEnvelope, details: Option<Arc<FittingDetails>>) {
    let router = self.router.clone();
    tokio::spawn(async move {
      router.forward(envelope, details).await;
    });
  }
}

fn emit_queue_log(details: &Arc<FittingDetails>, key: &QueueKey, kind: LogKind, reason: String) {
  let record = LogRecord {
    pipeline: details.pipeline,
    from: details.name.clone(),
    kind,
    behavior: details.behavior_id.clone(),
    partition: Some(key.partition),
    reason,
    input: None,
  };
  let mode = details.log;
  let sink = details.sink.clone();
  tokio::spawn(async move {
    emit_log(mode, &sink, record).await;
  });
}
