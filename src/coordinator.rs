//! Per-fitting coordinators.
//!
//! One coordinator exists per fitting per pipeline. It serves fitting details
//! to queue managers (registering them as active workers as it does), tracks
//! the evolving worker set, and drives end-of-input: once EOI has been
//! requested and every registered worker has drained, the coordinator sends
//! EOI to the next stage (or the sink) and terminates.
//!
//! Because every producer blocks until its output is enqueued downstream, a
//! drained worker set means no input for this stage exists anywhere; no
//! watermark tracking is needed.

use crate::envelope::PipeRef;
use crate::fitting::FittingDetails;
use crate::manager::QueueManagerHandle;
use crate::ring::{NodeId, PartitionId};
use crate::sink::{SinkHandle, SinkRecord};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const COORDINATOR_INBOX_CAPACITY: usize = 64;

pub(crate) enum CoordCmd {
  GetDetails {
    node: NodeId,
    partition: PartitionId,
    manager: QueueManagerHandle,
    reply: oneshot::Sender<Arc<FittingDetails>>,
  },
  WorkerDone {
    partition: PartitionId,
    node: NodeId,
  },
  ManagerDown {
    node: NodeId,
  },
  Eoi,
}

/// Cloneable address of one fitting's coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
  tx: mpsc::Sender<CoordCmd>,
}

impl CoordinatorHandle {
  /// Requests end-of-input for this fitting. Idempotent; requests after the
  /// coordinator terminated are ignored.
  pub async fn eoi(&self) {
    let _ = self.tx.send(CoordCmd::Eoi).await;
  }

  /// Fetches the fitting details, registering the calling manager in the
  /// coordinator's worker set. `None` means the coordinator is gone.
  pub(crate) async fn get_details(
    &self,
    node: NodeId,
    partition: PartitionId,
    manager: QueueManagerHandle,
  ) -> Option<Arc<FittingDetails>> {
    let (reply, rx) = oneshot::channel();
    let cmd = CoordCmd::GetDetails {
      node,
      partition,
      manager,
      reply,
    };
    if self.tx.send(cmd).await.is_err() {
      return None;
    }
    rx.await.ok()
  }

  /// Reports that the worker for a partition has fully drained.
  pub(crate) async fn worker_done(&self, partition: PartitionId, node: NodeId) {
    let _ = self.tx.send(CoordCmd::WorkerDone { partition, node }).await;
  }

  pub(crate) fn sender(&self) -> mpsc::Sender<CoordCmd> {
    self.tx.clone()
  }

  /// True once the coordinator task has terminated.
  pub(crate) fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

impl fmt::Debug for CoordinatorHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoordinatorHandle").finish()
  }
}

/// Where a coordinator sends its end-of-input once drained.
pub(crate) enum Downstream {
  Coordinator(CoordinatorHandle),
  Sink(SinkHandle),
}

/// Creates a coordinator address whose task has not started yet. The builder
/// needs the handle before it can assemble the details the task will serve.
pub(crate) fn coordinator_channel() -> (CoordinatorHandle, mpsc::Receiver<CoordCmd>) {
  let (tx, rx) = mpsc::channel(COORDINATOR_INBOX_CAPACITY);
  (CoordinatorHandle { tx }, rx)
}

/// Body of one coordinator task.
pub(crate) async fn run_coordinator(
  mut inbox: mpsc::Receiver<CoordCmd>,
  self_handle: CoordinatorHandle,
  details: Arc<FittingDetails>,
  downstream: Downstream,
  pipeline: PipeRef,
) {
  let fitting = details.name.clone();
  let mut workers: HashMap<(PartitionId, NodeId), QueueManagerHandle> = HashMap::new();
  let mut monitored: HashSet<NodeId> = HashSet::new();
  let mut eoi_requested = false;
  let mut drained = false;

  while let Some(cmd) = inbox.recv().await {
    match cmd {
      CoordCmd::GetDetails {
        node,
        partition,
        manager,
        reply,
      } => {
        debug!(%pipeline, %fitting, %partition, %node, "registering worker");
        if monitored.insert(node.clone()) {
          monitor_manager(&self_handle, &manager, node.clone());
        }
        if eoi_requested {
          // Late registration during the drain still has to hear EOI.
          send_mark_eoi(&manager, pipeline, fitting.clone());
        }
        workers.insert((partition, node), manager);
        let _ = reply.send(details.clone());
      }
      CoordCmd::WorkerDone { partition, node } => {
        debug!(%pipeline, %fitting, %partition, %node, "worker done");
        workers.remove(&(partition, node));
        if eoi_requested && workers.is_empty() {
          drained = true;
          break;
        }
      }
      CoordCmd::ManagerDown { node } => {
        debug!(%pipeline, %fitting, %node, "queue manager down");
        workers.retain(|(_, worker_node), _| *worker_node != node);
        if eoi_requested && workers.is_empty() {
          drained = true;
          break;
        }
      }
      CoordCmd::Eoi => {
        if eoi_requested {
          continue;
        }
        eoi_requested = true;
        if workers.is_empty() {
          drained = true;
          break;
        }
        let mut notified: HashSet<NodeId> = HashSet::new();
        for ((_, node), manager) in &workers {
          if notified.insert(node.clone()) {
            send_mark_eoi(manager, pipeline, fitting.clone());
          }
        }
      }
    }
  }

  if !drained {
    return;
  }
  debug!(%pipeline, %fitting, "coordinator closed, forwarding end-of-input");
  match downstream {
    Downstream::Coordinator(next) => next.eoi().await,
    Downstream::Sink(sink) => sink.send(SinkRecord::Eoi { pipeline }).await,
  }
}

fn monitor_manager(coordinator: &CoordinatorHandle, manager: &QueueManagerHandle, node: NodeId) {
  let coord_tx = coordinator.sender();
  let manager = manager.clone();
  tokio::spawn(async move {
    manager.closed().await;
    let _ = coord_tx.send(CoordCmd::ManagerDown { node }).await;
  });
}

fn send_mark_eoi(manager: &QueueManagerHandle, pipeline: PipeRef, fitting: String) {
  let manager = manager.clone();
  tokio::spawn(async move {
    manager.mark_eoi(pipeline, fitting).await;
  });
}
