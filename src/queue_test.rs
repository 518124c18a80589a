//! Tests for the queue record state machine: the ready-queue bound, blocking
//! senders, EOI transitions, and forwarding drains.

use crate::behavior::Payload;
use crate::behaviors::PassSpec;
use crate::coordinator::{coordinator_channel, CoordinatorHandle};
use crate::envelope::{EnqueueOutcome, InputEnvelope, PipeRef, RejectReason};
use crate::fitting::{FittingDetails, OutputTarget, Partitioner};
use crate::queue::{DequeueReply, EnqueueEffect, QueueRecord};
use crate::ring::{NodeId, PartitionId, PreflistEntry};
use crate::sink::{LogMode, SinkHandle, TraceFilter};
use proptest::prelude::*;
use std::sync::Arc;
use tokio::sync::oneshot;

fn test_coordinator() -> CoordinatorHandle {
  let (handle, rx) = coordinator_channel();
  // Keep the inbox alive so the handle does not read as closed.
  std::mem::forget(rx);
  handle
}

fn test_details(coordinator: &CoordinatorHandle, q_limit: usize) -> Arc<FittingDetails> {
  let (sink, rx) = SinkHandle::channel();
  std::mem::forget(rx);
  Arc::new(FittingDetails {
    pipeline: PipeRef::new(),
    name: "stage".to_string(),
    behavior_id: "pass".to_string(),
    behavior: Arc::new(PassSpec),
    arg: None,
    partitioner: Partitioner::default(),
    nval: 1,
    q_limit,
    coordinator: coordinator.clone(),
    output: OutputTarget::Sink,
    sink,
    log: LogMode::Drop,
    trace: TraceFilter::Off,
  })
}

fn test_envelope(coordinator: &CoordinatorHandle, value: i64) -> InputEnvelope {
  InputEnvelope {
    pipeline: PipeRef::new(),
    coordinator: coordinator.clone(),
    fitting: "stage".to_string(),
    source_partition: None,
    value: Arc::new(value) as Payload,
    preflist: vec![PreflistEntry {
      partition: PartitionId(0),
      node: NodeId::new("local"),
    }],
  }
}

#[test]
fn test_enqueue_accepts_until_capacity() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 2));

  let mut replies = Vec::new();
  for value in 0..3 {
    let (tx, rx) = oneshot::channel();
    assert!(matches!(
      record.enqueue(test_envelope(&coordinator, value), tx),
      EnqueueEffect::None
    ));
    replies.push(rx);
  }

  assert!(matches!(replies[0].try_recv(), Ok(EnqueueOutcome::Accepted)));
  assert!(matches!(replies[1].try_recv(), Ok(EnqueueOutcome::Accepted)));
  // The third sender stays parked behind the full queue.
  assert!(replies[2].try_recv().is_err());
  assert_eq!(record.queue_length(), 2);
  assert_eq!(record.blocking_length(), 1);
}

#[test]
fn test_dequeue_advances_blocking_sender() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 1));

  let (tx1, _rx1) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 1), tx1);
  let (tx2, mut rx2) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 2), tx2);
  assert!(rx2.try_recv().is_err());

  let (worker_tx, mut worker_rx) = oneshot::channel();
  record.dequeue(worker_tx);
  assert!(matches!(worker_rx.try_recv(), Ok(DequeueReply::Item(_))));
  // Popping the head let the parked sender into the ready queue.
  assert!(matches!(rx2.try_recv(), Ok(EnqueueOutcome::Accepted)));
  assert_eq!(record.queue_length(), 1);
  assert_eq!(record.blocking_length(), 0);
}

#[test]
fn test_enqueues_park_until_details_arrive() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);

  let (tx1, mut rx1) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 1), tx1);
  let (tx2, mut rx2) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 2), tx2);

  // Nothing is accepted before the coordinator has served details: an
  // accepted input in an unregistered queue could outlive its stage.
  assert!(rx1.try_recv().is_err());
  assert!(rx2.try_recv().is_err());

  record.apply_details(test_details(&coordinator, 8));
  assert!(matches!(rx1.try_recv(), Ok(EnqueueOutcome::Accepted)));
  assert!(matches!(rx2.try_recv(), Ok(EnqueueOutcome::Accepted)));
  assert_eq!(record.queue_length(), 2);
}

#[test]
fn test_node_ceiling_caps_q_limit() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 2);
  record.apply_details(test_details(&coordinator, 1000));
  assert_eq!(record.capacity(), 2);
}

#[test]
fn test_enqueue_after_eoi_is_rejected() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 4));
  record.mark_eoi();

  let (tx, mut rx) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 1), tx);
  assert!(matches!(rx.try_recv(), Ok(EnqueueOutcome::Rejected(RejectReason::EoiClosed))));
}

#[test]
fn test_eoi_releases_parked_worker() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 4));

  let (worker_tx, mut worker_rx) = oneshot::channel();
  record.dequeue(worker_tx);
  assert!(worker_rx.try_recv().is_err());

  record.mark_eoi();
  assert!(matches!(worker_rx.try_recv(), Ok(DequeueReply::Drained)));
}

#[test]
fn test_dequeue_reports_drained_after_eoi() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 4));
  record.mark_eoi();

  let (worker_tx, mut worker_rx) = oneshot::channel();
  record.dequeue(worker_tx);
  assert!(matches!(worker_rx.try_recv(), Ok(DequeueReply::Drained)));
}

#[test]
fn test_forwarding_drain_unblocks_senders_with_accept() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 1));

  let (tx1, _rx1) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 1), tx1);
  let (tx2, mut rx2) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 2), tx2);

  let drained = record.drain_for_forwarding();
  assert_eq!(drained.len(), 2);
  assert!(matches!(rx2.try_recv(), Ok(EnqueueOutcome::Accepted)));
  assert!(record.is_empty());

  // Forwarding mode accepts and hands the input straight back.
  let (tx3, mut rx3) = oneshot::channel();
  let effect = record.enqueue(test_envelope(&coordinator, 3), tx3);
  assert!(matches!(effect, EnqueueEffect::Forward(_)));
  assert!(matches!(rx3.try_recv(), Ok(EnqueueOutcome::Accepted)));
}

#[test]
fn test_reject_all_rejects_blocking_senders() {
  let coordinator = test_coordinator();
  let mut record = QueueRecord::new(coordinator.clone(), 4096);
  record.apply_details(test_details(&coordinator, 1));

  let (tx1, _rx1) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 1), tx1);
  let (tx2, mut rx2) = oneshot::channel();
  record.enqueue(test_envelope(&coordinator, 2), tx2);

  record.reject_all(RejectReason::UnknownFitting);
  assert!(matches!(rx2.try_recv(), Ok(EnqueueOutcome::Rejected(RejectReason::UnknownFitting))));
  assert!(record.is_empty());
}

// ============================================================================
// Property: the ready queue never exceeds the effective limit
// ============================================================================

#[derive(Clone, Debug)]
enum Op {
  Enqueue,
  Dequeue,
}

fn op_strategy() -> impl Strategy<Value = Op> {
  prop_oneof![Just(Op::Enqueue), Just(Op::Dequeue)]
}

proptest! {
  #[test]
  fn test_ready_queue_bounded(
    q_limit in 1..16usize,
    ops in prop::collection::vec(op_strategy(), 0..64),
  ) {
    let coordinator = test_coordinator();
    let mut record = QueueRecord::new(coordinator.clone(), 4096);
    record.apply_details(test_details(&coordinator, q_limit));

    for op in ops {
      match op {
        Op::Enqueue => {
          let (tx, rx) = oneshot::channel();
          record.enqueue(test_envelope(&coordinator, 0), tx);
          // Keep parked replies alive for the record's lifetime.
          std::mem::forget(rx);
        }
        Op::Dequeue => {
          let (tx, rx) = oneshot::channel();
          record.dequeue(tx);
          std::mem::forget(rx);
        }
      }
      prop_assert!(record.queue_length() <= q_limit);
    }
  }
}
