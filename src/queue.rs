//! Per-(fitting, partition) queue records.
//!
//! A queue record owns the bounded ready queue, the blocking senders parked
//! behind it, and the parked worker dequeue, and serializes every transition
//! between them. All access goes through the owning queue manager's inbox;
//! the record itself is plain state.

use crate::behavior::Payload;
use crate::coordinator::CoordinatorHandle;
use crate::envelope::{EnqueueOutcome, InputEnvelope, RejectReason};
use crate::fitting::FittingDetails;
use crate::worker::WorkerEntry;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reply to a worker's dequeue request.
#[derive(Debug)]
pub(crate) enum DequeueReply {
  /// The next input, in enqueue order.
  Item(InputEnvelope),
  /// End-of-input received and the queue is empty; run `done` and exit.
  Drained,
  /// Archive worker state for handoff and exit.
  Archive,
}

/// What the manager must do after an enqueue was applied.
#[derive(Debug)]
pub(crate) enum EnqueueEffect {
  /// Nothing further; the sender was replied to or parked.
  None,
  /// The queue is in forwarding mode; re-route this input down its preflist.
  Forward(InputEnvelope),
}

pub(crate) struct QueueRecord {
  /// Address of the fitting's coordinator, from the first input envelope.
  pub coordinator: CoordinatorHandle,
  /// Fitting details, populated on the coordinator's reply.
  pub details: Option<Arc<FittingDetails>>,
  /// The live worker, if one has been spawned.
  pub worker: Option<WorkerEntry>,
  /// Set once the coordinator announced end-of-input.
  pub eoi_received: bool,
  /// Set when worker restart gave up; every input is forwarded instead.
  pub forwarding: bool,
  /// Worker restarts consumed so far.
  pub restarts: u32,
  /// Archived state awaiting the next spawned worker (handoff-in).
  pub handoff_blob: Option<Payload>,
  /// Pending archive request (handoff-out): reply for the caller.
  pub archive_reply: Option<oneshot::Sender<Option<Payload>>>,
  node_ceiling: usize,
  ready: VecDeque<InputEnvelope>,
  blocking: VecDeque<(oneshot::Sender<EnqueueOutcome>, InputEnvelope)>,
  waiting_worker: Option<oneshot::Sender<DequeueReply>>,
}

impl QueueRecord {
  pub(crate) fn new(coordinator: CoordinatorHandle, node_ceiling: usize) -> Self {
    Self {
      coordinator,
      details: None,
      worker: None,
      eoi_received: false,
      forwarding: false,
      restarts: 0,
      handoff_blob: None,
      archive_reply: None,
      node_ceiling,
      ready: VecDeque::new(),
      blocking: VecDeque::new(),
      waiting_worker: None,
    }
  }

  /// Effective ready-queue capacity: `min(q_limit, node ceiling)`.
  ///
  /// Zero while the fitting details are unknown: acceptance implies the
  /// input is in `ready`, and the coordinator must have registered this
  /// queue (via the details lookup) before anything is accepted, or inputs
  /// could drain past a closing stage unseen.
  pub(crate) fn capacity(&self) -> usize {
    match &self.details {
      Some(details) => details.q_limit.min(self.node_ceiling),
      None => 0,
    }
  }

  pub(crate) fn queue_length(&self) -> usize {
    self.ready.len()
  }

  pub(crate) fn blocking_length(&self) -> usize {
    self.blocking.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.ready.is_empty() && self.blocking.is_empty()
  }

  /// Stores the fitting details and widens the ready queue to the effective
  /// capacity, unblocking parked senders that now fit.
  pub(crate) fn apply_details(&mut self, details: Arc<FittingDetails>) {
    self.details = Some(details);
    while self.ready.len() < self.capacity() {
      if !self.promote_one() {
        break;
      }
    }
    self.dispatch();
  }

  /// Applies one enqueue. Replies `Accepted` once the input sits in `ready`,
  /// parks the sender while the queue is full, or rejects.
  pub(crate) fn enqueue(
    &mut self,
    envelope: InputEnvelope,
    reply: oneshot::Sender<EnqueueOutcome>,
  ) -> EnqueueEffect {
    if self.eoi_received {
      let _ = reply.send(EnqueueOutcome::Rejected(RejectReason::EoiClosed));
      return EnqueueEffect::None;
    }
    if self.forwarding {
      let _ = reply.send(EnqueueOutcome::Accepted);
      return EnqueueEffect::Forward(envelope);
    }
    if self.ready.len() < self.capacity() {
      self.ready.push_back(envelope);
      let _ = reply.send(EnqueueOutcome::Accepted);
      self.dispatch();
    } else {
      self.blocking.push_back((reply, envelope));
    }
    EnqueueEffect::None
  }

  /// Applies one worker dequeue: pops the head of `ready` (advancing one
  /// blocking sender), reports the drain after EOI, or parks the worker.
  pub(crate) fn dequeue(&mut self, reply: oneshot::Sender<DequeueReply>) {
    if self.archive_reply.is_some() {
      let _ = reply.send(DequeueReply::Archive);
      return;
    }
    if let Some(envelope) = self.ready.pop_front() {
      let _ = reply.send(DequeueReply::Item(envelope));
      self.promote_one();
    } else if self.eoi_received && self.blocking.is_empty() {
      let _ = reply.send(DequeueReply::Drained);
    } else {
      self.waiting_worker = Some(reply);
    }
  }

  /// Marks end-of-input. New enqueues are rejected from here on; a worker
  /// parked on an empty queue is released into its drain.
  pub(crate) fn mark_eoi(&mut self) {
    self.eoi_received = true;
    if self.is_empty() {
      if let Some(waiting) = self.waiting_worker.take() {
        let _ = waiting.send(DequeueReply::Drained);
      }
    }
  }

  /// Flips the queue into forwarding mode, returning every held input.
  /// Blocking senders are unblocked with `Accepted`; their inputs travel on
  /// down their preflists.
  pub(crate) fn drain_for_forwarding(&mut self) -> Vec<InputEnvelope> {
    self.forwarding = true;
    let mut drained: Vec<InputEnvelope> = self.ready.drain(..).collect();
    for (sender, envelope) in self.blocking.drain(..) {
      let _ = sender.send(EnqueueOutcome::Accepted);
      drained.push(envelope);
    }
    drained
  }

  /// Rejects everything held by the queue; used when details cannot be
  /// fetched or the pipeline is torn down. Ready inputs are dropped.
  pub(crate) fn reject_all(&mut self, reason: RejectReason) {
    self.ready.clear();
    for (sender, _) in self.blocking.drain(..) {
      let _ = sender.send(EnqueueOutcome::Rejected(reason));
    }
    if let Some(waiting) = self.waiting_worker.take() {
      let _ = waiting.send(DequeueReply::Drained);
    }
  }

  /// Requests an archive from the worker. The worker picks the request up
  /// at its next dequeue, so it serializes behind the current `process`.
  pub(crate) fn request_archive(&mut self, reply: oneshot::Sender<Option<Payload>>) {
    self.archive_reply = Some(reply);
    if let Some(waiting) = self.waiting_worker.take() {
      let _ = waiting.send(DequeueReply::Archive);
      // The parked dequeue consumed the request.
    }
  }

  fn promote_one(&mut self) -> bool {
    match self.blocking.pop_front() {
      Some((sender, envelope)) => {
        self.ready.push_back(envelope);
        let _ = sender.send(EnqueueOutcome::Accepted);
        true
      }
      None => false,
    }
  }

  fn dispatch(&mut self) {
    if self.waiting_worker.is_some() && !self.ready.is_empty() {
      if let Some(waiting) = self.waiting_worker.take() {
        if let Some(envelope) = self.ready.pop_front() {
          let _ = waiting.send(DequeueReply::Item(envelope));
          self.promote_one();
        }
      }
    }
  }
}
