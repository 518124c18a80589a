//! Input routing: hashing, preflist resolution, and forwarding.
//!
//! The router owns the ring client and the node registry. Client inputs and
//! worker outputs both resolve to an envelope addressed at the head of a
//! preflist; forwards walk the remaining preflist entries until one accepts
//! the input or the list is exhausted.

use crate::behavior::Payload;
use crate::envelope::{EnqueueOutcome, InputEnvelope};
use crate::error::QueueWorkError;
use crate::fitting::{FittingDetails, Partitioner};
use crate::manager::QueueManagerHandle;
use crate::metrics;
use crate::ring::{NodeId, PartitionId, PreflistEntry, Ring};
use crate::sink::{emit_log, LogKind, LogRecord};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Routes envelopes to queue managers over the ring.
pub struct Router {
  ring: Arc<dyn Ring>,
  nodes: RwLock<HashMap<NodeId, QueueManagerHandle>>,
}

impl Router {
  pub(crate) fn new(ring: Arc<dyn Ring>) -> Self {
    Self {
      ring,
      nodes: RwLock::new(HashMap::new()),
    }
  }

  /// The ring this router resolves against.
  #[must_use]
  pub fn ring(&self) -> &Arc<dyn Ring> {
    &self.ring
  }

  pub(crate) fn register_node(&self, handle: QueueManagerHandle) {
    if let Ok(mut nodes) = self.nodes.write() {
      nodes.insert(handle.node().clone(), handle);
    }
  }

  pub(crate) fn manager_for(&self, node: &NodeId) -> Option<QueueManagerHandle> {
    self.nodes.read().ok().and_then(|nodes| nodes.get(node).cloned())
  }

  pub(crate) fn managers(&self) -> Vec<QueueManagerHandle> {
    self
      .nodes
      .read()
      .map(|nodes| nodes.values().cloned().collect())
      .unwrap_or_default()
  }

  /// Routes one input into a fitting: hashes it, resolves the preflist, and
  /// blocks on the head partition's enqueue.
  pub(crate) async fn queue_work(
    &self,
    details: &Arc<FittingDetails>,
    value: Payload,
    source_partition: Option<PartitionId>,
  ) -> Result<(), QueueWorkError> {
    let preflist = match &details.partitioner {
      Partitioner::Hash(hasher) => self.ring.preflist(&hasher(&value), details.nval),
      Partitioner::Follow => {
        return Err(QueueWorkError::FollowRouting(
          "follow input routed without a producing worker".to_string(),
        ));
      }
    };
    if preflist.is_empty() {
      self
        .log_exhausted(details, LogKind::PreflistExhausted, None, &value)
        .await;
      return Err(QueueWorkError::PreflistExhausted);
    }
    let envelope = InputEnvelope {
      pipeline: details.pipeline,
      coordinator: details.coordinator.clone(),
      fitting: details.name.clone(),
      source_partition,
      value,
      preflist,
    };
    self.enqueue_head(details, envelope).await
  }

  /// Routes one worker output to the downstream fitting. `follow` outputs
  /// stay on the producing partition and node; everything else hashes.
  pub(crate) async fn send_output(
    &self,
    from_partition: PartitionId,
    from_node: NodeId,
    next: &Arc<FittingDetails>,
    value: Payload,
  ) -> Result<(), QueueWorkError> {
    if !next.partitioner.is_follow() {
      return self.queue_work(next, value, Some(from_partition)).await;
    }
    let envelope = InputEnvelope {
      pipeline: next.pipeline,
      coordinator: next.coordinator.clone(),
      fitting: next.name.clone(),
      source_partition: Some(from_partition),
      value,
      preflist: vec![PreflistEntry {
        partition: from_partition,
        node: from_node,
      }],
    };
    self.enqueue_head(next, envelope).await
  }

  /// Advances an envelope down its preflist after the head partition gave it
  /// up. Tries each remaining entry in order; an exhausted list drops the
  /// input with a log record.
  pub(crate) async fn forward(
    &self,
    mut envelope: InputEnvelope,
    details: Option<Arc<FittingDetails>>,
  ) {
    metrics::record_forward(&envelope.fitting);
    loop {
      // Drop the partition that refused or lost the input.
      envelope.preflist.remove(0);
      let Some(head) = envelope.head().cloned() else {
        warn!(
          pipeline = %envelope.pipeline,
          fitting = %envelope.fitting,
          "preflist exhausted, dropping input"
        );
        if let Some(details) = &details {
          self
            .log_exhausted(
              details,
              LogKind::ForwardPreflistExhausted,
              envelope.source_partition,
              &envelope.value,
            )
            .await;
        }
        return;
      };
      let Some(manager) = self.manager_for(&head.node) else {
        continue;
      };
      match manager.enqueue(envelope.clone()).await {
        EnqueueOutcome::Accepted => return,
        EnqueueOutcome::Rejected(reason) => {
          if let Some(details) = &details {
            let record = LogRecord {
              pipeline: details.pipeline,
              from: details.name.clone(),
              kind: LogKind::ForwardPreflist,
              behavior: details.behavior_id.clone(),
              partition: Some(head.partition),
              reason: format!("forward rejected: {}", reason),
              input: None,
            };
            emit_log(details.log, &details.sink, record).await;
          }
          continue;
        }
      }
    }
  }

  async fn enqueue_head(
    &self,
    details: &Arc<FittingDetails>,
    envelope: InputEnvelope,
  ) -> Result<(), QueueWorkError> {
    let head = envelope
      .head()
      .cloned()
      .ok_or(QueueWorkError::PreflistExhausted)?;
    let manager = self
      .manager_for(&head.node)
      .ok_or_else(|| QueueWorkError::UnknownNode(head.node.to_string()))?;
    match manager.enqueue(envelope).await {
      EnqueueOutcome::Accepted => {
        metrics::record_input(&details.name);
        Ok(())
      }
      EnqueueOutcome::Rejected(reason) => Err(QueueWorkError::Rejected(reason)),
    }
  }

  async fn log_exhausted(
    &self,
    details: &Arc<FittingDetails>,
    kind: LogKind,
    partition: Option<PartitionId>,
    value: &Payload,
  ) {
    let record = LogRecord {
      pipeline: details.pipeline,
      from: details.name.clone(),
      kind,
      behavior: details.behavior_id.clone(),
      partition,
      reason: "no partitions remain for input".to_string(),
      input: Some(value.clone()),
    };
    emit_log(details.log, &details.sink, record).await;
  }
}

impl std::fmt::Debug for Router {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let nodes = self
      .nodes
      .read()
      .map(|nodes| nodes.len())
      .unwrap_or_default();
    f.debug_struct("Router").field("nodes", &nodes).finish()
  }
}
