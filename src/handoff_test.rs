//! Tests for archive/handoff: moving a stateful worker between nodes.

use crate::behavior::{BehaviorRegistry, Payload};
use crate::behaviors::{keyed, reduce_arg, KeyedInput};
use crate::config::{ExecOptions, NodeConfig};
use crate::fitting::{FittingSpec, Partitioner};
use crate::hash::RingHash;
use crate::ring::{FixedRing, NodeId, PartitionId};
use crate::runtime::PipeRuntime;
use std::sync::Arc;
use std::time::Duration;

fn as_int(payload: &Payload) -> i64 {
  payload.downcast_ref::<i64>().copied().unwrap_or(i64::MIN)
}

fn sum_arg() -> Payload {
  reduce_arg(|_key, prev, value| {
    let prev = prev.map(as_int).unwrap_or(0);
    Arc::new(prev + as_int(value)) as Payload
  })
}

fn two_node_runtime() -> PipeRuntime {
  let nodes = vec![NodeId::new("n0"), NodeId::new("n1")];
  PipeRuntime::new(
    Arc::new(FixedRing::new(4, nodes)),
    BehaviorRegistry::with_builtins(),
    NodeConfig::default(),
  )
}

#[tokio::test]
async fn test_reduce_state_survives_handoff() {
  let runtime = two_node_runtime();
  // Constant partitioner: everything lands on partition 0, owned by n0.
  let mut pipeline = runtime
    .exec(
      vec![FittingSpec::new("sum", "reduce")
        .with_partitioner(Partitioner::constant(RingHash::ZERO))
        .with_arg(sum_arg())],
      ExecOptions::default(),
    )
    .expect("pipeline should build");

  for (key, value) in [("a", 1i64), ("b", 2)] {
    pipeline
      .queue_work(keyed(key, Arc::new(value) as Payload))
      .await
      .expect("input should be accepted");
  }
  // Let the worker drain its queue before the archive request.
  tokio::time::sleep(Duration::from_millis(100)).await;

  let blob = runtime
    .archive_worker(&pipeline, "sum", PartitionId(0), &NodeId::new("n0"))
    .await
    .expect("archive should capture the accumulator");
  runtime
    .handoff_deliver(&pipeline, "sum", PartitionId(0), &NodeId::new("n1"), blob)
    .await;
  tokio::time::sleep(Duration::from_millis(100)).await;

  pipeline.eoi().await;
  let (values, logs) = pipeline.collect_results().await;
  let mut sums: Vec<(String, i64)> = values
    .iter()
    .map(|(value, _)| {
      let pair = value.downcast_ref::<KeyedInput>().expect("keyed output");
      (pair.key.clone(), as_int(&pair.value))
    })
    .collect();
  sums.sort();
  assert_eq!(sums, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
  assert!(logs.is_empty());
}

#[tokio::test]
async fn test_archive_without_worker_returns_none() {
  let runtime = two_node_runtime();
  let pipeline = runtime
    .exec(
      vec![FittingSpec::new("sum", "reduce")
        .with_partitioner(Partitioner::constant(RingHash::ZERO))
        .with_arg(sum_arg())],
      ExecOptions::default(),
    )
    .expect("pipeline should build");

  // No input was ever routed, so there is no worker to archive.
  let blob = runtime
    .archive_worker(&pipeline, "sum", PartitionId(0), &NodeId::new("n0"))
    .await;
  assert!(blob.is_none());
}
