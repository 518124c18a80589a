//! Tests for coordinator registration and end-of-input sequencing.

use crate::behaviors::PassSpec;
use crate::config::NodeConfig;
use crate::coordinator::{coordinator_channel, run_coordinator, Downstream};
use crate::envelope::PipeRef;
use crate::fitting::{FittingDetails, OutputTarget, Partitioner};
use crate::manager::spawn_queue_manager;
use crate::ring::{FixedRing, NodeId, PartitionId};
use crate::router::Router;
use crate::sink::{LogMode, SinkHandle, SinkRecord, TraceFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

fn spawn_test_coordinator(
  downstream: Downstream,
) -> (crate::coordinator::CoordinatorHandle, PipeRef) {
  let pipeline = PipeRef::new();
  let (handle, inbox) = coordinator_channel();
  let (sink, rx) = SinkHandle::channel();
  std::mem::forget(rx);
  let details = Arc::new(FittingDetails {
    pipeline,
    name: "stage".to_string(),
    behavior_id: "pass".to_string(),
    behavior: Arc::new(PassSpec),
    arg: None,
    partitioner: Partitioner::default(),
    nval: 1,
    q_limit: 8,
    coordinator: handle.clone(),
    output: OutputTarget::Sink,
    sink,
    log: LogMode::Drop,
    trace: TraceFilter::Off,
  });
  tokio::spawn(run_coordinator(
    inbox,
    handle.clone(),
    details,
    downstream,
    pipeline,
  ));
  (handle, pipeline)
}

#[tokio::test]
async fn test_eoi_with_no_workers_closes_immediately() {
  let (sink, mut sink_rx) = SinkHandle::channel();
  let (coordinator, pipeline) = spawn_test_coordinator(Downstream::Sink(sink));

  coordinator.eoi().await;

  let record = timeout(Duration::from_secs(1), sink_rx.recv())
    .await
    .expect("eoi record should arrive")
    .expect("sink should stay open");
  match record {
    SinkRecord::Eoi { pipeline: from } => assert_eq!(from, pipeline),
    other => panic!("expected eoi, got {:?}", other),
  }
}

#[tokio::test]
async fn test_eoi_is_idempotent() {
  let (sink, mut sink_rx) = SinkHandle::channel();
  let (coordinator, _pipeline) = spawn_test_coordinator(Downstream::Sink(sink));

  coordinator.eoi().await;
  coordinator.eoi().await;
  coordinator.eoi().await;

  let first = timeout(Duration::from_secs(1), sink_rx.recv()).await;
  assert!(matches!(first, Ok(Some(SinkRecord::Eoi { .. }))));
  // No second EOI record may follow.
  let second = timeout(Duration::from_millis(200), sink_rx.recv()).await;
  assert!(second.is_err());
}

#[tokio::test]
async fn test_eoi_waits_for_registered_worker() {
  let (sink, mut sink_rx) = SinkHandle::channel();
  let (coordinator, _pipeline) = spawn_test_coordinator(Downstream::Sink(sink));

  // Register one worker through a real queue manager handle.
  let ring = Arc::new(FixedRing::local(4));
  let router = Arc::new(Router::new(ring));
  let (_shutdown_tx, shutdown_rx) = watch::channel(false);
  let manager = spawn_queue_manager(
    NodeId::new("local"),
    NodeConfig::default(),
    router,
    shutdown_rx,
  );
  let details = coordinator
    .get_details(NodeId::new("local"), PartitionId(0), manager)
    .await;
  assert!(details.is_some());

  coordinator.eoi().await;
  // The registered worker has not reported done; no EOI yet.
  let early = timeout(Duration::from_millis(200), sink_rx.recv()).await;
  assert!(early.is_err());

  coordinator
    .worker_done(PartitionId(0), NodeId::new("local"))
    .await;
  let record = timeout(Duration::from_secs(1), sink_rx.recv()).await;
  assert!(matches!(record, Ok(Some(SinkRecord::Eoi { .. }))));
}

#[tokio::test]
async fn test_get_details_serves_spec() {
  let (sink, _sink_rx) = SinkHandle::channel();
  let (coordinator, pipeline) = spawn_test_coordinator(Downstream::Sink(sink));

  let ring = Arc::new(FixedRing::local(4));
  let router = Arc::new(Router::new(ring));
  let (_shutdown_tx, shutdown_rx) = watch::channel(false);
  let manager = spawn_queue_manager(
    NodeId::new("local"),
    NodeConfig::default(),
    router,
    shutdown_rx,
  );

  let details = coordinator
    .get_details(NodeId::new("local"), PartitionId(2), manager)
    .await
    .expect("details should be served");
  assert_eq!(details.name, "stage");
  assert_eq!(details.pipeline, pipeline);
  assert_eq!(details.q_limit, 8);
}
