//! The per-process engine: ring, queue managers, and the `exec` entry point.

use crate::behavior::{BehaviorRegistry, BehaviorSpec, Payload};
use crate::builder;
use crate::config::{ExecOptions, NodeConfig};
use crate::envelope::QueueKey;
use crate::error::BuildError;
use crate::fitting::FittingSpec;
use crate::manager::{spawn_queue_manager, QueueManagerHandle};
use crate::pipeline::Pipeline;
use crate::ring::{FixedRing, NodeId, PartitionId, Ring};
use crate::router::Router;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Partition count of the default local ring.
pub const DEFAULT_LOCAL_PARTITIONS: u64 = 8;

/// A running pipeline engine: one queue manager per ring node, a router over
/// them, and a behavior registry. Pipelines are created against a runtime
/// with [`exec`](PipeRuntime::exec) and share its managers.
pub struct PipeRuntime {
  router: Arc<Router>,
  registry: BehaviorRegistry,
  config: NodeConfig,
  managers: Vec<QueueManagerHandle>,
  shutdown: watch::Sender<bool>,
}

impl PipeRuntime {
  /// Builds a runtime over the given ring, spawning one queue manager per
  /// ring node.
  #[must_use]
  pub fn new(ring: Arc<dyn Ring>, registry: BehaviorRegistry, config: NodeConfig) -> Self {
    let router = Arc::new(Router::new(ring.clone()));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut managers = Vec::new();
    for node in ring.nodes() {
      let handle = spawn_queue_manager(node, config, router.clone(), shutdown_rx.clone());
      router.register_node(handle.clone());
      managers.push(handle);
    }
    Self {
      router,
      registry,
      config,
      managers,
      shutdown,
    }
  }

  /// Single-node runtime with the built-in behaviors and default limits.
  #[must_use]
  pub fn local() -> Self {
    Self::new(
      Arc::new(FixedRing::local(DEFAULT_LOCAL_PARTITIONS)),
      BehaviorRegistry::with_builtins(),
      NodeConfig::default(),
    )
  }

  /// Registers an additional behavior.
  pub fn register_behavior(&mut self, spec: Arc<dyn BehaviorSpec>) {
    self.registry.register(spec);
  }

  /// The ring this runtime routes over.
  #[must_use]
  pub fn ring(&self) -> &Arc<dyn Ring> {
    self.router.ring()
  }

  /// The node-wide limits managers were built with.
  #[must_use]
  pub fn config(&self) -> NodeConfig {
    self.config
  }

  /// Creates a pipeline from an ordered list of fitting specs.
  ///
  /// # Errors
  ///
  /// Returns a [`BuildError`] when validation fails; behavior `validate_arg`
  /// rejections surface here, before any coordinator is spawned.
  pub fn exec(
    &self,
    fittings: Vec<FittingSpec>,
    options: ExecOptions,
  ) -> Result<Pipeline, BuildError> {
    builder::build(
      &self.registry,
      &self.router,
      self.managers.clone(),
      fittings,
      options,
    )
  }

  /// Archives the worker for one (fitting, partition) ahead of a handoff.
  /// The worker runs `archive` and terminates; the blob comes back to the
  /// caller, and `None` means there was no worker or no state to move.
  pub async fn archive_worker(
    &self,
    pipeline: &Pipeline,
    fitting: &str,
    partition: PartitionId,
    node: &NodeId,
  ) -> Option<Payload> {
    let manager = self.router.manager_for(node)?;
    let key = QueueKey {
      pipeline: pipeline.pipe_ref(),
      fitting: fitting.to_string(),
      partition,
    };
    manager.archive_worker(key).await
  }

  /// Seeds a (fitting, partition) queue on the destination node with an
  /// archived blob. The next worker spawned there runs `handoff` with the
  /// blob before its first `process`.
  pub async fn handoff_deliver(
    &self,
    pipeline: &Pipeline,
    fitting: &str,
    partition: PartitionId,
    node: &NodeId,
    blob: Payload,
  ) {
    let Some(manager) = self.router.manager_for(node) else {
      return;
    };
    let Some(details) = pipeline.stage_details(fitting) else {
      return;
    };
    let key = QueueKey {
      pipeline: pipeline.pipe_ref(),
      fitting: fitting.to_string(),
      partition,
    };
    manager
      .handoff_deliver(key, details.coordinator.clone(), blob)
      .await;
  }
}

impl Drop for PipeRuntime {
  fn drop(&mut self) {
    let _ = self.shutdown.send(true);
  }
}

impl fmt::Debug for PipeRuntime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipeRuntime")
      .field("nodes", &self.managers.len())
      .field("config", &self.config)
      .finish()
  }
}
