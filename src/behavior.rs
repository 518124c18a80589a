//! Stage behavior contract and registry.
//!
//! A behavior is the user-supplied callback set executed by workers for a
//! fitting. Behaviors are registered under an identifier and resolved once at
//! pipeline creation, so run-time dispatch is a plain indirect call through
//! the boxed trait object.

use crate::worker::WorkerContext;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Opaque message payload flowing through a pipeline.
///
/// Inputs, outputs, fitting args, and archive blobs are all dynamically typed;
/// behaviors downcast to the concrete types they work with.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Outcome of one `process` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
  /// Input consumed; any outputs were emitted through the worker context.
  Ok,
  /// Input should be retried on the next partition of its preflist.
  ForwardPreflist,
  /// Input failed; surfaced as a log record, the worker continues.
  Error(String),
}

/// Error from a behavior lifecycle callback.
///
/// `init` and `handoff` failures are fatal to the worker; `done` failures are
/// logged and the drain still completes.
#[derive(Debug, Error)]
pub enum BehaviorError {
  /// `init` could not build worker state.
  #[error("init failed: {0}")]
  Init(String),
  /// `done` failed during the post-EOI drain.
  #[error("done failed: {0}")]
  Done(String),
  /// `archive` could not capture worker state.
  #[error("archive failed: {0}")]
  Archive(String),
  /// `handoff` could not absorb an archived blob.
  #[error("handoff failed: {0}")]
  Handoff(String),
}

/// Callback set executed by one worker for one (fitting, partition).
///
/// Calls are strictly sequential per worker: `init`, then any number of
/// `process` calls (with `handoff` possibly interleaved before the first),
/// then `done` once the queue has drained after end-of-input.
#[async_trait]
pub trait Behavior: Send {
  /// Builds worker state. Failure is fatal to the worker and surfaces as a
  /// pipeline log record.
  async fn init(&mut self, ctx: &WorkerContext) -> Result<(), BehaviorError>;

  /// Processes one input.
  ///
  /// `last_preflist` is true when the input has no fallback partitions left;
  /// a behavior that would forward can use it to degrade instead of losing
  /// the input.
  async fn process(&mut self, input: Payload, last_preflist: bool, ctx: &WorkerContext) -> Verdict;

  /// Runs after the queue drained post-EOI. Final emissions happen here.
  async fn done(&mut self, ctx: &WorkerContext) -> Result<(), BehaviorError>;

  /// Captures worker state for handoff to another node. `None` means the
  /// behavior carries no state worth moving.
  async fn archive(&mut self) -> Result<Option<Payload>, BehaviorError> {
    Ok(None)
  }

  /// Absorbs an archived blob on the destination worker, after `init` and
  /// before the first `process`.
  async fn handoff(&mut self, _blob: Payload, _ctx: &WorkerContext) -> Result<(), BehaviorError> {
    Ok(())
  }
}

/// Factory side of a behavior: validates the fitting arg at pipeline creation
/// and builds one [`Behavior`] instance per worker.
pub trait BehaviorSpec: Send + Sync {
  /// Registry identifier, attached to status rows and trace topics.
  fn id(&self) -> &str;

  /// Validates the fitting's static arg. Failures reject `exec` synchronously.
  fn validate_arg(&self, _arg: Option<&Payload>) -> Result<(), String> {
    Ok(())
  }

  /// Builds a fresh behavior instance for one worker.
  fn build(&self) -> Box<dyn Behavior>;
}

/// Registry resolving behavior identifiers to their factories.
pub struct BehaviorRegistry {
  entries: HashMap<String, Arc<dyn BehaviorSpec>>,
}

impl BehaviorRegistry {
  /// Creates an empty registry.
  #[must_use]
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }

  /// Creates a registry pre-loaded with the built-in behaviors
  /// (`pass`, `xform`, `reduce`).
  #[must_use]
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register(Arc::new(crate::behaviors::PassSpec));
    registry.register(Arc::new(crate::behaviors::XformSpec));
    registry.register(Arc::new(crate::behaviors::ReduceSpec));
    registry
  }

  /// Registers a behavior factory under its id, replacing any previous entry.
  pub fn register(&mut self, spec: Arc<dyn BehaviorSpec>) {
    self.entries.insert(spec.id().to_string(), spec);
  }

  /// Resolves a behavior id.
  #[must_use]
  pub fn resolve(&self, id: &str) -> Option<Arc<dyn BehaviorSpec>> {
    self.entries.get(id).cloned()
  }

  /// Returns the registered behavior ids.
  #[must_use]
  pub fn ids(&self) -> Vec<&str> {
    self.entries.keys().map(String::as_str).collect()
  }
}

impl Default for BehaviorRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for BehaviorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BehaviorRegistry")
      .field("ids", &self.ids())
      .finish()
  }
}
