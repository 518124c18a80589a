//! Keyed reduction behavior.
//!
//! Accumulates `(key, value)` inputs under an arg-supplied fold and emits one
//! `(key, accumulator)` pair per key during the post-EOI drain. Implements
//! archive/handoff by surrendering and re-folding its accumulator map, so a
//! reduction survives partition movement.

use crate::behavior::{Behavior, BehaviorError, BehaviorSpec, Payload, Verdict};
use crate::fitting::Partitioner;
use crate::hash::RingHash;
use crate::worker::WorkerContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Fold applied per input: `(key, previous accumulator, value) -> next`.
type FoldFn = Arc<dyn Fn(&str, Option<&Payload>, &Payload) -> Payload + Send + Sync>;

/// A keyed input or output of the `reduce` behavior.
pub struct KeyedInput {
  /// Reduction key.
  pub key: String,
  /// Value (on input) or accumulator (on output).
  pub value: Payload,
}

impl fmt::Debug for KeyedInput {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyedInput").field("key", &self.key).finish()
  }
}

/// Wraps a key and value as a `reduce` input payload.
#[must_use]
pub fn keyed(key: impl Into<String>, value: Payload) -> Payload {
  Arc::new(KeyedInput {
    key: key.into(),
    value,
  })
}

/// Arg for the `reduce` behavior: the fold function.
#[derive(Clone)]
pub struct ReduceArg {
  /// Folds one value into a key's accumulator.
  pub fold: FoldFn,
}

impl fmt::Debug for ReduceArg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReduceArg").finish()
  }
}

/// Wraps a fold closure as a fitting arg.
///
/// The fold should be insensitive to grouping: handoff merges two
/// accumulator maps by folding one into the other.
#[must_use]
pub fn reduce_arg<F>(fold: F) -> Payload
where
  F: Fn(&str, Option<&Payload>, &Payload) -> Payload + Send + Sync + 'static,
{
  Arc::new(ReduceArg {
    fold: Arc::new(fold),
  })
}

/// Partitioner hashing the key of a [`KeyedInput`], so one partition sees
/// every value of a key.
#[must_use]
pub fn key_partitioner() -> Partitioner {
  Partitioner::hash_fn(|input| match input.downcast_ref::<KeyedInput>() {
    Some(keyed) => RingHash::of(keyed.key.as_bytes()),
    None => RingHash::ZERO,
  })
}

/// Factory for the `reduce` behavior.
#[derive(Debug)]
pub struct ReduceSpec;

impl BehaviorSpec for ReduceSpec {
  fn id(&self) -> &str {
    "reduce"
  }

  fn validate_arg(&self, arg: Option<&Payload>) -> Result<(), String> {
    match arg {
      Some(arg) if arg.downcast_ref::<ReduceArg>().is_some() => Ok(()),
      Some(_) => Err("reduce arg must be a ReduceArg".to_string()),
      None => Err("reduce requires an arg".to_string()),
    }
  }

  fn build(&self) -> Box<dyn Behavior> {
    Box::new(Reduce {
      fold: None,
      acc: HashMap::new(),
    })
  }
}

struct Reduce {
  fold: Option<FoldFn>,
  acc: HashMap<String, Payload>,
}

#[async_trait]
impl Behavior for Reduce {
  async fn init(&mut self, ctx: &WorkerContext) -> Result<(), BehaviorError> {
    self.fold = ctx
      .arg()
      .and_then(|arg| arg.downcast_ref::<ReduceArg>())
      .map(|arg| arg.fold.clone());
    match self.fold {
      Some(_) => Ok(()),
      None => Err(BehaviorError::Init("reduce arg missing".to_string())),
    }
  }

  async fn process(&mut self, input: Payload, _last_preflist: bool, _ctx: &WorkerContext) -> Verdict {
    let Some(fold) = &self.fold else {
      return Verdict::Error("reduce not initialized".to_string());
    };
    let Some(keyed) = input.downcast_ref::<KeyedInput>() else {
      return Verdict::Error("reduce expects keyed inputs".to_string());
    };
    let next = fold(&keyed.key, self.acc.get(&keyed.key), &keyed.value);
    self.acc.insert(keyed.key.clone(), next);
    Verdict::Ok
  }

  async fn done(&mut self, ctx: &WorkerContext) -> Result<(), BehaviorError> {
    for (key, value) in self.acc.drain() {
      ctx.emit(Arc::new(KeyedInput { key, value })).await;
    }
    Ok(())
  }

  async fn archive(&mut self) -> Result<Option<Payload>, BehaviorError> {
    if self.acc.is_empty() {
      return Ok(None);
    }
    let acc = std::mem::take(&mut self.acc);
    Ok(Some(Arc::new(acc)))
  }

  async fn handoff(&mut self, blob: Payload, _ctx: &WorkerContext) -> Result<(), BehaviorError> {
    let Some(fold) = &self.fold else {
      return Err(BehaviorError::Handoff("reduce not initialized".to_string()));
    };
    let Some(incoming) = blob.downcast_ref::<HashMap<String, Payload>>() else {
      return Err(BehaviorError::Handoff(
        "blob is not a reduce accumulator".to_string(),
      ));
    };
    for (key, value) in incoming {
      let next = fold(key, self.acc.get(key), value);
      self.acc.insert(key.clone(), next);
    }
    Ok(())
  }
}
