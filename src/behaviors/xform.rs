//! Map/flat-map behavior: applies an arg-supplied function to each input and
//! emits every produced output.

use crate::behavior::{Behavior, BehaviorError, BehaviorSpec, Payload, Verdict};
use crate::worker::WorkerContext;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Transformation applied by the `xform` behavior.
type ApplyFn = Arc<dyn Fn(Payload) -> Vec<Payload> + Send + Sync>;

/// Arg for the `xform` behavior: the function to apply per input.
#[derive(Clone)]
pub struct XformArg {
  /// Maps one input to zero or more outputs.
  pub apply: ApplyFn,
}

impl fmt::Debug for XformArg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("XformArg").finish()
  }
}

/// Wraps a transformation closure as a fitting arg.
#[must_use]
pub fn xform_arg<F>(apply: F) -> Payload
where
  F: Fn(Payload) -> Vec<Payload> + Send + Sync + 'static,
{
  Arc::new(XformArg {
    apply: Arc::new(apply),
  })
}

/// Factory for the `xform` behavior.
#[derive(Debug)]
pub struct XformSpec;

impl BehaviorSpec for XformSpec {
  fn id(&self) -> &str {
    "xform"
  }

  fn validate_arg(&self, arg: Option<&Payload>) -> Result<(), String> {
    match arg {
      Some(arg) if arg.downcast_ref::<XformArg>().is_some() => Ok(()),
      Some(_) => Err("xform arg must be an XformArg".to_string()),
      None => Err("xform requires an arg".to_string()),
    }
  }

  fn build(&self) -> Box<dyn Behavior> {
    Box::new(Xform { apply: None })
  }
}

struct Xform {
  apply: Option<ApplyFn>,
}

#[async_trait]
impl Behavior for Xform {
  async fn init(&mut self, ctx: &WorkerContext) -> Result<(), BehaviorError> {
    self.apply = ctx
      .arg()
      .and_then(|arg| arg.downcast_ref::<XformArg>())
      .map(|arg| arg.apply.clone());
    match self.apply {
      Some(_) => Ok(()),
      None => Err(BehaviorError::Init("xform arg missing".to_string())),
    }
  }

  async fn process(&mut self, input: Payload, _last_preflist: bool, ctx: &WorkerContext) -> Verdict {
    let Some(apply) = &self.apply else {
      return Verdict::Error("xform not initialized".to_string());
    };
    for output in apply(input) {
      ctx.emit(output).await;
    }
    Verdict::Ok
  }

  async fn done(&mut self, _ctx: &WorkerContext) -> Result<(), BehaviorError> {
    Ok(())
  }
}
