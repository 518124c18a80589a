//! Identity behavior: every input is emitted unchanged.

use crate::behavior::{Behavior, BehaviorError, BehaviorSpec, Payload, Verdict};
use crate::worker::WorkerContext;
use async_trait::async_trait;

/// Factory for the `pass` behavior.
#[derive(Debug)]
pub struct PassSpec;

impl BehaviorSpec for PassSpec {
  fn id(&self) -> &str {
    "pass"
  }

  fn build(&self) -> Box<dyn Behavior> {
    Box::new(Pass)
  }
}

struct Pass;

#[async_trait]
impl Behavior for Pass {
  async fn init(&mut self, _ctx: &WorkerContext) -> Result<(), BehaviorError> {
    Ok(())
  }

  async fn process(&mut self, input: Payload, _last_preflist: bool, ctx: &WorkerContext) -> Verdict {
    ctx.emit(input).await;
    Verdict::Ok
  }

  async fn done(&mut self, _ctx: &WorkerContext) -> Result<(), BehaviorError> {
    Ok(())
  }
}
