//! Pipeline construction.
//!
//! Validates the fitting specs, resolves behaviors, allocates the pipeline
//! reference, and spawns coordinators tail-first so that each one is born
//! knowing its downstream address. All coordinators are linked to one
//! supervisor so a coordinator crash tears the whole pipeline down.

use crate::behavior::{BehaviorRegistry, BehaviorSpec};
use crate::config::ExecOptions;
use crate::coordinator::{coordinator_channel, run_coordinator, Downstream};
use crate::envelope::PipeRef;
use crate::error::BuildError;
use crate::fitting::{FittingDetails, FittingSpec, OutputTarget};
use crate::manager::QueueManagerHandle;
use crate::pipeline::Pipeline;
use crate::router::Router;
use crate::sink::SinkHandle;
use crate::supervision::supervise_pipeline;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) fn build(
  registry: &BehaviorRegistry,
  router: &Arc<Router>,
  managers: Vec<QueueManagerHandle>,
  fittings: Vec<FittingSpec>,
  options: ExecOptions,
) -> Result<Pipeline, BuildError> {
  let behaviors = validate(registry, &fittings)?;

  let pipeline = PipeRef::new();
  let (sink, results) = match options.sink {
    Some(sink) => (sink, None),
    None => {
      let (sink, rx) = SinkHandle::channel();
      (sink, Some(rx))
    }
  };

  let mut output = OutputTarget::Sink;
  let mut downstream = Downstream::Sink(sink.clone());
  let mut stages: Vec<Arc<FittingDetails>> = Vec::new();
  let mut links: Vec<(String, JoinHandle<()>)> = Vec::new();

  for (spec, behavior) in fittings.into_iter().zip(behaviors).rev() {
    let (handle, inbox) = coordinator_channel();
    let details = Arc::new(FittingDetails {
      pipeline,
      name: spec.name.clone(),
      behavior_id: spec.behavior.clone(),
      behavior,
      arg: spec.arg,
      partitioner: spec.partitioner,
      nval: spec.nval,
      q_limit: spec.q_limit,
      coordinator: handle.clone(),
      output,
      sink: sink.clone(),
      log: options.log,
      trace: options.trace.clone(),
    });
    let join = tokio::spawn(run_coordinator(
      inbox,
      handle.clone(),
      details.clone(),
      downstream,
      pipeline,
    ));
    links.push((spec.name, join));
    downstream = Downstream::Coordinator(handle);
    output = OutputTarget::Stage(details.clone());
    stages.push(details);
  }

  stages.reverse();
  links.reverse();
  debug!(%pipeline, stages = stages.len(), "pipeline created");
  supervise_pipeline(pipeline, links, managers);

  Ok(Pipeline::new(pipeline, stages, sink, results, router.clone()))
}

fn validate(
  registry: &BehaviorRegistry,
  fittings: &[FittingSpec],
) -> Result<Vec<Arc<dyn BehaviorSpec>>, BuildError> {
  if fittings.is_empty() {
    return Err(BuildError::Empty);
  }
  let mut names: HashSet<&str> = HashSet::new();
  let mut behaviors = Vec::with_capacity(fittings.len());
  for (index, spec) in fittings.iter().enumerate() {
    if !names.insert(spec.name.as_str()) {
      return Err(BuildError::DuplicateName(spec.name.clone()));
    }
    if spec.nval == 0 {
      return Err(BuildError::ZeroNval(spec.name.clone()));
    }
    if spec.q_limit == 0 {
      return Err(BuildError::ZeroQueueLimit(spec.name.clone()));
    }
    if index == 0 && spec.partitioner.is_follow() {
      return Err(BuildError::FollowAtHead(spec.name.clone()));
    }
    let behavior =
      registry
        .resolve(&spec.behavior)
        .ok_or_else(|| BuildError::UnknownBehavior {
          fitting: spec.name.clone(),
          behavior: spec.behavior.clone(),
        })?;
    behavior
      .validate_arg(spec.arg.as_ref())
      .map_err(|reason| BuildError::InvalidArg {
        fitting: spec.name.clone(),
        reason,
      })?;
    behaviors.push(behavior);
  }
  Ok(behaviors)
}
