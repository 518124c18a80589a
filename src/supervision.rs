//! Pipeline-scoped supervision.
//!
//! All coordinators of a pipeline are linked to one supervisor task. A
//! coordinator that panics takes the whole pipeline down: the supervisor
//! broadcasts teardown to every queue manager, which drops the pipeline's
//! queues, aborts its workers, and unblocks parked senders with a rejection.

use crate::envelope::PipeRef;
use crate::manager::QueueManagerHandle;
use futures::future::select_all;
use tokio::task::JoinHandle;
use tracing::error;

/// Report of a coordinator task failure.
#[derive(Clone, Debug)]
pub struct FailureReport {
  /// Pipeline that was torn down.
  pub pipeline: PipeRef,
  /// Fitting whose coordinator failed.
  pub fitting: String,
  /// Panic description.
  pub reason: String,
}

/// Links the pipeline's coordinator tasks and tears everything down on the
/// first panic. Ends quietly once every coordinator exits normally.
pub(crate) fn supervise_pipeline(
  pipeline: PipeRef,
  coordinators: Vec<(String, JoinHandle<()>)>,
  managers: Vec<QueueManagerHandle>,
) {
  tokio::spawn(async move {
    let (mut names, mut handles): (Vec<String>, Vec<JoinHandle<()>>) =
      coordinators.into_iter().unzip();
    while !handles.is_empty() {
      let (outcome, index, rest) = select_all(handles).await;
      let fitting = names.remove(index);
      handles = rest;
      match outcome {
        Ok(()) => continue,
        Err(join_error) if join_error.is_panic() => {
          let report = FailureReport {
            pipeline,
            fitting,
            reason: join_error.to_string(),
          };
          error!(
            pipeline = %report.pipeline,
            fitting = %report.fitting,
            reason = %report.reason,
            "coordinator failed, tearing pipeline down"
          );
          for handle in &handles {
            handle.abort();
          }
          for manager in &managers {
            manager.teardown(pipeline).await;
          }
          return;
        }
        Err(_) => continue,
      }
    }
  });
}
