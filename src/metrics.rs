//! Operational counters.
//!
//! Thin wrappers over the `metrics` facade; a recorder installed by the host
//! process picks these up, and without one they are no-ops.

use metrics::counter;

/// Records an input accepted into a fitting's queue.
pub fn record_input(fitting: &str) {
  counter!("pipeweave_inputs_total", "fitting" => fitting.to_string()).increment(1);
}

/// Records a result delivered to a pipeline sink.
pub fn record_result(fitting: &str) {
  counter!("pipeweave_results_total", "fitting" => fitting.to_string()).increment(1);
}

/// Records a worker crash (callback panic or unreachable exit).
pub fn record_worker_failure(fitting: &str) {
  counter!("pipeweave_worker_failures_total", "fitting" => fitting.to_string()).increment(1);
}

/// Records an input forwarded down its preflist.
pub fn record_forward(fitting: &str) {
  counter!("pipeweave_forwards_total", "fitting" => fitting.to_string()).increment(1);
}
