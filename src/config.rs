//! Node-wide configuration and per-exec options.

use crate::sink::{LogMode, SinkHandle, TraceFilter};
use serde::{Deserialize, Serialize};

/// Node-wide limits for queue managers.
///
/// Passed into queue-manager construction rather than read from ambient
/// state; one value normally serves every manager of a process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
  /// Ceiling on any fitting's `q_limit`; the effective per-worker queue
  /// capacity is `min(q_limit, queue_limit_ceiling)`.
  pub queue_limit_ceiling: usize,
  /// How many times a crashed worker is restarted before its queue flips to
  /// preflist forwarding.
  pub worker_restart_limit: u32,
  /// Capacity of each queue manager's inbox channel.
  pub inbox_capacity: usize,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      queue_limit_ceiling: 4096,
      worker_restart_limit: 1,
      inbox_capacity: 64,
    }
  }
}

/// Options recognized by `exec`.
#[derive(Clone, Debug, Default)]
pub struct ExecOptions {
  /// Destination for result, log, and EOI records. `None` creates a channel
  /// whose receiver is handed back on the pipeline handle.
  pub sink: Option<SinkHandle>,
  /// Where log records go. Defaults to dropping them.
  pub log: LogMode,
  /// Which trace records are emitted. Defaults to none.
  pub trace: TraceFilter,
}

impl ExecOptions {
  /// Options with an explicit sink address.
  #[must_use]
  pub fn with_sink(mut self, sink: SinkHandle) -> Self {
    self.sink = Some(sink);
    self
  }

  /// Sets the log mode.
  #[must_use]
  pub fn with_log(mut self, log: LogMode) -> Self {
    self.log = log;
    self
  }

  /// Sets the trace filter.
  #[must_use]
  pub fn with_trace(mut self, trace: TraceFilter) -> Self {
    self.trace = trace;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_node_config_default() {
    let config = NodeConfig::default();
    assert_eq!(config.queue_limit_ceiling, 4096);
    assert_eq!(config.worker_restart_limit, 1);
    assert_eq!(config.inbox_capacity, 64);
  }
}
