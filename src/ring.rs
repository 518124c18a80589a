//! Ring client: partition ownership and preflist generation.
//!
//! The ring service is an external collaborator; the engine only depends on
//! the [`Ring`] trait. [`FixedRing`] is the in-process implementation used for
//! single-process clusters and tests: a fixed number of partitions claiming
//! equal slices of the 160-bit keyspace, spread round-robin over a node list.

use crate::hash::RingHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one partition of the consistent-hash ring.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl fmt::Display for PartitionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "partition {}", self.0)
  }
}

/// Identifier of a node hosting a queue manager.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
  /// Creates a node id from a name.
  #[must_use]
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  /// Returns the node name.
  #[must_use]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One entry of a preflist: a partition and the node that owns it.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct PreflistEntry {
  /// The partition responsible for the hashed input.
  pub partition: PartitionId,
  /// The node currently owning that partition.
  pub node: NodeId,
}

/// Read-only view of the consistent-hash ring.
///
/// Maps a 160-bit hash to an ordered preflist of `(partition, node)` pairs.
/// The head of the preflist is the primary target; the tail holds fallback
/// partitions tried in order when a worker fails.
pub trait Ring: Send + Sync {
  /// Returns the ordered preflist of length `min(nval, partitions)` for a hash.
  fn preflist(&self, hash: &RingHash, nval: usize) -> Vec<PreflistEntry>;

  /// Returns the node that currently owns a partition, if any.
  fn owner(&self, partition: PartitionId) -> Option<NodeId>;

  /// Returns every node participating in the ring.
  fn nodes(&self) -> Vec<NodeId>;

  /// Returns the number of partitions on the ring.
  fn partition_count(&self) -> u64;
}

/// In-process ring with a fixed partition count and node list.
///
/// Partition `i` owns the keyspace slice `[i * 2^64/n, (i+1) * 2^64/n)` of the
/// projected hash position; ownership is assigned round-robin over the node
/// list. Preflists walk the ring clockwise from the owning partition.
#[derive(Clone, Debug)]
pub struct FixedRing {
  partitions: u64,
  nodes: Vec<NodeId>,
}

impl FixedRing {
  /// Creates a ring with `partitions` partitions spread over `nodes`.
  ///
  /// Both counts must be non-zero.
  #[must_use]
  pub fn new(partitions: u64, nodes: Vec<NodeId>) -> Self {
    assert!(partitions > 0, "ring needs at least one partition");
    assert!(!nodes.is_empty(), "ring needs at least one node");
    Self { partitions, nodes }
  }

  /// Single-node ring, the default for in-process pipelines.
  #[must_use]
  pub fn local(partitions: u64) -> Self {
    Self::new(partitions, vec![NodeId::new("local")])
  }

  fn home_partition(&self, hash: &RingHash) -> u64 {
    // Scale the 64-bit position into [0, partitions) without bias.
    ((u128::from(hash.position()) * u128::from(self.partitions)) >> 64) as u64
  }

  fn node_for(&self, partition: u64) -> NodeId {
    self.nodes[(partition % self.nodes.len() as u64) as usize].clone()
  }
}

impl Ring for FixedRing {
  fn preflist(&self, hash: &RingHash, nval: usize) -> Vec<PreflistEntry> {
    let take = nval.min(self.partitions as usize);
    let home = self.home_partition(hash);
    (0..take as u64)
      .map(|i| {
        let partition = (home + i) % self.partitions;
        PreflistEntry {
          partition: PartitionId(partition),
          node: self.node_for(partition),
        }
      })
      .collect()
  }

  fn owner(&self, partition: PartitionId) -> Option<NodeId> {
    if partition.0 < self.partitions {
      Some(self.node_for(partition.0))
    } else {
      None
    }
  }

  fn nodes(&self) -> Vec<NodeId> {
    self.nodes.clone()
  }

  fn partition_count(&self) -> u64 {
    self.partitions
  }
}
