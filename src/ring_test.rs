//! Tests for ring hashing and preflist generation.

use crate::hash::RingHash;
use crate::ring::{FixedRing, NodeId, PartitionId, Ring};
use proptest::prelude::*;

#[test]
fn test_preflist_length_is_nval() {
  let ring = FixedRing::local(8);
  let hash = RingHash::of(b"input");
  assert_eq!(ring.preflist(&hash, 1).len(), 1);
  assert_eq!(ring.preflist(&hash, 3).len(), 3);
}

#[test]
fn test_preflist_capped_by_partition_count() {
  let ring = FixedRing::local(2);
  let hash = RingHash::of(b"input");
  assert_eq!(ring.preflist(&hash, 5).len(), 2);
}

#[test]
fn test_preflist_walks_ring_clockwise() {
  let ring = FixedRing::local(4);
  let preflist = ring.preflist(&RingHash::ZERO, 4);
  let partitions: Vec<u64> = preflist.iter().map(|entry| entry.partition.0).collect();
  assert_eq!(partitions, vec![0, 1, 2, 3]);
}

#[test]
fn test_preflist_wraps_around() {
  let ring = FixedRing::local(4);
  // The top of the keyspace lands on the last partition and wraps.
  let hash = RingHash::from_bytes([0xff; 20]);
  let preflist = ring.preflist(&hash, 2);
  let partitions: Vec<u64> = preflist.iter().map(|entry| entry.partition.0).collect();
  assert_eq!(partitions, vec![3, 0]);
}

#[test]
fn test_owner_round_robin_over_nodes() {
  let nodes = vec![NodeId::new("n0"), NodeId::new("n1")];
  let ring = FixedRing::new(4, nodes.clone());
  assert_eq!(ring.owner(PartitionId(0)), Some(nodes[0].clone()));
  assert_eq!(ring.owner(PartitionId(1)), Some(nodes[1].clone()));
  assert_eq!(ring.owner(PartitionId(2)), Some(nodes[0].clone()));
  assert_eq!(ring.owner(PartitionId(3)), Some(nodes[1].clone()));
  assert_eq!(ring.owner(PartitionId(9)), None);
}

#[test]
fn test_constant_hash_routes_to_one_partition() {
  let ring = FixedRing::local(8);
  let first = ring.preflist(&RingHash::ZERO, 1);
  let second = ring.preflist(&RingHash::ZERO, 1);
  assert_eq!(first, second);
}

proptest! {
  #[test]
  fn test_preflist_deterministic(data in prop::collection::vec(any::<u8>(), 0..64)) {
    let ring = FixedRing::local(8);
    let hash = RingHash::of(&data);
    prop_assert_eq!(ring.preflist(&hash, 3), ring.preflist(&hash, 3));
  }

  #[test]
  fn test_preflist_partitions_distinct(
    data in prop::collection::vec(any::<u8>(), 0..64),
    nval in 1..8usize,
  ) {
    let ring = FixedRing::local(8);
    let hash = RingHash::of(&data);
    let preflist = ring.preflist(&hash, nval);
    prop_assert_eq!(preflist.len(), nval);
    let mut partitions: Vec<u64> = preflist.iter().map(|e| e.partition.0).collect();
    partitions.sort_unstable();
    partitions.dedup();
    prop_assert_eq!(partitions.len(), nval);
  }

  #[test]
  fn test_home_partition_in_range(data in prop::collection::vec(any::<u8>(), 0..64)) {
    let ring = FixedRing::local(4);
    let hash = RingHash::of(&data);
    let preflist = ring.preflist(&hash, 1);
    prop_assert!(preflist[0].partition.0 < 4);
  }
}
