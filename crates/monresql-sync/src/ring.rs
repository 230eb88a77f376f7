use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

/// A consistent-hash ring over a fixed set of named shards. Virtual nodes
/// smooth the distribution; `shard_for` always returns the same shard for
/// the same key, which is the only property the tail engine actually
/// relies on (per-document-id ordering), since the shard count here never
/// changes at runtime.
pub struct HashRing {
    points: BTreeMap<u64, usize>,
}

const VIRTUAL_NODES_PER_SHARD: usize = 64;

impl HashRing {
    pub fn new(num_shards: usize) -> Self {
        let mut points = BTreeMap::new();
        for shard in 0..num_shards {
            for v in 0..VIRTUAL_NODES_PER_SHARD {
                let key = format!("shard-{shard}-{v}");
                points.insert(xxh3_64(key.as_bytes()), shard);
            }
        }
        HashRing { points }
    }

    pub fn shard_for(&self, key: &str) -> usize {
        let point = xxh3_64(key.as_bytes());
        match self.points.range(point..).next() {
            Some((_, &shard)) => shard,
            None => *self.points.values().next().expect("ring has at least one shard"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_routes_to_same_shard() {
        let ring = HashRing::new(5);
        let first = ring.shard_for("doc-42");
        for _ in 0..100 {
            assert_eq!(ring.shard_for("doc-42"), first);
        }
    }

    #[test]
    fn distributes_across_all_shards() {
        let ring = HashRing::new(5);
        let mut seen = std::collections::HashSet::new();
        for i in 0..500 {
            seen.insert(ring.shard_for(&format!("doc-{i}")));
        }
        assert_eq!(seen.len(), 5);
    }
}
