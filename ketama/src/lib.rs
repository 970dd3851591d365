//! Ketama consistent hash ring.
//!
//! Provides consistent hashing compatible with libmemcached/twemproxy.
//! Adding or removing a server remaps only ~1/N of keys instead of all keys.
//!
//! The ring maps 32-bit key hashes to node indices. Key hashing is pluggable
//! (see [`Hasher`]); the ring points themselves are always derived from MD5,
//! which is what keeps two independently-built clients routing identically.

mod hash;
mod md5;

pub use hash::{Hasher, hash_crc_32, hash_fnv1_32, hash_fnv1a_32, hash_md5};

/// Virtual node points generated per unit of node weight.
pub const POINTS_PER_WEIGHT: usize = 160;

/// Immutable ketama consistent hash ring.
///
/// Construction is deterministic: the same `(identity, weight)` sequence
/// always yields the same ring, across runs and across processes.
#[derive(Clone, Debug)]
pub struct Ring {
    /// Sorted (hash_point, node_index) pairs.
    points: Box<[(u32, u16)]>,
    node_count: u16,
}

impl Ring {
    /// Route a 32-bit key hash to a node index in `0..node_count`.
    #[inline]
    pub fn route_hash(&self, hash: u32) -> usize {
        if self.node_count <= 1 {
            return 0;
        }
        self.points[self.locate(hash)].1 as usize
    }

    /// Node indices in ring order starting at the point owning `hash`, one
    /// full revolution. Consecutive items repeat node indices; callers doing
    /// failover de-duplicate and stop once every node has been seen.
    pub fn walk_hash(&self, hash: u32) -> impl Iterator<Item = u16> + '_ {
        let start = self.locate(hash);
        let len = self.points.len();
        (0..len).map(move |step| self.points[(start + step) % len].1)
    }

    /// Index of the first point with `point >= hash`, wrapping to 0.
    #[inline]
    fn locate(&self, hash: u32) -> usize {
        let idx = self.points.partition_point(|&(point, _)| point < hash);
        if idx == self.points.len() { 0 } else { idx }
    }

    /// Number of logical nodes (servers) in the ring.
    pub fn node_count(&self) -> usize {
        self.node_count as usize
    }

    /// Total number of virtual node points on the ring.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

/// Builder for constructing a [`Ring`] from weighted node identities.
pub struct RingBuilder {
    nodes: Vec<(String, u32)>,
}

impl RingBuilder {
    pub fn new() -> Self {
        RingBuilder { nodes: Vec::new() }
    }

    /// Add a node with the given identity string and weight.
    ///
    /// Weight 1 produces 160 virtual points (the standard ketama default),
    /// weight W produces `160 * W`.
    pub fn node(mut self, identity: &str, weight: u32) -> Self {
        self.nodes.push((identity.to_owned(), weight.max(1)));
        self
    }

    /// Build the immutable ring.
    ///
    /// # Panics
    ///
    /// Panics if no nodes were added.
    pub fn build(self) -> Ring {
        assert!(!self.nodes.is_empty(), "Ring must have at least one node");

        let mut points = Vec::new();
        for (node_idx, (identity, weight)) in self.nodes.iter().enumerate() {
            // Each MD5 digest of "{identity}-{i}" yields 4 ring points.
            let digests = POINTS_PER_WEIGHT * (*weight as usize) / 4;
            for i in 0..digests {
                let label = format!("{identity}-{i}");
                let digest = md5::digest(label.as_bytes());
                for quad in digest.chunks_exact(4) {
                    let point = u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
                    points.push((point, node_idx as u16));
                }
            }
        }
        points.sort_unstable_by_key(|&(point, _)| point);

        Ring {
            points: points.into_boxed_slice(),
            node_count: self.nodes.len() as u16,
        }
    }
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(identities: &[&str]) -> Ring {
        let mut builder = RingBuilder::new();
        for &id in identities {
            builder = builder.node(id, 1);
        }
        builder.build()
    }

    fn route(ring: &Ring, key: &[u8]) -> usize {
        ring.route_hash(hash_md5(key))
    }

    #[test]
    fn single_node_always_zero() {
        let r = ring(&["server-0:11211"]);
        assert_eq!(route(&r, b"any-key"), 0);
        assert_eq!(route(&r, b""), 0);
    }

    #[test]
    fn deterministic_routing() {
        let a = ring(&["s0:11211", "s1:11211", "s2:11211"]);
        let b = ring(&["s0:11211", "s1:11211", "s2:11211"]);
        for i in 0..100u32 {
            let key = format!("key-{i}");
            assert_eq!(route(&a, key.as_bytes()), route(&b, key.as_bytes()));
        }
    }

    #[test]
    fn roughly_uniform_distribution() {
        let r = ring(&["s0:11211", "s1:11211", "s2:11211"]);
        let mut counts = [0u32; 3];
        for i in 0..10_000u32 {
            let key = format!("key-{i}");
            counts[route(&r, key.as_bytes())] += 1;
        }
        for (i, &count) in counts.iter().enumerate() {
            assert!(
                (2500..=4500).contains(&count),
                "server {i} got {count} keys, expected 2500-4500: {counts:?}"
            );
        }
    }

    #[test]
    fn weighted_distribution() {
        let r = RingBuilder::new()
            .node("s0:11211", 1)
            .node("s1:11211", 2)
            .build();
        let mut counts = [0u32; 2];
        for i in 0..10_000u32 {
            let key = format!("key-{i}");
            counts[route(&r, key.as_bytes())] += 1;
        }
        let ratio = counts[1] as f64 / counts[0] as f64;
        assert!(
            (1.5..2.5).contains(&ratio),
            "weight ratio {ratio:.2}, counts: {counts:?}"
        );
    }

    #[test]
    fn minimal_remapping_on_node_add() {
        let three = ring(&["s0:11211", "s1:11211", "s2:11211"]);
        let four = ring(&["s0:11211", "s1:11211", "s2:11211", "s3:11211"]);

        let total = 10_000u32;
        let mut remapped = 0u32;
        for i in 0..total {
            let key = format!("key-{i}");
            if route(&three, key.as_bytes()) != route(&four, key.as_bytes()) {
                remapped += 1;
            }
        }
        // Ideal: 25% remapped (1/4). Allow up to 40%.
        let pct = remapped as f64 / total as f64;
        assert!(pct < 0.40, "remapped {pct:.1}% of keys: {remapped}/{total}");
    }

    #[test]
    fn point_counts() {
        let r = ring(&["s0:11211", "s1:11211"]);
        assert_eq!(r.point_count(), 320);
        assert_eq!(r.node_count(), 2);

        let weighted = RingBuilder::new()
            .node("s0:11211", 1)
            .node("s1:11211", 3)
            .build();
        assert_eq!(weighted.point_count(), 640);
    }

    #[test]
    fn walk_starts_at_nominal_and_covers_all_nodes() {
        let r = ring(&["s0:11211", "s1:11211", "s2:11211"]);
        let hash = hash_md5(b"walk-key");
        let nominal = r.route_hash(hash);

        let mut walk = r.walk_hash(hash);
        assert_eq!(walk.next().unwrap() as usize, nominal);

        let mut seen = [false; 3];
        seen[nominal] = true;
        for idx in walk {
            seen[idx as usize] = true;
        }
        assert!(seen.iter().all(|&s| s), "one revolution visits every node");
    }

    #[test]
    fn walk_yields_one_revolution() {
        let r = ring(&["s0:11211", "s1:11211"]);
        assert_eq!(r.walk_hash(0).count(), r.point_count());
    }

    #[test]
    #[should_panic(expected = "at least one node")]
    fn empty_ring_panics() {
        RingBuilder::new().build();
    }
}
