//! Key → connection-index routing.
//!
//! The selector owns the ring and the failover policy; connections stay in
//! the pool's contiguous storage and are referred to by index only, so
//! rebuilding the ring can never leave a dangling reference.

use ketama::{Hasher, Ring, RingBuilder};

pub(crate) struct Selector {
    ring: Option<Ring>,
    hasher: Hasher,
    failover: bool,
}

impl Selector {
    pub fn new(hasher: Hasher) -> Self {
        Self {
            ring: None,
            hasher,
            failover: false,
        }
    }

    pub fn set_hasher(&mut self, hasher: Hasher) {
        self.hasher = hasher;
    }

    pub fn set_failover(&mut self, enabled: bool) {
        self.failover = enabled;
    }

    pub fn reset(&mut self) {
        self.ring = None;
    }

    /// Rebuild the ring from `(identity, weight)` pairs; node index i maps
    /// to connection index i. Deterministic for identical input.
    pub fn rebuild(&mut self, nodes: &[(String, u32)]) {
        if nodes.is_empty() {
            self.ring = None;
            return;
        }
        let mut builder = RingBuilder::new();
        for (identity, weight) in nodes {
            builder = builder.node(identity, *weight);
        }
        self.ring = Some(builder.build());
    }

    /// Route `key` to a connection index.
    ///
    /// With failover off or `check_alive` false this is the nominal ring
    /// owner, usable or not. With failover on, walks the ring forward
    /// skipping indices `usable` rejects, visiting each distinct server at
    /// most once; `None` when every server is rejected.
    pub fn select(
        &self,
        key: &[u8],
        check_alive: bool,
        mut usable: impl FnMut(usize) -> bool,
    ) -> Option<usize> {
        let ring = self.ring.as_ref()?;
        let hash = self.hasher.hash(key);

        if !self.failover || !check_alive {
            return Some(ring.route_hash(hash));
        }

        let mut visited = vec![false; ring.node_count()];
        let mut remaining = ring.node_count();
        for node in ring.walk_hash(hash) {
            let idx = node as usize;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            if usable(idx) {
                return Some(idx);
            }
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        None
    }
}
