//! Direct-mapped operation caches.
//!
//! Each cache is a plain array indexed by `hash % size` with no collision
//! chains; a write displaces the previous occupant. An entry answers a
//! lookup only if every key field matches exactly. After a garbage
//! collection the caches are flushed: any entry mentioning a node whose
//! reference count dropped to zero is invalidated, so a later hit can never
//! resurrect a freed slot.

use std::cell::Cell;

use crate::bounds::Raw;
use crate::reference::Ref;

#[derive(Debug, Copy, Clone)]
struct OpEntry {
    a: Ref,
    b: Ref,
    op: u64,
    res: Ref,
}

/// Cache for binary operations and the memoised recursions, keyed by
/// `(left, right, op)`. Unary users store the node in both argument slots
/// and the running operation id in `op`.
pub struct OpCache {
    table: Vec<Option<OpEntry>>,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl OpCache {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "cache size must be positive");
        Self {
            table: std::iter::repeat_with(|| None).take(size).collect(),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    #[inline]
    fn index(&self, hash: u64) -> usize {
        (hash % self.table.len() as u64) as usize
    }

    pub fn lookup(&self, hash: u64, a: Ref, b: Ref, op: u64) -> Option<Ref> {
        match self.table[self.index(hash)] {
            Some(e) if e.a == a && e.b == b && e.op == op => {
                self.hits.set(self.hits.get() + 1);
                Some(e.res)
            }
            _ => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    pub fn insert(&mut self, hash: u64, a: Ref, b: Ref, op: u64, res: Ref) {
        let index = self.index(hash);
        self.table[index] = Some(OpEntry { a, b, op, res });
    }

    /// Blanks every entry.
    pub fn reset(&mut self) {
        self.table.fill(None);
    }

    /// Invalidates entries that mention a dead node.
    pub fn flush(&mut self, is_dead: impl Fn(Ref) -> bool) {
        for slot in self.table.iter_mut() {
            if let Some(e) = *slot {
                if is_dead(e.a) || is_dead(e.b) || is_dead(e.res) {
                    *slot = None;
                }
            }
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.get()
    }
    pub fn misses(&self) -> usize {
        self.misses.get()
    }
}

#[derive(Debug, Copy, Clone)]
struct RelaxEntry {
    node: Ref,
    lower: Raw,
    upper: Raw,
    clock1: u32,
    clock2: u32,
    op: u64,
    res: Ref,
}

/// Cache for the relax step of clock quantification, keyed by the full
/// `(node, lower, upper, clock1, clock2, op)` tuple.
pub struct RelaxCache {
    table: Vec<Option<RelaxEntry>>,
}

impl RelaxCache {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "cache size must be positive");
        Self { table: std::iter::repeat_with(|| None).take(size).collect() }
    }

    #[inline]
    fn index(&self, hash: u64) -> usize {
        (hash % self.table.len() as u64) as usize
    }

    #[allow(clippy::too_many_arguments)]
    pub fn lookup(
        &self,
        hash: u64,
        node: Ref,
        lower: Raw,
        upper: Raw,
        clock1: u32,
        clock2: u32,
        op: u64,
    ) -> Option<Ref> {
        match self.table[self.index(hash)] {
            Some(e)
                if e.node == node
                    && e.lower == lower
                    && e.upper == upper
                    && e.clock1 == clock1
                    && e.clock2 == clock2
                    && e.op == op =>
            {
                Some(e.res)
            }
            _ => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        hash: u64,
        node: Ref,
        lower: Raw,
        upper: Raw,
        clock1: u32,
        clock2: u32,
        op: u64,
        res: Ref,
    ) {
        let index = self.index(hash);
        self.table[index] = Some(RelaxEntry { node, lower, upper, clock1, clock2, op, res });
    }

    pub fn reset(&mut self) {
        self.table.fill(None);
    }
}
