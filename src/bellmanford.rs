//! Naive Bellman–Ford consistency check.
//!
//! Used only to cross-check the Tarjan reducer: same queries, no FIFO
//! ordering, negative-cycle detection by a final residual-relaxation pass,
//! `O(V·E)` worst case.

use crate::bounds::{bnd_is_strict, bnd_limit, Raw, INF};

/// Distance from the virtual source vertex, kept as a pair so that a cycle
/// summing to `(<, 0)` can be told apart from one summing to `(<=, 0)`:
/// plain raw bounds cannot make that distinction.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Distance {
    pub value: i32,
    /// Number of strict bounds on the path.
    pub strictness: i32,
}

/// Adds a raw bound to a distance.
#[inline]
pub fn dist_add(d: Distance, e: Raw) -> Distance {
    Distance { value: d.value + bnd_limit(e), strictness: d.strictness + bnd_is_strict(e) as i32 }
}

/// Lexicographic order by `(value, -strictness)`: with equal values, the
/// path with more strict edges is the shorter one.
#[inline]
pub fn dist_less(a: Distance, b: Distance) -> bool {
    a.value < b.value || (a.value == b.value && a.strictness > b.strictness)
}

#[derive(Debug, Copy, Clone)]
struct BfEdge {
    i: u32,
    j: u32,
    value: Raw,
}

/// A constraint graph checked by plain Bellman–Ford relaxation.
#[derive(Debug)]
pub struct BellmanFord {
    dim: u32,
    dist: Vec<Distance>,
    edges: Vec<BfEdge>,
}

impl BellmanFord {
    pub fn new(dim: u32) -> Self {
        assert!(dim > 0);
        Self { dim, dist: vec![Distance::default(); dim as usize], edges: Vec::new() }
    }

    /// Adds the edge `i -> j` with the given bound.
    pub fn push(&mut self, i: u32, j: u32, value: Raw) {
        debug_assert!(value < INF);
        debug_assert_ne!(i, j);
        debug_assert!(
            self.edges.iter().all(|e| e.i != i || e.j != j),
            "duplicate edge {} -> {}",
            i,
            j
        );
        self.edges.push(BfEdge { i, j, value });
    }

    /// Removes the most recently added edge.
    pub fn pop(&mut self) {
        debug_assert!(!self.edges.is_empty());
        self.edges.pop();
    }

    /// True iff the graph has no negative cycle.
    pub fn consistent(&mut self) -> bool {
        let mut rounds = self.dim;
        let mut found = true;
        while rounds > 0 && found {
            found = false;
            for e in &self.edges {
                let sum = dist_add(self.dist[e.i as usize], e.value);
                if dist_less(sum, self.dist[e.j as usize]) {
                    self.dist[e.j as usize] = sum;
                    found = true;
                }
            }
            rounds -= 1;
        }
        if found {
            for e in &self.edges {
                if dist_less(dist_add(self.dist[e.i as usize], e.value), self.dist[e.j as usize]) {
                    return false;
                }
            }
        }
        true
    }
}
