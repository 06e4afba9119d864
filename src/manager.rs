//! Node managers.
//!
//! Fixed-size BDD nodes and every observed CDD arity are tracked by separate
//! managers. A manager owns per-level sub-tables, a free list threaded
//! through the `next` field of unused arena slots, and the statistics the
//! garbage collector bases its decisions on. Slots are claimed from the
//! shared arena in chunk-sized batches, so the grow-or-collect trade-off of
//! the classic chunked allocator carries over unchanged.

use log::debug;

use crate::node::{Node, NodeId, NO_NEXT};
use crate::subtable::Subtable;

/// Arena slots claimed per chunk; sized to the historical 64 KiB chunks.
pub const CHUNK_SIZE: usize = 0x10000;

/// Minimum percentage of dead nodes before a collection pays off.
pub const MINFREE: i64 = 20;

/// Free-node percentage below which the global collector considers a manager.
pub const THRESHOLD: i64 = 5;

/// What a manager allocates.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ManagerKind {
    Bdd,
    /// CDD nodes of the given arity (`>= 2`).
    Cdd(usize),
}

/// Statistics of one sweep over one manager, passed to the post-GC hook.
#[derive(Debug, Clone)]
pub struct GbcStats {
    /// Nodes allocated to the manager.
    pub nodes: i32,
    /// Nodes on the free list after the sweep.
    pub free_nodes: i32,
    /// Time of this sweep.
    pub time: std::time::Duration,
    /// Accumulated sweep time of the session.
    pub sum_time: std::time::Duration,
    /// Number of collections run so far in the session.
    pub num: i32,
}

/// Statistics of one sub-table rehash, passed to the post-rehash hook.
#[derive(Debug, Clone)]
pub struct RehashStats {
    pub level: u32,
    /// New size of the bucket array.
    pub buckets: usize,
    pub keys: i32,
    /// Keys before the next rehash.
    pub max: i32,
    pub time: std::time::Duration,
    pub sum_time: std::time::Duration,
    pub num: i32,
}

/// Allocation bookkeeping for one node size.
#[derive(Debug)]
pub struct Manager {
    pub kind: ManagerKind,
    /// Head of the free list; `NO_NEXT` when empty.
    free: NodeId,
    pub free_count: i32,
    pub chunk_count: i32,
    pub alloc_count: i32,
    pub dead_count: i32,
    pub used_count: i32,
    pub gbc_count: i32,
    /// One sub-table per level, created on first use.
    pub subtables: Vec<Option<Subtable>>,
}

impl Manager {
    pub fn new(kind: ManagerKind, level_count: usize) -> Self {
        let mut subtables = Vec::new();
        subtables.resize_with(level_count, || None);
        Self {
            kind,
            free: NO_NEXT,
            free_count: 0,
            chunk_count: 0,
            alloc_count: 0,
            dead_count: 0,
            used_count: 0,
            gbc_count: 0,
            subtables,
        }
    }

    /// Extends the sub-table array for newly declared levels.
    pub fn add_levels(&mut self, n: usize) {
        self.subtables.resize_with(self.subtables.len() + n, || None);
    }

    pub fn subtable(&mut self, level: u32) -> &mut Subtable {
        self.subtables[level as usize].get_or_insert_with(|| Subtable::new(level))
    }

    pub fn has_free(&self) -> bool {
        self.free != NO_NEXT
    }

    /// Takes a slot off the free list. The caller initialises it.
    pub fn pop_free(&mut self, nodes: &[Node]) -> NodeId {
        debug_assert!(self.free != NO_NEXT);
        let id = self.free;
        self.free = nodes[id as usize].next;
        self.free_count -= 1;
        self.used_count += 1;
        id
    }

    /// Puts a slot back on the free list.
    fn push_free(&mut self, nodes: &mut [Node], id: NodeId) {
        let node = &mut nodes[id as usize];
        *node = Node::free();
        node.next = self.free;
        self.free = id;
    }

    /// Claims a chunk worth of fresh slots from the arena.
    pub fn alloc_chunk(&mut self, nodes: &mut Vec<Node>) -> bool {
        let count = CHUNK_SIZE / std::mem::size_of::<Node>();
        if nodes.len() + count >= 0x8000_0000 {
            return false;
        }
        for _ in 0..count {
            let id = nodes.len() as NodeId;
            nodes.push(Node::free());
            nodes[id as usize].next = self.free;
            self.free = id;
        }
        self.free_count += count as i32;
        self.alloc_count += count as i32;
        self.chunk_count += 1;
        debug!("alloc_chunk({:?}): {} nodes, {} chunks", self.kind, count, self.chunk_count);
        true
    }

    /// True when enough nodes are dead for a collection to be worthwhile.
    pub fn worth_collecting(&self) -> bool {
        MINFREE * (self.alloc_count as i64) <
            100 * (self.dead_count as i64)
    }

    /// True when the global collector should sweep this manager: the free
    /// list is nearly exhausted and enough nodes are dead.
    pub fn wants_sweep(&self) -> bool {
        THRESHOLD * self.alloc_count as i64 >= 100 * self.free_count as i64 &&
            self.worth_collecting()
    }

    /// Sweeps all sub-tables that contain dead nodes, unlinking every node
    /// with a zero reference count and putting it on the free list.
    ///
    /// Returns the number of freed nodes.
    pub fn sweep(&mut self, nodes: &mut [Node]) -> i32 {
        let mut freed_total = 0;
        let mut dead_total = 0;
        // Take the sub-tables out so the free list can be mutated alongside.
        let mut subtables = std::mem::take(&mut self.subtables);
        for tbl in subtables.iter_mut().flatten() {
            if tbl.dead == 0 {
                continue;
            }
            let mut freed = 0;
            for bucket in 0..tbl.num_buckets() {
                let mut tail = NO_NEXT;
                let mut cur = tbl.head(bucket);
                tbl.set_head(bucket, NO_NEXT);
                while cur != NO_NEXT {
                    let next = nodes[cur as usize].next;
                    if nodes[cur as usize].ref_count == 0 {
                        self.push_free(nodes, cur);
                        freed += 1;
                    } else if tail == NO_NEXT {
                        tbl.set_head(bucket, cur);
                        tail = cur;
                    } else {
                        nodes[tail as usize].next = cur;
                        tail = cur;
                    }
                    cur = next;
                }
                if tail != NO_NEXT {
                    nodes[tail as usize].next = NO_NEXT;
                }
            }
            tbl.keys -= freed;
            dead_total += tbl.dead;
            tbl.dead = 0;
            freed_total += freed;
        }
        self.subtables = subtables;

        // Nodes counted dead already left `used_count` when they were
        // dereferenced; nodes that never got an external reference have not.
        self.free_count += freed_total;
        self.used_count -= freed_total - dead_total;
        self.dead_count -= dead_total;
        self.gbc_count += 1;
        freed_total
    }
}
