//! The CDD session.
//!
//! All state of the library lives in one [`Cdd`] value: the node arena, the
//! per-size node managers with their sub-tables, the operation caches, the
//! level table, the reference stack and the latched error condition. Every
//! operation is a method taking `&mut self`, which also rules out the
//! re-entrancy hazards of the classic process-wide design.
//!
//! # Handles and reference counts
//!
//! Operations accept and return [`Ref`] handles. A result comes back with a
//! zero reference count: callers that keep it across further operations must
//! [`Cdd::inc_ref`] it and release it again with [`Cdd::rec_deref`]. A node
//! whose count is zero is *dead* but not freed; a later cache hit or
//! hash-cons lookup can resurrect it until a sweep actually reclaims the
//! slot.
//!
//! # Example
//!
//! ```rust
//! use cdd_rs::cdd::{Cdd, Op};
//!
//! let mut cdd = Cdd::default();
//! let b = cdd.add_bddvar(2);
//! let x = cdd.mk_var(b);
//! let y = cdd.mk_var(b + 1);
//! let f = cdd.apply(x, y, Op::And);
//! assert_eq!(cdd.apply(f, -f, Op::And), Cdd::FALSE);
//! ```

use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::bounds::{bnd_add, bnd_l2u, bnd_u2l, Raw, INF, LE_ZERO};
use crate::cache::{OpCache, RelaxCache};
use crate::error::CddError;
use crate::manager::{GbcStats, Manager, ManagerKind, RehashStats};
use crate::node::{
    difference, difference_count, Elem, LevelInfo, LevelKind, Node, NodeData, NodeId, MAXREF,
    MAX_LEVEL, NO_NEXT,
};
use crate::reference::Ref;
use crate::utils::{hash_pair, hash_words};

/// The binary operations of the apply kernel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Op {
    And = 0,
    Xor = 1,
}

type GbcHook = Box<dyn FnMut(&GbcStats)>;
type RehashHook = Box<dyn FnMut(&RehashStats)>;

/// A session of the CDD library.
pub struct Cdd {
    pub(crate) nodes: Vec<Node>,
    pub(crate) bdd_man: Manager,
    /// CDD managers indexed by arity; entries 0 and 1 stay empty.
    pub(crate) cdd_man: Vec<Option<Manager>>,
    max_arity: usize,
    max_arity_used: usize,
    pub(crate) levels: Vec<LevelInfo>,
    pub(crate) diff2level: Vec<u32>,
    pub(crate) clock_count: u32,
    pub(crate) var_count: u32,
    pub(crate) ref_stack: Vec<Elem>,
    stack_size: usize,
    pub(crate) apply_cache: OpCache,
    pub(crate) quant_cache: OpCache,
    pub(crate) replace_cache: OpCache,
    pub(crate) relax_cache: RelaxCache,
    pub(crate) op_id: u64,
    error: Option<CddError>,
    gbc_count: i32,
    gbc_time: Duration,
    rehash_count: i32,
    rehash_time: Duration,
    extra_terminals: Vec<NodeId>,
    pre_gbc_hook: Option<Box<dyn FnMut()>>,
    post_gbc_hook: Option<GbcHook>,
    pre_rehash_hook: Option<Box<dyn FnMut()>>,
    post_rehash_hook: Option<RehashHook>,
}

impl Cdd {
    /// The empty diagram. The arena slot at index 1 is the single terminal.
    pub const FALSE: Ref = Ref::positive(1);
    /// The tautology: the negation of [`Cdd::FALSE`].
    pub const TRUE: Ref = Ref::negative(1);

    /// Initialises a session.
    ///
    /// `max_arity` bounds the number of children of a CDD node, `cache_size`
    /// is the entry count of each operation cache, and `stack_size` bounds
    /// the reference stack used to assemble CDD nodes.
    ///
    /// The default GC and rehash handlers (one `log` line per run) are
    /// installed; use the hook setters to replace or remove them.
    pub fn new(max_arity: usize, cache_size: usize, stack_size: usize) -> Result<Self, CddError> {
        if max_arity < 2 || cache_size == 0 || stack_size == 0 {
            return Err(CddError::Range);
        }
        let mut nodes = vec![Node::free()];
        nodes.push(Node {
            next: NO_NEXT,
            level: MAX_LEVEL,
            ref_count: MAXREF,
            data: NodeData::Terminal,
        });

        let mut cdd = Self {
            nodes,
            bdd_man: Manager::new(ManagerKind::Bdd, 0),
            cdd_man: Vec::new(),
            max_arity,
            max_arity_used: 0,
            levels: Vec::new(),
            diff2level: Vec::new(),
            clock_count: 0,
            var_count: 0,
            ref_stack: Vec::new(),
            stack_size,
            apply_cache: OpCache::new(cache_size),
            quant_cache: OpCache::new(cache_size),
            replace_cache: OpCache::new(cache_size),
            relax_cache: RelaxCache::new(cache_size),
            op_id: 0,
            error: None,
            gbc_count: 0,
            gbc_time: Duration::ZERO,
            rehash_count: 0,
            rehash_time: Duration::ZERO,
            extra_terminals: Vec::new(),
            pre_gbc_hook: None,
            post_gbc_hook: None,
            pre_rehash_hook: None,
            post_rehash_hook: None,
        };
        cdd.set_postgbc_hook(Some(Box::new(|s: &GbcStats| {
            info!(
                "garbage collection #{}: {} nodes / {} free / {:.1?} / {:.1?} total",
                s.num, s.nodes, s.free_nodes, s.time, s.sum_time
            );
        })));
        cdd.set_postrehash_hook(Some(Box::new(|s: &RehashStats| {
            info!(
                "rehash #{}: level {} / {} buckets / {} keys / {} max / {:.1?} / {:.1?} total",
                s.num, s.level, s.buckets, s.keys, s.max, s.time, s.sum_time
            );
        })));
        Ok(cdd)
    }

    /// The latched error condition, if any. Once set, every operation
    /// short-circuits to [`Cdd::FALSE`]; recovery means creating a fresh
    /// session.
    pub fn error_cond(&self) -> Option<CddError> {
        self.error
    }

    pub(crate) fn set_error(&mut self, e: CddError) {
        if self.error.is_none() {
            error!("cdd error: {} ({})", e, e.code());
            self.error = Some(e);
        }
    }

    pub(crate) fn ok(&self) -> bool {
        self.error.is_none()
    }

    // ------------------------------------------------------------------
    // Levels
    // ------------------------------------------------------------------

    fn add_levels(&mut self, n: usize) {
        self.bdd_man.add_levels(n);
        for man in self.cdd_man.iter_mut().flatten() {
            man.add_levels(n);
        }
    }

    /// Declares `n` boolean variables and returns the level of the first.
    pub fn add_bddvar(&mut self, n: u32) -> u32 {
        let offset = self.levels.len() as u32;
        self.add_levels(n as usize);
        for _ in 0..n {
            self.levels.push(LevelInfo { kind: LevelKind::Bdd });
        }
        self.var_count += n;
        offset
    }

    /// Declares `n` clocks. Every pair of clocks gets its own level, so this
    /// appends `n·(n−1)/2 + n·prior` new CDD levels.
    pub fn add_clocks(&mut self, n: u32) {
        let old = self.clock_count;
        let new = old + n;
        let diffs = difference_count(new) - difference_count(old);
        self.add_levels(diffs as usize);
        self.diff2level.resize(difference_count(new) as usize, 0);
        for i in old..new {
            for j in 0..i {
                let level = self.levels.len() as u32;
                let diff = difference(i, j);
                self.levels.push(LevelInfo { kind: LevelKind::Cdd { clock1: i, clock2: j, diff } });
                self.diff2level[diff as usize] = level;
            }
        }
        self.clock_count = new;
    }

    /// Declares `n` extra terminals. They compare equal to `TRUE`
    /// semantically but stay distinguishable by id.
    pub fn add_tautologies(&mut self, n: usize) {
        for _ in 0..n {
            let id = self.extra_terminals.len() as i32;
            let slot = self.nodes.len() as NodeId;
            self.nodes.push(Node {
                next: NO_NEXT,
                level: MAX_LEVEL,
                ref_count: MAXREF,
                data: NodeData::ExtraTrue(id),
            });
            self.extra_terminals.push(slot);
        }
    }

    /// The extra terminal with the given id.
    pub fn tautology(&self, id: usize) -> Ref {
        Ref::positive(self.extra_terminals[id])
    }

    /// The id of an extra terminal, or `None` for any other node.
    pub fn tautology_id(&self, r: Ref) -> Option<i32> {
        match self.node(r).data {
            NodeData::ExtraTrue(id) => Some(id),
            _ => None,
        }
    }

    /// Conjoins a diagram with the extra terminal `id`.
    pub fn apply_tautology(&mut self, node: Ref, id: usize) -> Ref {
        let t = self.tautology(id);
        self.apply(node, t, Op::And)
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn bdd_level_count(&self) -> u32 {
        self.var_count
    }

    /// The number of declared clocks, including the reference clock.
    pub fn clocks(&self) -> u32 {
        self.clock_count
    }

    pub fn level_info(&self, level: u32) -> &LevelInfo {
        &self.levels[level as usize]
    }

    // ------------------------------------------------------------------
    // Node access
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn node(&self, r: Ref) -> &Node {
        &self.nodes[r.index() as usize]
    }

    #[inline]
    pub(crate) fn level_of(&self, r: Ref) -> u32 {
        self.node(r).level
    }

    /// True for the `FALSE`/`TRUE` terminal and every extra terminal.
    #[inline]
    pub fn is_terminal(&self, r: Ref) -> bool {
        self.level_of(r) == MAX_LEVEL
    }

    /// True only for the `FALSE`/`TRUE` terminal.
    #[inline]
    pub fn is_tf_terminal(&self, r: Ref) -> bool {
        r.index() == 1
    }

    #[inline]
    pub fn is_extra_terminal(&self, r: Ref) -> bool {
        self.is_terminal(r) && !self.is_tf_terminal(r)
    }

    /// True if the node evaluates to the tautology (plain or extra).
    #[inline]
    pub fn eval_true(&self, r: Ref) -> bool {
        r == Self::TRUE || (self.is_extra_terminal(r) && !r.is_negated())
    }

    /// True if the node evaluates to the empty diagram.
    #[inline]
    pub fn eval_false(&self, r: Ref) -> bool {
        r == Self::FALSE || (self.is_extra_terminal(r) && r.is_negated())
    }

    /// Raw children of a BDD node, negation of `r` not applied.
    #[inline]
    pub(crate) fn bdd_children(&self, r: Ref) -> (Ref, Ref) {
        match self.node(r).data {
            NodeData::Bdd { low, high } => (low, high),
            _ => unreachable!("bdd_children on non-BDD node"),
        }
    }

    /// Low child of a BDD node with the negation of `r` pushed down.
    #[inline]
    pub fn bdd_low(&self, r: Ref) -> Ref {
        self.bdd_children(r).0.neg_cond(r.mask())
    }

    /// High child of a BDD node with the negation of `r` pushed down.
    #[inline]
    pub fn bdd_high(&self, r: Ref) -> Ref {
        self.bdd_children(r).1.neg_cond(r.mask())
    }

    /// The elements of a CDD node, negation of `r` not applied.
    #[inline]
    pub(crate) fn cdd_elems(&self, r: Ref) -> &[Elem] {
        match &self.node(r).data {
            NodeData::Cdd { elems } => elems,
            _ => unreachable!("cdd_elems on non-CDD node"),
        }
    }

    /// The `(lower, upper, child)` intervals of a CDD node with the negation
    /// of `r` pushed onto the children.
    pub fn cdd_intervals(&self, r: Ref) -> Vec<(Raw, Raw, Ref)> {
        let mask = r.mask();
        let mut low = -INF;
        self.cdd_elems(r)
            .iter()
            .map(|e| {
                let iv = (low, e.bnd, e.child.neg_cond(mask));
                low = e.bnd;
                iv
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Reference stack
    // ------------------------------------------------------------------

    /// Pushes an element onto the reference stack used to assemble CDD
    /// nodes. Callers must restore the stack top once the constructed node
    /// has been retained elsewhere.
    pub(crate) fn push_elem(&mut self, child: Ref, bnd: Raw) {
        if self.ref_stack.len() >= self.stack_size {
            self.set_error(CddError::StackOverflow);
            return;
        }
        self.ref_stack.push(Elem::new(child, bnd));
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    /// Saturating increment of the reference count of `r`'s node.
    pub fn inc_ref(&mut self, r: Ref) -> Ref {
        let node = &mut self.nodes[r.index() as usize];
        if node.ref_count != MAXREF {
            node.ref_count += 1;
        }
        r
    }

    /// Saturating decrement without accounting; the node keeps its slot and
    /// sub-table entry even at count zero.
    pub(crate) fn dec_ref(&mut self, r: Ref) {
        let node = &mut self.nodes[r.index() as usize];
        if node.ref_count != MAXREF {
            node.ref_count -= 1;
        }
    }

    /// Removes an external reference. If the count of a node drops to zero,
    /// the counts of its children are decremented iteratively; the dead
    /// nodes stay resurrectable until the next sweep.
    pub fn rec_deref(&mut self, r: Ref) {
        let mut stack = vec![r.index()];
        while let Some(idx) = stack.pop() {
            let rc = self.nodes[idx as usize].ref_count;
            if rc == 0 {
                self.set_error(CddError::Deref);
                return;
            }
            if rc == MAXREF {
                continue;
            }
            self.nodes[idx as usize].ref_count = rc - 1;
            if rc - 1 > 0 {
                continue;
            }
            let node = &self.nodes[idx as usize];
            let level = node.level;
            let (kind, children): (ManagerKind, Vec<u32>) = match &node.data {
                NodeData::Bdd { low, high } => (ManagerKind::Bdd, vec![low.index(), high.index()]),
                NodeData::Cdd { elems } => (
                    ManagerKind::Cdd(elems.len()),
                    elems.iter().map(|e| e.child.index()).collect(),
                ),
                _ => unreachable!("terminal hit zero references"),
            };
            let man = self.manager_mut(kind);
            man.used_count -= 1;
            man.dead_count += 1;
            man.subtable(level).dead += 1;
            stack.extend(children);
        }
    }

    /// Resurrects a dead node by re-incrementing the counts of its whole
    /// subgraph. Does not touch the count of the node itself.
    pub(crate) fn reclaim(&mut self, r: Ref) {
        let mut stack = vec![r.index()];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            let level = node.level;
            let (kind, children): (ManagerKind, Vec<Ref>) = match &node.data {
                NodeData::Bdd { low, high } => (ManagerKind::Bdd, vec![*low, *high]),
                NodeData::Cdd { elems } => {
                    (ManagerKind::Cdd(elems.len()), elems.iter().map(|e| e.child).collect())
                }
                _ => unreachable!("reclaim on terminal"),
            };
            let man = self.manager_mut(kind);
            man.used_count += 1;
            man.dead_count -= 1;
            man.subtable(level).dead -= 1;
            for child in children {
                if self.nodes[child.index() as usize].ref_count == 0 {
                    stack.push(child.index());
                }
                self.inc_ref(child);
            }
        }
    }

    #[inline]
    pub(crate) fn is_dead(&self, r: Ref) -> bool {
        self.node(r).ref_count == 0
    }

    // ------------------------------------------------------------------
    // Managers, allocation, garbage collection
    // ------------------------------------------------------------------

    fn manager(&self, kind: ManagerKind) -> &Manager {
        match kind {
            ManagerKind::Bdd => &self.bdd_man,
            ManagerKind::Cdd(arity) => self.cdd_man[arity].as_ref().unwrap(),
        }
    }

    fn manager_mut(&mut self, kind: ManagerKind) -> &mut Manager {
        match kind {
            ManagerKind::Bdd => &mut self.bdd_man,
            ManagerKind::Cdd(arity) => self.cdd_man[arity].as_mut().unwrap(),
        }
    }

    fn ensure_cdd_manager(&mut self, arity: usize) {
        if self.cdd_man.len() <= arity {
            self.cdd_man.resize_with(arity + 1, || None);
        }
        if self.cdd_man[arity].is_none() {
            self.cdd_man[arity] = Some(Manager::new(ManagerKind::Cdd(arity), self.levels.len()));
            self.max_arity_used = self.max_arity_used.max(arity);
        }
    }

    pub(crate) fn flush_caches(&mut self) {
        let Self {
            ref nodes,
            ref mut apply_cache,
            ref mut quant_cache,
            ref mut replace_cache,
            ref mut relax_cache,
            ..
        } = *self;
        let dead = |r: Ref| nodes[r.index() as usize].ref_count == 0;
        apply_cache.flush(dead);
        quant_cache.flush(dead);
        replace_cache.flush(dead);
        relax_cache.reset();
    }

    fn gbc_manager(&mut self, kind: ManagerKind) {
        if let Some(mut hook) = self.pre_gbc_hook.take() {
            hook();
            self.pre_gbc_hook = Some(hook);
        }
        let start = Instant::now();
        let freed = match kind {
            ManagerKind::Bdd => self.bdd_man.sweep(&mut self.nodes),
            ManagerKind::Cdd(arity) => {
                self.cdd_man[arity].as_mut().unwrap().sweep(&mut self.nodes)
            }
        };
        let elapsed = start.elapsed();
        self.gbc_time += elapsed;
        self.gbc_count += 1;
        debug!("gbc({:?}): freed {} nodes", kind, freed);

        if let Some(mut hook) = self.post_gbc_hook.take() {
            let man = self.manager(kind);
            let stats = GbcStats {
                nodes: man.alloc_count,
                free_nodes: man.free_count,
                time: elapsed,
                sum_time: self.gbc_time,
                num: self.gbc_count,
            };
            hook(&stats);
            self.post_gbc_hook = Some(hook);
        }
    }

    /// Runs the garbage collector over every manager that is worth
    /// sweeping. All operation caches are flushed first.
    pub fn gbc(&mut self) {
        self.flush_caches();
        if self.bdd_man.wants_sweep() {
            self.gbc_manager(ManagerKind::Bdd);
        }
        for arity in 2..=self.max_arity_used {
            if self.cdd_man.get(arity).map_or(false, |m| m.as_ref().is_some_and(Manager::wants_sweep)) {
                self.gbc_manager(ManagerKind::Cdd(arity));
            }
        }
    }

    /// Takes a node slot for `kind`, collecting or growing as the manager's
    /// statistics dictate.
    fn alloc_node(&mut self, kind: ManagerKind) -> Option<NodeId> {
        if !self.manager(kind).has_free() {
            if self.manager(kind).worth_collecting() {
                self.flush_caches();
                self.gbc_manager(kind);
            }
            if !self.manager(kind).has_free() {
                let grown = match kind {
                    ManagerKind::Bdd => self.bdd_man.alloc_chunk(&mut self.nodes),
                    ManagerKind::Cdd(arity) => {
                        self.cdd_man[arity].as_mut().unwrap().alloc_chunk(&mut self.nodes)
                    }
                };
                if !grown {
                    self.set_error(CddError::Memory);
                    return None;
                }
            }
        }
        let id = match kind {
            ManagerKind::Bdd => self.bdd_man.pop_free(&self.nodes),
            ManagerKind::Cdd(arity) => self.cdd_man[arity].as_mut().unwrap().pop_free(&self.nodes),
        };
        Some(id)
    }

    fn rehash(&mut self, kind: ManagerKind, level: u32) {
        if let Some(mut hook) = self.pre_rehash_hook.take() {
            hook();
            self.pre_rehash_hook = Some(hook);
        }
        let start = Instant::now();
        let Self { ref mut nodes, ref mut bdd_man, ref mut cdd_man, .. } = *self;
        let man = match kind {
            ManagerKind::Bdd => bdd_man,
            ManagerKind::Cdd(arity) => cdd_man[arity].as_mut().unwrap(),
        };
        let tbl = man.subtables[level as usize].as_mut().unwrap();
        tbl.rehash(nodes, node_hash);
        let elapsed = start.elapsed();
        self.rehash_time += elapsed;
        self.rehash_count += 1;

        if let Some(mut hook) = self.post_rehash_hook.take() {
            let tbl = self.manager(kind).subtables[level as usize].as_ref().unwrap();
            let stats = RehashStats {
                level,
                buckets: tbl.num_buckets(),
                keys: tbl.keys,
                max: tbl.max_keys,
                time: elapsed,
                sum_time: self.rehash_time,
                num: self.rehash_count,
            };
            hook(&stats);
            self.post_rehash_hook = Some(hook);
        }
    }

    // ------------------------------------------------------------------
    // Hash-consing
    // ------------------------------------------------------------------

    /// Walks the sorted chain of the given BDD bucket. Returns the preceding
    /// node, the node at the insert position and whether it is an exact
    /// match.
    fn bdd_chain_find(&self, level: u32, bucket: usize, low: Ref, high: Ref) -> (NodeId, NodeId, bool) {
        let tbl = self.bdd_man.subtables[level as usize].as_ref().unwrap();
        let key = (low.raw(), high.raw());
        let mut prev = NO_NEXT;
        let mut cur = tbl.head(bucket);
        while cur != NO_NEXT {
            let (clow, chigh) = self.bdd_children(Ref::positive(cur));
            match (clow.raw(), chigh.raw()).cmp(&key) {
                std::cmp::Ordering::Less => {
                    prev = cur;
                    cur = self.nodes[cur as usize].next;
                }
                std::cmp::Ordering::Equal => return (prev, cur, true),
                std::cmp::Ordering::Greater => break,
            }
        }
        (prev, cur, false)
    }

    /// Creates or finds the BDD node `(level, low, high)`.
    ///
    /// The negation of `low` is pushed up onto the returned handle so that
    /// the stored low child is always regular. The returned node is not
    /// referenced.
    pub fn mk_bdd_node(&mut self, level: u32, low: Ref, high: Ref) -> Ref {
        if !self.ok() {
            return Self::FALSE;
        }
        debug!("mk_bdd_node(level = {}, low = {}, high = {})", level, low, high);

        if low == high {
            return low;
        }

        let mask = low.mask();
        let low = low.regular();
        let high = high.neg_cond(mask);

        self.bdd_man.subtable(level);
        let hash = hash_pair(low.raw(), high.raw());
        let bucket = self.bdd_man.subtables[level as usize].as_ref().unwrap().bucket_of(hash);

        let (mut prev, mut cur, found) = self.bdd_chain_find(level, bucket, low, high);
        if found {
            let r = Ref::positive(cur);
            if self.is_dead(r) {
                self.reclaim(r);
            }
            return r.neg_cond(mask);
        }

        self.inc_ref(low);
        self.inc_ref(high);

        let gbc_before = self.gbc_count;
        let Some(id) = self.alloc_node(ManagerKind::Bdd) else {
            return Self::FALSE;
        };
        // A collection re-links the chains; recompute the position.
        if gbc_before != self.gbc_count {
            (prev, cur, _) = self.bdd_chain_find(level, bucket, low, high);
        }

        self.nodes[id as usize] =
            Node { next: cur, level, ref_count: 0, data: NodeData::Bdd { low, high } };
        if prev == NO_NEXT {
            self.bdd_man.subtables[level as usize].as_mut().unwrap().set_head(bucket, id);
        } else {
            self.nodes[prev as usize].next = id;
        }

        let tbl = self.bdd_man.subtables[level as usize].as_mut().unwrap();
        tbl.keys += 1;
        if tbl.needs_rehash() {
            self.rehash(ManagerKind::Bdd, level);
        }

        Ref::positive(id).neg_cond(mask)
    }

    fn cdd_chain_find(&self, kind: ManagerKind, level: u32, bucket: usize, elems: &[Elem]) -> (NodeId, NodeId, bool) {
        let tbl = self.manager(kind).subtables[level as usize].as_ref().unwrap();
        let mut prev = NO_NEXT;
        let mut cur = tbl.head(bucket);
        while cur != NO_NEXT {
            match self.cdd_elems(Ref::positive(cur)).cmp(elems) {
                std::cmp::Ordering::Less => {
                    prev = cur;
                    cur = self.nodes[cur as usize].next;
                }
                std::cmp::Ordering::Equal => return (prev, cur, true),
                std::cmp::Ordering::Greater => break,
            }
        }
        (prev, cur, false)
    }

    /// Creates or finds the CDD node whose element array is the slice of the
    /// reference stack from `first` to the top.
    ///
    /// The caller owns the pushed range: it must drop the temporary child
    /// references and truncate the stack afterwards. The returned node is
    /// not referenced.
    pub fn mk_cdd_node(&mut self, level: u32, first: usize) -> Ref {
        if !self.ok() {
            return Self::FALSE;
        }
        let len = self.ref_stack.len() - first;
        if len == 1 {
            return self.ref_stack[first].child;
        }
        if len > self.max_arity {
            self.set_error(CddError::MaxSize);
            return Self::FALSE;
        }
        let elems: Box<[Elem]> = self.ref_stack[first..].into();
        debug_assert!(!elems[0].child.is_negated(), "first child must be regular");
        debug_assert_eq!(elems[elems.len() - 1].bnd, INF, "last bound must be INF");
        debug_assert!(elems.windows(2).all(|w| w[0].bnd < w[1].bnd), "bounds must ascend");
        debug!("mk_cdd_node(level = {}, len = {})", level, len);

        let kind = ManagerKind::Cdd(len);
        self.ensure_cdd_manager(len);
        self.manager_mut(kind).subtable(level);
        let hash = cdd_hash(&elems);
        let bucket = self.manager(kind).subtables[level as usize].as_ref().unwrap().bucket_of(hash);

        let (mut prev, mut cur, found) = self.cdd_chain_find(kind, level, bucket, &elems);
        if found {
            let r = Ref::positive(cur);
            if self.is_dead(r) {
                self.reclaim(r);
            }
            return r;
        }

        for k in 0..elems.len() {
            self.inc_ref(elems[k].child);
        }

        let gbc_before = self.gbc_count;
        let Some(id) = self.alloc_node(kind) else {
            return Self::FALSE;
        };
        if gbc_before != self.gbc_count {
            (prev, cur, _) = self.cdd_chain_find(kind, level, bucket, &elems);
        }

        self.nodes[id as usize] = Node { next: cur, level, ref_count: 0, data: NodeData::Cdd { elems } };
        if prev == NO_NEXT {
            self.manager_mut(kind).subtables[level as usize].as_mut().unwrap().set_head(bucket, id);
        } else {
            self.nodes[prev as usize].next = id;
        }

        let tbl = self.manager_mut(kind).subtables[level as usize].as_mut().unwrap();
        tbl.keys += 1;
        if tbl.needs_rehash() {
            self.rehash(kind, level);
        }

        Ref::positive(id)
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// The diagram of a boolean variable, identified by its level.
    pub fn mk_var(&mut self, level: u32) -> Ref {
        if level as usize >= self.levels.len() || self.levels[level as usize].is_cdd() {
            self.set_error(CddError::Var);
            return Self::FALSE;
        }
        self.mk_bdd_node(level, Self::FALSE, Self::TRUE)
    }

    pub(crate) fn upper_from_level(&mut self, level: u32, bnd: Raw) -> Ref {
        if bnd == INF {
            return Self::TRUE;
        }
        if bnd == -INF {
            return Self::FALSE;
        }
        let top = self.ref_stack.len();
        self.push_elem(Self::FALSE, bnd);
        self.push_elem(Self::TRUE, INF);
        let node = self.mk_cdd_node(level, top);
        self.ref_stack.truncate(top);
        -node
    }

    pub(crate) fn interval_from_level(&mut self, level: u32, low: Raw, high: Raw) -> Ref {
        if low == -INF && high == INF {
            return Self::TRUE;
        }
        if high == -INF {
            return Self::FALSE;
        }
        // An interval whose bounds cross is empty; the sum of the upper
        // bound and the mirrored lower bound must admit zero.
        if low > -INF && bnd_add(high, bnd_l2u(low)) < LE_ZERO {
            return Self::FALSE;
        }
        let top = self.ref_stack.len();
        if low > -INF {
            self.push_elem(Self::FALSE, low);
            self.push_elem(Self::TRUE, high);
            if high < INF {
                self.push_elem(Self::FALSE, INF);
            }
            let node = self.mk_cdd_node(level, top);
            self.ref_stack.truncate(top);
            node
        } else {
            self.push_elem(Self::FALSE, high);
            self.push_elem(Self::TRUE, INF);
            let node = self.mk_cdd_node(level, top);
            self.ref_stack.truncate(top);
            -node
        }
    }

    /// The diagram of the constraint `x_i - x_j <~ bnd` (`bnd` is an upper
    /// bound raw).
    pub fn upper(&mut self, i: u32, j: u32, bnd: Raw) -> Ref {
        if i >= self.clock_count || j >= self.clock_count || i == j {
            self.set_error(CddError::Range);
            return Self::FALSE;
        }
        if i > j {
            let level = self.diff2level[difference(i, j) as usize];
            self.upper_from_level(level, bnd)
        } else {
            let level = self.diff2level[difference(j, i) as usize];
            -self.upper_from_level(level, bnd_u2l(bnd))
        }
    }

    /// The diagram of `low <~ x_i - x_j <~ high` (`low` is a lower bound
    /// raw, `high` an upper bound raw).
    pub fn interval(&mut self, i: u32, j: u32, low: Raw, high: Raw) -> Ref {
        if i >= self.clock_count || j >= self.clock_count || i == j {
            self.set_error(CddError::Range);
            return Self::FALSE;
        }
        if i > j {
            let level = self.diff2level[difference(i, j) as usize];
            self.interval_from_level(level, low, high)
        } else {
            let level = self.diff2level[difference(j, i) as usize];
            self.interval_from_level(level, bnd_u2l(high), bnd_l2u(low))
        }
    }

    // ------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------

    /// The number of distinct non-terminal nodes of the diagram.
    pub fn nodecount(&self, r: Ref) -> i32 {
        let mut marked = crate::bitset::BitSet::new(self.nodes.len());
        let mut count = 0;
        let mut stack = vec![r];
        while let Some(r) = stack.pop() {
            if self.is_terminal(r) || !marked.insert(r.index() as usize) {
                continue;
            }
            count += 1;
            match &self.node(r).data {
                NodeData::Bdd { low, high } => {
                    stack.push(*low);
                    stack.push(*high);
                }
                NodeData::Cdd { elems } => stack.extend(elems.iter().map(|e| e.child)),
                _ => unreachable!(),
            }
        }
        count
    }

    /// The number of edges of the diagram.
    pub fn edgecount(&self, r: Ref) -> i32 {
        let mut marked = crate::bitset::BitSet::new(self.nodes.len());
        let mut count = 0;
        let mut stack = vec![r];
        while let Some(r) = stack.pop() {
            if self.is_terminal(r) || !marked.insert(r.index() as usize) {
                continue;
            }
            match &self.node(r).data {
                NodeData::Bdd { low, high } => {
                    count += 2;
                    stack.push(*low);
                    stack.push(*high);
                }
                NodeData::Cdd { elems } => {
                    count += elems.len() as i32;
                    stack.extend(elems.iter().map(|e| e.child));
                }
                _ => unreachable!(),
            }
        }
        count
    }

    // ------------------------------------------------------------------
    // Hooks and statistics
    // ------------------------------------------------------------------

    pub fn set_pregbc_hook(&mut self, hook: Option<Box<dyn FnMut()>>) {
        self.pre_gbc_hook = hook;
    }
    pub fn set_postgbc_hook(&mut self, hook: Option<GbcHook>) {
        self.post_gbc_hook = hook;
    }
    pub fn set_prerehash_hook(&mut self, hook: Option<Box<dyn FnMut()>>) {
        self.pre_rehash_hook = hook;
    }
    pub fn set_postrehash_hook(&mut self, hook: Option<RehashHook>) {
        self.post_rehash_hook = hook;
    }

    /// Number of collections run so far.
    pub fn gbc_runs(&self) -> i32 {
        self.gbc_count
    }

    /// Number of sub-table rehashes so far.
    pub fn rehash_runs(&self) -> i32 {
        self.rehash_count
    }
}

impl Default for Cdd {
    /// A session with the default parameters `(64, 10000, 10000)` and no
    /// GC/rehash diagnostics installed.
    fn default() -> Self {
        let mut cdd = Cdd::new(64, 10000, 10000).expect("default parameters are valid");
        cdd.set_postgbc_hook(None);
        cdd.set_postrehash_hook(None);
        cdd
    }
}

impl std::fmt::Debug for Cdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cdd")
            .field("levels", &self.levels.len())
            .field("clocks", &self.clock_count)
            .field("bddvars", &self.var_count)
            .field("arena", &self.nodes.len())
            .finish()
    }
}

/// Hash of a node record, dispatching on its kind. Shared by the hash-cons
/// lookup and the rehash walk.
pub(crate) fn node_hash(node: &Node) -> u32 {
    match &node.data {
        NodeData::Bdd { low, high } => hash_pair(low.raw(), high.raw()),
        NodeData::Cdd { elems } => cdd_hash(elems),
        _ => 0,
    }
}

fn cdd_hash(elems: &[Elem]) -> u32 {
    hash_words(
        elems.iter().flat_map(|e| [e.child.raw(), e.bnd as u32]),
        elems.len() as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_terminals() {
        let cdd = Cdd::default();
        assert!(cdd.is_terminal(Cdd::TRUE));
        assert!(cdd.is_terminal(Cdd::FALSE));
        assert_eq!(-Cdd::FALSE, Cdd::TRUE);
        assert_eq!(-(-Cdd::FALSE), Cdd::FALSE);
    }

    #[test]
    fn test_hash_cons_is_unique() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let x = cdd.mk_var(b);
        let y = cdd.mk_var(b);
        assert_eq!(x, y);

        let v1 = cdd.mk_var(b + 1);
        let n1 = cdd.mk_bdd_node(b, Cdd::FALSE, v1);
        let v2 = cdd.mk_var(b + 1);
        let n2 = cdd.mk_bdd_node(b, Cdd::FALSE, v2);
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_negated_low_is_pushed_up() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let v = cdd.mk_var(b + 1);
        let node = cdd.mk_bdd_node(b, -v, v);
        assert!(node.is_negated());
        let (low, _) = cdd.bdd_children(node);
        assert!(!low.is_negated());
        // The semantics are unchanged: low child of the handle is still ~v.
        assert_eq!(cdd.bdd_low(node), -v);
        assert_eq!(cdd.bdd_high(node), v);
    }

    #[test]
    fn test_redundant_node_collapses() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let v = cdd.mk_var(b + 1);
        assert_eq!(cdd.mk_bdd_node(b, v, v), v);
    }

    #[test]
    fn test_interval_shapes() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);
        use crate::bounds::{bnd_lower, bnd_upper};

        // 1 <= x1 - x0 <= 5 has three intervals.
        let iv = cdd.interval(1, 0, bnd_lower(1, false), bnd_upper(5, false));
        assert!(!cdd.is_terminal(iv));
        assert_eq!(cdd.cdd_elems(iv).len(), 3);

        // x1 - x0 <= 5 alone has two, negated handle.
        let up = cdd.upper(1, 0, bnd_upper(5, false));
        assert!(up.is_negated());
        assert_eq!(cdd.cdd_elems(up).len(), 2);

        // Unbounded on both sides is the tautology.
        assert_eq!(cdd.interval(1, 0, -INF, INF), Cdd::TRUE);
        assert_eq!(cdd.upper(1, 0, INF), Cdd::TRUE);
        assert_eq!(cdd.upper(1, 0, -INF), Cdd::FALSE);

        // Crossed bounds make an empty interval.
        assert_eq!(cdd.interval(1, 0, bnd_lower(5, false), bnd_upper(3, false)), Cdd::FALSE);
        assert_eq!(cdd.interval(1, 0, bnd_lower(5, true), bnd_upper(5, false)), Cdd::FALSE);
        // A single point is not empty.
        assert_ne!(cdd.interval(1, 0, bnd_lower(5, false), bnd_upper(5, false)), Cdd::FALSE);
    }

    #[test]
    fn test_mirrored_interval_is_same_node() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        use crate::bounds::{bnd_lower, bnd_upper};
        // 2 <= x1 - x0 <= 5  is  -5 <= x0 - x1 <= -2.
        let a = cdd.interval(1, 0, bnd_lower(2, false), bnd_upper(5, false));
        let b = cdd.interval(0, 1, bnd_lower(-5, false), bnd_upper(-2, false));
        assert_eq!(a, b);
    }

    #[test]
    fn test_refcount_saturates() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(1);
        let v = cdd.mk_var(b);
        for _ in 0..(MAXREF + 10) {
            cdd.inc_ref(v);
        }
        assert_eq!(cdd.node(v).ref_count, MAXREF);
        // Frozen: rec_deref leaves the count alone.
        cdd.rec_deref(v);
        assert_eq!(cdd.node(v).ref_count, MAXREF);
        assert_eq!(cdd.error_cond(), None);
    }

    #[test]
    fn test_rec_deref_marks_subgraph_dead() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let v = cdd.mk_var(b + 1);
        cdd.inc_ref(v);
        let node = cdd.mk_bdd_node(b, Cdd::FALSE, v);
        cdd.inc_ref(node);
        // v is held once externally and once by node.
        assert_eq!(cdd.node(v).ref_count, 2);

        cdd.rec_deref(node);
        assert!(cdd.is_dead(node));
        assert_eq!(cdd.node(v).ref_count, 1);
        assert_eq!(cdd.bdd_man.dead_count, 1);

        // Remaking the node resurrects it.
        let again = cdd.mk_bdd_node(b, Cdd::FALSE, v);
        assert_eq!(again, node);
        assert_eq!(cdd.node(v).ref_count, 2);
        assert_eq!(cdd.bdd_man.dead_count, 0);
    }

    #[test]
    fn test_gc_churn_fires_hook_and_keeps_live_nodes() {
        let mut cdd = Cdd::default();
        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        cdd.set_postgbc_hook(Some(Box::new(move |_| {
            fired2.set(fired2.get() + 1);
        })));

        let b = cdd.add_bddvar(2);
        let x = cdd.mk_var(b);
        cdd.inc_ref(x);
        let y = cdd.mk_var(b + 1);
        cdd.inc_ref(y);
        let held = cdd.apply(x, y, Op::And);
        cdd.inc_ref(held);
        let held_count = cdd.nodecount(held);

        // Churn through several chunks worth of short-lived nodes.
        let per_chunk = crate::manager::CHUNK_SIZE / std::mem::size_of::<Node>();
        for i in 0..(3 * per_chunk as u32) {
            let lvl = cdd.add_bddvar(1);
            let v = cdd.mk_var(lvl);
            let n = cdd.apply(v, held, Op::And);
            cdd.inc_ref(n);
            cdd.rec_deref(n);
            let _ = i;
        }

        assert!(fired.get() >= 1, "collector never ran");
        assert_eq!(cdd.nodecount(held), held_count);
        assert_eq!(cdd.apply(x, y, Op::And), held);
        assert_eq!(cdd.error_cond(), None);
    }

    #[test]
    fn test_rehash_keeps_nodes_discoverable() {
        let mut cdd = Cdd::default();
        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        cdd.set_postrehash_hook(Some(Box::new(move |_| {
            fired2.set(fired2.get() + 1);
        })));

        // 2 * max_keys distinct pairs at level 0 force at least one rehash.
        let n = 2 * 1024 + 1;
        let first = cdd.add_bddvar(n + 1);
        let mut made = Vec::new();
        for i in 1..=n {
            let high = cdd.mk_var(first + i);
            cdd.inc_ref(high);
            let node = cdd.mk_bdd_node(first, Cdd::FALSE, high);
            cdd.inc_ref(node);
            made.push((first + i, node));
        }
        assert!(fired.get() >= 1, "rehash never ran");
        for (var, node) in made {
            let high = cdd.mk_var(var);
            assert_eq!(cdd.mk_bdd_node(first, Cdd::FALSE, high), node);
        }
    }

    #[test]
    fn test_extra_terminals() {
        let mut cdd = Cdd::default();
        cdd.add_tautologies(2);
        let t0 = cdd.tautology(0);
        let t1 = cdd.tautology(1);
        assert_ne!(t0, t1);
        assert!(cdd.is_extra_terminal(t0));
        assert!(cdd.eval_true(t0));
        assert!(cdd.eval_false(-t0));
        assert_eq!(cdd.tautology_id(t0), Some(0));
        assert_eq!(cdd.tautology_id(t1), Some(1));
        assert_eq!(cdd.tautology_id(Cdd::TRUE), None);

        // Conjoining with a true diagram keeps the distinguishable terminal.
        assert_eq!(cdd.apply_tautology(Cdd::TRUE, 0), t0);
    }

    #[test]
    fn test_error_latches_and_short_circuits() {
        let mut cdd = Cdd::new(2, 100, 100).unwrap();
        cdd.add_clocks(3);
        use crate::bounds::{bnd_lower, bnd_upper};
        // Arity 3 exceeds max_arity 2.
        let iv = cdd.interval(1, 0, bnd_lower(1, false), bnd_upper(5, false));
        assert_eq!(iv, Cdd::FALSE);
        assert_eq!(cdd.error_cond(), Some(CddError::MaxSize));
        // Latched: further constructors bail out immediately.
        assert_eq!(cdd.mk_bdd_node(0, Cdd::FALSE, Cdd::TRUE), Cdd::FALSE);
    }
}
