//! Canonicalisation: pruning infeasible paths from a diagram.
//!
//! The reducers walk a diagram depth-first, pushing the bounds of the
//! current path as edges of a constraint graph and skipping every child
//! whose path has become inconsistent. The result is pseudo-canonical: a
//! tautology collapses to `TRUE` and an unsatisfiable diagram to `FALSE`;
//! other diagrams are merely guaranteed to contain no dead path.
//!
//! Two graph back-ends answer the consistency queries: Tarjan's algorithm
//! (the default) and a naive Bellman–Ford used for cross-checking.

use crate::bellmanford::BellmanFord;
use crate::bounds::{bnd_l2u, Raw, INF};
use crate::cdd::{Cdd, Op};
use crate::node::LevelKind;
use crate::reference::Ref;
use crate::tarjan::Tarjan;

impl Cdd {
    /// Brings a diagram into reduced form using Tarjan's algorithm.
    pub fn reduce(&mut self, node: Ref) -> Ref {
        let mut graph = Tarjan::new(self.clock_count.max(1));
        self.tarjan_reduce_rec(node, &mut graph)
    }

    /// Brings a diagram into reduced form using plain Bellman–Ford.
    /// Slower than [`Cdd::reduce`]; kept for cross-checking.
    pub fn bf_reduce(&mut self, node: Ref) -> Ref {
        let mut graph = BellmanFord::new(self.clock_count.max(1));
        self.bf_reduce_rec(node, &mut graph)
    }

    /// Semantic equivalence: the reduced exclusive-or is empty.
    pub fn equiv(&mut self, c: Ref, d: Ref) -> bool {
        let x = self.apply_xor(c, d);
        self.inc_ref(x);
        let r = self.reduce(x);
        self.inc_ref(r);
        self.rec_deref(x);
        self.rec_deref(r);
        r == Self::FALSE
    }

    fn tarjan_reduce_rec(&mut self, node: Ref, graph: &mut Tarjan) -> Ref {
        if self.is_terminal(node) {
            return node;
        }

        let level = self.level_of(node);
        let node_mask = node.mask();
        match self.levels[level as usize].kind {
            LevelKind::Bdd => {
                let (low, high) = self.bdd_children(node.regular());
                let n = self.tarjan_reduce_rec(low.neg_cond(node_mask), graph);
                self.inc_ref(n);
                let h = self.tarjan_reduce_rec(high.neg_cond(node_mask), graph);
                let res = self.mk_bdd_node(level, n, h);
                self.dec_ref(n);
                res
            }
            LevelKind::Cdd { clock1: c1, clock2: c2, .. } => {
                let elems = self.cdd_elems(node.regular()).to_vec();
                let mut modified = false;
                let mut k = 0;

                // Find the first consistent child. Lower bounds do not
                // matter here: every edge to the left is inconsistent.
                graph.push(c1, c2, elems[0].bnd);
                while !graph.consistent() {
                    modified = true;
                    graph.pop(c1);
                    k += 1;
                    let bnd = elems[k].bnd;
                    if bnd == INF {
                        // Only the last child survives; the node is void.
                        return self.tarjan_reduce_rec(elems[k].child.neg_cond(node_mask), graph);
                    }
                    graph.push(c1, c2, bnd);
                }

                let mut prev = self.tarjan_reduce_rec(elems[k].child.neg_cond(node_mask), graph);
                let mask = prev.mask();
                self.inc_ref(prev);
                graph.pop(c1);
                modified |= prev != elems[k].child.neg_cond(node_mask);

                // Walk the remaining children until the lower bound alone
                // becomes inconsistent.
                let top = self.ref_stack.len();
                for idx in (k + 1)..elems.len() {
                    let lower = elems[idx - 1].bnd;
                    graph.push(c2, c1, bnd_l2u(lower));
                    if !graph.consistent() {
                        modified = true;
                        graph.pop(c2);
                        break;
                    }

                    let bnd = elems[idx].bnd;
                    let n = if bnd < INF {
                        graph.push(c1, c2, bnd);
                        let n = self.tarjan_reduce_rec(elems[idx].child.neg_cond(node_mask), graph);
                        graph.pop(c1);
                        n
                    } else {
                        self.tarjan_reduce_rec(elems[idx].child.neg_cond(node_mask), graph)
                    };

                    modified |= n != elems[idx].child.neg_cond(node_mask);
                    if prev != n {
                        self.push_elem(prev.neg_cond(mask), lower);
                        prev = n;
                        self.inc_ref(prev);
                    }
                    graph.pop(c2);
                }
                self.push_elem(prev.neg_cond(mask), INF);

                let res = if modified {
                    self.mk_cdd_node(level, top).neg_cond(mask)
                } else {
                    node
                };

                for i in top..self.ref_stack.len() {
                    let child = self.ref_stack[i].child;
                    self.dec_ref(child);
                }
                self.ref_stack.truncate(top);
                res
            }
        }
    }

    fn bf_reduce_rec(&mut self, node: Ref, graph: &mut BellmanFord) -> Ref {
        if self.is_terminal(node) {
            return node;
        }

        let level = self.level_of(node);
        let node_mask = node.mask();
        match self.levels[level as usize].kind {
            LevelKind::Bdd => {
                let (low, high) = self.bdd_children(node.regular());
                let n = self.bf_reduce_rec(low.neg_cond(node_mask), graph);
                self.inc_ref(n);
                let h = self.bf_reduce_rec(high.neg_cond(node_mask), graph);
                let res = self.mk_bdd_node(level, n, h);
                self.dec_ref(n);
                res
            }
            LevelKind::Cdd { clock1: c1, clock2: c2, .. } => {
                let elems = self.cdd_elems(node.regular()).to_vec();
                let mut k = 0;

                graph.push(c1, c2, elems[0].bnd);
                while !graph.consistent() {
                    graph.pop();
                    k += 1;
                    let bnd = elems[k].bnd;
                    if bnd == INF {
                        return self.bf_reduce_rec(elems[k].child.neg_cond(node_mask), graph);
                    }
                    graph.push(c1, c2, bnd);
                }

                let mut prev = self.bf_reduce_rec(elems[k].child.neg_cond(node_mask), graph);
                let mask = prev.mask();
                self.inc_ref(prev);

                let top = self.ref_stack.len();
                for idx in (k + 1)..elems.len() {
                    let lower = elems[idx - 1].bnd;
                    // Drop the previous edge of this node, keep the lower
                    // bound of the current interval.
                    graph.pop();
                    graph.push(c2, c1, bnd_l2u(lower));
                    if !graph.consistent() {
                        break;
                    }

                    let bnd = elems[idx].bnd;
                    let n = if bnd < INF {
                        graph.push(c1, c2, bnd);
                        let n = self.bf_reduce_rec(elems[idx].child.neg_cond(node_mask), graph);
                        graph.pop();
                        n
                    } else {
                        self.bf_reduce_rec(elems[idx].child.neg_cond(node_mask), graph)
                    };

                    if prev != n {
                        self.push_elem(prev.neg_cond(mask), lower);
                        prev = n;
                        self.inc_ref(prev);
                    }
                }
                graph.pop();
                self.push_elem(prev.neg_cond(mask), INF);

                let res = self.mk_cdd_node(level, top).neg_cond(mask);

                for i in top..self.ref_stack.len() {
                    let child = self.ref_stack[i].child;
                    self.dec_ref(child);
                }
                self.ref_stack.truncate(top);
                res
            }
        }
    }

    /// Performs a binary operation and reduces the result in one pass,
    /// skipping children whose path is already infeasible.
    pub fn apply_reduce(&mut self, l: Ref, r: Ref, op: Op) -> Ref {
        let mut graph = Tarjan::new(self.clock_count.max(1));
        let res = self.apply_reduce_rec(l, r, op, &mut graph);
        if self.ok() {
            res
        } else {
            Self::FALSE
        }
    }

    fn apply_reduce_rec(&mut self, l: Ref, r: Ref, op: Op, graph: &mut Tarjan) -> Ref {
        if !self.ok() {
            return Self::FALSE;
        }

        match op {
            Op::And => {
                if l == r || r == Self::TRUE {
                    return self.tarjan_reduce_rec(l, graph);
                }
                if l == Self::FALSE || r == Self::FALSE || l == -r {
                    return Self::FALSE;
                }
                if l == Self::TRUE {
                    return self.tarjan_reduce_rec(r, graph);
                }
                if self.is_extra_terminal(l) {
                    return if l.is_negated() { l } else { self.tarjan_reduce_rec(r, graph) };
                }
                if self.is_extra_terminal(r) {
                    return if r.is_negated() { r } else { self.tarjan_reduce_rec(l, graph) };
                }
            }
            Op::Xor => {
                if l == r {
                    return Self::FALSE;
                }
                if l == -r {
                    return Self::TRUE;
                }
                if l == Self::FALSE {
                    return self.tarjan_reduce_rec(r, graph);
                }
                if r == Self::FALSE {
                    return self.tarjan_reduce_rec(l, graph);
                }
                if l == Self::TRUE {
                    return self.tarjan_reduce_rec(-r, graph);
                }
                if r == Self::TRUE {
                    return self.tarjan_reduce_rec(-l, graph);
                }
                if self.is_extra_terminal(l) {
                    let other = if l.is_negated() { r } else { -r };
                    return self.tarjan_reduce_rec(other, graph);
                }
                if self.is_extra_terminal(r) {
                    let other = if r.is_negated() { l } else { -l };
                    return self.tarjan_reduce_rec(other, graph);
                }
            }
        }

        let (l, r) = if l.raw() > r.raw() { (r, l) } else { (l, r) };

        // A cached apply result is reduced under the current path; the
        // reduction itself is path-dependent and never cached.
        let hash = crate::apply::apply_hash(l, r, op);
        if let Some(res) = self.apply_cache.lookup(hash, l, r, op as u64) {
            if self.is_dead(res) {
                self.reclaim(res);
            }
            self.inc_ref(res);
            let reduced = self.tarjan_reduce_rec(res, graph);
            self.inc_ref(reduced);
            self.rec_deref(res);
            self.dec_ref(reduced);
            return reduced;
        }

        let lmask = l.mask();
        let rmask = r.mask();
        let lreg = l.regular();
        let rreg = r.regular();
        let llv = self.level_of(lreg);
        let rlv = self.level_of(rreg);
        let top_level = llv.min(rlv);

        match self.levels[top_level as usize].kind {
            LevelKind::Cdd { clock1: c1, clock2: c2, .. } => {
                use crate::node::Elem;
                let le: Vec<Elem> = if llv <= rlv {
                    self.cdd_elems(lreg).to_vec()
                } else {
                    vec![Elem::new(lreg, INF)]
                };
                let re: Vec<Elem> = if llv >= rlv {
                    self.cdd_elems(rreg).to_vec()
                } else {
                    vec![Elem::new(rreg, INF)]
                };

                let top = self.ref_stack.len();
                let (mut li, mut ri) = (0usize, 0usize);

                // Find the first consistent combined interval; only upper
                // bounds matter for it.
                let mut bnd = le[li].bnd.min(re[ri].bnd);
                graph.push(c1, c2, bnd);
                while !graph.consistent() {
                    graph.pop(c1);
                    if le[li].bnd == bnd {
                        li += 1;
                    }
                    if re[ri].bnd == bnd {
                        ri += 1;
                    }
                    bnd = le[li].bnd.min(re[ri].bnd);
                    if bnd == INF {
                        return self.apply_reduce_rec(
                            le[li].child.neg_cond(lmask),
                            re[ri].child.neg_cond(rmask),
                            op,
                            graph,
                        );
                    }
                    graph.push(c1, c2, bnd);
                }

                let mut prev = self.apply_reduce_rec(
                    le[li].child.neg_cond(lmask),
                    re[ri].child.neg_cond(rmask),
                    op,
                    graph,
                );
                self.inc_ref(prev);
                let mask = prev.mask();
                graph.pop(c1);

                // Intermediate intervals carry both their lower and their
                // upper bound; stop early once the lower bound alone is
                // infeasible, which dooms every remaining child too.
                if le[li].bnd == bnd {
                    li += 1;
                }
                if re[ri].bnd == bnd {
                    ri += 1;
                }
                let mut lower = bnd;
                bnd = le[li].bnd.min(re[ri].bnd);
                graph.push(c2, c1, bnd_l2u(lower));
                while bnd < INF && graph.consistent() {
                    graph.push(c1, c2, bnd);
                    let n = self.apply_reduce_rec(
                        le[li].child.neg_cond(lmask),
                        re[ri].child.neg_cond(rmask),
                        op,
                        graph,
                    );
                    graph.pop(c1);
                    graph.pop(c2);

                    if n != prev {
                        self.push_elem(prev.neg_cond(mask), lower);
                        prev = n;
                        self.inc_ref(prev);
                    }

                    if le[li].bnd == bnd {
                        li += 1;
                    }
                    if re[ri].bnd == bnd {
                        ri += 1;
                    }
                    lower = bnd;
                    bnd = le[li].bnd.min(re[ri].bnd);
                    graph.push(c2, c1, bnd_l2u(lower));
                }

                // The last child still needs its recursion, but only on a
                // consistent path.
                if bnd == INF && graph.consistent() {
                    let n = self.apply_reduce_rec(
                        le[li].child.neg_cond(lmask),
                        re[ri].child.neg_cond(rmask),
                        op,
                        graph,
                    );
                    if n != prev {
                        self.push_elem(prev.neg_cond(mask), lower);
                        prev = n;
                        self.inc_ref(prev);
                    }
                }

                graph.pop(c2);
                self.push_elem(prev.neg_cond(mask), INF);

                let res = self.mk_cdd_node(top_level, top).neg_cond(mask);

                for i in top..self.ref_stack.len() {
                    let child = self.ref_stack[i].child;
                    self.dec_ref(child);
                }
                self.ref_stack.truncate(top);
                res
            }
            LevelKind::Bdd => {
                let (ll, lh) = if llv <= rlv { self.bdd_children(lreg) } else { (lreg, lreg) };
                let (rl, rh) = if llv >= rlv { self.bdd_children(rreg) } else { (rreg, rreg) };

                let low =
                    self.apply_reduce_rec(ll.neg_cond(lmask), rl.neg_cond(rmask), op, graph);
                self.inc_ref(low);
                let high =
                    self.apply_reduce_rec(lh.neg_cond(lmask), rh.neg_cond(rmask), op, graph);
                let res = self.mk_bdd_node(top_level, low, high);
                self.dec_ref(low);
                res
            }
        }
    }

    // ------------------------------------------------------------------
    // Interval-merging reduction
    // ------------------------------------------------------------------

    fn add_bound(&mut self, c: Ref, level: u32, low: Raw, up: Raw) -> Ref {
        if low == -INF && up == INF {
            return c;
        }
        let bound = self.interval_from_level(level, low, up);
        self.inc_ref(bound);
        let res = self.apply_and(c, bound);
        self.inc_ref(res);
        self.rec_deref(bound);
        self.dec_ref(res);
        res
    }

    /// Merges neighbouring intervals whose split and join are equivalent.
    ///
    /// A complementary reduction to [`Cdd::reduce`]: instead of removing
    /// infeasible paths it coarsens the interval partitions, at the price of
    /// an equivalence check per neighbour pair.
    pub fn reduce2(&mut self, node: Ref) -> Ref {
        self.reduce2_rec(node)
    }

    fn reduce2_rec(&mut self, node: Ref) -> Ref {
        if self.is_terminal(node) {
            return node;
        }

        let level = self.level_of(node);
        match self.levels[level as usize].kind {
            LevelKind::Bdd => {
                let low = self.bdd_low(node);
                let high = self.bdd_high(node);
                let tmp1 = self.reduce2_rec(low);
                self.inc_ref(tmp1);
                let tmp2 = self.reduce2_rec(high);
                self.inc_ref(tmp2);
                let res = self.mk_bdd_node(level, tmp1, tmp2);
                self.dec_ref(tmp1);
                self.dec_ref(tmp2);
                res
            }
            LevelKind::Cdd { .. } => {
                let ivs = self.cdd_intervals(node);
                let mut res = Self::FALSE;
                let mut low = ivs[0].0;
                let mut prev = ivs[0].2;
                self.inc_ref(prev);

                for &(iv_low, iv_up, child) in &ivs[1..] {
                    // Would splitting at iv_low change anything?
                    let tmp1 = self.add_bound(prev, level, low, iv_low);
                    self.inc_ref(tmp1);
                    let tmp2 = self.add_bound(child, level, iv_low, iv_up);
                    self.inc_ref(tmp2);
                    let split = self.apply_or(tmp1, tmp2);
                    self.inc_ref(split);
                    self.rec_deref(tmp1);
                    self.rec_deref(tmp2);

                    let union = self.apply_or(prev, child);
                    self.inc_ref(union);
                    let join = self.add_bound(union, level, low, iv_up);
                    self.inc_ref(join);

                    if self.equiv(split, join) {
                        // Merge: the union covers both intervals.
                        self.rec_deref(prev);
                        prev = union;
                    } else {
                        self.rec_deref(union);

                        let tmp1 = self.reduce2_rec(prev);
                        self.inc_ref(tmp1);
                        let tmp2 = self.add_bound(tmp1, level, low, iv_low);
                        self.inc_ref(tmp2);
                        let tmp3 = self.apply_or(res, tmp2);
                        self.inc_ref(tmp3);
                        self.rec_deref(tmp1);
                        self.rec_deref(tmp2);
                        self.rec_deref(res);
                        res = tmp3;

                        self.rec_deref(prev);
                        prev = child;
                        self.inc_ref(prev);
                        low = iv_low;
                    }
                    self.rec_deref(split);
                    self.rec_deref(join);
                }

                let tmp1 = self.reduce2_rec(prev);
                self.inc_ref(tmp1);
                let tmp2 = self.add_bound(tmp1, level, low, INF);
                self.inc_ref(tmp2);
                let tmp3 = self.apply_or(res, tmp2);
                self.inc_ref(tmp3);
                self.rec_deref(tmp1);
                self.rec_deref(tmp2);
                self.rec_deref(res);
                self.rec_deref(prev);
                let res = tmp3;
                self.dec_ref(res);
                res
            }
        }
    }
}
