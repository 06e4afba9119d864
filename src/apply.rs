//! The apply kernel: binary operations with negation push-down.
//!
//! `apply` walks two diagrams simultaneously. On BDD levels it recurses on
//! the two cofactor pairs; on CDD levels it merges the two interval
//! partitions, advancing whichever side has the smaller upper bound and
//! recursing once per combined interval. The negation flags of the
//! arguments are pushed onto the children of every recursive call, and the
//! flag of the first child result is pushed back up onto the created node so
//! the stored representation stays canonical.

use log::{debug, warn};

use crate::bounds::INF;
use crate::cdd::{Cdd, Op};
use crate::node::Elem;
use crate::reference::Ref;

const P1: u64 = 12582917;
const P2: u64 = 4256249;

#[inline]
pub(crate) fn apply_hash(l: Ref, r: Ref, op: Op) -> u64 {
    (op as u64)
        .wrapping_add(l.raw() as u64)
        .wrapping_mul(P1)
        .wrapping_add(r.raw() as u64)
        .wrapping_mul(P2)
}

impl Cdd {
    /// Performs a binary operation on two diagrams.
    ///
    /// The result is not referenced.
    pub fn apply(&mut self, l: Ref, r: Ref, op: Op) -> Ref {
        debug!("apply({}, {}, {:?})", l, r, op);
        let res = self.apply_rec(l, r, op, false);
        if self.ok() {
            res
        } else {
            Self::FALSE
        }
    }

    /// Conjunction.
    pub fn apply_and(&mut self, l: Ref, r: Ref) -> Ref {
        self.apply(l, r, Op::And)
    }

    /// Exclusive or.
    pub fn apply_xor(&mut self, l: Ref, r: Ref) -> Ref {
        self.apply(l, r, Op::Xor)
    }

    /// Disjunction, by De Morgan over the conjunction.
    pub fn apply_or(&mut self, l: Ref, r: Ref) -> Ref {
        -self.apply(-l, -r, Op::And)
    }

    /// `(f ∧ g) ∨ (¬f ∧ h)`.
    pub fn ite(&mut self, f: Ref, g: Ref, h: Ref) -> Ref {
        let g = self.apply_and(f, g);
        self.inc_ref(g);
        let h = self.apply_and(-f, h);
        self.inc_ref(h);
        let res = self.apply_or(g, h);
        self.inc_ref(res);
        self.rec_deref(g);
        self.rec_deref(h);
        self.dec_ref(res);
        res
    }

    /// Rebuilds `r` with every negation flag pushed towards the terminals,
    /// by running the conjunction `r ∧ r` with the shortcut table disabled.
    pub fn push_negate(&mut self, r: Ref) -> Ref {
        let res = self.apply_rec(r, r, Op::And, true);
        if self.ok() {
            res
        } else {
            Self::FALSE
        }
    }

    pub(crate) fn apply_rec(&mut self, l: Ref, r: Ref, op: Op, forced: bool) -> Ref {
        if !self.ok() {
            return Self::FALSE;
        }

        if !forced {
            match op {
                Op::And => {
                    if l == r || r == Self::TRUE {
                        return l;
                    }
                    if l == Self::FALSE || r == Self::FALSE || l == -r {
                        return Self::FALSE;
                    }
                    if l == Self::TRUE {
                        return r;
                    }
                    // An extra terminal acts as TRUE; negated it dominates.
                    if self.is_extra_terminal(l) {
                        return if l.is_negated() { l } else { r };
                    }
                    if self.is_extra_terminal(r) {
                        return if r.is_negated() { r } else { l };
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
                        return r;
                    }
                    if r == Self::FALSE {
                        return l;
                    }
                    if l == Self::TRUE {
                        return -r;
                    }
                    if r == Self::TRUE {
                        return -l;
                    }
                    if self.is_extra_terminal(l) {
                        return if l.is_negated() { r } else { -r };
                    }
                    if self.is_extra_terminal(r) {
                        return if r.is_negated() { l } else { -l };
                    }
                }
            }
        }

        // Both operations are symmetric; normalise the argument order for
        // better cache performance.
        let (l, r) = if l.raw() > r.raw() { (r, l) } else { (l, r) };

        if self.is_terminal(l) && self.is_terminal(r) {
            if l != r {
                warn!("{:?} between distinct extra terminal nodes", op);
            }
            return l;
        }

        let hash = apply_hash(l, r, op);
        if let Some(res) = self.apply_cache.lookup(hash, l, r, op as u64) {
            if self.is_dead(res) {
                self.reclaim(res);
            }
            return res;
        }

        // Push the negation bits down onto the children.
        let lmask = l.mask();
        let rmask = r.mask();
        let lreg = l.regular();
        let rreg = r.regular();
        let llv = self.level_of(lreg);
        let rlv = self.level_of(rreg);
        let top_level = llv.min(rlv);

        let res = if self.levels[top_level as usize].is_cdd() {
            // Promote the deeper argument to a one-interval fake node.
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

            let mut prev =
                self.apply_rec(le[0].child.neg_cond(lmask), re[0].child.neg_cond(rmask), op, forced);
            self.inc_ref(prev);
            let mask = prev.mask();
            let mut bnd = le[li].bnd.min(re[ri].bnd);

            while bnd < INF {
                if le[li].bnd == bnd {
                    li += 1;
                }
                if re[ri].bnd == bnd {
                    ri += 1;
                }
                let n = self.apply_rec(
                    le[li].child.neg_cond(lmask),
                    re[ri].child.neg_cond(rmask),
                    op,
                    forced,
                );
                if n != prev {
                    self.push_elem(prev.neg_cond(mask), bnd);
                    prev = n;
                    self.inc_ref(prev);
                }
                bnd = le[li].bnd.min(re[ri].bnd);
            }
            self.push_elem(prev.neg_cond(mask), INF);

            let res = self.mk_cdd_node(top_level, top).neg_cond(mask);

            for k in top..self.ref_stack.len() {
                let child = self.ref_stack[k].child;
                self.dec_ref(child);
            }
            self.ref_stack.truncate(top);
            res
        } else {
            let (ll, lh) = if llv <= rlv { self.bdd_children(lreg) } else { (lreg, lreg) };
            let (rl, rh) = if llv >= rlv { self.bdd_children(rreg) } else { (rreg, rreg) };

            let low = self.apply_rec(ll.neg_cond(lmask), rl.neg_cond(rmask), op, forced);
            self.inc_ref(low);
            let high = self.apply_rec(lh.neg_cond(lmask), rh.neg_cond(rmask), op, forced);
            let res = self.mk_bdd_node(top_level, low, high);
            self.dec_ref(low);
            res
        };

        self.apply_cache.insert(hash, l, r, op as u64, res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::{bnd_lower, bnd_upper};

    #[test]
    fn test_shortcuts() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(1);
        let x = cdd.mk_var(b);

        assert_eq!(cdd.apply_and(x, Cdd::TRUE), x);
        assert_eq!(cdd.apply_and(Cdd::TRUE, x), x);
        assert_eq!(cdd.apply_and(x, Cdd::FALSE), Cdd::FALSE);
        assert_eq!(cdd.apply_and(x, x), x);
        assert_eq!(cdd.apply_and(x, -x), Cdd::FALSE);

        assert_eq!(cdd.apply_xor(x, x), Cdd::FALSE);
        assert_eq!(cdd.apply_xor(x, -x), Cdd::TRUE);
        assert_eq!(cdd.apply_xor(x, Cdd::FALSE), x);
        assert_eq!(cdd.apply_xor(x, Cdd::TRUE), -x);
    }

    #[test]
    fn test_and_is_commutative() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let x = cdd.mk_var(b);
        let y = cdd.mk_var(b + 1);
        assert_eq!(cdd.apply_and(x, y), cdd.apply_and(y, x));
        assert_eq!(cdd.apply_xor(x, y), cdd.apply_xor(y, x));
    }

    #[test]
    fn test_de_morgan() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let x = cdd.mk_var(b);
        let y = cdd.mk_var(b + 1);
        let or = cdd.apply_or(x, y);
        let and = cdd.apply_and(-x, -y);
        assert_eq!(or, -and);
    }

    #[test]
    fn test_xor_via_and() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(2);
        let x = cdd.mk_var(b);
        let y = cdd.mk_var(b + 1);
        // x ^ y == (x ∧ ¬y) ∨ (¬x ∧ y)
        let a = cdd.apply_and(x, -y);
        let c = cdd.apply_and(-x, y);
        let by_hand = cdd.apply_or(a, c);
        assert_eq!(cdd.apply_xor(x, y), by_hand);
    }

    #[test]
    fn test_ite() {
        let mut cdd = Cdd::default();
        let b = cdd.add_bddvar(3);
        let f = cdd.mk_var(b);
        let g = cdd.mk_var(b + 1);
        let h = cdd.mk_var(b + 2);

        assert_eq!(cdd.ite(Cdd::TRUE, g, h), g);
        assert_eq!(cdd.ite(Cdd::FALSE, g, h), h);
        assert_eq!(cdd.ite(f, Cdd::TRUE, Cdd::FALSE), f);
        assert_eq!(cdd.ite(f, Cdd::FALSE, Cdd::TRUE), -f);
        assert_eq!(cdd.ite(f, g, g), g);
    }

    #[test]
    fn test_interval_intersection_on_one_level() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        // x1 in [2, 10] and x1 in [5, 20] is x1 in [5, 10].
        let a = cdd.interval(1, 0, bnd_lower(2, false), bnd_upper(10, false));
        let b = cdd.interval(1, 0, bnd_lower(5, false), bnd_upper(20, false));
        let c = cdd.interval(1, 0, bnd_lower(5, false), bnd_upper(10, false));
        assert_eq!(cdd.apply_and(a, b), c);
    }

    #[test]
    fn test_interval_union_of_adjacent_intervals() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        // [2, 5] ∪ (5, 10] == [2, 10] because the co-walk merges equal
        // neighbouring children.
        let a = cdd.interval(1, 0, bnd_lower(2, false), bnd_upper(5, false));
        let b = cdd.interval(1, 0, bnd_lower(5, true), bnd_upper(10, false));
        let c = cdd.interval(1, 0, bnd_lower(2, false), bnd_upper(10, false));
        assert_eq!(cdd.apply_or(a, b), c);
    }

    #[test]
    fn test_mixed_bdd_and_cdd_levels() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        let b = cdd.add_bddvar(1);
        let zone = cdd.interval(1, 0, bnd_lower(0, false), bnd_upper(7, false));
        let var = cdd.mk_var(b);
        let both = cdd.apply_and(zone, var);
        assert_ne!(both, Cdd::FALSE);
        // Conjoining with the negated variable empties it.
        assert_eq!(cdd.apply_and(both, -var), Cdd::FALSE);
        // And the zone part is recoverable.
        assert_eq!(cdd.apply_or(both, zone), zone);
    }

    #[test]
    fn test_extra_terminal_short_circuits() {
        let mut cdd = Cdd::default();
        cdd.add_tautologies(2);
        let b = cdd.add_bddvar(1);
        let x = cdd.mk_var(b);
        let t0 = cdd.tautology(0);

        // AND with TRUE keeps the extra terminal.
        assert_eq!(cdd.apply_and(t0, Cdd::TRUE), t0);
        // AND with an ordinary diagram keeps the diagram.
        assert_eq!(cdd.apply_and(t0, x), x);
        // Negated extra terminal dominates a conjunction.
        assert_eq!(cdd.apply_and(-t0, x), -t0);
        // XOR with itself is empty, XOR flips through the negation bit.
        assert_eq!(cdd.apply_xor(t0, t0), Cdd::FALSE);
        assert_eq!(cdd.apply_xor(t0, x), -x);
    }

    #[test]
    fn test_push_negate_preserves_function() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        let b = cdd.add_bddvar(1);
        let zone = cdd.interval(1, 0, bnd_lower(1, false), bnd_upper(4, false));
        let var = cdd.mk_var(b);
        let f = cdd.apply_or(-zone, var);
        let pushed = cdd.push_negate(f);
        assert_eq!(cdd.apply_xor(f, pushed), Cdd::FALSE);
    }
}
