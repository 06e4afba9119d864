//! Conversion between DBMs and diagrams.
//!
//! A DBM enters the diagram world as one canonical path ([`Cdd::from_dbm`])
//! and leaves it one zone at a time ([`Cdd::extract_dbm`]): the extraction
//! returns the remainder `cdd ∧ ¬zone`, so callers iterate until the
//! remainder is empty or a pure boolean tail is left.

use crate::bounds::{bnd_l2u, bnd_lower, bnd_u2l, Raw, INF};
use crate::cdd::Cdd;
use crate::dbm;
use crate::node::LevelKind;
use crate::reference::Ref;

/// Result of splitting off one zone of a diagram.
pub struct Extraction {
    /// The remainder: the input minus the extracted zone.
    pub cdd_part: Ref,
    /// The boolean tail below the extracted zone.
    pub bdd_part: Ref,
    /// The extracted zone, closed.
    pub dbm: Vec<Raw>,
}

impl Cdd {
    /// Converts a closed DBM into a diagram.
    ///
    /// Built bottom-up over the CDD levels in decreasing order, splicing one
    /// interval node per constrained clock pair. Negated accumulators are
    /// handled by pushing the negation onto the new node, keeping the first
    /// child regular.
    pub fn from_dbm(&mut self, dbm: &[Raw], dim: usize) -> Ref {
        if !self.ok() {
            return Self::FALSE;
        }
        debug_assert_eq!(dbm.len(), dim * dim);

        let mut c = Self::TRUE;
        for k in (0..self.levels.len()).rev() {
            let LevelKind::Cdd { clock1, clock2, .. } = self.levels[k].kind else {
                continue;
            };
            let (i, j) = (clock1 as usize, clock2 as usize);
            // A DBM smaller than the declared clock set leaves the extra
            // levels unconstrained.
            if i >= dim || j >= dim {
                continue;
            }

            let lo = dbm[j * dim + i] < INF;
            let hi = dbm[i * dim + j] < INF;
            if !lo && !hi {
                continue;
            }

            let top = self.ref_stack.len();
            if lo {
                self.push_elem(Self::FALSE, bnd_u2l(dbm[j * dim + i]));
                if hi {
                    self.push_elem(c, dbm[i * dim + j]);
                    self.push_elem(Self::FALSE, INF);
                } else {
                    self.push_elem(c, INF);
                }
                c = self.mk_cdd_node(k as u32, top);
            } else {
                self.push_elem(c.regular(), dbm[i * dim + j]);
                self.push_elem(Self::FALSE.neg_cond(c.mask()), INF);
                c = self.mk_cdd_node(k as u32, top).neg_cond(c.mask());
            }
            self.ref_stack.truncate(top);
        }
        c
    }

    /// Extracts one zone from a *reduced* diagram into `dbm` and returns the
    /// remainder `node ∧ ¬zone`.
    ///
    /// The walk follows the first live child at every CDD level and stops at
    /// the boolean tail; the collected constraints are closed through the
    /// DBM module.
    pub fn extract_dbm(&mut self, node: Ref, dbm: &mut [Raw], dim: usize) -> Ref {
        dbm::init(dbm, dim);

        let mut cur = node;
        while !self.is_terminal(cur) {
            let level = self.level_of(cur);
            let LevelKind::Cdd { clock1, clock2, .. } = self.levels[level as usize].kind else {
                break;
            };
            debug_assert!((clock1 as usize) < dim && (clock2 as usize) < dim);

            let ivs = self.cdd_intervals(cur);
            let live = ivs
                .iter()
                .find(|iv| !self.eval_false(iv.2))
                .expect("reduced diagram has a live child per node");
            let (lower, upper, child) = *live;

            dbm::constrain(dbm, dim, clock2 as usize, clock1 as usize, bnd_l2u(lower));
            dbm::constrain(dbm, dim, clock1 as usize, clock2 as usize, upper);
            cur = child;
        }
        dbm::close(dbm, dim);

        let zone = self.from_dbm(dbm, dim);
        self.inc_ref(zone);
        let res = self.apply_and(node, -zone);
        self.dec_ref(zone);
        res
    }

    /// Returns the boolean tail below the first zone of a *reduced* diagram.
    pub fn extract_bdd(&mut self, node: Ref) -> Ref {
        let mut cur = node;
        while !self.is_terminal(cur) && self.levels[self.level_of(cur) as usize].is_cdd() {
            let ivs = self.cdd_intervals(cur);
            cur = ivs
                .iter()
                .find(|iv| !self.eval_false(iv.2))
                .expect("reduced diagram has a live child per node")
                .2;
        }
        cur
    }

    /// Splits a *reduced* diagram into its first zone, the boolean tail
    /// below it and the remainder.
    pub fn extract_bdd_and_dbm(&mut self, node: Ref) -> Extraction {
        let dim = self.clock_count as usize;
        let mut dbm = vec![0; dim * dim];
        let bdd_part = self.extract_bdd(node);
        let cdd_part = self.extract_dbm(node, &mut dbm, dim);
        Extraction { cdd_part, bdd_part, dbm }
    }

    /// True iff the zone of `dbm` is a subset of the diagram.
    pub fn contains(&self, node: Ref, dbm: &[Raw], dim: usize) -> bool {
        debug_assert!(!dbm::is_empty(dbm, dim));
        self.contains_rec(node, dbm, dim)
    }

    fn contains_rec(&self, node: Ref, d: &[Raw], dim: usize) -> bool {
        if node == Self::TRUE {
            return true;
        }
        if node == Self::FALSE {
            return false;
        }
        if self.is_extra_terminal(node) {
            return !node.is_negated();
        }

        let level = self.level_of(node);
        match self.levels[level as usize].kind {
            LevelKind::Cdd { clock1, clock2, .. } => {
                let (c1, c2) = (clock1 as usize, clock2 as usize);
                // A smaller DBM is unconstrained in these dimensions and
                // thus cannot be inside a diagram restricting them.
                if c1 >= dim || c2 >= dim {
                    return false;
                }
                for (lower, upper, child) in self.cdd_intervals(node) {
                    if self.eval_true(child) {
                        continue;
                    }
                    let mut tmp = d.to_vec();
                    let nonempty = dbm::constrain_n(
                        &mut tmp,
                        dim,
                        &[(c2, c1, bnd_l2u(lower)), (c1, c2, upper)],
                    );
                    if nonempty && !self.contains_rec(child, &tmp, dim) {
                        return false;
                    }
                }
                true
            }
            LevelKind::Bdd => {
                self.contains_rec(self.bdd_low(node), d, dim)
                    && self.contains_rec(self.bdd_high(node), d, dim)
            }
        }
    }

    /// Conjoins `x_i >= 0` for every declared clock, cutting away the
    /// negative-valuation part a raw diagram may carry.
    pub fn remove_negative(&mut self, node: Ref) -> Ref {
        let mut res = node;
        self.inc_ref(res);
        for i in 1..self.clock_count {
            let nonneg = self.interval(i, 0, bnd_lower(0, false), INF);
            self.inc_ref(nonneg);
            let tmp = self.apply_and(res, nonneg);
            self.inc_ref(tmp);
            self.rec_deref(nonneg);
            self.rec_deref(res);
            res = tmp;
        }
        self.dec_ref(res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::bnd_upper;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn mk_zone(dim: usize, bounds: &[(usize, i32, i32)]) -> Vec<Raw> {
        let mut d = vec![0; dim * dim];
        dbm::init(&mut d, dim);
        for &(clock, lo, hi) in bounds {
            assert!(dbm::constrain(&mut d, dim, 0, clock, bnd_upper(-lo, false)));
            assert!(dbm::constrain(&mut d, dim, clock, 0, bnd_upper(hi, false)));
        }
        d
    }

    #[test]
    fn test_from_dbm_is_hash_consed() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);
        let d = mk_zone(3, &[(1, 1, 5), (2, 2, 9)]);
        let a = cdd.from_dbm(&d, 3);
        let b = cdd.from_dbm(&d, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_dbm_contains_its_dbm() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);
        for bounds in [
            &[(1, 0, 4), (2, 0, 4)][..],
            &[(1, 2, 2), (2, 5, 9)][..],
            &[(1, 1, 100), (2, 0, 0)][..],
        ] {
            let d = mk_zone(3, bounds);
            let c = cdd.from_dbm(&d, 3);
            assert!(cdd.contains(c, &d, 3));
        }
    }

    #[test]
    fn test_extract_dbm_roundtrip() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);
        let d = mk_zone(3, &[(1, 1, 5), (2, 2, 9)]);
        let c = cdd.from_dbm(&d, 3);
        cdd.inc_ref(c);

        let mut out = vec![0; 9];
        let rest = cdd.extract_dbm(c, &mut out, 3);
        assert_eq!(out, d);
        assert_eq!(rest, Cdd::FALSE);
    }

    #[test]
    fn test_contains_rejects_larger_dbm() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        let small = mk_zone(2, &[(1, 2, 4)]);
        let large = mk_zone(2, &[(1, 0, 10)]);
        let c = cdd.from_dbm(&small, 2);
        assert!(cdd.contains(c, &small, 2));
        assert!(!cdd.contains(c, &large, 2));

        let c = cdd.from_dbm(&large, 2);
        assert!(cdd.contains(c, &small, 2));
    }

    #[test]
    fn test_intersection_matches_dbm_intersection() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);

        let d1 = mk_zone(3, &[(1, 0, 10), (2, 2, 8)]);
        let d2 = mk_zone(3, &[(1, 3, 12), (2, 0, 6)]);
        let mut d3 = d1.clone();
        assert!(dbm::intersection(&mut d3, &d2, 3));

        let c1 = cdd.from_dbm(&d1, 3);
        let c2 = cdd.from_dbm(&d2, 3);
        let c = cdd.apply_and(c1, c2);
        cdd.inc_ref(c);

        assert!(cdd.contains(c, &d3, 3));

        let r = cdd.reduce(c);
        cdd.inc_ref(r);
        let mut out = vec![0; 9];
        let rest = cdd.extract_dbm(r, &mut out, 3);
        assert_eq!(out, d3);
        assert_eq!(rest, Cdd::FALSE);
    }

    #[test]
    fn test_random_box_intersections() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..40 {
            let mut pick = |span: i32| {
                let lo = rng.gen_range(0..span);
                let hi = rng.gen_range(lo..span + 10);
                (lo, hi)
            };
            let (a1, b1) = pick(10);
            let (a2, b2) = pick(10);
            let (a3, b3) = pick(10);
            let (a4, b4) = pick(10);
            let d1 = mk_zone(3, &[(1, a1, b1), (2, a2, b2)]);
            let d2 = mk_zone(3, &[(1, a3, b3), (2, a4, b4)]);

            let c1 = cdd.from_dbm(&d1, 3);
            cdd.inc_ref(c1);
            let c2 = cdd.from_dbm(&d2, 3);
            cdd.inc_ref(c2);
            let c = cdd.apply_and(c1, c2);
            cdd.inc_ref(c);
            cdd.rec_deref(c1);
            cdd.rec_deref(c2);

            let mut d3 = d1.clone();
            let overlap = dbm::intersection(&mut d3, &d2, 3);
            let r = cdd.reduce(c);
            cdd.inc_ref(r);
            cdd.rec_deref(c);

            if overlap {
                assert!(cdd.contains(r, &d3, 3));
                let mut out = vec![0; 9];
                let rest = cdd.extract_dbm(r, &mut out, 3);
                assert_eq!(out, d3);
                assert_eq!(rest, Cdd::FALSE);
            } else {
                assert_eq!(r, Cdd::FALSE);
            }
            cdd.rec_deref(r);
        }
    }

    #[test]
    fn test_extract_bdd_returns_tail() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        let b = cdd.add_bddvar(1);
        let d = mk_zone(2, &[(1, 2, 6)]);
        let zone = cdd.from_dbm(&d, 2);
        let var = cdd.mk_var(b);
        let c = cdd.apply_and(zone, var);
        cdd.inc_ref(c);

        let tail = cdd.extract_bdd(c);
        assert_eq!(tail, var);

        // Pure-boolean and terminal inputs come back unchanged.
        assert_eq!(cdd.extract_bdd(var), var);
        assert_eq!(cdd.extract_bdd(Cdd::TRUE), Cdd::TRUE);
    }

    #[test]
    fn test_extract_bdd_and_dbm() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        let b = cdd.add_bddvar(1);
        let d = mk_zone(2, &[(1, 2, 6)]);
        let zone = cdd.from_dbm(&d, 2);
        let var = cdd.mk_var(b);
        let c = cdd.apply_and(zone, var);
        cdd.inc_ref(c);

        let ex = cdd.extract_bdd_and_dbm(c);
        assert_eq!(ex.bdd_part, var);
        assert_eq!(ex.dbm, d);
        // The single zone accounts for the whole diagram.
        assert_eq!(ex.cdd_part, Cdd::FALSE);
    }

    #[test]
    fn test_remove_negative_of_true_is_nonnegative_cone() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(3);
        let cone = cdd.remove_negative(Cdd::TRUE);
        let mut universal = vec![0; 9];
        dbm::init(&mut universal, 3);
        // The cone is exactly what an unconstrained DBM converts to.
        let from_universal = cdd.from_dbm(&universal, 3);
        assert_eq!(cone, from_universal);
        assert!(cdd.contains(cone, &universal, 3));
    }

    #[test]
    fn test_remove_negative_keeps_nonnegative_zone() {
        let mut cdd = Cdd::default();
        cdd.add_clocks(2);
        let d = mk_zone(2, &[(1, 2, 6)]);
        let c = cdd.from_dbm(&d, 2);
        cdd.inc_ref(c);
        let r = cdd.remove_negative(c);
        cdd.inc_ref(r);
        assert!(cdd.equiv(c, r));
    }
}
