//! Symbolic transformers over "zones plus boolean tail" fragments.
//!
//! Every transformer decomposes its argument into `(DBM, BDD)` pairs by
//! repeatedly reducing, extracting one zone and subtracting it, applies the
//! corresponding DBM operation to each zone, and unions the transformed
//! pairs back together.

use crate::bounds::Raw;
use crate::cdd::Cdd;
use crate::dbm;
use crate::reference::Ref;

impl Cdd {
    fn is_pure_bdd(&self, node: Ref) -> bool {
        self.is_terminal(node) || !self.levels[self.level_of(node) as usize].is_cdd()
    }

    /// Splits a diagram into all its `(zone, boolean tail)` pairs.
    ///
    /// Negative-clock parts are removed up front. The returned tails carry a
    /// reference each; release them with [`Cdd::release_zones`].
    fn zones(&mut self, node: Ref) -> Vec<(Vec<Raw>, Ref)> {
        let dim = self.clock_count as usize;
        let mut out = Vec::new();

        let nn = self.remove_negative(node);
        self.inc_ref(nn);
        let mut copy = nn;
        loop {
            let tmp = self.reduce(copy);
            self.inc_ref(tmp);
            self.rec_deref(copy);
            copy = tmp;

            if copy == Self::FALSE {
                break;
            }
            if self.is_pure_bdd(copy) {
                // A residual boolean part holds the universal zone.
                let mut d = vec![0; dim * dim];
                dbm::init(&mut d, dim);
                out.push((d, copy));
                break;
            }

            let bottom = self.extract_bdd(copy);
            self.inc_ref(bottom);
            let mut d = vec![0; dim * dim];
            let rest = self.extract_dbm(copy, &mut d, dim);
            self.inc_ref(rest);
            self.rec_deref(copy);
            out.push((d, bottom));

            let nn = self.remove_negative(rest);
            self.inc_ref(nn);
            self.rec_deref(rest);
            copy = nn;
        }
        out
    }

    fn release_zones(&mut self, zones: &[(Vec<Raw>, Ref)]) {
        for &(_, tail) in zones {
            self.rec_deref(tail);
        }
    }

    /// Unions `from_dbm(d) ∧ tail` into `acc`; returns the new accumulator,
    /// referenced.
    fn accumulate(&mut self, acc: Ref, d: &[Raw], tail: Ref) -> Ref {
        let dim = self.clock_count as usize;
        let z = self.from_dbm(d, dim);
        self.inc_ref(z);
        let part = self.apply_and(z, tail);
        self.inc_ref(part);
        let res = self.apply_or(acc, part);
        self.inc_ref(res);
        self.rec_deref(z);
        self.rec_deref(part);
        self.rec_deref(acc);
        res
    }

    /// Future: lets every zone of the diagram drift upwards.
    pub fn delay(&mut self, node: Ref) -> Ref {
        if self.is_pure_bdd(node) {
            return node;
        }
        let dim = self.clock_count as usize;
        let zones = self.zones(node);
        let mut res = Self::FALSE;
        for (d, tail) in &zones {
            let mut d = d.clone();
            dbm::up(&mut d, dim);
            res = self.accumulate(res, &d, *tail);
        }
        self.release_zones(&zones);
        self.dec_ref(res);
        res
    }

    /// [`Cdd::delay`] under an invariant.
    pub fn delay_invariant(&mut self, node: Ref, invariant: Ref) -> Ref {
        let d = self.delay(node);
        self.inc_ref(d);
        let res = self.apply_and(d, invariant);
        self.inc_ref(res);
        self.rec_deref(d);
        self.dec_ref(res);
        res
    }

    /// Past: lets every zone of the diagram drift down to the non-negative
    /// cone.
    pub fn past(&mut self, node: Ref) -> Ref {
        if self.is_pure_bdd(node) {
            return node;
        }
        let dim = self.clock_count as usize;
        let zones = self.zones(node);
        let mut res = Self::FALSE;
        for (d, tail) in &zones {
            let mut d = d.clone();
            dbm::down(&mut d, dim);
            res = self.accumulate(res, &d, *tail);
        }
        self.release_zones(&zones);
        self.dec_ref(res);
        res
    }

    /// Applies clock and boolean resets.
    ///
    /// The listed booleans are existentially quantified and re-bound to
    /// their reset values; negative-clock parts are removed; every extracted
    /// zone gets its reset clocks set to the given values.
    pub fn apply_reset(
        &mut self,
        node: Ref,
        clock_resets: &[u32],
        clock_values: &[i32],
        bool_resets: &[u32],
        bool_values: &[bool],
    ) -> Ref {
        debug_assert_eq!(clock_resets.len(), clock_values.len());
        debug_assert_eq!(bool_resets.len(), bool_values.len());
        let dim = self.clock_count as usize;

        let mut copy = node;
        self.inc_ref(copy);

        if !bool_resets.is_empty() {
            let tmp = self.exist(copy, bool_resets, &[]);
            self.inc_ref(tmp);
            self.rec_deref(copy);
            copy = tmp;
        }
        for (&level, &value) in bool_resets.iter().zip(bool_values) {
            let var = self.mk_var(level);
            let lit = if value { var } else { -var };
            self.inc_ref(lit);
            let tmp = self.apply_and(copy, lit);
            self.inc_ref(tmp);
            self.rec_deref(copy);
            self.rec_deref(lit);
            copy = tmp;
        }

        let tmp = self.remove_negative(copy);
        self.inc_ref(tmp);
        self.rec_deref(copy);
        copy = tmp;

        if clock_resets.is_empty() || self.is_pure_bdd(copy) {
            self.dec_ref(copy);
            return copy;
        }

        let zones = self.zones(copy);
        self.rec_deref(copy);
        let mut res = Self::FALSE;
        for (d, tail) in &zones {
            let mut d = d.clone();
            for (&k, &v) in clock_resets.iter().zip(clock_values) {
                dbm::update_value(&mut d, dim, k as usize, v);
            }
            res = self.accumulate(res, &d, *tail);
        }
        self.release_zones(&zones);
        self.dec_ref(res);
        res
    }

    /// One forward transition: conjoin the guard, then reset.
    #[allow(clippy::too_many_arguments)]
    pub fn transition(
        &mut self,
        src: Ref,
        guard: Ref,
        clock_resets: &[u32],
        clock_values: &[i32],
        bool_resets: &[u32],
        bool_values: &[bool],
    ) -> Ref {
        let guarded = self.apply_and(src, guard);
        self.inc_ref(guarded);
        let res =
            self.apply_reset(guarded, clock_resets, clock_values, bool_resets, bool_values);
        self.inc_ref(res);
        self.rec_deref(guarded);
        self.dec_ref(res);
        res
    }

    /// One transition backwards: conjoin the update, quantify the reset
    /// booleans, free the reset clocks, conjoin the guard.
    pub fn transition_back(
        &mut self,
        dst: Ref,
        guard: Ref,
        update: Ref,
        clock_resets: &[u32],
        bool_resets: &[u32],
    ) -> Ref {
        let dim = self.clock_count as usize;

        let mut copy = self.apply_and(dst, update);
        self.inc_ref(copy);
        if copy == Self::FALSE {
            return Self::FALSE;
        }

        if !bool_resets.is_empty() {
            let tmp = self.exist(copy, bool_resets, &[]);
            self.inc_ref(tmp);
            self.rec_deref(copy);
            copy = tmp;
        }

        if clock_resets.is_empty() || self.is_pure_bdd(copy) {
            let res = self.apply_and(copy, guard);
            self.inc_ref(res);
            self.rec_deref(copy);
            self.dec_ref(res);
            return res;
        }

        let tmp = self.remove_negative(copy);
        self.inc_ref(tmp);
        self.rec_deref(copy);
        copy = tmp;

        let zones = self.zones(copy);
        self.rec_deref(copy);
        let mut res = Self::FALSE;
        for (d, tail) in &zones {
            let mut d = d.clone();
            for &k in clock_resets {
                dbm::free_clock(&mut d, dim, k as usize);
            }
            res = self.accumulate(res, &d, *tail);
        }
        self.release_zones(&zones);

        let guarded = self.apply_and(res, guard);
        self.inc_ref(guarded);
        self.rec_deref(res);
        self.dec_ref(guarded);
        guarded
    }

    /// [`Cdd::transition_back`] followed by [`Cdd::past`]: the states that
    /// can delay and then take the transition.
    pub fn transition_back_past(
        &mut self,
        dst: Ref,
        guard: Ref,
        update: Ref,
        clock_resets: &[u32],
        bool_resets: &[u32],
    ) -> Ref {
        let back = self.transition_back(dst, guard, update, clock_resets, bool_resets);
        self.inc_ref(back);
        let res = self.past(back);
        self.inc_ref(res);
        self.rec_deref(back);
        self.dec_ref(res);
        res
    }

    fn bool_cube(&mut self, bools: &[u32], m: u64) -> Ref {
        let mut cube = Self::TRUE;
        for (bit, &level) in bools.iter().enumerate() {
            let var = self.mk_var(level);
            let lit = if (m >> bit) & 1 == 1 { var } else { -var };
            self.inc_ref(lit);
            let tmp = self.apply_and(cube, lit);
            self.inc_ref(tmp);
            self.rec_deref(cube);
            self.rec_deref(lit);
            cube = tmp;
        }
        self.dec_ref(cube);
        cube
    }

    /// Timed predecessor of `target` avoiding `safe`.
    ///
    /// Where the boolean parts of target and safe can overlap, every boolean
    /// valuation is enumerated and the zone-level predecessor is computed
    /// against the compatible safe zones; valuations with no compatible safe
    /// zone fall back to the plain past of the target zone. Exponential in
    /// the number of declared boolean variables.
    pub fn predt(&mut self, target: Ref, safe: Ref) -> Ref {
        let dim = self.clock_count as usize;
        let t_zones = self.zones(target);
        let s_zones = self.zones(safe);
        let bools: Vec<u32> = (0..self.level_count())
            .filter(|&l| !self.levels[l as usize].is_cdd())
            .collect();

        let mut res = Self::FALSE;
        for (td, tb) in &t_zones {
            let overlap = s_zones.iter().any(|&(_, sb)| self.apply_and(*tb, sb) != Self::FALSE);
            if !overlap {
                // No boolean valuation can ever be in the safe set; the
                // whole past of the zone qualifies.
                let mut d = td.clone();
                dbm::down(&mut d, dim);
                res = self.accumulate(res, &d, *tb);
                continue;
            }

            for m in 0..(1u64 << bools.len()) {
                let cube = self.bool_cube(&bools, m);
                self.inc_ref(cube);
                let tcube = self.apply_and(*tb, cube);
                self.inc_ref(tcube);
                if tcube == Self::FALSE {
                    self.rec_deref(cube);
                    continue;
                }

                let mut fed: Vec<Vec<Raw>> = Vec::new();
                for &(ref sd, sb) in &s_zones {
                    if self.apply_and(sb, cube) != Self::FALSE {
                        fed.push(sd.clone());
                    }
                }

                let parts = if fed.is_empty() {
                    let mut d = td.clone();
                    dbm::down(&mut d, dim);
                    vec![d]
                } else {
                    dbm::predt(td, &fed, dim)
                };
                for p in &parts {
                    res = self.accumulate(res, p, tcube);
                }
                self.rec_deref(tcube);
                self.rec_deref(cube);
            }
        }

        self.release_zones(&t_zones);
        self.release_zones(&s_zones);
        self.dec_ref(res);
        res
    }
}
