//! Existential quantification and variable substitution.
//!
//! Quantifying a boolean level is the classic `low ∨ high`. Quantifying a
//! clock is harder: simply dropping a difference node loses the transitive
//! information it carried, so before a node on a quantified clock is
//! removed, the *relax* step pushes the implied constraints on the other
//! clocks down into each child branch. The `removed constraints` matrix
//! tracks what the current path already re-established, so only tighter
//! consequences are added.
//!
//! Both recursions are memoised under the running operation id, which is
//! bumped at every top-level call so stale entries are never reused.

use crate::bounds::{bnd_add, bnd_l2u, bnd_u2l, Raw, INF};
use crate::cdd::Cdd;
use crate::error::CddError;
use crate::node::LevelKind;
use crate::reference::Ref;
use crate::utils::{pairing, pairing3};

fn relax_hash(node: Ref, lower: Raw, clock1: u32, clock2: u32, upper: Raw) -> u64 {
    pairing3(
        node.raw() as u64,
        pairing(lower as u32 as u64, clock1 as u64),
        pairing(clock2 as u64, upper as u32 as u64),
    )
}

impl Cdd {
    /// Existentially quantifies the given boolean levels and clocks.
    ///
    /// `bool_levels` lists BDD levels, `clocks` lists clock indices; the
    /// reference clock cannot be quantified.
    pub fn exist(&mut self, node: Ref, bool_levels: &[u32], clocks: &[u32]) -> Ref {
        let mut levels = vec![false; self.levels.len()];
        for &l in bool_levels {
            if l as usize >= levels.len() || self.levels[l as usize].is_cdd() {
                self.set_error(CddError::Var);
                return Self::FALSE;
            }
            levels[l as usize] = true;
        }
        let mut clockset = vec![false; self.clock_count as usize];
        for &c in clocks {
            if c == 0 || c >= self.clock_count {
                self.set_error(CddError::ClkSet);
                return Self::FALSE;
            }
            clockset[c as usize] = true;
        }

        let n = self.clock_count as usize;
        let mut rc = vec![INF; n * n];
        self.op_id += 1;
        let res = self.exist_rec(node, &levels, &clockset, &mut rc);
        if self.ok() {
            res
        } else {
            Self::FALSE
        }
    }

    fn exist_rec(&mut self, node: Ref, levels: &[bool], clocks: &[bool], rc: &mut [Raw]) -> Ref {
        if self.is_terminal(node) {
            return node;
        }

        let hash = node.raw() as u64;
        if let Some(res) = self.quant_cache.lookup(hash, node, node, self.op_id) {
            if self.is_dead(res) {
                self.reclaim(res);
            }
            return res;
        }

        let level = self.level_of(node);
        let n = self.clock_count as usize;
        let res = match self.levels[level as usize].kind {
            LevelKind::Cdd { clock1, clock2, .. } => {
                let (c1, c2) = (clock1 as usize, clock2 as usize);
                let ivs = self.cdd_intervals(node);
                let mut res = Self::FALSE;
                if clocks[c1] || clocks[c2] {
                    // The node goes away; relax each branch first so the
                    // consequences of this interval survive.
                    for (lower, upper, child) in ivs {
                        let old_lower = rc[c2 * n + c1];
                        let old_upper = rc[c1 * n + c2];
                        rc[c2 * n + c1] = bnd_l2u(lower);
                        rc[c1 * n + c2] = upper;

                        let tmp1 = self.relax(child, clocks, lower, clock1, clock2, upper, rc);
                        self.inc_ref(tmp1);
                        let tmp2 = self.exist_rec(tmp1, levels, clocks, rc);
                        self.inc_ref(tmp2);
                        let tmp3 = self.apply_or(res, tmp2);
                        self.inc_ref(tmp3);
                        self.rec_deref(res);
                        self.rec_deref(tmp1);
                        self.rec_deref(tmp2);
                        res = tmp3;

                        rc[c2 * n + c1] = old_lower;
                        rc[c1 * n + c2] = old_upper;
                    }
                } else {
                    // Untouched clock pair: recurse structurally.
                    for (lower, upper, child) in ivs {
                        let tmp1 = self.interval_from_level(level, lower, upper);
                        self.inc_ref(tmp1);
                        let tmp2 = self.exist_rec(child, levels, clocks, rc);
                        self.inc_ref(tmp2);
                        let tmp3 = self.apply_and(tmp1, tmp2);
                        self.inc_ref(tmp3);
                        let tmp4 = self.apply_or(res, tmp3);
                        self.inc_ref(tmp4);
                        self.rec_deref(res);
                        self.rec_deref(tmp1);
                        self.rec_deref(tmp2);
                        self.rec_deref(tmp3);
                        res = tmp4;
                    }
                }
                self.dec_ref(res);
                res
            }
            LevelKind::Bdd => {
                let low = self.bdd_low(node);
                let high = self.bdd_high(node);
                let tmp1 = self.exist_rec(low, levels, clocks, rc);
                self.inc_ref(tmp1);
                let tmp2 = self.exist_rec(high, levels, clocks, rc);
                self.inc_ref(tmp2);
                let res = if levels[level as usize] {
                    let r = self.apply_or(tmp1, tmp2);
                    self.inc_ref(r);
                    r
                } else {
                    let var = self.mk_var(level);
                    self.inc_ref(var);
                    let r = self.ite(var, tmp2, tmp1);
                    self.inc_ref(r);
                    self.rec_deref(var);
                    r
                };
                self.rec_deref(tmp1);
                self.rec_deref(tmp2);
                self.dec_ref(res);
                res
            }
        };

        self.quant_cache.insert(hash, node, node, self.op_id, res);
        res
    }

    /// Pushes the consequences of `lower <~ clock1 - clock2 <~ upper` onto
    /// every branch of `node` that mentions one of the two clocks, so the
    /// constraint can be dropped afterwards without losing information.
    #[allow(clippy::too_many_arguments)]
    fn relax(
        &mut self,
        node: Ref,
        clocks: &[bool],
        lower: Raw,
        clock1: u32,
        clock2: u32,
        upper: Raw,
        rc: &[Raw],
    ) -> Ref {
        if self.is_terminal(node) {
            return node;
        }

        let hash = relax_hash(node, lower, clock1, clock2, upper);
        if let Some(res) =
            self.relax_cache.lookup(hash, node, lower, upper, clock1, clock2, self.op_id)
        {
            if self.is_dead(res) {
                self.reclaim(res);
            }
            return res;
        }

        let level = self.level_of(node);
        let n = self.clock_count as usize;
        let res = match self.levels[level as usize].kind {
            LevelKind::Cdd { clock1: ic1, clock2: ic2, .. } => {
                let ivs = self.cdd_intervals(node);
                let mut res = Self::FALSE;
                for (it_lower, it_upper, child) in ivs {
                    // Transitive consequence of this interval combined with
                    // the quantified constraint, if they share a clock.
                    let conseq: Option<(u32, u32, Raw, Raw)> =
                        if ic1 == clock1 && clocks[clock1 as usize] {
                            Some((
                                ic2,
                                clock2,
                                bnd_u2l(bnd_add(it_upper, bnd_l2u(lower))),
                                bnd_add(upper, bnd_l2u(it_lower)),
                            ))
                        } else if ic1 == clock2 && clocks[clock2 as usize] {
                            Some((
                                clock1,
                                ic2,
                                bnd_u2l(bnd_add(bnd_l2u(lower), bnd_l2u(it_lower))),
                                bnd_add(upper, it_upper),
                            ))
                        } else if ic2 == clock1 && clocks[clock1 as usize] {
                            Some((
                                ic1,
                                clock2,
                                bnd_u2l(bnd_add(bnd_l2u(lower), bnd_l2u(it_lower))),
                                bnd_add(upper, it_upper),
                            ))
                        } else if ic2 == clock2 && clocks[clock2 as usize] {
                            Some((
                                ic1,
                                clock1,
                                bnd_u2l(bnd_add(upper, bnd_l2u(it_lower))),
                                bnd_add(it_upper, bnd_l2u(lower)),
                            ))
                        } else {
                            None
                        };

                    let mut tmp2 = self.relax(child, clocks, lower, clock1, clock2, upper, rc);
                    self.inc_ref(tmp2);

                    // Add the consequence only if tighter than the
                    // constraints already re-established on this path.
                    if let Some((pos, neg, l, u)) = conseq {
                        let (p, ng) = (pos as usize, neg as usize);
                        if l > bnd_u2l(rc[ng * n + p]) || u < rc[p * n + ng] {
                            let lo = l.max(bnd_u2l(rc[ng * n + p]));
                            let up = u.min(rc[p * n + ng]);
                            let tmp3 = self.interval(pos, neg, lo, up);
                            self.inc_ref(tmp3);
                            let tmp4 = self.apply_and(tmp2, tmp3);
                            self.inc_ref(tmp4);
                            self.rec_deref(tmp2);
                            self.rec_deref(tmp3);
                            tmp2 = tmp4;
                        }
                    }

                    // Rebuild with the node's own interval.
                    let tmp3 = self.interval_from_level(level, it_lower, it_upper);
                    self.inc_ref(tmp3);
                    let tmp4 = self.apply_and(tmp2, tmp3);
                    self.inc_ref(tmp4);
                    let tmp5 = self.apply_or(res, tmp4);
                    self.inc_ref(tmp5);
                    self.rec_deref(tmp2);
                    self.rec_deref(tmp3);
                    self.rec_deref(tmp4);
                    self.rec_deref(res);
                    res = tmp5;
                }
                self.dec_ref(res);
                res
            }
            LevelKind::Bdd => {
                let low = self.bdd_low(node);
                let high = self.bdd_high(node);
                let tmp1 = self.relax(low, clocks, lower, clock1, clock2, upper, rc);
                self.inc_ref(tmp1);
                let tmp2 = self.relax(high, clocks, lower, clock1, clock2, upper, rc);
                self.inc_ref(tmp2);
                let tmp3 = self.mk_var(level);
                self.inc_ref(tmp3);
                let res = self.ite(tmp3, tmp2, tmp1);
                self.inc_ref(res);
                self.rec_deref(tmp1);
                self.rec_deref(tmp2);
                self.rec_deref(tmp3);
                self.dec_ref(res);
                res
            }
        };

        self.relax_cache.insert(hash, node, lower, upper, clock1, clock2, self.op_id, res);
        res
    }

    /// Substitutes levels and clocks: every BDD node is rebuilt at
    /// `level_map[level]`, every CDD node on the mapped clock pair.
    pub fn replace(&mut self, node: Ref, level_map: &[u32], clock_map: &[u32]) -> Ref {
        if level_map.len() < self.levels.len() || clock_map.len() < self.clock_count as usize {
            self.set_error(CddError::Replace);
            return Self::FALSE;
        }
        self.op_id += 1;
        let res = self.replace_rec(node, level_map, clock_map);
        if self.ok() {
            res
        } else {
            Self::FALSE
        }
    }

    fn replace_rec(&mut self, node: Ref, level_map: &[u32], clock_map: &[u32]) -> Ref {
        if self.is_terminal(node) {
            return node;
        }

        let hash = node.raw() as u64;
        if let Some(res) = self.replace_cache.lookup(hash, node, node, self.op_id) {
            if self.is_dead(res) {
                self.reclaim(res);
            }
            return res;
        }

        let level = self.level_of(node);
        let res = match self.levels[level as usize].kind {
            LevelKind::Bdd => {
                let var = self.mk_var(level_map[level as usize]);
                self.inc_ref(var);
                let low = self.bdd_low(node);
                let high = self.bdd_high(node);
                let tmp2 = self.replace_rec(low, level_map, clock_map);
                self.inc_ref(tmp2);
                let tmp3 = self.replace_rec(high, level_map, clock_map);
                self.inc_ref(tmp3);
                let res = self.ite(var, tmp3, tmp2);
                self.inc_ref(res);
                self.rec_deref(var);
                self.rec_deref(tmp2);
                self.rec_deref(tmp3);
                self.dec_ref(res);
                res
            }
            LevelKind::Cdd { clock1, clock2, .. } => {
                let mut res = Self::FALSE;
                for (lower, upper, child) in self.cdd_intervals(node) {
                    let tmp1 = self.interval(
                        clock_map[clock1 as usize],
                        clock_map[clock2 as usize],
                        lower,
                        upper,
                    );
                    self.inc_ref(tmp1);
                    let tmp2 = self.replace_rec(child, level_map, clock_map);
                    self.inc_ref(tmp2);
                    let tmp3 = self.apply_and(tmp1, tmp2);
                    self.inc_ref(tmp3);
                    self.rec_deref(tmp1);
                    self.rec_deref(tmp2);
                    let tmp1 = self.apply_or(res, tmp3);
                    self.inc_ref(tmp1);
                    self.rec_deref(res);
                    self.rec_deref(tmp3);
                    res = tmp1;
                }
                self.dec_ref(res);
                res
            }
        };

        self.replace_cache.insert(hash, node, node, self.op_id, res);
        res
    }
}
