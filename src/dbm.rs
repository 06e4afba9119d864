//! Difference-Bound Matrices: the external zone collaborator.
//!
//! The diagram engine treats DBMs as an external module and only relies on
//! the operations below; this is a deliberately small, self-contained
//! implementation of that interface. A DBM of dimension `dim` is a row-major
//! `[Raw]` slice of length `dim * dim` where entry `(i, j)` is the packed
//! upper bound on `x_i - x_j` and clock 0 is the constant zero. All
//! functions expect closed (canonical) inputs unless stated otherwise and
//! re-close what they relax.

use crate::bounds::{bnd_add, bnd_not, bnd_upper, Raw, INF, LE_ZERO};

/// Initialises `dbm` to the universal zone: every clock non-negative,
/// nothing else constrained.
pub fn init(dbm: &mut [Raw], dim: usize) {
    debug_assert_eq!(dbm.len(), dim * dim);
    dbm.fill(INF);
    for j in 0..dim {
        dbm[j] = LE_ZERO; // x0 - xj <= 0
    }
    for i in 0..dim {
        dbm[i * dim + i] = LE_ZERO;
    }
}

/// Floyd–Warshall closure. Returns false iff the zone is empty.
pub fn close(dbm: &mut [Raw], dim: usize) -> bool {
    for k in 0..dim {
        for i in 0..dim {
            let dik = dbm[i * dim + k];
            if dik == INF {
                continue;
            }
            for j in 0..dim {
                let via = bnd_add(dik, dbm[k * dim + j]);
                if via < dbm[i * dim + j] {
                    dbm[i * dim + j] = via;
                }
            }
        }
    }
    for i in 0..dim {
        if dbm[i * dim + i] < LE_ZERO {
            return false;
        }
    }
    true
}

/// True iff a closed DBM is empty.
pub fn is_empty(dbm: &[Raw], dim: usize) -> bool {
    (0..dim).any(|i| dbm[i * dim + i] < LE_ZERO)
}

/// Tightens `x_i - x_j <~ bound` and re-closes. Returns false iff the zone
/// became empty.
pub fn constrain(dbm: &mut [Raw], dim: usize, i: usize, j: usize, bound: Raw) -> bool {
    if bound >= dbm[i * dim + j] {
        return !is_empty(dbm, dim);
    }
    dbm[i * dim + j] = bound;
    close(dbm, dim)
}

/// Applies a list of constraints. Returns false iff the zone became empty.
pub fn constrain_n(dbm: &mut [Raw], dim: usize, cons: &[(usize, usize, Raw)]) -> bool {
    for &(i, j, bound) in cons {
        if bound < dbm[i * dim + j] {
            dbm[i * dim + j] = bound;
        }
    }
    close(dbm, dim)
}

/// Delay: removes the upper bounds of all clocks against the reference.
pub fn up(dbm: &mut [Raw], dim: usize) {
    for i in 1..dim {
        dbm[i * dim] = INF;
    }
}

/// Past: relaxes the lower bounds of all clocks to zero.
pub fn down(dbm: &mut [Raw], dim: usize) {
    for j in 1..dim {
        dbm[j] = LE_ZERO;
    }
    close(dbm, dim);
}

/// Sets clock `k` to the concrete value `value`.
pub fn update_value(dbm: &mut [Raw], dim: usize, k: usize, value: i32) {
    let up = bnd_upper(value, false);
    let lo = bnd_upper(-value, false);
    for j in 0..dim {
        dbm[k * dim + j] = bnd_add(up, dbm[j]);
        dbm[j * dim + k] = bnd_add(dbm[j * dim], lo);
    }
    dbm[k * dim + k] = LE_ZERO;
    close(dbm, dim);
}

/// Removes every constraint on clock `k` except non-negativity.
pub fn free_clock(dbm: &mut [Raw], dim: usize, k: usize) {
    debug_assert!(k >= 1);
    for j in 0..dim {
        if j != k {
            dbm[k * dim + j] = INF;
            dbm[j * dim + k] = INF;
        }
    }
    dbm[k] = LE_ZERO; // x0 - xk <= 0
    close(dbm, dim);
}

/// Intersects `dst` with `src` in place. Returns false iff empty.
pub fn intersection(dst: &mut [Raw], src: &[Raw], dim: usize) -> bool {
    for (d, &s) in dst.iter_mut().zip(src) {
        if s < *d {
            *d = s;
        }
    }
    close(dst, dim)
}

/// Subtracts zone `b` from zone `a`, returning a list of disjoint closed
/// zones covering `a \ b`. Both inputs must be closed; `a` non-empty.
pub fn subtract(a: &[Raw], b: &[Raw], dim: usize) -> Vec<Vec<Raw>> {
    let mut result = Vec::new();
    let mut rem = a.to_vec();
    for i in 0..dim {
        for j in 0..dim {
            if i == j {
                continue;
            }
            let bij = b[i * dim + j];
            if bij == INF || bij >= rem[i * dim + j] {
                continue;
            }
            // The part of the remainder violating b's (i, j) constraint.
            let mut piece = rem.clone();
            if constrain(&mut piece, dim, j, i, bnd_not(bij)) {
                result.push(piece);
            }
            if !constrain(&mut rem, dim, i, j, bij) {
                return result;
            }
        }
    }
    // rem now lies inside b and is dropped.
    result
}

/// Subtracts a federation from a federation.
fn subtract_fed(fed: Vec<Vec<Raw>>, bad: &[Vec<Raw>], dim: usize) -> Vec<Vec<Raw>> {
    let mut pieces = fed;
    for b in bad {
        pieces = pieces.iter().flat_map(|p| subtract(p, b, dim)).collect();
        if pieces.is_empty() {
            break;
        }
    }
    pieces
}

/// Timed predecessor of `good` avoiding `bad`: the closed zones from which
/// some delay reaches `good` without ever touching a zone of `bad` on the
/// way, endpoints included.
pub fn predt(good: &[Raw], bad: &[Vec<Raw>], dim: usize) -> Vec<Vec<Raw>> {
    // Split the goal into the parts outside every bad zone; per part, a
    // start is valid iff it lies below the part and above every bad point
    // that is itself below the part (such a point would be crossed first).
    let pieces = subtract_fed(vec![good.to_vec()], bad, dim);
    let mut result = Vec::new();
    for s in &pieces {
        let mut below = s.clone();
        down(&mut below, dim);
        let mut blockers = Vec::new();
        for b in bad {
            let mut blocked = b.clone();
            if intersection(&mut blocked, &below, dim) {
                down(&mut blocked, dim);
                blockers.push(blocked);
            }
        }
        result.extend(subtract_fed(vec![below], &blockers, dim));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::bnd_limit;

    /// Builds a closed zone from interval constraints on single clocks.
    fn zone(dim: usize, bounds: &[(usize, i32, i32)]) -> Vec<Raw> {
        let mut d = vec![0; dim * dim];
        init(&mut d, dim);
        for &(clock, lo, hi) in bounds {
            assert!(constrain(&mut d, dim, 0, clock, bnd_upper(-lo, false)));
            if hi != i32::MAX {
                assert!(constrain(&mut d, dim, clock, 0, bnd_upper(hi, false)));
            }
        }
        d
    }

    /// Membership of an integer valuation (clock 0 fixed at zero).
    fn contains_point(dbm: &[Raw], dim: usize, point: &[i32]) -> bool {
        for i in 0..dim {
            for j in 0..dim {
                let b = dbm[i * dim + j];
                if b == INF {
                    continue;
                }
                let diff = point[i] - point[j];
                let limit = bnd_limit(b);
                let ok = if b & 1 == 1 { diff <= limit } else { diff < limit };
                if !ok {
                    return false;
                }
            }
        }
        true
    }

    fn fed_contains_point(fed: &[Vec<Raw>], dim: usize, point: &[i32]) -> bool {
        fed.iter().any(|z| contains_point(z, dim, point))
    }

    #[test]
    fn test_init_contains_origin() {
        let mut d = vec![0; 9];
        init(&mut d, 3);
        assert!(!is_empty(&d, 3));
        assert!(contains_point(&d, 3, &[0, 0, 0]));
        assert!(contains_point(&d, 3, &[0, 100, 5]));
        assert!(!contains_point(&d, 3, &[0, -1, 5]));
    }

    #[test]
    fn test_constrain_empties() {
        let mut d = vec![0; 4];
        init(&mut d, 2);
        assert!(constrain(&mut d, 2, 1, 0, bnd_upper(3, false)));
        // x1 >= 5 contradicts x1 <= 3.
        assert!(!constrain(&mut d, 2, 0, 1, bnd_upper(-5, false)));
    }

    #[test]
    fn test_close_derives_diagonals() {
        // x1 <= 3, x2 - x1 <= 2 gives x2 <= 5.
        let mut d = vec![0; 9];
        init(&mut d, 3);
        assert!(constrain(&mut d, 3, 1, 0, bnd_upper(3, false)));
        assert!(constrain(&mut d, 3, 2, 1, bnd_upper(2, false)));
        assert_eq!(d[2 * 3], bnd_upper(5, false));
    }

    #[test]
    fn test_up_then_point_above() {
        let mut d = zone(2, &[(1, 2, 4)]);
        assert!(!contains_point(&d, 2, &[0, 9]));
        up(&mut d, 2);
        assert!(contains_point(&d, 2, &[0, 9]));
        assert!(!contains_point(&d, 2, &[0, 1]));
    }

    #[test]
    fn test_down_clamps_at_zero() {
        let mut d = zone(2, &[(1, 6, 10)]);
        down(&mut d, 2);
        assert!(contains_point(&d, 2, &[0, 0]));
        assert!(contains_point(&d, 2, &[0, 10]));
        assert!(!contains_point(&d, 2, &[0, 11]));
    }

    #[test]
    fn test_down_respects_differences() {
        // x1 = 5, x2 = 10 exactly; the past keeps x2 - x1 = 5.
        let d = zone(3, &[(1, 5, 5), (2, 10, 10)]);
        let mut p = d.clone();
        down(&mut p, 3);
        assert!(contains_point(&p, 3, &[0, 0, 5]));
        assert!(contains_point(&p, 3, &[0, 3, 8]));
        assert!(!contains_point(&p, 3, &[0, 3, 7]));
        assert!(!contains_point(&p, 3, &[0, 6, 11]));
    }

    #[test]
    fn test_update_value() {
        let mut d = zone(3, &[(1, 2, 8), (2, 1, 3)]);
        update_value(&mut d, 3, 1, 0);
        assert!(contains_point(&d, 3, &[0, 0, 2]));
        assert!(!contains_point(&d, 3, &[0, 1, 2]));
        // x2 untouched.
        assert!(!contains_point(&d, 3, &[0, 0, 4]));
    }

    #[test]
    fn test_free_clock() {
        let mut d = zone(3, &[(1, 2, 8), (2, 1, 3)]);
        free_clock(&mut d, 3, 1);
        assert!(contains_point(&d, 3, &[0, 100, 2]));
        assert!(contains_point(&d, 3, &[0, 0, 2]));
        assert!(!contains_point(&d, 3, &[0, 5, 4]));
    }

    #[test]
    fn test_intersection() {
        let a = zone(2, &[(1, 0, 5)]);
        let b = zone(2, &[(1, 3, 9)]);
        let mut c = a.clone();
        assert!(intersection(&mut c, &b, 2));
        assert!(contains_point(&c, 2, &[0, 4]));
        assert!(!contains_point(&c, 2, &[0, 2]));
        assert!(!contains_point(&c, 2, &[0, 6]));

        let far = zone(2, &[(1, 7, 9)]);
        let mut c = a.clone();
        assert!(!intersection(&mut c, &far, 2));
    }

    #[test]
    fn test_subtract_splits_interval() {
        let a = zone(2, &[(1, 0, 10)]);
        let b = zone(2, &[(1, 4, 6)]);
        let parts = subtract(&a, &b, 2);
        assert!(fed_contains_point(&parts, 2, &[0, 3]));
        assert!(fed_contains_point(&parts, 2, &[0, 7]));
        assert!(!fed_contains_point(&parts, 2, &[0, 5]));
        assert!(!fed_contains_point(&parts, 2, &[0, 4]));
        assert!(!fed_contains_point(&parts, 2, &[0, 11]));
    }

    #[test]
    fn test_subtract_contained_is_empty() {
        let a = zone(2, &[(1, 4, 6)]);
        let b = zone(2, &[(1, 0, 10)]);
        assert!(subtract(&a, &b, 2).is_empty());
    }

    #[test]
    fn test_predt_avoiding_zone_below() {
        // good: x1 in [6, 10]; bad: x1 <= 4. Delaying from any x1 <= 4
        // starts inside bad, so only (4, 10] remains.
        let good = zone(2, &[(1, 6, 10)]);
        let bad = vec![zone(2, &[(1, 0, 4)])];
        let p = predt(&good, &bad, 2);
        assert!(fed_contains_point(&p, 2, &[0, 5]));
        assert!(fed_contains_point(&p, 2, &[0, 10]));
        assert!(!fed_contains_point(&p, 2, &[0, 4]));
        assert!(!fed_contains_point(&p, 2, &[0, 0]));
        assert!(!fed_contains_point(&p, 2, &[0, 11]));
    }

    #[test]
    fn test_predt_avoiding_zone_inside() {
        // good: x1 in [6, 10]; bad: x1 in [7, 9]. From below, the goal is
        // entered at 6 before bad starts; [7, 9] itself is excluded.
        let good = zone(2, &[(1, 6, 10)]);
        let bad = vec![zone(2, &[(1, 7, 9)])];
        let p = predt(&good, &bad, 2);
        assert!(fed_contains_point(&p, 2, &[0, 0]));
        assert!(fed_contains_point(&p, 2, &[0, 6]));
        assert!(!fed_contains_point(&p, 2, &[0, 7]));
        assert!(!fed_contains_point(&p, 2, &[0, 8]));
        assert!(!fed_contains_point(&p, 2, &[0, 9]));
        assert!(fed_contains_point(&p, 2, &[0, 10]));
        assert!(!fed_contains_point(&p, 2, &[0, 11]));
    }

    #[test]
    fn test_predt_of_universal_bad_is_empty() {
        let good = zone(2, &[(1, 6, 10)]);
        let mut universal = vec![0; 4];
        init(&mut universal, 2);
        assert!(predt(&good, &[universal], 2).is_empty());
    }

    #[test]
    fn test_predt_no_bad_is_past() {
        let good = zone(2, &[(1, 6, 10)]);
        let p = predt(&good, &[], 2);
        let mut past = good.clone();
        down(&mut past, 2);
        for x in 0..12 {
            assert_eq!(
                fed_contains_point(&p, 2, &[0, x]),
                contains_point(&past, 2, &[0, x]),
                "x1 = {}",
                x
            );
        }
    }
}
