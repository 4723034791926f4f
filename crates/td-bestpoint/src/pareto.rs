//! Dominance, frontier extraction, threshold inference and hypervolume over
//! plain objective vectors.

use rayon::prelude::*;

/// Share of the frontier's range by which inferred thresholds sit beyond
/// its nadir.
pub const THRESHOLD_PADDING: f64 = 0.1;

/// Whether `a` Pareto-dominates `b`: no worse in every objective and strictly
/// better in at least one.
pub fn dominates(a: &[f64], b: &[f64], minimize: &[bool]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), minimize.len());

    let mut strictly_better = false;
    for ((&av, &bv), &min) in a.iter().zip(b).zip(minimize) {
        let (better, worse) = if min { (av < bv, av > bv) } else { (av > bv, av < bv) };
        if worse {
            return false;
        }
        if better {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Indices of the non-dominated vectors, in input order.
pub fn pareto_frontier(values: &[Vec<f64>], minimize: &[bool]) -> Vec<usize> {
    (0..values.len())
        .into_par_iter()
        .filter(|&i| {
            !values
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && dominates(other, &values[i], minimize))
        })
        .collect()
}

/// Reference point just past the worst frontier value of each objective.
///
/// Returns `None` when there are no values.
pub fn infer_thresholds(values: &[Vec<f64>], minimize: &[bool]) -> Option<Vec<f64>> {
    let frontier = pareto_frontier(values, minimize);
    if frontier.is_empty() {
        return None;
    }
    let thresholds = minimize
        .iter()
        .enumerate()
        .map(|(k, &min)| {
            let column = frontier.iter().map(|&i| values[i][k]);
            let (lo, hi) = column.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
            let padding = THRESHOLD_PADDING * (hi - lo);
            if min {
                hi + padding
            } else {
                lo - padding
            }
        })
        .collect();
    Some(thresholds)
}

/// Volume dominated by `values` and bounded by `reference`.
///
/// Vectors that do not strictly improve on the reference in every objective
/// contribute nothing.
pub fn hypervolume(values: &[Vec<f64>], reference: &[f64], minimize: &[bool]) -> f64 {
    // Distances past the reference, oriented so larger is better.
    let gains: Vec<Vec<f64>> = values
        .iter()
        .map(|v| {
            v.iter()
                .zip(reference)
                .zip(minimize)
                .map(|((&x, &r), &min)| if min { r - x } else { x - r })
                .collect::<Vec<f64>>()
        })
        .filter(|g| g.iter().all(|&d| d > 0.0))
        .collect();
    if gains.is_empty() || reference.is_empty() {
        return 0.0;
    }
    sliced_volume(gains, reference.len())
}

/// Exact volume of the union of boxes `[0, g]`, slicing along the last
/// objective.
fn sliced_volume(mut gains: Vec<Vec<f64>>, dims: usize) -> f64 {
    if dims == 1 {
        return gains.iter().map(|g| g[0]).fold(0.0, f64::max);
    }
    let last = dims - 1;
    gains.sort_by(|a, b| b[last].total_cmp(&a[last]));

    let mut volume = 0.0;
    for i in 0..gains.len() {
        let height = gains[i][last] - gains.get(i + 1).map_or(0.0, |g| g[last]);
        if height > 0.0 {
            let slice: Vec<Vec<f64>> = gains[..=i].iter().map(|g| g[..last].to_vec()).collect();
            volume += height * sliced_volume(slice, last);
        }
    }
    volume
}
