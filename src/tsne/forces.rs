//! Repulsive and attractive t-SNE forces
//!
//! With `w_ij = 1 / (1 + |y_i - y_j|^2)` and `Z = sum_{i != j} w_ij`, the
//! gradient of the KL divergence is
//! `4 * (sum_j p_ij w_ij (y_i - y_j) - sum_j w_ij^2 (y_i - y_j) / Z)`.
//! Repulsion approximates the second sum with a Barnes-Hut traversal of the
//! quad-tree; attraction walks the rows of the sparse affinity matrix.
//!
//! Both passes write one value per point and leave the reductions to the
//! caller, which sums them in index order.

use crate::data::CsrMatrix;
use crate::tsne::quadtree::QuadTree;
use rayon::prelude::*;

/// Squared distance thresholds per tree level
///
/// A node at depth `d` is summarised by its centroid once the squared
/// distance to it exceeds `dq[d] = (cell_size(d) / theta)^2`. `theta = 0`
/// disables the approximation.
pub fn distance_thresholds(tree: &QuadTree, theta: f64) -> Vec<f64> {
    (0..tree.depth())
        .map(|level| {
            if theta > 0.0 {
                let ratio = tree.cell_size(level) / theta;
                ratio * ratio
            } else {
                f64::INFINITY
            }
        })
        .collect()
}

/// Barnes-Hut repulsion
///
/// Fills `forces[i] = sum_j w_ij^2 (y_i - y_j)` and `z_terms[i] = sum_j w_ij`
/// and returns `Z`, the sum of `z_terms` in index order.
pub fn repulsion(
    tree: &QuadTree,
    points: &[[f64; 2]],
    theta: f64,
    forces: &mut [[f64; 2]],
    z_terms: &mut [f64],
) -> f64 {
    let dq = distance_thresholds(tree, theta);
    forces
        .par_iter_mut()
        .zip(z_terms.par_iter_mut())
        .enumerate()
        .for_each_init(
            || Vec::with_capacity(4 * tree.depth().max(1)),
            |stack, (i, (force, z))| {
                let (f, zi) = repulsion_on(tree, points, &dq, i, stack);
                *force = f;
                *z = zi;
            },
        );
    z_terms.iter().sum()
}

fn repulsion_on(
    tree: &QuadTree,
    points: &[[f64; 2]],
    dq: &[f64],
    i: usize,
    stack: &mut Vec<(usize, usize)>,
) -> ([f64; 2], f64) {
    let p = points[i];
    let mut force = [0.0; 2];
    let mut z = 0.0;

    stack.clear();
    stack.push((tree.root(), 0));
    while let Some((k, level)) = stack.pop() {
        let node = tree.node(k);
        if node.is_leaf() {
            for &j in tree.leaf_points(k) {
                if j == i {
                    continue;
                }
                let dx = p[0] - points[j][0];
                let dy = p[1] - points[j][1];
                let w = 1.0 / (1.0 + dx * dx + dy * dy);
                z += w;
                force[0] += w * w * dx;
                force[1] += w * w * dy;
            }
            continue;
        }

        let c = tree.centroid(k);
        let dx = p[0] - c[0];
        let dy = p[1] - c[1];
        let d2 = dx * dx + dy * dy;
        // A cell holding `i` itself is always opened so its centroid never counts `i`
        if d2 > dq[level] && !tree.contains(k, i) {
            let count = node.count() as f64;
            let w = 1.0 / (1.0 + d2);
            z += count * w;
            force[0] += count * w * w * dx;
            force[1] += count * w * w * dy;
        } else {
            for child in node.children() {
                stack.push((child, level + 1));
            }
        }
    }
    (force, z)
}

/// Attraction along the rows of `affinity`
///
/// Fills `forces[i] = sum_j p_ij w_ij (y_i - y_j)`. With `kl_terms` given,
/// also stores each row's share of `KL(P || Q)`, `q_ij = w_ij / z_norm`.
pub fn attraction(
    affinity: &CsrMatrix,
    points: &[[f64; 2]],
    z_norm: f64,
    forces: &mut [[f64; 2]],
    kl_terms: Option<&mut [f64]>,
) {
    let row_force = |i: usize, kl: Option<&mut f64>| -> [f64; 2] {
        let (cols, values) = affinity.row(i);
        let p = points[i];
        let mut force = [0.0; 2];
        let mut divergence = 0.0;
        for (&j, &p_ij) in cols.iter().zip(values) {
            if j == i {
                continue;
            }
            let dx = p[0] - points[j][0];
            let dy = p[1] - points[j][1];
            let w = 1.0 / (1.0 + dx * dx + dy * dy);
            force[0] += p_ij * w * dx;
            force[1] += p_ij * w * dy;
            if p_ij > 0.0 {
                let q_ij = (w / z_norm).max(f64::MIN_POSITIVE);
                divergence += p_ij * (p_ij / q_ij).ln();
            }
        }
        if let Some(kl) = kl {
            *kl = divergence;
        }
        force
    };

    match kl_terms {
        Some(kl_terms) => forces
            .par_iter_mut()
            .zip(kl_terms.par_iter_mut())
            .enumerate()
            .for_each(|(i, (f, kl))| *f = row_force(i, Some(kl))),
        None => forces
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, f)| *f = row_force(i, None)),
    }
}
