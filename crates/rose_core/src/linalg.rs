//! Fixed-size linear algebra for the 5×5 bias matrices.
//!
//! Shapes are part of the types, so there is no runtime shape checking.

use crate::neuron::NUM_SLOTS;

pub type Vec5 = [f64; NUM_SLOTS];
pub type Mat5 = [[f64; NUM_SLOTS]; NUM_SLOTS];

pub const UNIFORM: f64 = 1.0 / NUM_SLOTS as f64;

pub fn uniform_row() -> Vec5 {
    [UNIFORM; NUM_SLOTS]
}

pub fn uniform_matrix() -> Mat5 {
    [uniform_row(); NUM_SLOTS]
}

pub fn identity() -> Mat5 {
    let mut m = [[0.0; NUM_SLOTS]; NUM_SLOTS];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

pub fn mat_mul(a: &Mat5, b: &Mat5) -> Mat5 {
    let mut out = [[0.0; NUM_SLOTS]; NUM_SLOTS];
    for i in 0..NUM_SLOTS {
        for k in 0..NUM_SLOTS {
            let a_ik = a[i][k];
            for j in 0..NUM_SLOTS {
                out[i][j] += a_ik * b[k][j];
            }
        }
    }
    out
}

pub fn transpose(m: &Mat5) -> Mat5 {
    let mut t = [[0.0; NUM_SLOTS]; NUM_SLOTS];
    for i in 0..NUM_SLOTS {
        for j in 0..NUM_SLOTS {
            t[j][i] = m[i][j];
        }
    }
    t
}

pub fn mat_vec(m: &Mat5, v: &Vec5) -> Vec5 {
    let mut out = [0.0; NUM_SLOTS];
    for (i, row) in m.iter().enumerate() {
        out[i] = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
    }
    out
}

/// Scale to sum 1. `None` when the sum is zero, negative or not finite.
pub fn normalize(v: &Vec5) -> Option<Vec5> {
    let sum: f64 = v.iter().sum();
    if !sum.is_finite() || sum <= 0.0 || v.iter().any(|x| !x.is_finite() || *x < 0.0) {
        return None;
    }
    let mut out = *v;
    for x in out.iter_mut() {
        *x /= sum;
    }
    Some(out)
}

/// Row-normalize; degenerate rows become uniform. Returns the number of
/// rows that needed the fallback.
pub fn normalize_rows(m: &Mat5) -> (Mat5, usize) {
    let mut out = *m;
    let mut degenerate = 0;
    for row in out.iter_mut() {
        match normalize(row) {
            Some(r) => *row = r,
            None => {
                *row = uniform_row();
                degenerate += 1;
            }
        }
    }
    (out, degenerate)
}

/// Index of the largest component; ties go to the lowest index.
pub fn argmax(v: &Vec5) -> usize {
    let mut best = 0;
    for i in 1..NUM_SLOTS {
        if v[i] > v[best] {
            best = i;
        }
    }
    best
}

fn l2_normalize(v: &Vec5) -> Option<Vec5> {
    let norm = libm::sqrt(v.iter().map(|x| x * x).sum());
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    let mut out = *v;
    for x in out.iter_mut() {
        *x /= norm;
    }
    Some(out)
}

/// Dominant eigenpair of `m` by power iteration on the lazy matrix
/// `(m + I) / 2`, which shares eigenvectors with `m` but maps an eigenvalue
/// of -1 to 0, so periodic stochastic matrices still converge.
///
/// The eigenvector is L2-normalized with a non-negative leading sign.
/// Returns `None` if the iteration does not settle within `max_iterations`
/// or produces non-finite values.
pub fn dominant_eigenpair(m: &Mat5, max_iterations: usize, tolerance: f64) -> Option<(f64, Vec5)> {
    let mut lazy = *m;
    for (i, row) in lazy.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = 0.5 * (*x + if i == j { 1.0 } else { 0.0 });
        }
    }

    let mut v = l2_normalize(&[1.0; NUM_SLOTS])?;
    for _ in 0..max_iterations {
        let next = l2_normalize(&mat_vec(&lazy, &v))?;
        let delta = next
            .iter()
            .zip(v.iter())
            .map(|(a, b)| libm::fabs(a - b))
            .fold(0.0, f64::max);
        v = next;
        if delta < tolerance {
            let mv = mat_vec(m, &v);
            let lambda: f64 = mv.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
            if !lambda.is_finite() {
                return None;
            }
            if v.iter().sum::<f64>() < 0.0 {
                for x in v.iter_mut() {
                    *x = -*x;
                }
            }
            return Some((lambda, v));
        }
    }
    None
}
