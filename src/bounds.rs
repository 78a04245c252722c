// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Padding bounds derived from Chernoff tail bounds.
//!
//! Each bound caps the number of real rows a bucket can receive so that, for uniformly spread
//! rows, overflow happens with probability below `exp(-κ)`.

use std::f64::consts::LN_2;

/// The default statistical security parameter σ; κ = σ·ln 2.
pub const DEFAULT_SIGMA: f64 = 40.0;

/// Computes padding sizes for a fixed failure exponent κ.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SizeBounds {
    kappa: f64,
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self::from_sigma(DEFAULT_SIGMA)
    }
}

// Saturates on overflow and maps NaN to zero.
fn ceil_to_usize(x: f64) -> usize {
    x.ceil() as usize
}

impl SizeBounds {
    pub fn new(kappa: f64) -> Self {
        Self { kappa }
    }

    /// Bounds with failure probability `2^-sigma`.
    pub fn from_sigma(sigma: f64) -> Self {
        Self::new(sigma * LN_2)
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    // Largest root of x^2 = b x + c with c = 2b.
    fn overshoot(&self, n: f64, p: f64) -> f64 {
        let b = (self.kappa + 2.0 * p.ln()) * p / n;
        let c = 2.0 * b;
        ((b * b + 4.0 * c).sqrt() + b) / 2.0
    }

    /// Per-bucket capacity when `n` rows are spread over `p` buckets.
    pub fn get_size_bound(&self, n: usize, p: usize) -> usize {
        if n == 0 || p == 0 {
            return 0;
        }
        let (nf, pf) = (n as f64, p as f64);
        ceil_to_usize((1.0 + self.overshoot(nf, pf)) * nf / pf)
    }

    /// Per-bucket capacity for sample sort: `total` rows overall, pivots drawn from a sample of
    /// `sample` rows, and `local` rows on the bucketing partition. Never exceeds `local`.
    pub fn for_sorting(&self, total: usize, p: usize, sample: usize, local: usize) -> usize {
        if local == 0 || p == 0 {
            return 0;
        }
        if sample == 0 {
            return local;
        }
        let (n, pf, n0, ni) = (total.max(1) as f64, p as f64, sample as f64, local as f64);
        let b = 2.0 * (self.kappa + 1.0 + n.ln()) * pf / n0;
        let c1 = (b + (b * b + 4.0 * b).sqrt()) / 2.0;
        let b = (self.kappa + 1.0 + 2.0 * pf.ln()) * pf * (1.0 + c1) / ni;
        let c2 = (b + (b * b + 8.0 * b).sqrt()) / 2.0;
        ceil_to_usize((1.0 + c1) * (1.0 + c2) * ni / pf).min(local)
    }

    /// Per-bucket capacity for the SODA shuffle of `n1 + n2` rows whose keys have at most `a1`
    /// and `a2` duplicates on either side. Never exceeds `threshold`.
    pub fn soda(
        &self,
        n1: usize,
        n2: usize,
        a1: usize,
        a2: usize,
        p: usize,
        threshold: usize,
    ) -> usize {
        let bin_max = a1 + a2;
        if bin_max == 0 || p == 0 {
            return threshold;
        }
        let bin_min = bin_max.div_ceil(2);
        let num_bins_max = (n1 + n2) / bin_min;
        let num_bins_min = (n1 + n2) / bin_max;
        if num_bins_min == 0 {
            return threshold;
        }
        let pf = p as f64;
        let x = self.overshoot(num_bins_min as f64 / pf, pf);
        let bound = ceil_to_usize((1.0 + x) * (num_bins_max * bin_max) as f64 / pf / pf);
        bound.min(threshold)
    }
}

/// Splits `n` sorted rows into `p` near-equal runs. Returns the `p + 1` run boundaries, the
/// first `n % p` runs being one row longer.
pub fn quantile_index(n: usize, p: usize) -> Vec<usize> {
    if p == 0 {
        return vec![n];
    }
    let (q, r) = (n / p, n % p);
    let mut out = Vec::with_capacity(p + 1);
    let mut id = 0;
    for i in 0..p {
        out.push(id);
        id += if i < r { q + 1 } else { q };
    }
    debug_assert_eq!(id, n);
    out.push(n);
    out
}
