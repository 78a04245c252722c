// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Per-partition steps of the SODA bin packing, which assigns every join key to a partition so
//! that each partition receives about `M / P` output rows.
//!
//! The steps run on the union of the per-key counts of both sides, laid out as the join columns
//! followed by the count, and co-located by key.

use super::LocalTable;
use crate::{obliv, Result, TableError, Value};
use subtle::{Choice, ConditionallySelectable, ConstantTimeLess};

impl LocalTable {
    /// Sorts on `cols` and replaces each pair of equal keys, one count from each side, by a
    /// single real row holding the product of the counts in `count_col`. Keys present on one
    /// side only become dummies. Returns the local sum of the products.
    pub fn soda_step1(&mut self, cols: &[usize], count_col: usize) -> Result<i64> {
        self.check_cols(cols)?;
        self.check_cols(&[count_col])?;
        self.sort(cols, true)?;

        let n = self.tuples.len();
        let mut products = vec![0i64; n];
        let mut matched = vec![Choice::from(0); n];
        for i in 1..n {
            let (prev, cur) = (&self.tuples[i - 1], &self.tuples[i]);
            let pair = !prev.ct_is_dummy() & !cur.ct_is_dummy() & prev.ct_equal_in_cols(cur, cols);
            let mut w = i64::from(prev.data[count_col]) * i64::from(cur.data[count_col]);
            w.conditional_assign(&0, !pair);
            products[i] = w;
            matched[i] = pair;
        }

        let mut total = 0i64;
        for ((t, w), pair) in self.tuples.iter_mut().zip(products).zip(matched) {
            t.data[count_col] = Value::try_from(w).map_err(|_| {
                TableError::Shape(format!("{} output rows for one key do not fit a column", w))
            })?;
            t.ct_mark_dummy(!pair);
            total += w;
        }
        Ok(total)
    }

    /// With the product `W` and its global inclusive prefix sum `C` as the last two columns,
    /// replaces `C` by the bin the key starts in: `(C - W) / cap`.
    pub fn soda_step2(&mut self, cap: usize) -> Result<()> {
        if self.num_columns < 2 || cap == 0 {
            return Err(TableError::Shape(format!(
                "binning needs two columns and a positive capacity, got {} and {}",
                self.num_columns, cap
            )));
        }
        let (w_col, c_col) = (self.num_columns - 2, self.num_columns - 1);
        let cap = cap as i64;
        for t in &mut self.tuples {
            let start = i64::from(t.data[c_col]) - i64::from(t.data[w_col]);
            t.data[c_col] = Value::try_from(start.max(0) / cap)?;
        }
        Ok(())
    }

    /// Maps the bins in the last column onto partitions, folding any bin past the last
    /// partition into it.
    pub fn soda_step3(&mut self) -> Result<()> {
        if self.num_columns == 0 {
            return Err(TableError::Shape("no bin column".into()));
        }
        let e_col = self.num_columns - 1;
        let last = (self.num_partitions - 1) as u64;
        for t in &mut self.tuples {
            let mut bin = u64::from(t.data[e_col].max(0) as u32);
            bin.conditional_assign(&last, last.ct_lt(&bin));
            t.data[e_col] = bin as Value;
        }
        Ok(())
    }

    /// Moves the real rows to the front, keeping their order.
    pub fn soda_step5(&mut self) -> Result<()> {
        let markers: Vec<u8> = self
            .tuples
            .iter()
            .map(|t| (!t.ct_is_dummy()).unwrap_u8())
            .collect();
        obliv::compact(&mut self.tuples, &markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::real_rows, tuple::Tuple};

    fn table(p: usize, rows: Vec<Vec<Value>>) -> LocalTable {
        let width = rows.first().map_or(2, Vec::len);
        LocalTable::new(5, 0, p, width, rows.into_iter().map(Tuple::new).collect()).unwrap()
    }

    #[test]
    fn step1_multiplies_matching_counts() {
        // Counts from S then R: key 1 on both sides, key 2 on S only, key 3 on both.
        let mut t = table(2, vec![vec![1, 2], vec![2, 5], vec![3, 1], vec![3, 4], vec![1, 3]]);
        assert_eq!(t.soda_step1(&[0], 1).unwrap(), 10);
        assert_eq!(real_rows(&t), vec![vec![1, 6], vec![3, 4]]);
    }

    #[test]
    fn steps_assign_bins() {
        // W and inclusive prefix C, capacity 5 over 2 partitions.
        let mut t = table(2, vec![vec![1, 6, 6], vec![3, 4, 10], vec![4, 3, 13]]);
        t.soda_step2(5).unwrap();
        assert_eq!(real_rows(&t), vec![vec![1, 6, 0], vec![3, 4, 1], vec![4, 3, 2]]);
        t.soda_step3().unwrap();
        assert_eq!(real_rows(&t), vec![vec![1, 6, 0], vec![3, 4, 1], vec![4, 3, 1]]);
        assert!(t.soda_step2(0).is_err());
    }

    #[test]
    fn step1_rejects_products_past_the_column_range() {
        let mut t = table(2, vec![vec![1, 70_000], vec![1, 70_000], vec![2, 3]]);
        assert!(matches!(t.soda_step1(&[0], 1), Err(TableError::Shape(_))));

        let mut fits = table(2, vec![vec![1, 40_000], vec![1, 50_000]]);
        assert_eq!(fits.soda_step1(&[0], 1).unwrap(), 2_000_000_000);
    }

    #[test]
    fn step5_compacts_real_rows() {
        let mut t = table(1, vec![vec![1, 1], vec![2, 2], vec![3, 3]]);
        t.tuples[0].ct_mark_dummy(Choice::from(1));
        t.soda_step5().unwrap();
        assert_eq!(t.tuples()[0].data, vec![2, 2]);
        assert_eq!(t.tuples()[1].data, vec![3, 3]);
        assert!(t.tuples()[2].is_dummy());
    }
}
