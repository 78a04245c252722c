// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The SODA join: keys are packed into per-partition bins by their output size, both sides are
//! routed to the bin of their key and every partition joins locally.

use super::{join::check_join_cols, GlobalTable};
use crate::{operators::AssociateOperator, task::Task, Result, TableError, Value};
use log::info;
use rand::Rng;

/// What a [`GlobalTable::soda_join`] learned about its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SodaStats {
    /// Largest number of rows sharing a key on the right side.
    pub a1: usize,
    /// Largest number of rows sharing a key on the left side.
    pub a2: usize,
    pub output_rows: u64,
    /// Output rows each bin is packed to before spilling into the next one.
    pub bin_capacity: usize,
}

impl GlobalTable {
    /// One row per key of `self`'s first `jc` columns holding the number of its rows.
    fn key_counts(&self, jc: usize, seed: u64) -> Result<(GlobalTable, usize)> {
        let mut counts = self.copy()?;
        counts.project(&(0..jc).collect::<Vec<_>>())?;
        counts.append_col("count", 1)?;
        counts.soda_group_by_aggregate(&AssociateOperator::add((0..jc).collect(), jc), seed)?;
        let most = usize::try_from(counts.max(jc)?.max(0))?;
        Ok((counts, most))
    }

    /// Joins `self` with `s` on arbitrary keys. Each key is assigned to one partition so that
    /// partitions receive about `M / P` output rows, where `M` is the size of the join.
    pub fn soda_join(&mut self, mut s: GlobalTable, r_cols: &[usize], s_cols: &[usize]) -> Result<SodaStats> {
        let jc = check_join_cols(r_cols, s_cols)?;
        let metrics = self.cluster.metrics().clone();
        let _timer = metrics.phase("soda_join");
        let p = self.num_partitions();
        self.move_cols_ahead(r_cols)?;
        s.move_cols_ahead(s_cols)?;
        let (r_names, s_names) = (self.column_names.clone(), s.column_names[jc..].to_vec());
        let (n1, n2) = (self.size()?, s.size()?);
        self.random_shuffle()?;
        s.random_shuffle()?;

        let seed = rand::thread_rng().gen();
        let (mut bins, a1) = s.key_counts(jc, seed)?;
        let (r_counts, a2) = self.key_counts(jc, seed)?;
        bins.union(&r_counts)?;
        drop(r_counts);

        // bins: [key, W] with W the output size of the key, then the bin it starts in.
        let key: Vec<usize> = (0..jc).collect();
        let total: i64 = bins
            .each(|_| Task::SodaStep1 {
                table: bins.id,
                cols: key.clone(),
                count_col: jc,
            })?
            .into_iter()
            .map(|r| r.into_int())
            .sum::<Result<i64>>()?;
        if Value::try_from(total).is_err() {
            return Err(TableError::Shape(format!(
                "{} output rows overflow the running bin totals",
                total
            )));
        }
        let total = u64::try_from(total)?;
        let cap = usize::try_from(total.div_ceil(p as u64))?.max(1);
        info!(
            "soda join of tables {} and {}: {} output rows, degrees {} and {}, bins of {}",
            self.id, s.id, total, a1, a2, cap
        );

        bins.copy_col(jc, "C")?;
        bins.prefix_aggregate(&AssociateOperator::add(vec![], jc + 1), false)?;
        bins.each(|_| Task::SodaStep2 { table: bins.id, cap })?;
        bins.each(|_| Task::SodaStep3 { table: bins.id })?;
        bins.each(|_| Task::SodaStep5 { table: bins.id })?;
        bins.delete_col(jc)?;

        self.pkjoin(bins.copy()?, &key, &key)?;
        s.pkjoin(bins, &key, &key)?;
        let threshold = self.cluster.bounds().get_size_bound(cap + a1 * a2, p);
        let bound = self.cluster.bounds().soda(n1, n2, a1, a2, p, threshold);
        self.shuffle_by_col(self.num_columns() - 1, bound)?;
        s.shuffle_by_col(s.num_columns() - 1, bound)?;
        self.delete_col(self.num_columns() - 1)?;
        s.delete_col(s.num_columns() - 1)?;

        let output_bound = (a1 > 1).then(|| cap + a1 * a2);
        self.each(|_| Task::LocalJoin {
            table: self.id,
            other: s.id,
            num_join_cols: jc,
            bound: output_bound,
        })?;
        self.column_names = r_names;
        self.column_names.extend(s_names);
        Ok(SodaStats {
            a1,
            a2,
            output_rows: total,
            bin_capacity: cap,
        })
    }
}
