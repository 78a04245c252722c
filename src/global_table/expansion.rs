// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

use super::GlobalTable;
use crate::{local_table::Phase, operators::AssociateOperator, task::Task, Result, TableError};
use log::debug;

impl GlobalTable {
    /// Repeats every real row as many times as `d_col` says, keeping the row order. `total` must
    /// be the sum of `d_col`; the result holds `m = max(1, ceil(total / P))` slots per partition,
    /// which is returned. Drops `d_col` afterwards if `delete` is set.
    pub fn expansion(&mut self, d_col: usize, total: u64, delete: bool) -> Result<usize> {
        self.check_cols(&[d_col])?;
        let metrics = self.cluster.metrics().clone();
        let _timer = metrics.phase("expansion");
        let p = self.num_partitions();
        let m = usize::try_from(total.div_ceil(p as u64))?.max(1);
        debug!("table {}: expanding {} rows into {} x {}", self.id, total, p, m);

        self.each(|_| Task::ExpansionPrepare {
            table: self.id,
            col: d_col,
        })?;
        self.copy_col(d_col, "L")?;
        let l = self.num_columns() - 1;
        self.prefix_aggregate(&AssociateOperator::add(vec![], l), false)?;
        let placed = self.max(l)?;
        if i64::from(placed) > total as i64 {
            return Err(TableError::Shape(format!(
                "multiplicities add up to {}, not {}",
                placed, total
            )));
        }

        self.each(|_| Task::ExpansionTargets {
            table: self.id,
            col: d_col,
            m,
        })?;
        self.column_names.extend(["T".to_string(), "P".to_string()]);
        self.random_shuffle()?;
        let bound = self.cluster.bounds().get_size_bound(m, p);
        self.shuffle_by_col(self.num_columns() - 2, bound)?;
        self.each(|_| Task::ExpansionDistribute { table: self.id, m })?;
        self.column_names.truncate(self.column_names.len() - 3);

        let fill = |phase| Task::ExpansionFill {
            table: self.id,
            phase,
        };
        self.each(|_| fill(Phase::Boundary))?;
        self.cluster.run_on(0, fill(Phase::Combine))?;
        self.each(|_| fill(Phase::Apply))?;

        if delete {
            self.delete_col(d_col)?;
        }
        Ok(m)
    }
}
