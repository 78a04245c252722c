// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The primary-key join and the bounded-output many-to-many join.
//!
//! Both joins write their result into `self`: the columns of `self` with the join columns moved
//! first, followed by the non-join columns of the other side.

use super::GlobalTable;
use crate::{local_table::DUMMY_VAL, operators::AssociateOperator, task::Task, Result, TableError};
use log::info;
use rand::Rng;

pub(super) fn check_join_cols(r_cols: &[usize], s_cols: &[usize]) -> Result<usize> {
    if r_cols.len() != s_cols.len() || r_cols.is_empty() {
        return Err(TableError::Shape(format!(
            "join columns {:?} and {:?} do not pair up",
            r_cols, s_cols
        )));
    }
    Ok(r_cols.len())
}

impl GlobalTable {
    /// Joins `self` with `s`, whose join columns must be a key of `s`. Rows of `self` without a
    /// partner become dummies; every partition keeps its number of slots.
    pub fn pkjoin(&mut self, mut s: GlobalTable, r_cols: &[usize], s_cols: &[usize]) -> Result<()> {
        let jc = check_join_cols(r_cols, s_cols)?;
        let metrics = self.cluster.metrics().clone();
        let _timer = metrics.phase("pkjoin");
        self.move_cols_ahead(r_cols)?;
        s.move_cols_ahead(s_cols)?;
        let (ori_r, s_names) = (self.num_columns(), s.column_names[jc..].to_vec());
        let align = s_names.len();
        let home_sizes = self.partition_sizes()?;

        // R: [R, filler.., I, Z]; S: [key, filler.., S values, -1, 0].
        for _ in 0..align {
            self.append_col("filler", DUMMY_VAL)?;
        }
        self.each(|_| Task::TagForeignRows {
            table: self.id,
            num_join_cols: jc,
        })?;
        self.column_names.extend(["I".to_string(), "Z".to_string()]);
        for _ in jc..ori_r {
            s.insert_col(jc, "filler", DUMMY_VAL)?;
        }
        s.append_col("I", -1)?;
        s.append_col("Z", 0)?;

        let z = self.num_columns() - 1;
        let mut key: Vec<usize> = (0..jc).collect();
        key.push(z);
        let seed = rand::thread_rng().gen();
        self.shuffle_by_key(&key, seed)?;
        s.shuffle_by_key(&key, seed)?;

        self.each(|_| Task::PkJoinCombine {
            table: self.id,
            other: s.id,
            num_join_cols: jc,
            ori_r,
            align,
        })?;
        drop(s);

        let max_home = home_sizes.iter().copied().max().unwrap_or(0);
        let bound = self
            .cluster
            .bounds()
            .get_size_bound(max_home, self.num_partitions())
            .min(max_home);
        self.shuffle_by_col(z - 1, bound)?;
        self.fit_to(&home_sizes)?;
        self.each(|_| Task::FinalizePkJoin {
            table: self.id,
            num_join_cols: jc,
            ori_r,
            align,
        })?;
        self.delete_col(z)?;
        self.delete_col(z - 1)?;
        self.column_names.truncate(ori_r);
        self.column_names.extend(s_names);
        Ok(())
    }

    /// Joins `self` with `s` on arbitrary keys. The result is spread evenly, `ceil(M / P)` slots
    /// per partition, where `M` is the number of output rows. Returns `M`.
    pub fn join(&mut self, mut s: GlobalTable, r_cols: &[usize], s_cols: &[usize]) -> Result<u64> {
        let jc = check_join_cols(r_cols, s_cols)?;
        let metrics = self.cluster.metrics().clone();
        let _timer = metrics.phase("join");
        self.move_cols_ahead(r_cols)?;
        s.move_cols_ahead(s_cols)?;
        let (r_names, s_names) = (self.column_names.clone(), s.column_names[jc..].to_vec());
        let key: Vec<usize> = (0..jc).collect();

        self.sort(&key)?;
        s.sort(&key)?;
        self.compute_degrees(&key)?;
        s.compute_degrees(&key)?;
        let r_degrees = self.degree_table(&key)?;
        let s_degrees = s.degree_table(&key)?;
        self.delete_col(self.num_columns() - 1)?;

        // R: [R, deg_s]; S: [S, deg_s, deg_r].
        self.pkjoin(s_degrees, &key, &key)?;
        s.pkjoin(r_degrees, &key, &key)?;
        let total = u64::try_from(self.sum(self.num_columns() - 1)?)?;
        info!("join of tables {} and {}: {} output rows", self.id, s.id, total);

        let m = self.expansion(self.num_columns() - 1, total, true)?;
        s.expansion(s.num_columns() - 1, total, false)?;

        // Index within the key group, then the group's first output position.
        s.append_col("i", 1)?;
        s.prefix_aggregate(&AssociateOperator::add(key.clone(), s.num_columns() - 1), false)?;
        s.append_col("j", 1)?;
        let j = s.num_columns() - 1;
        s.prefix_aggregate(&AssociateOperator::add(vec![], j), false)?;
        s.prefix_aggregate(&AssociateOperator::min(key.clone(), j), false)?;
        s.each(|_| Task::JoinAlignment { table: s.id, m })?;
        s.column_names.extend(["slot".to_string(), "target".to_string()]);

        s.random_shuffle()?;
        let bound = self
            .cluster
            .bounds()
            .get_size_bound(m, self.num_partitions());
        s.shuffle_by_col(s.num_columns() - 1, bound)?;
        s.each(|_| Task::JoinFinalCombine {
            table: s.id,
            other: self.id,
            num_join_cols: jc,
        })?;
        self.column_names = r_names;
        self.column_names.extend(s_names);
        Ok(total)
    }
}
