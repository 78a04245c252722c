// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Tables spread over every partition of a [`Cluster`], and the multi-phase protocols that
//! transform them.
//!
//! Every protocol is a sequence of phases. A phase runs one [`Task`] per partition and returns
//! once all of them have finished, so each phase observes every slot written by the previous one.

mod expansion;
mod join;
mod soda;

pub use soda::SodaStats;

use crate::{
    bounds::quantile_index,
    cluster::Cluster,
    local_table::Phase,
    operators::AssociateOperator,
    task::{Reply, Task},
    tuple::Tuple,
    PartitionId, Result, TableError, TableId, Value,
};
use log::{debug, error, info};
use rand::Rng;
use std::{fmt::Write as _, sync::Arc};

/// A table partitioned over a cluster. Dropping it releases every partition's share.
pub struct GlobalTable {
    id: TableId,
    column_names: Vec<String>,
    cluster: Arc<Cluster>,
}

impl std::fmt::Debug for GlobalTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalTable")
            .field("id", &self.id)
            .field("column_names", &self.column_names)
            .finish_non_exhaustive()
    }
}

impl Drop for GlobalTable {
    fn drop(&mut self) {
        let table = self.id;
        if let Err(e) = self.cluster.run_all(|_| Task::Drop { table }) {
            error!("dropping table {}: {}", table, e);
        }
    }
}

impl GlobalTable {
    fn empty(cluster: &Arc<Cluster>, column_names: Vec<String>) -> Self {
        Self {
            id: cluster.new_table_id(),
            column_names,
            cluster: cluster.clone(),
        }
    }

    /// Splits `rows` into `P` contiguous runs of near-equal length.
    pub fn from_rows(
        cluster: &Arc<Cluster>,
        column_names: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self> {
        let width = column_names.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(TableError::ColumnCount {
                expected: width,
                found: bad.len(),
            });
        }
        let table = Self::empty(cluster, column_names);
        let bounds = quantile_index(rows.len(), cluster.num_partitions());
        let rows: Vec<Tuple> = rows.into_iter().map(Tuple::new).collect();
        table.each(|i| Task::Create {
            table: table.id,
            num_columns: width,
            rows: rows[bounds[i]..bounds[i + 1]].to_vec(),
        })?;
        Ok(table)
    }

    /// Loads `<path>_p<i>` on every partition `i`.
    pub fn load(cluster: &Arc<Cluster>, path: &str) -> Result<Self> {
        let mut table = Self::empty(cluster, Vec::new());
        let replies = table.each(|_| Task::LoadFile {
            table: table.id,
            path: path.to_string(),
        })?;
        let mut names = replies.into_iter().map(Reply::into_names);
        let first = names
            .next()
            .ok_or_else(|| TableError::Shape("no partitions".into()))??;
        for other in names {
            if other? != first {
                return Err(TableError::MalformedTable(format!(
                    "partitions of {} disagree on the header",
                    path
                )));
            }
        }
        table.column_names = first;
        info!(
            "loaded {} as table {} with {} rows",
            path,
            table.id,
            table.num_rows()?
        );
        Ok(table)
    }

    /// A copy of this table under a new id.
    pub fn copy(&self) -> Result<Self> {
        let copy = Self::empty(&self.cluster, self.column_names.clone());
        self.each(|_| Task::Copy {
            table: self.id,
            into: copy.id,
        })?;
        Ok(copy)
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn num_columns(&self) -> usize {
        self.column_names.len()
    }

    fn num_partitions(&self) -> usize {
        self.cluster.num_partitions()
    }

    /// Column indices of `names`.
    pub fn column_ids(&self, names: &[&str]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.column_names
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| TableError::Shape(format!("no column named {:?}", name)))
            })
            .collect()
    }

    fn each<F>(&self, task: F) -> Result<Vec<Reply>>
    where
        F: Fn(PartitionId) -> Task + Sync,
    {
        self.cluster.run_all(task)
    }

    fn counts<F>(&self, task: F) -> Result<Vec<usize>>
    where
        F: Fn(PartitionId) -> Task + Sync,
    {
        self.each(task)?
            .into_iter()
            .map(Reply::into_count)
            .collect()
    }

    /// Slots per partition.
    pub fn partition_sizes(&self) -> Result<Vec<usize>> {
        self.counts(|_| Task::Size { table: self.id })
    }

    /// Slots, dummies included.
    pub fn size(&self) -> Result<usize> {
        Ok(self.partition_sizes()?.into_iter().sum())
    }

    pub fn max_partition_size(&self) -> Result<usize> {
        Ok(self.partition_sizes()?.into_iter().max().unwrap_or(0))
    }

    /// Real rows.
    pub fn num_rows(&self) -> Result<usize> {
        Ok(self
            .counts(|_| Task::NumRows { table: self.id })?
            .into_iter()
            .sum())
    }

    pub fn sum(&self, col: usize) -> Result<i64> {
        self.each(|_| Task::Sum { table: self.id, col })?
            .into_iter()
            .map(Reply::into_int)
            .sum()
    }

    /// Maximum of `col` over the real rows, `Value::MIN` when there are none.
    pub fn max(&self, col: usize) -> Result<Value> {
        let mut best = i64::from(Value::MIN);
        for reply in self.each(|_| Task::Max { table: self.id, col })? {
            best = best.max(reply.into_int()?);
        }
        Ok(Value::try_from(best)?)
    }

    /// The real rows in partition order.
    pub fn collect(&self) -> Result<Vec<Vec<Value>>> {
        let mut out = Vec::new();
        for reply in self.each(|_| Task::Rows { table: self.id })? {
            out.extend(
                reply
                    .into_rows()?
                    .into_iter()
                    .filter(|t| !t.is_dummy())
                    .map(|t| t.data),
            );
        }
        Ok(out)
    }

    /// A preview of the first `limit` real rows under a header line.
    pub fn render(&self, limit: usize) -> Result<String> {
        let rows = self.collect()?;
        let mut out = self.column_names.join("\t");
        out.push('\n');
        for row in rows.iter().take(limit) {
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            let _ = writeln!(out, "{}", cells.join("\t"));
        }
        if rows.len() > limit {
            let _ = writeln!(out, "... {} more rows", rows.len() - limit);
        }
        Ok(out)
    }

    fn check_cols(&self, cols: &[usize]) -> Result<()> {
        match cols.iter().find(|&&c| c >= self.num_columns()) {
            Some(col) => Err(TableError::Shape(format!(
                "column {} out of {}",
                col,
                self.num_columns()
            ))),
            None => Ok(()),
        }
    }

    pub fn append_col(&mut self, name: &str, value: Value) -> Result<()> {
        self.each(|_| Task::AppendCol {
            table: self.id,
            value,
        })?;
        self.column_names.push(name.to_string());
        Ok(())
    }

    pub fn insert_col(&mut self, index: usize, name: &str, value: Value) -> Result<()> {
        self.each(|_| Task::InsertCol {
            table: self.id,
            index,
            value,
        })?;
        self.column_names.insert(index, name.to_string());
        Ok(())
    }

    /// Appends a copy of `col` named `name`.
    pub fn copy_col(&mut self, col: usize, name: &str) -> Result<()> {
        self.each(|_| Task::CopyCol { table: self.id, col })?;
        self.column_names.push(name.to_string());
        Ok(())
    }

    pub fn delete_col(&mut self, col: usize) -> Result<()> {
        self.each(|_| Task::DeleteCol { table: self.id, col })?;
        self.column_names.remove(col);
        Ok(())
    }

    pub fn project(&mut self, cols: &[usize]) -> Result<()> {
        self.check_cols(cols)?;
        self.each(|_| Task::Project {
            table: self.id,
            cols: cols.to_vec(),
        })?;
        self.column_names = cols.iter().map(|&c| self.column_names[c].clone()).collect();
        Ok(())
    }

    pub fn move_cols_ahead(&mut self, cols: &[usize]) -> Result<()> {
        let order = crate::local_table::cols_ahead_order(cols, self.num_columns())?;
        self.project(&order)
    }

    /// Pads every partition to `n` slots.
    pub fn pad_to_size(&self, n: usize) -> Result<()> {
        self.each(|_| Task::PadToSize {
            table: self.id,
            size: n,
        })?;
        Ok(())
    }

    /// Appends, partition by partition, the rows of `other`.
    pub fn union(&self, other: &GlobalTable) -> Result<()> {
        if other.num_columns() != self.num_columns() {
            return Err(TableError::ColumnCount {
                expected: self.num_columns(),
                found: other.num_columns(),
            });
        }
        self.each(|_| Task::Union {
            table: self.id,
            other: other.id,
        })?;
        Ok(())
    }

    /// Sends every row to a random partition.
    pub fn random_shuffle(&self) -> Result<()> {
        self.each(|_| Task::RandomShuffle { table: self.id })?;
        self.each(|_| Task::ShuffleMerge { table: self.id })?;
        Ok(())
    }

    fn key_shuffle_bound(&self) -> Result<usize> {
        let max_n = self.max_partition_size()?;
        Ok(self
            .cluster
            .bounds()
            .get_size_bound(max_n, self.num_partitions())
            .min(max_n))
    }

    /// Co-locates the rows of each key: row goes to partition `hash(key, seed) % P`.
    pub fn shuffle_by_key(&self, key: &[usize], seed: u64) -> Result<()> {
        self.check_cols(key)?;
        let bound = self.key_shuffle_bound()?;
        debug!("table {}: shuffle by key {:?}, bound {}", self.id, key, bound);
        self.each(|_| Task::ShuffleByKey {
            table: self.id,
            key: key.to_vec(),
            seed,
            bound,
        })?;
        self.each(|_| Task::ShuffleMerge { table: self.id })?;
        Ok(())
    }

    /// [`GlobalTable::shuffle_by_key`] through the sort-based bucketing network.
    pub fn soda_shuffle_by_key(&self, key: &[usize], seed: u64) -> Result<()> {
        self.check_cols(key)?;
        let bound = self.key_shuffle_bound()?;
        self.each(|_| Task::SodaShuffleByKey {
            table: self.id,
            key: key.to_vec(),
            seed,
            bound,
        })?;
        self.each(|_| Task::ShuffleMerge { table: self.id })?;
        Ok(())
    }

    /// Sends each row to the partition named in `col`, at most `bound` rows per fragment.
    pub fn shuffle_by_col(&self, col: usize, bound: usize) -> Result<()> {
        self.check_cols(&[col])?;
        self.each(|_| Task::ShuffleByCol {
            table: self.id,
            col,
            bound,
        })?;
        self.each(|_| Task::ShuffleMerge { table: self.id })?;
        Ok(())
    }

    /// Sample sort on `cols`: random shuffle, pivots from partition 0, bucketing against the
    /// pivots and a local sort of each bucket. Rows with equal keys may straddle a partition
    /// boundary, so that one heavy key cannot overflow a bucket.
    pub fn sort(&self, cols: &[usize]) -> Result<()> {
        self.check_cols(cols)?;
        let _timer = self.cluster.metrics().phase("sort");
        let p = self.num_partitions();
        self.random_shuffle()?;

        // Bucketing orders on the key followed by each row's (partition, slot) after the
        // shuffle. The order is total, so the pivots split equal keys too.
        let width = self.num_columns();
        self.each(|_| Task::AppendRowIds { table: self.id })?;
        let mut order = cols.to_vec();
        order.extend([width, width + 1]);

        let sizes = self.partition_sizes()?;
        let total: usize = sizes.iter().sum();
        let sample = sizes[0];
        self.cluster.run_on(
            0,
            Task::GetPivots {
                table: self.id,
                cols: order.clone(),
            },
        )?;
        let bounds = *self.cluster.bounds();
        self.each(|i| Task::PartitionByPivots {
            table: self.id,
            cols: order.clone(),
            bound: bounds.for_sorting(total, p, sample, sizes[i]),
        })?;
        self.each(|_| Task::SortMerge {
            table: self.id,
            cols: order.clone(),
        })?;
        for _ in 0..2 {
            self.each(|_| Task::DeleteCol {
                table: self.id,
                col: width,
            })?;
        }
        Ok(())
    }

    /// Sorts each partition on `cols`, without exchanging rows.
    pub fn local_sort(&self, cols: &[usize]) -> Result<()> {
        self.check_cols(cols)?;
        self.each(|_| Task::LocalSort {
            table: self.id,
            cols: cols.to_vec(),
        })?;
        Ok(())
    }

    /// Prefix aggregation over the whole table in partition order: every real row ends up
    /// holding the fold of all rows of its group up to and including itself, or from itself to
    /// the end when `reverse` is set.
    pub fn prefix_aggregate(&self, op: &AssociateOperator, reverse: bool) -> Result<()> {
        let p = self.num_partitions();
        let phase = |phase| Task::GroupByAggregateBase {
            table: self.id,
            op: op.clone(),
            prefix: true,
            phase,
            reverse,
        };
        self.each(|_| phase(Phase::Boundary))?;
        self.cluster.run_on(0, phase(Phase::Combine))?;
        let first = if reverse { p - 1 } else { 0 };
        self.cluster
            .run_some(|i| (i != first).then(|| phase(Phase::Apply)))
    }

    /// Local grouped aggregation: one real row per group and partition. Partitions must be
    /// sorted on the grouping columns.
    pub fn group_by_aggregate(&self, op: &AssociateOperator) -> Result<()> {
        self.each(|_| Task::GroupByAggregate {
            table: self.id,
            op: op.clone(),
        })?;
        Ok(())
    }

    /// Global grouped aggregation leaving exactly one real row per group: aggregate locally,
    /// co-locate the groups by key and aggregate again.
    pub fn soda_group_by_aggregate(&self, op: &AssociateOperator, seed: u64) -> Result<()> {
        let key = op.group_by().to_vec();
        self.local_sort(&key)?;
        self.group_by_aggregate(op)?;
        self.shuffle_by_key(&key, seed)?;
        self.local_sort(&key)?;
        self.group_by_aggregate(op)
    }

    /// Appends the number of rows of each row's group on `cols`, for a table sorted on `cols`.
    pub fn compute_degrees(&mut self, cols: &[usize]) -> Result<()> {
        self.check_cols(cols)?;
        self.append_col("degree", 1)?;
        let degree = self.num_columns() - 1;
        self.prefix_aggregate(&AssociateOperator::add(cols.to_vec(), degree), false)?;
        self.prefix_aggregate(&AssociateOperator::max(cols.to_vec(), degree), true)
    }

    /// After [`GlobalTable::compute_degrees`]: one row per group holding `cols` and the degree.
    pub fn degree_table(&self, cols: &[usize]) -> Result<GlobalTable> {
        let mut degrees = self.copy()?;
        let mut keep = cols.to_vec();
        keep.push(self.num_columns() - 1);
        degrees.project(&keep)?;
        let key: Vec<usize> = (0..cols.len()).collect();
        degrees.each(|_| Task::RemoveDupAfterPrefix {
            table: degrees.id,
            cols: key.clone(),
        })?;
        // A group cut by a partition boundary still has one row on each side of it.
        let merge = AssociateOperator::max(key, cols.len());
        degrees.soda_group_by_aggregate(&merge, rand::thread_rng().gen())?;
        Ok(degrees)
    }

    /// Brings partition `i` to exactly `sizes[i]` slots, real rows first.
    fn fit_to(&self, sizes: &[usize]) -> Result<()> {
        self.each(|i| Task::FitTo {
            table: self.id,
            size: sizes[i],
        })?;
        self.each(|i| Task::PadToSize {
            table: self.id,
            size: sizes[i],
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_cluster_tests, local_cluster, random_rows, skewed_rows, table_of};
    use rand::{rngs::StdRng, SeedableRng};

    fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
        rows.sort();
        rows
    }

    fn sample_sort(p: usize, n: usize) {
        let cluster = local_cluster(p);
        let mut rng = StdRng::seed_from_u64(n as u64);
        let rows = random_rows(&mut rng, n, 3, 17);
        let table = table_of(&cluster, 3, &rows);
        table.sort(&[0, 1]).unwrap();

        let out = table.collect().unwrap();
        assert_eq!(sorted(out.clone()), sorted(rows));
        assert!(out.windows(2).all(|w| w[0][..2] <= w[1][..2]));
    }

    create_cluster_tests!(sample_sort);

    fn skewed_sort(p: usize, n: usize) {
        let cluster = local_cluster(p);
        let rows = skewed_rows(n, 2);
        let table = table_of(&cluster, 2, &rows);
        table.sort(&[0]).unwrap();

        assert_eq!(table.num_columns(), 2);
        let out = table.collect().unwrap();
        assert!(out.iter().all(|row| row.len() == 2));
        assert!(out.windows(2).all(|w| w[0][0] <= w[1][0]));
        assert_eq!(sorted(out), sorted(rows));
    }

    create_cluster_tests!(skewed_sort);

    #[test]
    fn one_key_sort_keeps_every_row() {
        let cluster = local_cluster(2);
        let rows: Vec<Vec<Value>> = (0..3000).map(|i| vec![0, i]).collect();
        let table = table_of(&cluster, 2, &rows);
        table.sort(&[0]).unwrap();
        assert_eq!(table.num_rows().unwrap(), rows.len());
        assert_eq!(sorted(table.collect().unwrap()), rows);
    }

    fn running_totals(p: usize, n: usize) {
        let cluster = local_cluster(p);
        let rows: Vec<Vec<Value>> = (0..n).map(|i| vec![(i / 7) as Value, 1]).collect();
        let table = table_of(&cluster, 2, &rows);
        table
            .prefix_aggregate(&AssociateOperator::add(vec![0], 1), false)
            .unwrap();
        let out = table.collect().unwrap();
        for (i, row) in out.iter().enumerate() {
            assert_eq!(row[1] as usize, i % 7 + 1);
        }

        table
            .prefix_aggregate(&AssociateOperator::max(vec![0], 1), true)
            .unwrap();
        for (i, row) in table.collect().unwrap().iter().enumerate() {
            let group = i / 7;
            let expected = (n - group * 7).min(7);
            assert_eq!(row[1] as usize, expected);
        }
    }

    create_cluster_tests!(running_totals);

    fn grouped_counts(p: usize, n: usize) {
        let cluster = local_cluster(p);
        let mut rng = StdRng::seed_from_u64(3);
        let rows = random_rows(&mut rng, n, 2, 5);
        let mut table = table_of(&cluster, 2, &rows);
        table.project(&[0]).unwrap();
        table.append_col("count", 1).unwrap();
        table
            .soda_group_by_aggregate(&AssociateOperator::add(vec![0], 1), 99)
            .unwrap();

        let mut expected = std::collections::BTreeMap::new();
        for row in &rows {
            *expected.entry(row[0]).or_insert(0) += 1;
        }
        let expected: Vec<Vec<Value>> = expected.into_iter().map(|(k, c)| vec![k, c]).collect();
        assert_eq!(sorted(table.collect().unwrap()), expected);
        assert_eq!(table.sum(1).unwrap(), n as i64);
    }

    create_cluster_tests!(grouped_counts);

    fn degrees(p: usize, n: usize) {
        let cluster = local_cluster(p);
        let mut rng = StdRng::seed_from_u64(5);
        let rows = random_rows(&mut rng, n, 2, 6);
        let mut table = table_of(&cluster, 2, &rows);
        table.sort(&[0]).unwrap();
        table.compute_degrees(&[0]).unwrap();
        for row in table.collect().unwrap() {
            let count = rows.iter().filter(|r| r[0] == row[0]).count();
            assert_eq!(row[2] as usize, count);
        }
        let degrees = table.degree_table(&[0]).unwrap();
        assert_eq!(degrees.num_rows().unwrap(), {
            let mut keys: Vec<Value> = rows.iter().map(|r| r[0]).collect();
            keys.sort();
            keys.dedup();
            keys.len()
        });
        assert_eq!(degrees.column_names(), ["c0", "degree"]);
    }

    create_cluster_tests!(degrees);

    fn skewed_degrees(p: usize, n: usize) {
        let cluster = local_cluster(p);
        let rows = skewed_rows(n, 2);
        let mut table = table_of(&cluster, 2, &rows);
        table.sort(&[0]).unwrap();
        table.compute_degrees(&[0]).unwrap();

        let mut expected = std::collections::BTreeMap::new();
        for row in &rows {
            *expected.entry(row[0]).or_insert(0) += 1;
        }
        for row in table.collect().unwrap() {
            assert_eq!(row[2], expected[&row[0]]);
        }
        let expected: Vec<Vec<Value>> = expected.into_iter().map(|(k, c)| vec![k, c]).collect();
        let degrees = table.degree_table(&[0]).unwrap();
        assert_eq!(sorted(degrees.collect().unwrap()), expected);
    }

    create_cluster_tests!(skewed_degrees);

    #[test]
    fn key_shuffle_is_deterministic_per_seed() {
        let cluster = local_cluster(2);
        let table = table_of(&cluster, 1, &[vec![0], vec![1], vec![0], vec![1]]);
        table.shuffle_by_key(&[0], 1).unwrap();
        let partitions: Vec<Vec<Value>> = table
            .each(|_| Task::Rows { table: table.id })
            .unwrap()
            .into_iter()
            .map(|r| {
                r.into_rows()
                    .unwrap()
                    .into_iter()
                    .filter(|t| !t.is_dummy())
                    .map(|t| t.data[0])
                    .collect()
            })
            .collect();
        assert_eq!(partitions, vec![vec![0, 0], vec![1, 1]]);
    }

    #[test]
    fn column_utilities() {
        let cluster = local_cluster(2);
        let mut table = table_of(&cluster, 3, &[vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);
        assert_eq!(table.column_ids(&["c2", "c0"]).unwrap(), vec![2, 0]);
        assert!(table.column_ids(&["nope"]).is_err());

        table.move_cols_ahead(&[2]).unwrap();
        assert_eq!(table.column_names(), ["c2", "c0", "c1"]);
        table.insert_col(1, "k", 0).unwrap();
        table.copy_col(0, "c2_copy").unwrap();
        table.delete_col(2).unwrap();
        assert_eq!(table.column_names(), ["c2", "k", "c1", "c2_copy"]);
        assert_eq!(table.collect().unwrap()[1], vec![6, 0, 5, 6]);

        let copy = table.copy().unwrap();
        table.union(&copy).unwrap();
        assert_eq!(table.num_rows().unwrap(), 6);
        assert_eq!(table.max(2).unwrap(), 8);
        assert_eq!(table.sum(0).unwrap(), 36);
        table.pad_to_size(5).unwrap();
        assert_eq!(table.size().unwrap(), 10);

        let preview = table.render(2).unwrap();
        assert!(preview.starts_with("c2\tk\tc1\tc2_copy\n3\t0\t2\t3\n"));
        assert!(preview.ends_with("... 4 more rows\n"));
    }

    #[test]
    fn loads_partitioned_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("items");
        std::fs::write(format!("{}_p0", base.display()), "id v\n1 2\n").unwrap();
        std::fs::write(format!("{}_p1", base.display()), "id v\n3 4\n5 6\n").unwrap();
        let cluster = local_cluster(2);
        let table = GlobalTable::load(&cluster, &base.display().to_string()).unwrap();
        assert_eq!(table.column_names(), ["id", "v"]);
        assert_eq!(table.collect().unwrap(), vec![vec![1, 2], vec![3, 4], vec![5, 6]]);

        std::fs::write(format!("{}_p1", base.display()), "id w\n3 4\n").unwrap();
        assert!(GlobalTable::load(&cluster, &base.display().to_string()).is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let cluster = local_cluster(2);
        let names = vec!["a".to_string(), "b".to_string()];
        assert!(GlobalTable::from_rows(&cluster, names, vec![vec![1, 2], vec![3]]).is_err());
    }
}
