// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The tables of one partition and the dispatcher that runs [`Task`]s on them.

use crate::{
    exchange::Exchange,
    local_table::{parse_table_text, LocalTable},
    task::{Reply, Task},
    PartitionId, Result, TableError, TableId,
};
use log::{debug, warn};
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::HashMap, fs};

/// Owns every [`LocalTable`] of one partition.
#[derive(Debug)]
pub struct Worker {
    partition: PartitionId,
    num_partitions: usize,
    tables: HashMap<TableId, LocalTable>,
    io: Exchange,
    rng: StdRng,
}

fn lookup(tables: &mut HashMap<TableId, LocalTable>, id: TableId) -> Result<&mut LocalTable> {
    tables.get_mut(&id).ok_or(TableError::UnknownTable(id))
}

impl Worker {
    pub fn new(partition: PartitionId, num_partitions: usize, io: Exchange) -> Result<Self> {
        Self::with_rng(partition, num_partitions, io, StdRng::from_entropy())
    }

    /// A worker whose random choices are reproducible.
    pub fn with_seed(
        partition: PartitionId,
        num_partitions: usize,
        io: Exchange,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(partition, num_partitions, io, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        partition: PartitionId,
        num_partitions: usize,
        io: Exchange,
        rng: StdRng,
    ) -> Result<Self> {
        if partition >= num_partitions {
            return Err(TableError::InvalidConfig(format!(
                "partition {} out of {}",
                partition, num_partitions
            )));
        }
        Ok(Self {
            partition,
            num_partitions,
            tables: HashMap::new(),
            io,
            rng,
        })
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn io(&self) -> &Exchange {
        &self.io
    }

    pub fn table(&self, id: TableId) -> Result<&LocalTable> {
        self.tables.get(&id).ok_or(TableError::UnknownTable(id))
    }

    fn insert(&mut self, table: LocalTable) {
        if let Some(old) = self.tables.insert(table.table_id(), table) {
            warn!(
                "partition {}: replaced table {}",
                self.partition,
                old.table_id()
            );
        }
    }

    /// Runs one task against this partition's tables.
    pub fn handle(&mut self, task: Task) -> Result<Reply> {
        let result = self.dispatch(task);
        if let Err(e) = &result {
            warn!("partition {}: {}", self.partition, e);
        }
        result
    }

    fn dispatch(&mut self, task: Task) -> Result<Reply> {
        let (p, io) = (self.num_partitions, &self.io);
        let tables = &mut self.tables;
        let unit = |r: Result<()>| r.map(|()| Reply::Unit);

        match task {
            Task::Create {
                table,
                num_columns,
                rows,
            } => {
                let local = LocalTable::new(table, self.partition, p, num_columns, rows)?;
                self.insert(local);
                Ok(Reply::Unit)
            }
            Task::LoadFile { table, path } => {
                let path = format!("{}_p{}", path, self.partition);
                debug!("partition {}: loading {}", self.partition, path);
                let (names, rows) = parse_table_text(&fs::read_to_string(&path)?)?;
                let local = LocalTable::new(table, self.partition, p, names.len(), rows)?;
                self.insert(local);
                Ok(Reply::Names(names))
            }
            Task::Copy { table, into } => {
                let copy = self.table(table)?.copy(into);
                self.insert(copy);
                Ok(Reply::Unit)
            }
            Task::Drop { table } => {
                self.tables.remove(&table);
                self.io.clear_table(table)?;
                Ok(Reply::Unit)
            }
            Task::Rows { table } => {
                let t = self.table(table)?;
                Ok(Reply::Rows {
                    num_columns: t.num_columns(),
                    rows: t.tuples().to_vec(),
                })
            }
            Task::Size { table } => Ok(Reply::Int(self.table(table)?.size() as i64)),
            Task::NumRows { table } => Ok(Reply::Int(self.table(table)?.num_rows() as i64)),
            Task::NumColumns { table } => {
                Ok(Reply::Int(self.table(table)?.num_columns() as i64))
            }
            Task::Sum { table, col } => self.table(table)?.sum(col).map(Reply::Int),
            Task::Max { table, col } => self
                .table(table)?
                .max(col)
                .map(|v| Reply::Int(i64::from(v))),

            Task::AppendCol { table, value } => {
                lookup(tables, table)?.append_col(value);
                Ok(Reply::Unit)
            }
            Task::AppendRowIds { table } => unit(lookup(tables, table)?.append_row_ids()),
            Task::InsertCol {
                table,
                index,
                value,
            } => unit(lookup(tables, table)?.insert_col(index, value)),
            Task::CopyCol { table, col } => unit(lookup(tables, table)?.copy_col(col)),
            Task::DeleteCol { table, col } => unit(lookup(tables, table)?.delete_col(col)),
            Task::Project { table, cols } => unit(lookup(tables, table)?.project(&cols)),
            Task::MoveColsAhead { table, cols } => {
                unit(lookup(tables, table)?.move_cols_ahead(&cols))
            }
            Task::PadToSize { table, size } => unit(lookup(tables, table)?.pad_to_size(size)),
            Task::FitTo { table, size } => unit(lookup(tables, table)?.fit_to(size)),
            Task::Union { table, other } => {
                let rows = self.table(other)?.tuples().to_vec();
                unit(lookup(&mut self.tables, table)?.union(&rows))
            }

            Task::LocalSort { table, cols } => unit(lookup(tables, table)?.sort(&cols, true)),
            Task::RandomShuffle { table } => {
                unit(lookup(tables, table)?.random_shuffle(io, &mut self.rng))
            }
            Task::ShuffleByKey {
                table,
                key,
                seed,
                bound,
            } => unit(lookup(tables, table)?.shuffle_by_key(io, &key, seed, bound, &mut self.rng)),
            Task::SodaShuffleByKey {
                table,
                key,
                seed,
                bound,
            } => unit(
                lookup(tables, table)?.soda_shuffle_by_key(io, &key, seed, bound, &mut self.rng),
            ),
            Task::ShuffleByCol { table, col, bound } => {
                unit(lookup(tables, table)?.shuffle_by_col(io, col, bound))
            }
            Task::ShuffleMerge { table } => unit(lookup(tables, table)?.shuffle_merge(io)),
            Task::GetPivots { table, cols } => unit(lookup(tables, table)?.get_pivots(io, &cols)),
            Task::PartitionByPivots { table, cols, bound } => {
                unit(lookup(tables, table)?.partition_by_pivots(io, &cols, bound))
            }
            Task::SortMerge { table, cols } => unit(lookup(tables, table)?.sort_merge(io, &cols)),

            Task::GroupByAggregate { table, op } => {
                unit(lookup(tables, table)?.group_by_aggregate(&op))
            }
            Task::GroupByAggregateBase {
                table,
                op,
                prefix,
                phase,
                reverse,
            } => unit(lookup(tables, table)?.group_by_aggregate_base(
                Some(io),
                &op,
                prefix,
                phase,
                reverse,
            )),
            Task::RemoveDupAfterPrefix { table, cols } => {
                unit(lookup(tables, table)?.remove_dup_after_prefix(&cols))
            }

            Task::TagForeignRows {
                table,
                num_join_cols,
            } => unit(lookup(tables, table)?.tag_foreign_rows(num_join_cols)),
            Task::PkJoinCombine {
                table,
                other,
                num_join_cols,
                ori_r,
                align,
            } => {
                let s_rows = self.table(other)?.tuples().to_vec();
                unit(lookup(&mut self.tables, table)?.pk_join_combine(
                    &s_rows,
                    num_join_cols,
                    ori_r,
                    align,
                ))
            }
            Task::FinalizePkJoin {
                table,
                num_join_cols,
                ori_r,
                align,
            } => unit(lookup(tables, table)?.finalize_pk_join(num_join_cols, ori_r, align)),
            Task::JoinAlignment { table, m } => {
                unit(lookup(tables, table)?.join_compute_alignment(m))
            }
            Task::JoinFinalCombine {
                table,
                other,
                num_join_cols,
            } => {
                let mut r = self
                    .tables
                    .remove(&other)
                    .ok_or(TableError::UnknownTable(other))?;
                let result = lookup(&mut self.tables, table)
                    .and_then(|s| s.join_final_combine(&mut r, num_join_cols));
                self.tables.insert(other, r);
                unit(result)
            }
            Task::LocalJoin {
                table,
                other,
                num_join_cols,
                bound,
            } => {
                let s = self.table(other)?.clone();
                let slots = lookup(&mut self.tables, table)?.local_join(&s, num_join_cols, bound)?;
                Ok(Reply::Int(slots as i64))
            }

            Task::ExpansionPrepare { table, col } => {
                unit(lookup(tables, table)?.expansion_prepare(col))
            }
            Task::ExpansionTargets { table, col, m } => {
                unit(lookup(tables, table)?.expansion_targets(col, m))
            }
            Task::ExpansionDistribute { table, m } => {
                unit(lookup(tables, table)?.expansion_distribute(m))
            }
            Task::ExpansionFill { table, phase } => {
                unit(lookup(tables, table)?.expansion_fill(Some(io), phase))
            }

            Task::SodaStep1 {
                table,
                cols,
                count_col,
            } => lookup(tables, table)?
                .soda_step1(&cols, count_col)
                .map(Reply::Int),
            Task::SodaStep2 { table, cap } => unit(lookup(tables, table)?.soda_step2(cap)),
            Task::SodaStep3 { table } => unit(lookup(tables, table)?.soda_step3()),
            Task::SodaStep5 { table } => unit(lookup(tables, table)?.soda_step5()),

            Task::PutSlot { key, block } => unit(self.io.deliver(key, block)),
        }
    }
}
