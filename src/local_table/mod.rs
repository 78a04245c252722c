// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The rows of one table held by one partition, and every per-partition step of the
//! distributed protocols.
//!
//! Steps that exchange rows with other partitions take an [`Exchange`](crate::exchange::Exchange)
//! and only ever write slots keyed by this partition as source, or read slots keyed by this
//! partition as target.

mod aggregate;
mod expansion;
mod join;
mod shuffle;
mod soda;

pub use aggregate::Phase;

use crate::{
    obliv::{self, ct_lt_i32},
    tuple::Tuple,
    PartitionId, Result, TableError, TableId, Value,
};
use log::warn;
use std::{fmt::Write as _, str::FromStr};
use subtle::ConditionallySelectable;

/// Filler for columns that exist only to align two schemas.
pub const DUMMY_VAL: Value = 9999;

/// One partition's share of a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalTable {
    table_id: TableId,
    partition: PartitionId,
    num_partitions: usize,
    num_columns: usize,
    tuples: Vec<Tuple>,
}

/// Parses the text table format: a header line of column names followed by one row of
/// whitespace-separated integers per line. Empty lines are skipped.
pub fn parse_table_text(text: &str) -> Result<(Vec<String>, Vec<Tuple>)> {
    let mut lines = text.lines();
    let header: Vec<String> = lines
        .next()
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    if header.is_empty() {
        return Err(TableError::MalformedTable("missing header line".into()));
    }

    let mut rows = Vec::new();
    for (number, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let data = line
            .split_whitespace()
            .map(Value::from_str)
            .collect::<std::result::Result<Vec<Value>, _>>()
            .map_err(|e| TableError::MalformedTable(format!("line {}: {}", number + 2, e)))?;
        if data.len() != header.len() {
            return Err(TableError::MalformedTable(format!(
                "line {} has {} values, the header names {} columns",
                number + 2,
                data.len(),
                header.len()
            )));
        }
        rows.push(Tuple::new(data));
    }
    Ok((header, rows))
}

impl LocalTable {
    pub fn new(
        table_id: TableId,
        partition: PartitionId,
        num_partitions: usize,
        num_columns: usize,
        tuples: Vec<Tuple>,
    ) -> Result<Self> {
        if num_partitions == 0 || partition >= num_partitions {
            return Err(TableError::Shape(format!(
                "partition {} out of {}",
                partition, num_partitions
            )));
        }
        if let Some(bad) = tuples.iter().find(|t| t.width() != num_columns) {
            return Err(TableError::ColumnCount {
                expected: num_columns,
                found: bad.width(),
            });
        }
        Ok(Self {
            table_id,
            partition,
            num_partitions,
            num_columns,
            tuples,
        })
    }

    /// A copy of this partition's rows under another table id.
    pub fn copy(&self, table_id: TableId) -> Self {
        Self {
            table_id,
            ..self.clone()
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    /// The number of slots, dummies included.
    pub fn size(&self) -> usize {
        self.tuples.len()
    }

    /// The number of real rows.
    pub fn num_rows(&self) -> usize {
        self.tuples
            .iter()
            .map(|t| usize::from((!t.ct_is_dummy()).unwrap_u8()))
            .sum()
    }

    pub(crate) fn check_cols(&self, cols: &[usize]) -> Result<()> {
        match cols.iter().find(|&&c| c >= self.num_columns) {
            Some(col) => Err(TableError::Shape(format!(
                "column {} out of {} in table {}",
                col, self.num_columns, self.table_id
            ))),
            None => Ok(()),
        }
    }

    fn check_partition(&self, phase: &'static str, expected: PartitionId) -> Result<()> {
        if self.partition != expected {
            return Err(TableError::WrongPartition {
                phase,
                expected,
                actual: self.partition,
            });
        }
        Ok(())
    }

    /// Sorts the rows on `cols`, obliviously.
    pub fn sort(&mut self, cols: &[usize], ascending: bool) -> Result<()> {
        self.check_cols(cols)?;
        obliv::sort(&mut self.tuples, cols, ascending);
        Ok(())
    }

    /// Sum of `col` over the real rows.
    pub fn sum(&self, col: usize) -> Result<i64> {
        self.check_cols(&[col])?;
        let mut total = 0i64;
        for t in &self.tuples {
            let mut v = i64::from(t.data[col]);
            v.conditional_assign(&0, t.ct_is_dummy());
            total = total.wrapping_add(v);
        }
        Ok(total)
    }

    /// Maximum of `col` over the real rows, `Value::MIN` when there are none.
    pub fn max(&self, col: usize) -> Result<Value> {
        self.check_cols(&[col])?;
        let mut best = Value::MIN;
        for t in &self.tuples {
            let v = t.data[col];
            best.conditional_assign(&v, !t.ct_is_dummy() & ct_lt_i32(best, v));
        }
        Ok(best)
    }

    pub fn append_col(&mut self, value: Value) {
        for t in &mut self.tuples {
            t.push(value);
        }
        self.num_columns += 1;
    }

    /// Appends the partition id and the slot index of every row, which together are unique
    /// across the table.
    pub fn append_row_ids(&mut self) -> Result<()> {
        let partition = Value::try_from(self.partition)?;
        for (i, t) in self.tuples.iter_mut().enumerate() {
            t.push(partition);
            t.push(Value::try_from(i)?);
        }
        self.num_columns += 2;
        Ok(())
    }

    /// Inserts a column holding `value` before column `index`.
    pub fn insert_col(&mut self, index: usize, value: Value) -> Result<()> {
        if index > self.num_columns {
            return Err(TableError::Shape(format!(
                "cannot insert column {} into {} columns",
                index, self.num_columns
            )));
        }
        for t in &mut self.tuples {
            t.insert(index, value);
        }
        self.num_columns += 1;
        Ok(())
    }

    /// Appends a copy of column `col`.
    pub fn copy_col(&mut self, col: usize) -> Result<()> {
        self.check_cols(&[col])?;
        for t in &mut self.tuples {
            let v = t.data[col];
            t.push(v);
        }
        self.num_columns += 1;
        Ok(())
    }

    pub fn delete_col(&mut self, col: usize) -> Result<()> {
        self.check_cols(&[col])?;
        for t in &mut self.tuples {
            t.remove(col);
        }
        self.num_columns -= 1;
        Ok(())
    }

    /// Keeps only `cols`, in that order.
    pub fn project(&mut self, cols: &[usize]) -> Result<()> {
        self.check_cols(cols)?;
        for t in &mut self.tuples {
            t.data = cols.iter().map(|&c| t.data[c]).collect();
        }
        self.num_columns = cols.len();
        Ok(())
    }

    /// Reorders the columns so that `cols` come first, the others keeping their order.
    pub fn move_cols_ahead(&mut self, cols: &[usize]) -> Result<()> {
        let order = cols_ahead_order(cols, self.num_columns)?;
        self.project(&order)
    }

    /// Appends dummies until the table holds `n` slots.
    pub fn pad_to_size(&mut self, n: usize) -> Result<()> {
        if n < self.tuples.len() {
            return Err(TableError::Shape(format!(
                "cannot pad {} rows down to {}",
                self.tuples.len(),
                n
            )));
        }
        self.tuples.resize(n, Tuple::dummy(self.num_columns));
        Ok(())
    }

    /// Appends the rows of another table of the same width.
    pub fn union(&mut self, rows: &[Tuple]) -> Result<()> {
        if let Some(bad) = rows.iter().find(|t| t.width() != self.num_columns) {
            return Err(TableError::ColumnCount {
                expected: self.num_columns,
                found: bad.width(),
            });
        }
        self.tuples.extend_from_slice(rows);
        Ok(())
    }

    /// A preview of at most `limit` rows.
    pub fn render(&self, limit: usize, show_dummy: bool) -> String {
        let mut out = format!(
            "(partition {}, {} slots, {} rows)\n",
            self.partition,
            self.size(),
            self.num_rows()
        );
        let shown = self
            .tuples
            .iter()
            .filter(|t| show_dummy || !t.is_dummy());
        for (i, t) in shown.enumerate() {
            if i == limit {
                out.push_str(" ...\n");
                break;
            }
            let _ = writeln!(out, " {}", t);
        }
        out
    }
}

/// The column order that moves `cols` in front of the remaining `num_columns` columns.
pub(crate) fn cols_ahead_order(cols: &[usize], num_columns: usize) -> Result<Vec<usize>> {
    if let Some(col) = cols.iter().find(|&&c| c >= num_columns) {
        return Err(TableError::Shape(format!(
            "join column {} out of {}",
            col, num_columns
        )));
    }
    let mut order = cols.to_vec();
    order.extend((0..num_columns).filter(|c| !cols.contains(c)));
    if order.len() != num_columns {
        warn!("duplicate join columns {:?}", cols);
        return Err(TableError::Shape(format!("duplicate join columns {:?}", cols)));
    }
    Ok(order)
}
