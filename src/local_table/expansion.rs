// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Per-partition steps of the distributed expansion, which repeats every row as many times as
//! its multiplicity column says across `P` partitions of `m` slots each.

use super::{join::fill_from_right, LocalTable, Phase};
use crate::{
    exchange::Exchange,
    mailbox::{SlotKey, SlotKind},
    obliv::{self, CtMove},
    tuple::Tuple,
    Result, TableError, Value,
};
use subtle::{ConditionallySelectable, ConstantTimeEq};

impl LocalTable {
    /// Zeroes the multiplicity of dummies.
    pub fn expansion_prepare(&mut self, d_col: usize) -> Result<()> {
        self.check_cols(&[d_col])?;
        for t in &mut self.tuples {
            let dummy = t.ct_is_dummy();
            t.data[d_col].conditional_assign(&0, dummy);
        }
        Ok(())
    }

    /// With the inclusive prefix sum `L` of the multiplicities as last column, marks rows of
    /// multiplicity 0 dummy and appends the target partition `T = (L - 1) / m` and slot
    /// `P = (L - 1) % m`.
    pub fn expansion_targets(&mut self, d_col: usize, m: usize) -> Result<()> {
        self.check_cols(&[d_col])?;
        if m == 0 {
            return Err(TableError::Shape("expansion into zero slots".into()));
        }
        let l_col = self.num_columns - 1;
        let m = m as i64;
        for t in &mut self.tuples {
            let empty = t.data[d_col].ct_eq(&0);
            t.ct_mark_dummy(empty);
            let l = i64::from(t.data[l_col]) - 1;
            t.push((l / m) as Value);
            t.push((l % m) as Value);
        }
        self.num_columns += 2;
        Ok(())
    }

    /// After the shuffle on `T`, routes each row to slot `P` of exactly `m` slots and drops the
    /// `L`, `T` and `P` columns.
    pub fn expansion_distribute(&mut self, m: usize) -> Result<()> {
        if self.num_columns < 3 {
            return Err(TableError::Shape(format!(
                "{} columns do not hold the expansion bookkeeping",
                self.num_columns
            )));
        }
        let p_col = self.num_columns - 1;
        self.sort(&[p_col], true)?;
        self.tuples.resize(m, Tuple::dummy(self.num_columns));
        obliv::distribute_by_col(&mut self.tuples, p_col)?;
        for t in &mut self.tuples {
            t.data.truncate(p_col - 2);
        }
        self.num_columns -= 3;
        Ok(())
    }

    /// The suffix fill that gives every empty slot the row whose range covers it.
    ///
    /// [`Phase::Local`] fills within the partition. [`Phase::Boundary`] also sends the first slot
    /// to partition 0, which in [`Phase::Combine`] fills across the boundaries and returns to each
    /// partition the row following it. [`Phase::Apply`] fills the trailing empty slots with that
    /// row, on every partition but the last.
    pub fn expansion_fill(&mut self, io: Option<&Exchange>, phase: Phase) -> Result<()> {
        let exchange = || {
            io.ok_or_else(|| TableError::Shape("a multi-partition phase needs an exchange".into()))
        };
        let p = self.num_partitions;
        match phase {
            Phase::Local => fill_from_right(&mut self.tuples),
            Phase::Boundary => {
                fill_from_right(&mut self.tuples);
                let first = self
                    .tuples
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Tuple::dummy(self.num_columns));
                let key = SlotKey::new(self.table_id, self.partition, 0, SlotKind::Boundary);
                exchange()?.send(key, &[first])?;
            }
            Phase::Combine => {
                self.check_partition("expansion combine", 0)?;
                let io = exchange()?;
                let mut firsts = Vec::with_capacity(p);
                for source in 0..p {
                    let key = SlotKey::new(self.table_id, source, 0, SlotKind::Boundary);
                    let rows = io.receive(&key, self.num_columns)?;
                    if rows.len() != 1 {
                        return Err(TableError::Shape(format!(
                            "boundary from partition {} has {} rows",
                            source,
                            rows.len()
                        )));
                    }
                    firsts.extend(rows);
                }
                fill_from_right(&mut firsts);
                for (target, row) in firsts.iter().enumerate().skip(1) {
                    let key = SlotKey::new(self.table_id, 0, target - 1, SlotKind::Correction);
                    io.send(key, std::slice::from_ref(row))?;
                }
            }
            Phase::Apply => {
                if self.partition + 1 == p {
                    return Ok(());
                }
                let key = SlotKey::new(self.table_id, 0, self.partition, SlotKind::Correction);
                let rows = exchange()?.receive(&key, self.num_columns)?;
                let next = match rows.as_slice() {
                    [next] => next,
                    _ => {
                        return Err(TableError::Shape(format!(
                            "correction for partition {} has {} rows",
                            self.partition,
                            rows.len()
                        )))
                    }
                };
                for t in &mut self.tuples {
                    let empty = t.ct_is_dummy();
                    t.cmove(next, empty);
                }
            }
        }
        Ok(())
    }
}
