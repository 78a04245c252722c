// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Group-by aggregation, locally and as the three-phase prefix protocol.

use super::LocalTable;
use crate::{
    exchange::Exchange,
    mailbox::{SlotKey, SlotKind},
    obliv::CtMove,
    operators::AssociateOperator,
    tuple::Tuple,
    Result, TableError,
};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable};

/// A step of a protocol that carries values across partition boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Only the partition-local pass, nothing is exchanged.
    Local,
    /// Local pass, then the boundary row goes to partition 0.
    Boundary,
    /// Partition 0 combines the boundaries and returns one carry per partition.
    Combine,
    /// Every partition folds its carry into its rows.
    Apply,
}

/// Two distinct elements of `tuples`, in the order asked for.
pub(crate) fn pair_mut(tuples: &mut [Tuple], i: usize, j: usize) -> (&mut Tuple, &mut Tuple) {
    if i < j {
        let (left, right) = tuples.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = tuples.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}

/// Folds `op` over consecutive rows, forward or in reverse. Returns the last real row visited,
/// which carries the partial aggregate of its group, or a dummy when there is none.
///
/// Values only flow once a real row has been seen, and are carried through dummies so that a
/// group interrupted by dummies keeps accumulating. Without `prefix`, a row folded into the next
/// real row is marked dummy, leaving one row per group.
pub(crate) fn agg_core(
    tuples: &mut [Tuple],
    op: &AssociateOperator,
    prefix: bool,
    reverse: bool,
    width: usize,
) -> Tuple {
    let n = tuples.len();
    if n == 0 {
        return Tuple::dummy(width);
    }
    let order: Vec<usize> = if reverse {
        (0..n).rev().collect()
    } else {
        (0..n).collect()
    };

    let mut last = tuples[order[0]].clone();
    let mut seen = Choice::from(0);
    for step in order.windows(2) {
        let (cur, next) = pair_mut(tuples, step[0], step[1]);
        seen |= !cur.ct_is_dummy();
        let applied = op.apply_if(cur, next, seen);
        if !prefix {
            cur.ct_mark_dummy(applied & !next.ct_is_dummy());
        }
        let carry = next.ct_is_dummy();
        for (dst, src) in next.data.iter_mut().zip(&cur.data) {
            dst.conditional_assign(src, carry);
        }
        last.cmove(next, !next.ct_is_dummy());
    }
    last
}

impl LocalTable {
    fn check_operator(&self, op: &AssociateOperator) -> Result<()> {
        self.check_cols(op.group_by())?;
        if let Some(fold) = op.fold() {
            self.check_cols(&[fold.aggregate])?;
        }
        Ok(())
    }

    /// Local aggregation leaving one real row per group, holding the group's aggregate. Rows
    /// must be sorted on the grouping columns.
    pub fn group_by_aggregate(&mut self, op: &AssociateOperator) -> Result<()> {
        self.group_by_aggregate_base(None, op, false, Phase::Local, false)
    }

    /// One phase of grouped aggregation.
    ///
    /// [`Phase::Local`] and [`Phase::Boundary`] fold this partition's rows, the latter sending
    /// the boundary row to partition 0. [`Phase::Combine`] runs on partition 0 and folds the
    /// boundaries in partition order, always in prefix mode. [`Phase::Apply`] folds the carry
    /// into this partition's rows.
    pub fn group_by_aggregate_base(
        &mut self,
        io: Option<&Exchange>,
        op: &AssociateOperator,
        do_prefix: bool,
        phase: Phase,
        reverse: bool,
    ) -> Result<()> {
        self.check_operator(op)?;
        let exchange = || {
            io.ok_or_else(|| TableError::Shape("a multi-partition phase needs an exchange".into()))
        };
        match phase {
            Phase::Local => {
                agg_core(&mut self.tuples, op, do_prefix, reverse, self.num_columns);
                Ok(())
            }
            Phase::Boundary => {
                let last = agg_core(&mut self.tuples, op, do_prefix, reverse, self.num_columns);
                let key = SlotKey::new(self.table_id, self.partition, 0, SlotKind::Boundary);
                exchange()?.send(key, &[last])
            }
            Phase::Combine => self.combine_boundaries(exchange()?, op, reverse),
            Phase::Apply => self.add_value_by_key(exchange()?, op),
        }
    }

    fn combine_boundaries(
        &mut self,
        io: &Exchange,
        op: &AssociateOperator,
        reverse: bool,
    ) -> Result<()> {
        self.check_partition("combine boundaries", 0)?;
        let p = self.num_partitions;
        let mut carries = Vec::with_capacity(p);
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
            carries.extend(rows);
        }

        // A carry is real once a real boundary precedes it in fold order.
        let mut real = vec![Choice::from(0); p];
        let mut any = Choice::from(0);
        let order: Vec<usize> = if reverse {
            (0..p).rev().collect()
        } else {
            (0..p).collect()
        };
        for &i in &order {
            any |= !carries[i].ct_is_dummy();
            real[i] = any;
        }
        agg_core(&mut carries, op, true, reverse, self.num_columns);
        for (carry, real) in carries.iter_mut().zip(real) {
            carry.ct_set_dummy(!real);
        }

        for (i, carry) in carries.iter().enumerate() {
            let target = match (reverse, i) {
                (false, i) if i + 1 < p => i + 1,
                (true, i) if i > 0 => i - 1,
                _ => continue,
            };
            let key = SlotKey::new(self.table_id, 0, target, SlotKind::Correction);
            io.send(key, std::slice::from_ref(carry))?;
        }
        Ok(())
    }

    /// Folds the carry sent by partition 0 into every row of the carry's group.
    pub fn add_value_by_key(&mut self, io: &Exchange, op: &AssociateOperator) -> Result<()> {
        let key = SlotKey::new(self.table_id, 0, self.partition, SlotKind::Correction);
        let rows = io.receive(&key, self.num_columns)?;
        let carry = match rows.as_slice() {
            [carry] => carry,
            _ => {
                return Err(TableError::Shape(format!(
                    "correction for partition {} has {} rows",
                    self.partition,
                    rows.len()
                )))
            }
        };
        let enable = !carry.ct_is_dummy();
        for t in &mut self.tuples {
            op.apply_if(carry, t, enable);
        }
        Ok(())
    }

    /// Marks a row dummy when the next row is real and equal on `cols`, so that after a
    /// reverse prefix pass only the first row of each group survives.
    pub fn remove_dup_after_prefix(&mut self, cols: &[usize]) -> Result<()> {
        self.check_cols(cols)?;
        for i in 1..self.tuples.len() {
            let (prev, next) = pair_mut(&mut self.tuples, i - 1, i);
            let dup = !next.ct_is_dummy() & prev.ct_equal_in_cols(next, cols);
            prev.ct_mark_dummy(dup);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{exchange, real_rows};
    use crate::Value;

    fn table(partition: usize, p: usize, rows: Vec<Vec<Value>>) -> LocalTable {
        let width = rows.first().map_or(2, Vec::len);
        LocalTable::new(7, partition, p, width, rows.into_iter().map(Tuple::new).collect())
            .unwrap()
    }

    fn prefix_over(
        tables: &mut [LocalTable],
        op: &AssociateOperator,
        reverse: bool,
    ) -> Result<()> {
        let io = exchange();
        let p = tables.len();
        for t in tables.iter_mut() {
            t.group_by_aggregate_base(Some(&io), op, true, Phase::Boundary, reverse)?;
        }
        tables[0].group_by_aggregate_base(Some(&io), op, true, Phase::Combine, reverse)?;
        for (i, t) in tables.iter_mut().enumerate() {
            let applies = if reverse { i + 1 < p } else { i > 0 };
            if applies {
                t.group_by_aggregate_base(Some(&io), op, true, Phase::Apply, reverse)?;
            }
        }
        Ok(())
    }

    #[test]
    fn prefix_sum_within_groups() {
        let mut tables = vec![table(0, 1, vec![vec![1, 10], vec![1, 20], vec![2, 30]])];
        prefix_over(&mut tables, &AssociateOperator::add(vec![0], 1), false).unwrap();
        assert_eq!(
            real_rows(&tables[0]),
            vec![vec![1, 10], vec![1, 30], vec![2, 30]]
        );
    }

    #[test]
    fn prefix_sum_of_zeros_is_unchanged() {
        let rows = vec![vec![1, 0], vec![1, 0], vec![2, 0], vec![3, 0]];
        let mut tables = vec![
            table(0, 3, rows[..2].to_vec()),
            table(1, 3, rows[2..].to_vec()),
            table(2, 3, vec![]),
        ];
        prefix_over(&mut tables, &AssociateOperator::add(vec![0], 1), false).unwrap();
        let all: Vec<_> = tables.iter().flat_map(real_rows).collect();
        assert_eq!(all, rows);
    }

    #[test]
    fn prefix_crosses_partitions_and_empty_ones() {
        let mut tables = vec![
            table(0, 4, vec![vec![1, 1], vec![2, 1]]),
            table(1, 4, vec![]),
            table(2, 4, vec![vec![2, 1], vec![2, 1], vec![3, 1]]),
            table(3, 4, vec![vec![3, 1]]),
        ];
        tables[2].tuples.push(Tuple::dummy(2));
        prefix_over(&mut tables, &AssociateOperator::add(vec![0], 1), false).unwrap();
        let all: Vec<_> = tables.iter().flat_map(real_rows).collect();
        assert_eq!(
            all,
            vec![
                vec![1, 1],
                vec![2, 1],
                vec![2, 2],
                vec![2, 3],
                vec![3, 1],
                vec![3, 2]
            ]
        );
    }

    #[test]
    fn reverse_max_spreads_group_totals() {
        let mut tables = vec![
            table(0, 2, vec![vec![1, 1], vec![1, 2], vec![2, 1]]),
            table(1, 2, vec![vec![2, 2], vec![2, 3], vec![4, 1]]),
        ];
        prefix_over(&mut tables, &AssociateOperator::max(vec![0], 1), true).unwrap();
        let all: Vec<_> = tables.iter().flat_map(real_rows).collect();
        assert_eq!(
            all,
            vec![
                vec![1, 2],
                vec![1, 2],
                vec![2, 3],
                vec![2, 3],
                vec![2, 3],
                vec![4, 1]
            ]
        );
    }

    #[test]
    fn empty_group_by_is_a_running_total() {
        let mut tables = vec![
            table(0, 2, vec![vec![5, 3], vec![9, 4]]),
            table(1, 2, vec![vec![1, 5]]),
        ];
        prefix_over(&mut tables, &AssociateOperator::add(vec![], 1), false).unwrap();
        let totals: Vec<Value> = tables
            .iter()
            .flat_map(real_rows)
            .map(|r| r[1])
            .collect();
        assert_eq!(totals, vec![3, 7, 12]);
    }

    #[test]
    fn local_aggregation_keeps_one_row_per_group() {
        let mut t = table(0, 1, vec![vec![1, 10], vec![1, 20], vec![2, 30], vec![3, 1], vec![3, 2]]);
        t.tuples.push(Tuple::dummy(2));
        t.group_by_aggregate(&AssociateOperator::add(vec![0], 1)).unwrap();
        assert_eq!(real_rows(&t), vec![vec![1, 30], vec![2, 30], vec![3, 3]]);
    }

    #[test]
    fn dummies_before_real_rows_do_not_leak_values() {
        let mut t = table(0, 1, vec![vec![1, 100], vec![1, 1], vec![1, 2]]);
        t.tuples[0].ct_mark_dummy(Choice::from(1));
        let last = agg_core(&mut t.tuples, &AssociateOperator::add(vec![0], 1), true, false, 2);
        assert_eq!(real_rows(&t), vec![vec![1, 1], vec![1, 3]]);
        assert_eq!(last.data, vec![1, 3]);
        assert!(!last.is_dummy());
    }

    #[test]
    fn removes_all_but_last_of_each_group() {
        let mut t = table(0, 1, vec![vec![1, 2], vec![1, 2], vec![2, 1], vec![3, 2], vec![3, 2]]);
        t.remove_dup_after_prefix(&[0]).unwrap();
        assert_eq!(real_rows(&t), vec![vec![1, 2], vec![2, 1], vec![3, 2]]);
    }

    #[test]
    fn combine_only_runs_on_partition_zero() {
        let io = exchange();
        let mut t = table(1, 2, vec![vec![1, 1]]);
        let op = AssociateOperator::add(vec![0], 1);
        assert!(matches!(
            t.group_by_aggregate_base(Some(&io), &op, true, Phase::Combine, false),
            Err(TableError::WrongPartition { .. })
        ));
        assert!(t
            .group_by_aggregate_base(None, &op, true, Phase::Boundary, false)
            .is_err());
    }
}
