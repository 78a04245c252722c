// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Row movement between partitions: hash and column shuffles, the sample sort steps and the
//! receiving side of every shuffle.

use super::LocalTable;
use crate::{
    exchange::Exchange,
    mailbox::{SlotKey, SlotKind},
    obliv::{self, choice_to_u64, CtMove},
    tuple::Tuple,
    PartitionId, Result, TableError,
};
use log::{debug, warn};
use rand::Rng;
use subtle::{ConditionallySelectable, ConstantTimeEq, ConstantTimeLess};

impl LocalTable {
    fn slot(&self, source: PartitionId, target: PartitionId, kind: SlotKind) -> SlotKey {
        SlotKey::new(self.table_id, source, target, kind)
    }

    /// Sends `[j * bound, (j + 1) * bound)` to partition `j` for every `j` and leaves the table
    /// empty. Empty fragments are sent too, so every receiver finds all of its slots.
    fn send_buckets(&mut self, io: &Exchange, bound: usize) -> Result<()> {
        let p = self.num_partitions;
        if self.tuples.len() != p * bound {
            return Err(TableError::Shape(format!(
                "{} rows cannot be split into {} buckets of {}",
                self.tuples.len(),
                p,
                bound
            )));
        }
        let tuples = std::mem::take(&mut self.tuples);
        for target in 0..p {
            let fragment = &tuples[target * bound..(target + 1) * bound];
            io.send(self.slot(self.partition, target, SlotKind::Shuffle), fragment)?;
        }
        Ok(())
    }

    /// Shrinks the table to at most `slots` rows, keeping real rows first. Real rows beyond
    /// `slots` are dropped.
    pub fn fit_to(&mut self, slots: usize) -> Result<()> {
        if self.tuples.len() <= slots {
            return Ok(());
        }
        debug!(
            "table {} partition {}: compacting {} rows into {} slots",
            self.table_id,
            self.partition,
            self.tuples.len(),
            slots
        );
        let markers: Vec<u8> = self
            .tuples
            .iter()
            .map(|t| (!t.ct_is_dummy()).unwrap_u8())
            .collect();
        obliv::compact(&mut self.tuples, &markers)?;
        self.tuples.truncate(slots);
        Ok(())
    }

    /// Hash targets on `key`; dummies get a random target so bucket loads do not reveal them.
    fn key_targets<R: Rng>(&self, key: &[usize], seed: u64, rng: &mut R) -> Vec<u64> {
        let p = self.num_partitions as u64;
        self.tuples
            .iter()
            .map(|t| {
                let mut target = t.key_hash(key, seed) % p;
                target.conditional_assign(&rng.gen_range(0..p), t.ct_is_dummy());
                target
            })
            .collect()
    }

    /// Sends every row, dummies included, to a uniformly random partition. The fragment sizes
    /// are visible, the rows themselves are sealed.
    pub fn random_shuffle<R: Rng>(&mut self, io: &Exchange, rng: &mut R) -> Result<()> {
        let p = self.num_partitions;
        let mut buckets = vec![Vec::new(); p];
        for t in std::mem::take(&mut self.tuples) {
            buckets[rng.gen_range(0..p)].push(t);
        }
        for (target, bucket) in buckets.iter().enumerate() {
            io.send(self.slot(self.partition, target, SlotKind::Shuffle), bucket)?;
        }
        Ok(())
    }

    /// Routes each real row to `hash(key, seed) % P` in fixed-size fragments of
    /// `min(bound, size)` rows. Rows overflowing a fragment are dropped.
    pub fn shuffle_by_key<R: Rng>(
        &mut self,
        io: &Exchange,
        key: &[usize],
        seed: u64,
        bound: usize,
        rng: &mut R,
    ) -> Result<()> {
        self.check_cols(key)?;
        let bound = bound.min(self.size());
        self.fit_to(self.num_partitions * bound)?;
        let mut targets = self.key_targets(key, seed, rng);
        obliv::shuffle(
            &mut self.tuples,
            &mut targets,
            self.num_partitions,
            bound,
            self.num_columns,
        )?;
        self.send_buckets(io, bound)
    }

    /// [`LocalTable::shuffle_by_key`] through the sort-based bucketing network.
    pub fn soda_shuffle_by_key<R: Rng>(
        &mut self,
        io: &Exchange,
        key: &[usize],
        seed: u64,
        bound: usize,
        rng: &mut R,
    ) -> Result<()> {
        self.check_cols(key)?;
        let bound = bound.min(self.size());
        let mut targets = self.key_targets(key, seed, rng);
        obliv::shuffle_soda(
            &mut self.tuples,
            &mut targets,
            self.num_partitions,
            bound,
            self.num_columns,
        )?;
        self.send_buckets(io, bound)
    }

    /// Routes each real row to the partition named by its value in `col`.
    pub fn shuffle_by_col(&mut self, io: &Exchange, col: usize, bound: usize) -> Result<()> {
        self.check_cols(&[col])?;
        let bound = bound.min(self.size());
        self.fit_to(self.num_partitions * bound)?;
        // Negative values only occur on dummies and land past the last bucket.
        let mut targets: Vec<u64> = self
            .tuples
            .iter()
            .map(|t| u64::from(t.data[col] as u32))
            .collect();
        obliv::shuffle(
            &mut self.tuples,
            &mut targets,
            self.num_partitions,
            bound,
            self.num_columns,
        )?;
        self.send_buckets(io, bound)
    }

    /// Replaces the table with the concatenation of the fragments every partition sent here.
    pub fn shuffle_merge(&mut self, io: &Exchange) -> Result<()> {
        let mut merged = Vec::new();
        for source in 0..self.num_partitions {
            let key = self.slot(source, self.partition, SlotKind::Shuffle);
            merged.extend(io.receive(&key, self.num_columns)?);
        }
        if !self.tuples.is_empty() {
            warn!(
                "table {} partition {}: merge overwrote {} unsent rows",
                self.table_id,
                self.partition,
                self.tuples.len()
            );
        }
        self.tuples = merged;
        Ok(())
    }

    /// Sorts partition 0's rows and broadcasts `P - 1` pivots at the quantiles of its real
    /// rows. Runs on partition 0 only.
    pub fn get_pivots(&mut self, io: &Exchange, cols: &[usize]) -> Result<()> {
        self.check_partition("get_pivots", 0)?;
        self.sort(cols, true)?;

        let p = self.num_partitions as u64;
        let real: u64 = self
            .tuples
            .iter()
            .map(|t| choice_to_u64(!t.ct_is_dummy()))
            .sum();
        let (run, rest) = (real / p, real % p);
        let last = real.saturating_sub(1);

        let mut pivots = Vec::with_capacity(self.num_partitions.saturating_sub(1));
        for i in 1..p {
            let mut extra = i;
            extra.conditional_assign(&rest, rest.ct_lt(&i));
            let mut want = i * run + extra;
            want.conditional_assign(&last, last.ct_lt(&want));

            let mut pivot = Tuple::dummy(self.num_columns);
            for (j, t) in self.tuples.iter().enumerate() {
                pivot.cmove(t, (j as u64).ct_eq(&want));
            }
            pivots.push(pivot);
        }
        for target in 0..self.num_partitions {
            io.send(self.slot(0, target, SlotKind::Pivots), &pivots)?;
        }
        Ok(())
    }

    /// Buckets the rows against the pivots from partition 0 and sends bucket `j` to partition
    /// `j`.
    pub fn partition_by_pivots(&mut self, io: &Exchange, cols: &[usize], bound: usize) -> Result<()> {
        self.check_cols(cols)?;
        let pivots = io.receive(
            &self.slot(0, self.partition, SlotKind::Pivots),
            self.num_columns,
        )?;
        if pivots.len() + 1 != self.num_partitions {
            return Err(TableError::Shape(format!(
                "received {} pivots for {} partitions",
                pivots.len(),
                self.num_partitions
            )));
        }
        let bound = bound.min(self.size());
        self.fit_to(self.num_partitions * bound)?;
        obliv::partition_by_pivots(&mut self.tuples, &pivots, cols, bound, self.num_columns)?;
        self.send_buckets(io, bound)
    }

    /// Merges the received buckets and sorts them locally.
    pub fn sort_merge(&mut self, io: &Exchange, cols: &[usize]) -> Result<()> {
        self.shuffle_merge(io)?;
        self.sort(cols, true)
    }
}
