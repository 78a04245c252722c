// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Per-partition steps of the primary-key join, the bounded-output join and the local join.
//!
//! Throughout, `R` is the side that receives the output and `S` the side whose non-join columns
//! are attached to it. Join columns have been moved to the front of both sides.

use super::{aggregate::agg_core, aggregate::pair_mut, LocalTable};
use crate::{
    obliv::{self, CtMove},
    operators::AssociateOperator,
    tuple::Tuple,
    Result, TableError, Value,
};
use log::debug;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, ConstantTimeLess};

fn join_cols(num_join_cols: usize) -> Vec<usize> {
    (0..num_join_cols).collect()
}

fn copy_range(dst: &mut Tuple, src: &Tuple, from: usize, to: usize, choice: Choice) {
    for j in from..to {
        dst.data[j].conditional_assign(&src.data[j], choice);
    }
}

/// Attaches the non-join columns of the unique-key rows `s` to the rows of `r`; rows of `r`
/// without a partner become dummies. `r` keeps its length.
pub(crate) fn pk_join_attach(
    r: &mut Vec<Tuple>,
    s: &[Tuple],
    num_join_cols: usize,
    r_width: usize,
    s_width: usize,
) -> Result<()> {
    let out_width = r_width + s_width - num_join_cols;
    let tag = out_width;
    let r_len = r.len();

    for t in r.iter_mut() {
        t.data.resize(out_width, 0);
        t.push(1);
    }
    for t in s {
        let mut data = Vec::with_capacity(out_width + 1);
        data.extend_from_slice(&t.data[..num_join_cols]);
        data.resize(r_width, 0);
        data.extend_from_slice(&t.data[num_join_cols..s_width]);
        data.push(0);
        let mut row = Tuple::new(data);
        row.ct_set_dummy(t.ct_is_dummy());
        r.push(row);
    }

    let mut cols = join_cols(num_join_cols);
    cols.push(tag);
    obliv::sort(r, &cols, true);
    let keys = &cols[..num_join_cols];

    if let Some(first) = r.first_mut() {
        let is_r = first.data[tag].ct_eq(&1);
        first.ct_mark_dummy(is_r);
    }
    for i in 1..r.len() {
        let (prev, next) = pair_mut(r, i - 1, i);
        let eq = prev.ct_equal_in_cols(next, keys);
        copy_range(next, prev, r_width, out_width, eq & !prev.ct_is_dummy());
        let is_r = next.data[tag].ct_eq(&1);
        next.ct_mark_dummy(is_r & (prev.ct_is_dummy() | !eq));
    }

    let markers: Vec<u8> = r.iter().map(|t| t.data[tag].ct_eq(&1).unwrap_u8()).collect();
    obliv::compact(r.as_mut_slice(), &markers)?;
    r.truncate(r_len);
    for t in r.iter_mut() {
        t.data.truncate(out_width);
    }
    Ok(())
}

/// Gives every row the number of rows of its group, in a new last column. Rows must be sorted on
/// `cols`.
fn local_degrees(rows: &mut [Tuple], cols: &[usize], width: usize) {
    for t in rows.iter_mut() {
        t.push(1);
    }
    let width = width + 1;
    agg_core(
        rows,
        &AssociateOperator::add(cols.to_vec(), width - 1),
        true,
        false,
        width,
    );
    agg_core(
        rows,
        &AssociateOperator::max(cols.to_vec(), width - 1),
        true,
        true,
        width,
    );
}

/// One row per group: the join columns and the degree in `degree_col`.
fn degree_table(rows: &[Tuple], num_join_cols: usize, degree_col: usize) -> Vec<Tuple> {
    let mut out: Vec<Tuple> = rows
        .iter()
        .map(|t| {
            let mut data = t.data[..num_join_cols].to_vec();
            data.push(t.data[degree_col]);
            let mut row = Tuple::new(data);
            row.ct_set_dummy(t.ct_is_dummy());
            row
        })
        .collect();
    let cols = join_cols(num_join_cols);
    for i in 1..out.len() {
        let (prev, next) = pair_mut(&mut out, i - 1, i);
        let dup = !next.ct_is_dummy() & prev.ct_equal_in_cols(next, &cols);
        prev.ct_mark_dummy(dup);
    }
    out
}

/// Repeats each real row `rows[i].data[d_col]` times into exactly `m` slots, in order. Copies
/// that fall beyond `m` are dropped. Each row is routed to the last slot of its range, clamped
/// to `m - 1`, and the slots before it are filled from the right.
fn expand_local(rows: &mut Vec<Tuple>, d_col: usize, m: usize, width: usize) -> Result<()> {
    let m64 = m as u64;
    let mut end = 0u64;
    let mut positions = Vec::with_capacity(rows.len());
    for t in rows.iter_mut() {
        let mut d = i64::from(t.data[d_col]).max(0) as u64;
        d.conditional_assign(&0, t.ct_is_dummy());
        let start = end;
        end += d;
        let mut position = end.wrapping_sub(1);
        position.conditional_assign(&m64.wrapping_sub(1), m64.ct_lt(&end));
        t.ct_mark_dummy(d.ct_eq(&0) | !start.ct_lt(&m64));
        position.conditional_assign(&u64::MAX, t.ct_is_dummy());
        positions.push(position);
    }
    obliv::sort_by_key(rows.as_mut_slice(), &mut positions)?;
    rows.resize(m, Tuple::dummy(width));
    positions.resize(m, u64::MAX);
    obliv::distribute(rows.as_mut_slice(), &mut positions)?;
    fill_from_right(rows);
    Ok(())
}

/// Right to left, replaces every dummy by the row after it.
pub(crate) fn fill_from_right(rows: &mut [Tuple]) {
    for i in (1..rows.len()).rev() {
        let (prev, next) = pair_mut(rows, i - 1, i);
        let empty = prev.ct_is_dummy();
        prev.cmove(next, empty);
    }
}

/// Output offset of an expanded S row inside its key group: copy `c` of the `s`-th row of a group
/// with degrees `deg_r` on R and `deg_s` on S pairs with copy `s` of the `c`-th R row.
fn alignment_offset(i: Value, j: Value, deg_r: Value, deg_s: Value) -> i64 {
    let q = i64::from(i) - 1;
    let deg_r = i64::from(deg_r).max(1);
    q / deg_r + (q % deg_r) * i64::from(deg_s) + i64::from(j) - 1
}

impl LocalTable {
    /// Sorts R on the join columns and appends the partition id `I` and the tie index `Z`: the
    /// first row of each key gets 0, the others their slot index.
    pub fn tag_foreign_rows(&mut self, num_join_cols: usize) -> Result<()> {
        let cols = join_cols(num_join_cols);
        self.sort(&cols, true)?;
        self.append_col(self.partition as Value);
        self.append_col(0);
        let z = self.num_columns - 1;
        for i in 1..self.tuples.len() {
            let (prev, next) = pair_mut(&mut self.tuples, i - 1, i);
            let tied = prev.ct_equal_in_cols(next, &cols);
            next.data[z].conditional_assign(&(i as Value), tied);
        }
        Ok(())
    }

    /// Co-located step of the primary-key join. R rows carry `I >= 0`, S rows `I = -1`; both
    /// carry `Z` last. Copies S's columns `ori_r..ori_r + align` into the first R row of each key
    /// and keeps exactly this table's number of slots.
    pub fn pk_join_combine(
        &mut self,
        s_rows: &[Tuple],
        num_join_cols: usize,
        ori_r: usize,
        align: usize,
    ) -> Result<()> {
        let width = self.num_columns;
        if ori_r + align + 2 != width {
            return Err(TableError::Shape(format!(
                "{} columns cannot hold {} + {} + 2",
                width, ori_r, align
            )));
        }
        let (i_col, z_col) = (width - 2, width - 1);
        let r_len = self.tuples.len();
        self.union(s_rows)?;

        let mut cols = join_cols(num_join_cols);
        cols.extend([z_col, i_col]);
        obliv::sort(&mut self.tuples, &cols, true);
        let keys = &cols[..num_join_cols];

        let is_r = |t: &Tuple| !t.data[i_col].ct_eq(&-1);
        if let Some(first) = self.tuples.first_mut() {
            let lone = first.data[z_col].ct_eq(&0) & is_r(first);
            first.ct_mark_dummy(lone);
        }
        for i in 1..self.tuples.len() {
            let (prev, next) = pair_mut(&mut self.tuples, i - 1, i);
            let eq = prev.ct_equal_in_cols(next, keys);
            let head = next.data[z_col].ct_eq(&0);
            copy_range(next, prev, ori_r, ori_r + align, !prev.ct_is_dummy() & eq & head);
            next.ct_mark_dummy((prev.ct_is_dummy() | !eq) & head & is_r(next));
        }

        let markers: Vec<u8> = self.tuples.iter().map(|t| is_r(t).unwrap_u8()).collect();
        obliv::compact(&mut self.tuples, &markers)?;
        self.tuples.truncate(r_len);
        Ok(())
    }

    /// Back on R's partitions: spreads the matched columns from the first row of each key to the
    /// rest, and turns rows of unmatched keys into dummies.
    pub fn finalize_pk_join(&mut self, num_join_cols: usize, ori_r: usize, align: usize) -> Result<()> {
        let width = self.num_columns;
        if ori_r + align + 2 != width {
            return Err(TableError::Shape(format!(
                "{} columns cannot hold {} + {} + 2",
                width, ori_r, align
            )));
        }
        let z_col = width - 1;
        let mut cols = join_cols(num_join_cols);
        cols.push(z_col);
        obliv::sort(&mut self.tuples, &cols, true);
        let keys = &cols[..num_join_cols];

        if let Some(first) = self.tuples.first_mut() {
            let orphan = !first.data[z_col].ct_eq(&0);
            first.ct_mark_dummy(orphan);
        }
        for i in 1..self.tuples.len() {
            let (prev, next) = pair_mut(&mut self.tuples, i - 1, i);
            let eq = prev.ct_equal_in_cols(next, keys);
            copy_range(next, prev, ori_r, ori_r + align, !prev.ct_is_dummy() & eq);
            let tail = !next.data[z_col].ct_eq(&0);
            next.ct_mark_dummy((prev.ct_is_dummy() | !eq) & tail);
        }
        Ok(())
    }

    /// Appends `l % m` and `l / m`, where `l` is the output offset of each expanded S row. The
    /// last four columns must be the S degree, the R degree, the index within the key group and
    /// the group's first output position (1-based).
    pub fn join_compute_alignment(&mut self, m: usize) -> Result<()> {
        let k = self.num_columns;
        if k < 4 || m == 0 {
            return Err(TableError::Shape(format!(
                "alignment needs four bookkeeping columns and m > 0, got {} and {}",
                k, m
            )));
        }
        let m = m as i64;
        for t in &mut self.tuples {
            let mut deg_r = t.data[k - 3];
            deg_r.conditional_assign(&1, t.ct_is_dummy());
            let l = alignment_offset(t.data[k - 2], t.data[k - 1], deg_r, t.data[k - 4]);
            t.push((l % m) as Value);
            t.push((l / m) as Value);
        }
        self.num_columns += 2;
        Ok(())
    }

    /// On S after the final shuffle: orders the rows by output offset and appends their non-join
    /// columns to the matching rows of `r`.
    pub fn join_final_combine(&mut self, r: &mut LocalTable, num_join_cols: usize) -> Result<()> {
        let width = self.num_columns;
        if width < num_join_cols + 6 {
            return Err(TableError::Shape(format!(
                "{} columns do not hold the alignment bookkeeping",
                width
            )));
        }
        self.sort(&[width - 2], true)?;
        if self.tuples.len() < r.tuples.len() {
            self.pad_to_size(r.tuples.len())?;
        }
        for (out, s) in r.tuples.iter_mut().zip(&self.tuples) {
            out.data.extend_from_slice(&s.data[num_join_cols..width - 6]);
            out.ct_mark_dummy(s.ct_is_dummy());
        }
        r.num_columns += width - 6 - num_join_cols;
        Ok(())
    }

    /// Joins this partition's rows (R) with `s` on the first `num_join_cols` columns, in place.
    ///
    /// Without a bound, `s` must have unique keys and every R row keeps its slot. With
    /// `Some(m)`, the result holds exactly `m` slots; output rows beyond `m` are dropped.
    /// Returns the number of output slots.
    pub fn local_join(
        &mut self,
        s: &LocalTable,
        num_join_cols: usize,
        output_bound: Option<usize>,
    ) -> Result<usize> {
        let (r_width, s_width) = (self.num_columns, s.num_columns);
        if num_join_cols > r_width.min(s_width) {
            return Err(TableError::Shape(format!(
                "{} join columns on tables of {} and {} columns",
                num_join_cols, r_width, s_width
            )));
        }
        let cols = join_cols(num_join_cols);
        let mut s_rows = s.tuples.clone();

        match output_bound {
            None => {
                pk_join_attach(&mut self.tuples, &s_rows, num_join_cols, r_width, s_width)?;
            }
            Some(m) => {
                let r_rows = &mut self.tuples;
                obliv::sort(r_rows, &cols, true);
                obliv::sort(&mut s_rows, &cols, true);

                // R: [.., dr, ds], S: [.., ds, dr]
                local_degrees(r_rows, &cols, r_width);
                local_degrees(&mut s_rows, &cols, s_width);
                let r_degrees = degree_table(r_rows, num_join_cols, r_width);
                let s_degrees = degree_table(&s_rows, num_join_cols, s_width);
                pk_join_attach(r_rows, &s_degrees, num_join_cols, r_width + 1, num_join_cols + 1)?;
                pk_join_attach(
                    &mut s_rows,
                    &r_degrees,
                    num_join_cols,
                    s_width + 1,
                    num_join_cols + 1,
                )?;

                expand_local(r_rows, r_width + 1, m, r_width + 2)?;
                expand_local(&mut s_rows, s_width + 1, m, s_width + 2)?;

                // i: index within the key group, j: first position of the group.
                for t in &mut s_rows {
                    t.push(1);
                    t.push(1);
                }
                let w = s_width + 4;
                agg_core(&mut s_rows, &AssociateOperator::add(cols.clone(), w - 2), true, false, w);
                agg_core(&mut s_rows, &AssociateOperator::add(vec![], w - 1), true, false, w);
                agg_core(&mut s_rows, &AssociateOperator::min(cols.clone(), w - 1), true, false, w);

                let m64 = m as u64;
                let mut offsets: Vec<u64> = Vec::with_capacity(m);
                for t in &mut s_rows {
                    let l = alignment_offset(
                        t.data[s_width + 2],
                        t.data[s_width + 3],
                        t.data[s_width + 1],
                        t.data[s_width],
                    );
                    let mut offset = l.max(0) as u64;
                    t.ct_mark_dummy(!offset.ct_lt(&m64));
                    offset.conditional_assign(&u64::MAX, t.ct_is_dummy());
                    offsets.push(offset);
                }
                obliv::sort_by_key(s_rows.as_mut_slice(), &mut offsets)?;
                obliv::distribute(s_rows.as_mut_slice(), &mut offsets)?;

                for (out, s) in r_rows.iter_mut().zip(&s_rows) {
                    out.data.truncate(r_width);
                    out.data.extend_from_slice(&s.data[num_join_cols..s_width]);
                    out.ct_mark_dummy(s.ct_is_dummy());
                }
                debug!(
                    "table {} partition {}: bounded local join into {} slots",
                    self.table_id, self.partition, m
                );
            }
        }
        self.num_columns = r_width + s_width - num_join_cols;
        Ok(self.tuples.len())
    }
}
