// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Fixed-width rows of integer columns with a dummy flag.

use crate::{
    obliv::{ct_lt_i32, CtMove, Element},
    Result, TableError, Value, VAL_LENGTH,
};
use std::fmt;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

const HASH_MIX: u64 = 0x9e37_79b9_9e37_79b9;

/// A row of a table.
///
/// Dummy rows are padding. Their `data` is never meaningful and is only inspected by oblivious
/// primitives through constant-time selection.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Tuple {
    /// The column values.
    pub data: Vec<Value>,
    dummy: u8,
}

impl Tuple {
    /// A real row holding `data`.
    pub fn new(data: Vec<Value>) -> Self {
        Self { data, dummy: 0 }
    }

    /// A dummy row of `width` zeroed columns.
    pub fn dummy(width: usize) -> Self {
        Self {
            data: vec![0; width],
            dummy: 1,
        }
    }

    /// The number of columns.
    pub fn width(&self) -> usize {
        self.data.len()
    }

    pub fn ct_is_dummy(&self) -> Choice {
        Choice::from(self.dummy & 1)
    }

    /// Non-constant-time version of `ct_is_dummy`, for use outside oblivious code paths.
    pub fn is_dummy(&self) -> bool {
        self.dummy == 1
    }

    /// Sets the dummy flag to `choice`.
    pub fn ct_set_dummy(&mut self, choice: Choice) {
        self.dummy = choice.unwrap_u8();
    }

    /// Turns the row into a dummy if `choice` is set; never turns a dummy into a real row.
    pub fn ct_mark_dummy(&mut self, choice: Choice) {
        self.dummy |= choice.unwrap_u8();
    }

    /// Whether `self` sorts strictly before `other` on `cols`. Dummy rows sort after every real
    /// row, and two dummies compare by their columns.
    pub fn ct_less_in_cols(&self, other: &Self, cols: &[usize]) -> Choice {
        let mut less = !self.ct_is_dummy() & other.ct_is_dummy();
        let mut all_equal = self.dummy.ct_eq(&other.dummy);
        for &col in cols {
            let (a, b) = (self.data[col], other.data[col]);
            less |= all_equal & ct_lt_i32(a, b);
            all_equal &= a.ct_eq(&b);
        }
        less
    }

    /// Whether `self` and `other` agree on every column in `cols`, ignoring dummy flags.
    pub fn ct_equal_in_cols(&self, other: &Self, cols: &[usize]) -> Choice {
        let mut equal = Choice::from(1);
        for &col in cols {
            equal &= self.data[col].ct_eq(&other.data[col]);
        }
        equal
    }

    /// Hashes the values of `cols` together with `seed`.
    pub fn key_hash(&self, cols: &[usize], seed: u64) -> u64 {
        let mix = |acc: u64, v: u64| {
            acc ^ v
                .wrapping_add(HASH_MIX)
                .wrapping_add(acc << 6)
                .wrapping_add(acc >> 2)
        };
        let mut acc = cols.len() as u64;
        for &col in cols {
            acc = mix(acc, i64::from(self.data[col]) as u64);
        }
        mix(acc, seed)
    }

    pub fn push(&mut self, value: Value) {
        self.data.push(value);
    }

    pub fn insert(&mut self, index: usize, value: Value) {
        self.data.insert(index, value);
    }

    pub fn remove(&mut self, index: usize) -> Value {
        self.data.remove(index)
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&u32::from(self.dummy).to_le_bytes());
    }

    /// Serializes rows as `width` little-endian columns followed by the dummy flag, each
    /// `VAL_LENGTH` bytes wide.
    pub fn encode_rows(rows: &[Tuple]) -> Vec<u8> {
        let row_len = rows.first().map_or(0, |t| (t.width() + 1) * VAL_LENGTH);
        let mut out = Vec::with_capacity(row_len * rows.len());
        for row in rows {
            row.write_bytes(&mut out);
        }
        out
    }

    /// Inverse of [`Tuple::encode_rows`].
    pub fn decode_rows(bytes: &[u8], width: usize) -> Result<Vec<Tuple>> {
        let row_len = (width + 1) * VAL_LENGTH;
        if bytes.len() % row_len != 0 {
            return Err(TableError::MalformedTable(format!(
                "{} bytes do not hold whole rows of {} columns",
                bytes.len(),
                width
            )));
        }
        let rows = bytes
            .chunks_exact(row_len)
            .map(|chunk| {
                let mut values = chunk.chunks_exact(VAL_LENGTH).map(|v| {
                    let mut word = [0u8; VAL_LENGTH];
                    word.copy_from_slice(v);
                    Value::from_le_bytes(word)
                });
                let data: Vec<Value> = values.by_ref().take(width).collect();
                let dummy = values.next().unwrap_or(0) as u8 & 1;
                Tuple { data, dummy }
            })
            .collect();
        Ok(rows)
    }
}

impl CtMove for Tuple {
    fn cmove(&mut self, other: &Self, choice: Choice) {
        debug_assert_eq!(self.width(), other.width());
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            dst.conditional_assign(src, choice);
        }
        self.dummy.conditional_assign(&other.dummy, choice);
    }

    fn cswap(a: &mut Self, b: &mut Self, choice: Choice) {
        debug_assert_eq!(a.width(), b.width());
        for (x, y) in a.data.iter_mut().zip(b.data.iter_mut()) {
            Value::conditional_swap(x, y, choice);
        }
        u8::conditional_swap(&mut a.dummy, &mut b.dummy, choice);
    }
}

impl Element for Tuple {
    fn ct_is_dummy(&self) -> Choice {
        Tuple::ct_is_dummy(self)
    }

    fn ct_mark_dummy(&mut self, choice: Choice) {
        Tuple::ct_mark_dummy(self, choice)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = self.data.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", cells.join(" "))?;
        if self.is_dummy() {
            write!(f, " (dummy)")?;
        }
        Ok(())
    }
}
