// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! This module contains common test utilities for the tables and protocols of this crate.

use crate::{
    bounds::SizeBounds,
    cluster::Cluster,
    crypto::SlotCipher,
    exchange::Exchange,
    global_table::GlobalTable,
    local_table::LocalTable,
    mailbox::MemoryMailbox,
    metrics::Metrics,
    tuple::Tuple,
    Value,
};
use rand::{rngs::StdRng, Rng};
use simplelog::{Config, WriteLogger};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

/// `n` rows of `width` values in `0..max_value`, each a dummy with probability `dummy_ratio`.
pub(crate) fn random_tuples(
    rng: &mut StdRng,
    n: usize,
    width: usize,
    max_value: Value,
    dummy_ratio: f64,
) -> Vec<Tuple> {
    (0..n)
        .map(|_| {
            let data = (0..width).map(|_| rng.gen_range(0..max_value)).collect();
            if rng.gen_bool(dummy_ratio) {
                let mut dummy = Tuple::new(data);
                dummy.ct_mark_dummy(subtle::Choice::from(1));
                dummy
            } else {
                Tuple::new(data)
            }
        })
        .collect()
}

/// An exchange over a fresh in-memory mailbox.
pub(crate) fn exchange() -> Exchange {
    Exchange::new(
        Arc::new(MemoryMailbox::new()),
        Arc::new(SlotCipher::demo().unwrap()),
        Arc::new(Metrics::new()),
    )
}

/// The real rows of a partition, in slot order.
pub(crate) fn real_rows(table: &LocalTable) -> Vec<Vec<Value>> {
    table
        .tuples()
        .iter()
        .filter(|t| !t.is_dummy())
        .map(|t| t.data.clone())
        .collect()
}

/// An in-process cluster of `p` partitions with the default security parameter.
pub(crate) fn local_cluster(p: usize) -> Arc<Cluster> {
    init_logger();
    Cluster::local_seeded(p, SizeBounds::default(), 7).unwrap()
}

/// A table with columns `c0, c1, ...` holding `rows`.
pub(crate) fn table_of(cluster: &Arc<Cluster>, width: usize, rows: &[Vec<Value>]) -> GlobalTable {
    let names = (0..width).map(|i| format!("c{}", i)).collect();
    GlobalTable::from_rows(cluster, names, rows.to_vec()).unwrap()
}

/// `n` rows of `width` columns, the first holding keys in `0..keys`.
pub(crate) fn random_rows(rng: &mut StdRng, n: usize, width: usize, keys: Value) -> Vec<Vec<Value>> {
    (0..n)
        .map(|i| {
            let mut row = vec![rng.gen_range(0..keys)];
            row.extend((1..width).map(|c| (i * width + c) as Value));
            row
        })
        .collect()
}

/// `n` rows of `width` columns where three rows in four share key 0 and the rest spread over
/// keys `1..=3`.
pub(crate) fn skewed_rows(n: usize, width: usize) -> Vec<Vec<Value>> {
    (0..n)
        .map(|i| {
            let key = if i % 4 == 3 { (i % 3 + 1) as Value } else { 0 };
            let mut row = vec![key];
            row.extend((1..width).map(|c| (i * width + c) as Value));
            row
        })
        .collect()
}

/// The nested-loop equi-join of `r` and `s`: the columns of `r` with `r_cols` moved first,
/// followed by the non-join columns of `s`. Sorted.
pub(crate) fn naive_join(
    r: &[Vec<Value>],
    s: &[Vec<Value>],
    r_cols: &[usize],
    s_cols: &[usize],
) -> Vec<Vec<Value>> {
    let ahead = |row: &Vec<Value>, cols: &[usize]| {
        let mut out: Vec<Value> = cols.iter().map(|&c| row[c]).collect();
        out.extend((0..row.len()).filter(|c| !cols.contains(c)).map(|c| row[c]));
        out
    };
    let jc = r_cols.len();
    let mut out = Vec::new();
    for a in r {
        let a = ahead(a, r_cols);
        for b in s {
            let b = ahead(b, s_cols);
            if a[..jc] == b[..jc] {
                let mut row = a.clone();
                row.extend_from_slice(&b[jc..]);
                out.push(row);
            }
        }
    }
    out.sort();
    out
}

/// Stamps out `$function_name(p, n)` as a test for one partition count and input size.
macro_rules! create_cluster_test {
    ($function_name:ident, $num_partitions:expr, $num_rows:expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $num_partitions _partitions_ $num_rows _rows>]() {
                $function_name($num_partitions, $num_rows);
            }
        }
    };
}

macro_rules! create_cluster_tests {
    ($function_name:ident) => {
        $crate::test_utils::create_cluster_test!($function_name, 1, 20);
        $crate::test_utils::create_cluster_test!($function_name, 2, 0);
        $crate::test_utils::create_cluster_test!($function_name, 2, 40);
        $crate::test_utils::create_cluster_test!($function_name, 3, 61);
        $crate::test_utils::create_cluster_test!($function_name, 4, 100);
    };
}

pub(crate) use create_cluster_test;
pub(crate) use create_cluster_tests;
