// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Data-oblivious distributed relational operators.
//!
//! Tables are split into `P` partitions. Every partition-local transformation is built from
//! oblivious primitives ([`obliv`]) whose memory accesses and branches depend only on sizes,
//! and a [`global_table::GlobalTable`] drives the partitions through multi-phase protocols
//! (sample sort, primary-key join, bounded-output join, SODA balanced join, expansion and
//! prefix aggregation) separated by global barriers.
//!
//! Fragments exchanged between partitions are sealed with AES-128-GCM ([`crypto`]) and travel
//! through a named-slot [`mailbox`], either in process or through worker processes ([`rpc`]).

use thiserror::Error;

#[cfg(test)]
mod test_utils;

pub mod bounds;
pub mod cluster;
pub mod config;
pub mod crypto;
pub mod exchange;
pub mod global_table;
pub mod local_table;
pub mod mailbox;
pub mod metrics;
pub mod obliv;
pub mod operators;
pub mod partition;
pub mod rpc;
pub mod task;
pub mod tuple;
pub mod worker;

/// Identifies a table across every partition of a cluster.
pub type TableId = u64;
/// Index of a partition, in `0..num_partitions`.
pub type PartitionId = usize;
/// The type of a single column value.
pub type Value = i32;

/// The number of bytes used to serialize one column value (and the dummy flag).
pub const VAL_LENGTH: usize = 4;

/// Errors raised by table operations.
///
/// Every variant is fatal to the protocol run that produced it: partitions are left in an
/// undefined state and the affected tables should be dropped.
#[derive(Error, Debug)]
pub enum TableError {
    /// A size or layout invariant did not hold, which indicates a sequencing bug.
    #[error("shape violation: {0}")]
    Shape(String),

    /// Rows of different widths were mixed.
    #[error("column count mismatch: expected {expected}, found {found}")]
    ColumnCount { expected: usize, found: usize },

    /// A phase that must run on one specific partition was sent elsewhere.
    #[error("{phase} must run on partition {expected}, not {actual}")]
    WrongPartition {
        phase: &'static str,
        expected: PartitionId,
        actual: PartitionId,
    },

    /// A mailbox slot was read before it was written.
    #[error("slot {0} has not been written")]
    MissingSlot(String),

    /// The partition holds no table with this id.
    #[error("table {0} does not exist on this partition")]
    UnknownTable(TableId),

    #[error("cryptographic failure: {0}")]
    Crypto(&'static str),

    #[error("malformed operator: {0}")]
    MalformedOperator(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("malformed table data: {0}")]
    MalformedTable(String),

    /// A remote worker reported a failure.
    #[error("remote partition failed: {0}")]
    Remote(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A partition worker panicked while holding its lock.
    #[error("partition worker is poisoned")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("integer conversion error: {0}")]
    IntegerConversion(#[from] std::num::TryFromIntError),
}

pub type Result<T> = std::result::Result<T, TableError>;

pub use cluster::Cluster;
pub use config::ClusterConfig;
pub use global_table::GlobalTable;
pub use local_table::LocalTable;
pub use operators::AssociateOperator;
pub use tuple::Tuple;
