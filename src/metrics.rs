// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Communication and timing counters.

use crate::TableId;
use log::debug;
use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Rows and bytes that left a partition on behalf of one table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Comm {
    pub rows: u64,
    pub bytes: u64,
}

/// A point-in-time copy of the counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub comm: BTreeMap<TableId, Comm>,
    /// Completed phases in completion order.
    pub phases: Vec<(String, Duration)>,
}

impl MetricsSnapshot {
    pub fn total_comm(&self) -> Comm {
        self.comm.values().fold(Comm::default(), |acc, c| Comm {
            rows: acc.rows + c.rows,
            bytes: acc.bytes + c.bytes,
        })
    }

    pub fn total_time(&self) -> Duration {
        self.phases.iter().map(|(_, d)| *d).sum()
    }
}

/// Counters shared by every partition task of one process.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_comm(&self, table: TableId, rows: u64, bytes: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.comm.entry(table).or_default();
        entry.rows += rows;
        entry.bytes += bytes;
    }

    pub fn record_phase(&self, name: &str, elapsed: Duration) {
        debug!("phase {} took {:?}", name, elapsed);
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phases
            .push((name.to_string(), elapsed));
    }

    /// Starts timing `name`; the phase is recorded when the returned guard drops.
    pub fn phase<'a>(&'a self, name: &str) -> PhaseTimer<'a> {
        PhaseTimer {
            metrics: self,
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the counters and clears them.
    pub fn take_and_reset(&self) -> MetricsSnapshot {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Records the elapsed time of a phase on drop.
#[must_use = "the phase is timed until the guard is dropped"]
pub struct PhaseTimer<'a> {
    metrics: &'a Metrics,
    name: String,
    start: Instant,
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_phase(&self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_accumulates_per_table() {
        let metrics = Metrics::new();
        metrics.record_comm(1, 10, 400);
        metrics.record_comm(1, 5, 200);
        metrics.record_comm(2, 1, 44);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.comm[&1], Comm { rows: 15, bytes: 600 });
        assert_eq!(snapshot.total_comm(), Comm { rows: 16, bytes: 644 });
    }

    #[test]
    fn phases_are_recorded_when_guards_drop() {
        let metrics = Metrics::new();
        {
            let _outer = metrics.phase("outer");
            let _inner = metrics.phase("inner");
        }
        let snapshot = metrics.take_and_reset();
        let names: Vec<&str> = snapshot.phases.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["inner", "outer"]);
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
