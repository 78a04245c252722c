// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The set of partitions a [`crate::GlobalTable`] is spread over, and the barrier that runs one
//! phase on all of them.

use crate::{
    bounds::SizeBounds,
    config::ClusterConfig,
    crypto::SlotCipher,
    exchange::Exchange,
    mailbox::{FileMailbox, Mailbox, MemoryMailbox},
    metrics::Metrics,
    partition::{LocalPartition, Partition, RemotePartition},
    rpc::PeerMailbox,
    task::{Reply, Task},
    worker::Worker,
    PartitionId, Result, TableError, TableId,
};
use log::info;
use rayon::prelude::*;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub struct Cluster {
    partitions: Vec<Box<dyn Partition>>,
    bounds: SizeBounds,
    metrics: Arc<Metrics>,
    next_table: AtomicU64,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("num_partitions", &self.partitions.len())
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

fn local_partitions(
    p: usize,
    mailbox: Arc<dyn Mailbox>,
    metrics: &Arc<Metrics>,
    seed: Option<u64>,
) -> Result<Vec<Box<dyn Partition>>> {
    let cipher = Arc::new(SlotCipher::demo()?);
    (0..p)
        .map(|i| {
            let io = Exchange::new(mailbox.clone(), cipher.clone(), metrics.clone());
            let worker = match seed {
                Some(seed) => Worker::with_seed(i, p, io, seed.wrapping_add(i as u64))?,
                None => Worker::new(i, p, io)?,
            };
            Ok(Box::new(LocalPartition::new(worker)) as Box<dyn Partition>)
        })
        .collect()
}

impl Cluster {
    pub fn new(partitions: Vec<Box<dyn Partition>>, bounds: SizeBounds, metrics: Arc<Metrics>) -> Result<Arc<Self>> {
        if partitions.is_empty() {
            return Err(TableError::InvalidConfig("a cluster needs a partition".into()));
        }
        if let Some((i, p)) = partitions.iter().enumerate().find(|(i, p)| p.id() != *i) {
            return Err(TableError::InvalidConfig(format!(
                "partition {} registered at index {}",
                p.id(),
                i
            )));
        }
        Ok(Arc::new(Self {
            partitions,
            bounds,
            metrics,
            next_table: AtomicU64::new(1),
        }))
    }

    /// `p` partitions in this process sharing an in-memory mailbox.
    pub fn local(p: usize, bounds: SizeBounds) -> Result<Arc<Self>> {
        let metrics = Arc::new(Metrics::new());
        let partitions = local_partitions(p, Arc::new(MemoryMailbox::new()), &metrics, None)?;
        Self::new(partitions, bounds, metrics)
    }

    /// Like [`Cluster::local`], with reproducible random choices.
    pub fn local_seeded(p: usize, bounds: SizeBounds, seed: u64) -> Result<Arc<Self>> {
        let metrics = Arc::new(Metrics::new());
        let partitions =
            local_partitions(p, Arc::new(MemoryMailbox::new()), &metrics, Some(seed))?;
        Self::new(partitions, bounds, metrics)
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());
        let partitions: Vec<Box<dyn Partition>> = if config.distributed {
            info!("connecting to {} workers", config.workers.len());
            config
                .workers
                .iter()
                .enumerate()
                .map(|(i, addr)| {
                    Ok(Box::new(RemotePartition::new(i, addr.clone())?) as Box<dyn Partition>)
                })
                .collect::<Result<_>>()?
        } else {
            let mailbox: Arc<dyn Mailbox> = match &config.slot_dir {
                Some(dir) => Arc::new(FileMailbox::new(dir)?),
                None => Arc::new(MemoryMailbox::new()),
            };
            local_partitions(config.num_partitions, mailbox, &metrics, None)?
        };
        Self::new(partitions, config.bounds(), metrics)
    }

    /// The partition served by worker process `id`.
    pub fn worker_partition(config: &ClusterConfig, id: PartitionId) -> Result<LocalPartition> {
        config.validate()?;
        let local: Arc<dyn Mailbox> = match &config.slot_dir {
            Some(dir) => Arc::new(FileMailbox::new(dir.join(format!("p{}", id)))?),
            None => Arc::new(MemoryMailbox::new()),
        };
        let mailbox = PeerMailbox::new(id, local, &config.workers)?;
        let io = Exchange::new(
            Arc::new(mailbox),
            Arc::new(SlotCipher::demo()?),
            Arc::new(Metrics::new()),
        );
        Ok(LocalPartition::new(Worker::new(id, config.num_partitions, io)?))
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn bounds(&self) -> &SizeBounds {
        &self.bounds
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn new_table_id(&self) -> TableId {
        self.next_table.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs `task(i)` on every partition `i` in parallel and waits for all of them.
    pub fn run_all<F>(&self, task: F) -> Result<Vec<Reply>>
    where
        F: Fn(PartitionId) -> Task + Sync,
    {
        self.partitions
            .par_iter()
            .map(|p| p.run(task(p.id())))
            .collect()
    }

    /// Runs a task on the partitions for which `task` returns one.
    pub fn run_some<F>(&self, task: F) -> Result<()>
    where
        F: Fn(PartitionId) -> Option<Task> + Sync,
    {
        self.partitions
            .par_iter()
            .filter_map(|p| task(p.id()).map(|t| p.run(t)))
            .collect::<Result<Vec<_>>>()
            .map(|_| ())
    }

    pub fn run_on(&self, id: PartitionId, task: Task) -> Result<Reply> {
        self.partitions
            .get(id)
            .ok_or_else(|| TableError::Shape(format!("no partition {}", id)))?
            .run(task)
    }
}
