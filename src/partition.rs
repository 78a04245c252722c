// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Handles through which the coordinator reaches a partition.

use crate::{
    exchange::Exchange,
    rpc::TcpTransport,
    task::{Reply, Task},
    worker::Worker,
    PartitionId, Result, TableError,
};
use std::sync::Mutex;

/// Runs tasks on one partition, wherever it lives.
pub trait Partition: Send + Sync {
    fn id(&self) -> PartitionId;

    fn run(&self, task: Task) -> Result<Reply>;
}

/// A partition living in this process.
#[derive(Debug)]
pub struct LocalPartition {
    id: PartitionId,
    // Slot deliveries bypass the worker lock, which is held while the worker sends.
    io: Exchange,
    worker: Mutex<Worker>,
}

impl LocalPartition {
    pub fn new(worker: Worker) -> Self {
        Self {
            id: worker.partition(),
            io: worker.io().clone(),
            worker: Mutex::new(worker),
        }
    }
}

impl Partition for LocalPartition {
    fn id(&self) -> PartitionId {
        self.id
    }

    fn run(&self, task: Task) -> Result<Reply> {
        if let Task::PutSlot { key, block } = task {
            self.io.deliver(key, block)?;
            return Ok(Reply::Unit);
        }
        self.worker
            .lock()
            .map_err(|_| TableError::Poisoned)?
            .handle(task)
    }
}

/// A partition served by a worker process.
#[derive(Debug)]
pub struct RemotePartition {
    id: PartitionId,
    transport: TcpTransport,
}

impl RemotePartition {
    pub fn new(id: PartitionId, addr: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id,
            transport: TcpTransport::new(addr)?,
        })
    }
}

impl Partition for RemotePartition {
    fn id(&self) -> PartitionId {
        self.id
    }

    fn run(&self, task: Task) -> Result<Reply> {
        self.transport.call(&task.to_request())?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::SlotCipher,
        mailbox::{Mailbox, MemoryMailbox, SlotKey, SlotKind},
        metrics::Metrics,
        test_utils::exchange,
        tuple::Tuple,
    };
    use std::sync::Arc;

    #[test]
    fn slots_are_delivered_while_the_worker_is_busy() {
        let io = exchange();
        let partition = LocalPartition::new(Worker::with_seed(0, 2, io.clone(), 1).unwrap());
        assert_eq!(partition.id(), 0);

        let outbox = Arc::new(MemoryMailbox::new());
        let peer = Exchange::new(
            outbox.clone(),
            Arc::new(SlotCipher::demo().unwrap()),
            Arc::new(Metrics::new()),
        );
        let rows = vec![Tuple::new(vec![3, 4]), Tuple::dummy(2)];
        let key = SlotKey::new(1, 1, 0, SlotKind::Shuffle);
        peer.send(key, &rows).unwrap();
        let block = outbox.take(&key).unwrap();

        let busy = partition.worker.lock().unwrap();
        assert_eq!(
            partition.run(Task::PutSlot { key, block }).unwrap(),
            Reply::Unit
        );
        drop(busy);
        assert_eq!(io.receive(&key, 2).unwrap(), rows);
    }

    #[test]
    fn tasks_reach_the_worker() {
        let partition = LocalPartition::new(Worker::with_seed(1, 2, exchange(), 1).unwrap());
        partition
            .run(Task::Create {
                table: 4,
                num_columns: 1,
                rows: vec![Tuple::new(vec![1]), Tuple::dummy(1)],
            })
            .unwrap();
        assert_eq!(partition.run(Task::Size { table: 4 }).unwrap(), Reply::Int(2));
        assert_eq!(partition.run(Task::NumRows { table: 4 }).unwrap(), Reply::Int(1));
        assert!(partition.run(Task::Size { table: 5 }).is_err());
    }
}
