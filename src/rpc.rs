// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Worker processes and the TCP plumbing between them.
//!
//! Every frame is one JSON object on one line: a [`Request`] from the caller, answered by a
//! [`Response`] on the same connection.

use crate::{
    mailbox::{Mailbox, SlotKey},
    partition::{LocalPartition, Partition},
    task::{Request, Response, Task},
    PartitionId, Result, TableError, TableId,
};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    runtime::{Builder, Runtime},
};

/// Longest frame either side accepts, newline included.
pub const MAX_FRAME_LEN: usize = 1 << 28;

/// Reads one newline-terminated frame of at most `limit` bytes into `frame`. Returns `false` at
/// end of stream.
async fn read_frame<R>(reader: &mut R, frame: &mut Vec<u8>, limit: usize) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    frame.clear();
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', frame)
        .await?;
    if read == 0 {
        return Ok(false);
    }
    if read == limit && frame.last() != Some(&b'\n') {
        return Err(TableError::MalformedRequest(format!(
            "frame longer than {} bytes",
            limit
        )));
    }
    Ok(true)
}

fn handle_frame(partition: &LocalPartition, frame: &[u8]) -> Response {
    let result = serde_json::from_slice::<Request>(frame)
        .map_err(TableError::from)
        .and_then(|request| Task::from_request(&request))
        .and_then(|task| partition.run(task));
    Response::from_result(result)
}

async fn handle_connection(partition: Arc<LocalPartition>, stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    debug!("partition {}: connection from {}", partition.id(), peer);
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::new();
    while read_frame(&mut reader, &mut frame, MAX_FRAME_LEN).await? {
        // Tasks block on the partition lock and on calls to peers.
        let request = std::mem::take(&mut frame);
        let worker = partition.clone();
        let response = tokio::task::spawn_blocking(move || handle_frame(&worker, &request))
            .await
            .map_err(|e| TableError::Remote(e.to_string()))?;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    debug!("partition {}: {} disconnected", partition.id(), peer);
    Ok(())
}

/// Accepts connections on `listener` and serves `partition` on each of them. Returns only when
/// accepting fails.
pub async fn serve_on(listener: TcpListener, partition: Arc<LocalPartition>) -> Result<()> {
    info!(
        "partition {} listening on {}",
        partition.id(),
        listener.local_addr()?
    );
    loop {
        let (stream, _) = listener.accept().await?;
        let partition = partition.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(partition, stream).await {
                warn!("connection closed: {}", e);
            }
        });
    }
}

/// Binds `addr` and serves `partition` on a multi-threaded runtime until accepting fails.
pub fn serve(addr: &str, partition: Arc<LocalPartition>) -> Result<()> {
    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        let listener = TcpListener::bind(addr).await?;
        serve_on(listener, partition.clone()).await
    })
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn exchange(&mut self, frame: &[u8]) -> Result<Response> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        let mut reply = Vec::new();
        if !read_frame(&mut self.reader, &mut reply, MAX_FRAME_LEN).await? {
            return Err(TableError::Remote("connection closed".into()));
        }
        Ok(serde_json::from_slice(&reply)?)
    }
}

/// A lazily opened connection to one worker, driven by its own single-threaded runtime so that
/// synchronous callers can use it. Calls are serialized.
pub struct TcpTransport {
    addr: String,
    runtime: Runtime,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        Ok(Self {
            addr: addr.into(),
            runtime: Builder::new_current_thread().enable_all().build()?,
            conn: Mutex::new(None),
        })
    }

    /// Sends `request` and waits for its response. A failed call drops the connection; the
    /// next call reconnects.
    pub fn call(&self, request: &Request) -> Result<Response> {
        let mut frame = serde_json::to_vec(request)?;
        frame.push(b'\n');

        let mut guard = self.conn.lock().map_err(|_| TableError::Poisoned)?;
        let result = self.runtime.block_on(async {
            if guard.is_none() {
                *guard = Some(Connection::open(&self.addr).await?);
            }
            match guard.as_mut() {
                Some(conn) => conn.exchange(&frame).await,
                None => Err(TableError::Remote("not connected".into())),
            }
        });
        if let Err(e) = &result {
            error!("call to {} failed: {}", self.addr, e);
            *guard = None;
        }
        result
    }
}

/// The mailbox of a worker process: slots addressed to this partition are stored locally,
/// others are pushed to the worker that owns the target partition.
pub struct PeerMailbox {
    partition: PartitionId,
    local: Arc<dyn Mailbox>,
    peers: Vec<TcpTransport>,
}

impl PeerMailbox {
    /// `workers[i]` is the address of partition `i`.
    pub fn new(partition: PartitionId, local: Arc<dyn Mailbox>, workers: &[String]) -> Result<Self> {
        Ok(Self {
            partition,
            local,
            peers: workers
                .iter()
                .map(TcpTransport::new)
                .collect::<Result<_>>()?,
        })
    }
}

impl Mailbox for PeerMailbox {
    fn put(&self, key: SlotKey, block: Vec<u8>) -> Result<()> {
        if key.target == self.partition {
            return self.local.put(key, block);
        }
        let peer = self.peers.get(key.target).ok_or_else(|| {
            TableError::InvalidConfig(format!("no worker for partition {}", key.target))
        })?;
        peer.call(&Task::PutSlot { key, block }.to_request())?
            .into_result()
            .map(|_| ())
    }

    fn take(&self, key: &SlotKey) -> Result<Vec<u8>> {
        self.local.take(key)
    }

    fn clear_table(&self, table: TableId) -> Result<()> {
        self.local.clear_table(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::SlotCipher,
        exchange::Exchange,
        mailbox::{MemoryMailbox, SlotKind},
        metrics::Metrics,
        partition::RemotePartition,
        task::Reply,
        tuple::Tuple,
        worker::Worker,
    };
    use std::thread;

    fn spawn_worker(listener: std::net::TcpListener, id: PartitionId, workers: &[String]) {
        let mailbox = PeerMailbox::new(id, Arc::new(MemoryMailbox::new()), workers).unwrap();
        let io = Exchange::new(
            Arc::new(mailbox),
            Arc::new(SlotCipher::demo().unwrap()),
            Arc::new(Metrics::new()),
        );
        let worker = Worker::with_seed(id, workers.len(), io, id as u64).unwrap();
        let partition = Arc::new(LocalPartition::new(worker));
        listener.set_nonblocking(true).unwrap();
        thread::spawn(move || {
            let runtime = Builder::new_multi_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let listener = TcpListener::from_std(listener).unwrap();
                serve_on(listener, partition.clone()).await
            })
        });
    }

    fn cluster(p: usize) -> Vec<RemotePartition> {
        let listeners: Vec<std::net::TcpListener> = (0..p)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let workers: Vec<String> = listeners
            .iter()
            .map(|l| l.local_addr().unwrap().to_string())
            .collect();
        for (id, listener) in listeners.into_iter().enumerate() {
            spawn_worker(listener, id, &workers);
        }
        workers
            .iter()
            .enumerate()
            .map(|(id, addr)| RemotePartition::new(id, addr.clone()).unwrap())
            .collect()
    }

    #[test]
    fn remote_tasks_round_trip() {
        let partitions = cluster(1);
        let remote = &partitions[0];
        remote
            .run(Task::Create {
                table: 1,
                num_columns: 2,
                rows: vec![Tuple::new(vec![1, 2]), Tuple::dummy(2)],
            })
            .unwrap();
        assert_eq!(remote.run(Task::NumRows { table: 1 }).unwrap(), Reply::Int(1));
        let rows = remote.run(Task::Rows { table: 1 }).unwrap().into_rows().unwrap();
        assert_eq!(rows[0].data, vec![1, 2]);
        assert!(rows[1].is_dummy());

        assert!(matches!(
            remote.run(Task::Size { table: 2 }),
            Err(TableError::Remote(_))
        ));
    }

    #[test]
    fn shuffles_cross_processes() {
        let partitions = cluster(2);
        for (id, remote) in partitions.iter().enumerate() {
            let rows = (0..4).map(|i| Tuple::new(vec![i, id as i32])).collect();
            remote
                .run(Task::Create {
                    table: 3,
                    num_columns: 2,
                    rows,
                })
                .unwrap();
        }
        for remote in &partitions {
            remote.run(Task::ShuffleByCol { table: 3, col: 1, bound: 4 }).unwrap();
        }
        for remote in &partitions {
            remote.run(Task::ShuffleMerge { table: 3 }).unwrap();
        }
        for (id, remote) in partitions.iter().enumerate() {
            let rows = remote.run(Task::Rows { table: 3 }).unwrap().into_rows().unwrap();
            let real: Vec<&Tuple> = rows.iter().filter(|t| !t.is_dummy()).collect();
            assert_eq!(real.len(), 4);
            assert!(real.iter().all(|t| t.data[1] == id as i32));
        }
        let key = SlotKey::new(3, 0, 1, SlotKind::Shuffle);
        assert!(PeerMailbox::new(0, Arc::new(MemoryMailbox::new()), &[])
            .unwrap()
            .put(key, vec![])
            .is_err());
    }

    #[test]
    fn frames_are_split_on_newlines() {
        let runtime = Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let mut reader = BufReader::new(&b"{\"a\":1}\n{\"b\":2}"[..]);
            let mut frame = Vec::new();
            assert!(read_frame(&mut reader, &mut frame, 64).await.unwrap());
            assert_eq!(frame, b"{\"a\":1}\n");
            assert!(read_frame(&mut reader, &mut frame, 64).await.unwrap());
            assert_eq!(frame, b"{\"b\":2}");
            assert!(!read_frame(&mut reader, &mut frame, 64).await.unwrap());
        });
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let runtime = Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let long = [b'x'; 100];
            let mut reader = BufReader::new(&long[..]);
            let mut frame = Vec::new();
            assert!(matches!(
                read_frame(&mut reader, &mut frame, 64).await,
                Err(TableError::MalformedRequest(_))
            ));

            let mut exact = BufReader::new(&b"0123456\n"[..]);
            assert!(read_frame(&mut exact, &mut frame, 8).await.unwrap());
        });
    }

    #[test]
    fn malformed_frames_get_an_error_response() {
        let worker = Worker::with_seed(0, 1, crate::test_utils::exchange(), 0).unwrap();
        let local = LocalPartition::new(worker);
        let reply = handle_frame(&local, b"not json\n");
        assert!(reply.into_result().is_err());
    }
}
