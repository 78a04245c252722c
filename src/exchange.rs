// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Encrypt-before-write and decrypt-after-read of row fragments.

use crate::{
    crypto::SlotCipher,
    mailbox::{Mailbox, SlotKey},
    metrics::Metrics,
    tuple::Tuple,
    Result, TableId,
};
use log::debug;
use std::sync::Arc;

/// The cross-partition I/O handle of a partition.
#[derive(Clone)]
pub struct Exchange {
    mailbox: Arc<dyn Mailbox>,
    cipher: Arc<SlotCipher>,
    metrics: Arc<Metrics>,
}

impl Exchange {
    pub fn new(mailbox: Arc<dyn Mailbox>, cipher: Arc<SlotCipher>, metrics: Arc<Metrics>) -> Self {
        Self {
            mailbox,
            cipher,
            metrics,
        }
    }

    /// Seals `rows` into the slot `key`.
    pub fn send(&self, key: SlotKey, rows: &[Tuple]) -> Result<()> {
        let plain = Tuple::encode_rows(rows);
        let block = self.cipher.seal(&plain)?;
        debug!("{}: {} rows, {} bytes", key, rows.len(), block.len());
        self.metrics
            .record_comm(key.table, rows.len() as u64, block.len() as u64);
        self.mailbox.put(key, block)
    }

    /// Takes the slot `key` and decodes its rows of `width` columns.
    pub fn receive(&self, key: &SlotKey, width: usize) -> Result<Vec<Tuple>> {
        let block = self.mailbox.take(key)?;
        let plain = self.cipher.open(&block)?;
        Tuple::decode_rows(&plain, width)
    }

    /// Stores a block that was sealed by another process.
    pub fn deliver(&self, key: SlotKey, block: Vec<u8>) -> Result<()> {
        self.mailbox.put(key, block)
    }

    pub fn clear_table(&self, table: TableId) -> Result<()> {
        self.mailbox.clear_table(table)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mailbox::{MemoryMailbox, SlotKind},
        TableError,
    };

    fn exchange() -> (Exchange, Arc<MemoryMailbox>) {
        let mailbox = Arc::new(MemoryMailbox::new());
        let exchange = Exchange::new(
            mailbox.clone(),
            Arc::new(SlotCipher::demo().unwrap()),
            Arc::new(Metrics::new()),
        );
        (exchange, mailbox)
    }

    #[test]
    fn rows_cross_the_exchange() {
        let (exchange, _) = exchange();
        let mut rows = vec![Tuple::new(vec![1, 2]), Tuple::dummy(2), Tuple::new(vec![-3, 4])];
        rows[1].data = vec![7, 7];
        let key = SlotKey::new(5, 0, 1, SlotKind::Shuffle);
        exchange.send(key, &rows).unwrap();
        assert_eq!(exchange.receive(&key, 2).unwrap(), rows);

        let comm = exchange.metrics().snapshot().comm[&5];
        assert_eq!(comm.rows, 3);
        assert_eq!(comm.bytes, 44 + 3 * 12);
    }

    #[test]
    fn empty_fragments_are_delivered() {
        let (exchange, _) = exchange();
        let key = SlotKey::new(5, 1, 0, SlotKind::Boundary);
        exchange.send(key, &[]).unwrap();
        assert!(exchange.receive(&key, 3).unwrap().is_empty());
    }

    #[test]
    fn tampered_slots_are_fatal() {
        let (exchange, mailbox) = exchange();
        let key = SlotKey::new(5, 0, 0, SlotKind::Shuffle);
        exchange.send(key, &[Tuple::new(vec![1])]).unwrap();
        let mut block = mailbox.take(&key).unwrap();
        let last = block.len() - 1;
        block[last] ^= 0x01;
        mailbox.put(key, block).unwrap();
        assert!(matches!(
            exchange.receive(&key, 1),
            Err(TableError::Crypto(_))
        ));
    }
}
