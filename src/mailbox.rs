// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Named slots through which partitions hand sealed fragments to each other.
//!
//! A slot is written once by its source partition and taken once by its target partition. The
//! key is the contract; the storage behind it is pluggable.

use crate::{PartitionId, Result, TableError, TableId};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

/// The protocol step a slot belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// One bucket of a shuffle or partitioning step.
    Shuffle,
    /// Sample sort pivots broadcast by partition 0.
    Pivots,
    /// A boundary row sent to partition 0.
    Boundary,
    /// A carry row sent back by partition 0.
    Correction,
}

impl SlotKind {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Shuffle => "shuffle",
            Self::Pivots => "pivots",
            Self::Boundary => "boundary",
            Self::Correction => "correction",
        }
    }
}

/// Addresses one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub table: TableId,
    pub source: PartitionId,
    pub target: PartitionId,
    pub kind: SlotKind,
}

impl SlotKey {
    pub fn new(table: TableId, source: PartitionId, target: PartitionId, kind: SlotKind) -> Self {
        Self {
            table,
            source,
            target,
            kind,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gid{}_lid{}_tlid{}_{}",
            self.table,
            self.source,
            self.target,
            self.kind.suffix()
        )
    }
}

/// Storage for sealed fragments.
pub trait Mailbox: Send + Sync {
    /// Stores `block` under `key`. Writing an occupied slot is a sequencing error.
    fn put(&self, key: SlotKey, block: Vec<u8>) -> Result<()>;
    /// Removes and returns the block stored under `key`.
    fn take(&self, key: &SlotKey) -> Result<Vec<u8>>;
    /// Discards every slot of `table`.
    fn clear_table(&self, table: TableId) -> Result<()>;
}

/// Slots kept in a map, shared by all partitions of one process.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    slots: Mutex<HashMap<SlotKey, Vec<u8>>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of slots written but not yet taken.
    pub fn pending(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Mailbox for MemoryMailbox {
    fn put(&self, key: SlotKey, block: Vec<u8>) -> Result<()> {
        let mut slots = self.slots.lock().map_err(|_| TableError::Poisoned)?;
        if slots.contains_key(&key) {
            return Err(TableError::Shape(format!("slot {} written twice", key)));
        }
        slots.insert(key, block);
        Ok(())
    }

    fn take(&self, key: &SlotKey) -> Result<Vec<u8>> {
        self.slots
            .lock()
            .map_err(|_| TableError::Poisoned)?
            .remove(key)
            .ok_or_else(|| TableError::MissingSlot(key.to_string()))
    }

    fn clear_table(&self, table: TableId) -> Result<()> {
        self.slots
            .lock()
            .map_err(|_| TableError::Poisoned)?
            .retain(|key, _| key.table != table);
        Ok(())
    }
}

/// One file per slot in a spill directory.
#[derive(Debug)]
pub struct FileMailbox {
    dir: PathBuf,
}

impl FileMailbox {
    /// Uses `dir` as the spill directory, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &SlotKey) -> PathBuf {
        self.dir.join(key.to_string())
    }
}

impl Mailbox for FileMailbox {
    fn put(&self, key: SlotKey, block: Vec<u8>) -> Result<()> {
        let path = self.path(&key);
        if path.exists() {
            return Err(TableError::Shape(format!("slot {} written twice", key)));
        }
        fs::write(path, block)?;
        Ok(())
    }

    fn take(&self, key: &SlotKey) -> Result<Vec<u8>> {
        let path = self.path(key);
        let block = match fs::read(&path) {
            Ok(block) => block,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TableError::MissingSlot(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(path)?;
        Ok(block)
    }

    fn clear_table(&self, table: TableId) -> Result<()> {
        let prefix = format!("gid{}_", table);
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(table: TableId, source: PartitionId, target: PartitionId) -> SlotKey {
        SlotKey::new(table, source, target, SlotKind::Shuffle)
    }

    fn exercise(mailbox: &dyn Mailbox) {
        mailbox.put(key(1, 0, 1), vec![1, 2, 3]).unwrap();
        mailbox.put(key(1, 1, 0), vec![]).unwrap();
        mailbox.put(key(12, 0, 1), vec![9]).unwrap();
        assert!(mailbox.put(key(1, 0, 1), vec![4]).is_err());

        assert_eq!(mailbox.take(&key(1, 0, 1)).unwrap(), vec![1, 2, 3]);
        assert_eq!(mailbox.take(&key(1, 1, 0)).unwrap(), Vec::<u8>::new());
        assert!(matches!(
            mailbox.take(&key(1, 0, 1)),
            Err(TableError::MissingSlot(_))
        ));

        mailbox.put(key(1, 0, 0), vec![5]).unwrap();
        mailbox.clear_table(1).unwrap();
        assert!(mailbox.take(&key(1, 0, 0)).is_err());
        assert_eq!(mailbox.take(&key(12, 0, 1)).unwrap(), vec![9]);
    }

    #[test]
    fn memory_mailbox_slots() {
        let mailbox = MemoryMailbox::new();
        exercise(&mailbox);
        assert_eq!(mailbox.pending(), 0);
    }

    #[test]
    fn file_mailbox_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = FileMailbox::new(dir.path().join("shuffle_buffer")).unwrap();
        exercise(&mailbox);
    }

    #[test]
    fn slot_names_are_distinct_per_kind() {
        let a = SlotKey::new(3, 1, 2, SlotKind::Boundary);
        let b = SlotKey::new(3, 1, 2, SlotKind::Correction);
        assert_eq!(a.to_string(), "gid3_lid1_tlid2_boundary");
        assert_ne!(a.to_string(), b.to_string());
    }
}
