//! Per-machine local storage.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::types::{BlockId, FileId};

/// A block did not fit on the drive.
#[derive(Debug, Error)]
#[error("{used} used + {requested} requested exceeds capacity {capacity}")]
pub struct DriveFull {
    pub used: u64,
    pub requested: u64,
    pub capacity: u64,
}

#[derive(Debug)]
pub struct Drive {
    capacity: u64,
    used: u64,
    blocks_by_file: BTreeMap<FileId, BTreeSet<BlockId>>,
}

impl Drive {
    pub(crate) fn new(capacity: u64) -> Drive {
        Drive {
            capacity,
            used: 0,
            blocks_by_file: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Store one block locally. Fails when the block would not fit.
    pub(crate) fn add_block(
        &mut self,
        file: FileId,
        block: BlockId,
        size: u64,
    ) -> Result<(), DriveFull> {
        if self.used + size > self.capacity {
            return Err(DriveFull {
                used: self.used,
                requested: size,
                capacity: self.capacity,
            });
        }
        self.blocks_by_file.entry(file).or_default().insert(block);
        self.used += size;
        Ok(())
    }

    /// Blocks of `file` hosted on this drive, in ascending block order.
    pub fn blocks_for_file(&self, file: FileId) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks_by_file.get(&file).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_usage_and_rejects_overflow() {
        let mut drive = Drive::new(100);
        drive.add_block(FileId(0), BlockId(0), 60).unwrap();
        assert_eq!(drive.used(), 60);
        let err = drive.add_block(FileId(0), BlockId(1), 60).unwrap_err();
        assert_eq!(err.used, 60);
        assert_eq!(err.capacity, 100);
        // failed placement leaves the drive untouched
        assert_eq!(drive.used(), 60);
        assert_eq!(drive.blocks_for_file(FileId(0)).count(), 1);
    }

    #[test]
    fn lists_blocks_per_file_in_order() {
        let mut drive = Drive::new(1000);
        drive.add_block(FileId(1), BlockId(2), 10).unwrap();
        drive.add_block(FileId(1), BlockId(0), 10).unwrap();
        drive.add_block(FileId(0), BlockId(1), 10).unwrap();
        let blocks: Vec<BlockId> = drive.blocks_for_file(FileId(1)).collect();
        assert_eq!(blocks, vec![BlockId(0), BlockId(2)]);
        assert_eq!(drive.blocks_for_file(FileId(9)).count(), 0);
    }
}
