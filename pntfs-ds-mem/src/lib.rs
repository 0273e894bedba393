// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory [`Storage`] backend: the volume's byte region lives in a single
//! owned buffer for the lifetime of the process. No durability to backing
//! media and no crash recovery, the same way a block-device backend wraps a
//! single file handle rather than a pool of handles.

use log::error;
use pntfs_ds::{Result, Storage};
use pntfs_err::{Error, FsError};

pub struct MemoryStorage {
    bytes: Vec<u8>,
}

impl MemoryStorage {
    /// Allocate a zeroed region of exactly `len` bytes.
    pub fn new(len: u64) -> Self {
        Self {
            bytes: vec![0u8; len as usize],
        }
    }
}

impl Storage for MemoryStorage {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buffer.len();
        if end > self.bytes.len() {
            error!("read [{start}, {end}) is out of bounds ({} total)", self.bytes.len());
            return Err(Error::Fs(FsError::Index));
        }
        buffer.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + buffer.len();
        if end > self.bytes.len() {
            error!("write [{start}, {end}) is out of bounds ({} total)", self.bytes.len());
            return Err(Error::Fs(FsError::Index));
        }
        self.bytes[start..end].copy_from_slice(buffer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let mut storage = MemoryStorage::new(16);
        storage.write(4, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        storage.read(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn rejects_out_of_bounds() {
        let storage = MemoryStorage::new(16);
        let mut buf = [0u8; 4];
        assert!(storage.read(14, &mut buf).is_err());
    }
}
