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

//! A pseudo-NTFS volume engine.
//!
//! [`Volume`] owns a single contiguous byte region (via a generic
//! [`Storage`] backend) laid out as four regions in order: boot record,
//! MFT array, allocation bitmap, data clusters. It exposes file and
//! directory operations plus two maintenance operations — a parallel
//! consistency checker and an in-place defragmenter.
//!
//! Host filesystem I/O, the interactive shell, and argument parsing are
//! deliberately outside this crate: callers pass file contents as `&[u8]`
//! and are expected to have already done any `std::fs::read`/`write` of
//! their own.

mod alloc;
mod bitmap;
mod boot;
mod check;
mod defrag;
mod dir;
mod file;
mod mft;
mod path;

use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use pntfs_ds::Storage;

pub use check::DEFAULT_WORKERS;
pub use mft::Record;
pub use path::Chain;
pub use pntfs_err::{Error, FsError, Result};

use boot::{Geometry, RawBootRecord, SIGNATURE_LEN, VOLUME_DESCRIPTOR_LEN};
use mft::RawMftRecord;

/// MFT slot of the always-present root directory.
pub const ROOT_SLOT: usize = 0;

const ROOT_NAME: &str = "root";

/// A pseudo-NTFS volume backed by storage `S`.
///
/// Mutating operations (`save_file`, `remove_file`, `make_directory`, ...)
/// take `&mut self`: the core is single-threaded for every mutator, per the
/// concurrency model. [`Volume::check_disk_consistency`] is the one
/// exception — it takes `&self` and fans out to a worker pool, which the
/// borrow checker enforces can never run concurrently with a mutator.
pub struct Volume<S: Storage> {
    storage: S,
    geometry: Geometry,
    free_space: u32,
    free_mft_count: u32,
    uid_counter: u32,
    index_out_of_range: AtomicBool,
}

impl<S: Storage> Volume<S> {
    /// Format `storage` as a fresh pseudo-NTFS volume: lay out the regions,
    /// zero the MFT and bitmap, and create the root directory at
    /// [`ROOT_SLOT`].
    pub fn new(mut storage: S, cluster_size: u32, signature: &str) -> Result<Self> {
        let disk_size = storage.len() as u32;
        let mft_record_size = core::mem::size_of::<RawMftRecord>() as u32;
        let geometry = Geometry::compute(disk_size, cluster_size, mft_record_size)
            .ok_or(Error::Fs(FsError::Inconsistent))?;

        info!(
            "formatting volume: disk_size={disk_size} cluster_size={cluster_size} \
             cluster_count={} mft_count={}",
            geometry.cluster_count, geometry.mft_count
        );

        let boot_record = RawBootRecord {
            signature: encode_fixed::<SIGNATURE_LEN>(signature),
            volume_descriptor: encode_fixed::<VOLUME_DESCRIPTOR_LEN>(""),
            disk_size: disk_size.into(),
            cluster_size: cluster_size.into(),
            cluster_count: geometry.cluster_count.into(),
            mft_count: geometry.mft_count.into(),
            mft_start: geometry.mft_start.into(),
            bitmap_start: geometry.bitmap_start.into(),
            data_start: geometry.data_start.into(),
            mft_max_fragments: boot::MFT_MAX_FRAGMENTS.into(),
        };
        storage.write(0, zerocopy::IntoBytes::as_bytes(&boot_record))?;

        let zero_mft = vec![0u8; (geometry.mft_count * geometry.mft_record_size) as usize];
        storage.write(geometry.mft_start, &zero_mft)?;
        let zero_bitmap = vec![0u8; geometry.bitmap_len() as usize];
        storage.write(geometry.bitmap_start, &zero_bitmap)?;

        let mut volume = Self {
            storage,
            geometry,
            free_space: geometry.cluster_count * geometry.cluster_size,
            free_mft_count: geometry.mft_count,
            uid_counter: 1,
            index_out_of_range: AtomicBool::new(false),
        };

        volume.create_root()?;
        Ok(volume)
    }

    fn create_root(&mut self) -> Result<()> {
        let uid = self.next_uid();
        let start = self.reserve_clusters(1)?;
        let record = RawMftRecord {
            uid: uid.into(),
            is_directory: 1,
            order: 1,
            order_total: 1,
            _reserved: 0,
            name: mft::encode_name(ROOT_NAME),
            size: 0u32.into(),
            fragments: {
                let mut fragments = [mft::RawFragment::EMPTY; boot::MFT_MAX_FRAGMENTS as usize];
                fragments[0] = mft::RawFragment {
                    cluster_start: start.into(),
                    cluster_count: 1u32.into(),
                };
                fragments
            },
        };
        self.write_mft_record(ROOT_SLOT, &record)?;
        self.free_mft_count -= 1;
        Ok(())
    }

    fn next_uid(&mut self) -> u32 {
        let uid = self.uid_counter;
        self.uid_counter += 1;
        uid
    }

    /// Clusters available for allocation, in bytes.
    pub fn free_space(&self) -> u32 {
        self.free_space
    }

    pub fn free_mft_count(&self) -> u32 {
        self.free_mft_count
    }

    pub fn cluster_size(&self) -> u32 {
        self.geometry.cluster_size
    }

    pub fn cluster_count(&self) -> u32 {
        self.geometry.cluster_count
    }

    pub fn mft_count(&self) -> u32 {
        self.geometry.mft_count
    }

    /// Poll and clear the sticky out-of-range flag (spec §6: "consumer may
    /// clear and check after a batch").
    pub fn clear_error_state(&self) {
        self.index_out_of_range.store(false, Ordering::Relaxed);
    }

    pub fn error_state(&self) -> bool {
        self.index_out_of_range.load(Ordering::Relaxed)
    }

    fn flag_index_out_of_range(&self) {
        self.index_out_of_range.store(true, Ordering::Relaxed);
    }

    /// Fetch a single MFT record by slot as an owned [`Record`].
    pub fn get_record(&self, slot: usize) -> Result<Record> {
        let raw = self.read_mft_record(slot)?;
        Ok(Record::from_raw(slot, &raw))
    }

    pub(crate) fn read_mft_record(&self, slot: usize) -> Result<RawMftRecord> {
        if slot >= self.geometry.mft_count as usize {
            self.flag_index_out_of_range();
            return Err(Error::Fs(FsError::Index));
        }
        let offset = self.geometry.mft_start + slot as u64 * self.geometry.mft_record_size as u64;
        let mut raw = RawMftRecord::FREE;
        self.storage.read(offset, zerocopy::IntoBytes::as_mut_bytes(&mut raw))?;
        Ok(raw)
    }

    pub(crate) fn write_mft_record(&mut self, slot: usize, record: &RawMftRecord) -> Result<()> {
        if slot >= self.geometry.mft_count as usize {
            self.flag_index_out_of_range();
            return Err(Error::Fs(FsError::Index));
        }
        let offset = self.geometry.mft_start + slot as u64 * self.geometry.mft_record_size as u64;
        self.storage.write(offset, zerocopy::IntoBytes::as_bytes(record))?;
        Ok(())
    }

    pub(crate) fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub(crate) fn storage_write(&mut self, offset: u64, buffer: &[u8]) -> Result<()> {
        self.storage.write(offset, buffer)
    }

    /// Used by the defragmenter, which recomputes `free_space` from the
    /// final compacted layout rather than accumulating per-extent deltas.
    pub(crate) fn set_free_space(&mut self, value: u32) {
        self.free_space = value;
    }
}

fn encode_fixed<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pntfs_ds_mem::MemoryStorage;

    pub(crate) fn new_volume(disk_size: u32, cluster_size: u32) -> Volume<MemoryStorage> {
        let _ = env_logger::try_init();
        let storage = MemoryStorage::new(disk_size as u64);
        Volume::new(storage, cluster_size, "PNTFS").unwrap()
    }

    #[test]
    fn formats_and_creates_root() {
        let volume = new_volume(10_000, 100);
        let root = volume.get_record(ROOT_SLOT).unwrap();
        assert_eq!(root.name, "root");
        assert!(root.is_directory);
        assert_eq!(root.size, 0);
        assert_eq!(volume.free_mft_count(), volume.mft_count() - 1);
    }
}
