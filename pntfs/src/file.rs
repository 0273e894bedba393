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

//! The file engine: create/load/copy/remove/move file content across a
//! chain of MFT records, each carrying up to 32 extents.

use pntfs_ds::Storage;

use crate::boot::MFT_MAX_FRAGMENTS;
use crate::mft::{encode_name, needed_mft_records, RawFragment, RawMftRecord};
use crate::{Error, Result, Volume};

impl<S: Storage> Volume<S> {
    /// Create a file named `name` under `parent_dir_slot` with content
    /// `bytes`. On any failure partway through, already-reserved extents
    /// are released and no MFT slot or directory UID is left behind (open
    /// question #1, decided: roll back rather than leak).
    pub fn save_file(&mut self, name: &str, parent_dir_slot: usize, bytes: &[u8]) -> Result<usize> {
        if bytes.len() as u64 > self.free_space() as u64 {
            return Err(Error::NoSpace);
        }

        let extents = self.plan_and_reserve_extents(bytes.len() as u32)?;

        let needed = needed_mft_records(extents.len());
        if needed as u32 > self.free_mft_count() {
            self.rollback_extents(&extents)?;
            return Err(Error::NoMft);
        }

        let uid = self.next_uid();
        if let Err(err) = self.save_uid(parent_dir_slot, uid) {
            self.rollback_extents(&extents)?;
            return Err(err);
        }

        let mut offset = 0usize;
        for (start, len) in &extents {
            let chunk = &bytes[offset..offset + *len as usize];
            self.save_continual_segment(chunk, *start)?;
            offset += *len as usize;
        }

        let total_len = bytes.len() as u32;
        let mut first_slot = None;
        // A zero-byte file plans zero extents, so `extents.chunks(..)` would
        // yield no chunks at all. `needed_mft_records(0)` still reports one
        // record is needed (spec §4.4); emit that one record, with every
        // fragment slot empty, instead of relying on the chunk iterator.
        let chunks: Vec<&[(u32, u32)]> = if extents.is_empty() {
            vec![&[][..]]
        } else {
            extents.chunks(MFT_MAX_FRAGMENTS as usize).collect()
        };
        for (order, fragment_chunk) in chunks.into_iter().enumerate() {
            let mut fragments = [RawFragment::EMPTY; MFT_MAX_FRAGMENTS as usize];
            for (i, (start, len)) in fragment_chunk.iter().enumerate() {
                let cluster_count = len.div_ceil(self.cluster_size());
                fragments[i] = RawFragment {
                    cluster_start: (*start).into(),
                    cluster_count: cluster_count.into(),
                };
            }

            let record = RawMftRecord {
                uid: uid.into(),
                is_directory: 0,
                order: (order + 1) as u8,
                order_total: needed as u8,
                _reserved: 0,
                name: encode_name(name),
                size: total_len.into(),
                fragments,
            };
            let slot = self.alloc_mft_record(&record)?;
            first_slot.get_or_insert(slot);
        }

        Ok(first_slot.expect("save_file always has at least one fragment chunk"))
    }

    fn rollback_extents(&mut self, extents: &[(u32, u32)]) -> Result<()> {
        for (start, len) in extents {
            let clusters = len.div_ceil(self.cluster_size());
            self.free_extent(*start, clusters)?;
        }
        Ok(())
    }

    /// Concatenate the clusters referenced by every chain link's fragments,
    /// in MFT-chain order, truncated to the record's logical `size`.
    pub fn load_file(&self, slot: usize) -> Result<Vec<u8>> {
        let record = self.read_mft_record(slot)?;
        if record.is_free() || record.is_directory != 0 {
            return Err(Error::NotFound);
        }

        let size = record.size.get() as usize;
        let mut out = Vec::with_capacity(size);
        let cluster_size = self.cluster_size() as usize;

        for (_, link) in self.find_chain_by_uid(record.uid.get())? {
            for fragment in link.fragments.iter() {
                if fragment.is_empty() || out.len() >= size {
                    continue;
                }
                let start = fragment.cluster_start.get();
                let count = fragment.cluster_count.get();
                for cluster in start..start + count {
                    if out.len() >= size {
                        break;
                    }
                    let mut buf = vec![0u8; cluster_size];
                    self.read_cluster(cluster, &mut buf)?;
                    let take = (size - out.len()).min(cluster_size);
                    out.extend_from_slice(&buf[..take]);
                }
            }
        }

        out.truncate(size);
        Ok(out)
    }

    /// Read `src_slot` and create a fresh copy of it under `dst_dir_slot`,
    /// with a new UID.
    pub fn copy(&mut self, src_slot: usize, dst_dir_slot: usize) -> Result<usize> {
        let record = self.get_record(src_slot)?;
        let bytes = self.load_file(src_slot)?;
        self.save_file(&record.name, dst_dir_slot, &bytes)
    }

    /// Register the UID in `to_dir_slot` before removing it from
    /// `from_dir_slot`: if the destination is full, the source is
    /// untouched (spec.md §6).
    pub fn move_file(&mut self, src_slot: usize, from_dir_slot: usize, to_dir_slot: usize) -> Result<()> {
        let record = self.read_mft_record(src_slot)?;
        if record.is_free() {
            return Err(Error::NotFound);
        }
        self.save_uid(to_dir_slot, record.uid.get())?;
        self.remove_uid_from_dir(from_dir_slot, record.uid.get())?;
        Ok(())
    }

    /// Clear every extent of every chain link, free the chain's MFT slots,
    /// then deregister the UID from `parent_dir_slot`.
    pub fn remove_file(&mut self, slot: usize, parent_dir_slot: usize) -> Result<()> {
        let record = self.read_mft_record(slot)?;
        if record.is_free() || record.is_directory != 0 {
            return Err(Error::NotFound);
        }
        let uid = record.uid.get();

        let chain = self.find_chain_by_uid(uid)?;
        for (chain_slot, link) in &chain {
            for fragment in link.fragments.iter() {
                if !fragment.is_empty() {
                    self.free_extent(fragment.cluster_start.get(), fragment.cluster_count.get())?;
                }
            }
            self.free_mft_slot(*chain_slot)?;
        }

        self.remove_uid_from_dir(parent_dir_slot, uid)
    }
}
