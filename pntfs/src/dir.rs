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

//! The directory engine: a directory's content is a sequence of child UIDs
//! packed as little-endian 32-bit slots across its cluster chain.

use pntfs_ds::Storage;

use crate::mft::{RawFragment, RawMftRecord, Record, UID_FREE};
use crate::{boot::MFT_MAX_FRAGMENTS, Error, FsError, Result, Volume};

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl<S: Storage> Volume<S> {
    /// Allocate a UID and one cluster, write an empty directory record, and
    /// register it in `parent_slot`.
    pub fn make_directory(&mut self, parent_slot: usize, name: &str) -> Result<usize> {
        let parent = self.read_mft_record(parent_slot)?;
        if parent.is_free() || parent.is_directory == 0 {
            return Err(Error::NotFound);
        }

        let start = self.reserve_clusters(1)?;
        let uid = self.next_uid();
        let mut record = RawMftRecord::FREE;
        record.uid = uid.into();
        record.is_directory = 1;
        record.order = 1;
        record.order_total = 1;
        record.name = crate::mft::encode_name(name);
        record.size = 0u32.into();
        record.fragments[0] = RawFragment {
            cluster_start: start.into(),
            cluster_count: 1u32.into(),
        };

        let slot = match self.alloc_mft_record(&record) {
            Ok(slot) => slot,
            Err(err) => {
                self.free_extent(start, 1)?;
                return Err(err);
            }
        };

        if let Err(err) = self.save_uid(parent_slot, uid) {
            self.free_mft_slot(slot)?;
            self.free_extent(start, 1)?;
            return Err(err);
        }

        Ok(slot)
    }

    /// Only permitted when the directory is empty (`size == 0`). Does not
    /// recurse.
    pub fn remove_directory(&mut self, slot: usize, parent_slot: usize) -> Result<()> {
        let record = self.read_mft_record(slot)?;
        if record.is_free() || record.is_directory == 0 {
            return Err(Error::NotFound);
        }
        if record.size.get() != 0 {
            return Err(Error::NotEmpty);
        }

        self.remove_uid_from_dir(parent_slot, record.uid.get())?;

        // Free the directory's own cluster(s) as well as the MFT slot: the
        // original leaves this cluster allocated (a leak this engine does
        // not reproduce).
        for fragment in record.fragments.iter() {
            if !fragment.is_empty() {
                self.free_extent(fragment.cluster_start.get(), fragment.cluster_count.get())?;
            }
        }
        self.free_mft_slot(slot)
    }

    /// Write `uid` into the first free 32-bit slot across `dir_slot`'s
    /// fragments, growing the directory by one cluster if every existing
    /// fragment is full.
    pub(crate) fn save_uid(&mut self, dir_slot: usize, uid: u32) -> Result<()> {
        let mut record = self.read_mft_record(dir_slot)?;
        if record.is_free() {
            return Err(Error::Fs(FsError::Inconsistent));
        }

        let cluster_size = self.geometry().cluster_size as usize;
        let slots_per_cluster = cluster_size / 4;

        for i in 0..MFT_MAX_FRAGMENTS as usize {
            let fragment = record.fragments[i];
            if fragment.is_empty() {
                let start = self.reserve_clusters(1)?;
                let mut buf = vec![0u8; cluster_size];
                write_u32_le(&mut buf, 0, uid);
                self.write_cluster(start, &buf)?;
                record.fragments[i] = RawFragment {
                    cluster_start: start.into(),
                    cluster_count: 1u32.into(),
                };
                record.size = (record.size.get() + 4).into();
                self.write_mft_record(dir_slot, &record)?;
                return Ok(());
            }

            let cluster_count = fragment.cluster_count.get();
            for c in 0..cluster_count {
                let cluster = fragment.cluster_start.get() + c;
                let mut buf = vec![0u8; cluster_size];
                self.read_cluster(cluster, &mut buf)?;
                for s in 0..slots_per_cluster {
                    if read_u32_le(&buf, s * 4) == UID_FREE {
                        write_u32_le(&mut buf, s * 4, uid);
                        self.write_cluster(cluster, &buf)?;
                        record.size = (record.size.get() + 4).into();
                        self.write_mft_record(dir_slot, &record)?;
                        return Ok(());
                    }
                }
            }
        }

        Err(Error::NoSpace)
    }

    /// Clear the first occurrence of `uid` across `dir_slot`'s fragments.
    /// A well-formed volume never has more than one occurrence (I3).
    pub(crate) fn remove_uid_from_dir(&mut self, dir_slot: usize, uid: u32) -> Result<()> {
        let mut record = self.read_mft_record(dir_slot)?;
        let cluster_size = self.geometry().cluster_size as usize;
        let slots_per_cluster = cluster_size / 4;

        for fragment in record.fragments {
            if fragment.is_empty() {
                continue;
            }
            let cluster_count = fragment.cluster_count.get();
            for c in 0..cluster_count {
                let cluster = fragment.cluster_start.get() + c;
                let mut buf = vec![0u8; cluster_size];
                self.read_cluster(cluster, &mut buf)?;
                for s in 0..slots_per_cluster {
                    if read_u32_le(&buf, s * 4) == uid {
                        write_u32_le(&mut buf, s * 4, UID_FREE);
                        self.write_cluster(cluster, &buf)?;
                        record.size = (record.size.get() - 4).into();
                        self.write_mft_record(dir_slot, &record)?;
                        return Ok(());
                    }
                }
            }
        }

        Err(Error::NotFound)
    }

    /// All child records, in encounter order across the directory's
    /// fragments.
    pub fn list_directory(&self, dir_slot: usize) -> Result<Vec<Record>> {
        let record = self.read_mft_record(dir_slot)?;
        if record.is_free() || record.is_directory == 0 {
            return Err(Error::NotFound);
        }

        let mut out = Vec::new();
        for uid in self.dir_uids(&record)? {
            let slot = self.find_mft_slot_by_uid(uid)?;
            out.push(self.get_record(slot)?);
        }
        Ok(out)
    }

    /// Resolve `(name, is_directory)` to a child slot within `dir_slot`.
    pub fn contains(&self, dir_slot: usize, name: &str, is_directory: bool) -> Result<usize> {
        let record = self.read_mft_record(dir_slot)?;
        if record.is_free() || record.is_directory == 0 {
            return Err(Error::NotFound);
        }

        for uid in self.dir_uids(&record)? {
            let slot = self.find_mft_slot_by_uid(uid)?;
            let child = self.read_mft_record(slot)?;
            let child_is_dir = child.is_directory != 0;
            if child_is_dir == is_directory && crate::mft::Record::from_raw(slot, &child).name == name {
                return Ok(slot);
            }
        }
        Err(Error::NotFound)
    }

    pub(crate) fn dir_uids(&self, record: &RawMftRecord) -> Result<Vec<u32>> {
        let cluster_size = self.geometry().cluster_size as usize;
        let slots_per_cluster = cluster_size / 4;
        let mut out = Vec::new();

        for fragment in record.fragments.iter() {
            if fragment.is_empty() {
                continue;
            }
            let cluster_count = fragment.cluster_count.get();
            for c in 0..cluster_count {
                let cluster = fragment.cluster_start.get() + c;
                let mut buf = vec![0u8; cluster_size];
                self.read_cluster(cluster, &mut buf)?;
                for s in 0..slots_per_cluster {
                    let uid = read_u32_le(&buf, s * 4);
                    if uid != UID_FREE {
                        out.push(uid);
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::new_volume;
    use crate::ROOT_SLOT;

    #[test]
    fn make_directory_registers_in_parent() {
        let mut volume = new_volume(10_000, 100);
        let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
        let root = volume.get_record(ROOT_SLOT).unwrap();
        assert_eq!(root.size, 4);
        let children = volume.list_directory(ROOT_SLOT).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].slot, a);
        assert_eq!(children[0].name, "a");
    }

    #[test]
    fn remove_empty_directory_succeeds() {
        let mut volume = new_volume(10_000, 100);
        let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
        volume.remove_directory(a, ROOT_SLOT).unwrap();
        assert_eq!(volume.list_directory(ROOT_SLOT).unwrap().len(), 0);
    }

    #[test]
    fn contains_finds_directory_by_name_and_kind() {
        let mut volume = new_volume(10_000, 100);
        let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
        assert_eq!(volume.contains(ROOT_SLOT, "a", true).unwrap(), a);
        assert!(volume.contains(ROOT_SLOT, "a", false).is_err());
        assert!(volume.contains(ROOT_SLOT, "missing", true).is_err());
    }
}
