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

//! The MFT record model: a bounded per-record extent list (32 fragments)
//! with multi-record chaining for files whose extent count exceeds that
//! bound.

use zerocopy::{little_endian::U32, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::boot::MFT_MAX_FRAGMENTS;

/// 11-byte 8.3-style name plus a NUL terminator.
pub const NAME_LEN: usize = 12;

pub(crate) const UID_FREE: u32 = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct RawFragment {
    pub cluster_start: U32,
    /// `0` marks an unused fragment slot.
    pub cluster_count: U32,
}

impl RawFragment {
    pub(crate) const EMPTY: Self = Self {
        cluster_start: U32::ZERO,
        cluster_count: U32::ZERO,
    };

    pub(crate) fn is_empty(&self) -> bool {
        self.cluster_count.get() == 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct RawMftRecord {
    /// `0` means the slot is free.
    pub uid: U32,
    pub is_directory: u8,
    /// 1-based position within a chain of records sharing `uid`.
    pub order: u8,
    /// Total number of records in the chain.
    pub order_total: u8,
    _reserved: u8,
    pub name: [u8; NAME_LEN],
    pub size: U32,
    pub fragments: [RawFragment; MFT_MAX_FRAGMENTS as usize],
}

impl RawMftRecord {
    pub(crate) const FREE: Self = Self {
        uid: U32::ZERO,
        is_directory: 0,
        order: 0,
        order_total: 0,
        _reserved: 0,
        name: [0; NAME_LEN],
        size: U32::ZERO,
        fragments: [RawFragment::EMPTY; MFT_MAX_FRAGMENTS as usize],
    };

    pub(crate) fn is_free(&self) -> bool {
        self.uid.get() == UID_FREE
    }
}

/// An owned, de-serialized view of one MFT record — the type the public API
/// hands back from `get_record`/`list_directory` rather than the raw
/// little-endian wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub slot: usize,
    pub uid: u32,
    pub is_directory: bool,
    pub order: u8,
    pub order_total: u8,
    pub name: String,
    pub size: u32,
}

impl Record {
    pub(crate) fn from_raw(slot: usize, raw: &RawMftRecord) -> Self {
        let name_bytes = &raw.name;
        let nul = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..nul]).into_owned();
        Self {
            slot,
            uid: raw.uid.get(),
            is_directory: raw.is_directory != 0,
            order: raw.order,
            order_total: raw.order_total,
            name,
            size: raw.size.get(),
        }
    }
}

/// Encode an 8.3-style name into the fixed-size on-disk field. Truncates to
/// 11 bytes; the spec's Non-goals exclude long filenames so callers are
/// expected to pass names that already fit.
pub(crate) fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut out = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

pub(crate) fn needed_mft_records(fragment_count: usize) -> usize {
    fragment_count.div_ceil(MFT_MAX_FRAGMENTS as usize).max(1)
}

impl<S: pntfs_ds::Storage> crate::Volume<S> {
    /// Linear scan for the first slot with `uid == 0` (spec §4.2).
    pub(crate) fn find_free_mft_slot(&self) -> Option<usize> {
        for slot in 0..self.geometry().mft_count as usize {
            if let Ok(raw) = self.read_mft_record(slot) {
                if raw.is_free() {
                    return Some(slot);
                }
            }
        }
        None
    }

    pub(crate) fn alloc_mft_record(&mut self, record: &RawMftRecord) -> crate::Result<usize> {
        let slot = self.find_free_mft_slot().ok_or(crate::Error::NoMft)?;
        self.write_mft_record(slot, record)?;
        self.free_mft_count -= 1;
        Ok(slot)
    }

    pub(crate) fn free_mft_slot(&mut self, slot: usize) -> crate::Result<()> {
        self.write_mft_record(slot, &RawMftRecord::FREE)?;
        self.free_mft_count += 1;
        Ok(())
    }

    /// Linear scan matching `uid` (spec §4.2's `find_by_uid`).
    pub(crate) fn find_mft_slot_by_uid(&self, uid: u32) -> crate::Result<usize> {
        for slot in 0..self.geometry().mft_count as usize {
            let raw = self.read_mft_record(slot)?;
            if raw.uid.get() == uid {
                return Ok(slot);
            }
        }
        Err(crate::Error::NotFound)
    }

    /// All chain links sharing `uid`, ordered by `order` (1-based).
    pub(crate) fn find_chain_by_uid(&self, uid: u32) -> crate::Result<Vec<(usize, RawMftRecord)>> {
        let mut chain = Vec::new();
        for slot in 0..self.geometry().mft_count as usize {
            let raw = self.read_mft_record(slot)?;
            if raw.uid.get() == uid {
                chain.push((slot, raw));
            }
        }
        if chain.is_empty() {
            return Err(crate::Error::NotFound);
        }
        chain.sort_by_key(|(_, r)| r.order);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_truncates_names() {
        assert_eq!(&encode_name("hello")[..5], b"hello");
        assert_eq!(encode_name("hello")[5], 0);
        let long = encode_name("toolongname12345");
        assert_eq!(long.len(), NAME_LEN);
    }

    #[test]
    fn needed_records_matches_chain_bound() {
        assert_eq!(needed_mft_records(0), 1);
        assert_eq!(needed_mft_records(32), 1);
        assert_eq!(needed_mft_records(33), 2);
        assert_eq!(needed_mft_records(64), 2);
        assert_eq!(needed_mft_records(65), 3);
    }
}
