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

//! The boot record: a fixed-size header at offset 0 describing volume
//! geometry and the byte offsets of the three regions that follow it.

use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

/// Maximum number of fragments a single MFT record can carry before the
/// file engine must chain a new record (spec: `mft_max_fragments`).
pub const MFT_MAX_FRAGMENTS: u32 = 32;

/// 8 usable signature characters plus a NUL terminator.
pub const SIGNATURE_LEN: usize = 9;
/// 250 usable volume-descriptor characters plus a NUL terminator.
pub const VOLUME_DESCRIPTOR_LEN: usize = 251;

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct RawBootRecord {
    pub signature: [u8; SIGNATURE_LEN],
    pub volume_descriptor: [u8; VOLUME_DESCRIPTOR_LEN],
    pub disk_size: U32,
    pub cluster_size: U32,
    pub cluster_count: U32,
    pub mft_count: U32,
    pub mft_start: U64,
    pub bitmap_start: U64,
    pub data_start: U64,
    pub mft_max_fragments: U32,
}

/// Computed, validated volume geometry. Kept separate from [`RawBootRecord`]
/// so the rest of the engine works with plain `u32`/`u64` rather than
/// re-deriving little-endian accessors at every call site — offsets are
/// computed once at construction rather than re-derived on each access.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub disk_size: u32,
    pub cluster_size: u32,
    pub cluster_count: u32,
    pub mft_count: u32,
    pub mft_record_size: u32,
    pub mft_start: u64,
    pub bitmap_start: u64,
    pub data_start: u64,
}

impl Geometry {
    /// `mft_count = floor(disk_size * 0.1 / sizeof(mft_record))`, then
    /// `cluster_count` is sized to fit whatever remains, accounting for the
    /// 1-bit-per-cluster bitmap overhead.
    pub(crate) fn compute(disk_size: u32, cluster_size: u32, mft_record_size: u32) -> Option<Self> {
        if cluster_size == 0 || mft_record_size == 0 {
            return None;
        }

        let boot_record_size = core::mem::size_of::<RawBootRecord>() as u32;
        let mft_count = ((disk_size as f64 * 0.1) / mft_record_size as f64).floor() as u32;
        let mft_region_size = mft_count.checked_mul(mft_record_size)?;

        let used_so_far = boot_record_size.checked_add(mft_region_size)?;
        let remaining = disk_size.checked_sub(used_so_far)?;

        // cluster_count * cluster_size + ceil(cluster_count / 8) <= remaining
        let mut cluster_count =
            ((remaining as u64 * 8) / (8 * cluster_size as u64 + 1)) as u32;
        while cluster_count > 0
            && cluster_count as u64 * cluster_size as u64 + div_ceil(cluster_count, 8) as u64
                > remaining as u64
        {
            cluster_count -= 1;
        }

        let bitmap_size = div_ceil(cluster_count, 8);
        let mft_start = boot_record_size as u64;
        let bitmap_start = mft_start + mft_region_size as u64;
        let data_start = bitmap_start + bitmap_size as u64;

        Some(Self {
            disk_size,
            cluster_size,
            cluster_count,
            mft_count,
            mft_record_size,
            mft_start,
            bitmap_start,
            data_start,
        })
    }

    pub(crate) fn bitmap_len(&self) -> u32 {
        div_ceil(self.cluster_count, 8)
    }
}

fn div_ceil(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_fits_within_disk() {
        // A plausible MFT record size; the real value is computed from
        // `RawMftRecord` in `mft.rs` and exercised end-to-end in
        // `Volume::new`'s own tests.
        let geo = Geometry::compute(10_000, 100, 160).unwrap();
        let boot_record_size = core::mem::size_of::<RawBootRecord>() as u64;
        let total = boot_record_size
            + (geo.mft_count as u64 * geo.mft_record_size as u64)
            + geo.bitmap_len() as u64
            + (geo.cluster_count as u64 * geo.cluster_size as u64);
        assert!(total <= geo.disk_size as u64);
        assert_eq!(geo.data_start, geo.bitmap_start + geo.bitmap_len() as u64);
    }
}
