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

//! Per-cluster free/used bit operations. Bit `i` lives in `byte[i/8]` at
//! mask `0x80 >> (i mod 8)` — MSB-first within each byte.

use pntfs_ds::Storage;

use crate::{Result, Volume};

impl<S: Storage> Volume<S> {
    /// Indices outside `[0, cluster_count)` set the sticky out-of-range flag
    /// and return `false`.
    pub(crate) fn bitmap_is_free(&self, index: u32) -> bool {
        match self.bitmap_byte(index) {
            Some((byte, mask)) => byte & mask == 0,
            None => {
                self.flag_index_out_of_range();
                false
            }
        }
    }

    /// Indices outside `[0, cluster_count)` set the sticky out-of-range flag
    /// and are a no-op.
    pub(crate) fn bitmap_set(&mut self, index: u32, used: bool) -> Result<()> {
        let geometry = self.geometry();
        if index >= geometry.cluster_count {
            self.flag_index_out_of_range();
            return Ok(());
        }
        let byte_index = (index / 8) as u64;
        let mask = 0x80u8 >> (index % 8);
        let mut byte = [0u8; 1];
        self.storage.read(geometry.bitmap_start + byte_index, &mut byte)?;
        if used {
            byte[0] |= mask;
        } else {
            byte[0] &= !mask;
        }
        self.storage.write(geometry.bitmap_start + byte_index, &byte)?;
        Ok(())
    }

    pub(crate) fn bitmap_set_range(&mut self, start: u32, count: u32, used: bool) -> Result<()> {
        for i in start..start.saturating_add(count) {
            self.bitmap_set(i, used)?;
        }
        Ok(())
    }

    /// Zero the entire bitmap region in one write. Used by the
    /// defragmenter's metadata-rewrite phase, which recomputes every bit
    /// from the final compacted extent layout rather than clearing bits
    /// one at a time.
    pub(crate) fn bitmap_clear_all(&mut self) -> Result<()> {
        let geometry = self.geometry();
        let zero = vec![0u8; geometry.bitmap_len() as usize];
        self.storage.write(geometry.bitmap_start, &zero)
    }

    fn bitmap_byte(&self, index: u32) -> Option<(u8, u8)> {
        let geometry = self.geometry();
        if index >= geometry.cluster_count {
            return None;
        }
        let byte_index = (index / 8) as u64;
        let mask = 0x80u8 >> (index % 8);
        let mut byte = [0u8; 1];
        self.storage.read(geometry.bitmap_start + byte_index, &mut byte).ok()?;
        Some((byte[0], mask))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn out_of_range_is_free_and_flags_sticky() {
        let volume = crate::tests::new_volume(5_000, 100);
        assert!(!volume.error_state());
        let huge = volume.cluster_count() + 1000;
        assert!(!volume.bitmap_is_free(huge));
        assert!(volume.error_state());
    }

    #[test]
    fn set_and_query_round_trips() {
        let mut volume = crate::tests::new_volume(5_000, 100);
        assert!(volume.bitmap_is_free(10));
        volume.bitmap_set(10, true).unwrap();
        assert!(!volume.bitmap_is_free(10));
        volume.bitmap_set(10, false).unwrap();
        assert!(volume.bitmap_is_free(10));
    }
}
