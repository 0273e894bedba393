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

//! The defragmenter: in-place cyclic-swap compaction that rewrites cluster
//! contents and rebuilds every MFT extent descriptor so each live object
//! occupies a single contiguous extent at the head of the data area.

use pntfs_ds::Storage;

use crate::boot::MFT_MAX_FRAGMENTS;
use crate::mft::RawFragment;
use crate::{Result, Volume};

impl<S: Storage> Volume<S> {
    /// Compact the volume: every live object ends up as one contiguous
    /// extent, in increasing order of first MFT appearance, with no gaps
    /// between them. Assumes I1–I4 hold on entry (spec.md §4.8's failure
    /// model): the caller is expected to have run
    /// [`Volume::check_disk_consistency`] first.
    pub fn defragment_disk(&mut self) -> Result<()> {
        log::debug!("defragment_disk: planning target layout");
        let (index_table, objects) = self.plan_defrag()?;

        log::debug!("defragment_disk: permuting {} clusters in place", index_table.len());
        self.permute_clusters(index_table)?;

        log::debug!("defragment_disk: rewriting MFT extents for {} live objects", objects.len());
        self.rewrite_defragmented_metadata(&objects)?;

        Ok(())
    }

    /// Phase 1: walk live objects (grouped by UID so a multi-record chain
    /// moves as one unit) in order of first MFT appearance, and assign
    /// each one a consecutive range of destination cluster indices
    /// starting at `0`.
    ///
    /// Files move via the generic cluster-swap plan below: a file's
    /// content is a gapless byte stream, so its old fragments, read in
    /// chain order, map one-for-one onto its new contiguous range and the
    /// physical byte swap in phase 2 reproduces it exactly.
    ///
    /// Directories don't get this treatment. A directory's cluster data
    /// has internal holes wherever a child was removed (`remove_uid_from_dir`
    /// clears a slot in place rather than compacting), so its live UIDs
    /// are not necessarily confined to its first `needed` clusters. Its
    /// live UID list is captured here instead, to be freshly repacked
    /// (and, incidentally, compacted) in phase 3; its old fragment
    /// clusters are left out of the swap plan entirely and simply revert
    /// to free space.
    fn plan_defrag(&self) -> Result<(Vec<i64>, Vec<DefragObject>)> {
        let cluster_size = self.cluster_size();
        let cluster_count = self.cluster_count() as usize;
        let mut index_table = vec![-1i64; cluster_count];
        let mut next_target: u32 = 0;
        let mut seen_uids = std::collections::HashSet::new();
        let mut objects = Vec::new();

        for slot in 0..self.mft_count() as usize {
            let record = self.read_mft_record(slot)?;
            if record.is_free() || !seen_uids.insert(record.uid.get()) {
                continue;
            }

            let chain = self.find_chain_by_uid(record.uid.get())?;
            let first_slot = chain[0].0;
            let chain_slots: Vec<usize> = chain.iter().map(|(slot, _)| *slot).collect();

            if record.is_directory != 0 {
                let child_uids = self.dir_uids(&record)?;
                let needed = (child_uids.len() as u32 * 4).div_ceil(cluster_size).max(1);
                next_target += needed;
                objects.push(DefragObject {
                    first_slot,
                    chain_slots,
                    content: ObjectContent::Directory { child_uids },
                });
                continue;
            }

            for (_, link) in &chain {
                for fragment in link.fragments.iter() {
                    if fragment.is_empty() {
                        continue;
                    }
                    let start = fragment.cluster_start.get();
                    let count = fragment.cluster_count.get();
                    for i in 0..count {
                        index_table[(start + i) as usize] = (next_target + i) as i64;
                    }
                    next_target += count;
                }
            }
            objects.push(DefragObject {
                first_slot,
                chain_slots,
                content: ObjectContent::File { size: record.size.get() },
            });
        }

        Ok((index_table, objects))
    }

    /// Phase 2: apply the destination table to the data region in place.
    /// Follows each connected chain of moves exactly once — either a
    /// closed cycle (needs one scratch cluster to break the loop) or an
    /// open chain terminating at a currently-free or not-replanned
    /// cluster (needs none). This is the corrected form of the "apparent
    /// bug" spec.md §9 flags in the source's cycle-leader step, where a
    /// true swap (not a copy onto itself) is required to avoid losing
    /// data.
    fn permute_clusters(&mut self, index_table: Vec<i64>) -> Result<()> {
        let n = index_table.len();
        let mut visited = vec![false; n];

        for start in 0..n {
            if visited[start] {
                continue;
            }
            if index_table[start] == -1 || index_table[start] == start as i64 {
                visited[start] = true;
                continue;
            }

            let mut chain = vec![start as u32];
            visited[start] = true;
            let mut cur = start;
            let mut closes_cycle = false;
            loop {
                let dest = index_table[cur];
                if dest == -1 {
                    break;
                }
                let dest = dest as usize;
                if dest == start {
                    closes_cycle = true;
                    break;
                }
                if visited[dest] {
                    log::error!("defragment_disk: non-injective plan at cluster {dest}");
                    break;
                }
                chain.push(dest as u32);
                visited[dest] = true;
                cur = dest;
            }

            let len = chain.len();
            if closes_cycle {
                let wrap = self.read_cluster_owned(chain[len - 1])?;
                for i in (1..len).rev() {
                    let moved = self.read_cluster_owned(chain[i - 1])?;
                    self.write_cluster_unmarked(chain[i], &moved)?;
                }
                self.write_cluster_unmarked(chain[0], &wrap)?;
            } else {
                for i in (1..len).rev() {
                    let moved = self.read_cluster_owned(chain[i - 1])?;
                    self.write_cluster_unmarked(chain[i], &moved)?;
                }
            }
        }

        Ok(())
    }

    /// Phase 3: clear the bitmap, then walk `objects` in their original
    /// order assigning each exactly one fragment, advancing a cursor.
    /// Files get `ceil(size / cluster_size)` clusters whose content phase
    /// 2 already placed at the cursor. Directories get
    /// `max(1, ceil(4 * len(child_uids) / cluster_size))` clusters and
    /// have their (now-compacted) child UID list written fresh. A
    /// multi-record chain collapses onto its first slot — after
    /// compaction a chain never needs more than one fragment — and the
    /// rest of its slots are freed.
    fn rewrite_defragmented_metadata(&mut self, objects: &[DefragObject]) -> Result<()> {
        self.bitmap_clear_all()?;

        let cluster_size = self.cluster_size();
        let mut cursor = 0u32;

        for object in objects {
            let needed = match &object.content {
                ObjectContent::File { size } => size.div_ceil(cluster_size),
                ObjectContent::Directory { child_uids } => {
                    (child_uids.len() as u32 * 4).div_ceil(cluster_size).max(1)
                }
            };

            let mut record = self.read_mft_record(object.first_slot)?;
            record.order = 1;
            record.order_total = 1;
            record.fragments = [RawFragment::EMPTY; MFT_MAX_FRAGMENTS as usize];
            if needed > 0 {
                record.fragments[0] = RawFragment {
                    cluster_start: cursor.into(),
                    cluster_count: needed.into(),
                };
            }
            self.write_mft_record(object.first_slot, &record)?;

            match &object.content {
                ObjectContent::File { .. } => {
                    if needed > 0 {
                        self.bitmap_set_range(cursor, needed, true)?;
                    }
                }
                ObjectContent::Directory { child_uids } => {
                    // `save_continual_segment` only marks the bitmap for the
                    // clusters it actually writes bytes into — an empty (or
                    // less-than-one-cluster) directory still occupies
                    // `needed` clusters per the record just written above,
                    // so the bitmap has to be marked independently of
                    // however much content there is to write.
                    if needed > 0 {
                        self.bitmap_set_range(cursor, needed, true)?;
                    }
                    let bytes: Vec<u8> = child_uids.iter().flat_map(|uid| uid.to_le_bytes()).collect();
                    self.save_continual_segment(&bytes, cursor)?;
                }
            }
            cursor += needed;

            for &extra_slot in &object.chain_slots {
                if extra_slot != object.first_slot {
                    self.free_mft_slot(extra_slot)?;
                }
            }
        }

        let cluster_count = self.cluster_count();
        self.set_free_space(cluster_count.saturating_sub(cursor) * cluster_size);

        Ok(())
    }

    fn read_cluster_owned(&self, cluster: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.cluster_size() as usize];
        self.read_cluster(cluster, &mut buf)?;
        Ok(buf)
    }

    /// Writes cluster contents without touching the bitmap: phase 2 moves
    /// bytes around ahead of phase 3's metadata rebuild, which clears and
    /// re-derives every bit from scratch.
    fn write_cluster_unmarked(&mut self, cluster: u32, data: &[u8]) -> Result<()> {
        let geometry = self.geometry();
        let offset = geometry.data_start + cluster as u64 * geometry.cluster_size as u64;
        self.storage_write(offset, data)
    }
}

enum ObjectContent {
    File { size: u32 },
    Directory { child_uids: Vec<u32> },
}

struct DefragObject {
    first_slot: usize,
    chain_slots: Vec<usize>,
    content: ObjectContent,
}

#[cfg(test)]
mod tests {
    use crate::tests::new_volume;
    use crate::ROOT_SLOT;

    #[test]
    fn defragment_preserves_content_and_compacts() {
        let mut volume = new_volume(20_000, 100);
        let mut slots = Vec::new();
        for i in 0..5 {
            let slot = volume.save_file(&format!("f{i}"), ROOT_SLOT, &vec![i as u8; 300]).unwrap();
            slots.push(slot);
        }
        // Remove the 2nd and 4th files to fragment the free space, then
        // create one larger file that must span the resulting gaps.
        volume.remove_file(slots[1], ROOT_SLOT).unwrap();
        volume.remove_file(slots[3], ROOT_SLOT).unwrap();
        let big = volume.save_file("big", ROOT_SLOT, &vec![9u8; 600]).unwrap();

        let contents_before: Vec<Vec<u8>> = [slots[0], slots[2], slots[4], big]
            .iter()
            .map(|&s| volume.load_file(s).unwrap())
            .collect();

        volume.defragment_disk().unwrap();

        let contents_after: Vec<Vec<u8>> = [slots[0], slots[2], slots[4], big]
            .iter()
            .map(|&s| volume.load_file(s).unwrap())
            .collect();
        assert_eq!(contents_before, contents_after);

        for &slot in &[slots[0], slots[2], slots[4], big] {
            let record = volume.read_mft_record(slot).unwrap();
            let fragments_used = record.fragments.iter().filter(|f| !f.is_empty()).count();
            assert_eq!(fragments_used, 1, "slot {slot} should have exactly one fragment");
        }

        assert!(!volume.check_disk_consistency());
    }

    #[test]
    fn defragment_keeps_directories_addressable() {
        let mut volume = new_volume(10_000, 100);
        let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
        volume.save_file("f", a, b"data").unwrap();

        volume.defragment_disk().unwrap();

        let children = volume.list_directory(a).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(volume.load_file(children[0].slot).unwrap(), b"data");
    }

    #[test]
    fn defragment_repacks_directory_with_holes() {
        // Create and remove enough siblings that `a`'s own directory
        // entry in root ends up surrounded by holes, then verify root's
        // listing and chdisk both survive defragmentation.
        let mut volume = new_volume(10_000, 100);
        let mut dirs = Vec::new();
        for i in 0..6 {
            dirs.push(volume.make_directory(ROOT_SLOT, &format!("d{i}")).unwrap());
        }
        volume.remove_directory(dirs[0], ROOT_SLOT).unwrap();
        volume.remove_directory(dirs[2], ROOT_SLOT).unwrap();
        volume.remove_directory(dirs[4], ROOT_SLOT).unwrap();

        volume.defragment_disk().unwrap();

        let remaining = volume.list_directory(ROOT_SLOT).unwrap();
        let mut names: Vec<_> = remaining.iter().map(|r| r.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["d1".to_string(), "d3".to_string(), "d5".to_string()]);
        assert!(!volume.check_disk_consistency());
    }
}
