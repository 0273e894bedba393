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

//! Storage abstraction for the byte region backing a pseudo-NTFS volume.
//!
//! A [`Storage`] is addressed by byte offset from the start of the volume
//! and never outlives a single process — the engine's Non-goals exclude
//! durability to backing media, so implementors are free to be purely
//! in-memory (see `pntfs-ds-mem`).

pub use pntfs_err::Result;

pub trait Storage {
    /// Total size of the addressable region, in bytes.
    fn len(&self) -> u64;

    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&mut self, offset: u64, buffer: &[u8]) -> Result<()>;
}
