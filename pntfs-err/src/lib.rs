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

//! Error and result types shared across the pseudo-NTFS engine crates.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not enough contiguous or fragmented free space")]
    NoSpace,
    #[error("no free MFT record available")]
    NoMft,
    #[error("path or name could not be resolved")]
    NotFound,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("host I/O: {0}")]
    HostIo(#[from] std::io::Error),
    #[error("FS: {0}")]
    Fs(#[from] FsError),
}

/// Structural failures raised by the checker/defragmenter when on-disk
/// invariants do not hold, as distinct from the ordinary operational
/// failures in [`Error`] that every caller is expected to handle.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("volume metadata is inconsistent")]
    Inconsistent,
    #[error("index out of range")]
    Index,
}

pub type Result<T> = core::result::Result<T, Error>;
