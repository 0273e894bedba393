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

//! Path resolution: walk `/`-separated components through the directory
//! tree, threading parent context explicitly since directories carry no
//! back-link to their parent (design note, spec.md §9).

use pntfs_ds::Storage;

use crate::{Error, Result, Volume, ROOT_SLOT};

const ROOT_NAME: &str = "root";

/// One link in a resolved path chain: the component name and its MFT slot.
/// `chain[0]` is always `("root", ROOT_SLOT)`.
pub type Chain = Vec<(String, usize)>;

impl<S: Storage> Volume<S> {
    /// The chain representing "at root", suitable as a starting point for
    /// [`Volume::resolve`].
    pub fn root_chain(&self) -> Chain {
        vec![(ROOT_NAME.to_string(), ROOT_SLOT)]
    }

    /// Resolve `path` starting from `cwd`. A leading `/` resets the walk to
    /// root regardless of `cwd`. `..` ascends (failing if already at root);
    /// every other component descends into a child directory, except the
    /// final component, whose directory-ness is given by
    /// `final_is_directory`. An empty path is a no-op success returning
    /// `cwd` unchanged.
    pub fn resolve(&self, cwd: &Chain, path: &str, final_is_directory: bool) -> Result<Chain> {
        if path.is_empty() {
            return Ok(cwd.clone());
        }

        let mut chain = if path.starts_with('/') {
            self.root_chain()
        } else {
            cwd.clone()
        };

        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let last = components.len().saturating_sub(1);

        for (i, component) in components.iter().enumerate() {
            if *component == ".." {
                if chain.len() <= 1 {
                    return Err(Error::NotFound);
                }
                chain.pop();
                continue;
            }

            let is_directory = if i == last { final_is_directory } else { true };
            let (_, current_slot) = *chain.last().expect("chain always has root");
            let slot = self.contains(current_slot, component, is_directory)?;
            chain.push((component.to_string(), slot));
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::new_volume;
    use crate::ROOT_SLOT;

    #[test]
    fn resolves_absolute_nested_directory() {
        let mut volume = new_volume(10_000, 100);
        let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
        let b = volume.make_directory(a, "b").unwrap();

        let root = volume.root_chain();
        let chain = volume.resolve(&root, "/a/b", true).unwrap();
        assert_eq!(chain.last().unwrap().1, b);
    }

    #[test]
    fn dotdot_ascends_and_fails_at_root() {
        let mut volume = new_volume(10_000, 100);
        volume.make_directory(ROOT_SLOT, "a").unwrap();

        let root = volume.root_chain();
        let at_a = volume.resolve(&root, "/a", true).unwrap();
        let back = volume.resolve(&at_a, "..", true).unwrap();
        assert_eq!(back.last().unwrap().1, ROOT_SLOT);

        assert!(volume.resolve(&root, "..", true).is_err());
    }

    #[test]
    fn empty_path_is_a_no_op() {
        let volume = new_volume(10_000, 100);
        let root = volume.root_chain();
        let chain = volume.resolve(&root, "", true).unwrap();
        assert_eq!(chain, root);
    }

    #[test]
    fn unknown_component_is_not_found() {
        let volume = new_volume(10_000, 100);
        let root = volume.root_chain();
        assert!(volume.resolve(&root, "/missing", true).is_err());
    }
}
