// Copyright 2026 Daniel Pelikan
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

//! Message folder tree.
//!
//! Folders live in an arena and refer to each other by index. The tree is
//! built once per account and only navigated afterwards.

use std::collections::HashSet;
use tracing::{debug, warn};
use xml::writer::{EmitterConfig, XmlEvent};

use crate::config::AccountKind;
use crate::error::{MapError, MapResult};
use crate::obex::constants::folders;
use crate::obex::SetPathFlags;

/// Index of a folder inside its tree.
pub type FolderId = usize;

/// One node of the folder tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    /// Store id for Email/IM folders, 0 for static folders.
    pub store_id: i64,
    /// When set, listings ignore the folder and match across all folders.
    pub ignore: bool,
    parent: Option<FolderId>,
    children: Vec<FolderId>,
}

impl Folder {
    fn new(name: &str, store_id: i64, parent: Option<FolderId>) -> Self {
        Self {
            name: name.to_string(),
            store_id,
            ignore: false,
            parent,
            children: Vec::new(),
        }
    }

    /// A detached folder used to address messages regardless of location,
    /// e.g. for handle or conversation filters.
    pub fn conceptual(name: &str) -> Self {
        Self {
            ignore: true,
            ..Self::new(name, 0, None)
        }
    }

    pub fn parent(&self) -> Option<FolderId> {
        self.parent
    }

    pub fn children(&self) -> &[FolderId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct FolderTree {
    folders: Vec<Folder>,
}

impl Default for FolderTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderTree {
    /// Create a tree holding only the root folder.
    pub fn new() -> Self {
        Self {
            folders: vec![Folder::new(folders::ROOT, 0, None)],
        }
    }

    /// Create the static folder set every account exposes.
    pub fn for_account(kind: AccountKind) -> Self {
        let mut tree = Self::new();
        let telecom = tree.add_child(tree.root(), folders::TELECOM, 0);
        let msg = tree.add_child(telecom, folders::MSG, 0);
        for name in [
            folders::INBOX,
            folders::OUTBOX,
            folders::SENT,
            folders::DELETED,
            folders::DRAFT,
        ] {
            tree.add_child(msg, name, 0);
        }
        debug!("Built {:?} folder tree with {} folders", kind, tree.len());
        tree
    }

    pub fn root(&self) -> FolderId {
        0
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn get(&self, id: FolderId) -> Option<&Folder> {
        self.folders.get(id)
    }

    /// The `telecom/msg` folder, parent of the message folders.
    pub fn msg_folder(&self) -> Option<FolderId> {
        self.find_path("telecom/msg")
    }

    /// Add `name` under `parent`. Returns the existing child if one matches.
    pub fn add_child(&mut self, parent: FolderId, name: &str, store_id: i64) -> FolderId {
        if let Some(existing) = self.child(parent, name) {
            return existing;
        }
        let id = self.folders.len();
        self.folders.push(Folder::new(name, store_id, Some(parent)));
        if let Some(p) = self.folders.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Case-insensitive child lookup.
    pub fn child(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.folders[*c].name.eq_ignore_ascii_case(name))
    }

    /// Resolve a SETPATH request against `current`.
    ///
    /// An empty name with `go_to_parent` moves up one level, an empty name
    /// without it resets to the root. A non-empty name is looked up under the
    /// parent of `current` when `go_to_parent` is set, else under `current`.
    pub fn resolve(&self, current: FolderId, name: &str, go_to_parent: bool) -> Option<FolderId> {
        let base = if go_to_parent {
            self.get(current)?.parent?
        } else {
            current
        };
        if name.is_empty() {
            if go_to_parent {
                Some(base)
            } else {
                Some(self.root())
            }
        } else {
            self.child(base, name)
        }
    }

    /// [`resolve`](Self::resolve) for an OBEX SETPATH, failing with NotFound.
    pub fn set_path(&self, current: FolderId, name: &str, flags: SetPathFlags) -> MapResult<FolderId> {
        self.resolve(current, name, flags.go_to_parent()).ok_or_else(|| {
            MapError::NotFound(format!(
                "no folder '{}' from '{}'",
                name,
                self.full_path(current)
            ))
        })
    }

    /// Look up a slash-separated path from the root.
    pub fn find_path(&self, path: &str) -> Option<FolderId> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self.root(), |id, segment| self.child(id, segment))
    }

    /// Slash-joined path from the root, e.g. `telecom/msg/inbox`.
    pub fn full_path(&self, id: FolderId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let Some(folder) = self.get(c) else { break };
            if folder.parent.is_some() {
                segments.push(folder.name.as_str());
            }
            cursor = folder.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    pub fn child_count(&self, id: FolderId) -> usize {
        self.get(id).map_or(0, |f| f.children.len())
    }

    /// Folder-listing document for `count` children of `id` from `offset`.
    pub fn list_children_page(&self, id: FolderId, offset: usize, count: usize) -> MapResult<String> {
        let mut buf = Vec::new();
        {
            let mut w = EmitterConfig::new()
                .write_document_declaration(true)
                .perform_indent(true)
                .create_writer(&mut buf);
            w.write(XmlEvent::start_element("folder-listing").attr("version", "1.0"))?;
            if let Some(folder) = self.get(id) {
                for child in folder.children.iter().skip(offset).take(count) {
                    let name = self.folders[*child].name.as_str();
                    w.write(XmlEvent::start_element("folder").attr("name", name))?;
                    w.write(XmlEvent::end_element())?;
                }
            }
            w.write(XmlEvent::end_element())?;
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Recursively add store folders below `parent`.
    ///
    /// `load` returns the `(store_id, name)` children of a store folder id;
    /// the walk starts from `store_parent`. A store id seen twice is skipped,
    /// so a parent loop in the store cannot recurse forever.
    pub fn populate<E>(
        &mut self,
        parent: FolderId,
        store_parent: i64,
        load: &mut dyn FnMut(i64) -> Result<Vec<(i64, String)>, E>,
    ) -> Result<usize, E> {
        let mut visited = HashSet::from([store_parent]);
        self.populate_from(parent, store_parent, load, &mut visited)
    }

    fn populate_from<E>(
        &mut self,
        parent: FolderId,
        store_parent: i64,
        load: &mut dyn FnMut(i64) -> Result<Vec<(i64, String)>, E>,
        visited: &mut HashSet<i64>,
    ) -> Result<usize, E> {
        let mut added = 0;
        for (store_id, name) in load(store_parent)? {
            if !visited.insert(store_id) {
                warn!("Store folder {} '{}' already in tree, skipping", store_id, name);
                continue;
            }
            let child = self.add_child(parent, &name, store_id);
            added += 1;
            added += self.populate_from(child, store_id, load, visited)?;
        }
        Ok(added)
    }
}
