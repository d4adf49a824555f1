//! Directory-entry cache built incrementally from listed object paths.

use std::collections::{BTreeSet, HashMap};

/// Direct children of one directory. Sets are ordered so `readdir`
/// output is deterministic.
#[derive(Default)]
pub struct DirectoryNode {
    directory_names: BTreeSet<String>,
    files: BTreeSet<String>,
}

impl DirectoryNode {
    pub fn directory_names(&self) -> impl Iterator<Item = &str> {
        self.directory_names.iter().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    pub fn contains_directory(&self, name: &str) -> bool {
        self.directory_names.contains(name)
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.files.contains(name)
    }
}

/// Mapping from mount-relative directory path to [`DirectoryNode`].
pub struct ReaddirCache {
    directory_nodes: HashMap<String, DirectoryNode>,
}

impl ReaddirCache {
    pub fn new() -> Self {
        let mut directory_nodes = HashMap::new();
        directory_nodes.insert("/".to_string(), DirectoryNode::default());
        ReaddirCache { directory_nodes }
    }

    pub fn contains(&self, fuse_path: &str) -> bool {
        self.directory_nodes.contains_key(fuse_path)
    }

    pub fn node(&self, fuse_path: &str) -> Option<&DirectoryNode> {
        self.directory_nodes.get(fuse_path)
    }

    /// Registers a file path, creating directory nodes along the way and
    /// attaching the terminal name to the deepest directory.
    pub fn add_file(&mut self, fuse_path: &str) {
        let parts: Vec<&str> = fuse_path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return;
        }

        let mut parent_path = "/".to_string();
        for directory_name in &parts[..parts.len() - 1] {
            let current_path = if parent_path == "/" {
                format!("/{directory_name}")
            } else {
                format!("{parent_path}/{directory_name}")
            };
            if !self.directory_nodes.contains_key(&current_path) {
                self.directory_nodes
                    .insert(current_path.clone(), DirectoryNode::default());
                self.directory_nodes
                    .get_mut(&parent_path)
                    .expect("parent directory node exists")
                    .directory_names
                    .insert((*directory_name).to_string());
            }
            parent_path = current_path;
        }

        self.directory_nodes
            .get_mut(&parent_path)
            .expect("parent directory node exists")
            .files
            .insert(parts[parts.len() - 1].to_string());
    }
}

impl Default for ReaddirCache {
    fn default() -> Self {
        Self::new()
    }
}
