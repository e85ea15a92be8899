use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use osf_core::NodeKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::tree::{Subtree, TreeKind, TreeNode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssociationError {
    #[error("{0} is not a file or folder")]
    NotLinkable(String),
    #[error("{0} is not a folder")]
    NotAFolder(String),
    #[error("subtree under {0} is not fully fetched")]
    SubtreeNotFetched(String),
}

/// Snapshot of a remote file or folder attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkingFile {
    pub node_id: String,
    pub project_id: String,
    pub name: String,
    pub kind: NodeKind,
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified: Option<i64>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub download_link: Option<Url>,
}

impl LinkingFile {
    /// `None` for project roots and placeholders.
    pub fn from_node(node: &TreeNode) -> Option<Self> {
        let remote = node.remote.as_ref()?;
        Some(Self {
            node_id: node.node_id.clone(),
            project_id: node.project_id.clone(),
            name: remote.name.clone(),
            kind: remote.kind,
            path: remote.path.clone(),
            size: remote.size,
            modified: remote.modified,
            md5: remote.md5.clone(),
            sha256: remote.sha256.clone(),
            download_link: remote.download_link.clone(),
        })
    }
}

/// Which remote nodes each record is linked to.
///
/// Serializes as a plain `{ record_id: [LinkingFile, ...] }` map. Every
/// mutation rebuilds the record's entry and drops it once empty. Mutations
/// return the number of entries added or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociationIndex {
    records: BTreeMap<String, Vec<LinkingFile>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_file(&mut self, record_id: &str, node: &TreeNode) -> Result<usize, AssociationError> {
        let file =
            LinkingFile::from_node(node).ok_or_else(|| AssociationError::NotLinkable(node.node_id.clone()))?;
        Ok(self.extend_record(record_id, vec![file]))
    }

    /// Links a folder and everything below it.
    ///
    /// A project root links only its descendants. The subtree must be fully
    /// fetched so nothing below the folder is silently left out.
    pub fn link_folder(&mut self, record_id: &str, subtree: &Subtree) -> Result<usize, AssociationError> {
        let root = &subtree.root;
        if !root.kind.is_container() {
            return Err(AssociationError::NotAFolder(root.node_id.clone()));
        }
        if !subtree.complete {
            return Err(AssociationError::SubtreeNotFetched(root.node_id.clone()));
        }
        let files: Vec<LinkingFile> = std::iter::once(root)
            .filter(|node| node.kind == TreeKind::Folder)
            .chain(subtree.descendants.iter())
            .filter_map(LinkingFile::from_node)
            .collect();
        Ok(self.extend_record(record_id, files))
    }

    pub fn unlink_node(&mut self, record_id: &str, node_id: &str) -> usize {
        self.retain_in(record_id, |file| file.node_id != node_id)
    }

    pub fn unlink_subtree(&mut self, record_id: &str, subtree: &Subtree) -> usize {
        let ids: HashSet<&str> = subtree.node_ids().collect();
        self.retain_in(record_id, |file| !ids.contains(file.node_id.as_str()))
    }

    /// Removes every entry pointing into `project_id`, across all records.
    pub fn cascade_unlink_project(&mut self, project_id: &str) -> usize {
        let affected = self.would_affect_records(project_id);
        let removed: usize = affected
            .iter()
            .map(|record_id| self.retain_in(record_id, |file| file.project_id != project_id))
            .sum();
        if removed > 0 {
            debug!(project_id, removed, records = affected.len(), "project links cascaded");
        }
        removed
    }

    /// Records that `cascade_unlink_project` would change.
    pub fn would_affect_records(&self, project_id: &str) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|(_, files)| files.iter().any(|file| file.project_id == project_id))
            .map(|(record_id, _)| record_id.clone())
            .collect()
    }

    /// Every project that at least one entry points into.
    pub fn project_ids(&self) -> BTreeSet<String> {
        self.records
            .values()
            .flatten()
            .map(|file| file.project_id.clone())
            .collect()
    }

    /// Number of records linking each node.
    pub fn link_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for file in self.records.values().flatten() {
            *counts.entry(file.node_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn records_for(&self, node_id: &str) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|(_, files)| files.iter().any(|file| file.node_id == node_id))
            .map(|(record_id, _)| record_id.clone())
            .collect()
    }

    pub fn linked_files(&self, record_id: &str) -> &[LinkingFile] {
        self.records.get(record_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn forget_record(&mut self, record_id: &str) -> usize {
        self.records.remove(record_id).map_or(0, |files| files.len())
    }

    pub fn record_ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn extend_record(&mut self, record_id: &str, files: Vec<LinkingFile>) -> usize {
        let mut entry = self.linked_files(record_id).to_vec();
        let before = entry.len();
        for file in files {
            if !entry.iter().any(|known| known.node_id == file.node_id) {
                entry.push(file);
            }
        }
        let added = entry.len() - before;
        if added > 0 {
            self.records.insert(record_id.to_string(), entry);
        }
        added
    }

    fn retain_in(&mut self, record_id: &str, keep: impl Fn(&LinkingFile) -> bool) -> usize {
        let Some(current) = self.records.get(record_id) else {
            return 0;
        };
        let entry: Vec<LinkingFile> = current.iter().filter(|file| keep(file)).cloned().collect();
        let removed = current.len() - entry.len();
        if removed == 0 {
            return 0;
        }
        if entry.is_empty() {
            self.records.remove(record_id);
        } else {
            self.records.insert(record_id.to_string(), entry);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ProjectRoot;
    use osf_core::{NodeLinks, RemoteNode};

    fn remote_node(project: &str, id: &str, name: &str, kind: NodeKind, parent: &str) -> TreeNode {
        let remote = RemoteNode {
            id: id.into(),
            project_id: project.into(),
            name: name.into(),
            kind,
            size: (kind == NodeKind::File).then_some(12),
            path: format!("/{name}"),
            created: None,
            modified: Some(1_700_000_000),
            last_touched: None,
            md5: None,
            sha256: None,
            download_link: None,
            links: NodeLinks::default(),
        };
        TreeNode::from_remote(parent, remote)
    }

    fn project(id: &str) -> TreeNode {
        TreeNode::project(&ProjectRoot::new(id, id))
    }

    /// Folder `a` holding folder `b` and file `c.txt`.
    fn folder_a(project_id: &str) -> Subtree {
        Subtree {
            root: remote_node(project_id, &format!("{project_id}-a"), "a", NodeKind::Folder, project_id),
            descendants: vec![
                remote_node(project_id, &format!("{project_id}-b"), "b", NodeKind::Folder, "a"),
                remote_node(project_id, &format!("{project_id}-c"), "c.txt", NodeKind::File, "a"),
            ],
            complete: true,
        }
    }

    fn ids(index: &AssociationIndex, record: &str) -> Vec<String> {
        index
            .linked_files(record)
            .iter()
            .map(|file| file.node_id.clone())
            .collect()
    }

    #[test]
    fn link_file_is_idempotent() {
        let mut index = AssociationIndex::new();
        let file = remote_node("p1", "f1", "c.txt", NodeKind::File, "d1");

        assert_eq!(index.link_file("R1", &file).unwrap(), 1);
        assert_eq!(index.link_file("R1", &file).unwrap(), 0);

        let linked = index.linked_files("R1");
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].size, Some(12));
        assert_eq!(linked[0].modified, Some(1_700_000_000));
    }

    #[test]
    fn link_file_rejects_projects() {
        let mut index = AssociationIndex::new();

        assert_eq!(
            index.link_file("R1", &project("p1")).unwrap_err(),
            AssociationError::NotLinkable("p1".into())
        );
        assert!(index.is_empty());
    }

    #[test]
    fn link_folder_links_folder_and_descendants() {
        let mut index = AssociationIndex::new();

        assert_eq!(index.link_folder("R1", &folder_a("p1")).unwrap(), 3);
        assert_eq!(ids(&index, "R1"), vec!["p1-a", "p1-b", "p1-c"]);
        assert_eq!(index.link_folder("R1", &folder_a("p1")).unwrap(), 0);
    }

    #[test]
    fn link_folder_on_project_skips_root() {
        let mut index = AssociationIndex::new();
        let mut subtree = folder_a("p1");
        let folder = std::mem::replace(&mut subtree.root, project("p1"));
        subtree.descendants.insert(0, folder);

        assert_eq!(index.link_folder("R1", &subtree).unwrap(), 3);
        assert!(!ids(&index, "R1").contains(&"p1".to_string()));
    }

    #[test]
    fn link_folder_requires_complete_subtree() {
        let mut index = AssociationIndex::new();
        let mut subtree = folder_a("p1");
        subtree.complete = false;

        assert_eq!(
            index.link_folder("R1", &subtree).unwrap_err(),
            AssociationError::SubtreeNotFetched("p1-a".into())
        );

        let file = remote_node("p1", "f1", "c.txt", NodeKind::File, "d1");
        let single = Subtree {
            root: file,
            descendants: Vec::new(),
            complete: true,
        };
        assert_eq!(
            index.link_folder("R1", &single).unwrap_err(),
            AssociationError::NotAFolder("f1".into())
        );
    }

    #[test]
    fn unlink_subtree_removes_only_subtree_entries() {
        let mut index = AssociationIndex::new();
        index.link_folder("R1", &folder_a("p1")).unwrap();
        index
            .link_file("R1", &remote_node("p1", "other", "x.txt", NodeKind::File, "p1"))
            .unwrap();

        assert_eq!(index.unlink_subtree("R1", &folder_a("p1")), 3);
        assert_eq!(ids(&index, "R1"), vec!["other"]);
        assert_eq!(index.unlink_node("R1", "other"), 1);
        assert_eq!(index.record_ids().count(), 0);
        assert_eq!(index.unlink_node("R1", "other"), 0);
    }

    #[test]
    fn cascade_unlink_project_touches_only_matching_records() {
        let mut index = AssociationIndex::new();
        index.link_folder("A", &folder_a("p1")).unwrap();
        index.link_folder("A", &folder_a("p2")).unwrap();
        index.link_folder("B", &folder_a("p2")).unwrap();

        assert_eq!(
            index.would_affect_records("p1"),
            BTreeSet::from(["A".to_string()])
        );
        assert_eq!(index.cascade_unlink_project("p1"), 3);

        assert_eq!(ids(&index, "A"), vec!["p2-a", "p2-b", "p2-c"]);
        assert_eq!(ids(&index, "B"), vec!["p2-a", "p2-b", "p2-c"]);
        assert!(index.would_affect_records("p1").is_empty());
    }

    #[test]
    fn cascade_unlink_project_clears_every_linking_record() {
        let mut index = AssociationIndex::new();
        index.link_folder("A", &folder_a("p1")).unwrap();
        index
            .link_file("B", &remote_node("p1", "p1-c", "c.txt", NodeKind::File, "p1-a"))
            .unwrap();

        assert_eq!(
            index.would_affect_records("p1"),
            BTreeSet::from(["A".to_string(), "B".to_string()])
        );
        assert_eq!(index.project_ids(), BTreeSet::from(["p1".to_string()]));
        assert_eq!(index.cascade_unlink_project("p1"), 4);
        assert!(index.is_empty());
        assert!(index.project_ids().is_empty());
    }

    #[test]
    fn reverse_view_counts_records_per_node() {
        let mut index = AssociationIndex::new();
        index.link_folder("A", &folder_a("p1")).unwrap();
        index.link_folder("B", &folder_a("p1")).unwrap();
        index.unlink_node("B", "p1-c");

        let counts = index.link_counts();
        assert_eq!(counts["p1-a"], 2);
        assert_eq!(counts["p1-c"], 1);
        assert_eq!(
            index.records_for("p1-a"),
            BTreeSet::from(["A".to_string(), "B".to_string()])
        );

        assert_eq!(index.forget_record("A"), 3);
        assert_eq!(index.link_counts()["p1-a"], 1);
        assert!(!index.link_counts().contains_key("p1-c"));
    }

    #[test]
    fn serializes_as_record_map() {
        let mut index = AssociationIndex::new();
        index
            .link_file("R1", &remote_node("p1", "f1", "c.txt", NodeKind::File, "d1"))
            .unwrap();

        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["R1"][0]["node_id"], "f1");
        assert_eq!(json["R1"][0]["kind"], "file");

        let restored: AssociationIndex = serde_json::from_value(json).unwrap();
        assert_eq!(restored, index);
    }
}
