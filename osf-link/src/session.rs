use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::info;

use crate::links::{AssociationError, AssociationIndex};
use crate::tree::{ChildSource, ProjectRoot, TreeCache, TreeError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Association(#[from] AssociationError),
}

/// What changed when the linked project list was replaced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnlinkReport {
    pub removed_projects: Vec<String>,
    /// Entries removed per record.
    pub unlinked: BTreeMap<String, usize>,
}

impl UnlinkReport {
    pub fn total_unlinked(&self) -> usize {
        self.unlinked.values().sum()
    }
}

/// Tree cache plus association index, kept consistent with each other.
pub struct LinkSession<S> {
    tree: TreeCache<S>,
    links: AssociationIndex,
}

impl<S: ChildSource> LinkSession<S> {
    pub fn new(source: S) -> Self {
        Self::with_parts(TreeCache::new(source), AssociationIndex::new())
    }

    /// Resumes a session with links loaded from the consumer's records.
    pub fn with_parts(tree: TreeCache<S>, links: AssociationIndex) -> Self {
        Self { tree, links }
    }

    pub fn tree(&self) -> &TreeCache<S> {
        &self.tree
    }

    pub fn links(&self) -> &AssociationIndex {
        &self.links
    }

    /// Records whose links would be dropped by switching to `projects`.
    pub fn projects_needing_confirmation(&self, projects: &[ProjectRoot]) -> BTreeSet<String> {
        self.departing_projects(projects, &[])
            .iter()
            .flat_map(|project_id| self.links.would_affect_records(project_id))
            .collect()
    }

    /// Replaces the linked project list and unlinks everything under the
    /// projects that left it.
    ///
    /// Links into projects the tree never showed, such as those restored
    /// with `with_parts`, are cascaded too.
    pub fn set_linked_projects(&mut self, projects: &[ProjectRoot]) -> UnlinkReport {
        let removed_projects = self.tree.sync_projects(projects);
        let mut unlinked = BTreeMap::new();
        for project_id in self.departing_projects(projects, &removed_projects) {
            let affected = self.links.would_affect_records(&project_id);
            let before = self.counts_for(&affected);
            self.links.cascade_unlink_project(&project_id);
            for record_id in affected {
                let after = self.links.linked_files(&record_id).len();
                let removed = before.get(&record_id).copied().unwrap_or(0) - after;
                *unlinked.entry(record_id).or_insert(0) += removed;
            }
        }
        let report = UnlinkReport {
            removed_projects,
            unlinked,
        };
        if !report.removed_projects.is_empty() || !report.unlinked.is_empty() {
            info!(
                projects = report.removed_projects.len(),
                entries = report.total_unlinked(),
                "linked projects removed"
            );
        }
        report
    }

    /// Loads everything under `node_id`, then links it to `record_id`.
    pub async fn link_folder(&mut self, record_id: &str, node_id: &str) -> Result<usize, SessionError> {
        self.tree.expand_all_under(node_id).await?;
        let subtree = self.tree.subtree(node_id)?;
        Ok(self.links.link_folder(record_id, &subtree)?)
    }

    pub fn link_file(&mut self, record_id: &str, node_id: &str) -> Result<usize, SessionError> {
        let node = self
            .tree
            .node(node_id)
            .ok_or_else(|| TreeError::UnknownNode(node_id.to_string()))?;
        Ok(self.links.link_file(record_id, &node)?)
    }

    pub fn unlink_node(&mut self, record_id: &str, node_id: &str) -> usize {
        self.links.unlink_node(record_id, node_id)
    }

    /// Unlinks `node_id` and whatever of its subtree is cached.
    ///
    /// A node no longer in the tree is unlinked on its own.
    pub fn unlink_subtree(&mut self, record_id: &str, node_id: &str) -> usize {
        match self.tree.subtree(node_id) {
            Ok(subtree) => self.links.unlink_subtree(record_id, &subtree),
            Err(_) => self.links.unlink_node(record_id, node_id),
        }
    }

    pub fn forget_record(&mut self, record_id: &str) -> usize {
        self.links.forget_record(record_id)
    }

    /// Projects outside `projects` that are still shown or still linked.
    fn departing_projects(&self, projects: &[ProjectRoot], dropped: &[String]) -> BTreeSet<String> {
        let kept: BTreeSet<&str> = projects.iter().map(|project| project.id.as_str()).collect();
        self.tree
            .roots()
            .into_iter()
            .chain(dropped.iter().cloned())
            .chain(self.links.project_ids())
            .filter(|project_id| !kept.contains(project_id.as_str()))
            .collect()
    }

    fn counts_for(&self, records: &BTreeSet<String>) -> BTreeMap<String, usize> {
        records
            .iter()
            .map(|record_id| (record_id.clone(), self.links.linked_files(record_id).len()))
            .collect()
    }
}
