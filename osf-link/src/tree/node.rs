use osf_core::{NodeKind, ProjectInfo, RemoteNode};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    Project,
    Folder,
    File,
    Loading,
    Error,
}

impl TreeKind {
    pub fn is_container(self) -> bool {
        matches!(self, TreeKind::Project | TreeKind::Folder)
    }

    pub fn is_placeholder(self) -> bool {
        matches!(self, TreeKind::Loading | TreeKind::Error)
    }
}

impl From<NodeKind> for TreeKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::File => TreeKind::File,
            NodeKind::Folder => TreeKind::Folder,
        }
    }
}

/// A project the tree should show as a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    pub id: String,
    pub title: String,
}

impl ProjectRoot {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

impl From<&ProjectInfo> for ProjectRoot {
    fn from(project: &ProjectInfo) -> Self {
        Self::new(&project.id, &project.title)
    }
}

/// One node of the cached tree. Edges are node ids into the cache's arena.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub project_id: String,
    pub node_id: String,
    pub label: String,
    pub kind: TreeKind,
    pub parent: Option<String>,
    pub children: Vec<String>,
    /// Remote metadata; set for file and folder nodes only.
    pub remote: Option<RemoteNode>,
    /// Rendered causal chain; set for error placeholders only.
    pub error: Option<String>,
}

impl TreeNode {
    pub(crate) fn project(root: &ProjectRoot) -> Self {
        Self {
            project_id: root.id.clone(),
            node_id: root.id.clone(),
            label: root.title.clone(),
            kind: TreeKind::Project,
            parent: None,
            children: Vec::new(),
            remote: None,
            error: None,
        }
    }

    pub(crate) fn from_remote(parent_id: &str, remote: RemoteNode) -> Self {
        Self {
            project_id: remote.project_id.clone(),
            node_id: remote.id.clone(),
            label: remote.name.clone(),
            kind: remote.kind.into(),
            parent: Some(parent_id.to_string()),
            children: Vec::new(),
            remote: Some(remote),
            error: None,
        }
    }

    pub(crate) fn placeholder(
        kind: TreeKind,
        node_id: String,
        parent: &TreeNode,
        error: Option<String>,
    ) -> Self {
        let label = match kind {
            TreeKind::Error => "Failed to load".to_string(),
            _ => "Loading…".to_string(),
        };
        Self {
            project_id: parent.project_id.clone(),
            node_id,
            label,
            kind,
            parent: Some(parent.node_id.clone()),
            children: Vec::new(),
            remote: None,
            error,
        }
    }
}

/// Owned nested copy of part of the tree, safe to keep across cache updates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub project_id: String,
    pub node_id: String,
    pub label: String,
    pub kind: TreeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub children: Vec<NodeView>,
}

impl NodeView {
    /// Indented outline, two spaces per level.
    pub fn outline(views: &[NodeView]) -> String {
        let mut out = String::new();
        for view in views {
            view.write_outline(0, &mut out);
        }
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        let marker = match self.kind {
            TreeKind::Project => "[project] ",
            TreeKind::Folder => "[dir] ",
            TreeKind::File => "",
            TreeKind::Loading => "… ",
            TreeKind::Error => "! ",
        };
        out.push_str(&"  ".repeat(depth));
        out.push_str(marker);
        out.push_str(&self.label);
        if let Some(error) = &self.error {
            out.push_str(": ");
            out.push_str(error);
        }
        out.push('\n');
        for child in &self.children {
            child.write_outline(depth + 1, out);
        }
    }
}

/// A node and everything cached beneath it, in pre-order.
#[derive(Debug, Clone, PartialEq)]
pub struct Subtree {
    pub root: TreeNode,
    pub descendants: Vec<TreeNode>,
    /// False when any container below the root is unfetched or errored.
    pub complete: bool,
}

impl Subtree {
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.root.node_id.as_str())
            .chain(self.descendants.iter().map(|node| node.node_id.as_str()))
    }
}
