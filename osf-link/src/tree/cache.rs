use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use osf_core::{OsfClient, OsfError, RemoteNode, error_chain};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::node::{NodeView, ProjectRoot, Subtree, TreeKind, TreeNode};

const CANCELLED_MESSAGE: &str = "fetch cancelled";

/// Lists one level of a project's hierarchy.
pub trait ChildSource: Send + Sync + 'static {
    /// `folder` is `None` for the project's root folder.
    fn fetch_children(
        &self,
        project_id: &str,
        folder: Option<&RemoteNode>,
    ) -> impl Future<Output = Result<Vec<RemoteNode>, OsfError>> + Send;
}

impl ChildSource for OsfClient {
    fn fetch_children(
        &self,
        project_id: &str,
        folder: Option<&RemoteNode>,
    ) -> impl Future<Output = Result<Vec<RemoteNode>, OsfError>> + Send {
        async move {
            match folder {
                Some(folder) if folder.links.children.is_some() => self.list_folder(folder).await,
                Some(folder) => self.list_children(project_id, Some(folder.id.as_str())).await,
                None => self.list_children(project_id, None).await,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("unknown tree node: {0}")]
    UnknownNode(String),
    #[error("{0} is not an error placeholder")]
    NotAnErrorNode(String),
    #[error("{} folder(s) under {root} failed to load", errored.len())]
    SubtreeIncomplete { root: String, errored: Vec<String> },
}

/// Outcome of a single `expand` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// This call fetched the children and installed them.
    Fetched,
    /// This call fetched and failed; an error placeholder is installed.
    Failed,
    AlreadyFetched,
    /// Another call is fetching this node.
    InFlight,
    /// Files and placeholders have nothing to expand.
    NotExpandable,
    /// The result arrived for a node that was removed or re-fetched meanwhile.
    Discarded,
}

/// In-memory mirror of the remote hierarchy, expanded on demand.
///
/// Nodes live in an arena keyed by node id and are replaced whole on every
/// change. Each node has at most one fetch in flight.
pub struct TreeCache<S> {
    source: Arc<S>,
    state: Arc<Mutex<TreeState>>,
}

impl<S> Clone for TreeCache<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Default)]
struct TreeState {
    nodes: HashMap<String, Arc<TreeNode>>,
    roots: Vec<String>,
    in_flight: HashMap<String, InFlight>,
    next_ticket: u64,
    next_synthetic: u64,
}

struct InFlight {
    ticket: u64,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
}

struct FetchRequest {
    project_id: String,
    folder: Option<RemoteNode>,
    ticket: u64,
    cancel: CancellationToken,
}

/// Settles a fetch whose `expand` future was dropped before it finished.
struct PendingFetch<'a, S> {
    cache: &'a TreeCache<S>,
    node_id: &'a str,
    ticket: u64,
    armed: bool,
}

impl<S> Drop for PendingFetch<'_, S> {
    fn drop(&mut self) {
        if !self.armed || std::thread::panicking() {
            return;
        }
        debug!(node_id = self.node_id, ticket = self.ticket, "fetch abandoned");
        self.cache.finish_fetch(self.node_id, self.ticket, None);
    }
}

enum Begin {
    Started(FetchRequest),
    Skip(Expansion),
}

enum Scan {
    Errored,
    Containers(Vec<String>),
}

impl<S: ChildSource> TreeCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_shared_source(Arc::new(source))
    }

    pub fn with_shared_source(source: Arc<S>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(TreeState::default())),
        }
    }

    /// Fetches the children of `node_id` unless they are loaded or loading.
    pub async fn expand(&self, node_id: &str) -> Result<Expansion, TreeError> {
        let request = match self.begin_fetch(node_id)? {
            Begin::Started(request) => request,
            Begin::Skip(expansion) => return Ok(expansion),
        };
        let mut pending = PendingFetch {
            cache: self,
            node_id,
            ticket: request.ticket,
            armed: true,
        };
        let outcome = tokio::select! {
            _ = request.cancel.cancelled() => None,
            result = self.source.fetch_children(&request.project_id, request.folder.as_ref()) => Some(result),
        };
        pending.armed = false;
        Ok(self.finish_fetch(node_id, request.ticket, outcome))
    }

    /// Loads every folder below `node_id`, fetching sibling subtrees concurrently.
    ///
    /// Fetches already in flight are awaited rather than issued again.
    pub async fn expand_all_under(&self, node_id: &str) -> Result<(), TreeError> {
        let errored = self.expand_recursive(node_id.to_string()).await?;
        if errored.is_empty() {
            Ok(())
        } else {
            Err(TreeError::SubtreeIncomplete {
                root: node_id.to_string(),
                errored,
            })
        }
    }

    /// Re-runs the fetch that produced the error placeholder `error_node_id`.
    pub async fn retry(&self, error_node_id: &str) -> Result<Expansion, TreeError> {
        let parent = self.error_parent(error_node_id)?;
        self.expand(&parent).await
    }

    /// Forgets the cached children of `node_id` and fetches them again.
    pub async fn refresh(&self, node_id: &str) -> Result<Expansion, TreeError> {
        if !self.reset(node_id)? {
            return Ok(Expansion::InFlight);
        }
        self.expand(node_id).await
    }

    fn expand_recursive(&self, node_id: String) -> BoxFuture<'_, Result<Vec<String>, TreeError>> {
        async move {
            if self.expand(&node_id).await? == Expansion::InFlight {
                self.wait_for(&node_id).await;
            }
            let containers = match self.scan_children(&node_id)? {
                Scan::Errored => return Ok(vec![node_id]),
                Scan::Containers(ids) => ids,
            };
            let results = join_all(containers.into_iter().map(|id| self.expand_recursive(id))).await;
            let mut errored = Vec::new();
            for result in results {
                errored.extend(result?);
            }
            Ok(errored)
        }
        .boxed()
    }

    async fn wait_for(&self, node_id: &str) {
        let Some(mut done) = self.subscribe(node_id) else {
            return;
        };
        let _ = done.wait_for(|finished| *finished).await;
    }
}

impl<S> TreeCache<S> {
    /// Makes the root set follow the linked project list.
    ///
    /// New projects get an unfetched root, known ones keep their cached
    /// subtree, and projects missing from `projects` are dropped together with
    /// their subtree and in-flight fetches. Returns the dropped project ids.
    pub fn sync_projects(&self, projects: &[ProjectRoot]) -> Vec<String> {
        let mut state = self.lock();
        let mut seen = HashSet::new();
        let wanted: Vec<&ProjectRoot> = projects
            .iter()
            .filter(|project| seen.insert(project.id.as_str()))
            .collect();

        let removed: Vec<String> = state
            .roots
            .iter()
            .filter(|root| !seen.contains(root.as_str()))
            .cloned()
            .collect();
        for project_id in &removed {
            state.remove_subtree(project_id, true);
            debug!(project_id, "project root dropped");
        }

        for project in &wanted {
            match state.nodes.get(&project.id).cloned() {
                Some(existing) if existing.label != project.title => {
                    let mut renamed = (*existing).clone();
                    renamed.label = project.title.clone();
                    state.nodes.insert(project.id.clone(), Arc::new(renamed));
                }
                Some(_) => {}
                None => {
                    state
                        .nodes
                        .insert(project.id.clone(), Arc::new(TreeNode::project(project)));
                    state.install_placeholder(&project.id, TreeKind::Loading, None);
                    debug!(project_id = %project.id, "project root added");
                }
            }
        }
        state.roots = wanted.iter().map(|project| project.id.clone()).collect();
        removed
    }

    /// Aborts the fetch in flight for `node_id`, leaving it errored.
    pub fn cancel(&self, node_id: &str) -> bool {
        let mut state = self.lock();
        let Some(flight) = state.in_flight.remove(node_id) else {
            return false;
        };
        flight.cancel.cancel();
        state.install_placeholder(node_id, TreeKind::Error, Some(CANCELLED_MESSAGE.to_string()));
        flight.done.send_replace(true);
        true
    }

    pub fn roots(&self) -> Vec<String> {
        self.lock().roots.clone()
    }

    pub fn node(&self, node_id: &str) -> Option<TreeNode> {
        self.lock().nodes.get(node_id).map(|node| (**node).clone())
    }

    pub fn is_fetched(&self, node_id: &str) -> Result<bool, TreeError> {
        let state = self.lock();
        let node = state.get(node_id)?;
        Ok(node.kind.is_container() && state.is_fetched(&node))
    }

    pub fn is_fetching(&self, node_id: &str) -> bool {
        self.lock().in_flight.contains_key(node_id)
    }

    /// Nested copy of every project tree, in root order.
    pub fn snapshot(&self) -> Vec<NodeView> {
        let state = self.lock();
        state
            .roots
            .iter()
            .filter_map(|id| state.view(id))
            .collect()
    }

    pub fn view(&self, node_id: &str) -> Option<NodeView> {
        self.lock().view(node_id)
    }

    /// `node_id` and its cached descendants, without placeholders.
    pub fn subtree(&self, node_id: &str) -> Result<Subtree, TreeError> {
        let state = self.lock();
        let root = state.get(node_id)?;
        let mut descendants = Vec::new();
        let mut complete = true;
        let mut stack: Vec<Arc<TreeNode>> = vec![Arc::clone(&root)];
        while let Some(node) = stack.pop() {
            if node.kind.is_container()
                && (!state.is_fetched(&node) || state.in_flight.contains_key(&node.node_id))
            {
                complete = false;
            }
            for child_id in node.children.iter().rev() {
                let Some(child) = state.nodes.get(child_id) else {
                    continue;
                };
                if child.kind.is_placeholder() {
                    continue;
                }
                stack.push(Arc::clone(child));
            }
            if node.node_id != root.node_id {
                descendants.push((*node).clone());
            }
        }
        Ok(Subtree {
            root: (*root).clone(),
            descendants,
            complete,
        })
    }

    fn begin_fetch(&self, node_id: &str) -> Result<Begin, TreeError> {
        let mut state = self.lock();
        let node = state.get(node_id)?;
        if !node.kind.is_container() {
            return Ok(Begin::Skip(Expansion::NotExpandable));
        }
        if state.in_flight.contains_key(node_id) {
            return Ok(Begin::Skip(Expansion::InFlight));
        }
        if state.is_fetched(&node) {
            return Ok(Begin::Skip(Expansion::AlreadyFetched));
        }

        state.install_placeholder(node_id, TreeKind::Loading, None);
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let cancel = CancellationToken::new();
        let (done, _) = watch::channel(false);
        state.in_flight.insert(
            node_id.to_string(),
            InFlight {
                ticket,
                cancel: cancel.clone(),
                done,
            },
        );
        debug!(node_id, ticket, "fetch started");
        Ok(Begin::Started(FetchRequest {
            project_id: node.project_id.clone(),
            folder: node.remote.clone(),
            ticket,
            cancel,
        }))
    }

    fn finish_fetch(
        &self,
        node_id: &str,
        ticket: u64,
        outcome: Option<Result<Vec<RemoteNode>, OsfError>>,
    ) -> Expansion {
        let mut state = self.lock();
        let current = state.in_flight.get(node_id).map(|flight| flight.ticket);
        if current != Some(ticket) || !state.nodes.contains_key(node_id) {
            debug!(node_id, ticket, "stale fetch result discarded");
            return Expansion::Discarded;
        }
        let Some(flight) = state.in_flight.remove(node_id) else {
            return Expansion::Discarded;
        };

        let expansion = match outcome {
            Some(Ok(children)) => {
                debug!(node_id, count = children.len(), "fetch finished");
                state.install_children(node_id, children);
                Expansion::Fetched
            }
            Some(Err(err)) => {
                let message = error_chain(&err);
                warn!(node_id, error = %message, "fetch failed");
                state.install_placeholder(node_id, TreeKind::Error, Some(message));
                Expansion::Failed
            }
            None => {
                state.install_placeholder(
                    node_id,
                    TreeKind::Error,
                    Some(CANCELLED_MESSAGE.to_string()),
                );
                Expansion::Failed
            }
        };
        flight.done.send_replace(true);
        expansion
    }

    fn reset(&self, node_id: &str) -> Result<bool, TreeError> {
        let mut state = self.lock();
        let node = state.get(node_id)?;
        if !node.kind.is_container() {
            return Ok(true);
        }
        if state.in_flight.contains_key(node_id) {
            return Ok(false);
        }
        state.install_placeholder(node_id, TreeKind::Loading, None);
        Ok(true)
    }

    fn error_parent(&self, error_node_id: &str) -> Result<String, TreeError> {
        let state = self.lock();
        let node = state.get(error_node_id)?;
        if node.kind != TreeKind::Error {
            return Err(TreeError::NotAnErrorNode(error_node_id.to_string()));
        }
        node.parent
            .clone()
            .ok_or_else(|| TreeError::NotAnErrorNode(error_node_id.to_string()))
    }

    fn scan_children(&self, node_id: &str) -> Result<Scan, TreeError> {
        let state = self.lock();
        let node = state.get(node_id)?;
        if state.sole_child_kind(&node) == Some(TreeKind::Error) {
            return Ok(Scan::Errored);
        }
        Ok(Scan::Containers(
            node.children
                .iter()
                .filter(|id| {
                    state
                        .nodes
                        .get(*id)
                        .is_some_and(|child| child.kind.is_container())
                })
                .cloned()
                .collect(),
        ))
    }

    fn subscribe(&self, node_id: &str) -> Option<watch::Receiver<bool>> {
        self.lock()
            .in_flight
            .get(node_id)
            .map(|flight| flight.done.subscribe())
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().expect("tree cache lock poisoned")
    }
}

impl TreeState {
    fn get(&self, node_id: &str) -> Result<Arc<TreeNode>, TreeError> {
        self.nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| TreeError::UnknownNode(node_id.to_string()))
    }

    fn sole_child_kind(&self, node: &TreeNode) -> Option<TreeKind> {
        match node.children.as_slice() {
            [only] => self.nodes.get(only).map(|child| child.kind),
            _ => None,
        }
    }

    /// Fetched unless the children are exactly one loading or error placeholder.
    fn is_fetched(&self, node: &TreeNode) -> bool {
        !self
            .sole_child_kind(node)
            .is_some_and(TreeKind::is_placeholder)
    }

    fn replace_children(&mut self, node_id: &str, children: Vec<String>) {
        if let Some(node) = self.nodes.get(node_id) {
            let mut updated = (**node).clone();
            updated.children = children;
            self.nodes.insert(node_id.to_string(), Arc::new(updated));
        }
    }

    fn install_placeholder(&mut self, node_id: &str, kind: TreeKind, error: Option<String>) {
        self.remove_descendants(node_id);
        let Some(parent) = self.nodes.get(node_id).cloned() else {
            return;
        };
        let placeholder_id = self.synthetic_id(kind);
        let placeholder = TreeNode::placeholder(kind, placeholder_id.clone(), &parent, error);
        self.nodes.insert(placeholder_id.clone(), Arc::new(placeholder));
        self.replace_children(node_id, vec![placeholder_id]);
    }

    fn install_children(&mut self, node_id: &str, children: Vec<RemoteNode>) {
        self.remove_descendants(node_id);
        let mut ids = Vec::with_capacity(children.len());
        for remote in children {
            let child = TreeNode::from_remote(node_id, remote);
            let child_id = child.node_id.clone();
            let moved_from = self.nodes.get(&child_id).and_then(|old| old.parent.clone());
            if let Some(moved_from) = moved_from {
                self.remove_descendants(&child_id);
                self.detach_child(&moved_from, &child_id);
                debug!(node_id = %child_id, from = %moved_from, to = node_id, "node moved");
            }
            let is_folder = child.kind == TreeKind::Folder;
            self.nodes.insert(child_id.clone(), Arc::new(child));
            if is_folder {
                self.install_placeholder(&child_id, TreeKind::Loading, None);
            }
            ids.push(child_id);
        }
        self.replace_children(node_id, ids);
    }

    fn detach_child(&mut self, parent_id: &str, child_id: &str) {
        let Some(parent) = self.nodes.get(parent_id) else {
            return;
        };
        let remaining: Vec<String> = parent
            .children
            .iter()
            .filter(|id| *id != child_id)
            .cloned()
            .collect();
        self.replace_children(parent_id, remaining);
    }

    /// Removes `node_id` and the nodes below it that still name their
    /// listed parent, so a node moved elsewhere survives.
    fn remove_subtree(&mut self, node_id: &str, include_root: bool) {
        let mut stack: Vec<(String, Option<String>)> = vec![(node_id.to_string(), None)];
        while let Some((id, listed_under)) = stack.pop() {
            let Some(node) = self.nodes.get(&id).cloned() else {
                continue;
            };
            if listed_under.is_some() && node.parent != listed_under {
                continue;
            }
            if id != node_id || include_root {
                if let Some(flight) = self.in_flight.remove(&id) {
                    flight.cancel.cancel();
                    flight.done.send_replace(true);
                }
                self.nodes.remove(&id);
            }
            stack.extend(
                node.children
                    .iter()
                    .map(|child| (child.clone(), Some(id.clone()))),
            );
        }
    }

    fn remove_descendants(&mut self, node_id: &str) {
        self.remove_subtree(node_id, false);
        self.replace_children(node_id, Vec::new());
    }

    fn synthetic_id(&mut self, kind: TreeKind) -> String {
        self.next_synthetic += 1;
        let prefix = match kind {
            TreeKind::Error => "error",
            _ => "loading",
        };
        format!("~{prefix}-{}", self.next_synthetic)
    }

    fn view(&self, node_id: &str) -> Option<NodeView> {
        let node = self.nodes.get(node_id)?;
        Some(NodeView {
            project_id: node.project_id.clone(),
            node_id: node.node_id.clone(),
            label: node.label.clone(),
            kind: node.kind,
            error: node.error.clone(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.view(child))
                .collect(),
        })
    }
}
