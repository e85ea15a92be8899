use reqwest::Method;
use tracing::{debug, info};
use url::Url;

use crate::client::{NodeKind, OsfClient, RemoteNode};
use crate::error::{OsfError, PathFailure};

/// Splits a slash-separated path into segments, ignoring empty ones.
pub fn split_path(path: &str) -> Result<Vec<&str>, PathFailure> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| matches!(*s, "." | "..")) {
        return Err(PathFailure::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

impl OsfClient {
    /// Walks `path` from the project root one listing at a time.
    ///
    /// Every segment but the last must be a folder; the last may be either.
    /// An empty path yields the root folder itself.
    pub async fn resolve_path(&self, project_id: &str, path: &str) -> Result<RemoteNode, OsfError> {
        let segments = split_path(path)?;
        let mut current = self.project_root(project_id).await?;
        let mut walked = String::new();
        for (idx, segment) in segments.iter().enumerate() {
            walked.push('/');
            walked.push_str(segment);
            let children = self.list_folder(&current).await?;
            let found = find_child(children, segment).ok_or_else(|| PathFailure::NotFound {
                path: walked.clone(),
            })?;
            let is_last = idx + 1 == segments.len();
            if !is_last && found.kind == NodeKind::File {
                return Err(PathFailure::ExpectedFolder { path: walked }.into());
            }
            current = found;
        }
        Ok(current)
    }

    /// Returns the folder at `dir_path`, creating missing folders on the way.
    ///
    /// A failed creation aborts the walk; folders created before it stay.
    pub async fn ensure_path(&self, project_id: &str, dir_path: &str) -> Result<RemoteNode, OsfError> {
        let segments = split_path(dir_path)?;
        self.ensure_segments(project_id, &segments).await
    }

    /// Uploads `content` to `path`, creating parent folders as needed.
    pub async fn put_file(
        &self,
        project_id: &str,
        path: &str,
        content: Vec<u8>,
        overwrite: bool,
    ) -> Result<(), OsfError> {
        let segments = split_path(path)?;
        let Some((name, dirs)) = segments.split_last() else {
            return Err(PathFailure::InvalidPath {
                path: path.to_string(),
            }
            .into());
        };
        let target = format!("/{}", segments.join("/"));
        let parent = self.ensure_segments(project_id, dirs).await?;
        let children = self.list_folder(&parent).await?;

        let url = match find_child(children, name) {
            Some(existing) if existing.kind == NodeKind::Folder => {
                return Err(PathFailure::ExpectedFile { path: target }.into());
            }
            Some(_) if !overwrite => return Err(OsfError::WriteConflict { path: target }),
            Some(existing) => required_link(&existing, existing.links.upload.as_ref(), "upload")?,
            None => {
                let mut url = required_link(&parent, parent.links.upload.as_ref(), "upload")?;
                url.query_pairs_mut().append_pair("name", name);
                url
            }
        };

        let size = content.len();
        let response = self
            .send(self.request(Method::PUT, url)?.body(content))
            .await?;
        self.ensure_success(response).await?;
        info!(project_id, path = %target, size, "file uploaded");
        Ok(())
    }

    pub async fn write_file(
        &self,
        project_id: &str,
        path: &str,
        content: Vec<u8>,
        overwrite: bool,
    ) -> Result<(), OsfError> {
        self.put_file(project_id, path, content, overwrite).await
    }

    pub async fn read_file(
        &self,
        project_id: &str,
        path: &str,
    ) -> Result<(Vec<u8>, RemoteNode), OsfError> {
        let node = self.resolve_path(project_id, path).await?;
        if node.kind != NodeKind::File {
            return Err(PathFailure::ExpectedFile { path: node.path }.into());
        }
        let url = required_link(&node, node.links.download.as_ref(), "download")?;
        let response = self.send(self.request(Method::GET, url.clone())?).await?;
        let response = self.ensure_success(response).await?;
        let content = self.read_body(&url, response).await?;
        Ok((content, node))
    }

    async fn ensure_segments(
        &self,
        project_id: &str,
        segments: &[&str],
    ) -> Result<RemoteNode, OsfError> {
        let mut current = self.project_root(project_id).await?;
        let mut walked = String::new();
        for segment in segments {
            walked.push('/');
            walked.push_str(segment);
            let children = self.list_folder(&current).await?;
            current = match find_child(children, segment) {
                Some(found) if found.kind == NodeKind::File => {
                    return Err(PathFailure::ExpectedFolder { path: walked }.into());
                }
                Some(found) => found,
                None => self.create_folder(&current, segment, &walked).await?,
            };
        }
        Ok(current)
    }

    async fn create_folder(
        &self,
        parent: &RemoteNode,
        name: &str,
        walked: &str,
    ) -> Result<RemoteNode, OsfError> {
        let created: Result<RemoteNode, OsfError> = async {
            let mut url = required_link(parent, parent.links.new_folder.as_ref(), "new_folder")?;
            url.query_pairs_mut().append_pair("name", name);
            let response = self.send(self.request(Method::PUT, url)?).await?;
            self.ensure_success(response).await?;
            // The creation response is not trusted for links; re-list instead.
            let children = self.list_folder(parent).await?;
            find_child(children, name)
                .filter(RemoteNode::is_folder)
                .ok_or_else(|| {
                    OsfError::from(PathFailure::NotFound {
                        path: walked.to_string(),
                    })
                })
        }
        .await;

        match created {
            Ok(folder) => {
                debug!(path = walked, id = %folder.id, "folder created");
                Ok(folder)
            }
            Err(source) => Err(PathFailure::CreateFolder {
                path: walked.to_string(),
                source: Box::new(source),
            }
            .into()),
        }
    }
}

fn find_child(children: Vec<RemoteNode>, name: &str) -> Option<RemoteNode> {
    children.into_iter().find(|child| child.name == name)
}

fn required_link(node: &RemoteNode, link: Option<&Url>, kind: &'static str) -> Result<Url, OsfError> {
    link.cloned().ok_or_else(|| {
        PathFailure::MissingLink {
            node: node.path.clone(),
            link: kind,
        }
        .into()
    })
}
