use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::auth::{StaticToken, TokenSource};
use crate::download_link::public_download_link;
use crate::error::{OsfError, PathFailure};
use crate::timestamp;
use crate::transport::{RetryPolicy, Transport};

const DEFAULT_BASE_URL: &str = "https://api.osf.io";
pub const DEFAULT_PROVIDER: &str = "osfstorage";

#[derive(Clone)]
pub struct OsfClient {
    transport: Transport,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    provider: String,
}

impl OsfClient {
    pub fn new(token: impl Into<String>) -> Result<Self, OsfError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, OsfError> {
        Self::with_token_source(base_url, Arc::new(StaticToken::new(token)))
    }

    pub fn with_token_source(
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, OsfError> {
        Ok(Self {
            transport: Transport::default(),
            base_url: Url::parse(base_url)?,
            tokens,
            provider: DEFAULT_PROVIDER.to_string(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.transport = Transport::with_http(self.transport.http().clone(), policy);
        self
    }

    /// Storage provider whose root acts as the project's root folder.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn current_user(&self) -> Result<UserInfo, OsfError> {
        let data: UserData = self.fetch_one(self.endpoint("/v2/users/me/")?).await?;
        Ok(data.into())
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectInfo>, OsfError> {
        let nodes: Vec<NodeData> = self.fetch_all(self.endpoint("/v2/nodes/")?, true).await?;
        Ok(nodes.into_iter().map(ProjectInfo::from).collect())
    }

    pub async fn get_project(&self, project_id: &str) -> Result<ProjectInfo, OsfError> {
        let url = self.endpoint(&format!("/v2/nodes/{project_id}/"))?;
        let data: NodeData = self.fetch_one(url).await?;
        Ok(data.into())
    }

    pub async fn create_project(&self, title: &str) -> Result<ProjectInfo, OsfError> {
        let url = self.endpoint("/v2/nodes/")?;
        let body = CreateNodeRequest {
            data: CreateNodeData {
                kind: "nodes",
                attributes: CreateNodeAttributes {
                    title,
                    category: "project",
                },
            },
        };
        let response = self.send(self.request(Method::POST, url.clone())?.json(&body)).await?;
        let envelope: Envelope<NodeData> = self.decode(url, response).await?;
        let project = ProjectInfo::from(envelope.data);
        info!(project_id = %project.id, title, "created project");
        Ok(project)
    }

    /// Root folder of the configured storage provider for `project_id`.
    pub async fn project_root(&self, project_id: &str) -> Result<RemoteNode, OsfError> {
        let url = self.endpoint(&format!("/v2/nodes/{project_id}/files/"))?;
        let providers: Vec<FileData> = self.fetch_all(url, true).await?;
        providers
            .into_iter()
            .find(|data| {
                data.attributes.provider.as_deref() == Some(self.provider.as_str())
                    || data.attributes.name == self.provider
            })
            .map(|data| RemoteNode::from_wire(project_id, data))
            .ok_or_else(|| {
                PathFailure::NotFound {
                    path: format!("{project_id}:{}", self.provider),
                }
                .into()
            })
    }

    /// One level of children; `None` lists the project's root folder.
    pub async fn list_children(
        &self,
        project_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<RemoteNode>, OsfError> {
        let folder = match folder_id {
            None => self.project_root(project_id).await?,
            Some(id) => self.get_node(project_id, id).await?,
        };
        if folder.kind == NodeKind::File {
            return Err(PathFailure::ExpectedFolder { path: folder.path }.into());
        }
        self.list_folder(&folder).await
    }

    pub async fn get_node(&self, project_id: &str, node_id: &str) -> Result<RemoteNode, OsfError> {
        let url = self.endpoint(&format!("/v2/files/{node_id}/"))?;
        let data: FileData = self.fetch_one(url).await?;
        Ok(RemoteNode::from_wire(project_id, data))
    }

    /// Full child listing of an already known folder, following its listing link.
    pub async fn list_folder(&self, folder: &RemoteNode) -> Result<Vec<RemoteNode>, OsfError> {
        let url = folder
            .links
            .children
            .clone()
            .ok_or_else(|| PathFailure::MissingLink {
                node: folder.path.clone(),
                link: "children",
            })?;
        let items: Vec<FileData> = self.fetch_all(url, true).await?;
        Ok(items
            .into_iter()
            .map(|data| RemoteNode::from_wire(&folder.project_id, data))
            .collect())
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, OsfError> {
        let token = self.tokens.access_token().ok_or(OsfError::MissingToken)?;
        Ok(self.transport.http().request(method, url).bearer_auth(token))
    }

    pub(crate) async fn send(&self, builder: RequestBuilder) -> Result<Response, OsfError> {
        self.transport.execute(builder.build()?).await
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    fn endpoint(&self, path: &str) -> Result<Url, OsfError> {
        Ok(self.base_url.join(path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub public: bool,
    pub created: Option<i64>,
    pub modified: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// A file or folder as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: Option<u64>,
    /// Materialized, human-readable path such as `/a/b/`.
    pub path: String,
    pub created: Option<i64>,
    pub modified: Option<i64>,
    pub last_touched: Option<i64>,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    /// Short public link, only for files that have one.
    pub download_link: Option<Url>,
    pub links: NodeLinks,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLinks {
    pub children: Option<Url>,
    pub upload: Option<Url>,
    pub new_folder: Option<Url>,
    pub download: Option<Url>,
}

impl RemoteNode {
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub(crate) fn from_wire(project_id: &str, data: FileData) -> Self {
        let FileData {
            id,
            attributes,
            relationships,
            links,
        } = data;
        let hashes = attributes.extra.hashes.unwrap_or_default();
        let path = attributes
            .materialized_path
            .or(attributes.path)
            .unwrap_or_else(|| format!("/{}", attributes.name));
        let download_link = match attributes.kind {
            NodeKind::File => links.download.as_ref().and_then(public_download_link),
            NodeKind::Folder => None,
        };
        Self {
            id,
            project_id: project_id.to_string(),
            name: attributes.name,
            kind: attributes.kind,
            size: attributes.size,
            path,
            created: attributes.date_created,
            modified: attributes.date_modified,
            last_touched: attributes.last_touched,
            md5: hashes.md5,
            sha256: hashes.sha256,
            download_link,
            links: NodeLinks {
                children: relationships
                    .files
                    .and_then(|rel| rel.links.related)
                    .map(|related| related.href),
                upload: links.upload,
                new_folder: links.new_folder,
                download: links.download,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
    attributes: UserAttributes,
}

#[derive(Debug, Deserialize)]
struct UserAttributes {
    full_name: String,
}

impl From<UserData> for UserInfo {
    fn from(data: UserData) -> Self {
        Self {
            id: data.id,
            full_name: data.attributes.full_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeData {
    id: String,
    attributes: NodeAttributes,
}

#[derive(Debug, Deserialize)]
struct NodeAttributes {
    title: String,
    #[serde(default)]
    description: Option<String>,
    category: String,
    #[serde(default)]
    public: bool,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    date_created: Option<i64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    date_modified: Option<i64>,
}

impl From<NodeData> for ProjectInfo {
    fn from(data: NodeData) -> Self {
        let NodeAttributes {
            title,
            description,
            category,
            public,
            date_created,
            date_modified,
        } = data.attributes;
        Self {
            id: data.id,
            title,
            description: description.filter(|d| !d.is_empty()),
            category,
            public,
            created: date_created,
            modified: date_modified,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileData {
    id: String,
    attributes: FileAttributes,
    #[serde(default)]
    relationships: FileRelationships,
    #[serde(default)]
    links: FileLinks,
}

#[derive(Debug, Deserialize)]
struct FileAttributes {
    kind: NodeKind,
    name: String,
    #[serde(default)]
    materialized_path: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    date_created: Option<i64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    date_modified: Option<i64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    last_touched: Option<i64>,
    #[serde(default)]
    extra: FileExtra,
}

#[derive(Debug, Default, Deserialize)]
struct FileExtra {
    #[serde(default)]
    hashes: Option<FileHashes>,
}

#[derive(Debug, Default, Deserialize)]
struct FileHashes {
    #[serde(default)]
    md5: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRelationships {
    #[serde(default)]
    files: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    links: RelationshipLinks,
}

#[derive(Debug, Deserialize)]
struct RelationshipLinks {
    #[serde(default)]
    related: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: Url,
}

#[derive(Debug, Default, Deserialize)]
struct FileLinks {
    #[serde(default)]
    upload: Option<Url>,
    #[serde(default)]
    new_folder: Option<Url>,
    #[serde(default)]
    download: Option<Url>,
}

#[derive(Debug, Serialize)]
struct CreateNodeRequest<'a> {
    data: CreateNodeData<'a>,
}

#[derive(Debug, Serialize)]
struct CreateNodeData<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: CreateNodeAttributes<'a>,
}

#[derive(Debug, Serialize)]
struct CreateNodeAttributes<'a> {
    title: &'a str,
    category: &'static str,
}
