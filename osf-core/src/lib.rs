mod auth;
mod client;
mod download_link;
mod error;
mod paging;
mod paths;
mod timestamp;
mod transport;

pub use auth::{StaticToken, TokenSource};
pub use client::{
    DEFAULT_PROVIDER, NodeKind, NodeLinks, OsfClient, ProjectInfo, RemoteNode, UserInfo,
};
pub use download_link::public_download_link;
pub use error::{OsfError, PathFailure, TransientFailure, error_chain};
pub use paging::{Page, PageLinks};
pub use paths::split_path;
pub use timestamp::parse_timestamp;
pub use transport::{RetryPolicy, Transport};

pub use reqwest::StatusCode;
