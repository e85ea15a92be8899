use std::error::Error as StdError;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum OsfError {
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        cause: TransientFailure,
    },
    #[error("remote request failed with {status}: {body}")]
    RemoteRequestFailed { status: StatusCode, body: String },
    #[error("malformed response from {url}")]
    MalformedResponse {
        url: Url,
        #[source]
        source: serde_json::Error,
    },
    #[error("path resolution failed")]
    PathResolutionFailed(#[from] PathFailure),
    #[error("{path} exists and overwrite is disabled")]
    WriteConflict { path: String },
    #[error("response body from {url} timed out")]
    BodyTimeout { url: Url },
    #[error("no access token available")]
    MissingToken,
    #[error("request body cannot be replayed for retries")]
    UnclonableRequest,
    #[error("request failed")]
    Request(#[from] reqwest::Error),
    #[error("invalid url")]
    Url(#[from] url::ParseError),
}

/// Failure of a single attempt that the transport is allowed to retry.
#[derive(Debug, Error)]
pub enum TransientFailure {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("attempt timed out")]
    Timeout,
    #[error("network failure")]
    Network(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PathFailure {
    #[error("node not found at {path}")]
    NotFound { path: String },
    #[error("expected folder, found file at {path}")]
    ExpectedFolder { path: String },
    #[error("expected file, found folder at {path}")]
    ExpectedFile { path: String },
    #[error("invalid path: {path:?}")]
    InvalidPath { path: String },
    #[error("failed to create folder {path}")]
    CreateFolder {
        path: String,
        #[source]
        source: Box<OsfError>,
    },
    #[error("{node} has no {link} link")]
    MissingLink { node: String, link: &'static str },
}

impl OsfError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            OsfError::RemoteRequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Renders an error and every `source()` below it as `outer: inner: ...`.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_walks_nested_sources() {
        let err = OsfError::PathResolutionFailed(PathFailure::CreateFolder {
            path: "/a/b".into(),
            source: Box::new(OsfError::RemoteRequestFailed {
                status: StatusCode::FORBIDDEN,
                body: "denied".into(),
            }),
        });

        assert_eq!(
            error_chain(&err),
            "path resolution failed: failed to create folder /a/b: \
             remote request failed with 403 Forbidden: denied"
        );
    }

    #[test]
    fn retries_exhausted_names_last_cause() {
        let err = OsfError::RetriesExhausted {
            attempts: 5,
            cause: TransientFailure::RateLimited,
        };
        assert_eq!(
            error_chain(&err),
            "retries exhausted after 5 attempts: rate limited (429)"
        );
    }
}
