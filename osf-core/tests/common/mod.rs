#![allow(dead_code)]

use std::time::Duration;

use osf_core::{OsfClient, RetryPolicy};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PROJECT: &str = "proj1";

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(2), Duration::from_millis(10))
}

pub fn client(server: &MockServer) -> OsfClient {
    OsfClient::with_base_url(&server.uri(), "test-token")
        .unwrap()
        .with_retry_policy(fast_policy())
}

pub fn listing_path(project: &str, folder: Option<&str>) -> String {
    match folder {
        Some(id) => format!("/v2/nodes/{project}/files/osfstorage/{id}/"),
        None => format!("/v2/nodes/{project}/files/osfstorage/"),
    }
}

pub fn page(items: Vec<Value>, next: Option<String>) -> Value {
    let total = items.len();
    json!({
        "data": items,
        "links": { "next": next },
        "meta": { "total": total }
    })
}

pub fn provider(uri: &str, project: &str) -> Value {
    json!({
        "id": format!("{project}:osfstorage"),
        "type": "files",
        "attributes": {
            "kind": "folder",
            "name": "osfstorage",
            "path": "/",
            "provider": "osfstorage",
            "node": project
        },
        "relationships": {
            "files": {
                "links": {
                    "related": { "href": format!("{uri}{}", listing_path(project, None)), "meta": {} }
                }
            }
        },
        "links": {
            "upload": format!("{uri}/wb/{project}/root/"),
            "new_folder": format!("{uri}/wb/{project}/root/?kind=folder")
        }
    })
}

pub fn folder(uri: &str, project: &str, id: &str, name: &str, materialized: &str) -> Value {
    json!({
        "id": id,
        "type": "files",
        "attributes": {
            "kind": "folder",
            "name": name,
            "path": format!("/{id}/"),
            "materialized_path": materialized,
            "provider": "osfstorage",
            "size": null,
            "date_created": null,
            "date_modified": null,
            "extra": {}
        },
        "relationships": {
            "files": {
                "links": {
                    "related": { "href": format!("{uri}{}", listing_path(project, Some(id))), "meta": {} }
                }
            }
        },
        "links": {
            "upload": format!("{uri}/wb/{project}/{id}/"),
            "new_folder": format!("{uri}/wb/{project}/{id}/?kind=folder")
        }
    })
}

pub fn file(uri: &str, project: &str, id: &str, name: &str, materialized: &str) -> Value {
    json!({
        "id": id,
        "type": "files",
        "attributes": {
            "kind": "file",
            "name": name,
            "path": format!("/{id}"),
            "materialized_path": materialized,
            "provider": "osfstorage",
            "size": 12,
            "date_created": "2024-01-01T00:00:00.000000",
            "date_modified": "2024-01-02T00:00:00Z",
            "last_touched": null,
            "extra": {
                "hashes": { "md5": "d41d8cd98f00b204e9800998ecf8427e", "sha256": "e3b0c442" }
            }
        },
        "links": {
            "upload": format!("{uri}/wb/{project}/{id}"),
            "download": format!("{uri}/dl/{id}")
        }
    })
}

pub async fn mount_providers(server: &MockServer, project: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/nodes/{project}/files/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![provider(&server.uri(), project)],
            None,
        )))
        .mount(server)
        .await;
}

pub async fn mount_listing(server: &MockServer, project: &str, folder: Option<&str>, items: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(listing_path(project, folder)))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(items, None)))
        .mount(server)
        .await;
}
