//! Detection of short public download links.
//!
//! The store hands out two kinds of download links for files: internal API
//! links that need credentials, and short public links built around a
//! five-character GUID (`/download/<guid>/` or `/<guid>/download/`). Nothing
//! upstream documents the short form, so this matcher is tied to the link
//! format the service currently emits and may need updating if it changes.

use url::Url;

const PUBLIC_GUID_LEN: usize = 5;

pub fn public_download_link(href: &Url) -> Option<Url> {
    let segments: Vec<&str> = href.path_segments()?.filter(|s| !s.is_empty()).collect();
    let token = match segments.as_slice() {
        ["download", token] | [token, "download"] => *token,
        _ => return None,
    };
    is_public_guid(token).then(|| href.clone())
}

fn is_public_guid(token: &str) -> bool {
    token.len() == PUBLIC_GUID_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric())
}
