use reqwest::{Method, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::client::{Envelope, OsfClient};
use crate::error::OsfError;

/// One page of a cursor-paginated listing.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<Url>,
}

impl OsfClient {
    /// Drains a listing into one ordered collection.
    ///
    /// Pages are requested one after another and merged in server order.
    /// With `follow_pagination` off only the first page is read. Any failing
    /// page fails the whole call and nothing collected so far is returned.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        start_url: Url,
        follow_pagination: bool,
    ) -> Result<Vec<T>, OsfError> {
        let mut items = Vec::new();
        let mut pages = 0usize;
        let mut next = Some(start_url);
        while let Some(url) = next.take() {
            let page: Page<T> = self.get_json(url).await?;
            pages += 1;
            items.extend(page.data);
            if follow_pagination {
                next = page.links.next;
            }
        }
        debug!(pages, items = items.len(), "listing drained");
        Ok(items)
    }

    /// Fetches a single `{ "data": ... }` document.
    pub async fn fetch_one<T: DeserializeOwned>(&self, url: Url) -> Result<T, OsfError> {
        let envelope: Envelope<T> = self.get_json(url).await?;
        Ok(envelope.data)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, OsfError> {
        let response = self.send(self.request(Method::GET, url.clone())?).await?;
        self.decode(url, response).await
    }

    /// Fails on non-2xx, keeping the (time-bounded) body for the error.
    pub(crate) async fn ensure_success(&self, response: Response) -> Result<Response, OsfError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let limit = self.transport().policy().attempt_timeout;
        let body = match tokio::time::timeout(limit, response.text()).await {
            Ok(Ok(body)) => body,
            Ok(Err(_)) | Err(_) => String::new(),
        };
        Err(OsfError::RemoteRequestFailed { status, body })
    }

    /// Reads a successful body within the per-attempt timeout.
    pub(crate) async fn read_body(&self, url: &Url, response: Response) -> Result<Vec<u8>, OsfError> {
        let limit = self.transport().policy().attempt_timeout;
        match tokio::time::timeout(limit, response.bytes()).await {
            Ok(body) => Ok(body?.to_vec()),
            Err(_) => Err(OsfError::BodyTimeout { url: url.clone() }),
        }
    }

    pub(crate) async fn decode<T: DeserializeOwned>(
        &self,
        url: Url,
        response: Response,
    ) -> Result<T, OsfError> {
        let response = self.ensure_success(response).await?;
        let body = self.read_body(&url, response).await?;
        serde_json::from_slice(&body).map_err(|source| OsfError::MalformedResponse { url, source })
    }
}
