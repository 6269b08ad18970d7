//! HTTP client for the remote document store
//!
//! Documents live at `{base_url}/users/{user_id}`. `GET` reads, `PUT`
//! replaces. Successful reads and writes populate an in-process cache that
//! serves [`RemoteStore::fetch`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url, header};

use super::error::RemoteError;
use super::{RemoteDocument, RemoteStore};

/// Remote store client over HTTP
pub struct HttpRemote {
    /// HTTP client
    client: Client,
    /// Base URL; documents live below it
    base_url: Url,
    /// Bearer token, if the store requires one
    token: Option<String>,
    /// Last known document per user
    cache: Mutex<HashMap<String, Option<RemoteDocument>>>,
}

impl HttpRemote {
    /// Request timeout
    const TIMEOUT: Duration = Duration::from_secs(30);
    /// Retry-After fallback when the header is missing or unparseable
    const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

    /// Create a client for the store at `base_url`
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(Self::TIMEOUT).build()?;
        let base_url: String = base_url.into();
        let base_url = Url::parse(&base_url)
            .map_err(|e| RemoteError::InvalidArgument(format!("remote URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidArgument(format!("remote URL {base_url} has no path")));
        }

        Ok(Self { client, base_url, token, cache: Mutex::new(HashMap::new()) })
    }

    /// `{base_url}/users/{user_id}`, with the id encoded as one path segment
    fn document_url(&self, user_id: &str) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidArgument(format!("remote URL {} has no path", self.base_url)))?
            .pop_if_empty()
            .push("users")
            .push(user_id);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn cached(&self, user_id: &str) -> Option<Option<RemoteDocument>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).get(user_id).cloned()
    }

    fn remember(&self, user_id: &str, doc: Option<RemoteDocument>) {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).insert(user_id.to_string(), doc);
    }

    async fn get(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        let response = self
            .authorized(self.client.get(self.document_url(user_id)?))
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            self.remember(user_id, None);
            return Ok(None);
        }

        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        let doc: RemoteDocument = serde_json::from_str(&body)?;
        self.remember(user_id, Some(doc.clone()));
        Ok(Some(doc))
    }

    /// Turn an error response into a classified [`RemoteError`]
    async fn check_status(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let message = response.text().await.unwrap_or_default();
        Err(error_for_status(status, retry_after, message))
    }
}

/// Map an HTTP error status onto the remote error taxonomy
pub fn error_for_status(status: StatusCode, retry_after: Option<u64>, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::PermissionDenied(message),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::InvalidArgument(message)
        }
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(
                retry_after.unwrap_or(HttpRemote::DEFAULT_RETRY_AFTER_SECS),
            )),
        },
        s if s.is_server_error() => RemoteError::Unavailable(format!("{}: {}", s, message)),
        s => RemoteError::Other { status: s.as_u16(), message },
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        if let Some(doc) = self.cached(user_id) {
            return Ok(doc);
        }
        self.get(user_id).await
    }

    async fn fetch_fresh(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        self.get(user_id).await
    }

    async fn write(&self, user_id: &str, doc: &RemoteDocument) -> Result<(), RemoteError> {
        let response = self
            .authorized(self.client.put(self.document_url(user_id)?))
            .json(doc)
            .send()
            .await?;

        Self::check_status(response).await?;
        self.remember(user_id, Some(doc.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_sits_below_base_url() {
        let remote = HttpRemote::new("https://sync.example.com/api/", None).unwrap();
        assert_eq!(remote.document_url("u1").unwrap().as_str(), "https://sync.example.com/api/users/u1");

        let bare = HttpRemote::new("https://sync.example.com", None).unwrap();
        assert_eq!(bare.document_url("u1").unwrap().as_str(), "https://sync.example.com/users/u1");
    }

    #[test]
    fn user_id_is_encoded_as_one_segment() {
        let remote = HttpRemote::new("https://sync.example.com/api", None).unwrap();
        assert_eq!(
            remote.document_url("a/b c?").unwrap().as_str(),
            "https://sync.example.com/api/users/a%2Fb%20c%3F"
        );
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        assert!(matches!(HttpRemote::new("not a url", None), Err(RemoteError::InvalidArgument(_))));
        assert!(matches!(HttpRemote::new("mailto:a@b.c", None), Err(RemoteError::InvalidArgument(_))));
    }

    #[test]
    fn statuses_map_to_error_classes() {
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, None, String::new()),
            RemoteError::PermissionDenied(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::PAYLOAD_TOO_LARGE, None, String::new()),
            RemoteError::InvalidArgument(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE, None, String::new()),
            RemoteError::Unavailable(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::IM_A_TEAPOT, None, String::new()),
            RemoteError::Other { status: 418, .. }
        ));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        match error_for_status(StatusCode::TOO_MANY_REQUESTS, Some(12), String::new()) {
            RemoteError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cache_serves_plain_fetch() {
        let remote = HttpRemote::new("http://127.0.0.1:9", None).unwrap();
        assert!(remote.cached("u1").is_none());
        remote.remember("u1", None);
        assert_eq!(remote.cached("u1"), Some(None));
    }
}
