//! JSON-over-HTTP remote store.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Call               | Request                                   |
//! |--------------------|-------------------------------------------|
//! | fetch collection   | `GET {collection}`                        |
//! | set quantity       | `PUT {collection}/items/{key}` `{quantity}` |
//! | remove             | `DELETE {collection}/items/{key}`         |
//! | coupon lookup      | `GET coupons/{code}`                      |

use std::sync::Arc;
use std::time::Duration;

use cartsync_core::{
    CollectionKind, DiscountRule, ItemKey, MutationOutcome, RemoteChange, RemoteRecord,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{RemoteError, RemoteStore};
use crate::auth::Credentials;

/// Client for a cart/wishlist HTTP API.
#[derive(Clone)]
pub struct HttpRemoteStore {
    inner: Arc<HttpRemoteStoreInner>,
}

struct HttpRemoteStoreInner {
    client: reqwest::Client,
    base_url: Url,
    collection: CollectionKind,
    credentials: Credentials,
}

#[derive(Serialize)]
struct QuantityBody {
    quantity: u32,
}

impl HttpRemoteStore {
    /// Create a client for one collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: Url,
        collection: CollectionKind,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RemoteError::from)?;

        // Url::join drops the last path segment unless it ends in '/'
        let base_url = if base_url.path().ends_with('/') {
            base_url
        } else {
            let mut url = base_url;
            let path = format!("{}/", url.path());
            url.set_path(&path);
            url
        };

        Ok(Self {
            inner: Arc::new(HttpRemoteStoreInner {
                client,
                base_url,
                collection,
                credentials,
            }),
        })
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| RemoteError::Network(format!("invalid url {path}: {e}")))
    }

    fn item_path(&self, key: &ItemKey) -> String {
        format!("{}/items/{}", self.inner.collection.path(), encode_segment(key.as_str()))
    }

    /// Attach the bearer token, if the session has one.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        self.inner
            .credentials
            .with_bearer(|token| match token {
                Some(token) => request.bearer_auth(token),
                None => request,
            })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Remote store returned non-success status"
            );
            if status == StatusCode::NOT_FOUND {
                return Err(RemoteError::NotFound(body.chars().take(200).collect()));
            }
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %text.chars().take(500).collect::<String>(),
                "Failed to parse remote store response"
            );
            RemoteError::from(e)
        })
    }
}

impl RemoteStore for HttpRemoteStore {
    #[instrument(skip(self), fields(collection = %self.inner.collection))]
    async fn fetch_collection(&self) -> Result<Vec<RemoteRecord>, RemoteError> {
        let url = self.url(self.inner.collection.path())?;
        let response = self.send(self.inner.client.get(url)).await?;
        let records: Vec<RemoteRecord> = Self::decode(response).await?;
        debug!(count = records.len(), "Fetched collection");
        Ok(records)
    }

    #[instrument(skip(self), fields(collection = %self.inner.collection, key = %key))]
    async fn apply_mutation(
        &self,
        key: &ItemKey,
        change: RemoteChange,
    ) -> Result<MutationOutcome, RemoteError> {
        let url = self.url(&self.item_path(key))?;
        match change {
            RemoteChange::Set(quantity) => {
                let request = self.inner.client.put(url).json(&QuantityBody { quantity });
                let response = self.send(request).await?;
                // Servers answer 204 when a zero quantity deleted the line
                if response.status() == StatusCode::NO_CONTENT {
                    return Ok(MutationOutcome::Removed);
                }
                Ok(MutationOutcome::Updated(Self::decode(response).await?))
            }
            RemoteChange::Remove => match self.send(self.inner.client.delete(url)).await {
                Ok(_) | Err(RemoteError::NotFound(_)) => Ok(MutationOutcome::Removed),
                Err(e) => Err(e),
            },
        }
    }

    #[instrument(skip(self))]
    async fn fetch_coupon(&self, code: &str) -> Result<Option<DiscountRule>, RemoteError> {
        let url = self.url(&format!("coupons/{}", encode_segment(code)))?;
        match self.send(self.inner.client.get(url)).await {
            Ok(response) => Ok(Some(Self::decode(response).await?)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Percent-encode a single path segment.
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}
