//! A local HTTP server speaking the remote store protocol.
//!
//! Routes (mounted under `/api`):
//! - `GET /{collection}` - list lines
//! - `PUT /{collection}/items/{key}` - set quantity (`{"quantity": n}`)
//! - `DELETE /{collection}/items/{key}` - remove a line
//! - `GET /coupons/{code}` - look up a coupon
//!
//! Every route requires `Authorization: Bearer {token}`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use cartsync_core::{DiscountRule, ProductListing, RemoteRecord};
use serde::Deserialize;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Default)]
struct FakeInner {
    token: String,
    catalog: BTreeMap<String, ProductListing>,
    /// `(collection, key) -> quantity`
    lines: BTreeMap<(String, String), u32>,
    coupons: HashMap<String, DiscountRule>,
    /// `"METHOD path"` per request, in arrival order.
    requests: Vec<String>,
}

impl FakeInner {
    fn record(&self, key: &str, quantity: u32) -> Option<RemoteRecord> {
        self.catalog.get(key).map(|listing| RemoteRecord {
            key: listing.key.clone(),
            quantity,
            unit_price: listing.unit_price,
            original_unit_price: listing.original_unit_price,
            stock_limit: listing.stock_limit,
        })
    }
}

type Shared = Arc<Mutex<FakeInner>>;

#[derive(Deserialize)]
struct QuantityBody {
    quantity: u32,
}

/// Running fake server. Stops when dropped.
pub struct FakeRemote {
    pub base_url: Url,
    state: Shared,
    task: JoinHandle<()>,
}

impl FakeRemote {
    /// Bind to an ephemeral local port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    #[allow(clippy::unwrap_used)]
    pub async fn start(token: &str) -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeInner {
            token: token.to_string(),
            ..FakeInner::default()
        }));

        let api = Router::new()
            .route("/coupons/{code}", get(fetch_coupon))
            .route("/{collection}", get(list_lines))
            .route("/{collection}/items/{key}", put(set_line).delete(remove_line));
        let app = Router::new()
            .nest("/api", api)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/api/")).unwrap(),
            state,
            task,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_listing(&self, listing: ProductListing) {
        self.lock()
            .catalog
            .insert(listing.key.to_string(), listing);
    }

    pub fn set_stock(&self, key: &str, stock_limit: u32) {
        if let Some(listing) = self.lock().catalog.get_mut(key) {
            listing.stock_limit = stock_limit;
        }
    }

    pub fn put_line(&self, collection: &str, key: &str, quantity: u32) {
        self.lock()
            .lines
            .insert((collection.to_string(), key.to_string()), quantity);
    }

    pub fn add_coupon(&self, rule: DiscountRule) {
        self.lock().coupons.insert(rule.code.to_uppercase(), rule);
    }

    #[must_use]
    pub fn line(&self, collection: &str, key: &str) -> Option<u32> {
        self.lock()
            .lines
            .get(&(collection.to_string(), key.to_string()))
            .copied()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }
}

impl Drop for FakeRemote {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Log the request and check its bearer token.
fn admit(state: &Shared, headers: &HeaderMap, request: String) -> Result<(), StatusCode> {
    let mut inner = state.lock().unwrap_or_else(PoisonError::into_inner);
    inner.requests.push(request);
    let expected = format!("Bearer {}", inner.token);
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn list_lines(
    State(state): State<Shared>,
    Path(collection): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = admit(&state, &headers, format!("GET /{collection}")) {
        return status.into_response();
    }
    let inner = state.lock().unwrap_or_else(PoisonError::into_inner);
    let records: Vec<RemoteRecord> = inner
        .lines
        .iter()
        .filter(|((c, _), _)| *c == collection)
        .filter_map(|((_, key), quantity)| inner.record(key, *quantity))
        .collect();
    Json(records).into_response()
}

async fn set_line(
    State(state): State<Shared>,
    Path((collection, key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<QuantityBody>,
) -> Response {
    if let Err(status) = admit(&state, &headers, format!("PUT /{collection}/items/{key}")) {
        return status.into_response();
    }
    let mut inner = state.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(record) = inner.record(&key, body.quantity) else {
        return (StatusCode::NOT_FOUND, format!("unknown product {key}")).into_response();
    };
    if body.quantity == 0 {
        inner.lines.remove(&(collection, key));
        return StatusCode::NO_CONTENT.into_response();
    }
    if body.quantity > record.stock_limit {
        return (
            StatusCode::CONFLICT,
            format!("only {} of {key} in stock", record.stock_limit),
        )
            .into_response();
    }
    inner.lines.insert((collection, key), body.quantity);
    Json(record).into_response()
}

async fn remove_line(
    State(state): State<Shared>,
    Path((collection, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = admit(&state, &headers, format!("DELETE /{collection}/items/{key}")) {
        return status.into_response();
    }
    let mut inner = state.lock().unwrap_or_else(PoisonError::into_inner);
    match inner.lines.remove(&(collection, key)) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn fetch_coupon(
    State(state): State<Shared>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = admit(&state, &headers, format!("GET /coupons/{code}")) {
        return status.into_response();
    }
    let inner = state.lock().unwrap_or_else(PoisonError::into_inner);
    inner.coupons.get(&code.to_uppercase()).map_or_else(
        || StatusCode::NOT_FOUND.into_response(),
        |rule| Json(rule.clone()).into_response(),
    )
}
