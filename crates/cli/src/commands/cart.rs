//! Remote collection commands.
//!
//! Each command loads the collection, applies one change, waits for it to
//! settle, and prints the resulting snapshot.
//!
//! # Environment Variables
//!
//! - `CARTSYNC_REMOTE_URL` - Base URL of the remote API
//! - `CARTSYNC_API_TOKEN` - Bearer token (mutations are rejected without one)

use cartsync_core::{CollectionKind, ItemKey, ProductListing};
use cartsync_engine::{
    Credentials, EngineConfig, HttpRemoteStore, Notification, RemoteConfig, SyncEngine,
};

use super::{CliError, collect_notices, print_snapshot};
use crate::CartAction;

/// Run one cart action against the configured remote.
pub async fn run(kind: CollectionKind, action: CartAction) -> Result<(), CliError> {
    let remote = RemoteConfig::from_env()?;
    let config = EngineConfig::from_env()?;
    let credentials = remote
        .api_token
        .clone()
        .map_or_else(Credentials::anonymous, Credentials::with_token);

    tracing::info!(base_url = %remote.base_url, %kind, "Connecting to remote store");
    let store = HttpRemoteStore::new(
        remote.base_url.clone(),
        kind,
        credentials.clone(),
        config.request_timeout,
    )?;
    let engine = SyncEngine::new(store, credentials, config, kind);

    let (notices, listener) = collect_notices();
    let _subscription = engine.subscribe(listener);
    engine.init().await?;

    match action {
        CartAction::Show => {}
        CartAction::Add {
            key,
            quantity,
            price,
            stock,
        } => {
            let key = ItemKey::from(key);
            let listing = match (engine.snapshot().entry(&key), price, stock) {
                (_, Some(price), Some(stock)) => ProductListing::new(key, price, stock),
                (Some(entry), _, _) => ProductListing::new(key, entry.unit_price, entry.stock_limit)
                    .with_original_price(entry.original_unit_price),
                (None, _, _) => return Err(CliError::MissingListing(key.to_string())),
            };
            engine.add_item(&listing, quantity)?;
        }
        CartAction::Set { key, quantity } => engine.mutate(&ItemKey::from(key), quantity)?,
        CartAction::Remove { key } => engine.remove_item(&ItemKey::from(key))?,
        CartAction::Coupon { code } => engine.apply_coupon(&code)?,
    }

    engine.settled().await;
    print_snapshot(&engine.snapshot())?;

    let failure = notices
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .iter()
        .find_map(Notification::error);
    engine.dispose();

    failure.map_or(Ok(()), |error| Err(error.into()))
}
