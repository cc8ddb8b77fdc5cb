//! Scripted scenario against the in-memory store.
//!
//! Walks through debounced coalescing, a failed mutation being rolled back,
//! and a coupon moving between inapplicable and applicable.

use std::time::Duration;

use cartsync_core::{CollectionKind, DiscountRule, Price, ProductListing};
use cartsync_engine::{
    CallBehavior, CartSnapshot, Credentials, EngineConfig, InMemoryStore, RemoteError,
    SyncEngine,
};
use rust_decimal::Decimal;
use secrecy::SecretString;

use super::{CliError, log_notices, print_snapshot};

fn catalog() -> [ProductListing; 3] {
    [
        ProductListing::new("tee-classic", Decimal::new(599, 0), 10)
            .with_original_price(Decimal::new(799, 0)),
        ProductListing::new("mug-enamel", Decimal::new(349, 0), 4),
        ProductListing::new("tote-canvas", Decimal::new(450, 0), 0),
    ]
}

fn log_totals(step: &str, snapshot: &CartSnapshot, engine_config: &EngineConfig) {
    let currency = engine_config.pricing.currency;
    tracing::info!(
        step,
        lines = snapshot.entries.len(),
        subtotal = %Price::new(snapshot.totals.subtotal, currency).display(),
        discount = %Price::new(snapshot.totals.discount, currency).display(),
        total = %Price::new(snapshot.totals.total, currency).display(),
        "Snapshot"
    );
}

/// Run the demo for `kind`.
pub async fn run(kind: CollectionKind) -> Result<(), CliError> {
    let [tee, mug, tote] = catalog();
    let store = InMemoryStore::new()
        .with_listing(tee.clone())
        .with_listing(mug.clone())
        .with_listing(tote.clone())
        .with_coupon(
            DiscountRule::fixed("FLAT500", Decimal::new(500, 0))
                .with_min_order(Decimal::new(1000, 0)),
        );

    let config = EngineConfig::default();
    let credentials = Credentials::with_token(SecretString::from("demo-session".to_string()));
    let engine = SyncEngine::new(store.clone(), credentials, config.clone(), kind);
    let _subscription = engine.subscribe(log_notices);
    engine.init().await?;

    match kind {
        CollectionKind::Cart => cart_scenario(&engine, &store, &config, [tee, mug, tote]).await?,
        CollectionKind::Wishlist => wishlist_scenario(&engine, &config, [tee, mug]).await,
    }

    print_snapshot(&engine.snapshot())?;
    engine.dispose();
    Ok(())
}

async fn cart_scenario(
    engine: &SyncEngine<InMemoryStore>,
    store: &InMemoryStore,
    config: &EngineConfig,
    [tee, mug, tote]: [ProductListing; 3],
) -> Result<(), CliError> {
    // Rapid edits collapse into one call
    engine.add_item(&tee, 2)?;
    engine.mutate(&tee.key, 3)?;
    engine.mutate(&tee.key, 1)?;
    engine.settled().await;
    tracing::info!(
        calls = store.mutation_calls().len(),
        "Three edits to {} dispatched",
        tee.key
    );
    log_totals("coalesced", &engine.snapshot(), config);

    // A failed call restores the last confirmed quantity
    engine.add_item(&mug, 1)?;
    engine.settled().await;
    store.push_behavior(CallBehavior::Fail {
        delay: Duration::from_millis(200),
        error: RemoteError::Network("connection reset".to_string()),
    });
    engine.mutate(&mug.key, 3)?;
    log_totals("optimistic", &engine.snapshot(), config);
    engine.settled().await;
    log_totals("rolled back", &engine.snapshot(), config);

    // Out of stock lines stay visible but are not priced
    store.put_line(&tote.key, 1);
    engine.refresh()?;
    engine.settled().await;
    log_totals("refreshed", &engine.snapshot(), config);

    // The coupon needs a 1000 subtotal
    engine.apply_coupon("flat500")?;
    engine.settled().await;
    log_totals("coupon below minimum", &engine.snapshot(), config);

    engine.mutate(&tee.key, 2)?;
    engine.settled().await;
    log_totals("coupon applied", &engine.snapshot(), config);

    engine.remove_item(&mug.key)?;
    engine.settled().await;
    log_totals("after removal", &engine.snapshot(), config);
    Ok(())
}

async fn wishlist_scenario(
    engine: &SyncEngine<InMemoryStore>,
    config: &EngineConfig,
    [tee, mug]: [ProductListing; 2],
) {
    for listing in [&tee, &mug] {
        let _ = engine.add_item(listing, 1);
    }
    // Wishlist entries hold a single unit
    if let Err(e) = engine.mutate(&tee.key, 2) {
        tracing::info!(error = %e, "Rejected as expected");
    }
    let _ = engine.remove_item(&mug.key);
    engine.settled().await;
    log_totals("wishlist", &engine.snapshot(), config);
}
