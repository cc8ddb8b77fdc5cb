//! CLI subcommands.

pub mod cart;
pub mod demo;

use std::sync::Arc;

use cartsync_engine::{
    CartSnapshot, ConfigError, EngineEvent, Notification, RemoteError, SyncError,
};
use thiserror::Error;

/// Errors that can end a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A product not yet in the collection needs catalog data to be added.
    #[error("{0} is not in the collection; pass --price and --stock to add it")]
    MissingListing(String),
}

/// Print a snapshot as pretty JSON on stdout.
#[allow(clippy::print_stdout)]
pub fn print_snapshot(snapshot: &CartSnapshot) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

/// Log every notice the engine emits.
pub fn log_notices(event: &EngineEvent) {
    let EngineEvent::Notice(notice) = event else {
        return;
    };
    if notice.is_failure() {
        tracing::warn!(?notice, "Engine notice");
    } else {
        tracing::info!(?notice, "Engine notice");
    }
}

/// Collector for notices, for commands that report on them after settling.
pub fn collect_notices() -> (
    Arc<std::sync::Mutex<Vec<Notification>>>,
    impl Fn(&EngineEvent) + Send + Sync + 'static,
) {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = move |event: &EngineEvent| {
        log_notices(event);
        if let EngineEvent::Notice(notice) = event {
            sink.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(notice.clone());
        }
    };
    (seen, listener)
}
