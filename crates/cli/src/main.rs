//! Cartsync CLI - drive the sync engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Run the scripted scenario against the in-memory store
//! cartsync demo
//!
//! # Show the remote cart
//! cartsync cart show
//!
//! # Add two units of a product not yet in the cart
//! cartsync cart add tee-large --quantity 2 --price 599 --stock 10
//!
//! # Change a quantity, remove a line, try a coupon
//! cartsync cart set tee-large 3
//! cartsync cart remove tee-large
//! cartsync cart coupon FLAT500
//!
//! # Same commands against the wishlist
//! cartsync --wishlist cart show
//! ```
//!
//! # Environment Variables
//!
//! - `CARTSYNC_REMOTE_URL` - Base URL of the remote API (`cart` commands)
//! - `CARTSYNC_API_TOKEN` - Bearer token for the remote API
//! - `SENTRY_DSN` - Enables Sentry error reporting when set
//! - `RUST_LOG` - Log filter (default: `cartsync=info`)

#![cfg_attr(not(test), forbid(unsafe_code))]

use cartsync_core::CollectionKind;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cartsync")]
#[command(author, version, about = "Optimistic cart and wishlist sync tools")]
struct Cli {
    /// Operate on the wishlist instead of the cart
    #[arg(long, global = true)]
    wishlist: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted scenario against the in-memory store
    Demo,
    /// Manage the remote collection
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the current collection and totals
    Show,
    /// Add units of a product
    Add {
        /// Product key
        key: String,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Unit price, required when the product is not in the collection yet
        #[arg(long)]
        price: Option<Decimal>,

        /// Stock limit, required when the product is not in the collection yet
        #[arg(long)]
        stock: Option<u32>,
    },
    /// Set the quantity of a line (0 removes it)
    Set {
        /// Product key
        key: String,

        /// New quantity
        quantity: u32,
    },
    /// Remove a line
    Remove {
        /// Product key
        key: String,
    },
    /// Apply a coupon code
    Coupon {
        /// Coupon code (case-insensitive)
        code: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("SENTRY_ENVIRONMENT")
                .ok()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartsync=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    let kind = if cli.wishlist {
        CollectionKind::Wishlist
    } else {
        CollectionKind::Cart
    };

    match cli.command {
        Commands::Demo => commands::demo::run(kind).await,
        Commands::Cart { action } => commands::cart::run(kind, action).await,
    }
}
