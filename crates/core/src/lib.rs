//! Cartsync Core - Shared types library.
//!
//! This crate provides the types shared by every cartsync component:
//! - `engine` - Optimistic cart/wishlist synchronization engine
//! - `cli` - Command-line driver for the engine
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no async runtime, no HTTP
//! clients. This keeps it lightweight and lets remote adapters and the engine
//! agree on one wire model.
//!
//! # Modules
//!
//! - [`types`] - Item keys, prices, remote records, and discount rules

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
