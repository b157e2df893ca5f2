//! RelayLink Core - Shared types library.
//!
//! This crate provides common types used across RelayLink components:
//! - `server` - The Shopify-embedded linking service and webhook receivers
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no
//! HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, emails, and resolved
//!   provider identities

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
