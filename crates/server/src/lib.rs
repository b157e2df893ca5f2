//! RelayLink server library.
//!
//! Links a Shopify store to an account at the RelayLink SMS/WhatsApp
//! provider and relays order events to the customer's phone. The crate
//! is a library so integration tests can drive the provider client and
//! services directly; the binary in `main.rs` wires it to the network.
//!
//! # Modules
//!
//! - [`relay`] - HTTP client for the provider's admin, messaging, and
//!   web surfaces
//! - [`services`] - linking state machine, verification codes, email
//! - [`db`] - per-shop settings persistence
//! - [`routes`] - merchant-facing linking API and Shopify webhooks

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod relay;
pub mod routes;
pub mod services;
pub mod state;
