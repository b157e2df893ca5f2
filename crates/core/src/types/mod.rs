//! Core types for RelayLink.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod identity;

pub use email::{Email, EmailError};
pub use id::*;
pub use identity::{DEGRADED_WIRE_ID, ResolvedIdentity};
