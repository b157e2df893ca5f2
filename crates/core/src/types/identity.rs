//! Resolved provider identity.
//!
//! The relay provider's listing API is the only way to learn a user's
//! numeric id, and it is paginated, permission-gated, and sometimes
//! simply blind to accounts that demonstrably exist. A merchant whose
//! email ownership has been proven must still be able to finish linking,
//! so resolution produces either a confirmed id or an explicit degraded
//! marker - never a guessed number.

use serde::{Deserialize, Serialize};

use super::id::RelayUserId;

/// The magic user id some provider deployments emit for accounts that
/// were verified but never surfaced by the listing API. Only consulted
/// at the wire boundary; everything past parsing works with
/// [`ResolvedIdentity`].
pub const DEGRADED_WIRE_ID: i64 = 999_999;

/// A provider identity as resolved by the linking workflow.
///
/// `Real` carries an id positively confirmed by a listing match, a
/// successful password verification with listing lookup, or account
/// creation. `Degraded` means ownership of the email was proven but the
/// provider never disclosed a numeric id; provider-side writes that need
/// a real id (API keys, subscriptions, SSO) must refuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResolvedIdentity {
    /// A confirmed provider account id.
    Real(RelayUserId),
    /// Ownership proven, but no id available.
    Degraded,
}

impl ResolvedIdentity {
    /// Build an identity from a raw provider id, mapping the upstream
    /// degraded sentinel (and non-positive junk) to `Degraded`.
    #[must_use]
    pub const fn from_wire(raw: i64) -> Self {
        if raw > 0 && raw != DEGRADED_WIRE_ID {
            Self::Real(RelayUserId::new(raw))
        } else {
            Self::Degraded
        }
    }

    /// Build an identity from an optionally-resolved id, as produced by
    /// account lookups: `None` means ownership was proven some other way.
    #[must_use]
    pub const fn from_lookup(id: Option<RelayUserId>) -> Self {
        match id {
            Some(id) => Self::Real(id),
            None => Self::Degraded,
        }
    }

    /// The confirmed id, if there is one.
    #[must_use]
    pub const fn real_id(&self) -> Option<RelayUserId> {
        match self {
            Self::Real(id) => Some(*id),
            Self::Degraded => None,
        }
    }

    /// Whether this identity lacks a confirmed provider id.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Nullable-column form for persistence: `None` encodes `Degraded`.
    #[must_use]
    pub const fn as_column(&self) -> Option<i64> {
        match self {
            Self::Real(id) => Some(id.as_i64()),
            Self::Degraded => None,
        }
    }

    /// Rebuild from the nullable persistence column. Rows written before
    /// the column went nullable may still hold the wire sentinel, so the
    /// same filtering applies here.
    #[must_use]
    pub const fn from_column(raw: Option<i64>) -> Self {
        match raw {
            Some(id) => Self::from_wire(id),
            None => Self::Degraded,
        }
    }
}

impl From<RelayUserId> for ResolvedIdentity {
    fn from(id: RelayUserId) -> Self {
        Self::Real(id)
    }
}
