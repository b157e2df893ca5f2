//! Error type for the account linking flow.

use thiserror::Error;

use crate::db::RepositoryError;
use crate::relay::RelayError;
use crate::services::verification::ConsumeError;

/// Errors that can occur while linking a shop to a provider account.
#[derive(Debug, Error)]
pub enum LinkingError {
    /// Provider interaction failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Verification code was missing, expired or wrong.
    #[error(transparent)]
    Verification(#[from] ConsumeError),

    /// Settings persistence failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The shop has not completed the linking flow.
    #[error("shop is not linked to a provider account")]
    NotLinked,

    /// The operation needs a concrete provider id, but the linkage is
    /// degraded (ownership proven without a resolved id).
    #[error(
        "this account could not be resolved to a provider id; complete this step manually in the provider dashboard"
    )]
    DegradedIdentity,

    /// A key is already connected; it must be revoked before reissuing.
    #[error("an API key is already connected for this shop")]
    KeyAlreadyConnected,

    /// Every account creation path failed.
    #[error("unable to create provider account: {0}")]
    AccountCreation(String),
}
