//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::relay::RelayClient;
use crate::services::email::EmailService;
use crate::services::linking::LinkingService;
use crate::services::verification::VerificationStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    pool: PgPool,
    relay: RelayClient,
    linking: LinkingService,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, pool: PgPool, relay: RelayClient, email: EmailService) -> Self {
        let store = Arc::new(VerificationStore::new());
        let linking = LinkingService::new(relay.clone(), email, store, pool.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                relay,
                linking,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn relay(&self) -> &RelayClient {
        &self.inner.relay
    }

    #[must_use]
    pub fn linking(&self) -> &LinkingService {
        &self.inner.linking
    }
}
