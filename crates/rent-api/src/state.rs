//! # Application State
//!
//! Shared state for the Axum application: the token engine, the entitlement
//! ledger, the user store, the plan catalog and configuration.

use crate::config::AppConfig;
use rent_core::{
    BoxedPaymentGateway, EntitlementLedger, MemoryStore, PlanCatalog, SharedCredentialStore,
    SharedEntitlementStore, SharedUserStore, TokenEngine,
};
use rent_pg::PgStore;
use rent_stripe::StripeIntentGateway;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: TokenEngine,
    pub ledger: Arc<EntitlementLedger>,
    /// Same gateway the ledger uses; the webhook route verifies with it
    pub gateway: BoxedPaymentGateway,
    pub users: SharedUserStore,
    pub catalog: Arc<PlanCatalog>,
    pub config: AppConfig,
}

/// The three storage contracts, usually backed by one store
#[derive(Clone)]
pub struct Stores {
    pub credentials: SharedCredentialStore,
    pub users: SharedUserStore,
    pub entitlements: SharedEntitlementStore,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            credentials: store.clone(),
            users: store.clone(),
            entitlements: store,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            credentials: store.clone(),
            users: store.clone(),
            entitlements: store,
        }
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        stores: Stores,
        gateway: BoxedPaymentGateway,
        catalog: PlanCatalog,
    ) -> Self {
        let engine = TokenEngine::new(stores.credentials).with_store_timeout(config.store_timeout);
        let ledger = EntitlementLedger::new(stores.entitlements, gateway.clone())
            .with_timeouts(config.store_timeout, config.gateway_timeout);

        Self {
            engine,
            ledger: Arc::new(ledger),
            gateway,
            users: stores.users,
            catalog: Arc::new(catalog),
            config,
        }
    }

    /// Build from the environment: Stripe gateway, plan catalog, and the
    /// Postgres store when `DATABASE_URL` is set.
    pub async fn from_env() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let catalog = load_plan_catalog(config.plans_path.as_deref())?;

        let gateway = StripeIntentGateway::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;
        if gateway.config().is_test_mode() {
            info!("Stripe running in test mode");
        }

        let stores = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url).await?;
                store.migrate().await?;
                Stores::postgres(store)
            }
            None => {
                warn!("DATABASE_URL not set, using the in-memory store");
                Stores::memory()
            }
        };

        Ok(Self::new(config, stores, Arc::new(gateway), catalog))
    }
}

/// Load the plan catalog from `path`, or search the usual locations
pub fn load_plan_catalog(path: Option<&str>) -> anyhow::Result<PlanCatalog> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;
        return parse_catalog(path, &content);
    }

    let config_paths = [
        "config/plans.toml",
        "../config/plans.toml",
        "../../config/plans.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            return parse_catalog(path, &content);
        }
    }

    warn!("No plan catalog found, using empty catalog");
    Ok(PlanCatalog::new())
}

fn parse_catalog(path: &str, content: &str) -> anyhow::Result<PlanCatalog> {
    let catalog = PlanCatalog::from_toml(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
    info!("Loaded {} plans from {}", catalog.plans.len(), path);
    Ok(catalog)
}
