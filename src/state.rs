//! Composition root. Per REDESIGN FLAGS §9, the global singletons the
//! source used (a process-wide circuit map, a tracker singleton, a price
//! cache) become long-lived values owned here and passed explicitly,
//! mirroring the ownership shape the teacher already uses for
//! `Arc<KeyStore>`/`Arc<PoolManager>`/`Arc<HashMap<_, Box<dyn LLMAdapter>>>`
//! in `main.rs`.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::auth::AuthResolver;
use crate::circuit::CircuitBreakerRegistry;
use crate::config::Config;
use crate::filter::SensitiveWordFilter;
use crate::kv::KvStore;
use crate::logging::LogController;
use crate::price::PriceRegistry;
use crate::ratelimit::RateLimitService;
use crate::selector::ProviderSelector;
use crate::session::SessionTracker;
use crate::store::Store;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub circuits: Arc<CircuitBreakerRegistry>,
    pub rate_limits: Arc<RateLimitService>,
    pub sessions: Arc<SessionTracker>,
    pub prices: Arc<PriceRegistry>,
    pub filter: Arc<RwLock<SensitiveWordFilter>>,
    pub selector: Arc<ProviderSelector>,
    pub auth: Arc<AuthResolver>,
    pub http_client: reqwest::Client,
    pub log_controller: LogController,
}

impl GatewayState {
    pub async fn build(
        config: Config,
        log_controller: LogController,
    ) -> anyhow::Result<(Self, watch::Receiver<bool>)> {
        let store = Arc::new(Store::open(
            std::path::Path::new(&config.database_dsn),
            config.auto_migrate,
        )?);
        let kv = KvStore::connect(&config.kv_url).await?;

        let circuits = Arc::new(CircuitBreakerRegistry::new());
        let rate_limits = Arc::new(RateLimitService::with_rate_limiting(
            kv.clone(),
            config.rate_limiting_enabled,
        ));
        let sessions = Arc::new(SessionTracker::new(kv, config.session_ttl));

        let (price_registry, price_ready_rx) = PriceRegistry::new();
        price_registry.refresh(&store)?;
        let prices = Arc::new(price_registry);

        let words = store.list_sensitive_words()?;
        let filter = Arc::new(RwLock::new(SensitiveWordFilter::compile(&words)?));

        let selector = Arc::new(ProviderSelector::new(
            Arc::clone(&circuits),
            Arc::clone(&rate_limits),
            Arc::clone(&sessions),
        ));

        let auth = Arc::new(AuthResolver::new(config.admin_token.clone()));

        let http_client = reqwest::Client::builder().build()?;

        Ok((
            Self {
                config: Arc::new(config),
                store,
                circuits,
                rate_limits,
                sessions,
                prices,
                filter,
                selector,
                auth,
                http_client,
                log_controller,
            },
            price_ready_rx,
        ))
    }

    /// Refresh the sensitive-word matcher under a single write lock, the
    /// same swap-the-whole-map discipline C6 uses for prices.
    pub fn reload_sensitive_words(&self) -> anyhow::Result<()> {
        let words = self.store.list_sensitive_words()?;
        let compiled = SensitiveWordFilter::compile(&words)?;
        *self.filter.write().unwrap() = compiled;
        Ok(())
    }
}
