//! Structured logging setup — `tracing` + `tracing-subscriber` with an
//! `EnvFilter`, the same `tracing_subscriber::fmt()...with_env_filter(...)`
//! shape the teacher's `main.rs` uses. Wrapped in a `reload::Handle` so
//! the control-plane `log-level get/set` endpoint (§6) can adjust
//! verbosity at runtime without a restart.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{reload, Layer};

pub type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

#[derive(Clone)]
pub struct LogController {
    handle: ReloadHandle,
}

impl LogController {
    pub fn current(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    pub fn set(&self, directive: &str) -> anyhow::Result<()> {
        let filter = EnvFilter::try_new(directive)?;
        self.handle.reload(filter)?;
        Ok(())
    }
}

/// Installs the global subscriber and returns a handle for runtime
/// adjustment. Must be called exactly once, at process start.
pub fn init(default_directive: &str) -> LogController {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let (filter, handle) = reload::Layer::new(filter);

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("global tracing subscriber already set");

    LogController { handle }
}
