//! Price registry (C6) — in-process cache of the latest price per model.
//! Same `RwLock<HashMap<...>>` shape the teacher uses for its other
//! in-process state (round-robin counters, rate tracker); populated from
//! the relational store's price-history table.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;

use crate::models::{ModelPrice, PriceData};
use crate::store::Store;

/// Returned by `lookup` when a model has never had a recorded price.
/// Causes the calculator to yield zero and the dispatcher to flag
/// `price_missing` on the usage record.
pub struct UnknownModel;

pub struct PriceRegistry {
    prices: RwLock<HashMap<String, PriceData>>,
    became_ready: watch::Sender<bool>,
}

impl PriceRegistry {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                prices: RwLock::new(HashMap::new()),
                became_ready: tx,
            },
            rx,
        )
    }

    /// Loads "latest price per model_name" from the relational store.
    /// Called at startup and on explicit admin refresh. The whole map is
    /// swapped under a single write lock.
    pub fn refresh(&self, store: &Store) -> anyhow::Result<usize> {
        let latest: Vec<ModelPrice> = store.latest_prices()?;
        let was_empty = { self.prices.read().unwrap().is_empty() };
        let count = latest.len();
        {
            let mut guard = self.prices.write().unwrap();
            guard.clear();
            for mp in latest {
                guard.insert(mp.model_name, mp.price_data);
            }
        }
        if was_empty && count > 0 {
            let _ = self.became_ready.send(true);
        }
        Ok(count)
    }

    pub fn lookup(&self, model_name: &str) -> Result<PriceData, UnknownModel> {
        self.prices
            .read()
            .unwrap()
            .get(model_name)
            .copied()
            .ok_or(UnknownModel)
    }
}
