//! Shared application state handed to every admission handler.

use crate::config::Config;
use bundler_objectstore::ObjectStore;
use bundler_optical::Sink;
use bundler_payments::pricing::PriceSource;
use bundler_payments::PaymentEngine;
use bundler_queue::QueueBroker;
use bundler_store::MetadataStore;
use dashmap::DashMap;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use std::time::Instant;

/// In-flight admission guard, keyed by `itemId`, evicted on finish or failure (step 2 of
/// the admission algorithm). The `Instant` lets a crashed request's entry be reclaimed after
/// a bounded TTL rather than wedging that item id forever.
pub type InFlightMap = DashMap<String, Instant>;

pub struct AppState<S: PriceSource> {
    pub config: Arc<Config>,
    pub store: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn QueueBroker>,
    pub payments: Arc<PaymentEngine<S>>,
    pub optical_sinks: Arc<Vec<Sink>>,
    pub optical_client: reqwest::Client,
    pub in_flight: Arc<InFlightMap>,
    pub receipt_key: Arc<SigningKey>,
}

impl<S: PriceSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            objects: self.objects.clone(),
            queue: self.queue.clone(),
            payments: self.payments.clone(),
            optical_sinks: self.optical_sinks.clone(),
            optical_client: self.optical_client.clone(),
            in_flight: self.in_flight.clone(),
            receipt_key: self.receipt_key.clone(),
        }
    }
}
