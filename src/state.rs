use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::pricing::PricingConfig;
use crate::events::bus::EventBus;
use crate::models::tracking::TrackingRecord;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn EventBus>,
    pub pricing: PricingConfig,
    pub tracking_tx: broadcast::Sender<TrackingRecord>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        pricing: PricingConfig,
        event_buffer_size: usize,
    ) -> Self {
        let (tracking_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            store,
            bus,
            pricing,
            tracking_tx,
            metrics: Metrics::new(),
        }
    }
}
