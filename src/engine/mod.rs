pub mod analytics;
pub mod consumer;
pub mod couriers;
pub mod lifecycle;
pub mod notifier;
pub mod pricing;
pub mod relay;
pub mod tracking;
