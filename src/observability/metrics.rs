use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub events_published_total: IntCounterVec,
    pub events_consumed_total: IntCounterVec,
    pub event_handling_seconds: HistogramVec,
    pub outbox_backlog: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order state transitions"),
            &["transition"],
        )
        .expect("valid order_transitions_total metric");

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Outbox messages handed to the event bus by queue and outcome",
            ),
            &["queue", "outcome"],
        )
        .expect("valid events_published_total metric");

        let events_consumed_total = IntCounterVec::new(
            Opts::new(
                "events_consumed_total",
                "Consumed messages by queue and outcome",
            ),
            &["queue", "outcome"],
        )
        .expect("valid events_consumed_total metric");

        let event_handling_seconds = HistogramVec::new(
            HistogramOpts::new(
                "event_handling_seconds",
                "Time spent handling one consumed message",
            ),
            &["queue"],
        )
        .expect("valid event_handling_seconds metric");

        let outbox_backlog = IntGauge::new("outbox_backlog", "Undelivered outbox messages")
            .expect("valid outbox_backlog metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(events_consumed_total.clone()))
            .expect("register events_consumed_total");
        registry
            .register(Box::new(event_handling_seconds.clone()))
            .expect("register event_handling_seconds");
        registry
            .register(Box::new(outbox_backlog.clone()))
            .expect("register outbox_backlog");

        Self {
            registry,
            order_transitions_total,
            events_published_total,
            events_consumed_total,
            event_handling_seconds,
            outbox_backlog,
        }
    }

    pub fn transition(&self, transition: &str) {
        self.order_transitions_total
            .with_label_values(&[transition])
            .inc();
    }

    pub fn consumed(&self, queue: &str, outcome: &str) {
        self.events_consumed_total
            .with_label_values(&[queue, outcome])
            .inc();
    }

    pub fn published(&self, queue: &str, outcome: &str) {
        self.events_published_total
            .with_label_values(&[queue, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
