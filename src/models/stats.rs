use serde::{Deserialize, Serialize};

/// Per-courier running aggregates maintained by the analytics consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CourierStats {
    pub courier_id: String,
    pub courier_name: String,
    pub completed_orders: u64,
    pub total_revenue: f64,
    pub average_delivery_time_sec: f64,
}

impl CourierStats {
    pub fn empty(courier_id: &str, courier_name: &str) -> Self {
        Self {
            courier_id: courier_id.to_string(),
            courier_name: courier_name.to_string(),
            ..Self::default()
        }
    }

    /// Folds one more completed delivery into the running mean.
    pub fn record_delivery(&mut self, duration_sec: f64) {
        self.average_delivery_time_sec =
            running_mean(self.average_delivery_time_sec, self.completed_orders, duration_sec);
        self.completed_orders += 1;
    }
}

pub fn running_mean(current_avg: f64, current_count: u64, sample: f64) -> f64 {
    let count = current_count as f64;
    (current_avg * count + sample) / (count + 1.0)
}

/// Singleton counters projected from the order event stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneralStats {
    pub total_orders: u64,
    pub active_orders: u64,
    pub completed_orders: u64,
}

/// Report computed directly from the orders table for a date window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderReport {
    pub total_orders: u64,
    pub active_orders: u64,
    pub completed_orders: u64,
    #[serde(rename = "average_completion_time_seconds")]
    pub average_completion_time_sec: f64,
}

/// Outcome of applying one event to the aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::{running_mean, CourierStats};

    #[test]
    fn running_mean_starts_from_first_sample() {
        assert_eq!(running_mean(0.0, 0, 600.0), 600.0);
        assert_eq!(running_mean(600.0, 1, 300.0), 450.0);
    }

    #[test]
    fn record_delivery_bumps_count() {
        let mut stats = CourierStats::empty("c1", "Ivan");
        stats.record_delivery(100.0);
        stats.record_delivery(200.0);
        stats.record_delivery(600.0);

        assert_eq!(stats.completed_orders, 3);
        assert!((stats.average_delivery_time_sec - 300.0).abs() < 1e-9);
        assert_eq!(stats.total_revenue, 0.0);
    }
}
