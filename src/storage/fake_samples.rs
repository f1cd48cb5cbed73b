//! Fake business-event generator for demo purposes.
//!
//! Produces revenue, order, session and product-view samples tagged with
//! region and channel dimensions so a fresh warehouse has something to
//! aggregate and query.

use crate::core::{AggregationKind, MetricSample};
use chrono::{DateTime, Utc};
use rand::{seq::SliceRandom, thread_rng, Rng};

const REGIONS: [&str; 4] = ["US", "EU", "APAC", "LATAM"];
const CHANNELS: [&str; 3] = ["web", "app", "marketplace"];
const PRODUCTS: [&str; 5] = ["ring", "bracelet", "pendant", "watch", "keychain"];

/// Event family with its metric name, aggregation and value range.
#[derive(Debug, Clone)]
struct EventConfig {
    metric: &'static str,
    aggregation: AggregationKind,
    min_value: f64,
    max_value: f64,
    /// Relative frequency among generated events
    weight: u32,
}

/// Generates realistic-looking metric samples.
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    events: Vec<EventConfig>,
}

impl Default for SampleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleGenerator {
    pub fn new() -> Self {
        Self {
            events: vec![
                EventConfig {
                    metric: "revenue",
                    aggregation: AggregationKind::Sum,
                    min_value: 15.0,
                    max_value: 450.0,
                    weight: 3,
                },
                EventConfig {
                    metric: "orders",
                    aggregation: AggregationKind::Count,
                    min_value: 1.0,
                    max_value: 1.0,
                    weight: 3,
                },
                EventConfig {
                    metric: "sessions",
                    aggregation: AggregationKind::Avg,
                    min_value: 20.0,
                    max_value: 1800.0,
                    weight: 6,
                },
                EventConfig {
                    metric: "product_views",
                    aggregation: AggregationKind::Count,
                    min_value: 1.0,
                    max_value: 1.0,
                    weight: 10,
                },
            ],
        }
    }

    /// One random sample stamped at `at`.
    pub fn sample(&self, at: DateTime<Utc>) -> MetricSample {
        let mut rng = thread_rng();
        let total: u32 = self.events.iter().map(|e| e.weight).sum();
        let mut pick = rng.gen_range(0..total);
        let event = self
            .events
            .iter()
            .find(|e| {
                if pick < e.weight {
                    true
                } else {
                    pick -= e.weight;
                    false
                }
            })
            .unwrap_or(&self.events[0]);

        let value = if event.max_value > event.min_value {
            rng.gen_range(event.min_value..event.max_value)
        } else {
            event.min_value
        };

        let mut sample = MetricSample::new(event.metric, value, at, event.aggregation)
            .with_dimension("region", *REGIONS.choose(&mut rng).unwrap_or(&"US"))
            .with_dimension("channel", *CHANNELS.choose(&mut rng).unwrap_or(&"web"));

        if event.metric == "product_views" {
            sample = sample.with_dimension("product", *PRODUCTS.choose(&mut rng).unwrap_or(&"ring"));
        }
        sample
    }

    /// A batch of `count` samples stamped at `at`.
    pub fn batch(&self, count: usize, at: DateTime<Utc>) -> Vec<MetricSample> {
        (0..count).map(|_| self.sample(at)).collect()
    }
}
