//! Aggregation state and its read-only snapshots

use crate::config::AggregationLimits;
use crate::counters::BoundedCounterMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per-product interaction histogram (`interaction_type -> count`)
pub type InteractionCounts = HashMap<String, u64>;

/// The rolling counters maintained between flushes
///
/// Owned by a single writer; readers only ever see a [`StatsSnapshot`].
#[derive(Debug, Clone)]
pub struct AggregationState {
    pub(crate) page_views: BoundedCounterMap<u64>,
    pub(crate) product_interest: BoundedCounterMap<InteractionCounts>,
    pub(crate) revenue_by_hour: BoundedCounterMap<f64>,
    pub(crate) search_queries: BoundedCounterMap<u64>,
    events_processed: u64,
    events_skipped: u64,
}

/// Immutable, serialisable copy of the aggregation state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub page_views: BTreeMap<String, u64>,
    pub product_interest: BTreeMap<String, BTreeMap<String, u64>>,
    pub revenue_by_hour: BTreeMap<String, f64>,
    pub search_queries: BTreeMap<String, u64>,
    pub events_processed: u64,
    pub events_skipped: u64,
}

/// A product ranked by its total interaction count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRanking {
    pub product_id: String,
    pub total_interactions: u64,
    pub interactions: BTreeMap<String, u64>,
}

/// A page ranked by its view count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRanking {
    pub page: String,
    pub views: u64,
}

impl AggregationState {
    pub fn new(limits: &AggregationLimits) -> Self {
        Self {
            page_views: BoundedCounterMap::new(limits.max_pages),
            product_interest: BoundedCounterMap::new(limits.max_products),
            revenue_by_hour: BoundedCounterMap::new(limits.max_revenue_buckets),
            search_queries: BoundedCounterMap::new(limits.max_queries),
            events_processed: 0,
            events_skipped: 0,
        }
    }

    pub fn record_processed(&mut self) {
        self.events_processed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.events_skipped += 1;
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn events_skipped(&self) -> u64 {
        self.events_skipped
    }

    /// Envelopes observed since the last reset
    pub fn events_observed(&self) -> u64 {
        self.events_processed + self.events_skipped
    }

    /// Clear every aggregate and counter, keeping the configured limits
    pub fn reset(&mut self) {
        self.page_views.clear();
        self.product_interest.clear();
        self.revenue_by_hour.clear();
        self.search_queries.clear();
        self.events_processed = 0;
        self.events_skipped = 0;
    }

    /// Deep copy for readers and sinks
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            page_views: sorted(&self.page_views),
            product_interest: self
                .product_interest
                .iter()
                .map(|(product, counts)| {
                    (product.clone(), counts.iter().map(|(k, v)| (k.clone(), *v)).collect())
                })
                .collect(),
            revenue_by_hour: sorted(&self.revenue_by_hour),
            search_queries: sorted(&self.search_queries),
            events_processed: self.events_processed,
            events_skipped: self.events_skipped,
        }
    }

    /// Top `n` products by total interactions, descending; ties by product id
    pub fn top_products(&self, n: usize) -> Vec<ProductRanking> {
        let mut ranked: Vec<ProductRanking> = self
            .product_interest
            .iter()
            .map(|(product_id, counts)| ProductRanking {
                product_id: product_id.clone(),
                total_interactions: counts.values().sum(),
                interactions: counts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.total_interactions
                .cmp(&a.total_interactions)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        ranked.truncate(n);
        ranked
    }

    /// Top `n` pages by views, descending; ties by path
    pub fn top_pages(&self, n: usize) -> Vec<PageRanking> {
        let mut ranked: Vec<PageRanking> = self
            .page_views
            .iter()
            .map(|(page, views)| PageRanking { page: page.clone(), views: *views })
            .collect();

        ranked.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.page.cmp(&b.page)));
        ranked.truncate(n);
        ranked
    }
}

fn sorted<V: Clone + Default>(map: &BoundedCounterMap<V>) -> BTreeMap<String, V> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

impl StatsSnapshot {
    /// Whether nothing has been observed since the last reset
    pub fn is_empty(&self) -> bool {
        self.events_processed == 0
            && self.events_skipped == 0
            && self.page_views.is_empty()
            && self.product_interest.is_empty()
            && self.revenue_by_hour.is_empty()
            && self.search_queries.is_empty()
    }

    pub fn total_revenue(&self) -> f64 {
        // `sum()` over no floats yields -0.0
        self.revenue_by_hour.values().fold(0.0, |total, amount| total + amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AggregationState {
        AggregationState::new(&AggregationLimits::default())
    }

    #[test]
    fn test_new_state_snapshot_is_empty() {
        let snapshot = state().snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot, StatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut state = state();
        state.page_views.increment("/a", 1);
        let snapshot = state.snapshot();
        state.page_views.increment("/a", 1);

        assert_eq!(snapshot.page_views["/a"], 1);
        assert_eq!(state.snapshot().page_views["/a"], 2);
    }

    #[test]
    fn test_top_pages_ordering() {
        let mut state = state();
        state.page_views.increment("/b", 5);
        state.page_views.increment("/a", 5);
        state.page_views.increment("/c", 9);
        state.page_views.increment("/d", 1);

        let top = state.top_pages(3);
        let pages: Vec<&str> = top.iter().map(|p| p.page.as_str()).collect();
        assert_eq!(pages, vec!["/c", "/a", "/b"]);
        assert_eq!(top[0].views, 9);
    }

    #[test]
    fn test_top_products_sum_across_types() {
        let mut state = state();
        state.product_interest.upsert("p1", |m| {
            m.insert("view".into(), 1);
            m.insert("add_to_cart".into(), 4);
        });
        state.product_interest.upsert("p2", |m| {
            m.insert("view".into(), 3);
        });

        let top = state.top_products(10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].product_id, "p1");
        assert_eq!(top[0].total_interactions, 5);
        assert_eq!(top[1].product_id, "p2");
        assert!(state.top_products(0).is_empty());
    }

    #[test]
    fn test_total_revenue() {
        let empty = StatsSnapshot::default().total_revenue();
        assert_eq!(empty, 0.0);
        assert!(empty.is_sign_positive());

        let mut state = state();
        state.revenue_by_hour.upsert("2026-02-20T14", |t| *t += 10.5);
        state.revenue_by_hour.upsert("2026-02-20T15", |t| *t += 4.5);
        assert_eq!(state.snapshot().total_revenue(), 15.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut state = state();
        state.page_views.increment("/a", 1);
        state.search_queries.increment("q", 1);
        state.revenue_by_hour.upsert("2026-02-20T14", |t| *t += 10.0);
        state.record_processed();
        state.record_skipped();

        state.reset();
        assert!(state.snapshot().is_empty());
        assert_eq!(state.events_observed(), 0);
    }
}
