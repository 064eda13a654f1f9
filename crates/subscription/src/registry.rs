//! The subscription registry itself: a single reentrant-lock-guarded
//! store of subscriptions, indexed by id and by literal topic, with a
//! side list of pattern subscriptions checked against every query topic.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use filters::FilterExpr;
use serde_json::Value;

use crate::{looks_like_pattern, HandlerKind, Subscription};

/// All errors the registry can raise.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The topic pattern failed to compile as a regex.
    #[error("invalid topic pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it failed to compile.
        reason: String,
    },
    /// A filter expression failed validation.
    #[error(transparent)]
    Filter(#[from] filters::Error),
    /// No subscription exists with the given id.
    #[error("unknown subscription: {subscription_id}")]
    UnknownSubscription {
        /// The id that was looked up.
        subscription_id: String,
    },
    /// The index is out of range for the subscription's advanced filter
    /// list.
    #[error("advanced filter index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The current number of advanced filters.
        len: usize,
    },
}

#[derive(Default)]
struct State {
    by_id: HashMap<String, Subscription>,
    literal_index: HashMap<String, Vec<String>>,
    pattern_ids: Vec<String>,
}

/// Aggregate counters over the currently registered subscriptions, used
/// by the bus's `get_bus_stats` and for tests.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Total active subscriptions.
    pub total_subscriptions: usize,
    /// Subscriptions per distinct literal topic key.
    pub subscriptions_per_topic: HashMap<String, usize>,
    /// Subscriptions per consumer group (subscriptions without a group
    /// are not counted here).
    pub subscriptions_per_group: HashMap<String, usize>,
    /// Number of subscriptions whose handler is asynchronous.
    pub async_handlers: usize,
    /// Number of subscriptions whose handler is synchronous.
    pub sync_handlers: usize,
    /// Number of subscriptions carrying at least one simple filter.
    pub with_simple_filters: usize,
    /// Number of subscriptions carrying at least one advanced filter.
    pub with_advanced_filters: usize,
}

/// A thread-safe registry of subscriptions.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<Mutex<State>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscription, returning its freshly generated id
    /// and the constructed `Subscription`.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        topic: impl Into<String>,
        handler: HandlerKind,
        group: Option<String>,
        priority: i64,
        filters: HashMap<String, Value>,
        advanced_filters: Vec<FilterExpr>,
    ) -> Result<(String, Subscription), Error> {
        let topic = topic.into();
        for f in &advanced_filters {
            f.validate()?;
        }

        let topic_pattern = if looks_like_pattern(&topic) {
            Some(Arc::new(regex::Regex::new(&topic).map_err(|e| Error::InvalidPattern {
                pattern: topic.clone(),
                reason: e.to_string(),
            })?))
        } else {
            None
        };

        let subscription_id = uuid::Uuid::new_v4().to_string();
        let subscription = Subscription {
            subscription_id: subscription_id.clone(),
            topic: topic.clone(),
            topic_pattern,
            priority,
            group,
            filters,
            advanced_filters,
            handler,
            active: true,
            created_at: chrono::Utc::now(),
        };

        let mut state = self.state.lock().expect("subscription registry lock poisoned");
        let is_pattern = subscription.topic_pattern.is_some();
        let _ = state.by_id.insert(subscription_id.clone(), subscription.clone());
        state.literal_index.entry(topic).or_default().push(subscription_id.clone());
        if is_pattern {
            state.pattern_ids.push(subscription_id.clone());
        }

        tracing::info!(%subscription_id, topic = %subscription.topic, %priority, "subscription registered");
        Ok((subscription_id, subscription))
    }

    /// Unregisters a subscription by id. Returns false if no such
    /// subscription exists.
    pub fn unregister(&self, subscription_id: &str) -> bool {
        let mut state = self.state.lock().expect("subscription registry lock poisoned");
        let Some(subscription) = state.by_id.remove(subscription_id) else {
            return false;
        };
        if let Some(ids) = state.literal_index.get_mut(&subscription.topic) {
            ids.retain(|id| id != subscription_id);
        }
        state.pattern_ids.retain(|id| id != subscription_id);
        tracing::info!(%subscription_id, "subscription unregistered");
        true
    }

    /// Lists active subscriptions, optionally restricted to one literal
    /// topic key (not pattern-matched — this lists subscriptions
    /// registered under exactly that string).
    pub fn list(&self, topic: Option<&str>) -> Vec<Subscription> {
        let state = self.state.lock().expect("subscription registry lock poisoned");
        let mut result: Vec<Subscription> = match topic {
            Some(t) => state
                .literal_index
                .get(t)
                .into_iter()
                .flatten()
                .filter_map(|id| state.by_id.get(id).cloned())
                .collect(),
            None => state.by_id.values().cloned().collect(),
        };
        result.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.topic.cmp(&b.topic)));
        result
    }

    /// Returns the active subscriptions that match `topic`, combining
    /// literal registrations under that exact string with pattern
    /// subscriptions registered under a different topic key, sorted by
    /// priority descending.
    pub fn get_subscriptions_for_topic(&self, topic: &str) -> Vec<Subscription> {
        let state = self.state.lock().expect("subscription registry lock poisoned");
        let mut seen = HashSet::new();
        let mut matched = Vec::new();

        for id in state.literal_index.get(topic).into_iter().flatten() {
            if seen.insert(id.clone()) {
                if let Some(s) = state.by_id.get(id) {
                    if s.active {
                        matched.push(s.clone());
                    }
                }
            }
        }

        for id in &state.pattern_ids {
            if seen.contains(id) {
                continue;
            }
            if let Some(s) = state.by_id.get(id) {
                if s.active && matches_topic(s, topic) {
                    matched.push(s.clone());
                }
            }
        }

        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    /// Appends an advanced filter to a subscription.
    pub fn add_advanced_filter(&self, subscription_id: &str, filter: FilterExpr) -> Result<(), Error> {
        filter.validate()?;
        let mut state = self.state.lock().expect("subscription registry lock poisoned");
        let subscription = state.by_id.get_mut(subscription_id).ok_or_else(|| Error::UnknownSubscription {
            subscription_id: subscription_id.to_string(),
        })?;
        subscription.advanced_filters.push(filter);
        Ok(())
    }

    /// Removes the advanced filter at `index`.
    pub fn remove_advanced_filter(&self, subscription_id: &str, index: usize) -> Result<(), Error> {
        let mut state = self.state.lock().expect("subscription registry lock poisoned");
        let subscription = state.by_id.get_mut(subscription_id).ok_or_else(|| Error::UnknownSubscription {
            subscription_id: subscription_id.to_string(),
        })?;
        if index >= subscription.advanced_filters.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: subscription.advanced_filters.len(),
            });
        }
        let _ = subscription.advanced_filters.remove(index);
        Ok(())
    }

    /// Clears every advanced filter on a subscription.
    pub fn clear_advanced_filters(&self, subscription_id: &str) -> Result<(), Error> {
        let mut state = self.state.lock().expect("subscription registry lock poisoned");
        let subscription = state.by_id.get_mut(subscription_id).ok_or_else(|| Error::UnknownSubscription {
            subscription_id: subscription_id.to_string(),
        })?;
        subscription.advanced_filters.clear();
        Ok(())
    }

    /// Aggregate counters over all currently active subscriptions.
    pub fn get_handler_stats(&self) -> RegistryStats {
        let state = self.state.lock().expect("subscription registry lock poisoned");
        let mut stats = RegistryStats::default();
        for subscription in state.by_id.values().filter(|s| s.active) {
            stats.total_subscriptions += 1;
            *stats.subscriptions_per_topic.entry(subscription.topic.clone()).or_default() += 1;
            if let Some(group) = &subscription.group {
                *stats.subscriptions_per_group.entry(group.clone()).or_default() += 1;
            }
            if subscription.is_async() {
                stats.async_handlers += 1;
            } else {
                stats.sync_handlers += 1;
            }
            if !subscription.filters.is_empty() {
                stats.with_simple_filters += 1;
            }
            if !subscription.advanced_filters.is_empty() {
                stats.with_advanced_filters += 1;
            }
        }
        stats
    }
}

fn matches_topic(subscription: &Subscription, topic: &str) -> bool {
    match &subscription.topic_pattern {
        Some(pattern) => pattern.is_match(topic),
        None => subscription.topic == topic,
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use types::Event;

    use super::*;
    use crate::{Handler, HandlerError};

    struct NoopHandler;

    #[async_trait::async_trait]
    impl Handler for NoopHandler {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn handler() -> HandlerKind {
        HandlerKind::Async(Arc::new(NoopHandler))
    }

    #[test]
    fn literal_topic_registration_matches_exactly() {
        let registry = SubscriptionRegistry::new();
        let (id, _) = registry
            .register("HIPPO_ENCODE", handler(), None, 0, HashMap::new(), vec![])
            .unwrap();
        assert_eq!(registry.get_subscriptions_for_topic("HIPPO_ENCODE").len(), 1);
        assert_eq!(registry.get_subscriptions_for_topic("OTHER_TOPIC").len(), 0);
        assert!(registry.unregister(&id));
        assert_eq!(registry.get_subscriptions_for_topic("HIPPO_ENCODE").len(), 0);
    }

    #[test]
    fn pattern_topic_matches_other_literal_topics() {
        let registry = SubscriptionRegistry::new();
        let _ = registry
            .register("cognitive\\.memory\\..*", handler(), None, 0, HashMap::new(), vec![])
            .unwrap();
        let matched = registry.get_subscriptions_for_topic("cognitive.memory.write.initiated");
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn results_are_sorted_by_priority_descending() {
        let registry = SubscriptionRegistry::new();
        let _ = registry.register("T", handler(), None, 1, HashMap::new(), vec![]).unwrap();
        let _ = registry.register("T", handler(), None, 5, HashMap::new(), vec![]).unwrap();
        let _ = registry.register("T", handler(), None, 3, HashMap::new(), vec![]).unwrap();
        let matched = registry.get_subscriptions_for_topic("T");
        let priorities: Vec<i64> = matched.iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![5, 3, 1]);
    }

    #[test]
    fn advanced_filter_administration() {
        let registry = SubscriptionRegistry::new();
        let (id, _) = registry.register("T", handler(), None, 0, HashMap::new(), vec![]).unwrap();
        let filter = filters::FilterExpr::Simple {
            field_path: "payload.x".to_string(),
            expected_value: serde_json::json!(1),
            match_type: filters::MatchType::Exact,
        };
        registry.add_advanced_filter(&id, filter).unwrap();
        assert_eq!(registry.get_subscriptions_for_topic("T")[0].advanced_filters.len(), 1);
        registry.remove_advanced_filter(&id, 0).unwrap();
        assert_eq!(registry.get_subscriptions_for_topic("T")[0].advanced_filters.len(), 0);
        assert!(registry.remove_advanced_filter(&id, 0).is_err());
    }

    #[test]
    fn unregister_unknown_id_returns_false() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.unregister("does-not-exist"));
    }
}
