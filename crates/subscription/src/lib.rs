#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The subscription registry: thread-safe storage and lookup of
//! subscriptions with topic-pattern matching, priority ordering, and
//! filter administration.

pub mod handler;
pub mod registry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use filters::FilterExpr;
use serde_json::Value;

pub use handler::{Handler, HandlerError, SyncHandler};
pub use registry::{Error, SubscriptionRegistry};

/// Either flavor of handler a subscription may be registered with. The
/// variant itself records whether dispatch should run the handler on the
/// async scheduler or the synchronous worker pool, replacing the source's
/// separate `is_async` boolean with something the type system enforces.
#[derive(Clone)]
pub enum HandlerKind {
    /// Runs on the dispatcher's async scheduler.
    Async(Arc<dyn Handler>),
    /// Runs on the dispatcher's synchronous worker pool.
    Sync(Arc<dyn SyncHandler>),
}

impl HandlerKind {
    /// Whether this handler runs on the async scheduler.
    pub fn is_async(&self) -> bool {
        matches!(self, HandlerKind::Async(_))
    }
}

/// A registered interest in one topic (or topic pattern).
#[derive(Clone)]
pub struct Subscription {
    /// Unique id assigned at registration.
    pub subscription_id: String,
    /// The literal topic string this subscription was registered under.
    pub topic: String,
    /// The compiled pattern, present when `topic` contains pattern
    /// metacharacters (auto-detected the same way the source does: any of
    /// `* + . ^ $ [ ] ( ) ,`).
    pub topic_pattern: Option<Arc<regex::Regex>>,
    /// Higher values are matched and dispatched to first.
    pub priority: i64,
    /// An optional consumer-group label.
    pub group: Option<String>,
    /// Simple field-equality filters, checked before `advanced_filters`.
    pub filters: std::collections::HashMap<String, Value>,
    /// Advanced filter expressions, ANDed together and with `filters`.
    pub advanced_filters: Vec<FilterExpr>,
    /// The handler invoked on a match.
    pub handler: HandlerKind,
    /// Whether this subscription currently receives dispatches.
    pub active: bool,
    /// When this subscription was registered.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether `handler` runs asynchronously.
    pub fn is_async(&self) -> bool {
        self.handler.is_async()
    }
}

/// Characters whose presence in a topic string marks it as a pattern
/// rather than a literal topic, mirroring the source's syntactic
/// detection (no separate "is this a pattern" flag is ever passed in).
const PATTERN_METACHARACTERS: &[char] = &['*', '+', '^', '$', '[', ']', '(', ')', ','];

/// Returns true if `topic` should be treated as a regex pattern rather
/// than a literal topic string. A bare `.` is common in literal cognitive
/// topic names (`cognitive.memory.write.initiated`) so, unlike the other
/// metacharacters, it alone does not mark a pattern.
pub fn looks_like_pattern(topic: &str) -> bool {
    topic.chars().any(|c| PATTERN_METACHARACTERS.contains(&c))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literal_cognitive_topics_are_not_patterns() {
        assert!(!looks_like_pattern("cognitive.memory.write.initiated"));
        assert!(!looks_like_pattern("HIPPO_ENCODE"));
    }

    #[test]
    fn glob_and_regex_metacharacters_mark_a_pattern() {
        assert!(looks_like_pattern("cognitive.memory.*"));
        assert!(looks_like_pattern("^HIPPO_.*$"));
    }
}
