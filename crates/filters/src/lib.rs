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

//! The filter engine: a tagged-union `FilterExpr` and its evaluation
//! semantics against a published event.

pub mod path;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::Event;

/// All errors that can occur while validating or evaluating a filter.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The filter expression failed validation at registration time.
    #[error("invalid filter (reason: {reason})")]
    Validation {
        /// Why the filter is invalid.
        reason: String,
    },
}

/// How a `Simple` or `JsonPath` filter compares the extracted value
/// against the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// The extracted value equals the expected value exactly.
    Exact,
    /// The extracted value matches a regular expression.
    Regex,
    /// The extracted value (string or array) contains the expected value.
    Contains,
    /// The extracted value is strictly greater than the expected value.
    Gt,
    /// The extracted value is strictly less than the expected value.
    Lt,
    /// The extracted value is greater than or equal to the expected value.
    Gte,
    /// The extracted value is less than or equal to the expected value.
    Lte,
    /// At least one extracted value (from a `JsonPath` wildcard) matches.
    Any,
    /// Every extracted value (from a `JsonPath` wildcard) matches.
    All,
}

impl MatchType {
    fn is_comparison(self) -> bool {
        matches!(self, MatchType::Gt | MatchType::Lt | MatchType::Gte | MatchType::Lte)
    }
}

/// The logical operator a `Compound` filter applies to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
    /// The single child must not match.
    Not,
}

/// The outcome of evaluating a filter expression against an event.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    /// Whether the filter matched.
    pub matches: bool,
    /// An error encountered during evaluation, if any. Evaluation errors
    /// never propagate; they are folded into a non-matching result.
    pub error: Option<String>,
    /// How long evaluation took.
    pub execution_time_ms: f64,
    /// Free-form metadata describing the match (e.g. which JSONPath
    /// elements matched), useful for debugging.
    pub metadata: HashMap<String, String>,
}

impl FilterResult {
    fn ok(matches: bool, execution_time_ms: f64) -> Self {
        Self {
            matches,
            error: None,
            execution_time_ms,
            metadata: HashMap::new(),
        }
    }

    fn err(error: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            matches: false,
            error: Some(error.into()),
            execution_time_ms,
            metadata: HashMap::new(),
        }
    }
}

/// A filter expression. Validated eagerly on construction so that a
/// misconfigured filter is rejected at registration time rather than
/// silently never matching at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FilterExpr {
    /// Compares one field, extracted by dotted path, against an expected
    /// value.
    Simple {
        /// The dotted field path, e.g. `"actor.user_id"`.
        field_path: String,
        /// The value to compare against.
        expected_value: Value,
        /// How to compare.
        match_type: MatchType,
    },
    /// Compares the result of a JSONPath-like expression against an
    /// expected value.
    JsonPath {
        /// The JSONPath expression, starting with `$`.
        expr: String,
        /// The value to compare against.
        expected: Value,
        /// How to compare.
        match_type: MatchType,
    },
    /// Delegates to a named predicate registered with a `FilterManager`.
    CustomFunction {
        /// The registered predicate's name.
        name: String,
    },
    /// Combines child expressions with a logical operator.
    Compound {
        /// The operator to apply.
        operator: Operator,
        /// The child expressions. Must be non-empty; `Not` must have
        /// exactly one child.
        children: Vec<FilterExpr>,
    },
}

impl FilterExpr {
    /// Validates this expression, checking invariants that evaluation
    /// assumes hold (a `Compound` has at least one child, `Not` has
    /// exactly one, regex patterns compile).
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            FilterExpr::Simple { field_path, match_type, expected_value } => {
                if field_path.is_empty() {
                    return Err(Error::Validation {
                        reason: "field_path must not be empty".to_string(),
                    });
                }
                if *match_type == MatchType::Regex {
                    let pattern = expected_value.as_str().ok_or_else(|| Error::Validation {
                        reason: "regex match_type requires a string expected_value".to_string(),
                    })?;
                    let _ = Regex::new(pattern).map_err(|e| Error::Validation { reason: e.to_string() })?;
                }
                Ok(())
            }
            FilterExpr::JsonPath { expr, match_type, expected } => {
                if !expr.starts_with('$') {
                    return Err(Error::Validation {
                        reason: "jsonpath expr must start with '$'".to_string(),
                    });
                }
                if *match_type == MatchType::Regex {
                    let pattern = expected.as_str().ok_or_else(|| Error::Validation {
                        reason: "regex match_type requires a string expected value".to_string(),
                    })?;
                    let _ = Regex::new(pattern).map_err(|e| Error::Validation { reason: e.to_string() })?;
                }
                Ok(())
            }
            FilterExpr::CustomFunction { name } => {
                if name.is_empty() {
                    return Err(Error::Validation {
                        reason: "custom function name must not be empty".to_string(),
                    });
                }
                Ok(())
            }
            FilterExpr::Compound { operator, children } => {
                if children.is_empty() {
                    return Err(Error::Validation {
                        reason: "compound filter requires at least one child".to_string(),
                    });
                }
                if *operator == Operator::Not && children.len() != 1 {
                    return Err(Error::Validation {
                        reason: "NOT requires exactly one child".to_string(),
                    });
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }
}

/// A named predicate a `CustomFunction` filter delegates to.
pub trait FilterPredicate: Send + Sync {
    /// Evaluates the predicate against an event.
    fn eval(&self, event: &Event) -> bool;
}

impl<F> FilterPredicate for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn eval(&self, event: &Event) -> bool {
        self(event)
    }
}

/// Evaluates filter expressions against events, owning the registry of
/// named custom predicates `CustomFunction` filters delegate to.
#[derive(Clone, Default)]
pub struct FilterManager {
    predicates: Arc<Mutex<HashMap<String, Arc<dyn FilterPredicate>>>>,
}

impl FilterManager {
    /// Creates an empty filter manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named predicate for `CustomFunction` filters to
    /// delegate to.
    pub fn register_predicate(&self, name: impl Into<String>, predicate: impl FilterPredicate + 'static) {
        let _ = self
            .predicates
            .lock()
            .expect("filter predicate registry lock poisoned")
            .insert(name.into(), Arc::new(predicate));
    }

    /// Evaluates a single filter expression against an event.
    pub fn evaluate(&self, expr: &FilterExpr, event: &Event) -> FilterResult {
        let start = Instant::now();
        let root = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => return FilterResult::err(format!("failed to project event to json: {e}"), elapsed_ms(start)),
        };
        let matches = self.evaluate_inner(expr, event, &root);
        match matches {
            Ok(m) => FilterResult::ok(m, elapsed_ms(start)),
            Err(e) => FilterResult::err(e, elapsed_ms(start)),
        }
    }

    /// Evaluates a list of filter expressions, ANDing their results
    /// together. An empty list matches everything.
    pub fn evaluate_all(&self, exprs: &[FilterExpr], event: &Event) -> FilterResult {
        let start = Instant::now();
        for expr in exprs {
            let result = self.evaluate(expr, event);
            if !result.matches {
                return FilterResult {
                    execution_time_ms: elapsed_ms(start),
                    ..result
                };
            }
        }
        FilterResult::ok(true, elapsed_ms(start))
    }

    fn evaluate_inner(&self, expr: &FilterExpr, event: &Event, root: &Value) -> Result<bool, String> {
        match expr {
            FilterExpr::Simple {
                field_path,
                expected_value,
                match_type,
            } => {
                let actual = path::get_field_value(root, field_path);
                Ok(match actual {
                    Some(v) => matches_value(v, expected_value, *match_type),
                    None => false,
                })
            }
            FilterExpr::JsonPath { expr, expected, match_type } => {
                let matched = path::evaluate_json_path(root, expr);
                Ok(match match_type {
                    MatchType::Any => matched.iter().any(|v| matches_value(v, expected, MatchType::Exact)),
                    MatchType::All => !matched.is_empty() && matched.iter().all(|v| matches_value(v, expected, MatchType::Exact)),
                    other => matched.iter().any(|v| matches_value(v, expected, *other)),
                })
            }
            FilterExpr::CustomFunction { name } => {
                let predicates = self.predicates.lock().expect("filter predicate registry lock poisoned");
                match predicates.get(name) {
                    Some(predicate) => Ok(predicate.eval(event)),
                    None => Err(format!("no custom filter predicate registered under {name:?}")),
                }
            }
            FilterExpr::Compound { operator, children } => match operator {
                Operator::And => {
                    for child in children {
                        if !self.evaluate_inner(child, event, root)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Operator::Or => {
                    for child in children {
                        if self.evaluate_inner(child, event, root)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                Operator::Not => Ok(!self.evaluate_inner(&children[0], event, root)?),
            },
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn matches_value(actual: &Value, expected: &Value, match_type: MatchType) -> bool {
    match match_type {
        MatchType::Exact | MatchType::Any | MatchType::All => actual == expected,
        MatchType::Regex => {
            let (Some(actual_str), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            Regex::new(pattern).map(|re| re.is_match(actual_str)).unwrap_or(false)
        }
        MatchType::Contains => match (actual, expected) {
            (Value::String(a), Value::String(e)) => a.contains(e.as_str()),
            (Value::Array(items), e) => items.contains(e),
            _ => false,
        },
        mt if mt.is_comparison() => {
            let (Some(a), Some(e)) = (actual.as_f64(), expected.as_f64()) else {
                return false;
            };
            match mt {
                MatchType::Gt => a > e,
                MatchType::Lt => a < e,
                MatchType::Gte => a >= e,
                MatchType::Lte => a <= e,
                _ => unreachable!(),
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use serde_json::json;
    use types::{Actor, Band, Device, Event, Qos, Signature};

    use super::*;

    fn sample_event(priority: u32) -> Event {
        Event::new(
            types::Topic::HippoEncode,
            Actor {
                user_id: "u1".to_string(),
                capabilities: HashSet::new(),
                agent_id: None,
            },
            Device {
                device_id: "d1".to_string(),
                platform: None,
                app_version: None,
                locale: None,
            },
            "space-1",
            Band::Green,
            "v1",
            Qos {
                priority,
                latency_budget_ms: 1000,
                routing: "gate-path".to_string(),
                retries: 0,
                deadline_ms: None,
            },
            HashSet::new(),
            json!({"amount": 42, "tags": ["a", "b"]}),
            "deadbeef",
            Signature {
                alg: "ed25519".to_string(),
                key_id: "k".to_string(),
                signature: "s".to_string(),
            },
        )
    }

    #[test]
    fn simple_exact_match_on_payload_field() {
        let manager = FilterManager::new();
        let expr = FilterExpr::Simple {
            field_path: "payload.amount".to_string(),
            expected_value: json!(42),
            match_type: MatchType::Exact,
        };
        assert!(expr.validate().is_ok());
        assert!(manager.evaluate(&expr, &sample_event(5)).matches);
    }

    #[test]
    fn simple_gt_match_on_qos_priority() {
        let manager = FilterManager::new();
        let expr = FilterExpr::Simple {
            field_path: "qos.priority".to_string(),
            expected_value: json!(3),
            match_type: MatchType::Gt,
        };
        assert!(manager.evaluate(&expr, &sample_event(5)).matches);
        assert!(!manager.evaluate(&expr, &sample_event(1)).matches);
    }

    #[test]
    fn missing_field_never_matches_and_never_errors() {
        let manager = FilterManager::new();
        let expr = FilterExpr::Simple {
            field_path: "payload.nonexistent".to_string(),
            expected_value: json!(1),
            match_type: MatchType::Exact,
        };
        let result = manager.evaluate(&expr, &sample_event(5));
        assert!(!result.matches);
        assert!(result.error.is_none());
    }

    #[test]
    fn invalid_regex_fails_validation_eagerly() {
        let expr = FilterExpr::Simple {
            field_path: "payload.amount".to_string(),
            expected_value: json!("("),
            match_type: MatchType::Regex,
        };
        assert!(expr.validate().is_err());
    }

    #[test]
    fn compound_not_requires_single_child() {
        let expr = FilterExpr::Compound {
            operator: Operator::Not,
            children: vec![
                FilterExpr::Simple {
                    field_path: "payload.amount".to_string(),
                    expected_value: json!(1),
                    match_type: MatchType::Exact,
                },
                FilterExpr::Simple {
                    field_path: "payload.amount".to_string(),
                    expected_value: json!(2),
                    match_type: MatchType::Exact,
                },
            ],
        };
        assert!(expr.validate().is_err());
    }

    #[test]
    fn compound_and_or_not_compose() {
        let manager = FilterManager::new();
        let gt = FilterExpr::Simple {
            field_path: "payload.amount".to_string(),
            expected_value: json!(10),
            match_type: MatchType::Gt,
        };
        let not_gt = FilterExpr::Compound {
            operator: Operator::Not,
            children: vec![gt],
        };
        assert!(!manager.evaluate(&not_gt, &sample_event(5)).matches);
    }

    #[test]
    fn custom_function_delegates_to_registered_predicate() {
        let manager = FilterManager::new();
        manager.register_predicate("high_priority", |e: &Event| e.qos.priority >= 5);
        let expr = FilterExpr::CustomFunction {
            name: "high_priority".to_string(),
        };
        assert!(manager.evaluate(&expr, &sample_event(5)).matches);
        assert!(!manager.evaluate(&expr, &sample_event(1)).matches);
    }

    #[test]
    fn unregistered_custom_function_errors_without_matching() {
        let manager = FilterManager::new();
        let expr = FilterExpr::CustomFunction {
            name: "missing".to_string(),
        };
        let result = manager.evaluate(&expr, &sample_event(5));
        assert!(!result.matches);
        assert!(result.error.is_some());
    }

    #[test]
    fn json_path_any_and_all_over_wildcard() {
        let manager = FilterManager::new();
        let any = FilterExpr::JsonPath {
            expr: "$.payload.tags[*]".to_string(),
            expected: json!("a"),
            match_type: MatchType::Any,
        };
        assert!(manager.evaluate(&any, &sample_event(5)).matches);

        let all = FilterExpr::JsonPath {
            expr: "$.payload.tags[*]".to_string(),
            expected: json!("a"),
            match_type: MatchType::All,
        };
        assert!(!manager.evaluate(&all, &sample_event(5)).matches);
    }
}
