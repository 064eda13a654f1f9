//! Cognitive event catalog: the dotted, brain-inspired topics layered over
//! the base envelope, and the trace metadata the cognitive dispatcher reads
//! to make routing decisions.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed catalog of cognitive event types, grouped by the subsystem
/// that emits them. Each type is bound to a fixed neural pathway used for
/// the `events_by_neural_pathway` metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CognitiveEventType {
    /// A memory write has been initiated.
    MemoryWriteInitiated,
    /// A memory write's space has been resolved.
    MemorySpaceResolved,
    /// A memory write has been redacted.
    MemoryRedacted,
    /// A memory write has been committed.
    MemoryCommitted,
    /// A memory write has failed.
    MemoryFailed,
    /// Recall context has been requested.
    RecallContextRequested,
    /// Recall stores have been queried.
    RecallStoresQueried,
    /// Recall results have been fused.
    RecallResultsFused,
    /// A recall bundle has been assembled.
    RecallBundleAssembled,
    /// A recall bundle failed to assemble.
    RecallBundleFailed,
    /// The attention gate admitted an event.
    AttentionGateAdmit,
    /// The attention gate deferred an event.
    AttentionGateDefer,
    /// The attention gate boosted an event's salience.
    AttentionGateBoost,
    /// The attention gate dropped an event.
    AttentionGateDrop,
    /// Working memory has been updated.
    WorkingMemoryUpdated,
    /// An item has been evicted from working memory.
    WorkingMemoryEvicted,
    /// An arbitration decision has been requested.
    ArbitrationDecisionRequested,
    /// A habit has been evaluated during arbitration.
    ArbitrationHabitEvaluated,
    /// A planner has been evaluated during arbitration.
    ArbitrationPlannerEvaluated,
    /// An arbitration decision has been made.
    ArbitrationDecisionMade,
    /// An arbitration decision has failed.
    ArbitrationDecisionFailed,
    /// A learning outcome has been received.
    LearningOutcomeReceived,
    /// A habit has been updated from a learning outcome.
    LearningHabitUpdated,
    /// A planner has been updated from a learning outcome.
    LearningPlannerUpdated,
    /// The self model has been updated from a learning outcome.
    LearningSelfModelUpdated,
}

impl CognitiveEventType {
    /// All known cognitive event types, in catalog order.
    pub const ALL: &'static [CognitiveEventType] = &[
        Self::MemoryWriteInitiated,
        Self::MemorySpaceResolved,
        Self::MemoryRedacted,
        Self::MemoryCommitted,
        Self::MemoryFailed,
        Self::RecallContextRequested,
        Self::RecallStoresQueried,
        Self::RecallResultsFused,
        Self::RecallBundleAssembled,
        Self::RecallBundleFailed,
        Self::AttentionGateAdmit,
        Self::AttentionGateDefer,
        Self::AttentionGateBoost,
        Self::AttentionGateDrop,
        Self::WorkingMemoryUpdated,
        Self::WorkingMemoryEvicted,
        Self::ArbitrationDecisionRequested,
        Self::ArbitrationHabitEvaluated,
        Self::ArbitrationPlannerEvaluated,
        Self::ArbitrationDecisionMade,
        Self::ArbitrationDecisionFailed,
        Self::LearningOutcomeReceived,
        Self::LearningHabitUpdated,
        Self::LearningPlannerUpdated,
        Self::LearningSelfModelUpdated,
    ];

    /// Returns the dotted wire representation, e.g.
    /// `cognitive.memory.write.initiated`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryWriteInitiated => "cognitive.memory.write.initiated",
            Self::MemorySpaceResolved => "cognitive.memory.write.space_resolved",
            Self::MemoryRedacted => "cognitive.memory.write.redacted",
            Self::MemoryCommitted => "cognitive.memory.write.committed",
            Self::MemoryFailed => "cognitive.memory.write.failed",
            Self::RecallContextRequested => "cognitive.recall.context.requested",
            Self::RecallStoresQueried => "cognitive.recall.stores.queried",
            Self::RecallResultsFused => "cognitive.recall.results.fused",
            Self::RecallBundleAssembled => "cognitive.recall.bundle.assembled",
            Self::RecallBundleFailed => "cognitive.recall.bundle.failed",
            Self::AttentionGateAdmit => "cognitive.attention.gate.admit",
            Self::AttentionGateDefer => "cognitive.attention.gate.defer",
            Self::AttentionGateBoost => "cognitive.attention.gate.boost",
            Self::AttentionGateDrop => "cognitive.attention.gate.drop",
            Self::WorkingMemoryUpdated => "cognitive.working_memory.updated",
            Self::WorkingMemoryEvicted => "cognitive.working_memory.evicted",
            Self::ArbitrationDecisionRequested => "cognitive.arbitration.decision.requested",
            Self::ArbitrationHabitEvaluated => "cognitive.arbitration.habit.evaluated",
            Self::ArbitrationPlannerEvaluated => "cognitive.arbitration.planner.evaluated",
            Self::ArbitrationDecisionMade => "cognitive.arbitration.decision.made",
            Self::ArbitrationDecisionFailed => "cognitive.arbitration.decision.failed",
            Self::LearningOutcomeReceived => "cognitive.learning.outcome.received",
            Self::LearningHabitUpdated => "cognitive.learning.habit.updated",
            Self::LearningPlannerUpdated => "cognitive.learning.planner.updated",
            Self::LearningSelfModelUpdated => "cognitive.learning.self_model.updated",
        }
    }

    /// Parses the dotted wire representation back into a type.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// The neural pathway this event type is bound to.
    pub fn neural_pathway(&self) -> &'static str {
        match self {
            Self::MemoryWriteInitiated | Self::MemorySpaceResolved | Self::MemoryRedacted | Self::MemoryCommitted | Self::MemoryFailed => "hippocampal",
            Self::RecallContextRequested
            | Self::RecallStoresQueried
            | Self::RecallResultsFused
            | Self::RecallBundleAssembled
            | Self::RecallBundleFailed => "cortical",
            Self::AttentionGateAdmit | Self::AttentionGateDefer | Self::AttentionGateBoost | Self::AttentionGateDrop => {
                "thalamic"
            }
            Self::WorkingMemoryUpdated | Self::WorkingMemoryEvicted => "cortical",
            Self::ArbitrationDecisionRequested
            | Self::ArbitrationHabitEvaluated
            | Self::ArbitrationPlannerEvaluated
            | Self::ArbitrationDecisionMade
            | Self::ArbitrationDecisionFailed
            | Self::LearningOutcomeReceived
            | Self::LearningHabitUpdated
            | Self::LearningPlannerUpdated
            | Self::LearningSelfModelUpdated => "prefrontal",
        }
    }
}

impl fmt::Display for CognitiveEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing strategy a cognitive event may request, or that the dispatcher
/// falls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Cycle through eligible consumers in order.
    RoundRobin,
    /// Always pick the highest-scored eligible consumer.
    Priority,
    /// Pick the eligible consumer with the lowest current load.
    CognitiveLoad,
    /// Stick a session to the consumer it was first routed to.
    StickySession,
    /// Route to every eligible consumer.
    Broadcast,
}

impl RoutingStrategy {
    /// The per-event-type default strategy, applied ahead of the
    /// dispatcher's configured default when the trace carries no explicit
    /// strategy.
    pub fn default_for(event_type: CognitiveEventType) -> Option<Self> {
        match event_type {
            CognitiveEventType::MemoryWriteInitiated => Some(Self::Priority),
            CognitiveEventType::RecallContextRequested => Some(Self::CognitiveLoad),
            CognitiveEventType::AttentionGateAdmit => Some(Self::StickySession),
            CognitiveEventType::WorkingMemoryUpdated => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// Processing stage markers a cognitive event's trace advances through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    /// The event has been created but not yet routed.
    Created,
    /// The event has been routed to one or more consumers.
    Routed,
    /// The event is being processed by a consumer.
    Processing,
    /// The event has completed processing.
    Completed,
    /// The event has failed processing.
    Failed,
}

/// Trace metadata carried by a cognitive event, read by the dispatcher to
/// make routing and retry decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique id for this trace.
    pub trace_id: String,
    /// The trace this one was forked from, if any.
    pub parent_trace_id: Option<String>,
    /// The session this trace belongs to, used for sticky routing.
    pub session_id: Option<String>,
    /// Current processing stage.
    pub processing_stage: ProcessingStage,
    /// When the trace was created.
    pub created_at: DateTime<Utc>,
    /// Caller-assigned priority, 0 and up.
    pub priority: u32,
    /// Salience score in `[0.0, 1.0]` assigned by the attention gate.
    pub salience_score: f64,
    /// An explicit routing strategy override, if the producer wants one.
    pub routing_strategy: Option<RoutingStrategy>,
    /// Number of routing attempts made so far.
    pub routing_attempts: u32,
    /// Number of processing retries made so far.
    pub retry_count: u32,
    /// Observed cognitive load at the time of emission, if known.
    pub cognitive_load: Option<f64>,
}

impl Trace {
    /// Creates a new root trace with no parent.
    pub fn new(session_id: Option<String>, priority: u32) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            parent_trace_id: None,
            session_id,
            processing_stage: ProcessingStage::Created,
            created_at: Utc::now(),
            priority,
            salience_score: 0.0,
            routing_strategy: None,
            routing_attempts: 0,
            retry_count: 0,
            cognitive_load: None,
        }
    }
}

/// Neuromodulation signal accompanying a cognitive event (a small bag of
/// named scalar modulators, e.g. `{"dopamine": 0.3}`).
pub type Neuromodulation = HashMap<String, f64>;

/// A cognitive event: a layered envelope over a base `Event`, carrying the
/// routing trace and component coordination metadata the cognitive
/// dispatcher needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveEvent {
    /// The cognitive event type.
    pub event_type: CognitiveEventType,
    /// The routing trace.
    pub trace: Trace,
    /// The event payload.
    pub payload: serde_json::Value,
    /// The component that produced this event.
    pub source_component: String,
    /// The components this event is addressed to, if known ahead of
    /// routing (empty means "let the dispatcher decide").
    pub target_components: Vec<String>,
    /// Whether downstream components must coordinate before proceeding.
    pub requires_coordination: bool,
    /// The neural pathway this event travels, defaults to
    /// `event_type.neural_pathway()`.
    pub neural_pathway: String,
    /// Whether this event should trigger synaptic plasticity updates.
    pub plasticity_required: bool,
    /// Accompanying neuromodulation signal, if any.
    pub neuromodulation: Option<Neuromodulation>,
}

impl CognitiveEvent {
    /// Creates a new cognitive event, defaulting the neural pathway from
    /// the event type's fixed pathway.
    pub fn new(event_type: CognitiveEventType, trace: Trace, payload: serde_json::Value, source_component: impl Into<String>) -> Self {
        Self {
            neural_pathway: event_type.neural_pathway().to_string(),
            event_type,
            trace,
            payload,
            source_component: source_component.into(),
            target_components: Vec::new(),
            requires_coordination: false,
            plasticity_required: false,
            neuromodulation: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_every_catalog_entry() {
        for &t in CognitiveEventType::ALL {
            let s = t.as_str();
            assert_eq!(CognitiveEventType::parse(s), Some(t));
        }
    }

    #[test]
    fn per_type_strategy_defaults_match_catalog() {
        assert_eq!(
            RoutingStrategy::default_for(CognitiveEventType::MemoryWriteInitiated),
            Some(RoutingStrategy::Priority)
        );
        assert_eq!(
            RoutingStrategy::default_for(CognitiveEventType::RecallContextRequested),
            Some(RoutingStrategy::CognitiveLoad)
        );
        assert_eq!(
            RoutingStrategy::default_for(CognitiveEventType::AttentionGateAdmit),
            Some(RoutingStrategy::StickySession)
        );
        assert_eq!(
            RoutingStrategy::default_for(CognitiveEventType::WorkingMemoryUpdated),
            Some(RoutingStrategy::Broadcast)
        );
        assert_eq!(RoutingStrategy::default_for(CognitiveEventType::RecallBundleFailed), None);
    }

    #[test]
    fn neural_pathway_is_fixed_per_domain() {
        assert_eq!(CognitiveEventType::MemoryWriteInitiated.neural_pathway(), "hippocampal");
        assert_eq!(CognitiveEventType::RecallContextRequested.neural_pathway(), "cortical");
        assert_eq!(CognitiveEventType::AttentionGateAdmit.neural_pathway(), "thalamic");
        assert_eq!(CognitiveEventType::ArbitrationDecisionMade.neural_pathway(), "prefrontal");
    }
}
