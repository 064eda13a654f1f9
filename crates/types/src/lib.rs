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

//! Core data types shared by every layer of the event bus: the base event
//! envelope, the topic namespace, and the cognitive event catalog layered
//! on top of it.

pub mod cognitive;
pub mod event;
pub mod id;
pub mod topic;

pub use cognitive::{CognitiveEvent, CognitiveEventType, Neuromodulation, ProcessingStage, RoutingStrategy, Trace};
pub use event::{Actor, Band, Capability, Device, Event, Hashes, Obligation, Qos, Signature, SCHEMA_VERSION};
pub use id::new_event_id;
pub use topic::{validate_topic_format, Topic};
