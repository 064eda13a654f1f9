#![doc = include_str!("../README.md")]
#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results,
    variant_size_differences
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! `cognitive-bus` is an in-process, cognitively-aware event bus and
//! cognitive event router. It composes:
//!
//! - a persistent, topic-addressed publish/subscribe substrate
//!   ([`bus`], built from [`subscription`], [`filters`], [`dispatch`], and
//!   [`wal`]);
//! - a health-aware cognitive dispatcher ([`cognitive`]) that routes
//!   brain-inspired events to consumer groups under adaptive backpressure
//!   ([`backpressure`]), with dead-letter handling and retry ([`dlq`]);
//! - a consumer group manager ([`consumer_groups`]) sharing consumer health
//!   state with the cognitive dispatcher through [`consumer_registry`].
//!
//! Every tunable across these crates loads from one YAML document via
//! [`config::BusConfig`]. `context` and `task` are ambient infrastructure: an
//! init-time key/value bag for collaborators this crate treats as opaque
//! (schema providers, tracers, metrics sinks), and background-task
//! bookkeeping shared by every component's maintenance loop.
//!
//! # Wiring
//!
//! Collaborators are constructed and injected explicitly; there are no
//! process-wide default instances. A typical wiring, sharing one
//! [`task::TaskManager`] scope and one shutdown signal across every
//! background loop:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! let bus_config = config::BusConfig::default();
//! let event_bus = bus::EventBus::with_defaults(bus::EventBusConfig {
//!     wal: bus_config.persistence.clone(),
//!     dispatcher: bus_config.dispatcher.clone(),
//! })
//! .expect("valid bus config");
//!
//! let consumers = Arc::new(consumer_registry::ConsumerRegistry::new());
//! let cognitive_dispatcher = Arc::new(cognitive::CognitiveDispatcher::new(
//!     Arc::clone(&consumers),
//!     bus_config.cognitive.clone(),
//! ));
//! let backpressure = Arc::new(backpressure::BackpressureController::new(bus_config.backpressure.clone()));
//! let dlq = Arc::new(dlq::DeadLetterQueue::new(bus_config.dlq.base.clone()));
//! let groups = Arc::new(consumer_groups::ConsumerGroupManager::new(Arc::clone(&consumers), 120.0, 30));
//!
//! let task_manager = event_bus.task_manager();
//! let shutdown = event_bus.shutdown_signal();
//! cognitive_dispatcher
//!     .start_with_bus(&event_bus, task_manager.clone(), shutdown.clone())
//!     .expect("cognitive subscriptions registered");
//! backpressure.start(task_manager.clone(), shutdown.clone());
//! dlq.start(task_manager.clone(), shutdown.clone());
//! groups.start(task_manager, shutdown);
//! ```
//!
//! `dlq`'s own persisted-state hooks
//! (`DeadLetterQueue::load_persisted_state`/`persist_state`) and
//! `consumer_groups`'s scaling decisions are documented no-ops/observations
//! respectively; see each crate's docs for the open questions they resolve.

pub use backpressure;
pub use bus;
pub use cognitive;
pub use config;
pub use consumer_groups;
pub use consumer_registry;
pub use context;
pub use dispatch;
pub use dlq;
pub use filters;
pub use subscription;
pub use task;
pub use types;
pub use wal;
