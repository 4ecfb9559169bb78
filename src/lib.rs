//! # Conduit
//!
//! A **composable record-transformation pipeline** for Rust. Conduit threads
//! discrete records ("messages") through a list of independently configured
//! stages that reshape, buffer, route and fan them out. Pipelines are
//! declared as JSON and assembled from a registry of stage types, so ETL and
//! event-processing flows can be built without writing new code.
//!
//! ## Key Features
//!
//! - **Declarative configuration** - every stage is a `{type, settings}` pair
//! - **Data and control messages** - control messages trigger buffered stages to flush
//! - **Path-addressable payloads** - read and write JSON values with dotted paths
//! - **Bounded aggregation** - per-key buffers limited by count, size and age
//! - **Meta stages** - sub-pipelines, conditional routing, retries, error suppression,
//!   per-element iteration, timing and distributed locking
//! - **Shared, thread-safe stages** - one pipeline serves many concurrent batches
//! - **Pluggable** - register your own stages, inspectors, lock stores and metric sinks
//!
//! ## Quick Start
//!
//! ```
//! use conduit::*;
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = Pipeline::from_json(&Registry::default(), r#"{
//!     "transforms": [
//!         {"type": "object_insert", "settings": {"object": {"target_key": "seen"}, "value": true}},
//!         {"type": "aggregate_to_array", "settings": {"batch": {"count": 10}}}
//!     ]
//! }"#)?;
//!
//! let out = pipeline.apply(&Context::background(), vec![
//!     Message::new(r#"{"id":1}"#),
//!     Message::new(r#"{"id":2}"#),
//!     Message::control(),
//! ])?;
//!
//! assert_eq!(out[0].payload(), br#"[{"id":1,"seen":true},{"id":2,"seen":true}]"#);
//! assert!(out[1].is_control());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Message
//!
//! A [`Message`] is either `Data` (payload bytes plus metadata bytes) or
//! `Control`. Values inside a JSON payload are addressed by path through
//! [`Message::get_value`] and [`Message::set_value`]; the `"meta "` key prefix
//! addresses the metadata instead. See [`value`] for the path syntax.
//!
//! ### Transform
//!
//! Every stage implements [`Transform`]: one message in, zero or more out.
//! Stages that buffer data emit what they hold when a control message
//! arrives, then forward the control message so later stages flush too.
//!
//! ### Apply
//!
//! [`apply`] runs a batch through a list of stages. Each stage processes the
//! complete output of the previous one, and the first error aborts the whole
//! call.
//!
//! ### Aggregation
//!
//! [`Aggregate`] is the bounded, partitioned buffer behind
//! `aggregate_to_array`, `aggregate_to_string`, `send_file` and
//! `utility_control`. A partition that cannot accept another item is drained
//! into an output message and restarted with that item.
//!
//! ### Meta stages
//!
//! | type | behavior |
//! |---|---|
//! | `meta_pipeline` | run a sub-pipeline over the message or one of its values |
//! | `meta_switch` | route to the first case whose condition matches |
//! | `meta_retry` | rerun a sub-pipeline until a condition holds, with linear backoff |
//! | `meta_err` | turn selected sub-pipeline errors into a pass-through |
//! | `meta_for_each` | run a sub-pipeline over every element of an array |
//! | `meta_kv_store_lock` | run a sub-pipeline only for keys this stage could lock |
//! | `meta_metric_duration` | report time spent in a sub-pipeline |
//!
//! ### Conditions
//!
//! `meta_switch` and `meta_retry` evaluate a [`condition::Condition`]: an
//! `all`/`any`/`none` operator over a list of inspectors such as
//! `string_equal_to` or `number_greater_than`.
//!
//! ## Concurrency
//!
//! Stages are `Send + Sync` and keep their state behind mutexes or atomics,
//! so a single [`Pipeline`] can be driven from many threads.
//! [`Pipeline::apply_par`] runs independent batches on a rayon pool sized by
//! the `concurrency` setting, the `CONDUIT_CONCURRENCY` environment variable,
//! or the CPU count. There is no background flushing: buffers only drain
//! when a bound is hit on insert or a control message arrives.
//!
//! ## Errors and logging
//!
//! Library calls return [`Result`] with the typed [`Error`]; construction
//! entry points on [`Pipeline`] return `anyhow::Result` with context. Stage
//! errors are wrapped with the stage id, so nested failures read like a
//! path. Logging goes through `tracing`; the crate never installs a
//! subscriber.
//!
//! ## Feature Flags
//!
//! - `parallel` (default) - Enable [`Pipeline::apply_par`]
//!
//! ## Module Overview
//!
//! - [`message`] / [`value`] - Messages and path access
//! - [`transform`] - The stage contract, the driver and every built-in stage
//! - [`aggregate`] - Bounded per-key buffering
//! - [`condition`] - Operators and inspectors
//! - [`kv`] - Lock stores
//! - [`metrics`] - Metric destinations
//! - [`registry`] - Factories for all of the above
//! - [`pipeline`] - JSON-configured pipelines and parallel execution
//! - [`testing`] - Helpers for testing pipelines

pub mod aggregate;
pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod kv;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod testing;
pub mod transform;
pub mod value;

pub use aggregate::{Aggregate, Bounds};
pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};
pub use message::{Data, Message};
pub use pipeline::{ExecMode, Pipeline, PipelineConfig};
pub use registry::Registry;
pub use transform::{Transform, apply};
pub use value::Value;
