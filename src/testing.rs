//! Testing utilities for conduit pipelines.
//!
//! This module helps users write tests for their own stages and pipeline
//! configurations. It includes:
//!
//! - **Assertions**: Compare output messages with expected payloads
//! - **Message builders**: Build batches of data and control messages
//! - **Fixtures**: Stages that record, fail or count what they see
//!
//! # Quick Start
//!
//! ```
//! use conduit::testing::*;
//! use conduit::{Context, Pipeline, Registry};
//!
//! let pipeline = Pipeline::from_json(&Registry::default(), r#"{
//!     "transforms": [{"type": "object_insert", "settings": {"object": {"target_key": "x"}, "value": 1}}]
//! }"#).unwrap();
//!
//! let batch = MessageBuilder::new().json(r#"{"a":1}"#).control().build();
//! let out = pipeline.apply(&Context::background(), batch).unwrap();
//!
//! assert_payloads(&out, &[r#"{"a":1,"x":1}"#]);
//! assert_ends_with_control(&out);
//! ```
//!
//! # Fixtures
//!
//! [`RecordingTransform`] keeps a copy of everything it passes on, and
//! [`FlakyTransform`] fails a fixed number of times before succeeding,
//! which is handy for exercising `meta_retry` and `meta_err`. Both can be
//! registered under a type name with [`register_fixtures`].

pub mod assertions;
pub mod builders;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
