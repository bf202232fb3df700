//! Candidate detection: fixed-pattern matching, entity-model extraction,
//! context windows, and the detection stage that feeds the Pending store.

pub mod context;
pub mod matcher;
pub mod model;
pub mod patterns;
pub mod stage;

pub use matcher::{Finding, Matcher};
pub use model::{EntityModel, EntitySpan, HttpEntityModel, ModelError};
pub use stage::{run_detection, DetectionOutcome, SourceText};
