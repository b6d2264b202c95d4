//! # Pennant Core
//!
//! Core domain logic for Nubster Pennant - the flag evaluation engine.
//!
//! This crate provides the flag/segment/rule data model and the evaluation
//! pipeline, without any I/O dependencies. Storage adapters and the service
//! layer live in their own crates.
//!
//! ## Key Components
//!
//! - [`Flag`] - a named decision point with variants and targeting rules
//! - [`Segment`] - reusable user segments, referenced from constraints
//! - [`UserContext`] - the attribute bag a flag is evaluated against
//! - [`Evaluator`] - reduces (flag, context) to a variant value
//! - [`EvaluationRequest::fingerprint`] - the request hash used for caching
//!   and staleness detection
//!
//! ## Example
//!
//! ```rust
//! use pennant_core::{Evaluator, SegmentTable, UserContext};
//!
//! let segments = SegmentTable::new();
//! let evaluator = Evaluator::new(&segments);
//! let context = UserContext::new()
//!     .set("id", "user-123")
//!     .set("plan", "pro")
//!     .set("country", "FR");
//!
//! // let outcome = evaluator.evaluate(&flag, &context, false)?;
//! ```

pub mod context;
pub mod errors;
pub mod evaluation;
pub mod flag;
pub mod record;
pub mod request;
pub mod rule;
pub mod segment;
pub mod value;

// Re-exports for convenience
pub use context::{User, UserContext, ID_KEY};
pub use errors::{EvaluationError, ValidationError};
pub use evaluation::{bucket, pick_variant, EvaluationOutcome, Evaluator, StackFrame};
pub use flag::{Flag, FlagId, FlagKey, Variant, VariantId};
pub use record::{
    flag_cache_key, list_cache_key, Evaluation, EvaluationId, EvaluationList, CACHE_KEY_PATTERN,
};
pub use request::{EvaluationRequest, EvaluationResponse, EvaluationsResponse};
pub use rule::{Constraint, Distribution, FlagRule, Operation, RuleId};
pub use segment::{has_cycle, segment_table, Segment, SegmentId, SegmentRule, SegmentTable};
pub use value::Value;
