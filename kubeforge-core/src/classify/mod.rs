//! Provider error taxonomy.
//!
//! `predicates` are pure checks over provider error shapes, `reasons` matches
//! install logs against known failure signatures, and `pipeline` chains both
//! into the single decision of what a caller is allowed to see.

pub mod pipeline;
pub mod predicates;
pub mod reasons;

pub use pipeline::{Classifier, Subject, UserErrorPipeline};
pub use predicates::*;
pub use reasons::{FailureReason, MatchedReason, identify_reason};
