//! Error types for Pennant evaluation and validation.

use thiserror::Error;

use crate::flag::{FlagKey, VariantId};

/// Errors raised while evaluating a flag.
///
/// Soft failures (missing properties, value type mismatches, non-numeric
/// strings in comparisons) degrade to a non-match and never surface here;
/// these variants cover genuinely malformed flag data.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// A `MATCHES_REGEX` constraint carries an invalid pattern.
    #[error("invalid regular expression {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// An `IS_IN_NETWORK` constraint carries an unparsable CIDR block.
    #[error("invalid CIDR block: {0:?}")]
    InvalidCidr(String),

    /// A distribution or default references a variant the flag does not own.
    #[error("unknown variant: {0}")]
    UnknownVariant(VariantId),

    /// A matching rule produced no variant (its distribution is empty).
    #[error("no variant resolvable for flag {0}")]
    NoVariant(FlagKey),
}

/// Errors raised when validating admin-written flag data.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Distributions on a rule must sum to exactly 100.
    #[error("distributions must sum to 100, got {0}")]
    DistributionSum(u32),

    /// A distribution references a variant outside the owning flag.
    #[error("distribution references variant {0} outside the flag")]
    ForeignVariant(VariantId),

    /// Evaluation requests must carry a non-empty user ID.
    #[error("user id must not be empty")]
    EmptyUserId,

    /// Flag keys must be non-empty and URL-safe.
    #[error("invalid flag key: {0:?}")]
    InvalidFlagKey(String),
}
