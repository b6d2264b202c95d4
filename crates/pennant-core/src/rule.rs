//! Targeting rules, constraints and variant distributions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ValidationError;
use crate::flag::{Variant, VariantId};
use crate::segment::SegmentId;
use crate::value::Value;

/// Unique identifier for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    /// Creates a new random rule ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Constraint operators, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Context value equals any of the listed values (type-strict).
    OneOf,
    /// Context value equals none of the listed values.
    NotOneOf,
    /// Numeric greater than.
    Greater,
    /// Numeric greater than or equal.
    GreaterOrEqual,
    /// Numeric less than.
    Lower,
    /// Numeric less than or equal.
    LowerOrEqual,
    /// The property is present in the context.
    Exists,
    /// The property is absent from the context.
    DoesntExist,
    /// String contains substring.
    Contains,
    /// String does not contain substring.
    DoesntContain,
    /// String starts with prefix.
    StartsWith,
    /// String does not start with prefix.
    DoesntStartWith,
    /// String ends with suffix.
    EndsWith,
    /// String does not end with suffix.
    DoesntEndWith,
    /// String matches a regular expression.
    MatchesRegex,
    /// String does not match a regular expression.
    DoesntMatchRegex,
    /// User belongs to any of the listed segments.
    IsInSegment,
    /// User belongs to none of the listed segments.
    IsntInSegment,
    /// Context value is an IP inside any of the listed CIDR blocks.
    IsInNetwork,
}

impl Operation {
    /// True for the negated operators, where a missing property counts as a
    /// match. `DOESNT_EXIST` is handled explicitly by the evaluator and is
    /// deliberately not part of this set.
    pub fn matches_on_missing(&self) -> bool {
        matches!(
            self,
            Operation::NotOneOf
                | Operation::DoesntContain
                | Operation::DoesntStartWith
                | Operation::DoesntEndWith
                | Operation::DoesntMatchRegex
        )
    }
}

/// A (property, operator, values) predicate over the user context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Property path to check (dotted paths descend into nested objects).
    pub property: String,
    /// Comparison operator.
    pub operation: Operation,
    /// Operands; their meaning depends on the operator.
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Constraint {
    /// Creates a new constraint.
    pub fn new(
        property: impl Into<String>,
        operation: Operation,
        values: Vec<Value>,
    ) -> Self {
        Self {
            property: property.into(),
            operation,
            values,
        }
    }

    /// Creates a `ONE_OF` constraint over string values.
    pub fn one_of(property: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(
            property,
            Operation::OneOf,
            values.into_iter().map(Value::String).collect(),
        )
    }

    /// Creates a `NOT_ONE_OF` constraint over string values.
    pub fn not_one_of(property: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(
            property,
            Operation::NotOneOf,
            values.into_iter().map(Value::String).collect(),
        )
    }

    /// Creates a numeric comparison constraint.
    pub fn numeric(property: impl Into<String>, operation: Operation, value: f64) -> Self {
        Self::new(property, operation, vec![Value::Float(value)])
    }

    /// Creates an `EXISTS` constraint.
    pub fn exists(property: impl Into<String>) -> Self {
        Self::new(property, Operation::Exists, Vec::new())
    }

    /// Creates a `CONTAINS` constraint.
    pub fn contains(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(property, Operation::Contains, vec![Value::String(value.into())])
    }

    /// Creates a `STARTS_WITH` constraint.
    pub fn starts_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(property, Operation::StartsWith, vec![Value::String(value.into())])
    }

    /// Creates an `ENDS_WITH` constraint.
    pub fn ends_with(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(property, Operation::EndsWith, vec![Value::String(value.into())])
    }

    /// Creates a `MATCHES_REGEX` constraint.
    pub fn matches_regex(property: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(property, Operation::MatchesRegex, vec![Value::String(pattern.into())])
    }

    /// Creates an `IS_IN_SEGMENT` constraint.
    pub fn is_in_segment(segment_id: SegmentId) -> Self {
        Self::new(
            "",
            Operation::IsInSegment,
            vec![Value::String(segment_id.to_string())],
        )
    }

    /// Creates an `IS_IN_NETWORK` constraint over CIDR blocks.
    pub fn is_in_network(property: impl Into<String>, cidrs: Vec<String>) -> Self {
        Self::new(
            property,
            Operation::IsInNetwork,
            cidrs.into_iter().map(Value::String).collect(),
        )
    }
}

/// A weighted assignment of a variant to a percentage bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Variant selected for this share of users.
    pub variant_id: VariantId,
    /// Share of users, in percent.
    pub percentage: u32,
}

impl Distribution {
    /// Creates a new distribution entry.
    pub fn new(variant_id: VariantId, percentage: u32) -> Self {
        Self {
            variant_id,
            percentage,
        }
    }
}

/// A flag targeting rule: an ordered AND of constraints plus a distribution
/// over variants.
///
/// Rules are evaluated in the order they appear on the flag; the first
/// matching rule determines the distribution used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRule {
    /// Unique identifier.
    pub id: RuleId,
    /// Constraints that must ALL match (AND logic).
    pub constraints: Vec<Constraint>,
    /// Weighted variant assignment; percentages must sum to exactly 100.
    pub distributions: Vec<Distribution>,
}

impl FlagRule {
    /// Creates a rule with no constraints (matches everyone).
    pub fn new(distributions: Vec<Distribution>) -> Self {
        Self {
            id: RuleId::new(),
            constraints: Vec::new(),
            distributions,
        }
    }

    /// Adds a constraint to this rule.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Validates the rule against the variants of its owning flag.
    ///
    /// Rejected at write time: distributions that do not sum to exactly 100,
    /// or that reference a variant outside the flag.
    pub fn validate(&self, variants: &[Variant]) -> Result<(), ValidationError> {
        let sum: u32 = self.distributions.iter().map(|d| d.percentage).sum();
        if sum != 100 {
            return Err(ValidationError::DistributionSum(sum));
        }
        for dist in &self.distributions {
            if !variants.iter().any(|v| v.id == dist.variant_id) {
                return Err(ValidationError::ForeignVariant(dist.variant_id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_format() {
        assert_eq!(
            serde_json::to_string(&Operation::OneOf).unwrap(),
            "\"ONE_OF\""
        );
        assert_eq!(
            serde_json::to_string(&Operation::DoesntMatchRegex).unwrap(),
            "\"DOESNT_MATCH_REGEX\""
        );
        assert_eq!(
            serde_json::to_string(&Operation::IsntInSegment).unwrap(),
            "\"ISNT_IN_SEGMENT\""
        );

        let op: Operation = serde_json::from_str("\"IS_IN_NETWORK\"").unwrap();
        assert_eq!(op, Operation::IsInNetwork);

        assert!(serde_json::from_str::<Operation>("\"SHRUGS\"").is_err());
    }

    #[test]
    fn test_distribution_sum_validation() {
        let a = Variant::new("a");
        let b = Variant::new("b");
        let variants = vec![a.clone(), b.clone()];

        let ok = FlagRule::new(vec![
            Distribution::new(a.id, 30),
            Distribution::new(b.id, 70),
        ]);
        assert!(ok.validate(&variants).is_ok());

        let short = FlagRule::new(vec![Distribution::new(a.id, 99)]);
        assert!(matches!(
            short.validate(&variants),
            Err(ValidationError::DistributionSum(99))
        ));
    }

    #[test]
    fn test_foreign_variant_rejected() {
        let a = Variant::new("a");
        let stranger = VariantId::new();
        let rule = FlagRule::new(vec![Distribution::new(stranger, 100)]);

        assert!(matches!(
            rule.validate(&[a]),
            Err(ValidationError::ForeignVariant(id)) if id == stranger
        ));
    }

    #[test]
    fn test_constraint_builders() {
        let cond = Constraint::ends_with("email", "@nubster.io");
        assert_eq!(cond.property, "email");
        assert_eq!(cond.operation, Operation::EndsWith);

        let cond = Constraint::one_of("country", vec!["FR".to_string(), "BE".to_string()]);
        assert_eq!(cond.operation, Operation::OneOf);
        assert_eq!(cond.values.len(), 2);
    }
}
