//! User segments for reusable targeting.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::{Constraint, Operation, RuleId};

/// Unique identifier for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub Uuid);

impl SegmentId {
    /// Creates a new random segment ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a segment ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reusable segment of users, referenced from flag constraints via the
/// segment operators.
///
/// A user matches a segment if ANY rule matches; a rule matches if ALL its
/// constraints match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Unique identifier.
    pub id: SegmentId,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rules that define membership (OR logic between rules).
    pub rules: Vec<SegmentRule>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// Creates a new segment with no rules.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SegmentId::new(),
            name: name.into(),
            description: None,
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a rule to this segment.
    pub fn with_rule(mut self, rule: SegmentRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Collects the IDs of segments referenced by this segment's own
    /// constraints through the segment operators.
    pub fn referenced_segments(&self) -> Vec<SegmentId> {
        self.rules
            .iter()
            .flat_map(|r| r.constraints.iter())
            .filter(|c| {
                matches!(
                    c.operation,
                    Operation::IsInSegment | Operation::IsntInSegment
                )
            })
            .flat_map(|c| c.values.iter())
            .filter_map(|v| v.as_str())
            .filter_map(|s| Uuid::parse_str(s).ok())
            .map(SegmentId::from_uuid)
            .collect()
    }
}

/// A rule defining segment membership: an ordered AND of constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    /// Unique identifier.
    pub id: RuleId,
    /// Constraints that must ALL match (AND logic).
    pub constraints: Vec<Constraint>,
}

impl SegmentRule {
    /// Creates a new empty segment rule.
    pub fn new() -> Self {
        Self {
            id: RuleId::new(),
            constraints: Vec::new(),
        }
    }

    /// Adds a constraint to this rule.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

impl Default for SegmentRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-resolved segments, keyed by ID.
///
/// Built once per request before evaluation so that segment constraints
/// resolve without further I/O.
pub type SegmentTable = HashMap<SegmentId, Segment>;

/// Builds a lookup table from a list of segments.
pub fn segment_table(segments: Vec<Segment>) -> SegmentTable {
    segments.into_iter().map(|s| (s.id, s)).collect()
}

/// Checks whether the segment reference graph contains a cycle.
///
/// Segment references must form a DAG; this is enforced when segments are
/// written. The evaluator additionally defends against cycles that slip
/// through, treating revisited segments as non-matching.
pub fn has_cycle(table: &SegmentTable) -> bool {
    fn visit(
        id: SegmentId,
        table: &SegmentTable,
        path: &mut HashSet<SegmentId>,
        done: &mut HashSet<SegmentId>,
    ) -> bool {
        if done.contains(&id) {
            return false;
        }
        if !path.insert(id) {
            return true;
        }
        if let Some(segment) = table.get(&id) {
            for next in segment.referenced_segments() {
                if visit(next, table, path, done) {
                    return true;
                }
            }
        }
        path.remove(&id);
        done.insert(id);
        false
    }

    let mut done = HashSet::new();
    table
        .keys()
        .any(|&id| visit(id, table, &mut HashSet::new(), &mut done))
}
