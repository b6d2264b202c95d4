//! Feature flag types and structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::FlagRule;
use crate::value::Value;

/// Unique identifier for a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagId(pub Uuid);

impl FlagId {
    /// Creates a new random flag ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a flag ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for FlagId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FlagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable key for a flag (e.g., "new-checkout", "dark-mode").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagKey(pub String);

impl FlagKey {
    /// Creates a new flag key.
    ///
    /// # Panics
    ///
    /// Panics if the key is empty or contains invalid characters.
    pub fn new(key: impl Into<String>) -> Self {
        Self::try_new(key).expect("invalid flag key")
    }

    /// Tries to create a new flag key, returning None if the key is empty or
    /// not URL-safe.
    pub fn try_new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() {
            return None;
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(Self(key))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for FlagKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a variant, scoped to its flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub Uuid);

impl VariantId {
    /// Creates a new random variant ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a variant ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for VariantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One possible outcome value of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    /// Unique identifier within the owning flag.
    pub id: VariantId,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The value returned when this variant is selected.
    pub value: Value,
}

impl Variant {
    /// Creates a new variant with the given value.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            id: VariantId::new(),
            description: None,
            value: value.into(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A feature flag: a named decision point with variants and targeting rules.
///
/// Every structural mutation bumps `version`; evaluation records carry the
/// version they were computed against so staleness can be detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    /// Unique identifier.
    pub id: FlagId,
    /// Human-readable key (e.g., "new-checkout").
    pub key: FlagKey,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the flag is enabled.
    pub enabled: bool,
    /// Monotonically increasing version, bumped on any semantic change.
    pub version: i64,
    /// Ordered list of variants.
    pub variants: Vec<Variant>,
    /// Ordered list of targeting rules; the first matching rule wins.
    pub rules: Vec<FlagRule>,
    /// Variant returned when the flag is enabled but no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_when_on: Option<VariantId>,
    /// Variant returned when the flag is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_when_off: Option<VariantId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Flag {
    /// Creates a new enabled flag with no variants or rules.
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: FlagId::new(),
            key: FlagKey::new(key),
            name: name.into(),
            description: None,
            enabled: true,
            version: 1,
            variants: Vec::new(),
            rules: Vec::new(),
            default_when_on: None,
            default_when_off: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a variant.
    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Adds a targeting rule.
    pub fn with_rule(mut self, rule: FlagRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets the variant returned when the flag is on and no rule matches.
    pub fn with_default_when_on(mut self, variant_id: VariantId) -> Self {
        self.default_when_on = Some(variant_id);
        self
    }

    /// Sets the variant returned when the flag is off.
    pub fn with_default_when_off(mut self, variant_id: VariantId) -> Self {
        self.default_when_off = Some(variant_id);
        self
    }

    /// Disables the flag.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Looks up a variant by ID.
    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Records a structural mutation: increments the version and touches the
    /// update timestamp.
    pub fn bump_version(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_key_validation() {
        assert!(FlagKey::try_new("valid-key").is_some());
        assert!(FlagKey::try_new("valid_key").is_some());
        assert!(FlagKey::try_new("validKey123").is_some());
        assert!(FlagKey::try_new("").is_none());
        assert!(FlagKey::try_new("invalid key").is_none());
        assert!(FlagKey::try_new("invalid.key").is_none());
    }

    #[test]
    fn test_variant_lookup() {
        let variant = Variant::new(true);
        let variant_id = variant.id;
        let flag = Flag::new("dark-mode", "Dark Mode").with_variant(variant);

        assert_eq!(flag.variant(variant_id).map(|v| &v.value), Some(&Value::Bool(true)));
        assert!(flag.variant(VariantId::new()).is_none());
    }

    #[test]
    fn test_bump_version_increments() {
        let mut flag = Flag::new("new-checkout", "New Checkout");
        assert_eq!(flag.version, 1);
        flag.bump_version();
        flag.bump_version();
        assert_eq!(flag.version, 3);
    }
}
