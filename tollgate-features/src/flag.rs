//! Feature Flag Core
//!
//! Boolean flags as served by the remote flag store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feature flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag key/name
    pub key: String,

    /// Flag description
    #[serde(default)]
    pub description: Option<String>,

    /// Whether the feature is on
    pub enabled: bool,

    /// Last change, as reported by the store
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeatureFlag {
    /// Create a new boolean feature flag
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate_features::FeatureFlag;
    ///
    /// let flag = FeatureFlag::boolean("gateway.azul.new-payers", true);
    /// assert!(flag.enabled);
    /// ```
    pub fn boolean(key: impl Into<String>, enabled: bool) -> Self {
        Self {
            key: key.into(),
            description: None,
            enabled,
            updated_at: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Flip the flag, stamping the change time
    pub fn set(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_flag() {
        let flag = FeatureFlag::boolean("gateway.stripe.new-payers", false)
            .with_description("Stripe for new payers");

        assert!(!flag.enabled);
        assert_eq!(flag.description.as_deref(), Some("Stripe for new payers"));
        assert!(flag.updated_at.is_none());
    }

    #[test]
    fn test_set_stamps_time() {
        let mut flag = FeatureFlag::boolean("k", false);
        flag.set(true);

        assert!(flag.enabled);
        assert!(flag.updated_at.is_some());
    }

    #[test]
    fn test_deserialize_minimal_payload() {
        let flag: FeatureFlag = serde_json::from_str(r#"{"key": "k", "enabled": true}"#).unwrap();
        assert!(flag.enabled);
        assert!(flag.description.is_none());
    }
}
