//! Subscription plans
//!
//! The tier enumeration shared by checkout, reconciliation, and the listing
//! surfaces. Plan values arrive from untrusted input (correlation tokens,
//! provider metadata, API requests), so parsing is strict: anything outside
//! the enumeration is an error, never coerced.

use serde::{Deserialize, Serialize};

/// Subscription tier for a business listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Basic,
    Pro,
    Premium,
}

/// Error returned when a string is not a known plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct PlanParseError(pub String);

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Pro => "pro",
            Plan::Premium => "premium",
        }
    }

    /// Paid tiers gate business activation: an active pro/premium listing
    /// must be linked to a real user account.
    pub fn is_paid(&self) -> bool {
        matches!(self, Plan::Pro | Plan::Premium)
    }

    pub fn all() -> [Plan; 4] {
        [Plan::Free, Plan::Basic, Plan::Pro, Plan::Premium]
    }
}

impl std::str::FromStr for Plan {
    type Err = PlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            "premium" => Ok(Plan::Premium),
            other => Err(PlanParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_known_plans() {
        assert_eq!(Plan::from_str("free").unwrap(), Plan::Free);
        assert_eq!(Plan::from_str("basic").unwrap(), Plan::Basic);
        assert_eq!(Plan::from_str("pro").unwrap(), Plan::Pro);
        assert_eq!(Plan::from_str("premium").unwrap(), Plan::Premium);
    }

    #[test]
    fn parsing_normalizes_case_and_whitespace() {
        assert_eq!(Plan::from_str(" Premium ").unwrap(), Plan::Premium);
        assert_eq!(Plan::from_str("PRO").unwrap(), Plan::Pro);
    }

    #[test]
    fn rejects_unknown_plans() {
        assert!(Plan::from_str("enterprise").is_err());
        assert!(Plan::from_str("").is_err());
    }

    #[test]
    fn paid_tiers() {
        assert!(Plan::Pro.is_paid());
        assert!(Plan::Premium.is_paid());
        assert!(!Plan::Basic.is_paid());
        assert!(!Plan::Free.is_paid());
    }

    #[test]
    fn round_trips_through_display() {
        for plan in Plan::all() {
            assert_eq!(Plan::from_str(plan.as_str()).unwrap(), plan);
        }
    }
}
