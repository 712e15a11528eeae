//! Correlation resolution
//!
//! Extracts the subscriber identity (email) and requested plan from a
//! normalized outcome. Layered precedence:
//!
//! 1. the correlation token round-tripped through `external_reference`
//! 2. provider-side metadata fields
//! 3. the payer's billing email on the payment record
//!
//! The token is trusted only when it parses completely: email validates and
//! plan is in the enumeration. A half-valid token falls through to metadata
//! rather than being salvaged piecemeal.

use std::str::FromStr;

use vitrina_shared::{is_valid_email, Plan};

use crate::error::{PaymentError, PaymentResult};
use crate::normalizer::PaymentOutcome;

/// Separator for the `email|plan|channel` token grammar.
const TOKEN_SEPARATOR: char = '|';

/// Plan assumed when an approved payment carries no plan in either the token
/// or provider metadata. Business default: approved payments without explicit
/// plan metadata are overwhelmingly premium purchases.
pub const DEFAULT_UNRESOLVED_PLAN: Plan = Plan::Premium;

/// Correlation token embedded in the outgoing preference and echoed back by
/// the provider as `external_reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationToken {
    pub email: String,
    pub plan: Plan,
    pub channel: Option<String>,
}

impl CorrelationToken {
    pub fn new(email: &str, plan: Plan, channel: &str) -> Self {
        Self {
            email: email.to_string(),
            plan,
            channel: Some(channel.to_string()),
        }
    }

    /// Render as `email|plan|channel`.
    pub fn encode(&self) -> String {
        match &self.channel {
            Some(channel) => format!(
                "{}{sep}{}{sep}{}",
                self.email,
                self.plan,
                channel,
                sep = TOKEN_SEPARATOR
            ),
            None => format!("{}{sep}{}", self.email, self.plan, sep = TOKEN_SEPARATOR),
        }
    }

    /// Parse `email|plan|channel`. Fields beyond the third are ignored.
    /// Unknown plan values and malformed emails are errors, never trusted.
    pub fn parse(raw: &str) -> PaymentResult<Self> {
        let mut fields = raw.split(TOKEN_SEPARATOR);

        let email = fields
            .next()
            .map(str::trim)
            .filter(|e| is_valid_email(e))
            .ok_or_else(|| PaymentError::InvalidCorrelationToken(raw.to_string()))?;

        let plan = fields
            .next()
            .and_then(|p| Plan::from_str(p).ok())
            .ok_or_else(|| PaymentError::InvalidCorrelationToken(raw.to_string()))?;

        Ok(Self {
            email: email.to_string(),
            plan,
            channel: fields.next().map(str::to_string).filter(|c| !c.is_empty()),
        })
    }
}

/// Subscriber identity resolved from a payment outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub email: String,
    pub plan: Plan,
}

/// Resolve email and plan from an outcome, or report `UnresolvedIdentity`
/// when no usable email exists anywhere on the payment.
pub fn resolve_identity(outcome: &PaymentOutcome) -> PaymentResult<ResolvedIdentity> {
    if let Some(raw) = outcome.external_reference.as_deref() {
        match CorrelationToken::parse(raw) {
            Ok(token) => {
                return Ok(ResolvedIdentity {
                    email: token.email,
                    plan: token.plan,
                });
            }
            Err(e) => {
                tracing::debug!(
                    payment_id = %outcome.payment_ref(),
                    error = %e,
                    "Correlation token unusable, falling back to provider metadata"
                );
            }
        }
    }

    let email = outcome
        .metadata_email
        .as_deref()
        .map(str::trim)
        .filter(|e| is_valid_email(e))
        .or_else(|| {
            outcome
                .payer_email
                .as_deref()
                .map(str::trim)
                .filter(|e| is_valid_email(e))
        })
        .map(str::to_string)
        .ok_or_else(|| PaymentError::UnresolvedIdentity {
            payment_id: outcome.payment_ref().to_string(),
        })?;

    let plan = outcome
        .metadata_plan
        .as_deref()
        .and_then(|p| Plan::from_str(p).ok())
        .unwrap_or(DEFAULT_UNRESOLVED_PLAN);

    Ok(ResolvedIdentity { email, plan })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(
        external_reference: Option<&str>,
        metadata_email: Option<&str>,
        metadata_plan: Option<&str>,
        payer_email: Option<&str>,
    ) -> PaymentOutcome {
        PaymentOutcome {
            payment_id: Some("1234567".to_string()),
            status: "approved".to_string(),
            external_reference: external_reference.map(str::to_string),
            metadata_email: metadata_email.map(str::to_string),
            metadata_plan: metadata_plan.map(str::to_string),
            payer_email: payer_email.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn token_round_trips() {
        let token = CorrelationToken::new("a@b.com", Plan::Premium, "web");
        assert_eq!(token.encode(), "a@b.com|premium|web");
        assert_eq!(CorrelationToken::parse(&token.encode()).unwrap(), token);
    }

    #[test]
    fn token_extra_fields_are_ignored() {
        let token = CorrelationToken::parse("a@b.com|pro|web|v2|junk").unwrap();
        assert_eq!(token.email, "a@b.com");
        assert_eq!(token.plan, Plan::Pro);
        assert_eq!(token.channel.as_deref(), Some("web"));
    }

    #[test]
    fn token_without_channel_still_parses() {
        let token = CorrelationToken::parse("a@b.com|basic").unwrap();
        assert_eq!(token.plan, Plan::Basic);
        assert_eq!(token.channel, None);
    }

    #[test]
    fn token_rejects_bad_email_and_unknown_plan() {
        assert!(CorrelationToken::parse("not-an-email|pro|web").is_err());
        assert!(CorrelationToken::parse("a@b.com|unknown|web").is_err());
        assert!(CorrelationToken::parse("a@b.com").is_err());
        assert!(CorrelationToken::parse("").is_err());
    }

    #[test]
    fn valid_token_resolves_both_fields() {
        let resolved =
            resolve_identity(&outcome(Some("a@b.com|premium|web"), None, None, None)).unwrap();
        assert_eq!(resolved.email, "a@b.com");
        assert_eq!(resolved.plan, Plan::Premium);
    }

    #[test]
    fn token_takes_precedence_over_metadata() {
        let resolved = resolve_identity(&outcome(
            Some("token@b.com|pro|web"),
            Some("meta@b.com"),
            Some("basic"),
            Some("payer@b.com"),
        ))
        .unwrap();
        assert_eq!(resolved.email, "token@b.com");
        assert_eq!(resolved.plan, Plan::Pro);
    }

    #[test]
    fn invalid_plan_segment_falls_back_to_metadata() {
        let resolved = resolve_identity(&outcome(
            Some("a@b.com|unknown|web"),
            Some("meta@b.com"),
            Some("pro"),
            None,
        ))
        .unwrap();
        assert_eq!(resolved.email, "meta@b.com");
        assert_eq!(resolved.plan, Plan::Pro);
    }

    #[test]
    fn invalid_token_with_no_metadata_defaults_to_premium() {
        let resolved = resolve_identity(&outcome(
            Some("a@b.com|unknown|web"),
            None,
            None,
            Some("payer@b.com"),
        ))
        .unwrap();
        assert_eq!(resolved.email, "payer@b.com");
        assert_eq!(resolved.plan, Plan::Premium);
    }

    #[test]
    fn payer_email_is_the_last_resort() {
        let resolved = resolve_identity(&outcome(None, None, None, Some("payer@b.com"))).unwrap();
        assert_eq!(resolved.email, "payer@b.com");
        assert_eq!(resolved.plan, DEFAULT_UNRESOLVED_PLAN);
    }

    #[test]
    fn malformed_metadata_email_is_skipped() {
        let resolved = resolve_identity(&outcome(
            None,
            Some("not-an-email"),
            Some("pro"),
            Some("payer@b.com"),
        ))
        .unwrap();
        assert_eq!(resolved.email, "payer@b.com");
        assert_eq!(resolved.plan, Plan::Pro);
    }

    #[test]
    fn no_usable_email_is_unresolved_identity() {
        let err = resolve_identity(&outcome(None, None, Some("pro"), None)).unwrap_err();
        assert!(matches!(err, PaymentError::UnresolvedIdentity { .. }));
    }
}
