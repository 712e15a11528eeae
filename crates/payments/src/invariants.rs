//! Reconciliation Invariants Module
//!
//! Provides runnable consistency checks for subscriber and business state.
//! These invariants can be run after any webhook replay or manual
//! reconciliation to ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Owner email(s) affected
    pub emails: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - a listing may be active without a real owner
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for unlinked active paid listings
#[derive(Debug, sqlx::FromRow)]
struct UnlinkedActiveRow {
    business_id: Uuid,
    owner_email: String,
    plan: String,
    status: String,
}

/// Row type for unknown plan values
#[derive(Debug, sqlx::FromRow)]
struct UnknownPlanRow {
    email: String,
    plan: String,
}

/// Row type for plan disagreement between a business and its subscriber row
#[derive(Debug, sqlx::FromRow)]
struct PlanMismatchRow {
    owner_email: String,
    business_plan: String,
    subscriber_plan: String,
}

/// Row type for long-stale unlinked businesses
#[derive(Debug, sqlx::FromRow)]
struct StaleUnlinkedRow {
    owner_email: String,
    last_payment_at: Option<OffsetDateTime>,
}

/// Service for running reconciliation invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> PaymentResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_active_paid_has_owner().await?);
        violations.extend(self.check_subscriber_plan_values_known().await?);
        violations.extend(self.check_business_plan_values_known().await?);
        violations.extend(self.check_business_matches_subscriber_plan().await?);
        violations.extend(self.check_stale_unlinked_businesses().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: An active paid listing has a linked owner account
    ///
    /// An active pro/premium business without an owner_user_id means the
    /// guarded-update path was bypassed somewhere.
    async fn check_active_paid_has_owner(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UnlinkedActiveRow> = sqlx::query_as(
            r#"
            SELECT id as business_id, owner_email, plan, status
            FROM businesses
            WHERE status = 'active'
              AND plan IN ('pro', 'premium')
              AND owner_user_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_paid_has_owner".to_string(),
                emails: vec![row.owner_email.clone()],
                description: format!(
                    "Business '{}' is active on plan '{}' with no linked user",
                    row.owner_email, row.plan
                ),
                context: serde_json::json!({
                    "business_id": row.business_id,
                    "plan": row.plan,
                    "status": row.status,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: subscriber_plans holds only known plan values
    async fn check_subscriber_plan_values_known(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UnknownPlanRow> = sqlx::query_as(
            r#"
            SELECT email, plan
            FROM subscriber_plans
            WHERE plan NOT IN ('free', 'basic', 'pro', 'premium')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscriber_plan_values_known".to_string(),
                emails: vec![row.email.clone()],
                description: format!(
                    "Subscriber '{}' has unknown plan value '{}'",
                    row.email, row.plan
                ),
                context: serde_json::json!({ "plan": row.plan }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: businesses holds only known plan values
    async fn check_business_plan_values_known(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UnknownPlanRow> = sqlx::query_as(
            r#"
            SELECT owner_email as email, plan
            FROM businesses
            WHERE plan NOT IN ('free', 'basic', 'pro', 'premium')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "business_plan_values_known".to_string(),
                emails: vec![row.email.clone()],
                description: format!(
                    "Business '{}' has unknown plan value '{}'",
                    row.email, row.plan
                ),
                context: serde_json::json!({ "plan": row.plan }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: A linked active business agrees with its subscriber plan
    ///
    /// Both rows are written from the same approved outcome, so disagreement
    /// means one of the dual writes was lost.
    async fn check_business_matches_subscriber_plan(
        &self,
    ) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<PlanMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                b.owner_email,
                b.plan as business_plan,
                sp.plan as subscriber_plan
            FROM businesses b
            JOIN subscriber_plans sp ON sp.email = b.owner_email
            WHERE b.status = 'active'
              AND b.owner_user_id IS NOT NULL
              AND b.plan != sp.plan
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "business_matches_subscriber_plan".to_string(),
                emails: vec![row.owner_email.clone()],
                description: format!(
                    "Business '{}' is on plan '{}' but subscriber record says '{}'",
                    row.owner_email, row.business_plan, row.subscriber_plan
                ),
                context: serde_json::json!({
                    "business_plan": row.business_plan,
                    "subscriber_plan": row.subscriber_plan,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: Unlinked businesses do not linger for months
    ///
    /// pending_link is an expected intermediate state, but one that the
    /// account-creation flow should resolve within days.
    async fn check_stale_unlinked_businesses(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleUnlinkedRow> = sqlx::query_as(
            r#"
            SELECT owner_email, last_payment_at
            FROM businesses
            WHERE status = 'pending_link'
              AND owner_user_id IS NULL
              AND last_payment_at < NOW() - INTERVAL '30 days'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "stale_unlinked_businesses".to_string(),
                emails: vec![row.owner_email.clone()],
                description: format!(
                    "Business '{}' has awaited a user link for over 30 days",
                    row.owner_email
                ),
                context: serde_json::json!({
                    "last_payment_at": row.last_payment_at,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> PaymentResult<Vec<InvariantViolation>> {
        match name {
            "active_paid_has_owner" => self.check_active_paid_has_owner().await,
            "subscriber_plan_values_known" => self.check_subscriber_plan_values_known().await,
            "business_plan_values_known" => self.check_business_plan_values_known().await,
            "business_matches_subscriber_plan" => {
                self.check_business_matches_subscriber_plan().await
            }
            "stale_unlinked_businesses" => self.check_stale_unlinked_businesses().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "active_paid_has_owner",
            "subscriber_plan_values_known",
            "business_plan_values_known",
            "business_matches_subscriber_plan",
            "stale_unlinked_businesses",
        ]
    }
}
