//! State reconciliation
//!
//! Applies an approved payment outcome to the subscriber's plan record and to
//! the business-ownership record. The two writes are independent and both are
//! attempted even when one fails; each is keyed by its natural unique key
//! (email, owner_email) so the storage layer's upsert atomicity is the only
//! concurrency guard needed. Duplicate delivery of the same approved outcome
//! lands on the same rows with the same values.

use sqlx::PgPool;
use uuid::Uuid;

use vitrina_shared::Plan;

use crate::error::{PaymentError, PaymentResult};
use crate::normalizer::PaymentOutcome;
use crate::resolver::ResolvedIdentity;

/// What exists in the businesses table for an owner email, as far as the
/// reconciliation decision cares.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExistingBusiness {
    pub id: Uuid,
    pub owner_user_id: Option<Uuid>,
}

/// The write the business side of reconciliation will perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessAction {
    /// Linked row exists: update plan, status, and payment correlation.
    Update,
    /// Row exists but has no owner_user_id: touch payment/status fields only.
    /// Writing the plan here would activate a paid listing with no account.
    GuardedUpdate,
    /// No row, paid plan, account found: create the linked row.
    Create(Uuid),
    /// No row, paid plan, no account yet: nothing can be written without
    /// violating the linkage invariant. The account-creation flow re-drives
    /// reconciliation later.
    AwaitLink,
    /// No row and a non-paid plan: the plan upsert alone is the whole story.
    Skip,
}

/// How the business write ended. Reported alongside the plan write, never
/// merged with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessWrite {
    Updated,
    Created,
    /// Guarded partial update or deferred creation; a user link is pending.
    AwaitingLink,
    Skipped,
}

/// The two reconciliation results, side by side.
#[derive(Debug)]
pub struct ReconcileReport {
    pub plan_write: PaymentResult<()>,
    pub business_write: PaymentResult<BusinessWrite>,
}

impl ReconcileReport {
    pub fn fully_applied(&self) -> bool {
        self.plan_write.is_ok() && self.business_write.is_ok()
    }

    pub fn awaiting_link(&self) -> bool {
        matches!(self.business_write, Ok(BusinessWrite::AwaitingLink))
    }
}

/// Decide the business-side write. Pure; the invariant lives here.
pub fn decide_business_action(
    existing: Option<&ExistingBusiness>,
    plan: Plan,
    user_id: Option<Uuid>,
) -> BusinessAction {
    match existing {
        Some(business) => {
            if business.owner_user_id.is_some() {
                BusinessAction::Update
            } else {
                BusinessAction::GuardedUpdate
            }
        }
        None if plan.is_paid() => match user_id {
            Some(user_id) => BusinessAction::Create(user_id),
            None => BusinessAction::AwaitLink,
        },
        None => BusinessAction::Skip,
    }
}

pub struct StateReconciler {
    pool: PgPool,
}

impl StateReconciler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply an approved outcome. Precondition (checked by the caller):
    /// status is approved and the identity resolved.
    pub async fn apply(
        &self,
        identity: &ResolvedIdentity,
        outcome: &PaymentOutcome,
    ) -> ReconcileReport {
        let plan_write = self.upsert_subscriber_plan(identity).await;
        if let Err(e) = &plan_write {
            tracing::error!(
                email = %identity.email,
                plan = %identity.plan,
                error = %e,
                "Plan upsert failed"
            );
        }

        let business_write = self.reconcile_business(identity, outcome).await;
        if let Err(e) = &business_write {
            tracing::error!(
                email = %identity.email,
                error = %e,
                "Business reconciliation failed"
            );
        }

        ReconcileReport {
            plan_write,
            business_write,
        }
    }

    /// Last-write-wins upsert keyed by email. Redelivery of the same approved
    /// outcome rewrites the same values.
    async fn upsert_subscriber_plan(&self, identity: &ResolvedIdentity) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriber_plans (email, plan, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (email) DO UPDATE SET
                plan = EXCLUDED.plan,
                updated_at = NOW()
            "#,
        )
        .bind(&identity.email)
        .bind(identity.plan.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            email = %identity.email,
            plan = %identity.plan,
            "Subscriber plan upserted"
        );
        Ok(())
    }

    async fn reconcile_business(
        &self,
        identity: &ResolvedIdentity,
        outcome: &PaymentOutcome,
    ) -> PaymentResult<BusinessWrite> {
        let existing: Option<ExistingBusiness> = sqlx::query_as(
            "SELECT id, owner_user_id FROM businesses WHERE owner_email = $1",
        )
        .bind(&identity.email)
        .fetch_optional(&self.pool)
        .await?;

        let user_id = if existing.is_none() && identity.plan.is_paid() {
            self.lookup_user_id(&identity.email).await?
        } else {
            None
        };

        let action = decide_business_action(existing.as_ref(), identity.plan, user_id);
        let payment_id = outcome.payment_id.as_deref();

        match action {
            BusinessAction::Update => {
                let Some(business) = existing else {
                    return Err(PaymentError::Internal(
                        "full update decided without an existing row".to_string(),
                    ));
                };
                sqlx::query(
                    r#"
                    UPDATE businesses
                    SET plan = $2,
                        status = 'active',
                        last_payment_id = $3,
                        last_payment_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(business.id)
                .bind(identity.plan.as_str())
                .bind(payment_id)
                .execute(&self.pool)
                .await?;

                tracing::info!(
                    email = %identity.email,
                    business_id = %business.id,
                    plan = %identity.plan,
                    "Business updated from approved payment"
                );
                Ok(BusinessWrite::Updated)
            }

            BusinessAction::GuardedUpdate => {
                let Some(business) = existing else {
                    return Err(PaymentError::Internal(
                        "guarded update decided without an existing row".to_string(),
                    ));
                };
                // No plan write: an active paid plan requires owner_user_id.
                sqlx::query(
                    r#"
                    UPDATE businesses
                    SET status = 'pending_link',
                        last_payment_id = $2,
                        last_payment_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(business.id)
                .bind(payment_id)
                .execute(&self.pool)
                .await?;

                tracing::info!(
                    email = %identity.email,
                    business_id = %business.id,
                    "Business payment recorded; plan upgrade held until user link"
                );
                Ok(BusinessWrite::AwaitingLink)
            }

            BusinessAction::Create(user_id) => {
                // Upsert on owner_email: a concurrent delivery for the same
                // email lands on one row either way.
                sqlx::query(
                    r#"
                    INSERT INTO businesses
                        (id, owner_email, owner_user_id, plan, status,
                         last_payment_id, last_payment_at, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, 'active', $5, NOW(), NOW(), NOW())
                    ON CONFLICT (owner_email) DO UPDATE SET
                        owner_user_id = COALESCE(businesses.owner_user_id, EXCLUDED.owner_user_id),
                        plan = EXCLUDED.plan,
                        status = 'active',
                        last_payment_id = EXCLUDED.last_payment_id,
                        last_payment_at = NOW(),
                        updated_at = NOW()
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&identity.email)
                .bind(user_id)
                .bind(identity.plan.as_str())
                .bind(payment_id)
                .execute(&self.pool)
                .await?;

                tracing::info!(
                    email = %identity.email,
                    user_id = %user_id,
                    plan = %identity.plan,
                    "Business created from approved payment"
                );
                Ok(BusinessWrite::Created)
            }

            BusinessAction::AwaitLink => {
                tracing::info!(
                    email = %identity.email,
                    plan = %identity.plan,
                    "Paid plan approved with no account yet; business creation deferred"
                );
                Ok(BusinessWrite::AwaitingLink)
            }

            BusinessAction::Skip => Ok(BusinessWrite::Skipped),
        }
    }

    /// Account-identity lookup: the user id for an email, when the account
    /// exists.
    async fn lookup_user_id(&self, email: &str) -> PaymentResult<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id,)| id))
    }
}
