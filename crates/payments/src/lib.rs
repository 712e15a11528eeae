// Payments crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // PaymentError carries provider response text
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Vitrina Payments Module
//!
//! Handles MercadoPago integration: checkout preference issuance and the
//! payment-notification reconciliation pipeline.
//!
//! ## Features
//!
//! - **Checkout**: Create payment preferences with an embedded correlation
//!   token and plan-based pricing
//! - **Notifications**: Accept the provider's webhook shapes (modern JSON,
//!   legacy querystring, resource URL), with optional shared-secret auth
//! - **Normalization**: Resolve any notification into one canonical payment
//!   outcome, fetching from the provider's read API when needed
//! - **Reconciliation**: Apply approved outcomes idempotently to subscriber
//!   plans and business ownership
//! - **Invariants**: Runnable consistency checks over reconciled state

pub mod checkout;
pub mod client;
pub mod error;
pub mod invariants;
pub mod normalizer;
pub mod notification;
pub mod processor;
pub mod reconciler;
pub mod resolver;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutConfig, CheckoutRedirect, CheckoutRequest, CheckoutService, PlanPrices};

// Client
pub use client::{
    BackUrls, CreatePreference, MerchantOrder, MercadoPagoClient, MercadoPagoConfig, MpPayment,
    OrderPayment, PreferenceItem, PreferencePayer, PreferenceResponse,
};

// Error
pub use error::{PaymentError, PaymentResult};

// Normalizer
pub use normalizer::{select_order_payment, EventNormalizer, PaymentOutcome, APPROVED};

// Notification
pub use notification::{authenticate, classify, NotificationKind, WebhookCredentials};

// Processor
pub use processor::{
    disposition_for, IgnoreReason, NotificationOutcome, NotificationProcessor, WebhookDelivery,
    WebhookDisposition,
};

// Reconciler
pub use reconciler::{
    decide_business_action, BusinessAction, BusinessWrite, ExistingBusiness, ReconcileReport,
    StateReconciler,
};

// Resolver
pub use resolver::{
    resolve_identity, CorrelationToken, ResolvedIdentity, DEFAULT_UNRESOLVED_PLAN,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

use sqlx::PgPool;

/// Main payments service that combines all payment functionality
pub struct PaymentsService {
    pub checkout: CheckoutService,
    pub processor: NotificationProcessor,
    pub invariants: InvariantChecker,
}

impl PaymentsService {
    /// Create a new payments service from environment variables
    pub fn from_env(pool: PgPool) -> PaymentResult<Self> {
        let client = MercadoPagoClient::from_env()?;
        let checkout_config = CheckoutConfig::from_env()?;
        let webhook_secret = std::env::var("MP_WEBHOOK_SECRET").ok();

        Ok(Self::new(client, checkout_config, webhook_secret, pool))
    }

    /// Create a new payments service with explicit config
    pub fn new(
        client: MercadoPagoClient,
        checkout_config: CheckoutConfig,
        webhook_secret: Option<String>,
        pool: PgPool,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(client.clone(), checkout_config),
            processor: NotificationProcessor::new(client, pool.clone(), webhook_secret),
            invariants: InvariantChecker::new(pool),
        }
    }
}
