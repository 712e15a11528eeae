//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use vitrina_payments::PaymentsService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub payments: Arc<PaymentsService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, payments: Arc<PaymentsService>) -> Self {
        tracing::info!("Payments service wired into application state");
        Self {
            pool,
            config,
            payments,
        }
    }
}
