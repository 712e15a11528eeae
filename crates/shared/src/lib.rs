#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Vitrina Shared Foundations
//!
//! Types and helpers used by every other crate in the workspace:
//!
//! - **Plans**: the subscription tier enumeration and its parsing rules
//! - **Email**: address shape validation
//! - **Database**: connection pool construction

pub mod db;
pub mod email;
pub mod plan;

pub use db::{create_pool, run_migrations};
pub use email::is_valid_email;
pub use plan::{Plan, PlanParseError};
