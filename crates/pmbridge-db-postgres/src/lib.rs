//! PostgreSQL backend for pmbridge billing storage.
//!
//! Implements [`pmbridge_billing::BillingSyncStorage`] and
//! [`pmbridge_billing::SubscriptionStorage`] on top of `sqlx-core` /
//! `sqlx-postgres`. Tables are created on first use.
//!
//! ```ignore
//! use pmbridge_db_postgres::{PostgresBillingStore, PostgresConfig, create_pool};
//!
//! let pool = create_pool(&PostgresConfig::new("postgres://localhost/pmbridge")).await?;
//! let store = PostgresBillingStore::new(pool);
//! ```

mod billing_storage;
mod config;
mod error;
mod pool;

pub use billing_storage::PostgresBillingStore;
pub use config::PostgresConfig;
pub use error::{PG_UNIQUE_VIOLATION, PostgresError, Result, has_pg_error_code, is_unique_violation};
pub use pool::{PgPoolOptions, connect_options, create_pool, mask_password};
