//! # pmbridge-billing
//!
//! Reconciliation state for external payment events and recurring
//! subscriptions.
//!
//! A payment event may be delivered more than once and may arrive keyed by
//! event id, by payment intent id, or both. [`BillingSyncStorage`] keeps one
//! row per payment regardless of which key a delivery carries.

mod error;
mod memory;
pub mod processed;
mod traits;
pub mod types;

pub use error::{BillingResult, BillingStoreError};
pub use memory::InMemoryBillingStore;
pub use processed::ProcessedEvents;
pub use traits::{BillingSyncStorage, SubscriptionStorage};
pub use types::{
    BillingSyncPatch, BillingSyncRecord, CreateOutcome, Frequency, NewSubscription,
    SYNTHETIC_EVENT_PREFIX, Subscription, SubscriptionStatus, SyncStatus, is_synthetic_event_id,
    synthetic_event_id,
};
