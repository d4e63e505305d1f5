//! Storage traits for billing reconciliation.
//!
//! Both traits are implemented by the in-memory store in this crate and by
//! the PostgreSQL store in `pmbridge-db-postgres`. Every write is an atomic
//! find-merge-persist; callers never read then write in two steps.

use async_trait::async_trait;
use time::{Date, Duration};

use crate::error::BillingResult;
use crate::types::{
    BillingSyncPatch, BillingSyncRecord, CreateOutcome, NewSubscription, Subscription, SyncStatus,
};

#[async_trait]
pub trait BillingSyncStorage: Send + Sync {
    /// Finds the row by `event_id`, else by the patch's payment intent, and
    /// merges into it; inserts when neither matches.
    async fn upsert_by_event_id(
        &self,
        event_id: &str,
        patch: BillingSyncPatch,
    ) -> BillingResult<BillingSyncRecord>;

    /// Finds the row by `payment_intent_id`, else by the patch's event id.
    /// An insert without an event id receives a synthetic one.
    async fn upsert_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
        patch: BillingSyncPatch,
    ) -> BillingResult<BillingSyncRecord>;

    /// Merges into an existing row only. Returns `None` and writes nothing
    /// when no row has `event_id`.
    async fn update_by_event_id(
        &self,
        event_id: &str,
        patch: BillingSyncPatch,
    ) -> BillingResult<Option<BillingSyncRecord>>;

    /// Atomically moves the row owning `event_id` to `syncing` and counts the
    /// attempt. Returns `None` when no row exists, the row is settled, or
    /// another worker claimed it less than `stale_after` ago.
    async fn claim_by_event_id(
        &self,
        event_id: &str,
        stale_after: Duration,
    ) -> BillingResult<Option<BillingSyncRecord>>;

    async fn get_by_event_id(&self, event_id: &str) -> BillingResult<Option<BillingSyncRecord>>;

    async fn get_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> BillingResult<Option<BillingSyncRecord>>;

    /// Oldest-updated rows in any of `statuses`, at most `limit`.
    async fn list_by_status(
        &self,
        statuses: &[SyncStatus],
        limit: usize,
    ) -> BillingResult<Vec<BillingSyncRecord>>;
}

#[async_trait]
pub trait SubscriptionStorage: Send + Sync {
    /// Creates the subscription unless one exists for the same customer and
    /// product, in which case the existing row is returned.
    async fn create_if_absent(&self, new: NewSubscription) -> BillingResult<CreateOutcome>;

    async fn get(&self, id: &str) -> BillingResult<Option<Subscription>>;

    /// Active subscriptions with `next_billing_date <= today`, earliest first.
    async fn list_due(&self, today: Date, limit: usize) -> BillingResult<Vec<Subscription>>;

    async fn record_billing(
        &self,
        id: &str,
        billed_on: Date,
        next_billing_date: Date,
    ) -> BillingResult<Subscription>;

    async fn cancel(&self, id: &str) -> BillingResult<Subscription>;
}
