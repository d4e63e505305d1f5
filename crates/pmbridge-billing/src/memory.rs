//! In-memory billing store.
//!
//! Each write holds the state lock for the whole find-merge-persist step, so
//! concurrent upserts for the same keys cannot create duplicate rows.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::{Date, Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingResult, BillingStoreError};
use crate::traits::{BillingSyncStorage, SubscriptionStorage};
use crate::types::{
    BillingSyncPatch, BillingSyncRecord, CreateOutcome, NewSubscription, Subscription,
    SubscriptionStatus, SyncStatus, synthetic_event_id,
};

#[derive(Debug, Default)]
struct BillingState {
    rows: HashMap<String, BillingSyncRecord>,
    by_event: HashMap<String, String>,
    by_intent: HashMap<String, String>,
}

impl BillingState {
    /// Resolves the row owning either key. Keys owned by two different rows
    /// are a conflict.
    fn locate(
        &self,
        event_id: Option<&str>,
        payment_intent_id: Option<&str>,
    ) -> BillingResult<Option<String>> {
        let by_event = event_id.and_then(|id| self.by_event.get(id));
        let by_intent = payment_intent_id.and_then(|id| self.by_intent.get(id));
        match (by_event, by_intent) {
            (Some(a), Some(b)) if a != b => Err(BillingStoreError::conflict(format!(
                "event {} and payment intent {} belong to different rows",
                event_id.unwrap_or_default(),
                payment_intent_id.unwrap_or_default()
            ))),
            (Some(id), _) | (None, Some(id)) => Ok(Some(id.clone())),
            (None, None) => Ok(None),
        }
    }

    fn index(&mut self, previous_event_id: Option<String>, record: &BillingSyncRecord) {
        if let Some(previous) = previous_event_id
            && record.event_id.as_deref() != Some(previous.as_str())
        {
            self.by_event.remove(&previous);
        }
        if let Some(event_id) = &record.event_id {
            self.by_event.insert(event_id.clone(), record.id.clone());
        }
        if let Some(intent) = &record.payment_intent_id {
            self.by_intent.insert(intent.clone(), record.id.clone());
        }
    }

    fn upsert(&mut self, mut patch: BillingSyncPatch) -> BillingResult<BillingSyncRecord> {
        let now = OffsetDateTime::now_utc();

        match self.locate(patch.event_id.as_deref(), patch.payment_intent_id.as_deref())? {
            Some(id) => {
                let record = self
                    .rows
                    .get_mut(&id)
                    .ok_or_else(|| BillingStoreError::internal(format!("dangling index {id}")))?;
                let previous = record.event_id.clone();
                record.apply(patch, now);
                let record = record.clone();
                self.index(previous, &record);
                Ok(record)
            }
            None => {
                if patch.event_id.is_none()
                    && let Some(intent) = patch.payment_intent_id.as_deref()
                {
                    patch.event_id = Some(synthetic_event_id(intent, now));
                }
                let record = BillingSyncRecord::from_patch(Uuid::new_v4().to_string(), patch, now);
                self.index(None, &record);
                self.rows.insert(record.id.clone(), record.clone());
                Ok(record)
            }
        }
    }
}

/// Billing and subscription storage kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBillingStore {
    billing: Arc<RwLock<BillingState>>,
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of billing rows.
    pub async fn len(&self) -> usize {
        self.billing.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BillingSyncStorage for InMemoryBillingStore {
    async fn upsert_by_event_id(
        &self,
        event_id: &str,
        mut patch: BillingSyncPatch,
    ) -> BillingResult<BillingSyncRecord> {
        patch.event_id = Some(event_id.to_string());
        let record = self.billing.write().await.upsert(patch)?;
        tracing::debug!(event_id, row = %record.id, status = %record.status, "Upserted billing row");
        Ok(record)
    }

    async fn upsert_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
        mut patch: BillingSyncPatch,
    ) -> BillingResult<BillingSyncRecord> {
        patch.payment_intent_id = Some(payment_intent_id.to_string());
        let record = self.billing.write().await.upsert(patch)?;
        tracing::debug!(payment_intent_id, row = %record.id, status = %record.status, "Upserted billing row");
        Ok(record)
    }

    async fn update_by_event_id(
        &self,
        event_id: &str,
        patch: BillingSyncPatch,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        let mut state = self.billing.write().await;
        let Some(id) = state.by_event.get(event_id).cloned() else {
            return Ok(None);
        };
        let record = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| BillingStoreError::internal(format!("dangling index {id}")))?;
        let previous = record.event_id.clone();
        record.apply(patch, OffsetDateTime::now_utc());
        let record = record.clone();
        state.index(previous, &record);
        Ok(Some(record))
    }

    async fn claim_by_event_id(
        &self,
        event_id: &str,
        stale_after: Duration,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        let mut state = self.billing.write().await;
        let Some(id) = state.by_event.get(event_id).cloned() else {
            return Ok(None);
        };
        let record = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| BillingStoreError::internal(format!("dangling index {id}")))?;
        let now = OffsetDateTime::now_utc();
        if !record.is_claimable(now, stale_after) {
            tracing::debug!(event_id, status = %record.status, "Billing row not claimable");
            return Ok(None);
        }
        record.begin_attempt(now);
        Ok(Some(record.clone()))
    }

    async fn get_by_event_id(&self, event_id: &str) -> BillingResult<Option<BillingSyncRecord>> {
        let state = self.billing.read().await;
        Ok(state
            .by_event
            .get(event_id)
            .and_then(|id| state.rows.get(id))
            .cloned())
    }

    async fn get_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        let state = self.billing.read().await;
        Ok(state
            .by_intent
            .get(payment_intent_id)
            .and_then(|id| state.rows.get(id))
            .cloned())
    }

    async fn list_by_status(
        &self,
        statuses: &[SyncStatus],
        limit: usize,
    ) -> BillingResult<Vec<BillingSyncRecord>> {
        let state = self.billing.read().await;
        let mut rows: Vec<_> = state
            .rows
            .values()
            .filter(|row| statuses.contains(&row.status))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl SubscriptionStorage for InMemoryBillingStore {
    async fn create_if_absent(&self, new: NewSubscription) -> BillingResult<CreateOutcome> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(existing) = subscriptions
            .values()
            .find(|s| s.customer_id == new.customer_id && s.product_id == new.product_id)
        {
            return Ok(CreateOutcome {
                subscription: existing.clone(),
                created: false,
            });
        }

        let id = format!("sub_{}", Uuid::new_v4().simple());
        let subscription = new.into_subscription(id.clone(), OffsetDateTime::now_utc());
        subscriptions.insert(id, subscription.clone());
        Ok(CreateOutcome {
            subscription,
            created: true,
        })
    }

    async fn get(&self, id: &str) -> BillingResult<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }

    async fn list_due(&self, today: Date, limit: usize) -> BillingResult<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut due: Vec<_> = subscriptions
            .values()
            .filter(|s| s.is_due(today))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_billing_date
                .cmp(&b.next_billing_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn record_billing(
        &self,
        id: &str,
        billed_on: Date,
        next_billing_date: Date,
    ) -> BillingResult<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| BillingStoreError::not_found("subscription", id))?;
        subscription.last_billing_date = Some(billed_on);
        subscription.next_billing_date = next_billing_date;
        Ok(subscription.clone())
    }

    async fn cancel(&self, id: &str) -> BillingResult<Subscription> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| BillingStoreError::not_found("subscription", id))?;
        subscription.status = SubscriptionStatus::Cancelled;
        Ok(subscription.clone())
    }
}
