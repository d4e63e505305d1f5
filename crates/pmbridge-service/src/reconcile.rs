//! Payment webhook reconciliation.
//!
//! A delivery is acknowledged as soon as it is recorded in billing storage;
//! pushing the charge and payment to the practice service may fail and is
//! retried later from the stored row, never from the original payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime};
use tracing::{debug, error, info, instrument, warn};

use pmbridge_billing::{
    BillingResult, BillingStoreError, BillingSyncPatch, BillingSyncRecord, BillingSyncStorage,
    CreateOutcome, NewSubscription, ProcessedEvents, Subscription, SubscriptionStorage, SyncStatus,
};
use pmbridge_core::{DomainError, Result as DomainResult};
use pmbridge_soap::SoapTransport;

use crate::cache::CacheInvalidator;
use crate::domain::DomainService;
use crate::requests::{NewCharge, NewPayment, parse_amount};

/// Webhook event kinds that carry a completed payment.
pub const SUPPORTED_EVENT_KINDS: &[&str] = &[
    "payment_intent.succeeded",
    "charge.succeeded",
    "checkout.session.completed",
    "orders/paid",
];

/// A webhook delivery whose signature was already verified upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event type, e.g. `payment_intent.succeeded`.
    pub kind: String,
    pub event_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookAck {
    /// The event kind is not one this service reconciles.
    Ignored { kind: String },
    /// The event was already synced, or another delivery is syncing it;
    /// nothing was sent to the practice service.
    Duplicate { event_id: String },
    /// The event is recorded with the given status.
    Recorded { event_id: String, status: SyncStatus },
}

/// Payment details pulled out of a webhook payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentDetails {
    pub payment_intent_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub email: Option<String>,
    pub patient_id: Option<String>,
}

impl PaymentDetails {
    /// Reads the details from either the full event envelope or the bare
    /// event object.
    pub fn from_event(kind: &str, payload: &Value) -> Self {
        let object = payload.pointer("/data/object").unwrap_or(payload);
        let text = |pointer: &str| {
            object
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let cents = |pointer: &str| object.pointer(pointer).and_then(Value::as_i64);

        let metadata_patient = text("/metadata/patient_id");
        match kind {
            "payment_intent.succeeded" => Self {
                payment_intent_id: text("/id"),
                amount_cents: cents("/amount_received").or_else(|| cents("/amount")),
                currency: text("/currency"),
                email: text("/receipt_email").or_else(|| text("/metadata/email")),
                patient_id: metadata_patient,
            },
            "charge.succeeded" => Self {
                payment_intent_id: text("/payment_intent"),
                amount_cents: cents("/amount_captured").or_else(|| cents("/amount")),
                currency: text("/currency"),
                email: text("/billing_details/email").or_else(|| text("/receipt_email")),
                patient_id: metadata_patient,
            },
            "checkout.session.completed" => Self {
                payment_intent_id: text("/payment_intent"),
                amount_cents: cents("/amount_total"),
                currency: text("/currency"),
                email: text("/customer_details/email").or_else(|| text("/customer_email")),
                patient_id: metadata_patient,
            },
            "orders/paid" => Self {
                payment_intent_id: None,
                amount_cents: text("/total_price").as_deref().and_then(parse_amount),
                currency: text("/currency"),
                email: text("/email").or_else(|| text("/customer/email")),
                patient_id: note_attribute(object, "patient_id"),
            },
            _ => Self::default(),
        }
    }

    fn into_patch(self) -> BillingSyncPatch {
        BillingSyncPatch {
            payment_intent_id: self.payment_intent_id,
            customer_email: self.email,
            patient_id: self.patient_id,
            amount_cents: self.amount_cents,
            currency: self.currency.map(|c| c.to_uppercase()),
            ..Default::default()
        }
    }
}

fn note_attribute(object: &Value, name: &str) -> Option<String> {
    object
        .get("note_attributes")?
        .as_array()?
        .iter()
        .find(|attr| attr.get("name").and_then(Value::as_str) == Some(name))?
        .get("value")
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

/// The practice-service operations billing reconciliation needs.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn find_patient_by_email(&self, email: &str) -> DomainResult<Option<String>>;
    async fn create_charge(&self, charge: &NewCharge) -> DomainResult<String>;
    async fn create_payment(&self, payment: &NewPayment) -> DomainResult<String>;
}

#[async_trait]
impl<T, C> BillingGateway for DomainService<T, C>
where
    T: SoapTransport,
    C: CacheInvalidator,
{
    async fn find_patient_by_email(&self, email: &str) -> DomainResult<Option<String>> {
        self.find_patient_id_by_email(email).await
    }

    async fn create_charge(&self, charge: &NewCharge) -> DomainResult<String> {
        DomainService::create_charge(self, charge).await
    }

    async fn create_payment(&self, payment: &NewPayment) -> DomainResult<String> {
        DomainService::create_payment(self, payment).await
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Settle events as `synced-mock` without calling the practice service.
    pub mock_remote: bool,
    pub default_currency: String,
    pub batch_size: usize,
    /// Age after which a `syncing` claim is considered abandoned.
    pub claim_timeout: time::Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            mock_remote: false,
            default_currency: "USD".to_string(),
            batch_size: 25,
            claim_timeout: time::Duration::minutes(10),
        }
    }
}

/// Counts from one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub settled: usize,
    pub billed: usize,
}

/// Gateway for deployments without a practice-service endpoint. Every call
/// is reported as unsupported, which leaves rows `stored`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

#[async_trait]
impl BillingGateway for OfflineGateway {
    async fn find_patient_by_email(&self, _email: &str) -> DomainResult<Option<String>> {
        Err(DomainError::unsupported("GetPatients", "practice service not configured"))
    }

    async fn create_charge(&self, _charge: &NewCharge) -> DomainResult<String> {
        Err(DomainError::unsupported("CreateCharge", "practice service not configured"))
    }

    async fn create_payment(&self, _payment: &NewPayment) -> DomainResult<String> {
        Err(DomainError::unsupported("CreatePayment", "practice service not configured"))
    }
}

pub struct BillingReconciler {
    gateway: Arc<dyn BillingGateway>,
    store: Arc<dyn BillingSyncStorage>,
    subscriptions: Arc<dyn SubscriptionStorage>,
    processed: ProcessedEvents,
    options: ReconcilerOptions,
}

impl BillingReconciler {
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        store: Arc<dyn BillingSyncStorage>,
        subscriptions: Arc<dyn SubscriptionStorage>,
        processed: ProcessedEvents,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            gateway,
            store,
            subscriptions,
            processed,
            options,
        }
    }

    /// Records a webhook delivery and pushes it to the practice service.
    ///
    /// Fails only when billing storage fails; remote failures leave the row
    /// in `stored` or `failed` for a later retry. Concurrent deliveries of the
    /// same payment make at most one set of remote calls.
    #[instrument(skip(self, event), fields(event_id = %event.event_id, kind = %event.kind))]
    pub async fn handle(&self, event: WebhookEvent) -> BillingResult<WebhookAck> {
        if !SUPPORTED_EVENT_KINDS.contains(&event.kind.as_str()) {
            debug!("Ignoring unsupported webhook kind");
            return Ok(WebhookAck::Ignored { kind: event.kind });
        }
        if !self.processed.claim(&event.event_id).await {
            debug!("Event already claimed or processed (marker)");
            return Ok(self.duplicate(event.event_id));
        }

        let outcome = self.record_and_sync(&event).await;
        // Only a settled event keeps its marker; anything else must stay
        // deliverable.
        if !matches!(outcome, Ok((_, true))) {
            self.processed.forget(&event.event_id).await;
        }
        outcome.map(|(ack, _)| ack)
    }

    /// Returns the acknowledgment and whether the payment is settled.
    async fn record_and_sync(&self, event: &WebhookEvent) -> BillingResult<(WebhookAck, bool)> {
        let details = PaymentDetails::from_event(&event.kind, &event.payload);
        if self.already_settled(&event.event_id, details.payment_intent_id.as_deref()).await? {
            return Ok((self.duplicate(event.event_id.clone()), true));
        }

        // New rows start as `received`; an existing row keeps its status so a
        // redelivery never resets a claim held by another worker.
        let mut patch = details.into_patch();
        let record = match self.store.upsert_by_event_id(&event.event_id, patch.clone()).await {
            Err(BillingStoreError::Conflict(message)) => {
                // The payment intent belongs to another delivery's row; keep
                // this event on its own row rather than lose it.
                warn!(error = %message, "Payment intent already owned by another event");
                patch.payment_intent_id = None;
                self.store.upsert_by_event_id(&event.event_id, patch).await?
            }
            other => other?,
        };
        if record.status.is_settled() {
            return Ok((self.duplicate(event.event_id.clone()), true));
        }

        let row_event_id = record
            .event_id
            .clone()
            .ok_or_else(|| BillingStoreError::internal(format!("row {} has no event id", record.id)))?;
        let Some(record) = self.claim_and_sync(&row_event_id).await? else {
            debug!(row = %record.id, "Billing row is being synced by another delivery");
            return Ok((self.duplicate(event.event_id.clone()), false));
        };

        info!(status = %record.status, attempts = record.attempts, "Webhook recorded");
        let settled = record.status.is_settled();
        Ok((
            WebhookAck::Recorded {
                event_id: event.event_id.clone(),
                status: record.status,
            },
            settled,
        ))
    }

    /// Re-runs the sync for a stored event. Returns `None` when no row exists;
    /// never creates one. A row currently claimed by another worker is
    /// returned as it stands.
    #[instrument(skip(self))]
    pub async fn retry(&self, event_id: &str) -> BillingResult<Option<BillingSyncRecord>> {
        let Some(record) = self.store.get_by_event_id(event_id).await? else {
            warn!("No billing row to retry");
            return Ok(None);
        };
        if record.status.is_settled() {
            return Ok(Some(record));
        }
        match self.claim_and_sync(event_id).await? {
            Some(record) => {
                if record.status.is_settled() {
                    self.processed.mark(event_id).await;
                }
                Ok(Some(record))
            }
            None => {
                debug!("Billing row is claimed by another worker");
                self.store.get_by_event_id(event_id).await
            }
        }
    }

    /// Retries up to `limit` `received`/`stored` rows and abandoned claims,
    /// oldest update first. `failed` rows are left for an explicit
    /// [`retry`](Self::retry). Returns how many were settled.
    #[instrument(skip(self))]
    pub async fn retry_pending(&self, limit: usize) -> BillingResult<usize> {
        let pending = self.store.list_by_status(SyncStatus::RETRYABLE, limit).await?;
        let mut settled = 0;
        for record in pending {
            let Some(event_id) = record.event_id else {
                continue;
            };
            match self.claim_and_sync(&event_id).await {
                Ok(Some(record)) if record.status.is_settled() => {
                    self.processed.mark(&event_id).await;
                    settled += 1;
                }
                Ok(Some(record)) => {
                    debug!(row = %record.id, status = %record.status, "Row still pending");
                }
                Ok(None) => {
                    debug!(event_id = %event_id, "Row claimed elsewhere, skipping");
                }
                Err(e) => {
                    error!(row = %record.id, error = %e, "Retry failed");
                }
            }
        }
        Ok(settled)
    }

    pub async fn register_subscription(&self, new: NewSubscription) -> BillingResult<CreateOutcome> {
        let outcome = self.subscriptions.create_if_absent(new).await?;
        if outcome.created {
            info!(subscription_id = %outcome.subscription.id, "Subscription registered");
        }
        Ok(outcome)
    }

    /// Bills every subscription due on `today` under the key
    /// `sub_<id>_<date>` and moves its next billing date past `today`.
    #[instrument(skip(self))]
    pub async fn run_due_subscriptions(&self, today: Date) -> BillingResult<usize> {
        let due = self
            .subscriptions
            .list_due(today, self.options.batch_size)
            .await?;
        let mut billed = 0;
        for subscription in due {
            match self.bill_subscription(&subscription, today).await {
                Ok(()) => billed += 1,
                Err(e) => {
                    error!(subscription_id = %subscription.id, error = %e, "Subscription billing failed");
                }
            }
        }
        Ok(billed)
    }

    async fn bill_subscription(&self, subscription: &Subscription, today: Date) -> BillingResult<()> {
        let key = subscription.billing_key(today);
        let record = self
            .store
            .upsert_by_event_id(
                &key,
                BillingSyncPatch {
                    patient_id: subscription.patient_id.clone(),
                    amount_cents: Some(subscription.amount_cents),
                    currency: Some(subscription.currency.to_uppercase()),
                    ..Default::default()
                },
            )
            .await?;
        if !record.status.is_settled() && self.claim_and_sync(&key).await?.is_none() {
            debug!(key = %key, "Subscription charge is being synced elsewhere");
        }

        let next = next_billing_date(subscription, today).ok_or_else(|| {
            BillingStoreError::internal(format!(
                "cannot advance billing date of {} past {today}",
                subscription.id
            ))
        })?;
        self.subscriptions
            .record_billing(&subscription.id, today, next)
            .await?;
        info!(subscription_id = %subscription.id, key = %key, next = %next, "Subscription billed");
        Ok(())
    }

    /// Polls for pending rows and due subscriptions until the task is dropped.
    pub async fn run(&self, poll_interval: Duration) {
        info!(
            poll_interval_secs = poll_interval.as_secs(),
            "Starting billing reconciler"
        );
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let summary = self.run_once(OffsetDateTime::now_utc().date()).await;
            if summary != PassSummary::default() {
                info!(
                    settled = summary.settled,
                    billed = summary.billed,
                    "Reconciliation pass finished"
                );
            }
        }
    }

    /// One polling pass: retry pending rows, then bill due subscriptions.
    pub async fn run_once(&self, today: Date) -> PassSummary {
        let mut summary = PassSummary::default();
        match self.retry_pending(self.options.batch_size).await {
            Ok(settled) => summary.settled = settled,
            Err(e) => error!(error = %e, "Failed to list pending billing rows"),
        }
        match self.run_due_subscriptions(today).await {
            Ok(billed) => summary.billed = billed,
            Err(e) => error!(error = %e, "Failed to list due subscriptions"),
        }
        summary
    }

    fn duplicate(&self, event_id: String) -> WebhookAck {
        debug!(event_id = %event_id, "Duplicate delivery acknowledged");
        WebhookAck::Duplicate { event_id }
    }

    async fn already_settled(&self, event_id: &str, payment_intent_id: Option<&str>) -> BillingResult<bool> {
        if let Some(record) = self.store.get_by_event_id(event_id).await?
            && record.status.is_settled()
        {
            return Ok(true);
        }
        if let Some(intent) = payment_intent_id
            && let Some(record) = self.store.get_by_payment_intent_id(intent).await?
            && record.status.is_settled()
        {
            return Ok(true);
        }
        Ok(false)
    }

    /// Claims the row owning `event_id` and pushes it to the practice
    /// service. Returns `None` without any remote call when the row is
    /// settled or claimed by another worker.
    ///
    /// In mock mode the row settles as `synced-mock` without any remote
    /// call. A charge created by an earlier attempt is reused, so a retry
    /// after a failed payment never creates a second charge.
    async fn claim_and_sync(&self, event_id: &str) -> BillingResult<Option<BillingSyncRecord>> {
        let Some(record) = self
            .store
            .claim_by_event_id(event_id, self.options.claim_timeout)
            .await?
        else {
            return Ok(None);
        };
        let patch = self.attempt(&record).await;
        self.store
            .update_by_event_id(event_id, patch)
            .await?
            .map(Some)
            .ok_or_else(|| BillingStoreError::not_found("billing sync", event_id))
    }

    async fn attempt(&self, record: &BillingSyncRecord) -> BillingSyncPatch {
        let Some(amount_cents) = record.amount_cents.filter(|amount| *amount > 0) else {
            return BillingSyncPatch::status(SyncStatus::Failed).with_error("payment has no amount");
        };
        if self.options.mock_remote {
            return BillingSyncPatch::status(SyncStatus::SyncedMock).cleared_error();
        }

        let patient_id = match &record.patient_id {
            Some(id) => id.clone(),
            None => match record.customer_email.as_deref() {
                None => {
                    return BillingSyncPatch::status(SyncStatus::Failed)
                        .with_error("payment has no patient reference or customer email");
                }
                Some(email) => match self.gateway.find_patient_by_email(email).await {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        return BillingSyncPatch::status(SyncStatus::Failed)
                            .with_error(format!("no patient found for {email}"));
                    }
                    Err(e) => return failure_patch(&e),
                },
            },
        };

        let currency = record
            .currency
            .clone()
            .unwrap_or_else(|| self.options.default_currency.clone());
        let reference = record
            .payment_intent_id
            .clone()
            .or_else(|| record.event_id.clone());

        let charge_id = match &record.charge_id {
            Some(id) => id.clone(),
            None => {
                let charge = NewCharge {
                    patient_id: patient_id.clone(),
                    amount_cents,
                    currency: currency.clone(),
                    description: Some("Online payment".to_string()),
                    procedure_code: None,
                    reference: reference.clone(),
                    practice_id: record.practice_id.clone(),
                };
                match self.gateway.create_charge(&charge).await {
                    Ok(id) => id,
                    Err(e) => {
                        return BillingSyncPatch {
                            patient_id: Some(patient_id),
                            ..failure_patch(&e)
                        };
                    }
                }
            }
        };

        let payment = NewPayment {
            patient_id: patient_id.clone(),
            amount_cents,
            currency,
            charge_id: Some(charge_id.clone()),
            method: Some("Credit Card".to_string()),
            reference,
            practice_id: record.practice_id.clone(),
        };
        match self.gateway.create_payment(&payment).await {
            Ok(payment_id) => BillingSyncPatch {
                patient_id: Some(patient_id),
                charge_id: Some(charge_id),
                payment_id: Some(payment_id),
                ..BillingSyncPatch::status(SyncStatus::Synced).cleared_error()
            },
            Err(e) => BillingSyncPatch {
                patient_id: Some(patient_id),
                charge_id: Some(charge_id),
                ..failure_patch(&e)
            },
        }
    }
}

/// Status and message for a remote failure. Input problems cannot succeed on
/// retry and fail the row; everything else is kept as `stored`.
fn failure_patch(error: &DomainError) -> BillingSyncPatch {
    warn!(error = %error, category = %error.category(), "Practice service sync failed");
    match error {
        DomainError::Validation(_) => {
            BillingSyncPatch::status(SyncStatus::Failed).with_error(error.to_string())
        }
        DomainError::Unsupported { operation, message } => BillingSyncPatch::status(SyncStatus::Stored)
            .with_error(format!(
                "{operation} is not available on the practice service ({message}); payment stored for manual reconciliation"
            )),
        _ => BillingSyncPatch::status(SyncStatus::Stored).with_error(error.to_string()),
    }
}

/// First scheduled date strictly after `today`; missed periods are skipped.
fn next_billing_date(subscription: &Subscription, today: Date) -> Option<Date> {
    let mut next = subscription.frequency.advance(subscription.next_billing_date)?;
    while next <= today {
        next = subscription.frequency.advance(next)?;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payment_intent_details() {
        let payload = json!({
            "id": "evt_1",
            "data": {"object": {
                "id": "pi_1",
                "amount": 12500,
                "amount_received": 12500,
                "currency": "usd",
                "receipt_email": "ada@example.com",
                "metadata": {"patient_id": "101"}
            }}
        });
        let details = PaymentDetails::from_event("payment_intent.succeeded", &payload);
        assert_eq!(details.payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(details.amount_cents, Some(12_500));
        assert_eq!(details.email.as_deref(), Some("ada@example.com"));
        assert_eq!(details.patient_id.as_deref(), Some("101"));
    }

    #[test]
    fn test_checkout_session_details_from_bare_object() {
        let payload = json!({
            "payment_intent": "pi_2",
            "amount_total": 4900,
            "currency": "eur",
            "customer_details": {"email": "alan@example.com"}
        });
        let details = PaymentDetails::from_event("checkout.session.completed", &payload);
        assert_eq!(details.payment_intent_id.as_deref(), Some("pi_2"));
        assert_eq!(details.amount_cents, Some(4_900));
        assert_eq!(details.patient_id, None);
        assert_eq!(details.into_patch().currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_order_details() {
        let payload = json!({
            "id": 820982911946154508_u64,
            "total_price": "125.50",
            "currency": "USD",
            "email": "grace@example.com",
            "note_attributes": [{"name": "patient_id", "value": 101}]
        });
        let details = PaymentDetails::from_event("orders/paid", &payload);
        assert_eq!(details.payment_intent_id, None);
        assert_eq!(details.amount_cents, Some(12_550));
        assert_eq!(details.patient_id.as_deref(), Some("101"));
    }

    #[test]
    fn test_failure_status_mapping() {
        let stored = failure_patch(&DomainError::unsupported("CreateCharge", "ActionNotSupported"));
        assert_eq!(stored.status, Some(SyncStatus::Stored));
        assert!(stored.error_message.unwrap().contains("CreateCharge"));

        let stored = failure_patch(&DomainError::remote("connection reset"));
        assert_eq!(stored.status, Some(SyncStatus::Stored));
        assert_eq!(stored.error_message.as_deref(), Some("Remote call failed: connection reset"));

        let failed = failure_patch(&DomainError::validation("amount must be positive"));
        assert_eq!(failed.status, Some(SyncStatus::Failed));
    }
}
