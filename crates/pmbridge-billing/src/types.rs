//! Billing reconciliation and subscription records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime};

/// Prefix of event ids minted for payment-intent-only inserts.
pub const SYNTHETIC_EVENT_PREFIX: &str = "evt_sync_";

/// Builds the event id assigned to a row first seen by payment intent.
pub fn synthetic_event_id(payment_intent_id: &str, at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!("{SYNTHETIC_EVENT_PREFIX}{payment_intent_id}_{millis}")
}

pub fn is_synthetic_event_id(event_id: &str) -> bool {
    event_id.starts_with(SYNTHETIC_EVENT_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Received,
    /// Claimed by a worker that is pushing the row to the practice service.
    Syncing,
    Stored,
    Synced,
    SyncedMock,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Syncing => "syncing",
            Self::Stored => "stored",
            Self::Synced => "synced",
            Self::SyncedMock => "synced-mock",
            Self::Failed => "failed",
        }
    }

    /// A settled row is never synced again.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Synced | Self::SyncedMock)
    }

    /// Statuses picked up by the retry poller. `failed` rows only move again
    /// on an explicit retry; `syncing` rows are listed so that a stale claim
    /// can be taken over.
    pub const RETRYABLE: &'static [SyncStatus] = &[Self::Received, Self::Stored, Self::Syncing];
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "syncing" => Ok(Self::Syncing),
            "stored" => Ok(Self::Stored),
            "synced" => Ok(Self::Synced),
            "synced-mock" => Ok(Self::SyncedMock),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// One row per external payment event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSyncRecord {
    pub id: String,
    pub event_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub patient_id: Option<String>,
    pub practice_id: Option<String>,
    pub charge_id: Option<String>,
    pub payment_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    /// Remote sync attempts made for this row.
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Partial update. `Some` fields overwrite, `None` fields are preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillingSyncPatch {
    pub event_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub patient_id: Option<String>,
    pub practice_id: Option<String>,
    pub charge_id: Option<String>,
    pub payment_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<SyncStatus>,
    pub error_message: Option<String>,
    /// Drops any stored error message before `error_message` is applied.
    pub clear_error: bool,
    pub attempts: Option<u32>,
}

impl BillingSyncPatch {
    pub fn status(status: SyncStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn cleared_error(mut self) -> Self {
        self.clear_error = true;
        self
    }
}

impl BillingSyncRecord {
    /// Creates a row from the first patch seen for its keys.
    pub fn from_patch(id: String, patch: BillingSyncPatch, now: OffsetDateTime) -> Self {
        let mut record = Self {
            id,
            event_id: None,
            payment_intent_id: None,
            customer_email: None,
            patient_id: None,
            practice_id: None,
            charge_id: None,
            payment_id: None,
            amount_cents: None,
            currency: None,
            status: SyncStatus::Received,
            error_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        record.apply(patch, now);
        record
    }

    /// Whether a worker may claim the row at `now`. A `syncing` row is
    /// claimable again once its claim is older than `stale_after`.
    pub fn is_claimable(&self, now: OffsetDateTime, stale_after: Duration) -> bool {
        match self.status {
            SyncStatus::Received | SyncStatus::Stored | SyncStatus::Failed => true,
            SyncStatus::Syncing => self
                .updated_at
                .checked_add(stale_after)
                .is_some_and(|expires| expires <= now),
            SyncStatus::Synced | SyncStatus::SyncedMock => false,
        }
    }

    /// Marks the row as claimed and counts the attempt.
    pub fn begin_attempt(&mut self, now: OffsetDateTime) {
        self.status = SyncStatus::Syncing;
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = now;
    }

    /// Merges `patch` into the row.
    ///
    /// Unique keys are only filled in, never replaced, except that a
    /// synthetic event id gives way to a real one.
    pub fn apply(&mut self, patch: BillingSyncPatch, now: OffsetDateTime) {
        if let Some(event_id) = patch.event_id {
            let replaceable = self.event_id.as_deref().is_none_or(is_synthetic_event_id);
            if replaceable {
                self.event_id = Some(event_id);
            }
        }
        if self.payment_intent_id.is_none() {
            self.payment_intent_id = patch.payment_intent_id;
        }

        merge(&mut self.customer_email, patch.customer_email);
        merge(&mut self.patient_id, patch.patient_id);
        merge(&mut self.practice_id, patch.practice_id);
        merge(&mut self.charge_id, patch.charge_id);
        merge(&mut self.payment_id, patch.payment_id);
        merge(&mut self.amount_cents, patch.amount_cents);
        merge(&mut self.currency, patch.currency);
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.clear_error {
            self.error_message = None;
        }
        merge(&mut self.error_message, patch.error_message);
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        self.updated_at = now;
    }
}

fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Next billing date after `from`. Month-based periods clamp to the last
    /// day of a shorter month.
    pub fn advance(self, from: Date) -> Option<Date> {
        match self {
            Self::Weekly => from.checked_add(Duration::days(7)),
            Self::Monthly => add_months(from, 1),
            Self::Quarterly => add_months(from, 3),
            Self::Yearly => add_months(from, 12),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}

fn add_months(from: Date, months: u32) -> Option<Date> {
    let zero_based = from.month() as u32 - 1 + months;
    let year = from.year() + i32::try_from(zero_based / 12).ok()?;
    let month = Month::try_from(u8::try_from(zero_based % 12 + 1).ok()?).ok()?;
    let day = from.day().min(last_day_of(year, month)?);
    Date::from_calendar_date(year, month, day).ok()
}

fn last_day_of(year: i32, month: Month) -> Option<u8> {
    let (next_year, next_month) = match month {
        Month::December => (year + 1, Month::January),
        other => (year, other.next()),
    };
    let first_of_next = Date::from_calendar_date(next_year, next_month, 1).ok()?;
    Some(first_of_next.previous_day()?.day())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub customer_id: String,
    pub product_id: String,
    pub patient_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub frequency: Frequency,
    pub status: SubscriptionStatus,
    pub next_billing_date: Date,
    pub last_billing_date: Option<Date>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Subscription {
    pub fn is_due(&self, today: Date) -> bool {
        self.status == SubscriptionStatus::Active && self.next_billing_date <= today
    }

    /// Deterministic event key for the billing run on `billed_on`.
    pub fn billing_key(&self, billed_on: Date) -> String {
        format!("sub_{}_{}", self.id, billed_on)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub customer_id: String,
    pub product_id: String,
    pub patient_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub frequency: Frequency,
    pub first_billing_date: Date,
}

impl NewSubscription {
    pub fn into_subscription(self, id: String, now: OffsetDateTime) -> Subscription {
        Subscription {
            id,
            customer_id: self.customer_id,
            product_id: self.product_id,
            patient_id: self.patient_id,
            amount_cents: self.amount_cents,
            currency: self.currency,
            frequency: self.frequency,
            status: SubscriptionStatus::Active,
            next_billing_date: self.first_billing_date,
            last_billing_date: None,
            created_at: now,
        }
    }
}

/// Result of an idempotent subscription create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub subscription: Subscription,
    pub created: bool,
}
