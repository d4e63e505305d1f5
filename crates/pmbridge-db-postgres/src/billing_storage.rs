//! PostgreSQL storage for billing reconciliation rows and subscriptions.
//!
//! Upserts lock the matching row (`SELECT ... FOR UPDATE`) inside a
//! transaction and merge in Rust with the same rules as the in-memory store.
//! Unique partial indexes on `event_id` and `payment_intent_id` make a lost
//! insert race surface as a unique violation, which is retried once and then
//! finds the winner's row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashSet;
use sqlx_postgres::PgPool;
use time::{Date, Duration, Month, OffsetDateTime};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use pmbridge_billing::{
    BillingResult, BillingStoreError, BillingSyncPatch, BillingSyncRecord, BillingSyncStorage,
    CreateOutcome, Frequency, NewSubscription, Subscription, SubscriptionStatus,
    SubscriptionStorage, SyncStatus, synthetic_event_id,
};

use crate::error::map_sqlx_error;

macro_rules! record_columns {
    () => {
        "id, event_id, payment_intent_id, customer_email, patient_id, practice_id, charge_id, \
         payment_id, amount_cents, currency, status, error_message, attempts, created_at, updated_at"
    };
}

macro_rules! subscription_columns {
    () => {
        "id, customer_id, product_id, patient_id, amount_cents, currency, frequency, status, \
         next_billing_date, last_billing_date, created_at"
    };
}

type RecordRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
    String,
    Option<String>,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
);

type SubscriptionRow = (
    String,
    String,
    String,
    Option<String>,
    i64,
    String,
    String,
    String,
    NaiveDate,
    Option<NaiveDate>,
    DateTime<Utc>,
);

/// PostgreSQL implementation of the billing storage traits.
#[derive(Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
    tables_created: Arc<DashSet<String>>,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables_created: Arc::new(DashSet::new()),
        }
    }

    /// Ensure the billing tables exist.
    #[instrument(skip(self))]
    async fn ensure_tables(&self) -> BillingResult<()> {
        if self.tables_created.contains("billing") {
            return Ok(());
        }

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS _billing_sync (
                id TEXT PRIMARY KEY,
                event_id TEXT,
                payment_intent_id TEXT,
                customer_email TEXT,
                patient_id TEXT,
                practice_id TEXT,
                charge_id TEXT,
                payment_id TEXT,
                amount_cents BIGINT,
                currency TEXT,
                status TEXT NOT NULL DEFAULT 'received',
                error_message TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_billing_sync_event ON _billing_sync(event_id) WHERE event_id IS NOT NULL",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_billing_sync_intent ON _billing_sync(payment_intent_id) WHERE payment_intent_id IS NOT NULL",
            "CREATE INDEX IF NOT EXISTS idx_billing_sync_status ON _billing_sync(status, updated_at)",
            r#"
            CREATE TABLE IF NOT EXISTS _billing_subscriptions (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                patient_id TEXT,
                amount_cents BIGINT NOT NULL,
                currency TEXT NOT NULL,
                frequency TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                next_billing_date DATE NOT NULL,
                last_billing_date DATE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (customer_id, product_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_billing_subscriptions_due ON _billing_subscriptions(next_billing_date) WHERE status = 'active'",
        ];

        for statement in statements {
            sqlx_core::query::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }

        info!("Created billing tables");
        self.tables_created.insert("billing".to_string());
        Ok(())
    }

    fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
        DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
    }

    fn chrono_to_time(t: DateTime<Utc>) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(t.timestamp())
            .map(|dt| dt.replace_nanosecond(t.timestamp_subsec_nanos()).unwrap_or(dt))
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    fn date_to_chrono(d: Date) -> BillingResult<NaiveDate> {
        NaiveDate::from_ymd_opt(d.year(), u32::from(u8::from(d.month())), u32::from(d.day()))
            .ok_or_else(|| BillingStoreError::internal(format!("date out of range: {d}")))
    }

    fn chrono_to_date(d: NaiveDate) -> BillingResult<Date> {
        let month = u8::try_from(d.month())
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .ok_or_else(|| BillingStoreError::internal(format!("invalid month in {d}")))?;
        let day = u8::try_from(d.day())
            .map_err(|_| BillingStoreError::internal(format!("invalid day in {d}")))?;
        Date::from_calendar_date(d.year(), month, day)
            .map_err(|e| BillingStoreError::internal(e.to_string()))
    }

    fn record_from_row(row: RecordRow) -> BillingResult<BillingSyncRecord> {
        let (
            id,
            event_id,
            payment_intent_id,
            customer_email,
            patient_id,
            practice_id,
            charge_id,
            payment_id,
            amount_cents,
            currency,
            status,
            error_message,
            attempts,
            created_at,
            updated_at,
        ) = row;

        Ok(BillingSyncRecord {
            id,
            event_id,
            payment_intent_id,
            customer_email,
            patient_id,
            practice_id,
            charge_id,
            payment_id,
            amount_cents,
            currency,
            status: status.parse().map_err(BillingStoreError::internal)?,
            error_message,
            attempts: u32::try_from(attempts).unwrap_or_default(),
            created_at: Self::chrono_to_time(created_at),
            updated_at: Self::chrono_to_time(updated_at),
        })
    }

    fn subscription_from_row(row: SubscriptionRow) -> BillingResult<Subscription> {
        let (
            id,
            customer_id,
            product_id,
            patient_id,
            amount_cents,
            currency,
            frequency,
            status,
            next_billing_date,
            last_billing_date,
            created_at,
        ) = row;

        Ok(Subscription {
            id,
            customer_id,
            product_id,
            patient_id,
            amount_cents,
            currency,
            frequency: frequency
                .parse::<Frequency>()
                .map_err(BillingStoreError::internal)?,
            status: status
                .parse::<SubscriptionStatus>()
                .map_err(BillingStoreError::internal)?,
            next_billing_date: Self::chrono_to_date(next_billing_date)?,
            last_billing_date: last_billing_date.map(Self::chrono_to_date).transpose()?,
            created_at: Self::chrono_to_time(created_at),
        })
    }

    /// Upsert with one retry when a concurrent insert wins the unique index.
    async fn upsert(&self, patch: BillingSyncPatch) -> BillingResult<BillingSyncRecord> {
        self.ensure_tables().await?;

        match self.try_upsert(patch.clone()).await {
            Err(BillingStoreError::Conflict(message)) => {
                debug!(%message, "Upsert lost an insert race, retrying");
                self.try_upsert(patch).await
            }
            other => other,
        }
    }

    async fn try_upsert(&self, mut patch: BillingSyncPatch) -> BillingResult<BillingSyncRecord> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let rows: Vec<RecordRow> = sqlx_core::query_as::query_as(concat!(
            "SELECT ",
            record_columns!(),
            " FROM _billing_sync WHERE event_id = $1 OR payment_intent_id = $2 FOR UPDATE"
        ))
        .bind(patch.event_id.as_deref())
        .bind(patch.payment_intent_id.as_deref())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let record = match rows.len() {
            0 => {
                if patch.event_id.is_none()
                    && let Some(intent) = patch.payment_intent_id.as_deref()
                {
                    patch.event_id = Some(synthetic_event_id(intent, now));
                }
                let record = BillingSyncRecord::from_patch(Uuid::new_v4().to_string(), patch, now);
                Self::insert_record(&mut tx, &record).await?;
                record
            }
            1 => {
                let mut rows = rows;
                let mut record = rows
                    .pop()
                    .map(Self::record_from_row)
                    .transpose()?
                    .ok_or_else(|| BillingStoreError::internal("row vanished under lock"))?;
                record.apply(patch, now);
                Self::write_record(&mut tx, &record).await?;
                record
            }
            _ => {
                return Err(BillingStoreError::conflict(format!(
                    "event {} and payment intent {} belong to different rows",
                    patch.event_id.as_deref().unwrap_or_default(),
                    patch.payment_intent_id.as_deref().unwrap_or_default()
                )));
            }
        };

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(record)
    }

    async fn insert_record(
        tx: &mut sqlx_postgres::PgTransaction<'_>,
        record: &BillingSyncRecord,
    ) -> BillingResult<()> {
        sqlx_core::query::query(concat!(
            "INSERT INTO _billing_sync (",
            record_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(&record.id)
        .bind(&record.event_id)
        .bind(&record.payment_intent_id)
        .bind(&record.customer_email)
        .bind(&record.patient_id)
        .bind(&record.practice_id)
        .bind(&record.charge_id)
        .bind(&record.payment_id)
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(Self::time_to_chrono(record.created_at))
        .bind(Self::time_to_chrono(record.updated_at))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn write_record(
        tx: &mut sqlx_postgres::PgTransaction<'_>,
        record: &BillingSyncRecord,
    ) -> BillingResult<()> {
        sqlx_core::query::query(
            r#"
            UPDATE _billing_sync
            SET event_id = $2, payment_intent_id = $3, customer_email = $4, patient_id = $5,
                practice_id = $6, charge_id = $7, payment_id = $8, amount_cents = $9,
                currency = $10, status = $11, error_message = $12, attempts = $13,
                updated_at = $14
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(&record.event_id)
        .bind(&record.payment_intent_id)
        .bind(&record.customer_email)
        .bind(&record.patient_id)
        .bind(&record.practice_id)
        .bind(&record.charge_id)
        .bind(&record.payment_id)
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(Self::time_to_chrono(record.updated_at))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn fetch_record(
        &self,
        column: RecordKey,
        value: &str,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        self.ensure_tables().await?;

        let sql = match column {
            RecordKey::EventId => concat!(
                "SELECT ",
                record_columns!(),
                " FROM _billing_sync WHERE event_id = $1"
            ),
            RecordKey::PaymentIntentId => concat!(
                "SELECT ",
                record_columns!(),
                " FROM _billing_sync WHERE payment_intent_id = $1"
            ),
        };

        let row: Option<RecordRow> = sqlx_core::query_as::query_as(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(Self::record_from_row).transpose()
    }

    async fn fetch_subscription(&self, sql: &str, id: &str) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx_core::query_as::query_as(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(Self::subscription_from_row).transpose()
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordKey {
    EventId,
    PaymentIntentId,
}

#[async_trait]
impl BillingSyncStorage for PostgresBillingStore {
    async fn upsert_by_event_id(
        &self,
        event_id: &str,
        mut patch: BillingSyncPatch,
    ) -> BillingResult<BillingSyncRecord> {
        patch.event_id = Some(event_id.to_string());
        let record = self.upsert(patch).await?;
        debug!(event_id, row = %record.id, status = %record.status, "Upserted billing row");
        Ok(record)
    }

    async fn upsert_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
        mut patch: BillingSyncPatch,
    ) -> BillingResult<BillingSyncRecord> {
        patch.payment_intent_id = Some(payment_intent_id.to_string());
        let record = self.upsert(patch).await?;
        debug!(payment_intent_id, row = %record.id, status = %record.status, "Upserted billing row");
        Ok(record)
    }

    async fn update_by_event_id(
        &self,
        event_id: &str,
        patch: BillingSyncPatch,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        self.ensure_tables().await?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row: Option<RecordRow> = sqlx_core::query_as::query_as(concat!(
            "SELECT ",
            record_columns!(),
            " FROM _billing_sync WHERE event_id = $1 FOR UPDATE"
        ))
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = Self::record_from_row(row)?;
        record.apply(patch, OffsetDateTime::now_utc());
        Self::write_record(&mut tx, &record).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(record))
    }

    async fn claim_by_event_id(
        &self,
        event_id: &str,
        stale_after: Duration,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        self.ensure_tables().await?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let row: Option<RecordRow> = sqlx_core::query_as::query_as(concat!(
            "SELECT ",
            record_columns!(),
            " FROM _billing_sync WHERE event_id = $1 FOR UPDATE"
        ))
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = Self::record_from_row(row)?;
        let now = OffsetDateTime::now_utc();
        if !record.is_claimable(now, stale_after) {
            debug!(event_id, status = %record.status, "Billing row not claimable");
            return Ok(None);
        }
        record.begin_attempt(now);
        Self::write_record(&mut tx, &record).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(record))
    }

    async fn get_by_event_id(&self, event_id: &str) -> BillingResult<Option<BillingSyncRecord>> {
        self.fetch_record(RecordKey::EventId, event_id).await
    }

    async fn get_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> BillingResult<Option<BillingSyncRecord>> {
        self.fetch_record(RecordKey::PaymentIntentId, payment_intent_id)
            .await
    }

    async fn list_by_status(
        &self,
        statuses: &[SyncStatus],
        limit: usize,
    ) -> BillingResult<Vec<BillingSyncRecord>> {
        self.ensure_tables().await?;

        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<RecordRow> = sqlx_core::query_as::query_as(concat!(
            "SELECT ",
            record_columns!(),
            " FROM _billing_sync WHERE status = ANY($1) ORDER BY updated_at ASC, id ASC LIMIT $2"
        ))
        .bind(statuses)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl SubscriptionStorage for PostgresBillingStore {
    async fn create_if_absent(&self, new: NewSubscription) -> BillingResult<CreateOutcome> {
        self.ensure_tables().await?;

        let candidate = new.into_subscription(
            format!("sub_{}", Uuid::new_v4().simple()),
            OffsetDateTime::now_utc(),
        );

        let inserted: Option<SubscriptionRow> = sqlx_core::query_as::query_as(concat!(
            "INSERT INTO _billing_subscriptions (",
            subscription_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (customer_id, product_id) DO NOTHING RETURNING ",
            subscription_columns!()
        ))
        .bind(&candidate.id)
        .bind(&candidate.customer_id)
        .bind(&candidate.product_id)
        .bind(&candidate.patient_id)
        .bind(candidate.amount_cents)
        .bind(&candidate.currency)
        .bind(candidate.frequency.as_str())
        .bind(candidate.status.as_str())
        .bind(Self::date_to_chrono(candidate.next_billing_date)?)
        .bind(Option::<NaiveDate>::None)
        .bind(Self::time_to_chrono(candidate.created_at))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = inserted {
            let subscription = Self::subscription_from_row(row)?;
            info!(id = %subscription.id, customer_id = %subscription.customer_id, "Created subscription");
            return Ok(CreateOutcome {
                subscription,
                created: true,
            });
        }

        let existing: Option<SubscriptionRow> = sqlx_core::query_as::query_as(concat!(
            "SELECT ",
            subscription_columns!(),
            " FROM _billing_subscriptions WHERE customer_id = $1 AND product_id = $2"
        ))
        .bind(&candidate.customer_id)
        .bind(&candidate.product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row = existing.ok_or_else(|| {
            warn!(customer_id = %candidate.customer_id, "Subscription conflict without a row");
            BillingStoreError::internal("subscription conflict without a row")
        })?;
        Ok(CreateOutcome {
            subscription: Self::subscription_from_row(row)?,
            created: false,
        })
    }

    async fn get(&self, id: &str) -> BillingResult<Option<Subscription>> {
        self.ensure_tables().await?;
        self.fetch_subscription(
            concat!(
                "SELECT ",
                subscription_columns!(),
                " FROM _billing_subscriptions WHERE id = $1"
            ),
            id,
        )
        .await
    }

    async fn list_due(&self, today: Date, limit: usize) -> BillingResult<Vec<Subscription>> {
        self.ensure_tables().await?;

        let rows: Vec<SubscriptionRow> = sqlx_core::query_as::query_as(concat!(
            "SELECT ",
            subscription_columns!(),
            " FROM _billing_subscriptions WHERE status = 'active' AND next_billing_date <= $1 \
             ORDER BY next_billing_date ASC, created_at ASC LIMIT $2"
        ))
        .bind(Self::date_to_chrono(today)?)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(Self::subscription_from_row).collect()
    }

    async fn record_billing(
        &self,
        id: &str,
        billed_on: Date,
        next_billing_date: Date,
    ) -> BillingResult<Subscription> {
        self.ensure_tables().await?;

        let row: Option<SubscriptionRow> = sqlx_core::query_as::query_as(concat!(
            "UPDATE _billing_subscriptions SET last_billing_date = $2, next_billing_date = $3 \
             WHERE id = $1 RETURNING ",
            subscription_columns!()
        ))
        .bind(id)
        .bind(Self::date_to_chrono(billed_on)?)
        .bind(Self::date_to_chrono(next_billing_date)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row = row.ok_or_else(|| BillingStoreError::not_found("subscription", id))?;
        Self::subscription_from_row(row)
    }

    async fn cancel(&self, id: &str) -> BillingResult<Subscription> {
        self.ensure_tables().await?;

        let row = self
            .fetch_subscription(
                concat!(
                    "UPDATE _billing_subscriptions SET status = 'cancelled' WHERE id = $1 RETURNING ",
                    subscription_columns!()
                ),
                id,
            )
            .await?;
        row.ok_or_else(|| BillingStoreError::not_found("subscription", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_timestamp_conversion() {
        let t = datetime!(2025-03-10 10:00:00.123456 UTC);
        let back = PostgresBillingStore::chrono_to_time(PostgresBillingStore::time_to_chrono(t));
        assert_eq!(back, t);
    }

    #[test]
    fn test_date_conversion() {
        let d = date!(2024-02-29);
        let naive = PostgresBillingStore::date_to_chrono(d).unwrap();
        assert_eq!(naive, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(PostgresBillingStore::chrono_to_date(naive).unwrap(), d);
    }

    #[test]
    fn test_record_from_row_rejects_unknown_status() {
        let now = Utc::now();
        let row: RecordRow = (
            "row-1".into(),
            Some("evt_1".into()),
            None,
            None,
            None,
            None,
            None,
            None,
            Some(100),
            Some("USD".into()),
            "bogus".into(),
            None,
            0,
            now,
            now,
        );
        assert!(PostgresBillingStore::record_from_row(row).is_err());
    }

    #[test]
    fn test_record_from_row() {
        let now = Utc::now();
        let row: RecordRow = (
            "row-1".into(),
            Some("evt_1".into()),
            Some("pi_1".into()),
            Some("ada@example.com".into()),
            Some("101".into()),
            None,
            None,
            None,
            Some(100),
            Some("USD".into()),
            "synced-mock".into(),
            None,
            2,
            now,
            now,
        );
        let record = PostgresBillingStore::record_from_row(row).unwrap();
        assert_eq!(record.status, SyncStatus::SyncedMock);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.payment_intent_id.as_deref(), Some("pi_1"));
    }
}
