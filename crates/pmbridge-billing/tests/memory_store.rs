use std::sync::Arc;

use pmbridge_billing::{
    BillingStoreError, BillingSyncPatch, BillingSyncStorage, Frequency, InMemoryBillingStore,
    NewSubscription, SubscriptionStatus, SubscriptionStorage, SyncStatus, is_synthetic_event_id,
};
use time::Duration;
use time::macros::date;

fn received(email: &str) -> BillingSyncPatch {
    BillingSyncPatch {
        customer_email: Some(email.to_string()),
        amount_cents: Some(12_500),
        currency: Some("USD".into()),
        status: Some(SyncStatus::Received),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_double_upsert_merges_into_one_row() {
    let store = InMemoryBillingStore::new();

    let first = store
        .upsert_by_event_id("evt_1", received("ada@example.com"))
        .await
        .unwrap();
    let second = store
        .upsert_by_event_id(
            "evt_1",
            BillingSyncPatch {
                patient_id: Some("101".into()),
                status: Some(SyncStatus::Synced),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(first.id, second.id);
    assert_eq!(second.customer_email.as_deref(), Some("ada@example.com"));
    assert_eq!(second.amount_cents, Some(12_500));
    assert_eq!(second.patient_id.as_deref(), Some("101"));
    assert_eq!(second.status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_payment_intent_then_event_share_a_row() {
    let store = InMemoryBillingStore::new();

    let by_intent = store
        .upsert_by_payment_intent_id("pi_9", received("ada@example.com"))
        .await
        .unwrap();
    let synthetic = by_intent.event_id.clone().unwrap();
    assert!(is_synthetic_event_id(&synthetic));
    assert!(synthetic.starts_with("evt_sync_pi_9_"));

    let by_event = store
        .upsert_by_event_id(
            "evt_real",
            BillingSyncPatch {
                payment_intent_id: Some("pi_9".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(by_event.id, by_intent.id);
    assert_eq!(by_event.event_id.as_deref(), Some("evt_real"));
    assert!(store.get_by_event_id("evt_real").await.unwrap().is_some());
    assert!(store.get_by_event_id(&synthetic).await.unwrap().is_none());
    assert_eq!(
        store
            .get_by_payment_intent_id("pi_9")
            .await
            .unwrap()
            .map(|r| r.id),
        Some(by_intent.id)
    );
}

#[tokio::test]
async fn test_event_then_payment_intent_share_a_row() {
    let store = InMemoryBillingStore::new();

    store
        .upsert_by_event_id(
            "evt_1",
            BillingSyncPatch {
                payment_intent_id: Some("pi_1".into()),
                ..received("ada@example.com")
            },
        )
        .await
        .unwrap();
    let merged = store
        .upsert_by_payment_intent_id("pi_1", BillingSyncPatch::status(SyncStatus::Stored))
        .await
        .unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(merged.event_id.as_deref(), Some("evt_1"));
    assert_eq!(merged.status, SyncStatus::Stored);
}

#[tokio::test]
async fn test_keys_of_different_rows_conflict() {
    let store = InMemoryBillingStore::new();
    store
        .upsert_by_event_id("evt_a", received("a@example.com"))
        .await
        .unwrap();
    store
        .upsert_by_payment_intent_id("pi_b", received("b@example.com"))
        .await
        .unwrap();

    let err = store
        .upsert_by_event_id(
            "evt_a",
            BillingSyncPatch {
                payment_intent_id: Some("pi_b".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BillingStoreError::Conflict(_)));
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_update_never_inserts() {
    let store = InMemoryBillingStore::new();

    let updated = store
        .update_by_event_id("evt_missing", BillingSyncPatch::status(SyncStatus::Synced))
        .await
        .unwrap();
    assert!(updated.is_none());
    assert!(store.is_empty().await);

    store
        .upsert_by_event_id("evt_1", received("ada@example.com"))
        .await
        .unwrap();
    let updated = store
        .update_by_event_id(
            "evt_1",
            BillingSyncPatch::status(SyncStatus::Failed).with_error("no patient"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, SyncStatus::Failed);
    assert_eq!(updated.error_message.as_deref(), Some("no patient"));
    assert_eq!(updated.customer_email.as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn test_concurrent_upserts_create_one_row() {
    let store = Arc::new(InMemoryBillingStore::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .upsert_by_event_id(
                        "evt_race",
                        BillingSyncPatch {
                            attempts: Some(i),
                            ..Default::default()
                        },
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_list_by_status() {
    let store = InMemoryBillingStore::new();
    store
        .upsert_by_event_id("evt_1", BillingSyncPatch::status(SyncStatus::Stored))
        .await
        .unwrap();
    store
        .upsert_by_event_id("evt_2", BillingSyncPatch::status(SyncStatus::Synced))
        .await
        .unwrap();
    store
        .upsert_by_event_id("evt_3", BillingSyncPatch::status(SyncStatus::Failed))
        .await
        .unwrap();

    let pending = store
        .list_by_status(SyncStatus::RETRYABLE, 10)
        .await
        .unwrap();
    let ids: Vec<_> = pending.iter().filter_map(|r| r.event_id.clone()).collect();
    // Failed rows wait for an explicit retry.
    assert_eq!(ids, vec!["evt_1"]);

    let limited = store
        .list_by_status(SyncStatus::RETRYABLE, 1)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let store = InMemoryBillingStore::new();
    store
        .upsert_by_event_id("evt_1", BillingSyncPatch::status(SyncStatus::Stored))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        store.claim_by_event_id("evt_1", Duration::minutes(10)),
        store.claim_by_event_id("evt_1", Duration::minutes(10)),
    );
    let claimed: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status, SyncStatus::Syncing);
    assert_eq!(claimed[0].attempts, 1);

    // A stale claim can be taken over.
    let again = store
        .claim_by_event_id("evt_1", Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.attempts, 2);
}

#[tokio::test]
async fn test_claim_skips_settled_and_missing_rows() {
    let store = InMemoryBillingStore::new();
    store
        .upsert_by_event_id("evt_done", BillingSyncPatch::status(SyncStatus::Synced))
        .await
        .unwrap();

    let lease = Duration::minutes(10);
    assert!(store.claim_by_event_id("evt_done", lease).await.unwrap().is_none());
    assert!(store.claim_by_event_id("evt_missing", lease).await.unwrap().is_none());
    assert_eq!(store.len().await, 1);
}

fn monthly(customer: &str, product: &str, first: time::Date) -> NewSubscription {
    NewSubscription {
        customer_id: customer.into(),
        product_id: product.into(),
        patient_id: Some("101".into()),
        amount_cents: 4_900,
        currency: "USD".into(),
        frequency: Frequency::Monthly,
        first_billing_date: first,
    }
}

#[tokio::test]
async fn test_subscription_created_once() {
    let store = InMemoryBillingStore::new();

    let first = store
        .create_if_absent(monthly("cus_1", "prod_1", date!(2025-03-01)))
        .await
        .unwrap();
    let second = store
        .create_if_absent(monthly("cus_1", "prod_1", date!(2025-04-01)))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.subscription.id, second.subscription.id);
    assert_eq!(second.subscription.next_billing_date, date!(2025-03-01));
}

#[tokio::test]
async fn test_due_selection_order() {
    let store = InMemoryBillingStore::new();
    let late = store
        .create_if_absent(monthly("cus_1", "prod_1", date!(2025-03-05)))
        .await
        .unwrap()
        .subscription;
    let early = store
        .create_if_absent(monthly("cus_2", "prod_1", date!(2025-03-01)))
        .await
        .unwrap()
        .subscription;
    store
        .create_if_absent(monthly("cus_3", "prod_1", date!(2025-03-20)))
        .await
        .unwrap();
    let cancelled = store
        .create_if_absent(monthly("cus_4", "prod_1", date!(2025-02-01)))
        .await
        .unwrap()
        .subscription;
    let cancelled = store.cancel(&cancelled.id).await.unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);

    let due = store.list_due(date!(2025-03-10), 10).await.unwrap();
    let ids: Vec<_> = due.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);

    let billed = store
        .record_billing(&early.id, date!(2025-03-10), date!(2025-04-01))
        .await
        .unwrap();
    assert_eq!(billed.last_billing_date, Some(date!(2025-03-10)));
    assert_eq!(billed.next_billing_date, date!(2025-04-01));

    let due = store.list_due(date!(2025-03-10), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, late.id);
}

#[tokio::test]
async fn test_record_billing_unknown_subscription() {
    let store = InMemoryBillingStore::new();
    let err = store
        .record_billing("sub_missing", date!(2025-03-10), date!(2025-04-10))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
