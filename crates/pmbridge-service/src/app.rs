//! Wiring from [`AppConfig`] to a running reconciler.

use std::sync::Arc;

use anyhow::Context;
use pmbridge_billing::{BillingSyncStorage, InMemoryBillingStore, ProcessedEvents, SubscriptionStorage};
use pmbridge_db_postgres::{PostgresBillingStore, create_pool};
use pmbridge_soap::{EnvelopeBuilder, ProtocolClient};
use tracing::info;

use crate::cache::LocalCache;
use crate::config::{AppConfig, StorageBackend};
use crate::domain::DomainService;
use crate::reconcile::{BillingGateway, BillingReconciler, OfflineGateway, ReconcilerOptions};

/// Domain service over the HTTP protocol client.
pub type PracticeService = DomainService<ProtocolClient, LocalCache>;

pub fn build_domain_service(cfg: &AppConfig) -> anyhow::Result<PracticeService> {
    let client = ProtocolClient::new(cfg.practice.client_config())
        .context("failed to build practice-service client")?;
    Ok(DomainService::new(
        Arc::new(client),
        Arc::new(LocalCache::new()),
        cfg.practice.auth_header(),
    )
    .with_envelope_builder(EnvelopeBuilder::new(cfg.practice.namespace.clone()))
    .with_max_shifts(cfg.scheduling.max_shifts))
}

/// Fails for commands that only act on rows written by earlier runs when
/// those rows would live in process memory.
pub fn require_persistent_storage(cfg: &AppConfig, command: &str) -> anyhow::Result<()> {
    if cfg.storage.is_persistent() {
        return Ok(());
    }
    anyhow::bail!(
        "`{command}` works on billing rows from earlier runs, but storage.backend is memory; \
         set storage.backend = \"postgres\""
    )
}

pub async fn build_reconciler(cfg: &AppConfig) -> anyhow::Result<BillingReconciler> {
    let gateway: Arc<dyn BillingGateway> = if cfg.practice.endpoint.trim().is_empty() {
        info!("No practice endpoint configured, running offline");
        Arc::new(OfflineGateway)
    } else {
        Arc::new(build_domain_service(cfg)?)
    };

    let (store, subscriptions): (Arc<dyn BillingSyncStorage>, Arc<dyn SubscriptionStorage>) =
        match cfg.storage.backend {
            StorageBackend::Memory => {
                let store = Arc::new(InMemoryBillingStore::new());
                (store.clone(), store)
            }
            StorageBackend::Postgres => {
                let pool = create_pool(&cfg.storage.postgres)
                    .await
                    .context("failed to connect to billing database")?;
                let store = Arc::new(PostgresBillingStore::new(pool));
                (store.clone(), store)
            }
        };
    info!(backend = ?cfg.storage.backend, mock_remote = cfg.billing.mock_remote, "Billing storage ready");

    Ok(BillingReconciler::new(
        gateway,
        store,
        subscriptions,
        ProcessedEvents::with_config(cfg.billing.processed_capacity, cfg.billing.processed_ttl_secs),
        ReconcilerOptions {
            mock_remote: cfg.billing.mock_remote,
            default_currency: cfg.billing.default_currency.clone(),
            batch_size: cfg.billing.retry_batch_size,
            claim_timeout: time::Duration::seconds(
                i64::try_from(cfg.billing.claim_timeout_secs).unwrap_or(i64::MAX),
            ),
        },
    ))
}
