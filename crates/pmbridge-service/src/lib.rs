//! # pmbridge-service
//!
//! Practice-management domain operations and payment reconciliation on top
//! of the SOAP protocol client and the billing stores.
//!
//! - [`domain`]: patient, appointment, document and billing operations
//! - [`reconcile`]: webhook reconciliation, retries and subscription billing
//! - [`cache`]: cache invalidation collaborator
//! - [`config`]: layered configuration (file + `PMBRIDGE__*` env)
//! - [`observability`]: tracing setup

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod observability;
pub mod reconcile;
pub mod requests;

pub use cache::{CacheError, CacheInvalidator, LocalCache, NoopCache, patient_prefix};
pub use domain::{BookingOutcome, DomainService};
pub use reconcile::{
    BillingGateway, BillingReconciler, OfflineGateway, PassSummary, PaymentDetails,
    ReconcilerOptions, SUPPORTED_EVENT_KINDS, WebhookAck, WebhookEvent,
};
pub use requests::{
    AppointmentSearch, AppointmentUpdate, NewAppointment, NewCharge, NewDocument, NewPayment,
    PatientDetails, PatientSearch,
};
