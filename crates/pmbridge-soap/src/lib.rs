//! # pmbridge-soap
//!
//! Client for the practice-management service's SOAP endpoint.
//!
//! The service publishes no reliable contract: the binding action that
//! works differs between environments, payloads are rejected when child
//! elements are out of schema order, and business errors come back either as
//! SOAP faults or as flags inside successful responses.
//!
//! - [`schema`]: per-operation field order table
//! - [`envelope`]: request envelope construction
//! - [`actions`]: action candidate negotiation order
//! - [`fault`]: response classification
//! - [`client`]: the HTTP protocol client and the [`SoapTransport`] seam
//!
//! ## Example
//!
//! ```ignore
//! use pmbridge_soap::{AuthHeader, ClientConfig, EnvelopeBuilder, OperationRequest, ProtocolClient, SoapTransport};
//!
//! let builder = EnvelopeBuilder::new(&config.actions.namespace);
//! let request = OperationRequest::new("GetPatients").with_filter("LastName", "Lovelace");
//! let envelope = builder.build(&request, &auth)?;
//! let outcome = client.call("GetPatients", &envelope).await?;
//! ```

pub mod actions;
mod auth;
pub mod client;
pub mod envelope;
mod error;
pub mod fault;
pub mod schema;

pub use actions::{ActionConfig, DEFAULT_NAMESPACE, HISTORICAL_ACTION_TEMPLATES, action_candidates};
pub use auth::AuthHeader;
pub use client::{
    ClientConfig, ProtocolClient, SOAP11_ENVELOPE_NS, SOAP12_ENVELOPE_NS, SoapTransport,
    SoapVersion,
};
pub use envelope::{EnvelopeBuilder, FieldValue, OperationRequest, escape_text};
pub use error::{SoapError, SoapResult};
pub use fault::{CONTRACT_MISMATCH_MARKERS, TransportOutcome, classify_response};
pub use schema::{FieldSpec, OperationSchema, schema_for};
