//! HTTP protocol client.
//!
//! [`ProtocolClient`] walks the action candidates for an operation over SOAP
//! 1.1 first and SOAP 1.2 second, stopping at the first response that is not
//! a binding mismatch. Timeouts and transport failures stop negotiation
//! immediately; trying further candidates against an unreachable endpoint
//! only multiplies the wait.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::actions::{ActionConfig, action_candidates};
use crate::error::{SoapError, SoapResult};
use crate::fault::{TransportOutcome, classify_response, fault_message, is_gateway_failure};

pub const SOAP11_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

const DEFAULT_TIMEOUT_MS: u64 = 20_000;
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    pub fn envelope_namespace(self) -> &'static str {
        match self {
            Self::Soap11 => SOAP11_ENVELOPE_NS,
            Self::Soap12 => SOAP12_ENVELOPE_NS,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Soap11 => "1.1",
            Self::Soap12 => "1.2",
        }
    }
}

/// Sends a built envelope and classifies the answer.
///
/// Implemented by [`ProtocolClient`] for HTTP and by scripted transports in
/// tests.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn call(&self, operation: &str, envelope: &str) -> SoapResult<TransportOutcome>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    #[serde(flatten)]
    pub actions: ActionConfig,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retry all candidates over SOAP 1.2 after SOAP 1.1 is exhausted.
    pub soap12_fallback: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            actions: ActionConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            soap12_fallback: true,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct ProtocolClient {
    http_client: Client,
    config: ClientConfig,
}

impl ProtocolClient {
    pub fn new(config: ClientConfig) -> SoapResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(SoapError::InvalidConfig("endpoint is empty".into()));
        }
        if config.timeout_ms == 0 {
            return Err(SoapError::InvalidConfig("timeout_ms must be > 0".into()));
        }

        let http_client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout().min(MAX_CONNECT_TIMEOUT))
            .build()
            .map_err(|e| SoapError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn versions(&self) -> &'static [SoapVersion] {
        if self.config.soap12_fallback {
            &[SoapVersion::Soap11, SoapVersion::Soap12]
        } else {
            &[SoapVersion::Soap11]
        }
    }

    async fn attempt(
        &self,
        operation: &str,
        version: SoapVersion,
        action: &str,
        envelope: &str,
    ) -> SoapResult<(u16, String)> {
        let request = self.http_client.post(&self.config.endpoint);
        let request = match version {
            SoapVersion::Soap11 => request
                .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                .header("SOAPAction", format!("\"{action}\"")),
            SoapVersion::Soap12 => request.header(
                CONTENT_TYPE,
                format!("application/soap+xml; charset=utf-8; action=\"{action}\""),
            ),
        };

        let response = request
            .body(envelope.to_string())
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(operation, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(operation, e))?;
        Ok((status, body))
    }

    fn map_reqwest_error(&self, operation: &str, err: reqwest::Error) -> SoapError {
        if err.is_timeout() {
            SoapError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            SoapError::transport(operation, err.to_string())
        }
    }
}

#[async_trait]
impl SoapTransport for ProtocolClient {
    async fn call(&self, operation: &str, envelope: &str) -> SoapResult<TransportOutcome> {
        let candidates = action_candidates(operation, &self.config.actions);
        let mut attempts = 0usize;
        let mut last_fault: Option<String> = None;

        for &version in self.versions() {
            let envelope: Cow<'_, str> = match version {
                SoapVersion::Soap11 => Cow::Borrowed(envelope),
                SoapVersion::Soap12 => {
                    Cow::Owned(envelope.replace(SOAP11_ENVELOPE_NS, SOAP12_ENVELOPE_NS))
                }
            };

            for action in &candidates {
                attempts += 1;
                let started = Instant::now();
                let result = self.attempt(operation, version, action, &envelope).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                let (status, body) = match result {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::warn!(
                            operation,
                            action = %action,
                            soap_version = version.label(),
                            elapsed_ms,
                            error = %err,
                            "SOAP call failed"
                        );
                        return Err(err);
                    }
                };

                if is_gateway_failure(status) && fault_message(&body).is_none() {
                    tracing::warn!(operation, status, elapsed_ms, "SOAP endpoint unavailable");
                    return Err(SoapError::transport(
                        operation,
                        format!("endpoint returned HTTP {status}"),
                    ));
                }

                match classify_response(status, &body) {
                    TransportOutcome::ContractMismatch(raw) => {
                        tracing::debug!(
                            operation,
                            action = %action,
                            soap_version = version.label(),
                            status,
                            "Action rejected, trying next candidate"
                        );
                        last_fault = fault_message(&raw).or(Some(format!("HTTP {status}")));
                    }
                    outcome @ TransportOutcome::Success(_) => {
                        tracing::info!(
                            operation,
                            action = %action,
                            soap_version = version.label(),
                            attempts,
                            elapsed_ms,
                            "SOAP call succeeded"
                        );
                        return Ok(outcome);
                    }
                    outcome @ TransportOutcome::BusinessFault { .. } => {
                        tracing::info!(
                            operation,
                            action = %action,
                            soap_version = version.label(),
                            status,
                            "SOAP call returned a fault"
                        );
                        return Ok(outcome);
                    }
                }
            }
        }

        tracing::warn!(operation, attempts, "No action candidate accepted");
        Err(SoapError::ContractMismatch {
            operation: operation.to_string(),
            attempts,
            last_fault: last_fault.unwrap_or_else(|| "no action candidates configured".to_string()),
        })
    }
}
