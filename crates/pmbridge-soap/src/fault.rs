//! Response classification.
//!
//! A response is either a success, a binding mismatch (the action or
//! message version was not accepted and another candidate should be tried)
//! or a business fault that ends negotiation.

use pmbridge_core::{extract_blocks, parse_fields};

/// Substrings, matched case-insensitively, that identify a binding mismatch.
pub const CONTRACT_MISMATCH_MARKERS: &[&str] = &[
    "contractfilter mismatch",
    "actionnotsupported",
    "action not supported",
    "cannot be processed at the receiver",
    "did not recognize the value of http header soapaction",
    "does not match the http soap action",
    "no operation matched",
    "unrecognized message version",
    "was not the expected type",
    "versionmismatch",
];

const FAULT_MESSAGE_FIELDS: &[&str] = &["faultstring", "Reason.Text", "Text", "Message"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    Success(String),
    ContractMismatch(String),
    BusinessFault { message: String, raw_xml: String },
}

pub fn is_contract_mismatch(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    CONTRACT_MISMATCH_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

pub fn has_fault(body: &str) -> bool {
    matches!(extract_blocks(body, "Fault"), Ok(blocks) if !blocks.is_empty())
}

/// Reads the human-readable message of a SOAP 1.1 or 1.2 fault.
pub fn fault_message(body: &str) -> Option<String> {
    let fault = extract_blocks(body, "Fault").ok()?.into_iter().next()?;
    parse_fields(&fault).ok()?.first_string(FAULT_MESSAGE_FIELDS)
}

/// Gateway errors carry no answer from the service itself.
pub(crate) fn is_gateway_failure(status: u16) -> bool {
    matches!(status, 502..=504)
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

pub fn classify_response(status: u16, body: &str) -> TransportOutcome {
    if has_fault(body) {
        if is_contract_mismatch(body) {
            return TransportOutcome::ContractMismatch(body.to_string());
        }
        return TransportOutcome::BusinessFault {
            message: fault_message(body).unwrap_or_else(|| "unspecified SOAP fault".to_string()),
            raw_xml: body.to_string(),
        };
    }

    if (200..300).contains(&status) {
        return TransportOutcome::Success(body.to_string());
    }

    if matches!(status, 404 | 405 | 415) || is_contract_mismatch(body) {
        return TransportOutcome::ContractMismatch(body.to_string());
    }

    TransportOutcome::BusinessFault {
        message: format!("HTTP {status}: {}", snippet(body)),
        raw_xml: body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISMATCH_11: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode xmlns:a="http://schemas.microsoft.com/ws/2005/05/addressing/none">a:ActionNotSupported</faultcode><faultstring xml:lang="en-US">The message with Action 'urn:x/GetPatients' cannot be processed at the receiver, due to a ContractFilter mismatch at the EndpointDispatcher.</faultstring></s:Fault></s:Body></s:Envelope>"#;

    const BUSINESS_11: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Client</faultcode><faultstring>Patient 99 does not exist</faultstring></s:Fault></s:Body></s:Envelope>"#;

    const BUSINESS_12: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><s:Fault><s:Code><s:Value>s:Receiver</s:Value></s:Code><s:Reason><s:Text xml:lang="en">Invalid customer key</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#;

    #[test]
    fn test_mismatch_fault() {
        assert_eq!(
            classify_response(500, MISMATCH_11),
            TransportOutcome::ContractMismatch(MISMATCH_11.to_string())
        );
        assert!(fault_message(MISMATCH_11).unwrap().contains("ContractFilter"));
    }

    #[test]
    fn test_business_fault() {
        match classify_response(500, BUSINESS_11) {
            TransportOutcome::BusinessFault { message, .. } => {
                assert_eq!(message, "Patient 99 does not exist");
            }
            other => panic!("unexpected {other:?}"),
        }
        match classify_response(500, BUSINESS_12) {
            TransportOutcome::BusinessFault { message, .. } => {
                assert_eq!(message, "Invalid customer key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fault_wins_over_status() {
        assert!(matches!(
            classify_response(200, BUSINESS_11),
            TransportOutcome::BusinessFault { .. }
        ));
    }

    #[test]
    fn test_success() {
        let body = "<s:Envelope><s:Body><GetPatientsResponse/></s:Body></s:Envelope>";
        assert_eq!(
            classify_response(200, body),
            TransportOutcome::Success(body.to_string())
        );
    }

    #[test]
    fn test_status_without_fault() {
        assert!(matches!(
            classify_response(404, "Not Found"),
            TransportOutcome::ContractMismatch(_)
        ));
        assert!(matches!(
            classify_response(415, ""),
            TransportOutcome::ContractMismatch(_)
        ));
        assert!(matches!(
            classify_response(400, "Unrecognized message version."),
            TransportOutcome::ContractMismatch(_)
        ));
        match classify_response(400, "Bad Request") {
            TransportOutcome::BusinessFault { message, .. } => {
                assert_eq!(message, "HTTP 400: Bad Request");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_markers_case_insensitive() {
        assert!(is_contract_mismatch("CONTRACTFILTER MISMATCH at the EndpointDispatcher"));
        assert!(!is_contract_mismatch("Patient not found"));
    }
}
