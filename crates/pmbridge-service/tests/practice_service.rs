//! Domain service and reconciler over the HTTP protocol client.

use std::sync::Arc;

use pmbridge_billing::{BillingSyncStorage, InMemoryBillingStore, ProcessedEvents, SyncStatus};
use pmbridge_service::config::AppConfig;
use pmbridge_service::{
    BillingReconciler, DomainService, NoopCache, PatientSearch, ReconcilerOptions, WebhookAck,
    WebhookEvent,
};
use pmbridge_soap::{AuthHeader, ProtocolClient};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MISMATCH: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode xmlns:a="http://schemas.microsoft.com/ws/2005/05/addressing/none">a:ActionNotSupported</faultcode><faultstring xml:lang="en-US">The message with Action 'urn:a/CreateCharge' cannot be processed at the receiver, due to a ContractFilter mismatch at the EndpointDispatcher.</faultstring></s:Fault></s:Body></s:Envelope>"#;

const PATIENTS: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><GetPatientsResponse xmlns="http://www.kareo.com/api/schemas/"><GetPatientsResult xmlns:a="http://www.kareo.com/api/schemas/"><a:ErrorResponse><a:IsError>false</a:IsError></a:ErrorResponse><a:Patients><a:PatientData><a:ID>101</a:ID><a:FirstName>Ada</a:FirstName><a:LastName>Lovelace</a:LastName><a:EmailAddress>ada@example.com</a:EmailAddress></a:PatientData></a:Patients><a:TotalCount>1</a:TotalCount></GetPatientsResult></GetPatientsResponse></s:Body></s:Envelope>"#;

fn app_config(server: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.practice.endpoint = format!("{}/soap", server.uri());
    cfg.practice.customer_key = "ck".into();
    cfg.practice.user = "user".into();
    cfg.practice.password = "pw".into();
    cfg.practice.action_base = Some("urn:a/".into());
    cfg.practice.historical_fallbacks = false;
    cfg.practice.timeout_ms = 2_000;
    cfg
}

fn service(server: &MockServer) -> Arc<DomainService<ProtocolClient, NoopCache>> {
    let cfg = app_config(server);
    let client = ProtocolClient::new(cfg.practice.client_config()).unwrap();
    Arc::new(DomainService::new(
        Arc::new(client),
        Arc::new(NoopCache),
        AuthHeader::new("ck", "user", "pw"),
    ))
}

#[tokio::test]
async fn test_search_patients_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/soap"))
        .and(body_string_contains("<sch:EmailAddress>ada@example.com</sch:EmailAddress>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PATIENTS))
        .expect(1)
        .mount(&server)
        .await;

    let result = service(&server)
        .search_patients(&PatientSearch::by_email("ada@example.com"))
        .await
        .unwrap();

    assert_eq!(result.total_count, 1);
    assert_eq!(result.items[0].id.as_deref(), Some("101"));
    assert_eq!(result.items[0].last_name.as_deref(), Some("Lovelace"));
}

#[tokio::test]
async fn test_unsupported_charge_leaves_payment_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/soap"))
        .and(body_string_contains("GetPatients"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PATIENTS))
        .mount(&server)
        .await;
    // Every action candidate and both SOAP versions are rejected.
    Mock::given(method("POST"))
        .and(path("/soap"))
        .and(body_string_contains("CreateCharge"))
        .respond_with(ResponseTemplate::new(500).set_body_string(MISMATCH))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/soap"))
        .and(body_string_contains("CreatePayment"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<ok/>"))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryBillingStore::new());
    let reconciler = BillingReconciler::new(
        service(&server),
        store.clone(),
        store.clone(),
        ProcessedEvents::new(),
        ReconcilerOptions::default(),
    );

    let ack = reconciler
        .handle(WebhookEvent {
            kind: "payment_intent.succeeded".into(),
            event_id: "evt_1".into(),
            payload: json!({"data": {"object": {
                "id": "pi_1",
                "amount_received": 12500,
                "currency": "usd",
                "receipt_email": "ada@example.com"
            }}}),
        })
        .await
        .unwrap();

    assert_eq!(
        ack,
        WebhookAck::Recorded {
            event_id: "evt_1".into(),
            status: SyncStatus::Stored
        }
    );
    let row = store.get_by_event_id("evt_1").await.unwrap().unwrap();
    assert_eq!(row.patient_id.as_deref(), Some("101"));
    assert!(row.error_message.unwrap().contains("CreateCharge"));
}
