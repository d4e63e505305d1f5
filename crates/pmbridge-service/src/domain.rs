//! Domain operations against the practice-management service.
//!
//! Every operation validates its required inputs before building an
//! envelope, so a rejected input never reaches the wire. Responses are
//! normalized into canonical records; business faults and `IsError` flags
//! surface as [`DomainError::BusinessFault`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, instrument, warn};

use pmbridge_core::aliases::created;
use pmbridge_core::{
    Booking, CanonicalAppointment, CanonicalAppointmentReason, CanonicalDocument,
    CanonicalPatient, CanonicalPractice, CanonicalProvider, DEFAULT_MAX_SHIFTS, DomainError,
    ListResult, Result, TimeSlot, check_business_error, extract_created_id,
    format_remote_datetime, normalize_list, normalize_one, parse_remote_datetime, resolve,
};
use pmbridge_soap::fault::fault_message;
use pmbridge_soap::{
    AuthHeader, EnvelopeBuilder, FieldValue, OperationRequest, SoapTransport, TransportOutcome,
};

use crate::cache::{CacheInvalidator, NoopCache, patient_prefix};
use crate::requests::{
    AppointmentSearch, AppointmentUpdate, NewAppointment, NewCharge, NewDocument, NewPayment,
    PatientDetails, PatientSearch, format_amount, require,
};

/// Appointment statuses that no longer hold their slot.
const RELEASED_STATUSES: &[&str] = &["cancelled", "canceled", "noshow", "no-show", "rescheduled"];

/// Result of [`DomainService::book_appointment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingOutcome {
    pub appointment_id: String,
    pub slot: TimeSlot,
    pub shifted: bool,
    pub shifts: u32,
}

pub struct DomainService<T, C = NoopCache> {
    transport: Arc<T>,
    cache: Arc<C>,
    builder: EnvelopeBuilder,
    auth: AuthHeader,
    max_shifts: u32,
}

impl<T, C> DomainService<T, C>
where
    T: SoapTransport,
    C: CacheInvalidator,
{
    pub fn new(transport: Arc<T>, cache: Arc<C>, auth: AuthHeader) -> Self {
        Self {
            transport,
            cache,
            builder: EnvelopeBuilder::default(),
            auth,
            max_shifts: DEFAULT_MAX_SHIFTS,
        }
    }

    #[must_use]
    pub fn with_envelope_builder(mut self, builder: EnvelopeBuilder) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub fn with_max_shifts(mut self, max_shifts: u32) -> Self {
        self.max_shifts = max_shifts;
        self
    }

    // ---------------------------------------------------------------------
    // Patients
    // ---------------------------------------------------------------------

    #[instrument(skip(self, details))]
    pub async fn create_patient(&self, details: &PatientDetails) -> Result<String> {
        details.validate_for_create()?;
        let request = OperationRequest::new("CreatePatient")
            .with_field("Patient", self.patient_group(details, None));
        let raw = self.invoke(&request).await?;
        let id = created_id(&request.operation, &raw, created::PATIENT_ID)?;
        info!(patient_id = %id, "Patient created");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn get_patient(&self, patient_id: &str) -> Result<CanonicalPatient> {
        let patient_id = require("patient_id", patient_id)?;
        let request = OperationRequest::new("GetPatient").with_filter("PatientID", patient_id);
        let raw = self.invoke(&request).await?;
        normalize_one(&request.operation, &raw)?
            .ok_or_else(|| DomainError::not_found("Patient", patient_id))
    }

    #[instrument(skip(self, details))]
    pub async fn update_patient(&self, patient_id: &str, details: &PatientDetails) -> Result<String> {
        let patient_id = require("patient_id", patient_id)?;
        let request = OperationRequest::new("UpdatePatient")
            .with_field("Patient", self.patient_group(details, Some(patient_id)));
        let raw = self.invoke(&request).await?;
        let id = extract_created_id(&request.operation, &raw, created::PATIENT_ID)?
            .unwrap_or_else(|| patient_id.to_string());
        self.invalidate_patient(&id).await;
        Ok(id)
    }

    #[instrument(skip(self, search))]
    pub async fn search_patients(&self, search: &PatientSearch) -> Result<ListResult<CanonicalPatient>> {
        let request = OperationRequest::new("GetPatients")
            .with_optional_filter("PatientID", search.patient_id.as_deref())
            .with_optional_filter("FirstName", search.first_name.as_deref())
            .with_optional_filter("LastName", search.last_name.as_deref())
            .with_optional_filter("FullName", search.full_name.as_deref())
            .with_optional_filter("EmailAddress", search.email.as_deref())
            .with_optional_filter("PracticeID", self.practice_id(search.practice_id.as_deref()));
        let raw = self.invoke(&request).await?;
        let result = normalize_list(&request.operation, &raw)?;
        debug!(count = result.items.len(), total = result.total_count, "Patients found");
        Ok(result)
    }

    /// Id of the patient registered under `email`, preferring an exact
    /// (case-insensitive) email match among the results.
    pub async fn find_patient_id_by_email(&self, email: &str) -> Result<Option<String>> {
        let email = require("email", email)?;
        let found = self.search_patients(&PatientSearch::by_email(email)).await?;
        let exact = found.items.iter().find(|p| {
            p.email
                .as_deref()
                .is_some_and(|e| e.trim().eq_ignore_ascii_case(email))
        });
        Ok(exact
            .or_else(|| found.items.first())
            .and_then(|p| p.id.clone()))
    }

    fn patient_group(&self, details: &PatientDetails, patient_id: Option<&str>) -> FieldValue {
        let mut children: HashMap<String, FieldValue> = details
            .remote_fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), FieldValue::Text(value)))
            .collect();
        if let Some(id) = patient_id {
            children.insert("PatientID".into(), id.into());
        }
        if let Some(practice) = self.practice_id(details.practice_id.as_deref()) {
            children.insert("Practice".into(), FieldValue::group([("PracticeID", practice)]));
        }
        FieldValue::Group(children)
    }

    // ---------------------------------------------------------------------
    // Appointments
    // ---------------------------------------------------------------------

    #[instrument(skip(self, appointment), fields(patient_id = %appointment.patient_id))]
    pub async fn create_appointment(&self, appointment: &NewAppointment) -> Result<String> {
        let slot = validate_appointment(appointment)?;
        self.create_appointment_in(appointment, slot).await
    }

    #[instrument(skip(self))]
    pub async fn get_appointment(&self, appointment_id: &str) -> Result<CanonicalAppointment> {
        let appointment_id = require("appointment_id", appointment_id)?;
        let request = OperationRequest::new("GetAppointment").with_field(
            "Appointment",
            FieldValue::group([("AppointmentId", appointment_id)]),
        );
        let raw = self.invoke(&request).await?;
        normalize_one(&request.operation, &raw)?
            .ok_or_else(|| DomainError::not_found("Appointment", appointment_id))
    }

    #[instrument(skip(self, search))]
    pub async fn get_appointments(
        &self,
        search: &AppointmentSearch,
    ) -> Result<ListResult<CanonicalAppointment>> {
        let from = search.from.map(format_remote_datetime);
        let to = search.to.map(format_remote_datetime);
        let request = OperationRequest::new("GetAppointments")
            .with_optional_filter("PatientID", search.patient_id.as_deref())
            .with_optional_filter("ProviderID", search.provider_id.as_deref())
            .with_optional_filter("ResourceID", search.resource_id.as_deref())
            .with_optional_filter("AppointmentReasonID", search.reason_id.as_deref())
            .with_optional_filter("ConfirmationStatus", search.confirmation_status.as_deref())
            .with_optional_filter("PracticeID", self.practice_id(search.practice_id.as_deref()))
            .with_optional_filter("FromStartDate", from.as_deref())
            .with_optional_filter("ToStartDate", to.as_deref());
        let raw = self.invoke(&request).await?;
        normalize_list(&request.operation, &raw)
    }

    #[instrument(skip(self, update))]
    pub async fn update_appointment(
        &self,
        appointment_id: &str,
        update: &AppointmentUpdate,
    ) -> Result<String> {
        let appointment_id = require("appointment_id", appointment_id)?;
        if let (Some(start), Some(end)) = (update.start, update.end) {
            TimeSlot::new(start, end).map_err(|e| DomainError::validation(e.to_string()))?;
        }

        let mut children: Vec<(&str, FieldValue)> = vec![("AppointmentId", appointment_id.into())];
        let leaves = [
            ("AppointmentReasonId", update.reason_id.clone()),
            ("AppointmentStatus", update.status.clone()),
            ("Notes", update.notes.clone()),
            ("ProviderId", update.provider_id.clone()),
            ("ResourceId", update.resource_id.clone()),
            ("StartTime", update.start.map(format_remote_datetime)),
            ("EndTime", update.end.map(format_remote_datetime)),
        ];
        children.extend(
            leaves
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, FieldValue::Text(v)))),
        );
        if let Some(patient_id) = update.patient_id.as_deref() {
            children.push((
                "PatientSummary",
                FieldValue::group([("PatientId", patient_id)]),
            ));
        }

        let request = OperationRequest::new("UpdateAppointment")
            .with_field("Appointment", FieldValue::group(children));
        let raw = self.invoke(&request).await?;
        let id = extract_created_id(&request.operation, &raw, created::APPOINTMENT_ID)?
            .unwrap_or_else(|| appointment_id.to_string());
        if let Some(patient_id) = update.patient_id.as_deref() {
            self.invalidate_patient(patient_id).await;
        }
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn delete_appointment(
        &self,
        appointment_id: &str,
        patient_id: Option<&str>,
    ) -> Result<()> {
        let appointment_id = require("appointment_id", appointment_id)?;
        let request = OperationRequest::new("DeleteAppointment").with_field(
            "Appointment",
            FieldValue::group([("AppointmentId", appointment_id)]),
        );
        let raw = self.invoke(&request).await?;
        check_business_error(&request.operation, &raw)?;
        if let Some(patient_id) = patient_id {
            self.invalidate_patient(patient_id).await;
        }
        info!(appointment_id, "Appointment deleted");
        Ok(())
    }

    /// Books `appointment`, moving it to the first free slot when the
    /// requested one conflicts with the provider's or resource's calendar.
    ///
    /// The calendar is re-read for every booking; nothing is cached between
    /// calls.
    #[instrument(skip(self, appointment), fields(patient_id = %appointment.patient_id, provider_id = %appointment.provider_id))]
    pub async fn book_appointment(&self, appointment: &NewAppointment) -> Result<BookingOutcome> {
        let slot = validate_appointment(appointment)?;

        let (from, to) = snapshot_window(slot, self.max_shifts);
        let snapshot = self
            .get_appointments(&AppointmentSearch {
                practice_id: appointment.practice_id.clone(),
                from: Some(from),
                to: Some(to),
                ..Default::default()
            })
            .await?;
        let existing = bookings_from(&snapshot.items);

        let candidate = Booking {
            provider_id: Some(appointment.provider_id.trim().to_string()),
            resource_id: appointment.resource_id.clone(),
            slot,
        };
        let resolution = resolve(&candidate, &existing, self.max_shifts)?;
        if resolution.shifted {
            info!(
                shifts = resolution.shifts,
                start = %format_remote_datetime(resolution.slot.start),
                "Requested slot taken, booking shifted"
            );
        }

        let appointment_id = self.create_appointment_in(appointment, resolution.slot).await?;
        Ok(BookingOutcome {
            appointment_id,
            slot: resolution.slot,
            shifted: resolution.shifted,
            shifts: resolution.shifts,
        })
    }

    async fn create_appointment_in(&self, appointment: &NewAppointment, slot: TimeSlot) -> Result<String> {
        let patient_id = appointment.patient_id.trim();

        let summary = [
            ("PatientId", Some(patient_id.to_string())),
            ("FirstName", appointment.patient_first_name.clone()),
            ("LastName", appointment.patient_last_name.clone()),
            ("Email", appointment.patient_email.clone()),
        ];
        let leaves = [
            ("AppointmentName", appointment.name.clone()),
            ("AppointmentReasonId", appointment.reason_id.clone()),
            ("AppointmentStatus", appointment.status.clone()),
            ("AppointmentType", appointment.appointment_type.clone()),
            ("StartTime", Some(format_remote_datetime(slot.start))),
            ("EndTime", Some(format_remote_datetime(slot.end))),
            ("IsRecurring", Some("false".to_string())),
            ("Notes", appointment.notes.clone()),
            (
                "PracticeId",
                self.practice_id(appointment.practice_id.as_deref())
                    .map(str::to_string),
            ),
            ("ProviderId", Some(appointment.provider_id.trim().to_string())),
            ("ResourceId", appointment.resource_id.clone()),
            ("ServiceLocationId", appointment.service_location_id.clone()),
            ("WasCreatedOnline", Some(appointment.created_online.to_string())),
        ];

        let mut children: Vec<(&str, FieldValue)> = leaves
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, FieldValue::Text(v))))
            .collect();
        children.push((
            "PatientSummary",
            FieldValue::group(
                summary
                    .into_iter()
                    .filter_map(|(name, value)| value.map(|v| (name, v))),
            ),
        ));

        let request = OperationRequest::new("CreateAppointment")
            .with_field("Appointment", FieldValue::group(children));
        let raw = self.invoke(&request).await?;
        let id = created_id(&request.operation, &raw, created::APPOINTMENT_ID)?;
        self.invalidate_patient(patient_id).await;
        info!(appointment_id = %id, "Appointment created");
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Reference data
    // ---------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_providers(&self, practice_id: Option<&str>) -> Result<ListResult<CanonicalProvider>> {
        let request = OperationRequest::new("GetProviders")
            .with_optional_filter("PracticeID", self.practice_id(practice_id));
        let raw = self.invoke(&request).await?;
        normalize_list(&request.operation, &raw)
    }

    #[instrument(skip(self))]
    pub async fn list_practices(&self) -> Result<ListResult<CanonicalPractice>> {
        let request = OperationRequest::new("GetPractices");
        let raw = self.invoke(&request).await?;
        normalize_list(&request.operation, &raw)
    }

    #[instrument(skip(self))]
    pub async fn list_appointment_reasons(
        &self,
        practice_id: Option<&str>,
    ) -> Result<ListResult<CanonicalAppointmentReason>> {
        let practice_id = self
            .practice_id(practice_id)
            .ok_or_else(|| DomainError::validation("practice_id is required"))?;
        let request = OperationRequest::new("GetAppointmentReasons").with_field("PracticeId", practice_id);
        let raw = self.invoke(&request).await?;
        normalize_list(&request.operation, &raw)
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    #[instrument(skip(self, document), fields(patient_id = %document.patient_id, file_name = %document.file_name))]
    pub async fn store_document(&self, document: &NewDocument) -> Result<String> {
        let patient_id = require("patient_id", &document.patient_id)?;
        let file_name = require("file_name", &document.file_name)?;
        require("content", &document.content)?;

        let leaves = [
            ("PatientId", Some(patient_id.to_string())),
            ("FileName", Some(file_name.to_string())),
            ("FileContent", Some(document.content.clone())),
            (
                "Name",
                Some(document.name.clone().unwrap_or_else(|| file_name.to_string())),
            ),
            ("Label", document.label.clone()),
            ("Notes", document.notes.clone()),
            ("Status", document.status.clone()),
            (
                "DocumentDate",
                Some(document.document_date.clone().unwrap_or_else(today)),
            ),
            (
                "PracticeId",
                self.practice_id(document.practice_id.as_deref())
                    .map(str::to_string),
            ),
        ];
        let children = leaves
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)));

        let request = OperationRequest::new("CreateDocument")
            .with_field("Document", FieldValue::group(children));
        let raw = self.invoke(&request).await?;
        let id = created_id(&request.operation, &raw, created::DOCUMENT_ID)?;
        self.invalidate_patient(patient_id).await;
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn fetch_documents(&self, patient_id: &str) -> Result<ListResult<CanonicalDocument>> {
        let patient_id = require("patient_id", patient_id)?;
        let request = OperationRequest::new("GetDocuments").with_filter("PatientID", patient_id);
        let raw = self.invoke(&request).await?;
        normalize_list(&request.operation, &raw)
    }

    #[instrument(skip(self))]
    pub async fn delete_document(&self, document_id: &str, patient_id: &str) -> Result<()> {
        let document_id = require("document_id", document_id)?;
        let patient_id = require("patient_id", patient_id)?;
        let request = OperationRequest::new("DeleteDocument")
            .with_field("Document", FieldValue::group([("DocumentId", document_id)]));
        let raw = self.invoke(&request).await?;
        check_business_error(&request.operation, &raw)?;
        self.invalidate_patient(patient_id).await;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Charges and payments
    // ---------------------------------------------------------------------

    #[instrument(skip(self, charge), fields(patient_id = %charge.patient_id, amount_cents = charge.amount_cents))]
    pub async fn create_charge(&self, charge: &NewCharge) -> Result<String> {
        let patient_id = require("patient_id", &charge.patient_id)?;
        validate_money(charge.amount_cents, &charge.currency)?;

        let leaves = [
            ("PatientId", Some(patient_id.to_string())),
            ("Amount", Some(format_amount(charge.amount_cents))),
            ("Currency", Some(charge.currency.to_uppercase())),
            ("ChargeDate", Some(today())),
            ("Description", charge.description.clone()),
            ("ProcedureCode", charge.procedure_code.clone()),
            ("ReferenceNumber", charge.reference.clone()),
            (
                "PracticeId",
                self.practice_id(charge.practice_id.as_deref())
                    .map(str::to_string),
            ),
        ];
        let request = OperationRequest::new("CreateCharge").with_field(
            "Charge",
            FieldValue::group(leaves.into_iter().filter_map(|(n, v)| v.map(|v| (n, v)))),
        );
        let raw = self.invoke(&request).await?;
        created_id(&request.operation, &raw, created::CHARGE_ID)
    }

    #[instrument(skip(self, payment), fields(patient_id = %payment.patient_id, amount_cents = payment.amount_cents))]
    pub async fn create_payment(&self, payment: &NewPayment) -> Result<String> {
        let patient_id = require("patient_id", &payment.patient_id)?;
        validate_money(payment.amount_cents, &payment.currency)?;

        let leaves = [
            ("PatientId", Some(patient_id.to_string())),
            ("Amount", Some(format_amount(payment.amount_cents))),
            ("Currency", Some(payment.currency.to_uppercase())),
            ("PaymentDate", Some(today())),
            ("ChargeId", payment.charge_id.clone()),
            ("PaymentMethod", payment.method.clone()),
            ("ReferenceNumber", payment.reference.clone()),
            (
                "PracticeId",
                self.practice_id(payment.practice_id.as_deref())
                    .map(str::to_string),
            ),
        ];
        let request = OperationRequest::new("CreatePayment").with_field(
            "Payment",
            FieldValue::group(leaves.into_iter().filter_map(|(n, v)| v.map(|v| (n, v)))),
        );
        let raw = self.invoke(&request).await?;
        created_id(&request.operation, &raw, created::PAYMENT_ID)
    }

    // ---------------------------------------------------------------------
    // Plumbing
    // ---------------------------------------------------------------------

    async fn invoke(&self, request: &OperationRequest) -> Result<String> {
        let envelope = self.builder.build(request, &self.auth)?;
        match self.transport.call(&request.operation, &envelope).await? {
            TransportOutcome::Success(raw) => Ok(raw),
            TransportOutcome::BusinessFault { message, .. } => {
                Err(DomainError::business_fault(&request.operation, message))
            }
            TransportOutcome::ContractMismatch(body) => Err(DomainError::unsupported(
                &request.operation,
                fault_message(&body).unwrap_or_else(|| "contract mismatch".to_string()),
            )),
        }
    }

    fn practice_id<'a>(&'a self, explicit: Option<&'a str>) -> Option<&'a str> {
        explicit
            .filter(|id| !id.trim().is_empty())
            .or(self.auth.practice_id.as_deref())
    }

    async fn invalidate_patient(&self, patient_id: &str) {
        let prefix = patient_prefix(patient_id);
        if let Err(e) = self.cache.invalidate_prefix(&prefix).await {
            warn!(error = %e, prefix = %prefix, "Cache invalidation failed");
        }
    }
}

fn created_id(operation: &str, raw: &str, aliases: &[&str]) -> Result<String> {
    extract_created_id(operation, raw, aliases)?
        .ok_or_else(|| DomainError::parse(format!("{operation} response carried no id")))
}

fn validate_appointment(appointment: &NewAppointment) -> Result<TimeSlot> {
    require("patient_id", &appointment.patient_id)?;
    require("provider_id", &appointment.provider_id)?;
    TimeSlot::new(appointment.start, appointment.end).map_err(|e| DomainError::validation(e.to_string()))
}

fn validate_money(amount_cents: i64, currency: &str) -> Result<()> {
    if amount_cents <= 0 {
        return Err(DomainError::validation("amount must be positive"));
    }
    let currency = require("currency", currency)?;
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::validation(format!("invalid currency {currency}")));
    }
    Ok(())
}

fn today() -> String {
    OffsetDateTime::now_utc().date().to_string()
}

/// Start-date window covering the day of `slot` and every slot the resolver
/// could shift it into.
fn snapshot_window(slot: TimeSlot, max_shifts: u32) -> (PrimitiveDateTime, PrimitiveDateTime) {
    let from = slot.start.date().midnight();
    let reach = slot
        .duration()
        .saturating_mul(i32::try_from(max_shifts).unwrap_or(i32::MAX));
    let last_end = slot.end.checked_add(reach).unwrap_or(slot.end);
    let to = last_end
        .date()
        .next_day()
        .unwrap_or(last_end.date())
        .midnight();
    (from, to)
}

/// Converts a calendar snapshot into bookings, skipping appointments that
/// no longer hold their slot or whose times cannot be read.
fn bookings_from(appointments: &[CanonicalAppointment]) -> Vec<Booking> {
    appointments
        .iter()
        .filter(|a| {
            !a.status
                .as_deref()
                .map(|s| s.trim().to_ascii_lowercase())
                .is_some_and(|s| RELEASED_STATUSES.contains(&s.as_str()))
        })
        .filter_map(|a| {
            let (Some(start), Some(end)) = (a.start_time.as_deref(), a.end_time.as_deref()) else {
                return None;
            };
            let slot = match (parse_remote_datetime(start), parse_remote_datetime(end)) {
                (Ok(start), Ok(end)) => TimeSlot::new(start, end).ok()?,
                _ => {
                    warn!(appointment_id = ?a.id, start, end, "Skipping appointment with unreadable times");
                    return None;
                }
            };
            Some(Booking {
                provider_id: a.provider_id.clone(),
                resource_id: a.resource_id.clone(),
                slot,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use async_trait::async_trait;
    use pmbridge_soap::{SoapError, SoapResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use time::macros::datetime;

    /// Transport replaying canned outcomes and recording each call.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<SoapResult<TransportOutcome>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        fn with(replies: Vec<SoapResult<TransportOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SoapTransport for ScriptedTransport {
        async fn call(&self, operation: &str, envelope: &str) -> SoapResult<TransportOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((operation.to_string(), envelope.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SoapError::transport(operation, "no scripted reply")))
        }
    }

    fn ok(body: &str) -> SoapResult<TransportOutcome> {
        Ok(TransportOutcome::Success(body.to_string()))
    }

    fn auth() -> AuthHeader {
        AuthHeader::new("ck", "user", "secret").with_practice_id("7")
    }

    fn service(transport: Arc<ScriptedTransport>) -> DomainService<ScriptedTransport, LocalCache> {
        DomainService::new(transport, Arc::new(LocalCache::new()), auth())
    }

    fn wrap(op: &str, inner: &str) -> String {
        format!(
            "<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"><s:Body>\
             <{op}Response><{op}Result><ErrorResponse><IsError>false</IsError></ErrorResponse>\
             {inner}</{op}Result></{op}Response></s:Body></s:Envelope>"
        )
    }

    fn appointment(start: PrimitiveDateTime, end: PrimitiveDateTime) -> NewAppointment {
        NewAppointment {
            patient_id: "101".into(),
            provider_id: "9".into(),
            resource_id: None,
            practice_id: None,
            service_location_id: None,
            reason_id: Some("3".into()),
            start,
            end,
            name: None,
            appointment_type: None,
            status: None,
            notes: None,
            patient_first_name: Some("Ada".into()),
            patient_last_name: None,
            patient_email: None,
            created_online: true,
        }
    }

    #[tokio::test]
    async fn test_create_patient_requires_names_before_any_call() {
        let transport = ScriptedTransport::with(vec![]);
        let svc = service(transport.clone());

        let err = svc
            .create_patient(&PatientDetails {
                first_name: Some("Ada".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_patient_returns_id_and_sends_practice() {
        let transport = ScriptedTransport::with(vec![ok(&wrap(
            "CreatePatient",
            "<PatientID>555</PatientID>",
        ))]);
        let svc = service(transport.clone());

        let id = svc
            .create_patient(&PatientDetails {
                first_name: Some("Ada".into()),
                last_name: Some("Lovelace".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(id, "555");
        let calls = transport.calls();
        assert_eq!(calls[0].0, "CreatePatient");
        assert!(calls[0].1.contains("<sch:Practice><sch:PracticeID>7</sch:PracticeID></sch:Practice>"));
    }

    #[tokio::test]
    async fn test_get_patient_not_found() {
        let transport = ScriptedTransport::with(vec![ok(&wrap("GetPatient", ""))]);
        let err = service(transport).get_patient("42").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_business_fault_surfaces() {
        let transport = ScriptedTransport::with(vec![Ok(TransportOutcome::BusinessFault {
            message: "Patient is locked".into(),
            raw_xml: String::new(),
        })]);
        let err = service(transport).get_patient("42").await.unwrap_err();
        assert!(matches!(err, DomainError::BusinessFault { ref message, .. } if message == "Patient is locked"));
    }

    #[tokio::test]
    async fn test_is_error_flag_surfaces_as_business_fault() {
        let body = "<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"><s:Body>\
            <GetPatientsResponse><GetPatientsResult><ErrorResponse><IsError>true</IsError>\
            <ErrorMessage>Invalid customer key</ErrorMessage></ErrorResponse>\
            </GetPatientsResult></GetPatientsResponse></s:Body></s:Envelope>";
        let transport = ScriptedTransport::with(vec![ok(body)]);
        let err = service(transport)
            .search_patients(&PatientSearch::by_email("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::BusinessFault { .. }));
    }

    #[tokio::test]
    async fn test_contract_mismatch_maps_to_unsupported() {
        let transport = ScriptedTransport::with(vec![Err(SoapError::ContractMismatch {
            operation: "CreateCharge".into(),
            attempts: 8,
            last_fault: "ActionNotSupported".into(),
        })]);
        let err = service(transport)
            .create_charge(&NewCharge {
                patient_id: "101".into(),
                amount_cents: 100,
                currency: "usd".into(),
                description: None,
                procedure_code: None,
                reference: None,
                practice_id: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn test_find_patient_prefers_exact_email() {
        let transport = ScriptedTransport::with(vec![ok(&wrap(
            "GetPatients",
            "<Patients>\
               <PatientData><ID>1</ID><EmailAddress>other@example.com</EmailAddress></PatientData>\
               <PatientData><ID>2</ID><EmailAddress>ADA@example.com</EmailAddress></PatientData>\
             </Patients>",
        ))]);
        let id = service(transport)
            .find_patient_id_by_email("ada@example.com")
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_book_appointment_shifts_past_conflicts() {
        let snapshot = wrap(
            "GetAppointments",
            "<Appointments>\
               <AppointmentData><ID>1</ID><ProviderID>9</ProviderID>\
                 <StartDate>2025-03-10T09:00:00</StartDate><EndDate>2025-03-10T09:30:00</EndDate></AppointmentData>\
               <AppointmentData><ID>2</ID><ProviderID>9</ProviderID>\
                 <StartDate>2025-03-10T09:30:00</StartDate><EndDate>2025-03-10T10:00:00</EndDate></AppointmentData>\
               <AppointmentData><ID>3</ID><ProviderID>9</ProviderID><AppointmentStatus>Cancelled</AppointmentStatus>\
                 <StartDate>2025-03-10T10:00:00</StartDate><EndDate>2025-03-10T10:30:00</EndDate></AppointmentData>\
               <AppointmentData><ID>4</ID><ProviderID>8</ProviderID>\
                 <StartDate>2025-03-10T10:00:00</StartDate><EndDate>2025-03-10T10:30:00</EndDate></AppointmentData>\
             </Appointments>",
        );
        let transport = ScriptedTransport::with(vec![
            ok(&snapshot),
            ok(&wrap("CreateAppointment", "<AppointmentID>77</AppointmentID>")),
        ]);
        let cache = Arc::new(LocalCache::new());
        cache.set("patient:101:chart", b"stale".to_vec(), std::time::Duration::from_secs(60));
        let svc = DomainService::new(transport.clone(), cache.clone(), auth());

        let outcome = svc
            .book_appointment(&appointment(
                datetime!(2025-03-10 09:00),
                datetime!(2025-03-10 09:30),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.appointment_id, "77");
        assert!(outcome.shifted);
        assert_eq!(outcome.shifts, 2);
        assert_eq!(outcome.slot.start, datetime!(2025-03-10 10:00));

        let calls = transport.calls();
        assert_eq!(calls[0].0, "GetAppointments");
        assert!(calls[0].1.contains("<sch:FromStartDate>2025-03-10T00:00:00</sch:FromStartDate>"));
        assert_eq!(calls[1].0, "CreateAppointment");
        assert!(calls[1].1.contains("<sch:StartTime>2025-03-10T10:00:00</sch:StartTime>"));
        assert!(calls[1].1.contains("<sch:EndTime>2025-03-10T10:30:00</sch:EndTime>"));
        assert!(cache.get("patient:101:chart").is_none());
    }

    #[tokio::test]
    async fn test_book_appointment_gives_up_after_max_shifts() {
        let snapshot = wrap(
            "GetAppointments",
            "<Appointments>\
               <AppointmentData><ID>1</ID><ProviderID>9</ProviderID>\
                 <StartDate>2025-03-10T09:00:00</StartDate><EndDate>2025-03-10T12:00:00</EndDate></AppointmentData>\
             </Appointments>",
        );
        let transport = ScriptedTransport::with(vec![ok(&snapshot)]);
        let svc = service(transport.clone()).with_max_shifts(2);

        let err = svc
            .book_appointment(&appointment(
                datetime!(2025-03-10 09:00),
                datetime!(2025-03-10 09:30),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::Scheduling(_)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_inverted_slot_rejected_before_any_call() {
        let transport = ScriptedTransport::with(vec![]);
        let err = service(transport.clone())
            .create_appointment(&appointment(
                datetime!(2025-03-10 10:00),
                datetime!(2025-03-10 09:00),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reasons_require_practice() {
        let transport = ScriptedTransport::with(vec![]);
        let svc = DomainService::new(
            transport.clone(),
            Arc::new(NoopCache),
            AuthHeader::new("ck", "user", "secret"),
        );
        let err = svc.list_appointment_reasons(None).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_document_invalidates_chart() {
        let transport = ScriptedTransport::with(vec![ok(&wrap(
            "CreateDocument",
            "<DocumentID>900</DocumentID>",
        ))]);
        let cache = Arc::new(LocalCache::new());
        cache.set("patient:101:documents", b"old".to_vec(), std::time::Duration::from_secs(60));
        let svc = DomainService::new(transport.clone(), cache.clone(), auth());

        let id = svc
            .store_document(&NewDocument {
                patient_id: "101".into(),
                file_name: "intake.pdf".into(),
                content: "JVBERi0=".into(),
                name: None,
                label: Some("Intake".into()),
                notes: None,
                status: None,
                document_date: Some("2025-03-10".into()),
                practice_id: None,
            })
            .await
            .unwrap();

        assert_eq!(id, "900");
        assert!(cache.is_empty());
        let envelope = &transport.calls()[0].1;
        assert!(envelope.contains("<sch:Name>intake.pdf</sch:Name>"));
        assert!(envelope.contains("<sch:DocumentDate>2025-03-10</sch:DocumentDate>"));
    }

    #[tokio::test]
    async fn test_charge_amount_formatting() {
        let transport = ScriptedTransport::with(vec![ok(&wrap("CreateCharge", "<ChargeID>c-1</ChargeID>"))]);
        let id = service(transport.clone())
            .create_charge(&NewCharge {
                patient_id: "101".into(),
                amount_cents: 12_550,
                currency: "usd".into(),
                description: Some("Visit".into()),
                procedure_code: None,
                reference: Some("pi_1".into()),
                practice_id: None,
            })
            .await
            .unwrap();
        assert_eq!(id, "c-1");
        let envelope = &transport.calls()[0].1;
        assert!(envelope.contains("<sch:Amount>125.50</sch:Amount>"));
        assert!(envelope.contains("<sch:Currency>USD</sch:Currency>"));
    }

    #[test]
    fn test_snapshot_window_covers_shift_reach() {
        let slot = TimeSlot::new(datetime!(2025-03-10 23:00), datetime!(2025-03-10 23:30)).unwrap();
        let (from, to) = snapshot_window(slot, 4);
        assert_eq!(from, datetime!(2025-03-10 00:00));
        assert_eq!(to, datetime!(2025-03-12 00:00));
    }
}
