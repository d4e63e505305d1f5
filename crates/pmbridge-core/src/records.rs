//! Canonical entity records.
//!
//! Every record is built from a [`RawFields`] map through the alias tables in
//! [`crate::aliases`], so the remote service's casing never leaks past this
//! module.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aliases::{
    self, APPOINTMENT_FIELDS, APPOINTMENT_REASON_FIELDS, DOCUMENT_FIELDS, FieldAliases,
    PATIENT_FIELDS, PRACTICE_FIELDS, PROVIDER_FIELDS,
};
use crate::xml::RawFields;

/// Entity kinds exchanged with the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Patient,
    Appointment,
    Provider,
    Practice,
    AppointmentReason,
    Document,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Patient => "Patient",
            Self::Appointment => "Appointment",
            Self::Provider => "Provider",
            Self::Practice => "Practice",
            Self::AppointmentReason => "AppointmentReason",
            Self::Document => "Document",
        };
        f.write_str(name)
    }
}

/// A record that can be built from a raw field map.
pub trait Canonical: Sized {
    const KIND: EntityKind;
    /// Element names wrapping one entity, tried in order.
    const BLOCK_TAGS: &'static [&'static str];
    /// Alias table backing this record.
    const FIELDS: &'static [FieldAliases];

    fn from_raw(raw: &RawFields) -> Self;
}

/// Builds a canonical record of type `T` from a raw field map.
pub fn to_canonical<T: Canonical>(raw: &RawFields) -> T {
    T::from_raw(raw)
}

/// Any canonical record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CanonicalRecord {
    Patient(CanonicalPatient),
    Appointment(CanonicalAppointment),
    Provider(CanonicalProvider),
    Practice(CanonicalPractice),
    AppointmentReason(CanonicalAppointmentReason),
    Document(CanonicalDocument),
}

/// Builds the canonical record for a runtime-selected kind.
pub fn to_canonical_kind(kind: EntityKind, raw: &RawFields) -> CanonicalRecord {
    match kind {
        EntityKind::Patient => CanonicalRecord::Patient(to_canonical(raw)),
        EntityKind::Appointment => CanonicalRecord::Appointment(to_canonical(raw)),
        EntityKind::Provider => CanonicalRecord::Provider(to_canonical(raw)),
        EntityKind::Practice => CanonicalRecord::Practice(to_canonical(raw)),
        EntityKind::AppointmentReason => CanonicalRecord::AppointmentReason(to_canonical(raw)),
        EntityKind::Document => CanonicalRecord::Document(to_canonical(raw)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPatient {
    pub id: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub email: Option<String>,
    pub home_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub practice_id: Option<String>,
    pub practice_name: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Canonical for CanonicalPatient {
    const KIND: EntityKind = EntityKind::Patient;
    const BLOCK_TAGS: &'static [&'static str] = aliases::patient::BLOCK_TAGS;
    const FIELDS: &'static [FieldAliases] = PATIENT_FIELDS;

    fn from_raw(raw: &RawFields) -> Self {
        use aliases::patient as a;
        let first_name = raw.first_string(a::FIRST_NAME);
        let last_name = raw.first_string(a::LAST_NAME);
        let full_name = raw.first_string(a::FULL_NAME).or_else(|| {
            match (first_name.as_deref(), last_name.as_deref()) {
                (Some(first), Some(last)) => Some(format!("{first} {last}")),
                _ => None,
            }
        });

        Self {
            id: raw.first_string(a::ID),
            first_name,
            middle_name: raw.first_string(a::MIDDLE_NAME),
            last_name,
            full_name,
            date_of_birth: raw.first_string(a::DATE_OF_BIRTH),
            gender: raw.first_string(a::GENDER),
            email: raw.first_string(a::EMAIL),
            home_phone: raw.first_string(a::HOME_PHONE),
            mobile_phone: raw.first_string(a::MOBILE_PHONE),
            address_line1: raw.first_string(a::ADDRESS_LINE1),
            address_line2: raw.first_string(a::ADDRESS_LINE2),
            city: raw.first_string(a::CITY),
            state: raw.first_string(a::STATE),
            zip_code: raw.first_string(a::ZIP_CODE),
            practice_id: raw.first_string(a::PRACTICE_ID),
            practice_name: raw.first_string(a::PRACTICE_NAME),
            created_at: raw.first_string(a::CREATED_AT),
            updated_at: raw.first_string(a::UPDATED_AT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAppointment {
    pub id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub provider_id: Option<String>,
    pub resource_id: Option<String>,
    pub practice_id: Option<String>,
    pub service_location_id: Option<String>,
    pub reason_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: Option<String>,
    pub appointment_type: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
}

impl Canonical for CanonicalAppointment {
    const KIND: EntityKind = EntityKind::Appointment;
    const BLOCK_TAGS: &'static [&'static str] = aliases::appointment::BLOCK_TAGS;
    const FIELDS: &'static [FieldAliases] = APPOINTMENT_FIELDS;

    fn from_raw(raw: &RawFields) -> Self {
        use aliases::appointment as a;
        Self {
            id: raw.first_string(a::ID),
            patient_id: raw.first_string(a::PATIENT_ID),
            patient_name: raw.first_string(a::PATIENT_NAME),
            provider_id: raw.first_string(a::PROVIDER_ID),
            resource_id: raw.first_string(a::RESOURCE_ID),
            practice_id: raw.first_string(a::PRACTICE_ID),
            service_location_id: raw.first_string(a::SERVICE_LOCATION_ID),
            reason_id: raw.first_string(a::REASON_ID),
            start_time: raw.first_string(a::START_TIME),
            end_time: raw.first_string(a::END_TIME),
            status: raw.first_string(a::STATUS),
            appointment_type: raw.first_string(a::APPOINTMENT_TYPE),
            notes: raw.first_string(a::NOTES),
            created_at: raw.first_string(a::CREATED_AT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalProvider {
    pub id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub degree: Option<String>,
    pub npi: Option<String>,
    pub email: Option<String>,
    pub practice_id: Option<String>,
    pub specialty: Option<String>,
    pub provider_type: Option<String>,
    pub active: Option<bool>,
}

impl Canonical for CanonicalProvider {
    const KIND: EntityKind = EntityKind::Provider;
    const BLOCK_TAGS: &'static [&'static str] = aliases::provider::BLOCK_TAGS;
    const FIELDS: &'static [FieldAliases] = PROVIDER_FIELDS;

    fn from_raw(raw: &RawFields) -> Self {
        use aliases::provider as a;
        Self {
            id: raw.first_string(a::ID),
            first_name: raw.first_string(a::FIRST_NAME),
            last_name: raw.first_string(a::LAST_NAME),
            full_name: raw.first_string(a::FULL_NAME),
            degree: raw.first_string(a::DEGREE),
            npi: raw.first_string(a::NPI),
            email: raw.first_string(a::EMAIL),
            practice_id: raw.first_string(a::PRACTICE_ID),
            specialty: raw.first_string(a::SPECIALTY),
            provider_type: raw.first_string(a::PROVIDER_TYPE),
            active: raw.first_bool(a::ACTIVE),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalPractice {
    pub id: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub time_zone: Option<String>,
    pub active: Option<bool>,
}

impl Canonical for CanonicalPractice {
    const KIND: EntityKind = EntityKind::Practice;
    const BLOCK_TAGS: &'static [&'static str] = aliases::practice::BLOCK_TAGS;
    const FIELDS: &'static [FieldAliases] = PRACTICE_FIELDS;

    fn from_raw(raw: &RawFields) -> Self {
        use aliases::practice as a;
        Self {
            id: raw.first_string(a::ID),
            name: raw.first_string(a::NAME),
            phone: raw.first_string(a::PHONE),
            email: raw.first_string(a::EMAIL),
            address_line1: raw.first_string(a::ADDRESS_LINE1),
            city: raw.first_string(a::CITY),
            state: raw.first_string(a::STATE),
            zip_code: raw.first_string(a::ZIP_CODE),
            time_zone: raw.first_string(a::TIME_ZONE),
            active: raw.first_bool(a::ACTIVE),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAppointmentReason {
    pub id: Option<String>,
    pub name: Option<String>,
    pub duration_minutes: Option<u32>,
    pub practice_id: Option<String>,
    pub color: Option<String>,
}

impl Canonical for CanonicalAppointmentReason {
    const KIND: EntityKind = EntityKind::AppointmentReason;
    const BLOCK_TAGS: &'static [&'static str] = aliases::appointment_reason::BLOCK_TAGS;
    const FIELDS: &'static [FieldAliases] = APPOINTMENT_REASON_FIELDS;

    fn from_raw(raw: &RawFields) -> Self {
        use aliases::appointment_reason as a;
        Self {
            id: raw.first_string(a::ID),
            name: raw.first_string(a::NAME),
            duration_minutes: raw.first_u32(a::DURATION_MINUTES),
            practice_id: raw.first_string(a::PRACTICE_ID),
            color: raw.first_string(a::COLOR),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalDocument {
    pub id: Option<String>,
    pub patient_id: Option<String>,
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub label: Option<String>,
    pub document_date: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    pub practice_id: Option<String>,
}

impl Canonical for CanonicalDocument {
    const KIND: EntityKind = EntityKind::Document;
    const BLOCK_TAGS: &'static [&'static str] = aliases::document::BLOCK_TAGS;
    const FIELDS: &'static [FieldAliases] = DOCUMENT_FIELDS;

    fn from_raw(raw: &RawFields) -> Self {
        use aliases::document as a;
        Self {
            id: raw.first_string(a::ID),
            patient_id: raw.first_string(a::PATIENT_ID),
            name: raw.first_string(a::NAME),
            file_name: raw.first_string(a::FILE_NAME),
            label: raw.first_string(a::LABEL),
            document_date: raw.first_string(a::DOCUMENT_DATE),
            status: raw.first_string(a::STATUS),
            notes: raw.first_string(a::NOTES),
            practice_id: raw.first_string(a::PRACTICE_ID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn raw(pairs: &[(&str, &str)]) -> RawFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Sets each alias alone and checks it lands in the declared canonical field.
    fn assert_every_alias_resolves<T: Canonical + Serialize>() {
        for entry in T::FIELDS {
            for alias in entry.aliases {
                let record = T::from_raw(&raw(&[(alias, "1")]));
                let json = serde_json::to_value(&record).unwrap();
                let value = &json[entry.field];
                let resolved = match value {
                    Value::String(s) => s == "1",
                    Value::Number(n) => n.as_u64() == Some(1),
                    Value::Bool(b) => *b,
                    _ => false,
                };
                assert!(
                    resolved,
                    "{}: alias {alias} did not resolve {} (got {value})",
                    T::KIND,
                    entry.field
                );
            }
        }
    }

    #[test]
    fn test_every_alias_resolves_for_every_kind() {
        assert_every_alias_resolves::<CanonicalPatient>();
        assert_every_alias_resolves::<CanonicalAppointment>();
        assert_every_alias_resolves::<CanonicalProvider>();
        assert_every_alias_resolves::<CanonicalPractice>();
        assert_every_alias_resolves::<CanonicalAppointmentReason>();
        assert_every_alias_resolves::<CanonicalDocument>();
    }

    #[test]
    fn test_alias_tables_cover_every_serialized_field() {
        fn check<T: Canonical + Serialize + Default>() {
            let json = serde_json::to_value(T::default()).unwrap();
            let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
            assert_eq!(keys.len(), T::FIELDS.len(), "{}", T::KIND);
            for entry in T::FIELDS {
                assert!(json.get(entry.field).is_some(), "{}.{}", T::KIND, entry.field);
            }
        }
        check::<CanonicalPatient>();
        check::<CanonicalAppointment>();
        check::<CanonicalProvider>();
        check::<CanonicalPractice>();
        check::<CanonicalAppointmentReason>();
        check::<CanonicalDocument>();
    }

    #[test]
    fn test_patient_id_alias_priority() {
        let fields = raw(&[("PatientID", "p-1"), ("patientid", "p-2"), ("ID", "p-3")]);
        let patient: CanonicalPatient = to_canonical(&fields);
        assert_eq!(patient.id.as_deref(), Some("p-3"));

        let fields = raw(&[("PatientID", "p-1"), ("patientid", "p-2")]);
        let patient: CanonicalPatient = to_canonical(&fields);
        assert_eq!(patient.id.as_deref(), Some("p-1"));

        let fields = raw(&[("patientid", "p-2")]);
        let patient: CanonicalPatient = to_canonical(&fields);
        assert_eq!(patient.id.as_deref(), Some("p-2"));
    }

    #[test]
    fn test_appointment_reason_id_spellings() {
        let a: CanonicalAppointment = to_canonical(&raw(&[("AppointmentReasonId", "12")]));
        assert_eq!(a.reason_id.as_deref(), Some("12"));

        let a: CanonicalAppointment = to_canonical(&raw(&[
            ("AppointmentReasonId", "12"),
            ("AppointmentReasonID", "13"),
        ]));
        assert_eq!(a.reason_id.as_deref(), Some("13"));
    }

    #[test]
    fn test_patient_full_name_falls_back_to_parts() {
        let p: CanonicalPatient =
            to_canonical(&raw(&[("FirstName", "Ada"), ("lastName", "Lovelace")]));
        assert_eq!(p.full_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_to_canonical_kind_tags_record() {
        let record = to_canonical_kind(EntityKind::Provider, &raw(&[("ProviderId", "5")]));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "provider");
        assert_eq!(json["id"], "5");
    }
}
