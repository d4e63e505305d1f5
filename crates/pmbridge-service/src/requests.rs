//! Inputs accepted by [`crate::domain::DomainService`].
//!
//! All inputs deserialize from JSON so a queued job can carry them.
//! Timestamps use the remote service's local `YYYY-MM-DDTHH:MM:SS` form.

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use pmbridge_core::{DomainError, Result};

pub(crate) mod remote_datetime {
    use pmbridge_core::{format_remote_datetime, parse_remote_datetime};
    use serde::{Deserialize, Deserializer, Serializer};
    use time::PrimitiveDateTime;

    pub fn serialize<S: Serializer>(value: &PrimitiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_remote_datetime(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PrimitiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_remote_datetime(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<PrimitiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => s.serialize_some(&format_remote_datetime(*value)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<PrimitiveDateTime>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| parse_remote_datetime(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Rejects a missing or blank required field.
pub(crate) fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    Ok(value)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientDetails {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    /// `YYYY-MM-DD`
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
    pub country: Option<String>,
    pub notes: Option<String>,
    /// Overrides the practice from the credentials.
    pub practice_id: Option<String>,
}

impl PatientDetails {
    /// Element values in remote field names, absent ones skipped.
    pub(crate) fn remote_fields(&self) -> Vec<(&'static str, String)> {
        [
            ("FirstName", &self.first_name),
            ("MiddleName", &self.middle_name),
            ("LastName", &self.last_name),
            ("DateofBirth", &self.date_of_birth),
            ("Gender", &self.gender),
            ("EmailAddress", &self.email),
            ("HomePhone", &self.home_phone),
            ("MobilePhone", &self.mobile_phone),
            ("AddressLine1", &self.address_line1),
            ("AddressLine2", &self.address_line2),
            ("City", &self.city),
            ("State", &self.state),
            ("ZipCode", &self.zip_code),
            ("Country", &self.country),
            ("Notes", &self.notes),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|v| (name, v)))
        .collect()
    }

    pub(crate) fn validate_for_create(&self) -> Result<()> {
        require("first_name", self.first_name.as_deref().unwrap_or_default())?;
        require("last_name", self.last_name.as_deref().unwrap_or_default())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientSearch {
    pub patient_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub practice_id: Option<String>,
}

impl PatientSearch {
    pub fn by_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub practice_id: Option<String>,
    #[serde(default)]
    pub service_location_id: Option<String>,
    #[serde(default)]
    pub reason_id: Option<String>,
    #[serde(with = "remote_datetime")]
    pub start: PrimitiveDateTime,
    #[serde(with = "remote_datetime")]
    pub end: PrimitiveDateTime,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub appointment_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Patient name and email sent in the appointment's patient summary.
    #[serde(default)]
    pub patient_first_name: Option<String>,
    #[serde(default)]
    pub patient_last_name: Option<String>,
    #[serde(default)]
    pub patient_email: Option<String>,
    #[serde(default)]
    pub created_online: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentUpdate {
    /// Used for the patient summary and cache invalidation.
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub resource_id: Option<String>,
    pub reason_id: Option<String>,
    #[serde(with = "remote_datetime::option")]
    pub start: Option<PrimitiveDateTime>,
    #[serde(with = "remote_datetime::option")]
    pub end: Option<PrimitiveDateTime>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentSearch {
    pub patient_id: Option<String>,
    pub provider_id: Option<String>,
    pub resource_id: Option<String>,
    pub practice_id: Option<String>,
    pub reason_id: Option<String>,
    pub confirmation_status: Option<String>,
    #[serde(with = "remote_datetime::option")]
    pub from: Option<PrimitiveDateTime>,
    #[serde(with = "remote_datetime::option")]
    pub to: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub patient_id: String,
    pub file_name: String,
    /// Base64 file content.
    pub content: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// `YYYY-MM-DD`; today when absent.
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub practice_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCharge {
    pub patient_id: String,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub procedure_code: Option<String>,
    /// External payment reference, e.g. the payment intent id.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub practice_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub patient_id: String,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub charge_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub practice_id: Option<String>,
}

/// Formats integer minor units as the decimal string the remote service takes.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

/// Parses a decimal amount such as `"125.5"` into minor units.
pub fn parse_amount(value: &str) -> Option<i64> {
    let value = value.trim();
    let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    if whole < 0 || value.starts_with('-') {
        return None;
    }
    whole.checked_mul(100)?.checked_add(frac)
}
