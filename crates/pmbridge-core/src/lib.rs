//! # pmbridge-core
//!
//! Domain layer shared by every pmbridge crate.
//!
//! - [`error`]: the domain error taxonomy callers see
//! - [`xml`]: block and field extraction from raw SOAP responses
//! - [`aliases`]: versioned alias tables mapping remote field names to canonical fields
//! - [`records`]: canonical entity records
//! - [`normalize`]: list/single response normalization and business error detection
//! - [`scheduling`]: appointment conflict resolution

pub mod aliases;
pub mod error;
pub mod normalize;
pub mod records;
pub mod scheduling;
pub mod xml;

pub use aliases::{ALIAS_TABLE_VERSION, FieldAliases};
pub use error::{DomainError, ErrorCategory, Result};
pub use normalize::{
    ListResult, check_business_error, extract_created_id, normalize_list, normalize_one,
};
pub use records::{
    Canonical, CanonicalAppointment, CanonicalAppointmentReason, CanonicalDocument,
    CanonicalPatient, CanonicalPractice, CanonicalProvider, CanonicalRecord, EntityKind,
    to_canonical, to_canonical_kind,
};
pub use scheduling::{
    Booking, DEFAULT_MAX_SHIFTS, Resolution, SchedulingError, SlotState, TimeSlot,
    format_remote_datetime, parse_remote_datetime, resolve,
};
pub use xml::{RawFields, extract_blocks, parse_fields};
