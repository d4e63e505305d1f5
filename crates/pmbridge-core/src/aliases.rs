//! Alias tables mapping remote field names onto canonical fields.
//!
//! The remote service has shipped the same field as PascalCase, lower
//! camelCase and under older names across contract versions. Each canonical
//! field lists every known spelling in priority order; the first non-empty
//! match wins. Bump [`ALIAS_TABLE_VERSION`] whenever an alias is added,
//! removed or reordered.

/// Version of the alias tables below.
pub const ALIAS_TABLE_VERSION: u32 = 3;

/// Aliases for one canonical field, `field` being its serialized name.
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
}

const fn field(field: &'static str, aliases: &'static [&'static str]) -> FieldAliases {
    FieldAliases { field, aliases }
}

/// Explicit total-count fields on list responses.
pub const TOTAL_COUNT: &[&str] = &["TotalCount", "totalCount", "TotalRecords", "RecordCount"];

/// Business error flag and message carried in otherwise successful responses.
pub const ERROR_FLAG: &[&str] = &["IsError", "isError", "HasError"];
pub const ERROR_MESSAGE: &[&str] = &["ErrorMessage", "errorMessage", "ErrorDescription"];

pub mod patient {
    pub const BLOCK_TAGS: &[&str] = &["PatientData", "Patient"];

    pub const ID: &[&str] = &["ID", "PatientID", "id", "patientId"];
    pub const FIRST_NAME: &[&str] = &["FirstName", "firstName", "PatientFirstName"];
    pub const MIDDLE_NAME: &[&str] = &["MiddleName", "middleName"];
    pub const LAST_NAME: &[&str] = &["LastName", "lastName", "PatientLastName"];
    pub const FULL_NAME: &[&str] = &["PatientFullName", "FullName", "fullName"];
    pub const DATE_OF_BIRTH: &[&str] = &["DOB", "DateofBirth", "DateOfBirth", "dateOfBirth"];
    pub const GENDER: &[&str] = &["Gender", "gender", "Sex"];
    pub const EMAIL: &[&str] = &["EmailAddress", "Email", "emailAddress", "email"];
    pub const HOME_PHONE: &[&str] = &["HomePhone", "homePhone"];
    pub const MOBILE_PHONE: &[&str] = &["MobilePhone", "mobilePhone", "CellPhone"];
    pub const ADDRESS_LINE1: &[&str] = &["AddressLine1", "addressLine1", "Address1"];
    pub const ADDRESS_LINE2: &[&str] = &["AddressLine2", "addressLine2", "Address2"];
    pub const CITY: &[&str] = &["City", "city"];
    pub const STATE: &[&str] = &["State", "state"];
    pub const ZIP_CODE: &[&str] = &["ZipCode", "zipCode", "PostalCode"];
    pub const PRACTICE_ID: &[&str] = &["PracticeId", "PracticeID", "practiceId"];
    pub const PRACTICE_NAME: &[&str] = &["PracticeName", "practiceName"];
    pub const CREATED_AT: &[&str] = &["CreatedDate", "createdDate"];
    pub const UPDATED_AT: &[&str] = &["LastModifiedDate", "lastModifiedDate", "LastModified"];
}

pub const PATIENT_FIELDS: &[FieldAliases] = &[
    field("id", patient::ID),
    field("firstName", patient::FIRST_NAME),
    field("middleName", patient::MIDDLE_NAME),
    field("lastName", patient::LAST_NAME),
    field("fullName", patient::FULL_NAME),
    field("dateOfBirth", patient::DATE_OF_BIRTH),
    field("gender", patient::GENDER),
    field("email", patient::EMAIL),
    field("homePhone", patient::HOME_PHONE),
    field("mobilePhone", patient::MOBILE_PHONE),
    field("addressLine1", patient::ADDRESS_LINE1),
    field("addressLine2", patient::ADDRESS_LINE2),
    field("city", patient::CITY),
    field("state", patient::STATE),
    field("zipCode", patient::ZIP_CODE),
    field("practiceId", patient::PRACTICE_ID),
    field("practiceName", patient::PRACTICE_NAME),
    field("createdAt", patient::CREATED_AT),
    field("updatedAt", patient::UPDATED_AT),
];

pub mod appointment {
    pub const BLOCK_TAGS: &[&str] = &["AppointmentData", "Appointment"];

    pub const ID: &[&str] = &["ID", "AppointmentID", "AppointmentId", "id", "appointmentId"];
    pub const PATIENT_ID: &[&str] = &["PatientID", "PatientId", "patientId"];
    pub const PATIENT_NAME: &[&str] = &["PatientFullName", "PatientName", "patientFullName"];
    pub const PROVIDER_ID: &[&str] = &["ProviderID", "ProviderId", "providerId"];
    pub const RESOURCE_ID: &[&str] = &["ResourceID", "ResourceId", "resourceId"];
    pub const PRACTICE_ID: &[&str] = &["PracticeID", "PracticeId", "practiceId"];
    pub const SERVICE_LOCATION_ID: &[&str] =
        &["ServiceLocationID", "ServiceLocationId", "serviceLocationId"];
    pub const REASON_ID: &[&str] = &[
        "AppointmentReasonID",
        "AppointmentReasonId",
        "appointmentReasonId",
        "ReasonID",
    ];
    pub const START_TIME: &[&str] = &["StartDate", "StartTime", "startTime", "start"];
    pub const END_TIME: &[&str] = &["EndDate", "EndTime", "endTime", "end"];
    pub const STATUS: &[&str] = &[
        "ConfirmationStatus",
        "AppointmentStatus",
        "Status",
        "status",
    ];
    pub const APPOINTMENT_TYPE: &[&str] = &["AppointmentType", "appointmentType", "Type"];
    pub const NOTES: &[&str] = &["Notes", "notes", "Comment"];
    pub const CREATED_AT: &[&str] = &["CreatedDate", "createdDate"];
}

pub const APPOINTMENT_FIELDS: &[FieldAliases] = &[
    field("id", appointment::ID),
    field("patientId", appointment::PATIENT_ID),
    field("patientName", appointment::PATIENT_NAME),
    field("providerId", appointment::PROVIDER_ID),
    field("resourceId", appointment::RESOURCE_ID),
    field("practiceId", appointment::PRACTICE_ID),
    field("serviceLocationId", appointment::SERVICE_LOCATION_ID),
    field("reasonId", appointment::REASON_ID),
    field("startTime", appointment::START_TIME),
    field("endTime", appointment::END_TIME),
    field("status", appointment::STATUS),
    field("appointmentType", appointment::APPOINTMENT_TYPE),
    field("notes", appointment::NOTES),
    field("createdAt", appointment::CREATED_AT),
];

pub mod provider {
    pub const BLOCK_TAGS: &[&str] = &["ProviderData", "Provider"];

    pub const ID: &[&str] = &["ID", "ProviderID", "ProviderId", "id", "providerId"];
    pub const FIRST_NAME: &[&str] = &["FirstName", "firstName"];
    pub const LAST_NAME: &[&str] = &["LastName", "lastName"];
    pub const FULL_NAME: &[&str] = &["FullName", "ProviderFullName", "fullName"];
    pub const DEGREE: &[&str] = &["Degree", "degree"];
    pub const NPI: &[&str] = &["NationalProviderIdentifier", "NPI", "npi"];
    pub const EMAIL: &[&str] = &["EmailAddress", "Email", "email"];
    pub const PRACTICE_ID: &[&str] = &["PracticeID", "PracticeId", "practiceId"];
    pub const SPECIALTY: &[&str] = &["SpecialtyName", "Specialty", "specialty"];
    pub const PROVIDER_TYPE: &[&str] = &["ProviderType", "providerType", "Type"];
    pub const ACTIVE: &[&str] = &["Active", "IsActive", "active"];
}

pub const PROVIDER_FIELDS: &[FieldAliases] = &[
    field("id", provider::ID),
    field("firstName", provider::FIRST_NAME),
    field("lastName", provider::LAST_NAME),
    field("fullName", provider::FULL_NAME),
    field("degree", provider::DEGREE),
    field("npi", provider::NPI),
    field("email", provider::EMAIL),
    field("practiceId", provider::PRACTICE_ID),
    field("specialty", provider::SPECIALTY),
    field("providerType", provider::PROVIDER_TYPE),
    field("active", provider::ACTIVE),
];

pub mod practice {
    pub const BLOCK_TAGS: &[&str] = &["PracticeData", "Practice"];

    pub const ID: &[&str] = &["ID", "PracticeID", "PracticeId", "id", "practiceId"];
    pub const NAME: &[&str] = &["PracticeName", "Name", "practiceName", "name"];
    pub const PHONE: &[&str] = &["Phone", "PracticePhone", "phone"];
    pub const EMAIL: &[&str] = &["Email", "PracticeEmail", "EmailAddress", "email"];
    pub const ADDRESS_LINE1: &[&str] =
        &["PracticeAddressLine1", "AddressLine1", "addressLine1"];
    pub const CITY: &[&str] = &["PracticeCity", "City", "city"];
    pub const STATE: &[&str] = &["PracticeState", "State", "state"];
    pub const ZIP_CODE: &[&str] = &["PracticeZipCode", "ZipCode", "zipCode"];
    pub const TIME_ZONE: &[&str] = &["TimeZone", "timeZone"];
    pub const ACTIVE: &[&str] = &["Active", "IsActive", "active"];
}

pub const PRACTICE_FIELDS: &[FieldAliases] = &[
    field("id", practice::ID),
    field("name", practice::NAME),
    field("phone", practice::PHONE),
    field("email", practice::EMAIL),
    field("addressLine1", practice::ADDRESS_LINE1),
    field("city", practice::CITY),
    field("state", practice::STATE),
    field("zipCode", practice::ZIP_CODE),
    field("timeZone", practice::TIME_ZONE),
    field("active", practice::ACTIVE),
];

pub mod appointment_reason {
    pub const BLOCK_TAGS: &[&str] = &["AppointmentReasonData", "AppointmentReason"];

    pub const ID: &[&str] = &[
        "ID",
        "AppointmentReasonID",
        "AppointmentReasonId",
        "id",
        "appointmentReasonId",
    ];
    pub const NAME: &[&str] = &["Name", "AppointmentReasonName", "name"];
    pub const DURATION_MINUTES: &[&str] = &[
        "DefaultDurationMinutes",
        "DefaultDuration",
        "Duration",
        "duration",
    ];
    pub const PRACTICE_ID: &[&str] = &["PracticeID", "PracticeId", "practiceId"];
    pub const COLOR: &[&str] = &["DefaultColor", "Color", "color"];
}

pub const APPOINTMENT_REASON_FIELDS: &[FieldAliases] = &[
    field("id", appointment_reason::ID),
    field("name", appointment_reason::NAME),
    field("durationMinutes", appointment_reason::DURATION_MINUTES),
    field("practiceId", appointment_reason::PRACTICE_ID),
    field("color", appointment_reason::COLOR),
];

pub mod document {
    pub const BLOCK_TAGS: &[&str] = &["DocumentData", "Document"];

    pub const ID: &[&str] = &["ID", "DocumentID", "DocumentId", "id", "documentId"];
    pub const PATIENT_ID: &[&str] = &["PatientID", "PatientId", "patientId"];
    pub const NAME: &[&str] = &["Name", "DocumentName", "name"];
    pub const FILE_NAME: &[&str] = &["FileName", "fileName"];
    pub const LABEL: &[&str] = &["Label", "DocumentLabel", "label"];
    pub const DOCUMENT_DATE: &[&str] = &["DocumentDate", "documentDate", "CreatedDate"];
    pub const STATUS: &[&str] = &["Status", "DocumentStatus", "status"];
    pub const NOTES: &[&str] = &["DocumentNotes", "Notes", "notes"];
    pub const PRACTICE_ID: &[&str] = &["PracticeID", "PracticeId", "practiceId"];
}

pub const DOCUMENT_FIELDS: &[FieldAliases] = &[
    field("id", document::ID),
    field("patientId", document::PATIENT_ID),
    field("name", document::NAME),
    field("fileName", document::FILE_NAME),
    field("label", document::LABEL),
    field("documentDate", document::DOCUMENT_DATE),
    field("status", document::STATUS),
    field("notes", document::NOTES),
    field("practiceId", document::PRACTICE_ID),
];

/// Ids returned by create/update operations.
pub mod created {
    pub const PATIENT_ID: &[&str] = &["PatientID", "PatientId", "patientId", "ID"];
    pub const APPOINTMENT_ID: &[&str] = &["AppointmentID", "AppointmentId", "appointmentId", "ID"];
    pub const DOCUMENT_ID: &[&str] = &["DocumentID", "DocumentId", "documentId", "ID"];
    pub const CHARGE_ID: &[&str] = &["ChargeID", "ChargeId", "EncounterID", "chargeId", "ID"];
    pub const PAYMENT_ID: &[&str] = &["PaymentID", "PaymentId", "paymentId", "ID"];
}
