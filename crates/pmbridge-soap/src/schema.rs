//! Request field order for every supported operation.
//!
//! The remote service rejects payloads whose child elements are out of the
//! sequence its schema declares, so order is declared here and never inferred
//! from the caller's input.

/// One element of a request: a text leaf or a group of nested elements.
#[derive(Debug, Clone, Copy)]
pub enum FieldSpec {
    Leaf(&'static str),
    Group(&'static str, &'static [FieldSpec]),
}

impl FieldSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Leaf(name) | Self::Group(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OperationSchema {
    pub name: &'static str,
    /// Elements following the request header, in order.
    pub fields: &'static [FieldSpec],
    /// Children of the `Filter` element, in order.
    pub filter: &'static [&'static str],
}

use FieldSpec::{Group, Leaf};

const PRACTICE_REF: FieldSpec = Group("Practice", &[Leaf("PracticeID"), Leaf("PracticeName")]);

const PATIENT_CREATE: &[FieldSpec] = &[
    Leaf("AddressLine1"),
    Leaf("AddressLine2"),
    Leaf("City"),
    Leaf("Country"),
    Leaf("DateofBirth"),
    Leaf("EmailAddress"),
    Leaf("FirstName"),
    Leaf("Gender"),
    Leaf("HomePhone"),
    Leaf("LastName"),
    Leaf("MiddleName"),
    Leaf("MobilePhone"),
    Leaf("Notes"),
    PRACTICE_REF,
    Leaf("State"),
    Leaf("ZipCode"),
];

const PATIENT_UPDATE: &[FieldSpec] = &[
    Leaf("AddressLine1"),
    Leaf("AddressLine2"),
    Leaf("City"),
    Leaf("Country"),
    Leaf("DateofBirth"),
    Leaf("EmailAddress"),
    Leaf("FirstName"),
    Leaf("Gender"),
    Leaf("HomePhone"),
    Leaf("LastName"),
    Leaf("MiddleName"),
    Leaf("MobilePhone"),
    Leaf("Notes"),
    Leaf("PatientID"),
    PRACTICE_REF,
    Leaf("State"),
    Leaf("ZipCode"),
];

const PATIENT_SUMMARY: FieldSpec = Group(
    "PatientSummary",
    &[
        Leaf("Email"),
        Leaf("FirstName"),
        Leaf("LastName"),
        Leaf("PatientId"),
    ],
);

const APPOINTMENT_CREATE: &[FieldSpec] = &[
    Leaf("AppointmentName"),
    Leaf("AppointmentReasonId"),
    Leaf("AppointmentStatus"),
    Leaf("AppointmentType"),
    Leaf("EndTime"),
    Leaf("IsRecurring"),
    Leaf("Notes"),
    PATIENT_SUMMARY,
    Leaf("PracticeId"),
    Leaf("ProviderId"),
    Leaf("ResourceId"),
    Leaf("ServiceLocationId"),
    Leaf("StartTime"),
    Leaf("WasCreatedOnline"),
];

const APPOINTMENT_UPDATE: &[FieldSpec] = &[
    Leaf("AppointmentId"),
    Leaf("AppointmentReasonId"),
    Leaf("AppointmentStatus"),
    Leaf("EndTime"),
    Leaf("Notes"),
    PATIENT_SUMMARY,
    Leaf("ProviderId"),
    Leaf("ResourceId"),
    Leaf("StartTime"),
];

const DOCUMENT_CREATE: &[FieldSpec] = &[
    Leaf("DocumentDate"),
    Leaf("FileContent"),
    Leaf("FileName"),
    Leaf("Label"),
    Leaf("Name"),
    Leaf("Notes"),
    Leaf("PatientId"),
    Leaf("PracticeId"),
    Leaf("Status"),
];

const CHARGE_CREATE: &[FieldSpec] = &[
    Leaf("Amount"),
    Leaf("ChargeDate"),
    Leaf("Currency"),
    Leaf("Description"),
    Leaf("PatientId"),
    Leaf("PracticeId"),
    Leaf("ProcedureCode"),
    Leaf("ReferenceNumber"),
];

const PAYMENT_CREATE: &[FieldSpec] = &[
    Leaf("Amount"),
    Leaf("ChargeId"),
    Leaf("Currency"),
    Leaf("PatientId"),
    Leaf("PaymentDate"),
    Leaf("PaymentMethod"),
    Leaf("PracticeId"),
    Leaf("ReferenceNumber"),
];

pub const OPERATIONS: &[OperationSchema] = &[
    OperationSchema {
        name: "GetPatients",
        fields: &[],
        filter: &[
            "EmailAddress",
            "FirstName",
            "FromLastModifiedDate",
            "FullName",
            "LastName",
            "PatientID",
            "PracticeID",
            "ToLastModifiedDate",
        ],
    },
    OperationSchema {
        name: "GetPatient",
        fields: &[],
        filter: &["ExternalID", "PatientID"],
    },
    OperationSchema {
        name: "CreatePatient",
        fields: &[Group("Patient", PATIENT_CREATE)],
        filter: &[],
    },
    OperationSchema {
        name: "UpdatePatient",
        fields: &[Group("Patient", PATIENT_UPDATE)],
        filter: &[],
    },
    OperationSchema {
        name: "GetAppointments",
        fields: &[],
        filter: &[
            "AppointmentReasonID",
            "ConfirmationStatus",
            "FromStartDate",
            "PatientID",
            "PracticeID",
            "ProviderID",
            "ResourceID",
            "ToStartDate",
        ],
    },
    OperationSchema {
        name: "GetAppointment",
        fields: &[Group("Appointment", &[Leaf("AppointmentId")])],
        filter: &[],
    },
    OperationSchema {
        name: "CreateAppointment",
        fields: &[Group("Appointment", APPOINTMENT_CREATE)],
        filter: &[],
    },
    OperationSchema {
        name: "UpdateAppointment",
        fields: &[Group("Appointment", APPOINTMENT_UPDATE)],
        filter: &[],
    },
    OperationSchema {
        name: "DeleteAppointment",
        fields: &[Group("Appointment", &[Leaf("AppointmentId")])],
        filter: &[],
    },
    OperationSchema {
        name: "GetProviders",
        fields: &[],
        filter: &["FullName", "NationalProviderIdentifier", "PracticeID", "Type"],
    },
    OperationSchema {
        name: "GetPractices",
        fields: &[],
        filter: &["Active", "PracticeID", "PracticeName"],
    },
    OperationSchema {
        name: "GetAppointmentReasons",
        fields: &[Leaf("PracticeId")],
        filter: &[],
    },
    OperationSchema {
        name: "CreateDocument",
        fields: &[Group("Document", DOCUMENT_CREATE)],
        filter: &[],
    },
    OperationSchema {
        name: "GetDocuments",
        fields: &[],
        filter: &["DocumentID", "Label", "PatientID"],
    },
    OperationSchema {
        name: "DeleteDocument",
        fields: &[Group("Document", &[Leaf("DocumentId")])],
        filter: &[],
    },
    OperationSchema {
        name: "CreateCharge",
        fields: &[Group("Charge", CHARGE_CREATE)],
        filter: &[],
    },
    OperationSchema {
        name: "CreatePayment",
        fields: &[Group("Payment", PAYMENT_CREATE)],
        filter: &[],
    },
];

pub fn schema_for(operation: &str) -> Option<&'static OperationSchema> {
    OPERATIONS.iter().find(|schema| schema.name == operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_operation_names_unique() {
        let names: HashSet<_> = OPERATIONS.iter().map(|op| op.name).collect();
        assert_eq!(names.len(), OPERATIONS.len());
    }

    #[test]
    fn test_no_duplicate_siblings() {
        fn check(op: &str, specs: &[FieldSpec]) {
            let mut seen = HashSet::new();
            for spec in specs {
                assert!(seen.insert(spec.name()), "{op}: duplicate {}", spec.name());
                if let FieldSpec::Group(_, children) = spec {
                    check(op, children);
                }
            }
        }
        for op in OPERATIONS {
            check(op.name, op.fields);
            let filters: HashSet<_> = op.filter.iter().collect();
            assert_eq!(filters.len(), op.filter.len(), "{}", op.name);
        }
    }

    #[test]
    fn test_schema_lookup() {
        assert!(schema_for("CreatePatient").is_some());
        assert!(schema_for("createpatient").is_none());
        assert!(schema_for("Nope").is_none());
    }
}
