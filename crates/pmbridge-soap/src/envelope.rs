//! Request envelope construction.
//!
//! Field order always comes from [`crate::schema`]; the order in which the
//! caller supplied fields is irrelevant. Empty values are treated as absent
//! and left out of the body, and an element whose children are all absent is
//! left out as well.

use std::collections::HashMap;
use std::fmt::Write as _;

use quick_xml::escape::escape;

use crate::actions::DEFAULT_NAMESPACE;
use crate::auth::AuthHeader;
use crate::client::SOAP11_ENVELOPE_NS;
use crate::error::{SoapError, SoapResult};
use crate::schema::{FieldSpec, schema_for};

/// A caller-supplied value for a request element.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Group(HashMap<String, FieldValue>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn group<K, V>(children: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self::Group(
            children
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// An operation call before serialization.
#[derive(Debug, Clone, Default)]
pub struct OperationRequest {
    pub operation: String,
    pub fields: HashMap<String, FieldValue>,
    pub filter: HashMap<String, String>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.insert(name.into(), value.into());
        self
    }

    /// Adds the filter only when `value` is present.
    #[must_use]
    pub fn with_optional_filter(self, name: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with_filter(name, value),
            None => self,
        }
    }
}

/// Escapes the five XML special characters in element text.
pub fn escape_text(value: &str) -> String {
    escape(value).into_owned()
}

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    namespace: String,
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl EnvelopeBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Serializes `request` into a SOAP 1.1 envelope.
    ///
    /// Fails without side effects when the operation is unknown or the
    /// request carries a field its schema does not declare.
    pub fn build(&self, request: &OperationRequest, auth: &AuthHeader) -> SoapResult<String> {
        let op = request.operation.as_str();
        let schema = schema_for(op)
            .ok_or_else(|| SoapError::validation(format!("unknown operation {op}")))?;

        check_declared(op, &request.fields, schema.fields)?;
        if let Some(name) = request
            .filter
            .keys()
            .find(|name| !schema.filter.contains(&name.as_str()))
        {
            return Err(SoapError::validation(format!(
                "filter {name} is not declared for {op}"
            )));
        }

        let mut body = String::new();
        body.push_str("<sch:RequestHeader>");
        for (name, value) in auth.elements() {
            write_leaf(&mut body, name, value);
        }
        body.push_str("</sch:RequestHeader>");

        write_fields(&mut body, schema.fields, &request.fields);

        let mut filter = String::new();
        for name in schema.filter {
            if let Some(value) = request.filter.get(*name).filter(|v| !v.trim().is_empty()) {
                write_leaf(&mut filter, name, value);
            }
        }
        if !filter.is_empty() {
            let _ = write!(body, "<sch:Filter>{filter}</sch:Filter>");
        }

        let mut out = String::with_capacity(body.len() + 256);
        out.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        let _ = write!(
            out,
            r#"<soap:Envelope xmlns:soap="{SOAP11_ENVELOPE_NS}" xmlns:sch="{ns}">"#,
            ns = escape(&self.namespace),
        );
        let _ = write!(
            out,
            "<soap:Body><sch:{op}><sch:request>{body}</sch:request></sch:{op}></soap:Body></soap:Envelope>"
        );
        Ok(out)
    }
}

fn check_declared(
    op: &str,
    supplied: &HashMap<String, FieldValue>,
    declared: &[FieldSpec],
) -> SoapResult<()> {
    for (name, value) in supplied {
        let spec = declared
            .iter()
            .find(|spec| spec.name() == name.as_str())
            .ok_or_else(|| SoapError::validation(format!("{name} is not declared for {op}")))?;
        match (spec, value) {
            (FieldSpec::Leaf(_), FieldValue::Text(_)) => {}
            (FieldSpec::Group(_, children), FieldValue::Group(nested)) => {
                check_declared(op, nested, children)?;
            }
            (FieldSpec::Leaf(_), FieldValue::Group(_)) => {
                return Err(SoapError::validation(format!(
                    "{name} takes a text value in {op}"
                )));
            }
            (FieldSpec::Group(..), FieldValue::Text(_)) => {
                return Err(SoapError::validation(format!(
                    "{name} takes nested elements in {op}"
                )));
            }
        }
    }
    Ok(())
}

fn write_fields(out: &mut String, specs: &[FieldSpec], values: &HashMap<String, FieldValue>) {
    for spec in specs {
        match (spec, values.get(spec.name())) {
            (FieldSpec::Leaf(name), Some(FieldValue::Text(value))) if !value.trim().is_empty() => {
                write_leaf(out, name, value);
            }
            (FieldSpec::Group(name, children), Some(FieldValue::Group(nested))) => {
                let mut inner = String::new();
                write_fields(&mut inner, children, nested);
                if !inner.is_empty() {
                    let _ = write!(out, "<sch:{name}>{inner}</sch:{name}>");
                }
            }
            _ => {}
        }
    }
}

fn write_leaf(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "<sch:{name}>{}</sch:{name}>", escape(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthHeader {
        AuthHeader::new("ck", "user", "pw")
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("{needle} missing from {haystack}"))
    }

    #[test]
    fn test_envelope_shape() {
        let builder = EnvelopeBuilder::new("http://www.kareo.com/api/schemas/");
        let request = OperationRequest::new("GetPatients").with_filter("LastName", "Lovelace");
        let xml = builder.build(&request, &auth().with_practice_id("7")).unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope"#));
        assert!(xml.contains(r#"xmlns:sch="http://www.kareo.com/api/schemas/""#));
        assert!(xml.contains(
            "<sch:RequestHeader><sch:CustomerKey>ck</sch:CustomerKey><sch:User>user</sch:User>\
             <sch:Password>pw</sch:Password><sch:PracticeId>7</sch:PracticeId></sch:RequestHeader>"
        ));
        assert!(xml.contains(
            "</sch:RequestHeader><sch:Filter><sch:LastName>Lovelace</sch:LastName></sch:Filter></sch:request>"
        ));
        assert!(xml.ends_with("</sch:GetPatients></soap:Body></soap:Envelope>"));
    }

    #[test]
    fn test_field_order_ignores_input_order() {
        let builder = EnvelopeBuilder::default();
        let forward = OperationRequest::new("CreateAppointment").with_field(
            "Appointment",
            FieldValue::group([
                ("StartTime", "2025-03-10T10:00:00"),
                ("EndTime", "2025-03-10T10:30:00"),
                ("ProviderId", "5"),
                ("AppointmentReasonId", "12"),
            ]),
        );
        let reversed = OperationRequest::new("CreateAppointment").with_field(
            "Appointment",
            FieldValue::group([
                ("AppointmentReasonId", "12"),
                ("ProviderId", "5"),
                ("EndTime", "2025-03-10T10:30:00"),
                ("StartTime", "2025-03-10T10:00:00"),
            ]),
        );

        let a = builder.build(&forward, &auth()).unwrap();
        let b = builder.build(&reversed, &auth()).unwrap();
        assert_eq!(a, b);

        let reason = position(&a, "<sch:AppointmentReasonId>");
        let end = position(&a, "<sch:EndTime>");
        let provider = position(&a, "<sch:ProviderId>");
        let start = position(&a, "<sch:StartTime>");
        assert!(reason < end && end < provider && provider < start);
    }

    #[test]
    fn test_filter_order_ignores_input_order() {
        let builder = EnvelopeBuilder::default();
        let request = OperationRequest::new("GetAppointments")
            .with_filter("ToStartDate", "2025-03-11")
            .with_filter("FromStartDate", "2025-03-10")
            .with_filter("PatientID", "101");
        let xml = builder.build(&request, &auth()).unwrap();
        assert!(xml.contains(
            "<sch:Filter><sch:FromStartDate>2025-03-10</sch:FromStartDate>\
             <sch:PatientID>101</sch:PatientID><sch:ToStartDate>2025-03-11</sch:ToStartDate></sch:Filter>"
        ));
    }

    #[test]
    fn test_values_are_escaped() {
        let builder = EnvelopeBuilder::default();
        let request = OperationRequest::new("CreatePatient").with_field(
            "Patient",
            FieldValue::group([("FirstName", r#"A&B <x> "q" 'a'"#), ("LastName", "O'Hara")]),
        );
        let xml = builder
            .build(&request, &AuthHeader::new("k", "u", "p<&>"))
            .unwrap();

        assert!(xml.contains(
            "<sch:FirstName>A&amp;B &lt;x&gt; &quot;q&quot; &apos;a&apos;</sch:FirstName>"
        ));
        assert!(xml.contains("<sch:LastName>O&apos;Hara</sch:LastName>"));
        assert!(xml.contains("<sch:Password>p&lt;&amp;&gt;</sch:Password>"));
    }

    #[test]
    fn test_empty_values_are_omitted() {
        let builder = EnvelopeBuilder::default();
        let request = OperationRequest::new("CreatePatient").with_field(
            "Patient",
            FieldValue::group([
                ("FirstName", FieldValue::text("Ada")),
                ("MiddleName", FieldValue::text("")),
                ("Practice", FieldValue::group([("PracticeID", "  ")])),
            ]),
        );
        let xml = builder.build(&request, &auth()).unwrap();
        assert!(xml.contains("<sch:Patient><sch:FirstName>Ada</sch:FirstName></sch:Patient>"));
        assert!(!xml.contains("MiddleName"));
        assert!(!xml.contains("<sch:Practice>"));
        assert!(!xml.contains("<sch:Filter>"));
    }

    #[test]
    fn test_nested_group() {
        let builder = EnvelopeBuilder::default();
        let request = OperationRequest::new("CreatePatient").with_field(
            "Patient",
            FieldValue::group([
                ("ZipCode", FieldValue::text("02139")),
                ("Practice", FieldValue::group([("PracticeID", "1")])),
                ("FirstName", FieldValue::text("Ada")),
            ]),
        );
        let xml = builder.build(&request, &auth()).unwrap();
        assert!(xml.contains(
            "<sch:Patient><sch:FirstName>Ada</sch:FirstName>\
             <sch:Practice><sch:PracticeID>1</sch:PracticeID></sch:Practice>\
             <sch:ZipCode>02139</sch:ZipCode></sch:Patient>"
        ));
    }

    #[test]
    fn test_undeclared_field_rejected() {
        let builder = EnvelopeBuilder::default();

        let request = OperationRequest::new("CreatePatient")
            .with_field("Patient", FieldValue::group([("ShoeSize", "42")]));
        assert!(matches!(
            builder.build(&request, &auth()),
            Err(SoapError::Validation(_))
        ));

        let request = OperationRequest::new("GetPatients").with_filter("ShoeSize", "42");
        assert!(matches!(
            builder.build(&request, &auth()),
            Err(SoapError::Validation(_))
        ));

        let request = OperationRequest::new("CreatePatient").with_field("Patient", "flat");
        assert!(matches!(
            builder.build(&request, &auth()),
            Err(SoapError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let builder = EnvelopeBuilder::default();
        let err = builder
            .build(&OperationRequest::new("DropDatabase"), &auth())
            .unwrap_err();
        assert!(err.to_string().contains("DropDatabase"));
    }
}
