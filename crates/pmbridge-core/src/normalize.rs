//! Normalization of raw operation responses into canonical records.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aliases::{ERROR_FLAG, ERROR_MESSAGE, TOTAL_COUNT};
use crate::error::{DomainError, Result};
use crate::records::Canonical;
use crate::xml::{RawFields, extract_blocks, parse_bool, parse_fields};

/// Items of a list response together with the reported total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub total_count: usize,
}

impl<T> ListResult<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Raises a business fault for responses that carry an explicit error
/// indicator, even when entity blocks parsed successfully.
///
/// Recognizes the `IsError`/`ErrorMessage` pair and a `SecurityResponse`
/// whose `Authenticated` or `Authorized` flag is false.
pub fn check_business_error(operation: &str, raw_xml: &str) -> Result<()> {
    let fields = parse_fields(raw_xml)?;
    check_fields(operation, &fields)
}

fn check_fields(operation: &str, fields: &RawFields) -> Result<()> {
    if fields.first_bool(ERROR_FLAG) == Some(true) {
        let message = fields
            .first_string(ERROR_MESSAGE)
            .unwrap_or_else(|| "remote service reported an error without a message".into());
        warn!(operation, error = %message, "Remote service flagged business error");
        return Err(DomainError::business_fault(operation, message));
    }

    for flag in ["SecurityResponse.Authenticated", "SecurityResponse.Authorized"] {
        if fields.get(flag).and_then(parse_bool) == Some(false) {
            let message = fields
                .first_string(&["SecurityResponse.SecurityResult", "SecurityResult"])
                .unwrap_or_else(|| "request was not authorized".into());
            warn!(operation, error = %message, "Remote service rejected credentials");
            return Err(DomainError::business_fault(operation, message));
        }
    }

    Ok(())
}

fn blocks_for<T: Canonical>(raw_xml: &str) -> Result<Vec<String>> {
    for tag in T::BLOCK_TAGS {
        let blocks = extract_blocks(raw_xml, tag)?;
        if !blocks.is_empty() {
            return Ok(blocks);
        }
    }
    Ok(Vec::new())
}

/// Normalizes a list response.
///
/// `total_count` comes from an explicit count field when one is present and
/// numeric, otherwise from the number of returned blocks.
pub fn normalize_list<T: Canonical>(operation: &str, raw_xml: &str) -> Result<ListResult<T>> {
    let document = parse_fields(raw_xml)?;
    check_fields(operation, &document)?;

    let items = blocks_for::<T>(raw_xml)?
        .iter()
        .map(|block| parse_fields(block).map(|raw| T::from_raw(&raw)))
        .collect::<Result<Vec<T>>>()?;

    let total_count = match document.first_of(TOTAL_COUNT) {
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(operation, value, "Unparseable total count, using block count");
            items.len()
        }),
        None => items.len(),
    };

    debug!(
        operation,
        kind = %T::KIND,
        returned = items.len(),
        total_count,
        "Normalized list response"
    );

    Ok(ListResult { items, total_count })
}

/// Normalizes a single-entity response; `None` when no entity block exists.
pub fn normalize_one<T: Canonical>(operation: &str, raw_xml: &str) -> Result<Option<T>> {
    check_business_error(operation, raw_xml)?;
    match blocks_for::<T>(raw_xml)?.first() {
        Some(block) => Ok(Some(T::from_raw(&parse_fields(block)?))),
        None => Ok(None),
    }
}

/// Extracts the id of an entity created or updated by `operation`.
///
/// Typed aliases (`PatientID`, ...) are looked up across the response. A bare
/// `ID` alias only counts inside the `<operation>Result` element, preferring
/// a direct child of it.
pub fn extract_created_id(
    operation: &str,
    raw_xml: &str,
    aliases: &[&str],
) -> Result<Option<String>> {
    let fields = parse_fields(raw_xml)?;
    check_fields(operation, &fields)?;

    let (generic, typed): (Vec<&str>, Vec<&str>) =
        aliases.iter().copied().partition(|alias| alias.eq_ignore_ascii_case(GENERIC_ID));
    if let Some(id) = fields.first_string(&typed) {
        return Ok(Some(id));
    }
    if generic.is_empty() {
        return Ok(None);
    }

    let result_tag = format!("{operation}Result");
    let direct = format!("{result_tag}.{GENERIC_ID}");
    if let Some(id) = fields.first_string(&[direct.as_str()]) {
        return Ok(Some(id));
    }
    match extract_blocks(raw_xml, &result_tag)?.first() {
        Some(block) => Ok(parse_fields(block)?.first_string(&[GENERIC_ID])),
        None => {
            debug!(operation, "No result element to read a generic id from");
            Ok(None)
        }
    }
}

const GENERIC_ID: &str = "ID";
