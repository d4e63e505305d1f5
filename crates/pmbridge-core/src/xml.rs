//! Tolerant extraction of entity blocks and leaf fields from raw SOAP responses.
//!
//! The remote service nests the same entity under different wrappers depending
//! on the operation and prefixes element names with arbitrary namespace
//! aliases, so everything here works on local names only.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;

use crate::error::{DomainError, Result};

/// Leaf fields of one entity block, keyed by local element name.
///
/// Nested leaves are additionally keyed as `Parent.Child`. Unknown fields are
/// kept so alias resolution can still find them later. Keys are ordered, which
/// keeps case-insensitive lookups deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawFields(BTreeMap<String, String>);

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field unless one with the same key is already present.
    pub fn insert_first(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Resolves the first non-empty value for an ordered alias list.
    ///
    /// Exact names are tried first in alias order, then a case-insensitive
    /// pass in the same order.
    pub fn first_of(&self, aliases: &[&str]) -> Option<&str> {
        for alias in aliases {
            if let Some(value) = self.0.get(*alias) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        for alias in aliases {
            for (key, value) in &self.0 {
                let value = value.trim();
                if key.eq_ignore_ascii_case(alias) && !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }

    pub fn first_string(&self, aliases: &[&str]) -> Option<String> {
        self.first_of(aliases).map(str::to_string)
    }

    pub fn first_u32(&self, aliases: &[&str]) -> Option<u32> {
        self.first_of(aliases).and_then(|v| v.parse().ok())
    }

    pub fn first_bool(&self, aliases: &[&str]) -> Option<bool> {
        self.first_of(aliases).and_then(parse_bool)
    }
}

impl FromIterator<(String, String)> for RawFields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut fields = RawFields::new();
        for (k, v) in iter {
            fields.insert_first(k, v);
        }
        fields
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Returns the inner XML of every element whose local name equals `tag`.
///
/// Only outermost matches are returned; a matching element nested inside
/// another match stays part of the outer block.
pub fn extract_blocks(raw_xml: &str, tag: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(raw_xml);
    let mut blocks = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                let end = e.to_end().into_owned();
                let span = reader
                    .read_to_end(end.name())
                    .map_err(|e| DomainError::parse(format!("unterminated <{tag}>: {e}")))?;
                let start = usize::try_from(span.start)
                    .map_err(|_| DomainError::parse("response too large"))?;
                let stop = usize::try_from(span.end)
                    .map_err(|_| DomainError::parse("response too large"))?;
                let inner = raw_xml
                    .get(start..stop)
                    .ok_or_else(|| DomainError::parse(format!("invalid span for <{tag}>")))?;
                blocks.push(inner.to_string());
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                blocks.push(String::new());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DomainError::parse(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }

    Ok(blocks)
}

struct Frame {
    name: String,
    text: String,
    has_children: bool,
}

/// Parses the leaf elements of a block into a [`RawFields`] map.
///
/// Namespace prefixes are stripped, entities are decoded and the first
/// occurrence of a name wins.
pub fn parse_fields(raw_block: &str) -> Result<RawFields> {
    let mut reader = Reader::from_str(raw_block);
    reader.config_mut().trim_text(true);

    let mut fields = RawFields::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                stack.push(Frame {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    text: String::new(),
                    has_children: false,
                });
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                    fields.insert_first(format!("{}.{name}", parent.name), "");
                }
                fields.insert_first(name, "");
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DomainError::parse(format!("bad text content: {e}")))?;
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(frame) = stack.pop() else {
                    continue;
                };
                if frame.has_children {
                    continue;
                }
                let value = frame.text.trim().to_string();
                if let Some(parent) = stack.last() {
                    fields.insert_first(format!("{}.{}", parent.name, frame.name), value.clone());
                }
                fields.insert_first(frame.name, value);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DomainError::parse(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }

    Ok(fields)
}
