//! Declarative conditionals that decide whether a policy applies to an event.
//!
//! A conditional is a JSON object whose fields constrain the event record:
//!
//! ```json
//! { "logical_path": "/tempZone/home/.*", "metadata": { "attribute": "archive" } }
//! ```
//!
//! `entity_type` is compared exactly. Every other non-empty field is a regular
//! expression that must match the whole record field. Patterns are compiled
//! once by [`Conditional::parse`]; [`Conditional::matches`] is pure.

use regex::Regex;
use serde_json::Value;

use crate::document::keys;
use crate::error::ErrorCode;
use crate::event::EventRecord;
use crate::services::Avu;

/// Top-level record fields a conditional may constrain with a pattern.
const PATTERN_FIELDS: [&str; 4] = [
    keys::LOGICAL_PATH,
    keys::SOURCE_RESOURCE,
    keys::DESTINATION_RESOURCE,
    keys::USER_NAME,
];

/// Errors raised while compiling a conditional.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionalError {
    /// The conditional is not an object or a field has the wrong type.
    #[error("malformed conditional: {0}")]
    Malformed(String),
    /// A field holds an invalid regular expression.
    #[error("invalid pattern [{pattern}] for conditional field [{field}]: {detail}")]
    InvalidPattern {
        /// Field holding the pattern.
        field: String,
        /// Pattern as written.
        pattern: String,
        /// Regex compiler message.
        detail: String,
    },
}

impl ConditionalError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidInputParam
    }
}

/// Compiled `metadata` sub-predicate.
#[derive(Debug, Clone, Default)]
pub struct MetadataPattern {
    attribute: Option<Regex>,
    value: Option<Regex>,
    units: Option<Regex>,
}

impl MetadataPattern {
    /// Whether no sub-field is constrained.
    pub fn is_empty(&self) -> bool {
        self.attribute.is_none() && self.value.is_none() && self.units.is_none()
    }

    fn matches_fields(&self, attribute: &str, value: &str, units: &str) -> bool {
        full_match(self.attribute.as_ref(), attribute)
            && full_match(self.value.as_ref(), value)
            && full_match(self.units.as_ref(), units)
    }

    /// Whether a stored triple satisfies every constrained sub-field.
    ///
    /// An unconstrained pattern matches no triple: there is nothing to look for.
    pub fn matches_avu(&self, avu: &Avu) -> bool {
        !self.is_empty() && self.matches_fields(&avu.attribute, &avu.value, &avu.units)
    }
}

/// A compiled conditional.
#[derive(Debug, Clone, Default)]
pub struct Conditional {
    raw: Value,
    entity_type: Option<String>,
    metadata: MetadataPattern,
    fields: Vec<(&'static str, Regex)>,
}

impl Conditional {
    /// Compile a conditional document. `null` compiles to the empty conditional.
    pub fn parse(raw: &Value) -> Result<Self, ConditionalError> {
        let object = match raw {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(ConditionalError::Malformed(format!(
                    "expected an object, got {other}"
                )))
            }
        };

        let metadata_doc = match object.get(keys::METADATA) {
            None | Some(Value::Null) => None,
            Some(m @ Value::Object(_)) => Some(m),
            Some(other) => {
                return Err(ConditionalError::Malformed(format!(
                    "metadata must be an object, got {other}"
                )))
            }
        };

        let entity_type = non_empty_string(raw, keys::ENTITY_TYPE)?.or(match metadata_doc {
            Some(m) => non_empty_string(m, keys::ENTITY_TYPE)?,
            None => None,
        });

        let metadata = match metadata_doc {
            Some(m) => MetadataPattern {
                attribute: compile(m, "attribute")?,
                value: compile(m, "value")?,
                units: compile(m, "units")?,
            },
            None => MetadataPattern::default(),
        };

        let mut fields = Vec::new();
        for field in PATTERN_FIELDS {
            if let Some(re) = compile(raw, field)? {
                fields.push((field, re));
            }
        }

        Ok(Self {
            raw: raw.clone(),
            entity_type,
            metadata,
            fields,
        })
    }

    /// The document as configured, spliced into outgoing parameters.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Compiled metadata sub-predicate.
    pub fn metadata(&self) -> &MetadataPattern {
        &self.metadata
    }

    /// Whether the conditional constrains nothing and so matches every record.
    pub fn is_unconstrained(&self) -> bool {
        self.entity_type.is_none() && self.metadata.is_empty() && self.fields.is_empty()
    }

    /// Whether `record` satisfies the conditional.
    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(expected) = &self.entity_type {
            let actual = record_entity_type(record);
            if !actual.is_empty() && actual != expected {
                return false;
            }
        }

        if self.is_unconstrained() {
            return true;
        }

        let metadata_ok = self.metadata.matches_fields(
            record.metadata_field("attribute"),
            record.metadata_field("value"),
            record.metadata_field("units"),
        );

        metadata_ok
            && self
                .fields
                .iter()
                .all(|(field, re)| re.is_match(record.field(field)))
    }
}

/// Compile `predicate` and test it against `record`.
pub fn matches(predicate: &Value, record: &EventRecord) -> Result<bool, ConditionalError> {
    Ok(Conditional::parse(predicate)?.matches(record))
}

fn record_entity_type(record: &EventRecord) -> &str {
    match record.field(keys::ENTITY_TYPE) {
        "" => record.metadata_field(keys::ENTITY_TYPE),
        top => top,
    }
}

fn full_match(pattern: Option<&Regex>, text: &str) -> bool {
    pattern.map_or(true, |re| re.is_match(text))
}

fn non_empty_string(doc: &Value, field: &str) -> Result<Option<String>, ConditionalError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ConditionalError::Malformed(format!(
            "field [{field}] must be a string, got {other}"
        ))),
    }
}

fn compile(doc: &Value, field: &str) -> Result<Option<Regex>, ConditionalError> {
    let Some(pattern) = non_empty_string(doc, field)? else {
        return Ok(None);
    };
    Regex::new(&format!("^(?:{pattern})$"))
        .map(Some)
        .map_err(|e| ConditionalError::InvalidPattern {
            field: field.to_owned(),
            pattern,
            detail: e.to_string(),
        })
}
