//! Helpers over the open JSON documents that carry parameters and configuration.
//!
//! Parameters and configuration stay sparse `serde_json` objects. The
//! functions here are the only places that know the well-known keys and the
//! fallbacks between them.

use serde_json::{Map, Value};

/// An open JSON object.
pub type Document = Map<String, Value>;

/// Well-known document keys.
pub mod keys {
    /// Canonical event name.
    pub const EVENT: &str = "event";
    /// Raw interception-point name.
    pub const POLICY_ENFORCEMENT_POINT: &str = "policy_enforcement_point";
    /// Logical path of the object or collection.
    pub const LOGICAL_PATH: &str = "logical_path";
    /// Acting user.
    pub const USER_NAME: &str = "user_name";
    /// Source resource name.
    pub const SOURCE_RESOURCE: &str = "source_resource";
    /// Destination resource name.
    pub const DESTINATION_RESOURCE: &str = "destination_resource";
    /// Metadata sub-document.
    pub const METADATA: &str = "metadata";
    /// Conditional that selected the invocation.
    pub const CONDITIONAL: &str = "conditional";
    /// Free-form keyword/value input from the native call.
    pub const COND_INPUT: &str = "cond_input";
    /// Client/session description.
    pub const COMM: &str = "comm";
    /// Row injected by the query iterator.
    pub const QUERY_RESULTS: &str = "query_results";
    /// Nested parameter document.
    pub const PARAMETERS: &str = "parameters";
    /// Nested configuration document.
    pub const CONFIGURATION: &str = "configuration";
    /// Chained policies for iterators, generators and delegates.
    pub const POLICIES_TO_INVOKE: &str = "policies_to_invoke";
    /// Entity type inside a metadata sub-document.
    pub const ENTITY_TYPE: &str = "entity_type";
}

/// `cond_input` keyword naming the source resource.
const RESC_NAME_KW: &str = "resc_name";
/// `cond_input` keyword naming the source hierarchy.
const RESC_HIER_KW: &str = "resc_hier";
/// `cond_input` keyword naming the destination resource.
const DEST_RESC_NAME_KW: &str = "dest_resc_name";
/// `cond_input` keyword naming the destination hierarchy.
const DEST_RESC_HIER_KW: &str = "dest_resc_hier";
/// Hierarchy separator, root first.
const HIERARCHY_DELIMITER: char = ';';

/// Read a string field; numbers and booleans are rendered as text.
pub fn string_field(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a non-empty string field.
pub fn non_empty_field(doc: &Value, key: &str) -> Option<String> {
    string_field(doc, key).filter(|s| !s.is_empty())
}

/// Read an integer field given as a number or as numeric text.
pub fn integer_field(doc: &Value, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a flag given as a boolean or as the text `"true"`.
pub fn flag_field(doc: &Value, key: &str) -> bool {
    match doc.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Clone an object field, or return an empty document.
pub fn object_field(doc: &Value, key: &str) -> Document {
    doc.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Copy `top` over `base`; keys in `top` win.
pub fn overlay(base: Option<&Value>, top: &Document) -> Document {
    let mut merged = base.and_then(Value::as_object).cloned().unwrap_or_default();
    for (k, v) in top {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Insert keys from `from` that `target` does not already have.
pub fn fill_missing(target: &mut Document, from: &Document) {
    for (k, v) in from {
        if !target.contains_key(k) {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Whether the verbose `log_errors` flag is set in parameters or configuration.
pub fn log_errors_enabled(parameters: &Value, configuration: &Value) -> bool {
    flag_field(parameters, "log_errors") || flag_field(configuration, "log_errors")
}

// ---------------------------------------------------------------------------
// Parameter capture
// ---------------------------------------------------------------------------

/// Which end of a `;`-separated resource hierarchy names the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceTag {
    /// The root of the hierarchy.
    First,
    /// The leaf of the hierarchy.
    Last,
}

/// The four values nearly every policy needs, resolved from a parameter document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedParameters {
    /// Acting user; falls back to the session's client user.
    pub user_name: String,
    /// Logical path; falls back to the native `obj_path`.
    pub logical_path: String,
    /// Source resource; falls back to `cond_input` hierarchy or name.
    pub source_resource: String,
    /// Destination resource; falls back to `cond_input` hierarchy or name.
    pub destination_resource: String,
}

/// Resolve user, path and resources from an event record or direct-call parameters.
pub fn capture_parameters(parameters: &Value, tag: ResourceTag) -> CapturedParameters {
    let cond_input = parameters
        .get(keys::COND_INPUT)
        .cloned()
        .unwrap_or(Value::Null);

    let user_name = non_empty_field(parameters, keys::USER_NAME)
        .or_else(|| {
            parameters
                .get(keys::COMM)
                .and_then(|c| non_empty_field(c, keys::USER_NAME))
        })
        .unwrap_or_default();

    let logical_path = non_empty_field(parameters, keys::LOGICAL_PATH)
        .or_else(|| non_empty_field(parameters, "obj_path"))
        .unwrap_or_default();

    let source_resource = non_empty_field(parameters, keys::SOURCE_RESOURCE)
        .or_else(|| non_empty_field(&cond_input, RESC_HIER_KW).map(|h| pick_resource(&h, tag)))
        .or_else(|| non_empty_field(&cond_input, RESC_NAME_KW))
        .unwrap_or_default();

    let destination_resource = non_empty_field(parameters, keys::DESTINATION_RESOURCE)
        .or_else(|| {
            non_empty_field(&cond_input, DEST_RESC_HIER_KW).map(|h| pick_resource(&h, tag))
        })
        .or_else(|| non_empty_field(&cond_input, DEST_RESC_NAME_KW))
        .unwrap_or_default();

    CapturedParameters {
        user_name,
        logical_path,
        source_resource,
        destination_resource,
    }
}

/// Pick the root or the leaf out of a resource hierarchy string.
pub fn pick_resource(hierarchy: &str, tag: ResourceTag) -> String {
    let mut parts = hierarchy.split(HIERARCHY_DELIMITER).filter(|p| !p.is_empty());
    let picked = match tag {
        ResourceTag::First => parts.next(),
        ResourceTag::Last => parts.last(),
    };
    picked.unwrap_or_default().to_owned()
}

// ---------------------------------------------------------------------------
// Logical paths
// ---------------------------------------------------------------------------

/// Split a logical path into `(collection, data_name)`.
///
/// `/zone/home/a.txt` becomes `("/zone/home", "a.txt")`; an object directly
/// under the root keeps `/` as its collection.
pub fn split_logical_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/".to_owned(), name.to_owned()),
        Some((coll, name)) => (coll.to_owned(), name.to_owned()),
        None => (String::new(), trimmed.to_owned()),
    }
}

/// Join a collection and a data name into a logical path.
pub fn join_logical_path(collection: &str, data_name: &str) -> String {
    if collection.ends_with('/') {
        format!("{collection}{data_name}")
    } else {
        format!("{collection}/{data_name}")
    }
}

/// Parent collection of a logical path, or `None` at the root.
pub fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let (parent, _) = split_logical_path(trimmed);
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}
