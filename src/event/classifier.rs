//! Translate interception-point calls into canonical events.
//!
//! [`classify`] returns zero or more [`ClassifiedEvent`]s per call. An empty
//! result means nothing should be dispatched for this call, either because the
//! call only updates correlation state (hierarchy resolution, plain opens) or
//! because the operation is of no interest (unknown admin targets).

use serde_json::{json, Value};
use tracing::debug;

use super::arguments::{
    has_truncate_flag, has_write_flag, CallArguments, DataObjInput, UNREG_OPR,
};
use super::session::SessionContext;
use super::{Event, EventRecord, InterceptionPoint, Phase};
use crate::document::{capture_parameters, keys, ResourceTag};
use crate::error::ErrorCode;
use crate::services::EntityType;

/// One event ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    /// Canonical event.
    pub event: Event,
    /// Record handed to the dispatcher.
    pub record: EventRecord,
}

impl ClassifiedEvent {
    fn new(event: Event, record: EventRecord) -> Self {
        Self { event, record }
    }
}

/// Errors raised while classifying a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// The name has no `_<phase>` suffix.
    #[error("interception point [{0}] is not of the form <operation>_<phase>")]
    MalformedName(String),
    /// No handler or table entry for the base operation.
    #[error("interception point [{pep}] is not supported")]
    UnsupportedInterceptionPoint {
        /// Raw interception-point name.
        pep: String,
    },
    /// The host passed a different argument variant than the operation takes.
    #[error("interception point [{pep}] expects {expected} arguments, got {actual}")]
    UnexpectedArguments {
        /// Raw interception-point name.
        pep: String,
        /// Expected variant.
        expected: &'static str,
        /// Variant received.
        actual: &'static str,
    },
    /// A close or seek named a handle with no record in flight.
    #[error("no record in flight for handle {handle} at [{pep}]")]
    UnknownHandle {
        /// Raw interception-point name.
        pep: String,
        /// Descriptor handle.
        handle: u32,
    },
    /// A close arrived before any hierarchy resolution in this session.
    #[error("no hierarchy resolution recorded before [{pep}]")]
    MissingHierarchyOperation {
        /// Raw interception-point name.
        pep: String,
    },
    /// An argument was present but unusable.
    #[error("invalid argument at [{pep}]: {message}")]
    InvalidArgument {
        /// Raw interception-point name.
        pep: String,
        /// What was wrong.
        message: String,
    },
}

impl ClassifierError {
    /// Stable status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedInterceptionPoint { .. } => ErrorCode::UnsupportedInterceptionPoint,
            _ => ErrorCode::InvalidInputParam,
        }
    }
}

/// Static base-operation table.
pub fn table_event(base: &str) -> Option<Event> {
    let event = match base {
        "bulk_data_obj_put" => Event::Create,
        "data_obj_chksum" => Event::Checksum,
        "data_obj_copy" => Event::Copy,
        "data_obj_create_and_stat" => Event::Create,
        "data_obj_create" => Event::Create,
        "data_obj_get" => Event::Get,
        "data_obj_lseek" => Event::Seek,
        "data_obj_phymv" => Event::Replication,
        "data_obj_put" => Event::Put,
        "data_obj_rename" => Event::Rename,
        "data_obj_repl" => Event::Replication,
        "data_obj_trim" => Event::Trim,
        "data_obj_truncate" => Event::Truncate,
        "data_obj_unlink" => Event::Unlink,
        "phy_path_reg" => Event::Register,
        "coll_create" => Event::Create,
        "rm_coll" => Event::Remove,
        "mod_avu_metadata" => Event::Metadata,
        _ => return None,
    };
    Some(event)
}

/// Event reported at close, from the session's hierarchy operation and the
/// open flags recorded at open time.
pub fn resolve_close_event(operation: &str, open_flags: i32) -> Option<Event> {
    match operation.to_ascii_uppercase().as_str() {
        "CREATE" => Some(Event::Put),
        "OPEN" if has_write_flag(open_flags) => Some(Event::Write),
        "OPEN" => Some(Event::Get),
        other => other.parse().ok(),
    }
}

/// Per-object sizes from cumulative bulk-upload offsets.
///
/// `None` when an offset decreases (or the first one is negative).
pub fn bulk_put_sizes(offsets: &[i64]) -> Option<Vec<i64>> {
    let mut previous = 0_i64;
    let mut sizes = Vec::with_capacity(offsets.len());
    for &offset in offsets {
        let size = offset.checked_sub(previous).filter(|s| *s >= 0)?;
        sizes.push(size);
        previous = offset;
    }
    Some(sizes)
}

/// Classify one interception-point call for a session.
pub fn classify(
    session: &mut SessionContext,
    pep: &str,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let point = InterceptionPoint::parse(pep)
        .ok_or_else(|| ClassifierError::MalformedName(pep.to_owned()))?;

    let mut classified = match point.base.as_str() {
        "resolve_hierarchy" => hierarchy_resolution(session, &point, arguments)?,
        "data_obj_open" | "data_obj_create" | "data_obj_create_and_stat" | "replica_open" => {
            open(session, &point, arguments)?
        }
        "data_obj_close" | "replica_close" => close(session, &point, arguments)?,
        "data_obj_lseek" => seek(session, &point, arguments)?,
        "bulk_data_obj_put" => bulk_put(&point, arguments)?,
        "data_obj_copy" | "data_obj_rename" => copy_rename(&point, arguments)?,
        "coll_create" | "rm_coll" => collection(&point, arguments)?,
        "mod_avu_metadata" => metadata(&point, arguments)?,
        "general_admin" => general_admin(&point, arguments)?,
        base => match table_event(base) {
            Some(event) => data_object(&point, event, arguments)?,
            None => {
                return Err(ClassifierError::UnsupportedInterceptionPoint {
                    pep: pep.to_owned(),
                })
            }
        },
    };

    for item in &mut classified {
        decorate(item, session, pep);
    }

    debug!(
        session = %session.id(),
        pep,
        events = classified.len(),
        "classified interception point"
    );
    Ok(classified)
}

fn decorate(item: &mut ClassifiedEvent, session: &SessionContext, pep: &str) {
    let record = &mut item.record;
    record.stamp(item.event, pep);
    record.insert(keys::COMM, session.client().to_comm());
    record.insert_if_empty(keys::USER_NAME, &session.client().user_name);

    let captured = capture_parameters(&record.to_value(), ResourceTag::First);
    record.insert_if_empty(keys::SOURCE_RESOURCE, &captured.source_resource);
    record.insert_if_empty(keys::DESTINATION_RESOURCE, &captured.destination_resource);
}

fn unexpected(
    point: &InterceptionPoint,
    expected: &'static str,
    actual: &CallArguments,
) -> ClassifierError {
    ClassifierError::UnexpectedArguments {
        pep: point.name.clone(),
        expected,
        actual: actual.kind(),
    }
}

fn invalid(point: &InterceptionPoint, message: impl Into<String>) -> ClassifierError {
    ClassifierError::InvalidArgument {
        pep: point.name.clone(),
        message: message.into(),
    }
}

fn object_record(input: &DataObjInput) -> EventRecord {
    EventRecord::from_document(input.to_document())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn hierarchy_resolution(
    session: &mut SessionContext,
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::HierarchyResolution { operation } = arguments else {
        return Err(unexpected(point, "hierarchy_resolution", arguments));
    };
    session.set_hierarchy_operation(operation.trim());
    Ok(Vec::new())
}

fn open(
    session: &mut SessionContext,
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let (input, handle) = match arguments {
        CallArguments::Open { input, handle } => (input, *handle),
        CallArguments::DataObj { input } => (input, None),
        other => return Err(unexpected(point, "open", other)),
    };

    let record = object_record(input);
    if let Some(handle) = handle {
        session.track(handle, record.clone());
    }

    if has_truncate_flag(input.open_flags) {
        return Ok(vec![ClassifiedEvent::new(Event::Truncate, record)]);
    }
    Ok(Vec::new())
}

fn descriptor_handle(
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<u32, ClassifierError> {
    match arguments {
        CallArguments::Descriptor { input } => Ok(input.l1_desc_inx),
        CallArguments::ReplicaClose { payload } => {
            let doc: Value = serde_json::from_str(payload)
                .map_err(|e| invalid(point, format!("replica close payload is not JSON: {e}")))?;
            doc.get("fd")
                .and_then(Value::as_u64)
                .and_then(|fd| u32::try_from(fd).ok())
                .ok_or_else(|| invalid(point, "replica close payload has no usable \"fd\""))
        }
        other => Err(unexpected(point, "descriptor", other)),
    }
}

fn missing_handle(
    point: &InterceptionPoint,
    handle: u32,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    if point.phase == Phase::Finally {
        debug!(pep = %point.name, handle, "handle already released, skipping");
        return Ok(Vec::new());
    }
    Err(ClassifierError::UnknownHandle {
        pep: point.name.clone(),
        handle,
    })
}

fn close(
    session: &mut SessionContext,
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let handle = descriptor_handle(point, arguments)?;
    let operation = session.hierarchy_operation().map(str::to_owned);

    let record = match point.phase {
        Phase::Post | Phase::Except => session.release(handle),
        Phase::Pre | Phase::Finally => session.peek(handle).cloned(),
    };
    let Some(record) = record else {
        return missing_handle(point, handle);
    };

    let operation = operation.ok_or_else(|| ClassifierError::MissingHierarchyOperation {
        pep: point.name.clone(),
    })?;
    let open_flags: i32 = record.field("open_flags").parse().unwrap_or_default();
    let event = resolve_close_event(&operation, open_flags)
        .ok_or_else(|| invalid(point, format!("unknown hierarchy operation [{operation}]")))?;

    let mut classified = vec![ClassifiedEvent::new(event, record.clone())];
    if has_truncate_flag(open_flags) {
        classified.push(ClassifiedEvent::new(Event::Truncate, record));
    }
    Ok(classified)
}

fn seek(
    session: &mut SessionContext,
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let handle = descriptor_handle(point, arguments)?;
    match session.peek(handle) {
        Some(record) => Ok(vec![ClassifiedEvent::new(Event::Seek, record.clone())]),
        None => missing_handle(point, handle),
    }
}

fn bulk_put(
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::BulkPut {
        logical_paths,
        offsets,
        cond_input,
    } = arguments
    else {
        return Err(unexpected(point, "bulk_put", arguments));
    };

    if logical_paths.len() != offsets.len() {
        return Err(invalid(
            point,
            format!(
                "{} logical paths but {} offsets",
                logical_paths.len(),
                offsets.len()
            ),
        ));
    }
    let sizes = bulk_put_sizes(offsets)
        .ok_or_else(|| invalid(point, "bulk offsets must not decrease"))?;

    Ok(logical_paths
        .iter()
        .zip(sizes)
        .map(|(path, data_size)| {
            let input = DataObjInput {
                obj_path: path.clone(),
                data_size,
                cond_input: cond_input.clone(),
                ..DataObjInput::default()
            };
            ClassifiedEvent::new(Event::Create, object_record(&input))
        })
        .collect())
}

fn copy_rename(
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::Copy {
        source,
        destination,
    } = arguments
    else {
        return Err(unexpected(point, "copy", arguments));
    };

    if point.base == "data_obj_rename" {
        let input = if point.phase == Phase::Pre {
            source
        } else {
            destination
        };
        return Ok(vec![ClassifiedEvent::new(Event::Rename, object_record(input))]);
    }

    Ok(vec![
        ClassifiedEvent::new(Event::Copy, object_record(source)),
        ClassifiedEvent::new(Event::Copy, object_record(destination)),
    ])
}

fn data_object(
    point: &InterceptionPoint,
    event: Event,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::DataObj { input } = arguments else {
        return Err(unexpected(point, "data_obj", arguments));
    };
    let event = if input.opr_type == UNREG_OPR {
        Event::Unregister
    } else {
        event
    };
    Ok(vec![ClassifiedEvent::new(event, object_record(input))])
}

fn collection(
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::Collection { input } = arguments else {
        return Err(unexpected(point, "collection", arguments));
    };
    let event = table_event(&point.base).ok_or_else(|| {
        ClassifierError::UnsupportedInterceptionPoint {
            pep: point.name.clone(),
        }
    })?;
    Ok(vec![ClassifiedEvent::new(
        event,
        EventRecord::from_document(input.to_document()),
    )])
}

fn metadata(
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::ModAvu { input } = arguments else {
        return Err(unexpected(point, "mod_avu", arguments));
    };
    let entity_type = EntityType::from_option(&input.entity_option).ok_or_else(|| {
        invalid(
            point,
            format!("unknown entity option [{}]", input.entity_option),
        )
    })?;

    let key = match entity_type {
        EntityType::DataObject | EntityType::Collection => keys::LOGICAL_PATH,
        EntityType::User => keys::USER_NAME,
        EntityType::Resource => keys::SOURCE_RESOURCE,
    };

    let mut record = EventRecord::default();
    record.insert(key, input.entity.as_str());
    record.insert(
        keys::METADATA,
        json!({
            "entity_type": entity_type.as_str(),
            "operation": input.operation,
            "entity": input.entity,
            "attribute": input.attribute,
            "value": input.value,
            "units": input.units,
        }),
    );
    Ok(vec![ClassifiedEvent::new(Event::Metadata, record)])
}

fn general_admin(
    point: &InterceptionPoint,
    arguments: &CallArguments,
) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
    let CallArguments::GeneralAdmin { input } = arguments else {
        return Err(unexpected(point, "general_admin", arguments));
    };

    let event = match input.operation.as_str() {
        "add" => Event::Create,
        "modify" => Event::Modify,
        "rm" => Event::Remove,
        other => {
            debug!(pep = %point.name, operation = other, "ignoring admin operation");
            return Ok(Vec::new());
        }
    };
    let key = match input.target.as_str() {
        "user" => keys::USER_NAME,
        "resource" => keys::SOURCE_RESOURCE,
        "zone" => "zone",
        other => {
            debug!(pep = %point.name, target = other, "ignoring admin target");
            return Ok(Vec::new());
        }
    };

    let mut record = EventRecord::default();
    record.insert("operation", input.operation.as_str());
    record.insert("target", input.target.as_str());
    record.insert("arguments", json!(input.arguments));
    record.insert(key, input.name.as_str());
    Ok(vec![ClassifiedEvent::new(event, record)])
}
