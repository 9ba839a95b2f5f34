//! Decoded native call arguments handed to the classifier.
//!
//! The host decodes each interception point's arguments into one variant of
//! [`CallArguments`]; the classifier matches on the variant instead of probing
//! types at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::document::{keys, Document};

/// Free-form keyword/value pairs attached to most native inputs.
pub type CondInput = BTreeMap<String, String>;

/// Open flag: write only.
pub const O_WRONLY: i32 = 0o1;
/// Open flag: read/write.
pub const O_RDWR: i32 = 0o2;
/// Open flag: create.
pub const O_CREAT: i32 = 0o100;
/// Open flag: truncate.
pub const O_TRUNC: i32 = 0o1000;
/// Operation type marking an unregistration.
pub const UNREG_OPR: i32 = 26;

/// Whether open flags request write access.
pub fn has_write_flag(open_flags: i32) -> bool {
    open_flags & (O_WRONLY | O_RDWR) != 0
}

/// Whether open flags request truncation.
pub fn has_truncate_flag(open_flags: i32) -> bool {
    open_flags & O_TRUNC != 0
}

/// Data-object input shared by put, get, open, unlink and friends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataObjInput {
    /// Logical path of the object.
    pub obj_path: String,
    /// Creation mode bits.
    pub create_mode: i32,
    /// POSIX-style open flags.
    pub open_flags: i32,
    /// Byte offset.
    pub offset: i64,
    /// Object size in bytes.
    pub data_size: i64,
    /// Requested transfer threads.
    pub num_threads: i32,
    /// Native operation type.
    pub opr_type: i32,
    /// Keyword/value options.
    pub cond_input: CondInput,
}

impl DataObjInput {
    /// Input naming only a logical path.
    pub fn for_path(obj_path: impl Into<String>) -> Self {
        Self {
            obj_path: obj_path.into(),
            ..Self::default()
        }
    }

    /// Record fields; numeric fields are rendered as text.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("obj_path".into(), json!(self.obj_path));
        doc.insert(keys::LOGICAL_PATH.into(), json!(self.obj_path));
        doc.insert("create_mode".into(), json!(self.create_mode.to_string()));
        doc.insert("open_flags".into(), json!(self.open_flags.to_string()));
        doc.insert("offset".into(), json!(self.offset.to_string()));
        doc.insert("data_size".into(), json!(self.data_size.to_string()));
        doc.insert("num_threads".into(), json!(self.num_threads.to_string()));
        doc.insert("opr_type".into(), json!(self.opr_type.to_string()));
        doc.insert(keys::COND_INPUT.into(), cond_input_value(&self.cond_input));
        doc
    }
}

/// Input addressing an already-open object by handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenedDataObjInput {
    /// Descriptor handle allocated at open.
    pub l1_desc_inx: u32,
    /// Byte count.
    pub len: i32,
    /// Seek origin.
    pub whence: i32,
    /// Native operation type.
    pub opr_type: i32,
    /// Byte offset.
    pub offset: i64,
    /// Bytes written so far.
    pub bytes_written: i64,
    /// Keyword/value options.
    pub cond_input: CondInput,
}

/// Collection create/remove input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionInput {
    /// Logical path of the collection.
    pub coll_name: String,
    /// Native flags.
    pub flags: i32,
    /// Native operation type.
    pub opr_type: i32,
    /// Keyword/value options.
    pub cond_input: CondInput,
}

impl CollectionInput {
    /// Record fields.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("coll_name".into(), json!(self.coll_name));
        doc.insert(keys::LOGICAL_PATH.into(), json!(self.coll_name));
        doc.insert("flags".into(), json!(self.flags.to_string()));
        doc.insert("opr_type".into(), json!(self.opr_type.to_string()));
        doc.insert(keys::COND_INPUT.into(), cond_input_value(&self.cond_input));
        doc
    }
}

/// Metadata modification input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModAvuInput {
    /// `add`, `set`, `rm` and so on.
    pub operation: String,
    /// Entity option: `-d`, `-C`, `-u` or `-R`.
    pub entity_option: String,
    /// Logical path or name of the entity.
    pub entity: String,
    /// Attribute name.
    pub attribute: String,
    /// Value.
    pub value: String,
    /// Units.
    pub units: String,
}

/// General administration input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralAdminInput {
    /// `add`, `modify` or `rm`.
    pub operation: String,
    /// `user`, `resource` or `zone`.
    pub target: String,
    /// Name of the target entity.
    pub name: String,
    /// Remaining positional arguments.
    pub arguments: Vec<String>,
}

/// Arguments of one interception-point call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallArguments {
    /// Plain data-object input.
    DataObj {
        /// Decoded input.
        input: DataObjInput,
    },
    /// Open or create; the host supplies the handle once allocated.
    Open {
        /// Decoded input.
        input: DataObjInput,
        /// Descriptor handle, present once the object is open.
        #[serde(default)]
        handle: Option<u32>,
    },
    /// Close or seek on an open handle.
    Descriptor {
        /// Decoded input.
        input: OpenedDataObjInput,
    },
    /// Replica close; the payload is a JSON document `{"fd": N}`.
    ReplicaClose {
        /// Raw payload text.
        payload: String,
    },
    /// Copy or rename.
    Copy {
        /// Source object.
        source: DataObjInput,
        /// Destination object.
        destination: DataObjInput,
    },
    /// Bulk upload of many objects.
    BulkPut {
        /// Logical path of each object.
        logical_paths: Vec<String>,
        /// Cumulative end offset of each object in the bulk buffer.
        offsets: Vec<i64>,
        /// Keyword/value options shared by every object.
        #[serde(default)]
        cond_input: CondInput,
    },
    /// Resource hierarchy resolution.
    HierarchyResolution {
        /// Resolved operation, e.g. `CREATE` or `OPEN`.
        operation: String,
    },
    /// Collection create/remove.
    Collection {
        /// Decoded input.
        input: CollectionInput,
    },
    /// Metadata modification.
    ModAvu {
        /// Decoded input.
        input: ModAvuInput,
    },
    /// General administration.
    GeneralAdmin {
        /// Decoded input.
        input: GeneralAdminInput,
    },
}

impl CallArguments {
    /// Short variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataObj { .. } => "data_obj",
            Self::Open { .. } => "open",
            Self::Descriptor { .. } => "descriptor",
            Self::ReplicaClose { .. } => "replica_close",
            Self::Copy { .. } => "copy",
            Self::BulkPut { .. } => "bulk_put",
            Self::HierarchyResolution { .. } => "hierarchy_resolution",
            Self::Collection { .. } => "collection",
            Self::ModAvu { .. } => "mod_avu",
            Self::GeneralAdmin { .. } => "general_admin",
        }
    }
}

fn cond_input_value(cond_input: &CondInput) -> Value {
    Value::Object(
        cond_input
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
