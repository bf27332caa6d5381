/*!
 * Shared types for the remote-inventory access layer
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque, comparable handle to a server-side object.
///
/// Refs are supplied by the server and are only meaningful for the lifetime
/// of the session that produced them. They are cheap to clone and are used
/// as map keys and as components of cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Server-side type name (e.g. "VirtualMachine", "Folder", "Task")
    pub kind: String,
    /// Server-assigned identifier, unique within the kind
    pub id: String,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        ObjectRef {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// True if this ref names an object of the given server-side type
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A property value as returned by the server.
///
/// `Ref` is a live remote handle: conversions that walk value graphs must
/// treat it as opaque and stop recursing, since following handles would
/// turn a bounded fetch result into an unbounded graph walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
    Ref(ObjectRef),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ref_handle(&self) -> Option<&ObjectRef> {
        match self {
            PropValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, PropValue>> {
        match self {
            PropValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropValue::Null)
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Str(s)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        PropValue::Int(n)
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        PropValue::Float(n)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

impl From<ObjectRef> for PropValue {
    fn from(r: ObjectRef) -> Self {
        PropValue::Ref(r)
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(b) => write!(f, "{}", b),
            PropValue::Int(n) => write!(f, "{}", n),
            PropValue::Float(n) => write!(f, "{}", n),
            PropValue::Str(s) => write!(f, "{}", s),
            PropValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            PropValue::Map(m) => write!(f, "{{{} entries}}", m.len()),
            PropValue::Ref(r) => write!(f, "{}", r),
        }
    }
}

/// One `(property path, value)` entry from a fetch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRecord {
    pub name: String,
    pub value: PropValue,
}

impl PropRecord {
    pub fn new(name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        PropRecord {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// All properties fetched for one object: the raw wire shape of a query row.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectContent {
    pub obj: ObjectRef,
    pub props: Vec<PropRecord>,
}

impl ObjectContent {
    pub fn new(obj: ObjectRef, props: Vec<PropRecord>) -> Self {
        ObjectContent { obj, props }
    }

    /// Look up a single property by its requested path
    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        propset_get(&self.props, name)
    }
}

/// Find the value for `name` in a list of property records.
pub fn propset_get<'a>(propset: &'a [PropRecord], name: &str) -> Option<&'a PropValue> {
    propset.iter().find(|p| p.name == name).map(|p| &p.value)
}

/// Collect a propset into a name-keyed map. Later entries win on duplicate
/// names, matching server behaviour for refreshed properties.
pub fn propset_to_map(propset: &[PropRecord]) -> BTreeMap<String, PropValue> {
    propset
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

/// Look up a value in a list of key/value option records.
///
/// Several server-side collections (extra-config options, custom values)
/// arrive as lists of maps each carrying `key` and `value` entries; this
/// pulls out the value for one key.
pub fn option_get<'a>(options: &'a [PropValue], key: &str) -> Option<&'a PropValue> {
    options.iter().find_map(|item| {
        let map = item.as_map()?;
        if map.get("key")?.as_str()? == key {
            map.get("value")
        } else {
            None
        }
    })
}

/// How a property changed, as reported by the update feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Assign,
    Add,
    Remove,
    IndirectRemove,
}

/// One property change delivered by the long-poll update feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub obj: ObjectRef,
    pub name: String,
    pub value: Option<PropValue>,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn assign(obj: ObjectRef, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        ChangeRecord {
            obj,
            name: name.into(),
            value: Some(value.into()),
            kind: ChangeKind::Assign,
        }
    }
}

/// One response from the update feed: a batch of changes plus the version
/// cursor to present on the next request.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    pub version: String,
    pub changes: Vec<ChangeRecord>,
}

/// Server-side state of an asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    /// Parse the wire form of a task state. Unknown strings map to `None`
    /// rather than an error so new server states degrade gracefully.
    pub fn parse(s: &str) -> Option<TaskState> {
        match s {
            "queued" => Some(TaskState::Queued),
            "running" => Some(TaskState::Running),
            "success" => Some(TaskState::Success),
            "error" => Some(TaskState::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

/// Final outcome of one awaited operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task: ObjectRef,
    /// Name of the entity the operation ran against, when known
    pub entity: Option<String>,
    pub state: TaskState,
    /// Server-provided failure message, present only for failed tasks
    pub message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Success
    }
}

/// Summary of a `wait_for_completion` call: per-task outcomes in the order
/// the server reported them done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl CompletionReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.succeeded())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// Filter evaluation mode for two-phase queries.
///
/// `All` requires every filtered path to match its allowed-value set;
/// `Any` accepts an object as soon as one path matches. Both exist because
/// some server properties compose by intersection and others by union;
/// callers pick explicitly rather than the engine guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}
