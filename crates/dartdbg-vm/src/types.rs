//! Typed views of VM service protocol objects.
//!
//! Only the fields the debug bridge reads are modelled. Everything is
//! deserialized leniently: unknown fields are ignored and most fields are
//! optional, since their presence varies between VM versions.

use serde::Deserialize;
use serde_json::Value;

use crate::error::VmError;

/// `@Isolate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolateRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub is_system_isolate: bool,
}

/// `VM`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    #[serde(default)]
    pub isolates: Vec<IsolateRef>,
}

/// `Isolate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Isolate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub runnable: bool,
    #[serde(default)]
    pub pause_event: Option<VmEvent>,
    #[serde(default)]
    pub root_lib: Option<LibraryRef>,
    #[serde(default)]
    pub libraries: Vec<LibraryRef>,
}

/// `@Library`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LibraryRef {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub name: String,
}

/// `@Script`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptRef {
    pub id: String,
    pub uri: String,
}

/// `Script`. The token position table maps token positions to lines:
/// each row is `[line, tokenPos, column, tokenPos, column, ...]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub token_pos_table: Option<Vec<Vec<i64>>>,
}

impl Script {
    /// Resolve a token position to `(line, column)` using the table.
    pub fn line_and_column(&self, token_pos: i64) -> Option<(i64, i64)> {
        let table = self.token_pos_table.as_ref()?;
        for row in table {
            let Some((&line, rest)) = row.split_first() else {
                continue;
            };
            for pair in rest.chunks(2) {
                if let [pos, column] = pair {
                    if *pos == token_pos {
                        return Some((line, *column));
                    }
                }
            }
        }
        None
    }
}

/// `SourceLocation`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub script: ScriptRef,
    #[serde(default)]
    pub token_pos: Option<i64>,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub column: Option<i64>,
}

/// `@Function`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuncRef {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "_kind", alias = "kind")]
    pub kind: Option<String>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub is_getter: bool,
    /// The enclosing class, library or function.
    #[serde(default)]
    pub owner: Option<Value>,
}

impl FuncRef {
    /// Name of the owning class, when the owner is a class.
    pub fn owner_class_name(&self) -> Option<&str> {
        let owner = self.owner.as_ref()?;
        match owner.get("type").and_then(Value::as_str) {
            Some("@Class") | Some("Class") => owner.get("name").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// `@Code`.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeRef {
    #[serde(default)]
    pub name: String,
}

/// A variable in a frame's scope.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundVariable {
    pub name: String,
    /// Usually an `@Instance`, but may be a `Sentinel` or `@TypeArguments`.
    pub value: Value,
}

impl BoundVariable {
    /// The value's `type` tag (`@Instance`, `@TypeArguments`, `Sentinel`).
    pub fn value_type(&self) -> Option<&str> {
        self.value.get("type").and_then(Value::as_str)
    }

    /// The value as an instance reference, if it is one.
    pub fn instance(&self) -> Option<InstanceRef> {
        match self.value_type() {
            Some("@Instance") | Some("Instance") | Some("@Null") | Some("Null") => {
                serde_json::from_value(self.value.clone()).ok()
            }
            _ => None,
        }
    }
}

/// `Frame`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default)]
    pub index: i64,
    /// `Regular`, `AsyncCausal`, `AsyncSuspensionMarker`, `AsyncActivation`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub function: Option<FuncRef>,
    #[serde(default)]
    pub code: Option<CodeRef>,
    #[serde(default)]
    pub location: Option<SourceLocation>,
    #[serde(default)]
    pub vars: Vec<BoundVariable>,
}

impl Frame {
    pub fn is_async_suspension_marker(&self) -> bool {
        self.kind.as_deref() == Some("AsyncSuspensionMarker")
    }

    /// A display name: `Class.method` when owned by a class.
    pub fn display_name(&self) -> String {
        if let Some(function) = &self.function {
            return match function.owner_class_name() {
                Some(class) => format!("{class}.{}", function.name),
                None => function.name.clone(),
            };
        }
        match &self.code {
            Some(code) if !code.name.is_empty() => code.name.clone(),
            _ => "<unknown>".to_string(),
        }
    }
}

/// `Stack`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    /// Async-aware frames, including `AsyncSuspensionMarker`s, indexed the
    /// way `evaluateInFrame` expects.
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub truncated: bool,
}

/// `@Class`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// `Class`.
#[derive(Debug, Clone, Deserialize)]
pub struct Class {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub functions: Vec<FuncRef>,
    #[serde(default, rename = "super")]
    pub super_class: Option<ClassRef>,
    #[serde(default)]
    pub library: Option<LibraryRef>,
}

/// The closed set of instance kinds the formatter distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceKind {
    Null,
    Bool,
    Int,
    Double,
    String,
    List,
    Map,
    Set,
    Record,
    PlainInstance,
    Closure,
    Type,
    TypeParameter,
    /// `Uint8List`, `Float64List`, and the other typed-data kinds.
    TypedData(std::string::String),
    Other(std::string::String),
}

impl From<std::string::String> for InstanceKind {
    fn from(kind: std::string::String) -> Self {
        match kind.as_str() {
            "Null" => InstanceKind::Null,
            "Bool" => InstanceKind::Bool,
            "Int" => InstanceKind::Int,
            "Double" => InstanceKind::Double,
            "String" => InstanceKind::String,
            "List" => InstanceKind::List,
            "Map" => InstanceKind::Map,
            "Set" => InstanceKind::Set,
            "Record" => InstanceKind::Record,
            "PlainInstance" => InstanceKind::PlainInstance,
            "Closure" => InstanceKind::Closure,
            "Type" => InstanceKind::Type,
            "TypeParameter" => InstanceKind::TypeParameter,
            k if k.ends_with("List") => InstanceKind::TypedData(kind),
            _ => InstanceKind::Other(kind),
        }
    }
}

impl<'de> Deserialize<'de> for InstanceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        std::string::String::deserialize(deserializer).map(InstanceKind::from)
    }
}

impl InstanceKind {
    /// Kinds indexed by position.
    pub fn is_list_like(&self) -> bool {
        matches!(self, InstanceKind::List | InstanceKind::TypedData(_))
    }
}

fn default_kind() -> InstanceKind {
    InstanceKind::Other("Unknown".into())
}

/// `@Instance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: InstanceKind,
    #[serde(default, rename = "class")]
    pub class_ref: Option<ClassRef>,
    #[serde(default)]
    pub value_as_string: Option<String>,
    #[serde(default)]
    pub value_as_string_is_truncated: bool,
    #[serde(default)]
    pub length: Option<i64>,
    /// Set for `Type` and `Closure` instances.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub closure_function: Option<FuncRef>,
}

impl InstanceRef {
    pub fn class_name(&self) -> &str {
        self.class_ref
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("Object")
    }

    /// A `Null` instance, used for synthesized children.
    pub fn null() -> Self {
        Self {
            id: None,
            kind: InstanceKind::Null,
            class_ref: None,
            value_as_string: Some("null".into()),
            value_as_string_is_truncated: false,
            length: None,
            name: None,
            closure_function: None,
        }
    }
}

/// A field slot of an `Instance`.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundField {
    #[serde(default)]
    pub decl: Option<FieldRef>,
    /// Record fields carry a name (string) or position (int) instead of a decl.
    #[serde(default)]
    pub name: Option<Value>,
    pub value: Value,
}

impl BoundField {
    pub fn field_name(&self) -> String {
        if let Some(decl) = &self.decl {
            return decl.name.clone();
        }
        match &self.name {
            Some(Value::String(s)) => s.clone(),
            // Positional record fields are 0-based on the wire, `$1`-based in Dart.
            Some(Value::Number(n)) => match n.as_u64() {
                Some(index) => format!("${}", index + 1),
                None => format!("${n}"),
            },
            _ => "<unnamed>".to_string(),
        }
    }
}

/// `@Field`.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRef {
    pub name: String,
}

/// `MapAssociation`.
#[derive(Debug, Clone, Deserialize)]
pub struct MapAssociation {
    pub key: Value,
    pub value: Value,
}

/// `Instance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(flatten)]
    pub reference: InstanceRef,
    #[serde(default)]
    pub fields: Vec<BoundField>,
    #[serde(default)]
    pub elements: Option<Vec<Value>>,
    #[serde(default)]
    pub associations: Option<Vec<MapAssociation>>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub count: Option<i64>,
}

/// `@Error` as returned by `evaluate`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorRef {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

/// Outcome of an `evaluate`/`evaluateInFrame`/`invoke` call.
#[derive(Debug, Clone)]
pub enum EvalResult {
    Instance(InstanceRef),
    Error(ErrorRef),
    /// The value was collected or otherwise unavailable.
    Sentinel(String),
}

impl EvalResult {
    pub fn from_value(value: Value) -> Result<Self, VmError> {
        match value.get("type").and_then(Value::as_str) {
            Some("@Error") | Some("Error") => Ok(EvalResult::Error(serde_json::from_value(value)?)),
            Some("Sentinel") => Ok(EvalResult::Sentinel(
                value
                    .get("valueAsString")
                    .and_then(Value::as_str)
                    .unwrap_or("<collected>")
                    .to_string(),
            )),
            _ => Ok(EvalResult::Instance(serde_json::from_value(value)?)),
        }
    }
}

/// `Breakpoint`.
#[derive(Debug, Clone, Deserialize)]
pub struct Breakpoint {
    pub id: String,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub location: Option<BreakpointLocation>,
}

/// `SourceLocation` or `UnresolvedSourceLocation`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocation {
    #[serde(default)]
    pub script: Option<ScriptRef>,
    #[serde(default)]
    pub script_uri: Option<String>,
    #[serde(default)]
    pub token_pos: Option<i64>,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub column: Option<i64>,
}

/// Event kinds the bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PauseStart,
    PauseExit,
    PauseBreakpoint,
    PauseInterrupted,
    PauseException,
    PausePostRequest,
    Resume,
    IsolateStart,
    IsolateRunnable,
    IsolateExit,
    IsolateUpdate,
    BreakpointAdded,
    BreakpointResolved,
    BreakpointRemoved,
    WriteEvent,
    Logging,
    ServiceExtensionAdded,
    Other(String),
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "PauseStart" => EventKind::PauseStart,
            "PauseExit" => EventKind::PauseExit,
            "PauseBreakpoint" => EventKind::PauseBreakpoint,
            "PauseInterrupted" => EventKind::PauseInterrupted,
            "PauseException" => EventKind::PauseException,
            "PausePostRequest" => EventKind::PausePostRequest,
            "Resume" => EventKind::Resume,
            "IsolateStart" => EventKind::IsolateStart,
            "IsolateRunnable" => EventKind::IsolateRunnable,
            "IsolateExit" => EventKind::IsolateExit,
            "IsolateUpdate" => EventKind::IsolateUpdate,
            "BreakpointAdded" => EventKind::BreakpointAdded,
            "BreakpointResolved" => EventKind::BreakpointResolved,
            "BreakpointRemoved" => EventKind::BreakpointRemoved,
            "WriteEvent" => EventKind::WriteEvent,
            "Logging" => EventKind::Logging,
            "ServiceExtensionAdded" => EventKind::ServiceExtensionAdded,
            _ => EventKind::Other(kind),
        }
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(EventKind::from)
    }
}

impl EventKind {
    /// Pause kinds that mean "a user-visible stop".
    pub fn is_pause(&self) -> bool {
        matches!(
            self,
            EventKind::PauseStart
                | EventKind::PauseExit
                | EventKind::PauseBreakpoint
                | EventKind::PauseInterrupted
                | EventKind::PauseException
                | EventKind::PausePostRequest
        )
    }
}

/// `LogRecord` from the `Logging` stream. Fields are instance refs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default)]
    pub message: Option<InstanceRef>,
    #[serde(default)]
    pub logger_name: Option<InstanceRef>,
    #[serde(default)]
    pub level: Option<i64>,
}

/// `Event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub isolate: Option<IsolateRef>,
    #[serde(default)]
    pub top_frame: Option<Frame>,
    #[serde(default)]
    pub exception: Option<InstanceRef>,
    #[serde(default)]
    pub pause_breakpoints: Vec<Breakpoint>,
    #[serde(default)]
    pub breakpoint: Option<Breakpoint>,
    #[serde(default)]
    pub at_async_suspension: bool,
    /// Base64 payload of `WriteEvent`.
    #[serde(default)]
    pub bytes: Option<String>,
    #[serde(default)]
    pub log_record: Option<LogRecord>,
}

impl VmEvent {
    /// Decode the `WriteEvent` payload.
    pub fn decoded_bytes(&self) -> Option<String> {
        use base64::Engine;
        let bytes = self.bytes.as_ref()?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(bytes)
            .ok()?;
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    pub fn isolate_id(&self) -> Option<&str> {
        self.isolate.as_ref().map(|i| i.id.as_str())
    }
}

/// One `streamNotify` notification.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub stream_id: String,
    pub event: VmEvent,
}
