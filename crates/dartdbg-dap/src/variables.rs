//! Variable formatting and lazy expansion.
//!
//! Every VM value is rendered by a total match over [`InstanceKind`].
//! Children are produced on demand from a [`VariableRef`], which is what a
//! `variablesReference` handle points at.

use std::collections::BTreeSet;

use dartdbg_config::DebugConfig;
use dartdbg_vm::{BoundVariable, ClassRef, EvalResult, InstanceKind, InstanceRef, VmApi, VmError};
use serde_json::Value;

use crate::error::DapError;
use crate::protocol::Variable;

/// Marker appended to display strings that were cut short.
pub const ELLIPSIS: &str = "…";

/// Superclass hops searched for getters before giving up.
const MAX_CLASS_DEPTH: usize = 16;

/// How values are rendered for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub max_string_length: usize,
    pub evaluate_getters: bool,
    pub evaluate_to_string: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self::from(&DebugConfig::default())
    }
}

impl From<&DebugConfig> for FormatOptions {
    fn from(config: &DebugConfig) -> Self {
        Self {
            max_string_length: config.max_string_display_length,
            evaluate_getters: config.evaluate_getters_in_debug_views,
            evaluate_to_string: config.evaluate_to_string_in_debug_views,
        }
    }
}

/// What a `variablesReference` expands to. The owning isolate is kept by
/// the handle table.
#[derive(Debug, Clone)]
pub enum VariableRef {
    /// Locals of a frame, by VM frame index.
    Locals { frame_index: usize },
    /// The exception the isolate is paused on, shown as `$e`.
    Exception { exception: InstanceRef },
    /// Fields, elements or entries of an instance.
    Instance {
        instance: InstanceRef,
        evaluate_name: Option<String>,
    },
    /// A synthetic map entry with `key` and `value` children.
    MapEntry {
        key: Value,
        value: Value,
        parent_evaluate_name: Option<String>,
    },
}

/// A rendered variable whose children, if any, still need a handle.
#[derive(Debug, Clone)]
pub struct VariableNode {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    pub evaluate_name: Option<String>,
    pub children: Option<VariableRef>,
    pub indexed: Option<i64>,
}

impl VariableNode {
    fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_name: None,
            evaluate_name: None,
            children: None,
            indexed: None,
        }
    }

    /// Convert to the DAP shape; `handle` is 0 for leaves.
    pub fn into_dap(self, handle: i64) -> Variable {
        Variable {
            name: self.name,
            value: self.value,
            variable_type: self.type_name,
            evaluate_name: self.evaluate_name,
            variables_reference: handle,
            indexed_variables: self.indexed,
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((byte, _)) => (&text[..byte], true),
        None => (text, false),
    }
}

fn escape_for_display(text: &str) -> String {
    text.replace('\n', "\\n").replace('\r', "\\r").replace('\t', "\\t")
}

/// A Dart double-quoted string literal for `text`.
pub fn dart_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn item_count(label: &str, length: Option<i64>) -> String {
    match length {
        Some(1) => format!("{label} (1 item)"),
        Some(n) => format!("{label} ({n} items)"),
        None => label.to_string(),
    }
}

/// Display string for an instance. Strings longer than `max_len` are cut
/// and marked with [`ELLIPSIS`]; `None` shows them whole.
pub fn format_instance(instance: &InstanceRef, max_len: Option<usize>) -> String {
    let value = instance.value_as_string.as_deref();
    match &instance.kind {
        InstanceKind::Null => "null".to_string(),
        InstanceKind::Bool | InstanceKind::Int | InstanceKind::Double => {
            value.unwrap_or_default().to_string()
        }
        InstanceKind::String => {
            let raw = value.unwrap_or_default();
            let (shown, cut) = match max_len {
                Some(max) => truncate_chars(raw, max),
                None => (raw, false),
            };
            let marker = if cut || instance.value_as_string_is_truncated {
                ELLIPSIS
            } else {
                ""
            };
            format!("\"{}{marker}\"", escape_for_display(shown))
        }
        InstanceKind::List => item_count("List", instance.length),
        InstanceKind::TypedData(kind) => item_count(kind, instance.length),
        InstanceKind::Map => item_count("Map", instance.length),
        InstanceKind::Set => item_count("Set", instance.length),
        InstanceKind::Record => "Record".to_string(),
        InstanceKind::Closure => match &instance.closure_function {
            Some(function) => format!("Closure ({})", function.name),
            None => "Closure".to_string(),
        },
        InstanceKind::Type | InstanceKind::TypeParameter => instance
            .name
            .clone()
            .unwrap_or_else(|| instance.class_name().to_string()),
        InstanceKind::PlainInstance | InstanceKind::Other(_) => instance.class_name().to_string(),
    }
}

/// The literal that indexes a map by this key, when one exists.
pub fn literal_key(key: &InstanceRef) -> Option<String> {
    match key.kind {
        InstanceKind::String if !key.value_as_string_is_truncated => {
            key.value_as_string.as_deref().map(dart_string_literal)
        }
        InstanceKind::Int | InstanceKind::Double | InstanceKind::Bool => key.value_as_string.clone(),
        _ => None,
    }
}

/// Whether the value can be expanded.
pub fn has_children(instance: &InstanceRef) -> bool {
    if instance.id.is_none() {
        return false;
    }
    match &instance.kind {
        InstanceKind::List | InstanceKind::TypedData(_) | InstanceKind::Map | InstanceKind::Set => {
            instance.length.unwrap_or(0) > 0
        }
        InstanceKind::Record | InstanceKind::PlainInstance | InstanceKind::Other(_) => true,
        _ => false,
    }
}

fn indexed_count(instance: &InstanceRef) -> Option<i64> {
    match instance.kind {
        InstanceKind::List | InstanceKind::TypedData(_) | InstanceKind::Set => instance.length,
        _ => None,
    }
}

/// Generic type-argument bindings show up as frame variables but are not
/// user-visible locals.
pub fn is_type_binding(var: &BoundVariable) -> bool {
    var.value_type() == Some("@TypeArguments")
        || var
            .instance()
            .is_some_and(|i| i.kind == InstanceKind::TypeParameter)
}

fn instance_of(value: &Value) -> Option<InstanceRef> {
    match value.get("type").and_then(Value::as_str) {
        Some("Sentinel") | Some("@TypeArguments") | Some("@Error") | Some("Error") => None,
        _ => serde_json::from_value(value.clone()).ok(),
    }
}

fn vm_error_message(err: &VmError) -> String {
    match err {
        VmError::Rpc { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn is_user_getter(kind: Option<&str>, is_getter: bool) -> bool {
    match kind {
        Some("ImplicitGetter") | Some("ImplicitStaticGetter") => false,
        Some("GetterFunction") => true,
        _ => is_getter,
    }
}

/// Renders and expands values against one paused isolate.
pub struct Expander<'a> {
    api: &'a VmApi,
    isolate_id: &'a str,
    options: FormatOptions,
}

impl<'a> Expander<'a> {
    pub fn new(api: &'a VmApi, isolate_id: &'a str, options: FormatOptions) -> Self {
        Self {
            api,
            isolate_id,
            options,
        }
    }

    /// Render a raw VM value (instance or sentinel).
    pub async fn node(
        &self,
        name: String,
        value: &Value,
        evaluate_name: Option<String>,
    ) -> Result<VariableNode, DapError> {
        if value.get("type").and_then(Value::as_str) == Some("Sentinel") {
            let text = value
                .get("valueAsString")
                .and_then(Value::as_str)
                .unwrap_or("<unavailable>");
            return Ok(VariableNode::leaf(name, text));
        }
        match instance_of(value) {
            Some(instance) => self.instance_node(name, instance, evaluate_name).await,
            None => Ok(VariableNode::leaf(name, "<unknown>")),
        }
    }

    pub async fn instance_node(
        &self,
        name: String,
        instance: InstanceRef,
        evaluate_name: Option<String>,
    ) -> Result<VariableNode, DapError> {
        let mut value = format_instance(&instance, Some(self.options.max_string_length));
        if self.options.evaluate_to_string && instance.kind == InstanceKind::PlainInstance {
            if let Some(preview) = self.to_string_preview(&instance).await? {
                value = format!("{value} ({preview})");
            }
        }
        let type_name = match instance.kind {
            InstanceKind::Null => Some("Null".to_string()),
            _ => instance.class_ref.as_ref().map(|c| c.name.clone()),
        };
        let children = has_children(&instance).then(|| VariableRef::Instance {
            instance: instance.clone(),
            evaluate_name: evaluate_name.clone(),
        });
        Ok(VariableNode {
            name,
            value,
            type_name,
            indexed: indexed_count(&instance),
            evaluate_name,
            children,
        })
    }

    async fn to_string_preview(&self, instance: &InstanceRef) -> Result<Option<String>, DapError> {
        let Some(id) = instance.id.as_deref() else {
            return Ok(None);
        };
        match self.api.evaluate(self.isolate_id, id, "toString()").await {
            Ok(EvalResult::Instance(text)) if text.kind == InstanceKind::String => {
                let text = text.value_as_string.unwrap_or_default();
                if text.starts_with("Instance of '") {
                    Ok(None)
                } else {
                    let (shown, cut) = truncate_chars(&text, self.options.max_string_length);
                    let marker = if cut { ELLIPSIS } else { "" };
                    Ok(Some(format!("{}{marker}", escape_for_display(shown))))
                }
            }
            Err(e) if e.is_connection_lost() => Err(e.into()),
            _ => Ok(None),
        }
    }

    /// Replace a VM-truncated string with its full value.
    pub async fn expand_string(&self, instance: InstanceRef) -> Result<InstanceRef, DapError> {
        if instance.kind != InstanceKind::String || !instance.value_as_string_is_truncated {
            return Ok(instance);
        }
        let Some(id) = instance.id.as_deref() else {
            return Ok(instance);
        };
        let full = self
            .api
            .get_instance(self.isolate_id, id, Some(0), instance.length)
            .await?;
        Ok(full.reference)
    }

    /// Expand `reference`. `start`/`count` page indexed collections.
    pub async fn children(
        &self,
        reference: &VariableRef,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<VariableNode>, DapError> {
        match reference {
            VariableRef::Locals { frame_index } => self.locals(*frame_index).await,
            VariableRef::Exception { exception } => Ok(vec![
                self.instance_node("$e".into(), exception.clone(), Some("$e".into()))
                    .await?,
            ]),
            VariableRef::Instance {
                instance,
                evaluate_name,
            } => {
                self.instance_children(instance, evaluate_name.as_deref(), start, count)
                    .await
            }
            VariableRef::MapEntry {
                key,
                value,
                parent_evaluate_name,
            } => {
                let key_node = self.node("key".into(), key, None).await?;
                let value_evaluate_name = parent_evaluate_name.as_ref().and_then(|parent| {
                    instance_of(key)
                        .as_ref()
                        .and_then(literal_key)
                        .map(|literal| format!("{parent}[{literal}]"))
                });
                let value_node = self.node("value".into(), value, value_evaluate_name).await?;
                Ok(vec![key_node, value_node])
            }
        }
    }

    async fn locals(&self, frame_index: usize) -> Result<Vec<VariableNode>, DapError> {
        let stack = self
            .api
            .get_stack(self.isolate_id, Some(frame_index + 1))
            .await?;
        let frame = stack.frames.into_iter().nth(frame_index).ok_or_else(|| {
            DapError::Protocol(format!("frame {frame_index} is no longer on the stack"))
        })?;
        let mut nodes = Vec::with_capacity(frame.vars.len());
        for var in frame.vars.iter().filter(|v| !is_type_binding(v)) {
            nodes.push(
                self.node(var.name.clone(), &var.value, Some(var.name.clone()))
                    .await?,
            );
        }
        Ok(nodes)
    }

    async fn instance_children(
        &self,
        instance: &InstanceRef,
        evaluate_name: Option<&str>,
        start: Option<i64>,
        count: Option<i64>,
    ) -> Result<Vec<VariableNode>, DapError> {
        let Some(id) = instance.id.as_deref() else {
            return Ok(Vec::new());
        };
        let paged = matches!(
            instance.kind,
            InstanceKind::List | InstanceKind::TypedData(_) | InstanceKind::Map | InstanceKind::Set
        );
        let (offset, count) = if paged {
            (start.filter(|s| *s > 0), count.filter(|c| *c > 0))
        } else {
            (None, None)
        };
        let full = self.api.get_instance(self.isolate_id, id, offset, count).await?;
        let base = full.offset.or(offset).unwrap_or(0);
        let mut nodes = Vec::new();

        match &instance.kind {
            InstanceKind::List | InstanceKind::TypedData(_) | InstanceKind::Set => {
                let is_set = instance.kind == InstanceKind::Set;
                for (i, element) in full.elements.iter().flatten().enumerate() {
                    let index = base + i as i64;
                    let child_name = evaluate_name.map(|parent| {
                        if is_set {
                            format!("{parent}.elementAt({index})")
                        } else {
                            format!("{parent}[{index}]")
                        }
                    });
                    nodes.push(self.node(format!("[{index}]"), element, child_name).await?);
                }
            }
            InstanceKind::Map => {
                for association in full.associations.iter().flatten() {
                    let max = Some(self.options.max_string_length);
                    let key = instance_of(&association.key)
                        .map(|k| format_instance(&k, max))
                        .unwrap_or_else(|| "<unknown>".into());
                    let value = instance_of(&association.value)
                        .map(|v| format_instance(&v, max))
                        .unwrap_or_else(|| "<unknown>".into());
                    nodes.push(VariableNode {
                        name: String::new(),
                        value: format!("{key} -> {value}"),
                        type_name: None,
                        evaluate_name: None,
                        children: Some(VariableRef::MapEntry {
                            key: association.key.clone(),
                            value: association.value.clone(),
                            parent_evaluate_name: evaluate_name.map(str::to_string),
                        }),
                        indexed: None,
                    });
                }
            }
            _ => {
                let mut seen = BTreeSet::new();
                for field in &full.fields {
                    let name = field.field_name();
                    let child_name = evaluate_name.map(|parent| format!("{parent}.{name}"));
                    seen.insert(name.clone());
                    nodes.push(self.node(name, &field.value, child_name).await?);
                }
                let has_getters =
                    matches!(instance.kind, InstanceKind::PlainInstance | InstanceKind::Other(_));
                if self.options.evaluate_getters && has_getters {
                    let getters = self.getter_names(full.reference.class_ref.as_ref()).await?;
                    for getter in getters.into_iter().filter(|g| !seen.contains(g)) {
                        nodes.push(self.getter_node(id, getter, evaluate_name).await?);
                    }
                }
            }
        }
        Ok(nodes)
    }

    async fn getter_node(
        &self,
        instance_id: &str,
        getter: String,
        evaluate_name: Option<&str>,
    ) -> Result<VariableNode, DapError> {
        let child_name = evaluate_name.map(|parent| format!("{parent}.{getter}"));
        match self.api.evaluate(self.isolate_id, instance_id, &getter).await {
            Ok(EvalResult::Instance(value)) => self.instance_node(getter, value, child_name).await,
            Ok(EvalResult::Error(error)) => Ok(VariableNode::leaf(getter, error.message)),
            Ok(EvalResult::Sentinel(text)) => Ok(VariableNode::leaf(getter, text)),
            Err(e) if e.is_connection_lost() => Err(e.into()),
            Err(e) => Ok(VariableNode::leaf(getter, vm_error_message(&e))),
        }
    }

    async fn getter_names(&self, class: Option<&ClassRef>) -> Result<BTreeSet<String>, DapError> {
        let mut names = BTreeSet::new();
        let mut next = class.map(|c| c.id.clone());
        for _ in 0..MAX_CLASS_DEPTH {
            let Some(class_id) = next.take() else {
                break;
            };
            let class = match self.api.get_class(self.isolate_id, &class_id).await {
                Ok(class) => class,
                Err(e) if e.is_connection_lost() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!("cannot read class {class_id}: {e}");
                    break;
                }
            };
            if class.name == "Object" {
                break;
            }
            names.extend(
                class
                    .functions
                    .into_iter()
                    .filter(|f| !f.is_static && is_user_getter(f.kind.as_deref(), f.is_getter))
                    .map(|f| f.name),
            );
            next = class.super_class.map(|c| c.id);
        }
        Ok(names)
    }
}
