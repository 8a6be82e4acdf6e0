//! Breakpoint conditions and log-message templates.
//!
//! Both are evaluated in the top frame of the paused isolate with
//! breakpoints disabled, so neither can re-enter a pause.

use dartdbg_vm::{EvalResult, InstanceKind, InstanceRef, VmApi, VmError};

use crate::error::DapError;
use crate::variables::format_instance;

/// One piece of a log-message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSegment {
    Text(String),
    Expr(String),
}

/// Split a log-message template into literal text and expressions.
///
/// `{expr}` and `${expr}` both interpolate; nested braces inside an
/// expression are balanced. `\{` is a literal brace. An unterminated `{`
/// is kept as text.
pub fn parse_log_template(template: &str) -> Vec<LogSegment> {
    let chars: Vec<char> = template.chars().collect();
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && chars.get(i + 1) == Some(&'{') {
            text.push('{');
            i += 2;
            continue;
        }
        let open = match c {
            '{' => Some(i),
            '$' if chars.get(i + 1) == Some(&'{') => Some(i + 1),
            _ => None,
        };
        let Some(open) = open else {
            text.push(c);
            i += 1;
            continue;
        };
        match matching_brace(&chars, open) {
            Some(close) => {
                if !text.is_empty() {
                    segments.push(LogSegment::Text(std::mem::take(&mut text)));
                }
                let expr: String = chars[open + 1..close].iter().collect();
                segments.push(LogSegment::Expr(expr.trim().to_string()));
                i = close + 1;
            }
            None => {
                text.extend(&chars[i..]);
                break;
            }
        }
    }
    if !text.is_empty() {
        segments.push(LogSegment::Text(text));
    }
    segments
}

fn matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in chars[open..].iter().enumerate() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Result of a breakpoint condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Stop,
    Continue,
    /// Evaluation failed; the message is meant for the console.
    Failed(String),
}

impl ConditionOutcome {
    pub fn should_stop(&self) -> bool {
        matches!(self, ConditionOutcome::Stop)
    }
}

/// Console text for a failed condition or log expression.
pub fn evaluation_failure(expression: &str, message: &str) -> String {
    format!("Debugger failed to evaluate expression `{expression}`: {message}\n")
}

/// Only a boolean `true` stops. Dart has no implicit truthiness, so `1`
/// or `'test'` do not.
pub fn condition_outcome(expression: &str, result: &EvalResult) -> ConditionOutcome {
    match result {
        EvalResult::Instance(value) => {
            if value.kind == InstanceKind::Bool && value.value_as_string.as_deref() == Some("true") {
                ConditionOutcome::Stop
            } else {
                ConditionOutcome::Continue
            }
        }
        EvalResult::Error(error) => {
            ConditionOutcome::Failed(evaluation_failure(expression, &error.message))
        }
        EvalResult::Sentinel(text) => ConditionOutcome::Failed(evaluation_failure(expression, text)),
    }
}

fn failure_text(err: &VmError) -> String {
    match err {
        VmError::Rpc { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Evaluate `expression` in the top frame. Only a lost connection is an
/// error; everything else is an outcome.
pub async fn evaluate_condition(
    api: &VmApi,
    isolate_id: &str,
    expression: &str,
) -> Result<ConditionOutcome, DapError> {
    match api.evaluate_in_frame(isolate_id, 0, expression).await {
        Ok(result) => Ok(condition_outcome(expression, &result)),
        Err(e) if e.is_connection_lost() => Err(e.into()),
        Err(e) => Ok(ConditionOutcome::Failed(evaluation_failure(
            expression,
            &failure_text(&e),
        ))),
    }
}

async fn interpolated_value(api: &VmApi, isolate_id: &str, value: InstanceRef) -> Result<String, VmError> {
    if value.kind != InstanceKind::String {
        return Ok(format_instance(&value, None));
    }
    match (&value.id, value.value_as_string_is_truncated) {
        (Some(id), true) => {
            let full = api.get_instance(isolate_id, id, Some(0), value.length).await?;
            Ok(full.reference.value_as_string.unwrap_or_default())
        }
        _ => Ok(value.value_as_string.unwrap_or_default()),
    }
}

/// Render a parsed template to exactly one console line.
pub async fn render_log_message(
    api: &VmApi,
    isolate_id: &str,
    segments: &[LogSegment],
) -> Result<String, DapError> {
    let mut line = String::new();
    for segment in segments {
        match segment {
            LogSegment::Text(text) => line.push_str(text),
            LogSegment::Expr(expr) => {
                let rendered = match api.evaluate_in_frame(isolate_id, 0, expr).await {
                    Ok(EvalResult::Instance(value)) => {
                        match interpolated_value(api, isolate_id, value).await {
                            Ok(text) => text,
                            Err(e) if e.is_connection_lost() => return Err(e.into()),
                            Err(e) => format!("<error: {}>", failure_text(&e)),
                        }
                    }
                    Ok(EvalResult::Error(error)) => format!("<error: {}>", error.message),
                    Ok(EvalResult::Sentinel(text)) => text,
                    Err(e) if e.is_connection_lost() => return Err(e.into()),
                    Err(e) => format!("<error: {}>", failure_text(&e)),
                };
                line.push_str(&rendered);
            }
        }
    }
    let mut line = line.replace(['\r', '\n'], " ");
    line.push('\n');
    Ok(line)
}
