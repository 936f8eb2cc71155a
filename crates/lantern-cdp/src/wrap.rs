//! Conversion from engine diagnostic values to client-visible protocol
//! objects, plus the object-id mint/parse pair.

use lantern_diag::{
    DiagProperty, DiagValue, ExceptionMetadata, ObjectHandle, Primitive, ValueKind,
    PROPERTY_READ_ONLY,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AgentError;
use crate::protocol::{
    ExceptionDetails, InternalPropertyDescriptor, PropertyDescriptor, RemoteObject,
};

/// Descriptions of string values are cut at this many characters.
pub(crate) const MAX_STRING_PREVIEW_CHARS: usize = 196;

const DEFAULT_EXCEPTION_TEXT: &str = "Uncaught";

pub fn object_id_for_handle(handle: ObjectHandle) -> String {
    format!(r#"{{"handle":{handle}}}"#)
}

pub fn scope_object_id(ordinal: u32, name: &str) -> String {
    format!(r#"{{"ordinal":{ordinal},"name":"{name}"}}"#)
}

pub fn call_frame_id(ordinal: u32) -> String {
    format!(r#"{{"ordinal":{ordinal}}}"#)
}

/// Parsed form of a wire object id: either an engine handle or a
/// frame-scoped `{ordinal, name}` pair.
#[derive(Debug, Default, Deserialize)]
pub struct ParsedObjectId {
    pub handle: Option<ObjectHandle>,
    pub ordinal: Option<u32>,
    pub name: Option<String>,
}

pub fn parse_object_id(object_id: &str) -> Result<ParsedObjectId, AgentError> {
    serde_json::from_str(object_id).map_err(|_| AgentError::InvalidObjectId)
}

/// Wrap an engine value for the client, computing the type-specific
/// description.
pub fn wrap_value(value: &DiagValue) -> RemoteObject {
    let mut object = RemoteObject {
        kind: kind_name(value.kind).to_string(),
        ..RemoteObject::default()
    };

    if value.kind == ValueKind::Undefined {
        // The debugger has a dedicated rendering for `undefined`; no value or
        // description accompanies it.
        return object;
    }

    object.description = Some(describe(value));
    object.value = primitive_json(value);
    object.class_name = value.class_name.clone();
    if let Some(handle) = value.handle {
        object.object_id = Some(object_id_for_handle(handle));
    }

    object
}

/// Wrap an exception value; identical to [`wrap_value`] except for the
/// `error` subtype.
pub fn wrap_exception(value: &DiagValue) -> RemoteObject {
    let mut wrapped = wrap_value(value);
    wrapped.subtype = Some("error".to_string());
    wrapped
}

pub fn exception_details(exception: &DiagValue) -> ExceptionDetails {
    let text = exception
        .display
        .clone()
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| DEFAULT_EXCEPTION_TEXT.to_string());

    ExceptionDetails {
        exception_id: i64::from(exception.handle.unwrap_or(0)),
        text,
        line_number: 0,
        column_number: 0,
        exception: Some(wrap_exception(exception)),
    }
}

pub fn exception_details_from_metadata(metadata: &ExceptionMetadata) -> ExceptionDetails {
    ExceptionDetails {
        exception_id: 0,
        text: metadata.text.clone(),
        line_number: i64::from(metadata.line),
        column_number: i64::from(metadata.column),
        exception: Some(wrap_exception(&metadata.exception)),
    }
}

pub fn wrap_property(property: &DiagProperty) -> PropertyDescriptor {
    PropertyDescriptor {
        name: property.name.clone(),
        value: wrap_described(&property.value),
        writable: property.attributes & PROPERTY_READ_ONLY == 0,
        configurable: true,
        enumerable: true,
    }
}

pub fn wrap_internal_property(property: &DiagProperty) -> InternalPropertyDescriptor {
    InternalPropertyDescriptor {
        name: property.name.clone(),
        value: wrap_described(&property.value),
    }
}

/// Wrap a value that came from a property enumeration: the engine's own
/// display string wins over the computed description.
fn wrap_described(value: &DiagValue) -> RemoteObject {
    let mut wrapped = wrap_value(value);
    if let Some(display) = value.display.clone().filter(|d| !d.is_empty()) {
        wrapped.description = Some(display);
    }
    wrapped
}

fn kind_name(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Undefined => "undefined",
        ValueKind::Null => "null",
        ValueKind::Boolean => "boolean",
        ValueKind::Number => "number",
        ValueKind::String => "string",
        ValueKind::Object | ValueKind::Error => "object",
        ValueKind::Array => "array",
        ValueKind::Function => "function",
    }
}

fn describe(value: &DiagValue) -> String {
    match value.kind {
        ValueKind::Undefined => "undefined".to_string(),
        ValueKind::Null => "null".to_string(),
        ValueKind::Boolean => match value.primitive {
            Some(Primitive::Boolean(true)) => "true".to_string(),
            _ => "false".to_string(),
        },
        ValueKind::Number => match value.primitive {
            Some(Primitive::Number(n)) => format!("{n:.8}"),
            _ => "0.00000000".to_string(),
        },
        ValueKind::String => match &value.primitive {
            Some(Primitive::String(s)) => truncate_preview(s),
            _ => String::new(),
        },
        ValueKind::Object => "{...}".to_string(),
        ValueKind::Array => "[...]".to_string(),
        ValueKind::Function => "f() {...}".to_string(),
        ValueKind::Error => value
            .display
            .clone()
            .unwrap_or_else(|| "{...}".to_string()),
    }
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= MAX_STRING_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(MAX_STRING_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

fn primitive_json(value: &DiagValue) -> Option<Value> {
    match &value.primitive {
        Some(Primitive::Boolean(b)) => Some(Value::Bool(*b)),
        Some(Primitive::Number(n)) => Some(number_json(*n)),
        Some(Primitive::String(s)) => Some(Value::String(s.clone())),
        None if value.kind == ValueKind::Null => Some(Value::Null),
        None => None,
    }
}

fn number_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
