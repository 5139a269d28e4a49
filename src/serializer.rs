//! Record serialization
//!
//! A serializer projects a [`FinalizedEntry`] into the plain JSON value the
//! storage backend receives. The provided implementations mirror a common
//! audit-record shape: stable top-level keys, with the nested payload fields
//! (`data`, `query_params`, `request_headers`) re-encoded as JSON strings so
//! the record stays flat for text-oriented sinks. Implementers wanting a
//! different projection (extra fields, structured payloads, dropped fields)
//! supply their own [`EntrySerializer`].

use chrono::SecondsFormat;
use serde_json::{json, Value};

use crate::config::CompiledConfig;
use crate::entry::FinalizedEntry;

/// Projects a finalized entry into the stored record
pub trait EntrySerializer: Send + Sync {
    /// Produce the record handed to the storage backend
    fn serialize(&self, entry: &FinalizedEntry, config: &CompiledConfig) -> Value;
}

/// Default projection with stable key names
///
/// Top-level keys: `action_name`, `execution_time` (seconds as float),
/// `timestamp` (RFC 3339, UTC), `ip_address`, `request`, `response`, `user`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseEntrySerializer;

impl EntrySerializer for BaseEntrySerializer {
    fn serialize(&self, entry: &FinalizedEntry, config: &CompiledConfig) -> Value {
        let ascii = config.json_ensure_ascii;
        json!({
            "action_name": entry.action_name,
            "execution_time": entry.execution_time.as_secs_f64(),
            "timestamp": entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "ip_address": entry.ip_address,
            "request": {
                "method": entry.request.method,
                "full_path": entry.request.full_path,
                "data": json_dump(&entry.request.data, ascii),
                "query_params": json_dump(&entry.request.query_params, ascii),
                "request_headers": json_dump(
                    &Value::Object(entry.request.request_headers.clone()),
                    ascii,
                ),
            },
            "response": {
                "status_code": entry.response.status_code,
                "data": entry.response.data.as_ref().map(|data| json_dump(data, ascii)),
            },
            "user": {
                "id": entry.user.id,
                "username": entry.user.username,
            },
        })
    }
}

/// [`BaseEntrySerializer`] plus the exchange's correlation id under
/// `request.request_id`
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdEntrySerializer;

impl EntrySerializer for RequestIdEntrySerializer {
    fn serialize(&self, entry: &FinalizedEntry, config: &CompiledConfig) -> Value {
        let mut record = BaseEntrySerializer.serialize(entry, config);
        if let Some(request) = record.get_mut("request").and_then(Value::as_object_mut) {
            request.insert(
                "request_id".to_string(),
                Value::String(entry.correlation_id.clone()),
            );
        }
        record
    }
}

/// Encode a value as a JSON string, optionally escaping every non-ASCII
/// character as `\uXXXX` (UTF-16 units, surrogate pairs for astral chars).
///
/// With `ensure_ascii` off, the compact UTF-8 encoding is returned as-is.
pub fn json_dump(value: &Value, ensure_ascii: bool) -> String {
    let compact = value.to_string();
    if !ensure_ascii || compact.is_ascii() {
        return compact;
    }
    let mut out = String::with_capacity(compact.len() + 16);
    let mut units = [0u16; 2];
    for c in compact.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            // serde_json only emits non-ASCII inside string literals, so
            // escaping them is always valid JSON.
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
