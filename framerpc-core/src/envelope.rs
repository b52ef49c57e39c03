//! Envelope classification
//!
//! [`classify`] makes one pass over a message with a borrowed envelope whose
//! members are `&RawValue` spans, so `params` and `result` are located but
//! never deserialized. The resulting [`MessageView`] owns the message buffer;
//! dropping the view returns the buffer to its pool.

use crate::error::ErrorPayload;
use crate::pool::PooledBuffer;
use crate::types::{decode_escaped, Id, MessageKind, WireString};
use serde::de::{Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde_json::value::RawValue;
use std::fmt;
use std::ops::Range;

const VERSION: &str = "\"2.0\"";

/// A classified, partially parsed message
#[derive(Debug)]
pub struct MessageView {
    buffer: PooledBuffer,
    kind: MessageKind,
    method: Option<Range<usize>>,
    id: Option<Id>,
    params: Option<Range<usize>>,
    result: Option<Range<usize>>,
    error: Option<ErrorPayload>,
    problem: Option<String>,
}

impl MessageView {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The escaped method name, straight from the buffer
    pub fn method_bytes(&self) -> Option<&[u8]> {
        self.method.clone().map(|range| &self.buffer[range])
    }

    pub fn method(&self) -> Option<WireString> {
        self.method_bytes().map(WireString::from_escaped)
    }

    /// The method name with escapes decoded, for errors and logs
    pub fn method_name(&self) -> Option<String> {
        let bytes = self.method_bytes()?;
        Some(
            decode_escaped(bytes)
                .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned()),
        )
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// Raw `params` value; `None` when absent or `null`
    pub fn params(&self) -> Option<&[u8]> {
        self.params.clone().map(|range| &self.buffer[range])
    }

    /// Raw `result` value; `None` when absent
    pub fn result(&self) -> Option<&[u8]> {
        self.result.clone().map(|range| &self.buffer[range])
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ErrorPayload> {
        self.error.take()
    }

    /// Why the message was classified as invalid
    pub fn problem(&self) -> Option<&str> {
        self.problem.as_deref()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// Top-level members of an envelope, each left as raw JSON
///
/// Only a JSON object deserializes into this; arrays and scalars are rejected
/// by the map-only visitor. Unknown members are skipped.
#[derive(Default)]
struct RawEnvelope<'a> {
    jsonrpc: Option<&'a RawValue>,
    method: Option<&'a RawValue>,
    id: Option<&'a RawValue>,
    params: Option<&'a RawValue>,
    result: Option<&'a RawValue>,
    error: Option<&'a RawValue>,
}

#[derive(serde::Deserialize)]
#[serde(field_identifier, rename_all = "lowercase")]
enum Member {
    Jsonrpc,
    Method,
    Id,
    Params,
    Result,
    Error,
    #[serde(other)]
    Other,
}

impl<'de> Deserialize<'de> for RawEnvelope<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = RawEnvelope<'de>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON-RPC envelope object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut envelope = RawEnvelope::default();
        while let Some(member) = map.next_key::<Member>()? {
            let slot = match member {
                Member::Jsonrpc => &mut envelope.jsonrpc,
                Member::Method => &mut envelope.method,
                Member::Id => &mut envelope.id,
                Member::Params => &mut envelope.params,
                Member::Result => &mut envelope.result,
                Member::Error => &mut envelope.error,
                Member::Other => {
                    map.next_value::<IgnoredAny>()?;
                    continue;
                }
            };
            *slot = Some(map.next_value::<&'de RawValue>()?);
        }
        Ok(envelope)
    }
}

#[derive(Default)]
struct Fields {
    version_ok: bool,
    method: Option<Range<usize>>,
    id: Option<Id>,
    params: Option<Range<usize>>,
    result: Option<Range<usize>>,
    error: Option<ErrorPayload>,
    problem: Option<String>,
}

impl Fields {
    fn invalid(&mut self, problem: impl Into<String>) {
        if self.problem.is_none() {
            self.problem = Some(problem.into());
        }
    }
}

/// Classify one message
///
/// Semantic problems (wrong version, bad id shape, non-string method) are
/// recorded without losing a recoverable id, so the InvalidRequest response
/// can still be addressed. A structural problem leaves no members at all; the
/// message is then re-checked as plain JSON to tell InvalidJson apart from
/// InvalidMessage.
pub fn classify(buffer: PooledBuffer) -> MessageView {
    let mut fields = Fields::default();

    let kind = match serde_json::from_slice::<RawEnvelope>(&buffer) {
        Ok(envelope) => {
            inspect(&buffer, envelope, &mut fields);
            kind_of(&mut fields)
        }
        Err(err) if serde_json::from_slice::<IgnoredAny>(&buffer).is_ok() => {
            fields.invalid(format!("not a JSON-RPC envelope: {}", err));
            MessageKind::InvalidMessage
        }
        Err(err) => {
            fields.invalid(format!("invalid JSON: {}", err));
            MessageKind::InvalidJson
        }
    };

    MessageView {
        buffer,
        kind,
        method: fields.method,
        id: fields.id,
        params: fields.params,
        result: fields.result,
        error: fields.error,
        problem: fields.problem,
    }
}

/// Byte range of `raw` within `base`; `raw` always borrows from `base`
fn span(base: &[u8], raw: &RawValue) -> Range<usize> {
    let start = raw.get().as_ptr() as usize - base.as_ptr() as usize;
    start..start + raw.get().len()
}

fn inspect(base: &[u8], envelope: RawEnvelope<'_>, fields: &mut Fields) {
    if let Some(version) = envelope.jsonrpc {
        fields.version_ok = version.get() == VERSION;
        if !fields.version_ok {
            fields.invalid(format!("unsupported jsonrpc version {}", version.get()));
        }
    }

    if let Some(method) = envelope.method {
        if method.get().starts_with('"') {
            let quoted = span(base, method);
            fields.method = Some(quoted.start + 1..quoted.end - 1);
        } else {
            fields.invalid("method must be a string");
        }
    }

    if let Some(id) = envelope.id {
        match serde_json::from_str::<Id>(id.get()) {
            Ok(id) => fields.id = Some(id),
            Err(_) => fields.invalid(format!(
                "id must be null, an integer or a string, got {}",
                id.get()
            )),
        }
    }

    if let Some(params) = envelope.params {
        fields.params = (params.get() != "null").then(|| span(base, params));
    }

    fields.result = envelope.result.map(|result| span(base, result));

    if let Some(error) = envelope.error {
        match serde_json::from_str::<ErrorPayload>(error.get()) {
            Ok(error) => fields.error = Some(error),
            Err(err) => fields.invalid(format!("malformed error object: {}", err)),
        }
    }
}

fn kind_of(fields: &mut Fields) -> MessageKind {
    if fields.problem.is_some() {
        return MessageKind::InvalidMessage;
    }
    if !fields.version_ok {
        fields.invalid("missing \"jsonrpc\": \"2.0\"");
        return MessageKind::InvalidMessage;
    }
    if fields.method.is_some() {
        return if fields.id.is_some() {
            MessageKind::Request
        } else {
            MessageKind::Notification
        };
    }
    match (&fields.result, &fields.error) {
        (Some(_), Some(_)) => {
            fields.invalid("response carries both result and error");
            MessageKind::InvalidMessage
        }
        (_, Some(_)) => MessageKind::ErrorResponse,
        _ => MessageKind::ResultResponse,
    }
}
