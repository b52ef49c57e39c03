//! Wire-level value types shared by every layer of the runtime
//!
//! - [`Id`]: the request identifier used to correlate requests and responses
//! - [`WireString`]: a name kept in its escaped, on-wire byte form
//! - [`MessageKind`]: the classification of one inbound envelope
//!
//! None of these types build a JSON value tree. `Id` carries its own serde
//! impls so it can be written straight into an envelope, and `WireString`
//! compares raw escaped bytes so dispatch never unescapes a method name.

use crate::error::{Error, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// JSON-RPC 2.0 request ID
///
/// A request is answered with the same id it was sent with. An envelope
/// without an `id` member is a notification and carries no `Id` at all
/// (`Option<Id>::None`); `Id::Null` is the explicit JSON `null`, which the
/// protocol allows but which makes correlation impossible.
///
/// Equality and hashing are structural and cheap: string ids share their
/// storage through an `Arc`, so cloning an id never copies the text.
///
/// # Examples
///
/// ```rust
/// use framerpc_core::Id;
///
/// let id1: Id = "req-123".into();
/// let id2: Id = 42i64.into();
///
/// assert_eq!(id1.to_string(), "\"req-123\"");
/// assert_eq!(id2.to_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    /// Explicit `null`
    Null,
    /// 64-bit integer identifier
    Number(i64),
    /// String identifier
    String(Arc<str>),
}

impl Id {
    /// Returns true for the explicit `null` id
    pub fn is_null(&self) -> bool {
        matches!(self, Id::Null)
    }
}

impl fmt::Display for Id {
    /// JSON-like rendering: strings quoted, numbers bare, `null` for Null
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => write!(f, "null"),
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(Arc::from(s))
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(Arc::from(s))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Id::Null => serializer.serialize_unit(),
            Id::Number(n) => serializer.serialize_i64(*n),
            Id::String(s) => serializer.serialize_str(s),
        }
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a 64-bit integer or a string")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Id, E> {
        Ok(Id::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Id, E> {
        Ok(Id::Null)
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> std::result::Result<Id, E> {
        Ok(Id::Number(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> std::result::Result<Id, E> {
        i64::try_from(n)
            .map(Id::Number)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(n), &self))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Id, E> {
        Ok(Id::from(s))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<Id, E> {
        Ok(Id::from(s))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Id, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

/// A name kept in its escaped, on-wire form
///
/// The bytes are what appears between the quotes of a JSON string token, with
/// escape sequences left intact. Two `WireString`s are equal exactly when
/// their escaped bytes are equal, so lookups by raw message bytes need no
/// decoding. Names produced by a single serializer always escape the same
/// way, which is what makes the comparison sound in practice.
///
/// `WireString` implements `Borrow<[u8]>`, so a `HashMap<WireString, _>` can
/// be queried with a `&[u8]` slice taken straight from a message buffer.
///
/// # Examples
///
/// ```rust
/// use framerpc_core::WireString;
///
/// let name = WireString::new("say \"hi\"");
/// assert_eq!(name.as_bytes(), br#"say \"hi\""#);
/// assert_eq!(name.decode().unwrap(), "say \"hi\"");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WireString(Arc<[u8]>);

impl WireString {
    /// Escape `name` the way the envelope encoder does
    pub fn new(name: &str) -> Self {
        let escaped = match serde_json::to_vec(name) {
            Ok(quoted) if quoted.len() >= 2 => quoted[1..quoted.len() - 1].to_vec(),
            _ => name.as_bytes().to_vec(),
        };
        WireString(Arc::from(escaped))
    }

    /// Wrap bytes that are already in escaped form
    pub fn from_escaped(bytes: &[u8]) -> Self {
        WireString(Arc::from(bytes))
    }

    /// The escaped bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode the escape sequences into a `String`
    pub fn decode(&self) -> Result<String> {
        decode_escaped(&self.0)
    }
}

/// Decode the escaped contents of a JSON string token (quotes excluded)
pub fn decode_escaped(escaped: &[u8]) -> Result<String> {
    if !escaped.contains(&b'\\') {
        return std::str::from_utf8(escaped)
            .map(str::to_owned)
            .map_err(|e| Error::Serialization(e.to_string()));
    }
    let mut quoted = Vec::with_capacity(escaped.len() + 2);
    quoted.push(b'"');
    quoted.extend_from_slice(escaped);
    quoted.push(b'"');
    Ok(serde_json::from_slice(&quoted)?)
}

/// Like [`decode_escaped`] but never fails; for logs and metric labels
pub fn decode_escaped_lossy(escaped: &[u8]) -> String {
    decode_escaped(escaped).unwrap_or_else(|_| String::from_utf8_lossy(escaped).into_owned())
}

impl Borrow<[u8]> for WireString {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for WireString {
    fn from(name: &str) -> Self {
        WireString::new(name)
    }
}

impl fmt::Display for WireString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(decoded) => f.write_str(&decoded),
            Err(_) => f.write_str(&String::from_utf8_lossy(&self.0)),
        }
    }
}

impl fmt::Debug for WireString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireString({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Classification of one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Not a JSON document at all
    InvalidJson,
    /// Valid JSON, but not a valid JSON-RPC 2.0 envelope
    InvalidMessage,
    /// A call that expects a response
    Request,
    /// A call without an id; never answered
    Notification,
    /// A success response (or a response carrying neither result nor error)
    ResultResponse,
    /// An error response
    ErrorResponse,
}

impl MessageKind {
    /// Requests and notifications go to the dispatch table
    pub fn is_call(self) -> bool {
        matches!(self, MessageKind::Request | MessageKind::Notification)
    }

    /// Responses go to the pending request registry
    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::ResultResponse | MessageKind::ErrorResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_id_serialization() {
        assert_eq!(serde_json::to_string(&Id::Number(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Id::from("abc")).unwrap(), "\"abc\"");
        assert_eq!(serde_json::to_string(&Id::Null).unwrap(), "null");
    }

    #[test]
    fn test_id_deserialization() {
        assert_eq!(serde_json::from_str::<Id>("7").unwrap(), Id::Number(7));
        assert_eq!(serde_json::from_str::<Id>("-3").unwrap(), Id::Number(-3));
        assert_eq!(serde_json::from_str::<Id>("\"x\"").unwrap(), Id::from("x"));
        assert_eq!(serde_json::from_str::<Id>("null").unwrap(), Id::Null);

        assert!(serde_json::from_str::<Id>("1.5").is_err());
        assert!(serde_json::from_str::<Id>("true").is_err());
        assert!(serde_json::from_str::<Id>("[1]").is_err());
        assert!(serde_json::from_str::<Id>("18446744073709551615").is_err());
    }

    #[test]
    fn test_id_as_map_key() {
        let mut map = HashMap::new();
        map.insert(Id::from("a"), 1);
        map.insert(Id::Number(1), 2);
        assert_eq!(map.get(&Id::from(String::from("a"))), Some(&1));
        assert_eq!(map.get(&Id::Number(1)), Some(&2));
        assert_eq!(map.get(&Id::from("1")), None);
    }

    #[test]
    fn test_wire_string_escaping() {
        let plain = WireString::new("textDocument/didOpen");
        assert_eq!(plain.as_bytes(), b"textDocument/didOpen");

        let escaped = WireString::new("tab\there");
        assert_eq!(escaped.as_bytes(), b"tab\\there");
        assert_eq!(escaped.decode().unwrap(), "tab\there");
        assert_eq!(escaped.to_string(), "tab\there");
    }

    #[test]
    fn test_wire_string_lookup_by_bytes() {
        let mut map: HashMap<WireString, u32> = HashMap::new();
        map.insert(WireString::new("add"), 1);
        map.insert(WireString::new("a\"b"), 2);

        assert_eq!(map.get(&b"add"[..]), Some(&1));
        assert_eq!(map.get(&br#"a\"b"#[..]), Some(&2));
        // a different escaping of the same text is a different key
        assert_eq!(map.get(&br#"\u0061dd"#[..]), None);
    }

    #[test]
    fn test_message_kind_routing() {
        assert!(MessageKind::Request.is_call());
        assert!(MessageKind::Notification.is_call());
        assert!(MessageKind::ErrorResponse.is_response());
        assert!(!MessageKind::InvalidMessage.is_call());
        assert!(!MessageKind::InvalidJson.is_response());
    }
}
