//! Outgoing envelope encoding
//!
//! Envelopes are written member by member into a byte buffer. Payloads
//! (`params`, `result`, error objects) go through serde straight into the
//! same buffer, so encoding a message costs one allocation.
//!
//! # Examples
//!
//! ```rust
//! use framerpc_core::{codec, Id};
//!
//! let bytes = codec::encode_request("add", &Id::Number(1), &(1, 2)).unwrap();
//! assert_eq!(bytes, br#"{"jsonrpc":"2.0","id":1,"method":"add","params":[1,2]}"#);
//! ```

use crate::error::{ErrorPayload, Result};
use crate::types::Id;
use serde::Serialize;

const HEADER: &[u8] = br#"{"jsonrpc":"2.0""#;

fn start(capacity: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(capacity);
    out.extend_from_slice(HEADER);
    out
}

fn write_id(out: &mut Vec<u8>, id: Option<&Id>) -> Result<()> {
    out.extend_from_slice(br#","id":"#);
    match id {
        Some(id) => serde_json::to_writer(&mut *out, id)?,
        None => out.extend_from_slice(b"null"),
    }
    Ok(())
}

/// Append `"params":<value>`, dropping the member when `value` serializes to `null`
fn write_params<P: Serialize + ?Sized>(out: &mut Vec<u8>, params: &P) -> Result<()> {
    let mark = out.len();
    out.extend_from_slice(br#","params":"#);
    let value_start = out.len();
    serde_json::to_writer(&mut *out, params)?;
    if &out[value_start..] == b"null" {
        out.truncate(mark);
    }
    Ok(())
}

/// Encode a request
pub fn encode_request<P: Serialize + ?Sized>(method: &str, id: &Id, params: &P) -> Result<Vec<u8>> {
    let mut out = start(64 + method.len());
    write_id(&mut out, Some(id))?;
    out.extend_from_slice(br#","method":"#);
    serde_json::to_writer(&mut out, method)?;
    write_params(&mut out, params)?;
    out.push(b'}');
    Ok(out)
}

/// Encode a notification (a request without an id)
pub fn encode_notification<P: Serialize + ?Sized>(method: &str, params: &P) -> Result<Vec<u8>> {
    let mut out = start(64 + method.len());
    out.extend_from_slice(br#","method":"#);
    serde_json::to_writer(&mut out, method)?;
    write_params(&mut out, params)?;
    out.push(b'}');
    Ok(out)
}

/// Encode a success response
pub fn encode_result<R: Serialize + ?Sized>(id: &Id, result: &R) -> Result<Vec<u8>> {
    let mut out = start(64);
    write_id(&mut out, Some(id))?;
    out.extend_from_slice(br#","result":"#);
    serde_json::to_writer(&mut out, result)?;
    out.push(b'}');
    Ok(out)
}

/// Encode an error response; a missing id is written as `null`
pub fn encode_error(id: Option<&Id>, error: &ErrorPayload) -> Result<Vec<u8>> {
    let mut out = start(96 + error.message.len());
    write_id(&mut out, id)?;
    out.extend_from_slice(br#","error":"#);
    serde_json::to_writer(&mut out, error)?;
    out.push(b'}');
    Ok(out)
}
