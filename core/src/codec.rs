//! Payload codec: MessagePack maps wrapped in base64.
//!
//! # Design
//! The engine boundary is a NUL-terminated C string, so the MessagePack body
//! (which freely contains zero bytes) is wrapped in standard padded base64.
//! Binary option values use the MessagePack `bin` family underneath, which
//! keeps exact byte sequences without any text transcoding.
//!
//! Decoding never panics: every failure in either layer comes back as a
//! [`DecodeError`].

use std::ffi::CString;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{DecodeError, Error, Result};
use crate::types::{RequestOptions, ResultMap};

/// An encoded request, ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload(String);

/// An encoded result as returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResult(String);

impl EncodedPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// C string view for the FFI call. Base64 never contains NUL, so this
    /// only fails for payloads built by hand with [`EncodedPayload::new`].
    pub fn to_c_string(&self) -> Result<CString> {
        CString::new(self.0.as_str()).map_err(|e| Error::Encode(e.to_string()))
    }
}

impl EncodedResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Encode caller options into a transport-safe payload.
///
/// Well-formed options always encode; the error path exists only to avoid
/// panicking if the serializer ever reports a failure.
pub fn encode(options: &RequestOptions) -> Result<EncodedPayload> {
    pack(options).map(EncodedPayload)
}

/// Decode an engine result into a result map.
pub fn decode(result: &EncodedResult) -> std::result::Result<ResultMap, DecodeError> {
    unpack(&result.0)
}

/// Engine-side inverse of [`decode`].
pub fn encode_result(result: &ResultMap) -> Result<EncodedResult> {
    pack(result).map(EncodedResult)
}

/// Engine-side inverse of [`encode`].
pub fn decode_payload(payload: &EncodedPayload) -> std::result::Result<RequestOptions, DecodeError> {
    unpack(&payload.0)
}

fn pack(map: &RequestOptions) -> Result<String> {
    let body = rmp_serde::to_vec(map).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(STANDARD.encode(body))
}

fn unpack(text: &str) -> std::result::Result<RequestOptions, DecodeError> {
    let body = STANDARD.decode(text.trim())?;
    Ok(rmp_serde::from_slice(&body)?)
}
