//! Typed view over a decoded engine result.
//!
//! # Design
//! The engine answers with a plain option map. A map carrying an `error` key
//! is an engine-reported failure and becomes [`Error::EngineError`]; any
//! other map must carry at least an integer `status`. Fields are owned so a
//! response can outlive the buffer it was decoded from.

use bytes::Bytes;

use crate::error::{DecodeError, Error, Result};
use crate::types::{OptionValue, ResultMap};

/// Result key holding an engine-reported error message.
pub const ERROR_KEY: &str = "error";

/// A completed request as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub url: Option<String>,
}

impl EngineResponse {
    /// Interpret a decoded result map.
    pub fn from_result(map: ResultMap) -> Result<Self> {
        if let Some(err) = map.get(ERROR_KEY) {
            let message = match err {
                OptionValue::Str(s) => s.clone(),
                other => format!("{other:?}"),
            };
            return Err(Error::EngineError(message));
        }

        let status = match map.get("status") {
            Some(OptionValue::Int(n)) => u16::try_from(*n).map_err(|_| DecodeError::Field {
                field: "status",
                reason: format!("{n} is not a valid status code"),
            })?,
            Some(other) => {
                return Err(DecodeError::Field {
                    field: "status",
                    reason: format!("expected integer, got {}", other.kind()),
                }
                .into())
            }
            None => {
                return Err(DecodeError::Field {
                    field: "status",
                    reason: "missing".to_string(),
                }
                .into())
            }
        };

        let headers = map
            .get("headers")
            .and_then(OptionValue::as_headers)
            .map(<[_]>::to_vec)
            .unwrap_or_default();

        let body = match map.get("body") {
            Some(OptionValue::Bytes(b)) => b.clone(),
            Some(OptionValue::Str(s)) => Bytes::from(s.clone()),
            _ => Bytes::new(),
        };

        let url = map.get("url").and_then(OptionValue::as_str).map(str::to_string);

        Ok(Self {
            status,
            headers,
            body,
            url,
        })
    }

    /// Convert back into a result map, as an engine would produce it.
    pub fn into_result(self) -> ResultMap {
        let mut map = ResultMap::new()
            .with("status", self.status)
            .with("headers", self.headers)
            .with("body", self.body);
        map.set_opt("url", self.url);
        map
    }

    /// Build the result map for an engine-side failure.
    pub fn error_result(message: impl Into<String>) -> ResultMap {
        let message: String = message.into();
        ResultMap::new().with(ERROR_KEY, message)
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
