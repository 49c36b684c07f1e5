//! Invocation responses.
//!
//! A [`Response`] is what every dispatch produces: either returned directly to
//! the script caller or pushed later through a callback handle. The serialized
//! form is the wire shape the script side consumes:
//!
//! ```json
//! { "statusCode": "SUCCESS", "message": null, "payload": { "type": "json", "data": {} }, "terminal": true }
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Outcome kind of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// The invocation succeeded.
    Success,
    /// The feature failed while executing.
    GenericError,
    /// The parameters were malformed or rejected.
    IllegalArgument,
    /// The feature instance could not be constructed or reached.
    ServiceUnavailable,
    /// The invocation was not authorized.
    NoPermission,
    /// The feature or action does not exist.
    NotFound,
}

impl StatusCode {
    /// Numeric code understood by script-side runtimes.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::GenericError => 200,
            Self::IllegalArgument => 202,
            Self::ServiceUnavailable => 203,
            Self::NotFound => 801,
            Self::NoPermission => 804,
        }
    }

    /// Reverse of [`code`](Self::code).
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            200 => Some(Self::GenericError),
            202 => Some(Self::IllegalArgument),
            203 => Some(Self::ServiceUnavailable),
            801 => Some(Self::NotFound),
            804 => Some(Self::NoPermission),
            _ => None,
        }
    }

    /// Whether this status reports success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::GenericError => "GENERIC_ERROR",
            Self::IllegalArgument => "ILLEGAL_ARGUMENT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::NoPermission => "NO_PERMISSION",
            Self::NotFound => "NOT_FOUND",
        };
        f.write_str(name)
    }
}

/// Response body: structured JSON or opaque bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// A JSON value.
    Json(serde_json::Value),
    /// Raw bytes, base64 encoded on the wire.
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Payload {
    /// The JSON value, if this is a JSON payload.
    #[must_use]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// The raw bytes, if this is a byte payload.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Json(_) => None,
        }
    }
}

mod base64_bytes {
    use super::{Deserialize, Deserializer, Engine, STANDARD, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Result of one invocation or one callback delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    terminal: bool,
}

impl Response {
    /// A successful, empty, terminal response.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::Success,
            message: None,
            payload: None,
            terminal: true,
        }
    }

    /// The immediate acknowledgement returned for deferred modes.
    ///
    /// It is success-with-empty-payload and marked non-terminal: the real
    /// result follows through the callback handle.
    #[must_use]
    pub fn ack() -> Self {
        Self::success().with_terminal(false)
    }

    /// A successful response carrying a JSON payload.
    #[must_use]
    pub fn json(value: serde_json::Value) -> Self {
        Self::success().with_payload(Payload::Json(value))
    }

    /// A successful response carrying raw bytes.
    #[must_use]
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::success().with_payload(Payload::Bytes(bytes.into()))
    }

    /// An error response with a message.
    #[must_use]
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status,
            message: Some(message.into()),
            payload: None,
            terminal: true,
        }
    }

    /// `NOT_FOUND` with a message.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(StatusCode::NotFound, message)
    }

    /// `NO_PERMISSION` with a message.
    #[must_use]
    pub fn no_permission(message: impl Into<String>) -> Self {
        Self::error(StatusCode::NoPermission, message)
    }

    /// `ILLEGAL_ARGUMENT` with a message.
    #[must_use]
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::error(StatusCode::IllegalArgument, message)
    }

    /// `SERVICE_UNAVAILABLE` with a message.
    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::error(StatusCode::ServiceUnavailable, message)
    }

    /// `GENERIC_ERROR` with a message.
    #[must_use]
    pub fn generic_error(message: impl Into<String>) -> Self {
        Self::error(StatusCode::GenericError, message)
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the terminal flag.
    #[must_use]
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    /// Status of this response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status_code
    }

    /// Whether the status is [`StatusCode::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.is_success()
    }

    /// Optional human-readable message.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Optional payload.
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Whether this is the final delivery for its request.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Serialize into the JSON wire shape.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "statusCode": StatusCode::GenericError,
                "message": format!("response serialization failed: {e}"),
                "terminal": true,
            })
        })
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_round_trip() {
        for status in [
            StatusCode::Success,
            StatusCode::GenericError,
            StatusCode::IllegalArgument,
            StatusCode::ServiceUnavailable,
            StatusCode::NoPermission,
            StatusCode::NotFound,
        ] {
            assert_eq!(StatusCode::from_code(status.code()), Some(status));
        }
        assert_eq!(StatusCode::from_code(42), None);
    }

    #[test]
    fn ack_is_empty_non_terminal_success() {
        let ack = Response::ack();
        assert!(ack.is_success());
        assert!(ack.payload().is_none());
        assert!(!ack.is_terminal());
    }

    #[test]
    fn wire_shape_for_json_payload() {
        let value = Response::json(json!({"pong": true})).to_json();
        assert_eq!(value["statusCode"], "SUCCESS");
        assert_eq!(value["payload"]["type"], "json");
        assert_eq!(value["payload"]["data"]["pong"], true);
        assert_eq!(value["terminal"], true);
        assert!(value.get("message").is_none());
    }

    #[test]
    fn bytes_payload_is_base64_on_the_wire() {
        let value = Response::bytes(vec![0xde, 0xad, 0xbe, 0xef]).to_json();
        assert_eq!(value["payload"]["type"], "bytes");
        assert_eq!(value["payload"]["data"], "3q2+7w==");

        let parsed: Response = serde_json::from_value(value).unwrap();
        assert_eq!(
            parsed.payload().and_then(Payload::as_bytes),
            Some(&[0xde, 0xad, 0xbe, 0xef][..])
        );
    }

    #[test]
    fn error_response_carries_message() {
        let response = Response::no_permission("location denied");
        assert_eq!(response.status(), StatusCode::NoPermission);
        assert_eq!(response.to_json()["statusCode"], "NO_PERMISSION");
        assert_eq!(response.message(), Some("location denied"));
    }
}
