//! Uniform response envelope and the rules that normalize backend output into it

use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::error::TransportError;

/// Message used when nothing better is known about a failure
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred";

/// Message used for successful queries without a more specific message
pub const GENERIC_SUCCESS_MESSAGE: &str = "Query executed successfully";

/// Message for requests that never got an answer
pub const NO_RESPONSE_MESSAGE: &str = "No response received from server";

/// The only shape ever handed back to callers, whatever the backend.
///
/// `success` is true exactly when `errors` is `None`; a failed envelope
/// always carries `data: None`.
///
/// An envelope read from JSON serializes back to the same value: keys it
/// did not carry stay absent and unknown top-level keys land in `extra`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataProviderResponse<T = JsonValue> {
    pub success: bool,
    pub message: String,
    pub errors: Option<JsonValue>,
    pub data: Option<T>,
    pub status: String,
    pub original_error: Option<JsonValue>,
    /// Top-level keys outside the envelope, such as a pagination `meta` block
    pub extra: Map<String, JsonValue>,
    absent: Absent,
}

/// Optional envelope keys missing from the body an envelope was read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Absent {
    message: bool,
    errors: bool,
    data: bool,
    status: bool,
}

impl Absent {
    fn of(map: &Map<String, JsonValue>) -> Self {
        Self {
            message: !map.contains_key("message"),
            errors: !map.contains_key("errors"),
            data: !map.contains_key("data"),
            status: !map.contains_key("status"),
        }
    }
}

impl<T> DataProviderResponse<T> {
    /// Successful envelope
    pub fn ok(data: T, message: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            errors: None,
            data: Some(data),
            status: status.into(),
            original_error: None,
            extra: Map::new(),
            absent: Absent::default(),
        }
    }

    /// Failed envelope
    pub fn failure(
        message: impl Into<String>,
        errors: Option<JsonValue>,
        status: impl Into<String>,
        original_error: Option<JsonValue>,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors,
            data: None,
            status: status.into(),
            original_error,
            extra: Map::new(),
            absent: Absent::default(),
        }
    }

    /// Map a query-builder style result that carries both `data` and `error`.
    ///
    /// A falsy `error` means success. The status defaults to `200`/`500` and
    /// the message prefers `message`, then the error's own message.
    pub fn from_result(
        data: Option<T>,
        error: Option<JsonValue>,
        status: Option<u16>,
        message: Option<&str>,
    ) -> Self {
        let error = error.filter(is_truthy);
        let success = error.is_none();
        let message = message
            .map(str::to_string)
            .or_else(|| error.as_ref().and_then(error_message))
            .unwrap_or_else(|| {
                if success {
                    GENERIC_SUCCESS_MESSAGE.to_string()
                } else {
                    GENERIC_ERROR_MESSAGE.to_string()
                }
            });
        let status = status.map_or_else(
            || if success { "200" } else { "500" }.to_string(),
            |s| s.to_string(),
        );

        match error {
            None => Self {
                success: true,
                message,
                errors: None,
                data,
                status,
                original_error: None,
                extra: Map::new(),
                absent: Absent::default(),
            },
            Some(error) => Self::failure(
                message,
                Some(JsonValue::Array(vec![error.clone()])),
                status,
                Some(error),
            ),
        }
    }

    /// Envelope for an error value that carries its own message
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::failure(
            err.to_string(),
            None,
            "error",
            Some(JsonValue::String(err.to_string())),
        )
    }

    /// HTTP transport mapping: status failures, missing responses and setup failures
    pub fn from_transport_error(err: &TransportError) -> Self {
        let (message, errors) = match err {
            TransportError::Status { status, body } => {
                let message = body
                    .get("message")
                    .and_then(JsonValue::as_str)
                    .map_or_else(
                        || format!("Request failed with status {status}"),
                        str::to_string,
                    );
                let errors = match body.get("errors") {
                    Some(errors) if !errors.is_null() => Some(errors.clone()),
                    _ if body.is_null() => None,
                    _ => Some(body.clone()),
                };
                (message, errors)
            }
            TransportError::NoResponse(_) => (NO_RESPONSE_MESSAGE.to_string(), None),
            TransportError::Setup(cause) => (format!("Request setup error: {cause}"), None),
            TransportError::Decode(cause) => (format!("Invalid response body: {cause}"), None),
        };
        Self::failure(message, errors, "error", Some(err.to_json()))
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Transform the payload, keeping every other field
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> DataProviderResponse<U> {
        DataProviderResponse {
            success: self.success,
            message: self.message,
            errors: self.errors,
            data: self.data.map(f),
            status: self.status,
            original_error: self.original_error,
            extra: self.extra,
            absent: self.absent,
        }
    }
}

impl DataProviderResponse<JsonValue> {
    /// Decode the JSON payload into a concrete type.
    ///
    /// A payload that does not fit `T` turns the envelope into a failure.
    pub fn decode<T: DeserializeOwned>(self) -> DataProviderResponse<T> {
        let decoded = match &self.data {
            None => Ok(None),
            Some(data) => T::deserialize(data).map(Some),
        };
        match decoded {
            Ok(data) => DataProviderResponse {
                success: self.success,
                message: self.message,
                errors: self.errors,
                data,
                status: self.status,
                original_error: self.original_error,
                extra: self.extra,
                absent: self.absent,
            },
            Err(err) => DataProviderResponse::failure(
                format!("Invalid response payload: {err}"),
                None,
                "error",
                self.original_error,
            ),
        }
    }
}

/// Normalize an arbitrary backend body into the envelope.
///
/// Bodies that already carry a `success` field are passed through as-is,
/// strings become the message and any other object becomes the `errors`
/// payload under a generic message.
pub fn process_api_response(raw: JsonValue) -> DataProviderResponse<JsonValue> {
    if let JsonValue::Object(map) = &raw {
        if map.contains_key("success") {
            return DataProviderResponse::deserialize(&raw).unwrap_or_else(|_| lenient_envelope(map));
        }
    }

    let (message, errors) = match &raw {
        JsonValue::String(message) => (message.clone(), None),
        JsonValue::Object(_) => (GENERIC_ERROR_MESSAGE.to_string(), Some(raw.clone())),
        _ => (GENERIC_ERROR_MESSAGE.to_string(), None),
    };
    DataProviderResponse::failure(message, errors, "error", Some(raw))
}

/// Envelope-shaped body whose fields do not have the expected types
fn lenient_envelope(raw: &Map<String, JsonValue>) -> DataProviderResponse<JsonValue> {
    let mut extra = raw.clone();
    let absent = Absent::of(&extra);
    let success = extra.remove("success").is_some_and(|s| is_truthy(&s));
    let errors = extra.remove("errors").filter(|e| !e.is_null());
    let data = extra.remove("data").filter(|d| success && !d.is_null());
    let message = match extra.remove("message") {
        Some(JsonValue::String(s)) => s,
        _ => String::new(),
    };
    let status = match extra.remove("status") {
        Some(JsonValue::String(s)) => s,
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    DataProviderResponse {
        success: success && errors.is_none(),
        message,
        data: if errors.is_none() { data } else { None },
        errors,
        status,
        original_error: extra.remove("originalError"),
        extra,
        absent,
    }
}

impl<T: Serialize> Serialize for DataProviderResponse<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("success", &self.success)?;
        if !self.message.is_empty() || !self.absent.message {
            map.serialize_entry("message", &self.message)?;
        }
        if self.errors.is_some() || !self.absent.errors {
            map.serialize_entry("errors", &self.errors)?;
        }
        if self.data.is_some() || !self.absent.data {
            map.serialize_entry("data", &self.data)?;
        }
        if !self.status.is_empty() || !self.absent.status {
            map.serialize_entry("status", &self.status)?;
        }
        if let Some(original_error) = &self.original_error {
            map.serialize_entry("originalError", original_error)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for DataProviderResponse<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut extra = Map::<String, JsonValue>::deserialize(deserializer)?;
        let absent = Absent::of(&extra);

        let success = match extra.remove("success") {
            Some(JsonValue::Bool(success)) => success,
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "`success` must be a boolean, got {other}"
                )))
            }
            None => return Err(de::Error::missing_field("success")),
        };
        let message = take::<String, D::Error>(&mut extra, "message")?;
        let errors = take::<Option<JsonValue>, D::Error>(&mut extra, "errors")?;
        let data = take::<Option<T>, D::Error>(&mut extra, "data")?;
        let status = take::<String, D::Error>(&mut extra, "status")?;
        // a null originalError stays in `extra` so it serializes back unchanged
        let original_error = match extra.get("originalError") {
            Some(value) if !value.is_null() => extra.remove("originalError"),
            _ => None,
        };

        Ok(Self {
            success,
            message: message.unwrap_or_default(),
            errors: errors.flatten(),
            data: data.flatten(),
            status: status.unwrap_or_default(),
            original_error,
            extra,
            absent,
        })
    }
}

fn take<'de, V: Deserialize<'de>, E: de::Error>(
    map: &mut Map<String, JsonValue>,
    key: &'static str,
) -> Result<Option<V>, E> {
    map.remove(key)
        .map(|value| V::deserialize(value).map_err(|err| E::custom(format!("`{key}`: {err}"))))
        .transpose()
}

/// Message carried by a backend error object
pub fn error_message(error: &JsonValue) -> Option<String> {
    match error {
        JsonValue::String(message) => Some(message.clone()),
        JsonValue::Object(map) => map
            .get("message")
            .or_else(|| map.get("msg"))
            .or_else(|| map.get("error_description"))
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_passthrough_is_idempotent() {
        let raw = json!({
            "success": true,
            "message": "ok",
            "errors": null,
            "data": [{"id": 1}],
            "status": "success"
        });
        let normalized = process_api_response(raw.clone());
        assert_eq!(serde_json::to_value(&normalized).unwrap(), raw);

        let again = process_api_response(serde_json::to_value(&normalized).unwrap());
        assert_eq!(again, normalized);
    }

    #[test]
    fn test_passthrough_keeps_extra_keys_and_omits_absent_ones() {
        let raw = json!({"success": true, "message": "ok", "data": [1], "meta": {"total": 5}});
        let response = process_api_response(raw.clone());
        assert!(response.success);
        assert_eq!(response.extra.get("meta"), Some(&json!({"total": 5})));
        assert_eq!(serde_json::to_value(&response).unwrap(), raw);

        let raw = json!({"success": false, "errors": [{"code": "E1"}], "originalError": null});
        let response = process_api_response(raw.clone());
        assert!(!response.success);
        assert!(response.original_error.is_none());
        assert_eq!(serde_json::to_value(&response).unwrap(), raw);
    }

    #[test]
    fn test_passthrough_survives_decode() {
        let raw = json!({"success": true, "data": [1, 2], "meta": {"page": 1}});
        let response = process_api_response(raw.clone()).decode::<Vec<u32>>();
        assert_eq!(response.data, Some(vec![1, 2]));
        assert_eq!(serde_json::to_value(&response).unwrap(), raw);
    }

    #[test]
    fn test_mistyped_envelope_keeps_extra_keys() {
        let response = process_api_response(json!({
            "success": 1,
            "message": "ok",
            "data": {"id": 1},
            "status": 200,
            "meta": {"total": 1}
        }));
        assert!(response.success);
        assert_eq!(response.status, "200");
        assert_eq!(response.data, Some(json!({"id": 1})));
        assert_eq!(response.extra.get("meta"), Some(&json!({"total": 1})));
    }

    #[test]
    fn test_built_envelopes_always_carry_every_key() {
        let value = serde_json::to_value(DataProviderResponse::ok(json!([]), "", "200")).unwrap();
        assert_eq!(
            value,
            json!({"success": true, "message": "", "errors": null, "data": [], "status": "200"})
        );
    }

    #[test]
    fn test_string_becomes_message() {
        let response = process_api_response(json!("Something broke"));
        assert!(!response.success);
        assert_eq!(response.message, "Something broke");
        assert!(response.errors.is_none());
        assert!(response.data.is_none());
        assert_eq!(response.status, "error");
    }

    #[test]
    fn test_object_becomes_errors() {
        let raw = json!({"email": ["is required"]});
        let response = process_api_response(raw.clone());
        assert!(!response.success);
        assert_eq!(response.message, GENERIC_ERROR_MESSAGE);
        assert_eq!(response.errors, Some(raw));
    }

    #[test]
    fn test_error_value_message() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let response = DataProviderResponse::<JsonValue>::from_error(&err);
        assert!(!response.success);
        assert_eq!(response.message, "disk on fire");
        assert_eq!(response.status, "error");
        assert!(response.errors.is_none());
    }

    #[test]
    fn test_from_result_success() {
        let response = DataProviderResponse::from_result(Some(json!([1, 2])), None, None, None);
        assert!(response.success);
        assert_eq!(response.status, "200");
        assert_eq!(response.message, GENERIC_SUCCESS_MESSAGE);
        assert_eq!(response.data, Some(json!([1, 2])));
    }

    #[test]
    fn test_from_result_error_prefers_backend_message() {
        let error = json!({"code": "23505", "message": "duplicate key value"});
        let response =
            DataProviderResponse::from_result(Some(json!([])), Some(error.clone()), None, None);
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.status, "500");
        assert_eq!(response.message, "duplicate key value");
        assert_eq!(response.errors, Some(json!([error])));
    }

    #[test]
    fn test_from_result_falsy_error_is_success() {
        let response =
            DataProviderResponse::from_result(Some(json!(1)), Some(JsonValue::Null), Some(201), None);
        assert!(response.success);
        assert_eq!(response.status, "201");
    }

    #[test]
    fn test_transport_status_mapping() {
        let err = TransportError::Status {
            status: 422,
            body: json!({"message": "The given data was invalid.", "errors": {"name": ["required"]}}),
        };
        let response = DataProviderResponse::<JsonValue>::from_transport_error(&err);
        assert_eq!(response.message, "The given data was invalid.");
        assert_eq!(response.errors, Some(json!({"name": ["required"]})));
        assert_eq!(response.status, "error");

        let err = TransportError::Status {
            status: 502,
            body: json!("Bad gateway"),
        };
        let response = DataProviderResponse::<JsonValue>::from_transport_error(&err);
        assert_eq!(response.message, "Request failed with status 502");
        assert_eq!(response.errors, Some(json!("Bad gateway")));
    }

    #[test]
    fn test_transport_no_response_and_setup() {
        let response = DataProviderResponse::<JsonValue>::from_transport_error(
            &TransportError::NoResponse("connection refused".to_string()),
        );
        assert_eq!(response.message, NO_RESPONSE_MESSAGE);
        assert!(response.errors.is_none());

        let response = DataProviderResponse::<JsonValue>::from_transport_error(
            &TransportError::Setup("relative URL without a base".to_string()),
        );
        assert_eq!(response.message, "Request setup error: relative URL without a base");
    }

    #[test]
    fn test_decode_typed_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: u32,
        }

        let response = DataProviderResponse::ok(json!({"id": 7}), "ok", "200");
        let typed = response.decode::<Item>();
        assert!(typed.success);
        assert_eq!(typed.data, Some(Item { id: 7 }));

        let response = DataProviderResponse::ok(json!("not an item"), "ok", "200");
        let typed = response.decode::<Item>();
        assert!(!typed.success);
        assert!(typed.data.is_none());
    }
}
