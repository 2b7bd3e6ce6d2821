//! Error types for the data access layer

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Programming-contract and construction errors.
///
/// Operation failures reported by a backend never surface through this type;
/// they are folded into a failed [`DataProviderResponse`](crate::DataProviderResponse).
#[derive(Error, Debug)]
pub enum Error {
    // Validation Errors
    #[error("Either 'id' or 'filter' must be provided for {0} operation.")]
    MissingTarget(&'static str),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid file type: {file_type}. Allowed types: {}", .allowed.join(", "))]
    InvalidFileType {
        file_type: String,
        allowed: Vec<String>,
    },

    #[error("No files found.")]
    NoFiles,

    #[error("Validation error: {0}")]
    ValidationError(String),

    // Contract Errors
    #[error("Operation not supported by this adapter: {0}")]
    Unsupported(&'static str),

    // General Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for dataport operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::MissingTarget(_)
            | Self::InvalidFilter(_)
            | Self::NoFiles
            | Self::ValidationError(_) => 400,

            // 415 Unsupported Media Type
            Self::InvalidFileType { .. } => 415,

            // 501 Not Implemented
            Self::Unsupported(_) => 501,

            Self::Transport(err) => err.status().unwrap_or(500),

            // 500 Internal Server Error
            Self::ConfigError(_) | Self::JsonError(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingTarget(_) => "missing_target",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::InvalidFileType { .. } => "invalid_file_type",
            Self::NoFiles => "no_files",
            Self::ValidationError(_) => "validation_error",
            Self::Unsupported(_) => "unsupported",
            Self::ConfigError(_) => "config_error",
            Self::Transport(_) => "transport_error",
            Self::JsonError(_) => "json_error",
        }
    }
}

/// Closed classification of everything that can go wrong at the transport
/// boundary. Produced exactly once, where the HTTP client hands back control.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("Request failed with status {status}")]
    Status { status: u16, body: JsonValue },

    /// The request was sent but nothing came back.
    #[error("No response received from server: {0}")]
    NoResponse(String),

    /// The request could not be built or sent.
    #[error("Request setup error: {0}")]
    Setup(String),

    /// A response arrived but its body could not be decoded.
    #[error("Response decode error: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body, when one was received
    pub fn body(&self) -> Option<&JsonValue> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::NoResponse(_) => "no_response",
            Self::Setup(_) => "setup",
            Self::Decode(_) => "decode",
        }
    }

    /// JSON rendering kept as the envelope's `originalError`
    pub fn to_json(&self) -> JsonValue {
        let mut value = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Self::Status { status, body } = self {
            value["status"] = JsonValue::from(*status);
            value["body"] = body.clone();
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::MissingTarget("remove").status_code(), 400);
        assert_eq!(Error::Unsupported("upload").status_code(), 501);
        let transport = TransportError::Status {
            status: 404,
            body: JsonValue::Null,
        };
        assert_eq!(Error::from(transport).status_code(), 404);
    }

    #[test]
    fn test_invalid_file_type_lists_allowed() {
        let err = Error::InvalidFileType {
            file_type: "text/plain".to_string(),
            allowed: vec!["image/png".to_string(), "image/jpeg".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid file type: text/plain. Allowed types: image/png, image/jpeg"
        );
        assert_eq!(err.error_code(), "invalid_file_type");
    }

    #[test]
    fn test_transport_json() {
        let err = TransportError::Status {
            status: 401,
            body: serde_json::json!({"message": "JWT expired"}),
        };
        let json = err.to_json();
        assert_eq!(json["kind"], "status");
        assert_eq!(json["status"], 401);
        assert_eq!(json["body"]["message"], "JWT expired");
    }
}
