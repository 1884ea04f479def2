//! Error types for the Machines API client.
//!
//! # Design
//! Only two things can go wrong with a call. Either the exchange completed
//! with a non-2xx status, in which case the whole envelope is handed back so
//! the caller can read the remote error body, or the exchange never
//! completed and there is no envelope at all.

use thiserror::Error;

use crate::http::Response;

/// The exchange did not complete: DNS, connect, TLS, timeout or I/O failure.
#[derive(Debug, Error)]
#[error("transport failure: {message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure outcome of a `MachinesClient` operation.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a status outside `200..300`.
    #[error("HTTP {}: {}", .0.status(), .0.body())]
    Status(Response),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// The response envelope, when the exchange completed.
    pub fn response(&self) -> Option<&Response> {
        match self {
            ClientError::Status(response) => Some(response),
            ClientError::Transport(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(Response::status)
    }
}

/// Result of every client operation.
pub type ApiResult = Result<Response, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_error_exposes_envelope() {
        let response = Response::new(
            404,
            vec![("content-type", "application/json")],
            json!({"error": "app not found"}),
        );
        let err = ClientError::Status(response);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.response().unwrap().body()["error"], "app not found");
        assert_eq!(err.to_string(), r#"HTTP 404: {"error":"app not found"}"#);
    }

    #[test]
    fn transport_error_has_no_envelope() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ClientError::from(TransportError::with_source("connect failed", io));
        assert!(err.response().is_none());
        assert_eq!(err.to_string(), "transport failure: connect failed");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "refused");
    }
}
