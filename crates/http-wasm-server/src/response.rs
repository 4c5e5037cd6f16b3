//! Error responses for failed exchanges.
//!
//! Every failure (a guest trap, a protocol violation, pool backpressure)
//! is answered with a JSON body of the form `{"error": "..."}`. The
//! [`ErrorPolicy`] decides the status and whether the underlying error
//! message is shown to the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use http_wasm_common::config_file::ErrorPolicyConfig;
use http_wasm_common::{HostError, RuntimeError};

/// How failed exchanges are answered.
#[derive(Debug, Clone, Copy)]
pub struct ErrorPolicy {
    /// Status for guest and host failures.
    pub status: StatusCode,
    /// Include the error message in the body.
    pub expose_details: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            expose_details: false,
        }
    }
}

impl ErrorPolicy {
    /// Build a policy from its file form.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidConfig`] for a status outside
    /// `100..=999`.
    pub fn from_config(config: &ErrorPolicyConfig) -> Result<Self, RuntimeError> {
        let status = StatusCode::from_u16(config.status).map_err(|_| {
            RuntimeError::invalid_config(format!("Invalid error status: {}", config.status))
        })?;
        Ok(Self {
            status,
            expose_details: config.expose_details,
        })
    }

    /// Status for `error`.
    ///
    /// Backpressure and shutdown map to 503 and oversized bodies to 413
    /// regardless of the configured status.
    pub fn status_for(&self, error: &RuntimeError) -> StatusCode {
        match error {
            RuntimeError::PoolExhausted { .. } | RuntimeError::Closed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RuntimeError::Host(HostError::BodyTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => self.status,
        }
    }

    /// Answer a failed exchange.
    pub fn respond(&self, error: &RuntimeError) -> Response {
        let status = self.status_for(error);
        warn!(status = status.as_u16(), error = %error, "Exchange failed");

        let message = if self.expose_details {
            error.to_string()
        } else {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        };
        error_response(status, &message)
    }
}

/// A JSON error body with `status`.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_wasm_common::ProtocolError;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_policy_hides_details() {
        let policy = ErrorPolicy::default();
        let err = RuntimeError::trap("unreachable", Some("UnreachableCodeReached".into()));
        assert_eq!(policy.status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);

        let response = policy.respond(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
    }

    #[test]
    fn test_configured_status() {
        let policy = assert_ok!(ErrorPolicy::from_config(&ErrorPolicyConfig {
            status: 502,
            expose_details: true,
        }));
        let err = RuntimeError::Protocol(ProtocolError::Unhandled);
        assert_eq!(policy.status_for(&err), StatusCode::BAD_GATEWAY);
        assert!(policy.expose_details);
    }

    #[test]
    fn test_invalid_configured_status() {
        let err = assert_err!(ErrorPolicy::from_config(&ErrorPolicyConfig {
            status: 42,
            expose_details: false,
        }));
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_backpressure_is_unavailable() {
        let policy = ErrorPolicy::default();
        assert_eq!(
            policy.status_for(&RuntimeError::PoolExhausted { waited_ms: 0 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            policy.status_for(&RuntimeError::Closed),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_body_too_large() {
        let policy = ErrorPolicy::default();
        let err = RuntimeError::Host(HostError::BodyTooLarge { limit: 10 });
        assert_eq!(policy.status_for(&err), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
