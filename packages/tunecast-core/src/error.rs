//! Centralized error types for the DAAP core.
//!
//! Protocol errors map onto the small set of HTTP statuses DAAP clients
//! understand; everything is answered with a status line and a short UTF-8
//! body. Transport failures are plain `io::Error` and abort only the
//! connection they happened on.

use thiserror::Error;

/// Protocol-level failure, mapped to an HTTP status by the router.
#[derive(Debug, Error)]
pub enum DaapError {
    /// The request line, headers, or a path/query component could not be
    /// parsed, or referenced an id the library does not know.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A library endpoint was hit without a live session.
    #[error("forbidden")]
    Forbidden,

    /// Basic credentials were missing or wrong; answered with a challenge.
    #[error("unauthorized")]
    Unauthorized,

    /// The `max_users` cap is reached.
    #[error("too many users")]
    TooManyUsers,

    /// Unknown resource, and the answer to `/update` during shutdown.
    #[error("not found")]
    NotFound,

    /// Handler failure that is the server's fault. The message becomes the
    /// response body verbatim (clients match on `"no file"`).
    #[error("{0}")]
    Internal(String),
}

impl DaapError {
    /// The HTTP status this error is written as.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MalformedRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::TooManyUsers => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Short response body accompanying the status.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::MalformedRequest(msg) => msg.clone(),
            Self::Unauthorized => "unauthorized".to_string(),
            Self::Forbidden => String::new(),
            Self::NotFound => "not found".to_string(),
            Self::TooManyUsers => "too many users".to_string(),
            Self::Internal(msg) => msg.clone(),
        }
    }
}

/// Convenient Result alias for protocol operations.
pub type DaapResult<T> = Result<T, DaapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_protocol_contract() {
        assert_eq!(DaapError::MalformedRequest("x".into()).status(), 400);
        assert_eq!(DaapError::Unauthorized.status(), 401);
        assert_eq!(DaapError::Forbidden.status(), 403);
        assert_eq!(DaapError::NotFound.status(), 404);
        assert_eq!(DaapError::Internal("no file".into()).status(), 500);
        assert_eq!(DaapError::TooManyUsers.status(), 503);
    }

    #[test]
    fn too_many_users_body_is_verbatim() {
        assert_eq!(DaapError::TooManyUsers.body(), "too many users");
    }

    #[test]
    fn forbidden_body_is_empty() {
        assert!(DaapError::Forbidden.body().is_empty());
    }
}
