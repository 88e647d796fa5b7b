//! Error handling for the router
//!
//! Three layers of errors live here:
//!
//! - [`RouterError`]: registration and protocol failures returned from the
//!   crate's own APIs (bad patterns, id collisions, malformed payloads).
//! - [`RouteError`]: what ends up in `errors` on the router state or the
//!   static handler context. Either a structured [`ErrorResponse`]
//!   (an intentional 4xx/5xx) or a sanitized [`Exception`].
//! - [`Thrown`]: what a loader or action raises. A thrown [`Response`] with a
//!   redirect status is not an error at all; it is intercepted and turned into
//!   a navigation.

use crate::request::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ============================================================================
// RouterError
// ============================================================================

/// Errors returned by the router's own APIs.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A route path failed validation.
    #[error("invalid route path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// An absolute child path does not start with its parent's full path.
    #[error(
        "absolute route path \"{path}\" nested under path \"{parent}\" is not valid; \
         an absolute child route path must start with the combined path of all its parent routes"
    )]
    AbsolutePathMismatch { path: String, parent: String },

    /// An index route declared children.
    #[error("index routes must not have child routes (route path \"{path}\")")]
    IndexRouteWithChildren { path: String },

    /// Two routes in one manifest share an id.
    #[error("found a route id collision on id \"{0}\"; route ids must be unique")]
    DuplicateRouteId(String),

    /// A compiled path pattern was rejected by the regex engine.
    #[error("pattern '{pattern}' failed to compile: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A route id that is not in the manifest.
    #[error("no route with id \"{0}\"")]
    UnknownRoute(String),

    /// A context key was read without a value or a default.
    #[error("no value found for context key '{0}'")]
    MissingContextValue(String),

    /// A URL could not be parsed.
    #[error("invalid url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The single-fetch stream was malformed.
    #[error("single fetch decode failed: {0}")]
    Decode(String),

    /// The request was aborted before the query finished.
    #[error("{method} request to {url} was aborted")]
    Aborted { method: String, url: String },

    /// The router was disposed.
    #[error("router has been disposed")]
    Disposed,
}

// ============================================================================
// ServerMode
// ============================================================================

/// Controls how much detail escapes the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    /// Full error names and stacks.
    Development,
    /// Stacks withheld, error names collapsed to `Error`.
    #[default]
    Production,
    /// Same as production, but not logged as unexpected.
    Test,
}

impl ServerMode {
    /// Environment variable consulted by [`ServerMode::from_env`].
    pub const ENV_VAR: &'static str = "DATAROUTER_MODE";

    /// Read the mode from `DATAROUTER_MODE` (`development`, `production`, `test`).
    ///
    /// Unknown or missing values fall back to production.
    pub fn from_env() -> Self {
        std::env::var(Self::ENV_VAR)
            .ok()
            .map_or(Self::Production, |value| Self::parse(&value))
    }

    /// Parse a mode name, case-insensitively.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "test" => Self::Test,
            _ => Self::Production,
        }
    }

    /// Whether stacks and error names may be exposed.
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

// ============================================================================
// ErrorResponse / Exception / RouteError
// ============================================================================

/// An intentional 4xx/5xx raised by route code.
///
/// Never sanitized: it carries no stack to hide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: u16,
    pub status_text: String,
    #[serde(default)]
    pub data: Value,
    /// Set for errors produced by the router itself (404 no match, 405 no action).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
}

impl ErrorResponse {
    /// Create an error response; the status text is the canonical reason phrase.
    pub fn new(status: u16, data: impl Into<Value>) -> Self {
        Self {
            status,
            status_text: canonical_reason(status).to_string(),
            data: data.into(),
            internal: false,
        }
    }

    /// Override the status text.
    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.status_text = status_text.into();
        self
    }

    /// The router's own 404 for a URL no route matches.
    pub fn not_found(pathname: &str) -> Self {
        Self {
            internal: true,
            ..Self::new(404, format!("Error: No route matches URL \"{}\"", pathname))
        }
    }

    /// The router's own 405 for a submission to a route without an action.
    pub fn method_not_allowed(method: &str, pathname: &str, route_id: Option<&str>) -> Self {
        let message = match route_id {
            Some(id) => format!(
                "Error: You made a {} request to \"{}\" but did not provide an `action` for route \"{}\", so there is no way to handle the request.",
                method, pathname, id
            ),
            None => format!("Error: Invalid request method \"{}\"", method),
        };
        Self {
            internal: true,
            ..Self::new(405, message)
        }
    }

    /// A 400 raised by the router, for example for a malformed data request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            internal: true,
            ..Self::new(400, message.into())
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.status_text)
    }
}

/// A sanitized, serializable form of an unexpected failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Exception {
    /// A plain `Error` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
        }
    }

    /// An error with a specific name (subtype).
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a stack/trace description.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture a Rust error. The name is the error's type name, the "stack" is
    /// its `source()` chain.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized + 'static,
    {
        let name = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error")
            .to_string();
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("    caused by: {}", cause));
            source = cause.source();
        }
        Self {
            name,
            message: error.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// An error attributed to a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RouteError {
    #[serde(rename = "errorResponse")]
    Response(ErrorResponse),
    #[serde(rename = "error")]
    Exception(Exception),
}

impl RouteError {
    /// Shortcut for an unexpected failure with a message.
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception(Exception::new(message))
    }

    /// HTTP status implied by the error (500 for exceptions).
    pub fn status(&self) -> u16 {
        match self {
            Self::Response(response) => response.status,
            Self::Exception(_) => 500,
        }
    }

    /// Whether this is a structured route error response.
    pub fn is_error_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Strip what must not leave the process in `mode`.
    ///
    /// Error responses pass through untouched; exceptions lose their stack
    /// and subtype name outside development.
    pub fn sanitize(&self, mode: ServerMode) -> Self {
        match self {
            Self::Response(_) => self.clone(),
            Self::Exception(_) if mode.is_development() => self.clone(),
            Self::Exception(exception) => Self::Exception(Exception::new(exception.message.clone())),
        }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(response) => write!(f, "{}", response),
            Self::Exception(exception) => write!(f, "{}", exception),
        }
    }
}

impl From<ErrorResponse> for RouteError {
    fn from(response: ErrorResponse) -> Self {
        Self::Response(response)
    }
}

impl From<Exception> for RouteError {
    fn from(exception: Exception) -> Self {
        Self::Exception(exception)
    }
}

// ============================================================================
// Thrown
// ============================================================================

/// A value raised by a loader, action or middleware.
///
/// Any `std::error::Error` converts into `Thrown` with `?`, so handlers can
/// propagate ordinary errors. Throwing a [`Response`] signals either a redirect
/// or a structured error response, depending on its status.
#[derive(Debug)]
pub enum Thrown {
    Response(Response),
    Error(RouteError),
}

impl Thrown {
    /// Raise a structured error response.
    pub fn status(status: u16, data: impl Into<Value>) -> Self {
        Self::Error(RouteError::Response(ErrorResponse::new(status, data)))
    }

    /// Raise an unexpected failure.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Error(RouteError::exception(message))
    }
}

impl<E> From<E> for Thrown
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Error(RouteError::Exception(Exception::from_error(&error)))
    }
}

impl From<Response> for Thrown {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<RouteError> for Thrown {
    fn from(error: RouteError) -> Self {
        Self::Error(error)
    }
}

impl From<ErrorResponse> for Thrown {
    fn from(response: ErrorResponse) -> Self {
        Self::Error(RouteError::Response(response))
    }
}

impl From<Exception> for Thrown {
    fn from(exception: Exception) -> Self {
        Self::Error(RouteError::Exception(exception))
    }
}

/// Reason phrase for a status code, empty when unknown.
pub(crate) fn canonical_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_status_text() {
        let response = ErrorResponse::new(404, json!("missing"));
        assert_eq!(response.status_text, "Not Found");
        assert_eq!(response.to_string(), "404 Not Found");
        assert!(!response.internal);
    }

    #[test]
    fn test_not_found_is_internal() {
        let response = ErrorResponse::not_found("/nope");
        assert_eq!(response.status, 404);
        assert!(response.internal);
        assert_eq!(response.data, json!("Error: No route matches URL \"/nope\""));
    }

    #[test]
    fn test_sanitize_exception_in_production() {
        let error = RouteError::Exception(
            Exception::named("TypeError", "boom").with_stack("at loader"),
        );
        let sanitized = error.sanitize(ServerMode::Production);
        assert_eq!(sanitized, RouteError::Exception(Exception::new("boom")));

        let dev = error.sanitize(ServerMode::Development);
        assert_eq!(dev, error);
    }

    #[test]
    fn test_sanitize_keeps_error_responses() {
        let error = RouteError::Response(ErrorResponse::new(403, json!({"reason": "nope"})));
        assert_eq!(error.sanitize(ServerMode::Production), error);
        assert_eq!(error.status(), 403);
    }

    #[test]
    fn test_route_error_serde_shape() {
        let error = RouteError::Response(ErrorResponse::new(401, json!(null)));
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(
            value,
            json!({"type": "errorResponse", "status": 401, "statusText": "Unauthorized", "data": null})
        );

        let exception = RouteError::exception("bad");
        let value = serde_json::to_value(&exception).unwrap();
        assert_eq!(value, json!({"type": "error", "name": "Error", "message": "bad"}));
        let back: RouteError = serde_json::from_value(value).unwrap();
        assert_eq!(back, exception);
    }

    #[test]
    fn test_thrown_from_std_error() {
        fn failing() -> Result<u32, Thrown> {
            let n: u32 = "x".parse()?;
            Ok(n)
        }
        match failing() {
            Err(Thrown::Error(RouteError::Exception(exception))) => {
                assert_eq!(exception.name, "ParseIntError");
                assert!(exception.message.contains("invalid digit"));
            }
            other => panic!("expected exception, got {:?}", other),
        }
    }

    #[test]
    fn test_server_mode_parse() {
        assert_eq!(ServerMode::parse("Development"), ServerMode::Development);
        assert_eq!(ServerMode::parse("test"), ServerMode::Test);
        assert_eq!(ServerMode::parse("anything"), ServerMode::Production);
    }
}
