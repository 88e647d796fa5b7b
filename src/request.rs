//! Request and response model
//!
//! Loaders and actions receive a [`Request`] and may return or throw a
//! [`Response`]. Both carry `http` methods, status codes and headers; the
//! request additionally owns the cancellation token of the navigation, fetch
//! or server query it belongs to.

use crate::error::{canonical_reason, ErrorResponse, RouterError};
use crate::params::SearchParams;
use crate::warn_log;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use std::fmt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Ask the client to revalidate all loaders after following a redirect.
pub const REVALIDATE_HEADER: HeaderName = HeaderName::from_static("x-route-revalidate");
/// Ask the client to follow a redirect with a full document reload.
pub const RELOAD_DOCUMENT_HEADER: HeaderName = HeaderName::from_static("x-route-reload-document");
/// Ask the client to replace the current history entry when redirecting.
pub const REPLACE_HEADER: HeaderName = HeaderName::from_static("x-route-replace");

/// Statuses that describe a redirect.
pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];
/// Redirect statuses that preserve the method and body.
pub const REDIRECT_PRESERVE_METHOD_STATUSES: [u16; 2] = [307, 308];

pub fn is_redirect_status(status: u16) -> bool {
    REDIRECT_STATUSES.contains(&status)
}

// ============================================================================
// Form submissions
// ============================================================================

/// Method of a form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FormMethod {
    /// Everything but GET mutates.
    pub fn is_mutation(self) -> bool {
        self != Self::Get
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub fn to_method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Patch => Method::PATCH,
            Self::Delete => Method::DELETE,
        }
    }

    /// `None` for methods a form cannot submit with (HEAD, OPTIONS, ...).
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::PATCH => Some(Self::Patch),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of a submission body; decides which payload variant is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormEncType {
    #[default]
    UrlEncoded,
    Multipart,
    Json,
    Text,
}

impl FormEncType {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::UrlEncoded => "application/x-www-form-urlencoded",
            Self::Multipart => "multipart/form-data",
            Self::Json => "application/json",
            Self::Text => "text/plain",
        }
    }
}

/// Ordered form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: Vec<(String, String)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `application/x-www-form-urlencoded` serialization.
    pub fn to_urlencoded(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }

    pub fn parse_urlencoded(body: &str) -> Self {
        Self {
            fields: url::form_urlencoded::parse(body.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// Fields as search params, for GET submissions.
    pub fn to_search_params(&self) -> SearchParams {
        let mut search = SearchParams::new();
        for (k, v) in &self.fields {
            search.append(k.clone(), v.clone());
        }
        search
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Body of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionPayload {
    FormData(FormData),
    Json(Value),
    Text(String),
}

/// A form submission driving an action (or, for GET, a search change).
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub form_method: FormMethod,
    pub form_action: String,
    pub form_enc_type: FormEncType,
    pub payload: SubmissionPayload,
}

impl Submission {
    pub fn form(form_method: FormMethod, form_action: impl Into<String>, form_data: FormData) -> Self {
        Self {
            form_method,
            form_action: form_action.into(),
            form_enc_type: FormEncType::UrlEncoded,
            payload: SubmissionPayload::FormData(form_data),
        }
    }

    pub fn json(form_method: FormMethod, form_action: impl Into<String>, json: Value) -> Self {
        Self {
            form_method,
            form_action: form_action.into(),
            form_enc_type: FormEncType::Json,
            payload: SubmissionPayload::Json(json),
        }
    }

    pub fn text(form_method: FormMethod, form_action: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            form_method,
            form_action: form_action.into(),
            form_enc_type: FormEncType::Text,
            payload: SubmissionPayload::Text(text.into()),
        }
    }

    pub fn form_data(&self) -> Option<&FormData> {
        match &self.payload {
            SubmissionPayload::FormData(form_data) => Some(form_data),
            _ => None,
        }
    }

    pub fn json_payload(&self) -> Option<&Value> {
        match &self.payload {
            SubmissionPayload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn text_payload(&self) -> Option<&str> {
        match &self.payload {
            SubmissionPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn to_body(&self) -> RequestBody {
        match &self.payload {
            SubmissionPayload::FormData(form_data) => RequestBody::Form(form_data.clone()),
            SubmissionPayload::Json(value) => RequestBody::Json(value.clone()),
            SubmissionPayload::Text(text) => RequestBody::Text(text.clone()),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Form(FormData),
    Json(Value),
    Text(String),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Form(_) => Some(FormEncType::UrlEncoded.content_type()),
            Self::Json(_) => Some(FormEncType::Json.content_type()),
            Self::Text(_) => Some(FormEncType::Text.content_type()),
        }
    }
}

/// A request handed to loaders, actions and middleware.
///
/// Clones share the cancellation token.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    signal: CancellationToken,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            signal: CancellationToken::new(),
        }
    }

    /// GET request for an absolute URL string.
    pub fn get(url: &str) -> Result<Self, RouterError> {
        Ok(Self::new(Method::GET, parse_url(url)?))
    }

    /// POST request for an absolute URL string.
    pub fn post(url: &str, body: RequestBody) -> Result<Self, RouterError> {
        Ok(Self::new(Method::POST, parse_url(url)?).with_body(body))
    }

    /// Request for a submission; GET submissions carry no body.
    pub fn from_submission(url: Url, submission: &Submission) -> Self {
        let request = Self::new(submission.form_method.to_method(), url);
        if submission.form_method.is_mutation() {
            request.with_body(submission.to_body())
        } else {
            request
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        if let Some(content_type) = body.content_type() {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    /// Same headers and signal, different method, URL and body.
    pub(crate) fn derive(&self, method: Method, url: Url, body: RequestBody) -> Self {
        Self {
            method,
            url,
            headers: self.headers.clone(),
            body,
            signal: self.signal.clone(),
        }
        .with_body_content_type()
    }

    fn with_body_content_type(mut self) -> Self {
        match self.body.content_type() {
            Some(content_type) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            None => {
                self.headers.remove(CONTENT_TYPE);
            }
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn is_mutation(&self) -> bool {
        FormMethod::from_method(&self.method).is_some_and(FormMethod::is_mutation)
    }

    /// Form fields of a urlencoded body.
    pub fn form_data(&self) -> Option<&FormData> {
        match &self.body {
            RequestBody::Form(form_data) => Some(form_data),
            _ => None,
        }
    }

    /// `pathname + search` of the URL.
    pub fn path(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url, RouterError> {
    Url::parse(url).map_err(|source| RouterError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

// ============================================================================
// Response
// ============================================================================

/// Response body.
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Bytes),
    Stream(BoxStream<'static, Result<Bytes, RouterError>>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response returned or thrown by route code, or produced by the data
/// endpoint.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
        }
    }

    /// 200 with a JSON body.
    pub fn json(value: impl Into<Value>) -> Self {
        Self::new(200)
            .with_header(CONTENT_TYPE, "application/json")
            .with_body(ResponseBody::Json(value.into()))
    }

    /// 200 with a text body.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(200)
            .with_header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .with_body(ResponseBody::Text(text.into()))
    }

    /// Streamed body.
    pub fn stream(status: u16, body: BoxStream<'static, Result<Bytes, RouterError>>) -> Self {
        Self::new(status).with_body(ResponseBody::Stream(body))
    }

    /// 302 redirect.
    pub fn redirect(location: &str) -> Self {
        Self::redirect_with_status(location, 302)
    }

    pub fn redirect_with_status(location: &str, status: u16) -> Self {
        Self::new(status).with_header(LOCATION, location)
    }

    /// Redirect that also revalidates every loader on the client.
    pub fn redirect_revalidate(location: &str) -> Self {
        Self::redirect(location).with_header(REVALIDATE_HEADER, "yes")
    }

    /// Redirect that the client follows with a full document reload.
    pub fn redirect_document(location: &str) -> Self {
        Self::redirect(location).with_header(RELOAD_DOCUMENT_HEADER, "true")
    }

    /// Redirect that replaces the current history entry.
    pub fn replace(location: &str) -> Self {
        Self::redirect(location).with_header(REPLACE_HEADER, "true")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set a header; values that are not valid header text are dropped with a warning.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn_log!("Dropping invalid value for header '{}'", name),
        }
        self
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &'static str {
        canonical_reason(self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn into_parts(self) -> (u16, HeaderMap, ResponseBody) {
        (self.status, self.headers, self.body)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// A redirect status with a `Location` header.
    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status) && self.location().is_some()
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.contains_key(name)
    }

    /// Redirects carrying `Set-Cookie` or the revalidate header ask the client
    /// to reload every loader.
    pub(crate) fn requests_revalidation(&self) -> bool {
        self.has_header(&REVALIDATE_HEADER) || self.has_header(&SET_COOKIE)
    }

    /// The body as a byte stream.
    pub fn into_body_stream(self) -> BoxStream<'static, Result<Bytes, RouterError>> {
        match self.body {
            ResponseBody::Stream(stream) => stream,
            body => futures::stream::once(Self::new(self.status).with_body(body).bytes()).boxed(),
        }
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes, RouterError> {
        match self.body {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Json(value) => serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(|e| RouterError::Decode(e.to_string())),
            ResponseBody::Text(text) => Ok(Bytes::from(text)),
            ResponseBody::Bytes(bytes) => Ok(bytes),
            ResponseBody::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// The body as a value: JSON when it parses, a string otherwise, `null`
    /// when empty.
    pub async fn body_value(self) -> Result<Value, RouterError> {
        let is_json = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        match self.body {
            ResponseBody::Empty => Ok(Value::Null),
            ResponseBody::Json(value) => Ok(value),
            ResponseBody::Text(text) => Ok(Value::String(text)),
            body => {
                let bytes = Self::new(self.status).with_body(body).bytes().await?;
                if bytes.is_empty() {
                    return Ok(Value::Null);
                }
                if is_json {
                    if let Ok(value) = serde_json::from_slice(&bytes) {
                        return Ok(value);
                    }
                }
                Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
    }

    /// Turn a thrown non-redirect response into a route error response.
    pub async fn into_error_response(self) -> ErrorResponse {
        let status = self.status;
        let data = match self.body_value().await {
            Ok(value) => value,
            Err(e) => Value::String(e.to_string()),
        };
        ErrorResponse::new(status, data)
    }
}
