//! Single-fetch stream codec
//!
//! A single-fetch response is newline-delimited JSON. The first frame is the
//! root payload:
//!
//! - `{"routes": {"<route id>": <result>, ...}}` for loader requests
//! - `{"result": <result>}` for action requests
//! - `{"$redirect": {"status", "redirect", "revalidate", "reload", "replace"}}`
//!
//! where a result is `{"data": value}`, `{"error": error}` or
//! `{"$redirect": {...}}`. Deferred values are written into the root as
//! `{"$deferred": n}` placeholders and settled by later frames, in
//! completion order: `{"id": n, "data": value}` or `{"id": n, "error": error}`.
//!
//! Object keys in user data that start with `$` are escaped with one extra
//! `$`, so they never collide with the markers above.

use crate::data::{DataResult, DeferredData, Redirect};
use crate::error::{RouteError, RouterError, ServerMode};
use crate::trace_log;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered};
use futures::{FutureExt, StreamExt};
use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Marker key of a deferred placeholder.
pub const DEFERRED_KEY: &str = "$deferred";

/// Marker key of a redirect descriptor.
pub const REDIRECT_KEY: &str = "$redirect";

/// A stream of encoded bytes.
pub type ByteStream = BoxStream<'static, Result<Bytes, RouterError>>;

// ============================================================================
// Payload model
// ============================================================================

/// A decoded per-route result.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleFetchResult {
    Data(Value),
    Error(RouteError),
    Redirect(Redirect),
}

impl SingleFetchResult {
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }
}

impl From<SingleFetchResult> for DataResult {
    fn from(result: SingleFetchResult) -> Self {
        match result {
            SingleFetchResult::Data(data) => DataResult::data(data),
            SingleFetchResult::Error(error) => DataResult::Error {
                status: Some(error.status()),
                error,
                headers: HeaderMap::new(),
            },
            SingleFetchResult::Redirect(redirect) => DataResult::Redirect(redirect),
        }
    }
}

/// A decoded root payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleFetchPayload {
    Routes(HashMap<String, SingleFetchResult>),
    Result(SingleFetchResult),
    Redirect(Redirect),
}

/// A per-route result on its way out; deferred data streams its pending keys.
#[derive(Debug)]
pub enum OutgoingResult {
    Data(Value),
    Deferred(DeferredData),
    Error(RouteError),
    Redirect(Redirect),
}

impl From<DataResult> for OutgoingResult {
    fn from(result: DataResult) -> Self {
        match result {
            DataResult::Data { data, .. } => Self::Data(data),
            DataResult::Deferred { deferred, .. } => Self::Deferred(deferred),
            DataResult::Error { error, .. } => Self::Error(error),
            DataResult::Redirect(redirect) => Self::Redirect(redirect),
        }
    }
}

/// A root payload on its way out.
#[derive(Debug)]
pub enum OutgoingPayload {
    /// Route results in match order
    Routes(Vec<(String, OutgoingResult)>),
    Result(OutgoingResult),
    Redirect(Redirect),
}

// ============================================================================
// Encoding
// ============================================================================

struct Encoder {
    mode: ServerMode,
    next_id: u64,
    pending: FuturesUnordered<BoxFuture<'static, Value>>,
}

impl Encoder {
    fn result(&mut self, result: OutgoingResult) -> Value {
        match result {
            OutgoingResult::Data(data) => single("data", escape(data)),
            OutgoingResult::Deferred(deferred) => {
                let (data, pending) = deferred.into_parts();
                let mut object = escape_map(data);
                for (key, future) in pending {
                    let id = self.next_id;
                    self.next_id += 1;
                    object.insert(escape_key(key), single(DEFERRED_KEY, Value::from(id)));
                    let mode = self.mode;
                    self.pending
                        .push(future.map(move |settled| settlement_frame(id, settled, mode)).boxed());
                }
                single("data", Value::Object(object))
            }
            OutgoingResult::Error(error) => single("error", encode_error(&error, self.mode)),
            OutgoingResult::Redirect(redirect) => single(REDIRECT_KEY, redirect_value(&redirect)),
        }
    }
}

/// Encode a payload as a frame stream. Deferred keys are written as they
/// settle.
pub fn encode(payload: OutgoingPayload, mode: ServerMode) -> ByteStream {
    let mut encoder = Encoder {
        mode,
        next_id: 1,
        pending: FuturesUnordered::new(),
    };
    let root = match payload {
        OutgoingPayload::Routes(routes) => {
            let mut object = Map::new();
            for (route_id, result) in routes {
                let value = encoder.result(result);
                object.insert(route_id, value);
            }
            single("routes", Value::Object(object))
        }
        OutgoingPayload::Result(result) => single("result", encoder.result(result)),
        OutgoingPayload::Redirect(redirect) => single(REDIRECT_KEY, redirect_value(&redirect)),
    };
    trace_log!("Encoded root frame with {} deferred values", encoder.pending.len());

    stream::once(async move { Ok(frame(&root)) })
        .chain(encoder.pending.map(|settled| Ok(frame(&settled))))
        .boxed()
}

fn frame(value: &Value) -> Bytes {
    Bytes::from(format!("{}\n", value))
}

fn single(key: &str, value: Value) -> Value {
    let mut object = Map::new();
    object.insert(key.to_string(), value);
    Value::Object(object)
}

fn settlement_frame(id: u64, settled: Result<Value, RouteError>, mode: ServerMode) -> Value {
    let mut object = Map::new();
    object.insert("id".to_string(), Value::from(id));
    match settled {
        Ok(value) => object.insert("data".to_string(), escape(value)),
        Err(error) => object.insert("error".to_string(), encode_error(&error, mode)),
    };
    Value::Object(object)
}

fn redirect_value(redirect: &Redirect) -> Value {
    serde_json::json!({
        "status": redirect.status,
        "redirect": redirect.location,
        "revalidate": redirect.revalidate,
        "reload": redirect.reload_document,
        "replace": redirect.replace,
    })
}

fn encode_error(error: &RouteError, mode: ServerMode) -> Value {
    let mut value = serde_json::to_value(error.sanitize(mode)).unwrap_or(Value::Null);
    if let Some(data) = value.get_mut("data") {
        *data = escape(data.take());
    }
    value
}

fn escape_key(key: String) -> String {
    if key.starts_with('$') {
        format!("${}", key)
    } else {
        key
    }
}

fn escape_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().map(|(k, v)| (escape_key(k), escape(v))).collect()
}

fn escape(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(escape_map(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(escape).collect()),
        other => other,
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Where a deferred value goes once it settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredSlot {
    pub id: u64,
    /// `None` for an action result
    pub route_id: Option<String>,
    /// JSON pointer into the result's data
    pub pointer: String,
}

/// One settled deferred value.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub id: u64,
    pub result: Result<Value, RouteError>,
}

/// A root payload with its deferred values still streaming.
///
/// Placeholders read as `null` in [`payload`](Self::payload) until applied.
pub struct DecodedPayload {
    payload: SingleFetchPayload,
    deferred: Vec<DeferredSlot>,
    settlements: BoxStream<'static, Result<Settlement, RouterError>>,
}

impl DecodedPayload {
    pub fn payload(&self) -> &SingleFetchPayload {
        &self.payload
    }

    pub fn deferred(&self) -> &[DeferredSlot] {
        &self.deferred
    }

    /// Next settlement, in the order the server produced them.
    pub async fn next_settlement(&mut self) -> Option<Result<Settlement, RouterError>> {
        self.settlements.next().await
    }

    /// Write a settled value into the payload. A rejection turns the owning
    /// result into an error.
    pub fn apply(&mut self, settlement: Settlement) {
        let Some(slot) = self.deferred.iter().find(|slot| slot.id == settlement.id) else {
            trace_log!("Settlement for unknown deferred id {}", settlement.id);
            return;
        };
        let target = match (&mut self.payload, slot.route_id.as_deref()) {
            (SingleFetchPayload::Routes(routes), Some(route_id)) => routes.get_mut(route_id),
            (SingleFetchPayload::Result(result), None) => Some(result),
            _ => None,
        };
        let Some(target) = target else {
            return;
        };
        let SingleFetchResult::Data(data) = target else {
            return;
        };
        match settlement.result {
            Ok(value) => {
                if slot.pointer.is_empty() {
                    *data = value;
                } else if let Some(place) = data.pointer_mut(&slot.pointer) {
                    *place = value;
                }
            }
            Err(error) => *target = SingleFetchResult::Error(error),
        }
    }

    /// Await every deferred value and return the complete payload.
    pub async fn resolve(mut self) -> Result<SingleFetchPayload, RouterError> {
        let mut remaining: HashSet<u64> = self.deferred.iter().map(|slot| slot.id).collect();
        while !remaining.is_empty() {
            let Some(settlement) = self.settlements.next().await else {
                return Err(RouterError::Decode(format!(
                    "stream ended with {} deferred values unsettled",
                    remaining.len()
                )));
            };
            let settlement = settlement?;
            remaining.remove(&settlement.id);
            self.apply(settlement);
        }
        Ok(self.payload)
    }

    pub fn into_parts(
        self,
    ) -> (
        SingleFetchPayload,
        Vec<DeferredSlot>,
        BoxStream<'static, Result<Settlement, RouterError>>,
    ) {
        (self.payload, self.deferred, self.settlements)
    }
}

impl std::fmt::Debug for DecodedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedPayload")
            .field("payload", &self.payload)
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// Decode the root frame; deferred values keep streaming behind it.
pub async fn decode(stream: ByteStream) -> Result<DecodedPayload, RouterError> {
    let mut lines = LineReader::new(stream);
    let first = lines
        .next_line()
        .await?
        .ok_or_else(|| RouterError::Decode("empty single fetch stream".to_string()))?;
    let root: Value = parse_json(&first)?;
    let mut deferred = Vec::new();
    let payload = decode_root(root, &mut deferred)?;

    let settlements = stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((parse_settlement(&line), lines)),
            Ok(None) => None,
            Err(error) => {
                lines.finish();
                Some((Err(error), lines))
            }
        }
    })
    .boxed();

    Ok(DecodedPayload {
        payload,
        deferred,
        settlements,
    })
}

/// Decode a stream and wait for every deferred value.
pub async fn decode_all(stream: ByteStream) -> Result<SingleFetchPayload, RouterError> {
    decode(stream).await?.resolve().await
}

/// Splits a byte stream on `\n`; chunks may break anywhere.
struct LineReader {
    stream: ByteStream,
    buffer: BytesMut,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    done: bool,
}

impl LineReader {
    fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            scanned: 0,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.buffer.clear();
        self.scanned = 0;
    }

    async fn next_line(&mut self) -> Result<Option<String>, RouterError> {
        loop {
            if let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + offset;
                let line = self.buffer.split_to(end + 1);
                self.scanned = 0;
                let text = to_text(&line[..end])?;
                if text.trim().is_empty() {
                    continue;
                }
                return Ok(Some(text));
            }
            if self.done {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    self.buffer.clear();
                    return Ok(None);
                }
                let rest = self.buffer.split();
                self.scanned = 0;
                return to_text(&rest).map(Some);
            }
            self.scanned = self.buffer.len();
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(error)) => return Err(error),
                None => self.done = true,
            }
        }
    }
}

fn to_text(bytes: &[u8]) -> Result<String, RouterError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| RouterError::Decode(e.to_string()))
}

fn parse_json(line: &str) -> Result<Value, RouterError> {
    serde_json::from_str(line).map_err(|e| RouterError::Decode(e.to_string()))
}

fn decode_root(root: Value, deferred: &mut Vec<DeferredSlot>) -> Result<SingleFetchPayload, RouterError> {
    let Value::Object(mut root) = root else {
        return Err(RouterError::Decode("root frame is not an object".to_string()));
    };
    if let Some(redirect) = root.remove(REDIRECT_KEY) {
        return Ok(SingleFetchPayload::Redirect(decode_redirect(redirect)?));
    }
    if let Some(routes) = root.remove("routes") {
        let Value::Object(routes) = routes else {
            return Err(RouterError::Decode("`routes` is not an object".to_string()));
        };
        let mut results = HashMap::new();
        for (route_id, result) in routes {
            let decoded = decode_result(result, Some(&route_id), deferred)?;
            results.insert(route_id, decoded);
        }
        return Ok(SingleFetchPayload::Routes(results));
    }
    if let Some(result) = root.remove("result") {
        return Ok(SingleFetchPayload::Result(decode_result(result, None, deferred)?));
    }
    Err(RouterError::Decode("unrecognized root payload".to_string()))
}

fn decode_result(
    result: Value,
    route_id: Option<&str>,
    deferred: &mut Vec<DeferredSlot>,
) -> Result<SingleFetchResult, RouterError> {
    let Value::Object(mut result) = result else {
        return Err(RouterError::Decode("route result is not an object".to_string()));
    };
    if let Some(redirect) = result.remove(REDIRECT_KEY) {
        return Ok(SingleFetchResult::Redirect(decode_redirect(redirect)?));
    }
    if let Some(error) = result.remove("error") {
        return Ok(SingleFetchResult::Error(decode_error(error)?));
    }
    if let Some(data) = result.remove("data") {
        return Ok(SingleFetchResult::Data(unescape_collect(data, route_id, "", deferred)));
    }
    Err(RouterError::Decode("route result has no data, error or redirect".to_string()))
}

fn decode_redirect(value: Value) -> Result<Redirect, RouterError> {
    serde_json::from_value(value).map_err(|e| RouterError::Decode(format!("bad redirect: {}", e)))
}

fn decode_error(mut value: Value) -> Result<RouteError, RouterError> {
    if let Some(data) = value.get_mut("data") {
        *data = unescape(data.take());
    }
    serde_json::from_value(value).map_err(|e| RouterError::Decode(format!("bad error: {}", e)))
}

fn parse_settlement(line: &str) -> Result<Settlement, RouterError> {
    let Value::Object(mut frame) = parse_json(line)? else {
        return Err(RouterError::Decode("settlement frame is not an object".to_string()));
    };
    let id = frame
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| RouterError::Decode("settlement frame without id".to_string()))?;
    if let Some(error) = frame.remove("error") {
        return Ok(Settlement {
            id,
            result: Err(decode_error(error)?),
        });
    }
    let data = frame.remove("data").unwrap_or(Value::Null);
    Ok(Settlement {
        id,
        result: Ok(unescape(data)),
    })
}

fn unescape_key(key: String) -> String {
    match key.strip_prefix('$') {
        Some(rest) => rest.to_string(),
        None => key,
    }
}

fn unescape(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (unescape_key(k), unescape(v))).collect()),
        Value::Array(items) => Value::Array(items.into_iter().map(unescape).collect()),
        other => other,
    }
}

fn pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Unescape user data, replacing placeholders with `null` and recording
/// where they were.
fn unescape_collect(value: Value, route_id: Option<&str>, pointer: &str, deferred: &mut Vec<DeferredSlot>) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(id) = map.get(DEFERRED_KEY).and_then(Value::as_u64) {
                    deferred.push(DeferredSlot {
                        id,
                        route_id: route_id.map(str::to_string),
                        pointer: pointer.to_string(),
                    });
                    return Value::Null;
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let key = unescape_key(key);
                        let child = format!("{}/{}", pointer, pointer_token(&key));
                        let value = unescape_collect(value, route_id, &child, deferred);
                        (key, value)
                    })
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| unescape_collect(item, route_id, &format!("{}/{}", pointer, index), deferred))
                .collect(),
        ),
        other => other,
    }
}
