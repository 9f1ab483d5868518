//! Phase-scoped collections: the views of request and response data that
//! rules match against.
//!
//! The access phase builds the request collections and registers deferred
//! resolvers for values that change while rules run (variables, score). The
//! header_filter phase adds the response head. The body_filter phase
//! reassembles the response body chunk by chunk and only publishes it once the
//! final chunk has arrived.

use super::body::{self, BodyArgs};
use super::context::RequestContext;
use super::request::{RequestParts, ResponseHead};
use super::value::Value;
use super::Firewall;
use crate::config::WafConfig;
use crate::metrics::MetricsCollector;
use crate::storage::variables;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Named collections a rule may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionKey {
    RemoteAddr,
    HttpVersion,
    Method,
    Uri,
    UriArgs,
    QueryString,
    RequestHeaders,
    UserAgent,
    Cookies,
    RequestBody,
    RequestArgs,
    ResponseHeaders,
    Status,
    ResponseBody,
    Var,
    Tx,
    Score,
    ScoreThreshold,
}

impl CollectionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteAddr => "REMOTE_ADDR",
            Self::HttpVersion => "HTTP_VERSION",
            Self::Method => "METHOD",
            Self::Uri => "URI",
            Self::UriArgs => "URI_ARGS",
            Self::QueryString => "QUERY_STRING",
            Self::RequestHeaders => "REQUEST_HEADERS",
            Self::UserAgent => "USER_AGENT",
            Self::Cookies => "COOKIES",
            Self::RequestBody => "REQUEST_BODY",
            Self::RequestArgs => "REQUEST_ARGS",
            Self::ResponseHeaders => "RESPONSE_HEADERS",
            Self::Status => "STATUS",
            Self::ResponseBody => "RESPONSE_BODY",
            Self::Var => "VAR",
            Self::Tx => "TX",
            Self::Score => "SCORE",
            Self::ScoreThreshold => "SCORE_THRESHOLD",
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type CollectionMap = BTreeMap<String, Value>;

/// Resolves a live value at access time. The optional argument is the key a
/// rule asked for (the variable name for `VAR`/`TX`).
pub type Resolver =
    fn(&Firewall, &RequestContext, &Collections, Option<&str>) -> Option<Value>;

#[derive(Clone)]
pub enum Entry {
    Scalar(Value),
    Map(CollectionMap),
    Deferred(Resolver),
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// The collection snapshot of one request, extended phase by phase.
#[derive(Debug, Default)]
pub struct Collections {
    entries: HashMap<CollectionKey, Entry>,
    /// Ephemeral variables written by SETVAR.
    pub(crate) vars: CollectionMap,
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CollectionKey, entry: Entry) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: CollectionKey) -> Option<&Entry> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: CollectionKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Map view of a collection, if it is map-typed.
    pub fn map(&self, key: CollectionKey) -> Option<&CollectionMap> {
        match self.entries.get(&key) {
            Some(Entry::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Scalar view of a collection, if it holds a concrete value.
    pub fn scalar(&self, key: CollectionKey) -> Option<&Value> {
        match self.entries.get(&key) {
            Some(Entry::Scalar(v)) => Some(v),
            _ => None,
        }
    }
}

/// Build the request collections for the access phase.
pub fn build_access(config: &WafConfig, req: &RequestParts, collections: &mut Collections) {
    let headers = headers_map(&req.headers);
    let uri_args = body::parse_query(&req.query_string);
    let cookies = req
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
        .fold(CollectionMap::new(), |mut jar, (_, v)| {
            merge_into(&mut jar, &body::parse_cookies(v));
            jar
        });

    let mut request_args = uri_args.clone();

    match body::parse_body_args(
        req.header_value("content-type"),
        req.body.as_deref(),
        &config.allowed_content_types,
    ) {
        Some(BodyArgs::Map(args)) => {
            merge_into(&mut request_args, &args);
            collections.insert(CollectionKey::RequestBody, Entry::Map(args));
        }
        Some(BodyArgs::Raw(raw)) => {
            collections.insert(CollectionKey::RequestBody, Entry::Scalar(Value::Str(raw)));
        }
        None => {}
    }

    merge_into(&mut request_args, &cookies);

    let user_agent = req.header_value("user-agent").unwrap_or("").to_string();

    collections.insert(CollectionKey::RemoteAddr, Entry::Scalar(Value::from(req.remote_addr.as_str())));
    collections.insert(CollectionKey::HttpVersion, Entry::Scalar(Value::from(req.http_version.as_str())));
    collections.insert(CollectionKey::Method, Entry::Scalar(Value::from(req.method.as_str())));
    collections.insert(CollectionKey::Uri, Entry::Scalar(Value::from(req.uri.as_str())));
    collections.insert(CollectionKey::QueryString, Entry::Scalar(Value::from(req.query_string.as_str())));
    collections.insert(CollectionKey::UriArgs, Entry::Map(uri_args));
    collections.insert(CollectionKey::RequestHeaders, Entry::Map(headers));
    collections.insert(CollectionKey::UserAgent, Entry::Scalar(Value::Str(user_agent)));
    collections.insert(CollectionKey::Cookies, Entry::Map(cookies));
    collections.insert(CollectionKey::RequestArgs, Entry::Map(request_args));

    collections.insert(CollectionKey::Var, Entry::Deferred(resolve_var));
    collections.insert(CollectionKey::Tx, Entry::Deferred(resolve_tx));
    collections.insert(CollectionKey::Score, Entry::Deferred(resolve_score));
    collections.insert(CollectionKey::ScoreThreshold, Entry::Deferred(resolve_score_threshold));
}

/// Add the response head for the header_filter phase.
pub fn build_header_filter(resp: &ResponseHead, collections: &mut Collections) {
    collections.insert(CollectionKey::ResponseHeaders, Entry::Map(headers_map(&resp.headers)));
    collections.insert(CollectionKey::Status, Entry::Scalar(Value::from(resp.status as u64)));
}

/// What the host should do with the chunk it just passed in.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyFilterOutcome {
    /// Payload to send downstream in place of the chunk; `None` suppresses it.
    pub emit: Option<Bytes>,
    /// Skip rule evaluation for this chunk event.
    pub short_circuit: bool,
}

/// Feed one response body chunk through the reassembly state machine.
pub fn body_filter(
    config: &WafConfig,
    ctx: &mut RequestContext,
    collections: &mut Collections,
    chunk: Bytes,
    eof: bool,
) -> BodyFilterOutcome {
    let limit = match ctx.body_bypass {
        Some(reason) => Err(reason),
        None => inspectable(config, collections),
    };
    let limit = match limit {
        Ok(limit) if ctx.body_len + chunk.len() <= limit => limit,
        Ok(limit) => {
            debug!(
                "Response body exceeded {} bytes, dropping {} buffered chunks",
                limit, ctx.body_chunk_count
            );
            ctx.discard_body();
            return bypass(ctx, chunk, eof, "body over limit");
        }
        Err(reason) => return bypass(ctx, chunk, eof, reason),
    };

    ctx.body_len += chunk.len();
    ctx.body_chunks.push(chunk);
    ctx.body_chunk_count += 1;

    if !eof {
        ctx.short_circuit = true;
        return BodyFilterOutcome {
            emit: None,
            short_circuit: true,
        };
    }

    let total = ctx.body_len;
    let mut body = BytesMut::with_capacity(total);
    for part in ctx.body_chunks.drain(..) {
        body.extend_from_slice(&part);
    }
    ctx.body_len = 0;
    let body = body.freeze();

    debug!(
        "Response body reassembled from {} chunks ({} of at most {} bytes)",
        ctx.body_chunk_count, total, limit
    );

    collections.insert(
        CollectionKey::ResponseBody,
        Entry::Scalar(Value::Str(String::from_utf8_lossy(&body).into_owned())),
    );
    ctx.short_circuit = false;

    BodyFilterOutcome {
        emit: Some(body),
        short_circuit: false,
    }
}

/// Permanently stop inspecting this response. Only the final chunk is emitted.
fn bypass(ctx: &mut RequestContext, chunk: Bytes, eof: bool, reason: &'static str) -> BodyFilterOutcome {
    ctx.short_circuit = true;
    ctx.body_bypass = Some(reason);
    if eof {
        debug!("Response body not inspected: {}", reason);
        MetricsCollector::new().inc_body_bypassed(reason);
        return BodyFilterOutcome {
            emit: Some(chunk),
            short_circuit: true,
        };
    }
    BodyFilterOutcome {
        emit: None,
        short_circuit: true,
    }
}

/// Declared length and type gate for response body inspection. Returns the
/// most bytes that may be buffered.
fn inspectable(config: &WafConfig, collections: &Collections) -> Result<usize, &'static str> {
    let headers = collections
        .map(CollectionKey::ResponseHeaders)
        .ok_or("no response headers")?;

    let length = headers
        .get("content-length")
        .and_then(|v| v.strings().first().and_then(|s| s.trim().parse::<u64>().ok()))
        .ok_or("missing content-length")?;
    if length > config.res_body_max_size {
        return Err("content-length over limit");
    }

    let mime = headers
        .get("content-type")
        .and_then(|v| v.strings().first().map(|s| normalize_mime(s)))
        .ok_or("missing content-type")?;
    if !config.res_body_mime_types.contains(&mime) {
        return Err("content-type not inspected");
    }

    usize::try_from(length).map_err(|_| "content-length over limit")
}

/// `Text/HTML; charset=utf-8` -> `text/html`
pub(crate) fn normalize_mime(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn headers_map(headers: &[(String, String)]) -> CollectionMap {
    let mut map = CollectionMap::new();
    for (name, value) in headers {
        let value = Value::from(value.as_str());
        match map.get_mut(&name.to_ascii_lowercase()) {
            Some(existing) => existing.extend(&value),
            None => {
                map.insert(name.to_ascii_lowercase(), value);
            }
        }
    }
    map
}

/// Union of two arg maps; a key present in both keeps every value.
pub(crate) fn merge_into(target: &mut CollectionMap, source: &CollectionMap) {
    for (key, value) in source {
        match target.get_mut(key) {
            Some(existing) => existing.extend(value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn resolve_var(
    fw: &Firewall,
    ctx: &RequestContext,
    collections: &Collections,
    key: Option<&str>,
) -> Option<Value> {
    key.and_then(|name| variables::get(fw, ctx, collections, name, false))
}

fn resolve_tx(
    fw: &Firewall,
    ctx: &RequestContext,
    collections: &Collections,
    key: Option<&str>,
) -> Option<Value> {
    key.and_then(|name| variables::get(fw, ctx, collections, name, true))
}

fn resolve_score(
    _fw: &Firewall,
    ctx: &RequestContext,
    _collections: &Collections,
    _key: Option<&str>,
) -> Option<Value> {
    Some(Value::from(ctx.score))
}

fn resolve_score_threshold(
    fw: &Firewall,
    _ctx: &RequestContext,
    _collections: &Collections,
    _key: Option<&str>,
) -> Option<Value> {
    Some(Value::from(fw.config().score_threshold))
}
