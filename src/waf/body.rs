use super::collections::{normalize_mime, CollectionMap};
use super::value::Value;
use std::collections::BTreeSet;
use tracing::debug;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const JSON: &str = "application/json";

/// Request body as exposed to rules.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyArgs {
    Map(CollectionMap),
    Raw(String),
}

/// Parse a request body according to its declared content type.
///
/// Form bodies are always parsed. JSON objects are flattened to their top
/// level keys when JSON is in the allow-list. Any other allowed type is kept
/// raw; the rest is not inspected.
pub fn parse_body_args(
    content_type: Option<&str>,
    body: Option<&[u8]>,
    allowed: &BTreeSet<String>,
) -> Option<BodyArgs> {
    let body = body.filter(|b| !b.is_empty())?;
    let mime = normalize_mime(content_type?);

    if mime == FORM_URLENCODED {
        return Some(BodyArgs::Map(parse_query(&String::from_utf8_lossy(body))));
    }

    if !allowed.contains(&mime) {
        debug!("Request body with content type '{}' not inspected", mime);
        return None;
    }

    if mime == JSON {
        if let Ok(serde_json::Value::Object(object)) = serde_json::from_slice::<serde_json::Value>(body) {
            let args = object
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => Value::Str(s),
                        serde_json::Value::Number(n) => n
                            .as_f64()
                            .map(Value::Num)
                            .unwrap_or_else(|| Value::Str(n.to_string())),
                        other => Value::Str(other.to_string()),
                    };
                    (key, value)
                })
                .collect();
            return Some(BodyArgs::Map(args));
        }
    }

    Some(BodyArgs::Raw(String::from_utf8_lossy(body).into_owned()))
}

/// Parse `a=1&b=2&a=3` into a map, keeping repeated keys.
pub fn parse_query(query: &str) -> CollectionMap {
    let mut args = CollectionMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = form_decode(key);
        let value = Value::Str(form_decode(value));
        match args.get_mut(&key) {
            Some(existing) => existing.extend(&value),
            None => {
                args.insert(key, value);
            }
        }
    }
    args
}

/// Parse a `Cookie` header value.
pub fn parse_cookies(header: &str) -> CollectionMap {
    let mut jar = CollectionMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = Value::from(value.trim());
        match jar.get_mut(name.trim()) {
            Some(existing) => existing.extend(&value),
            None => {
                jar.insert(name.trim().to_string(), value);
            }
        }
    }
    jar
}

fn form_decode(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(s.as_bytes())).into_owned(),
    }
}
