use super::value::Value;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    static ref DECIMAL_ENTITY: Regex = Regex::new(r"&#(\d+);").expect("valid entity regex");
    static ref HEX_ENTITY: Regex = Regex::new(r"(?i)&#x([0-9a-f]+);").expect("valid entity regex");
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").expect("valid comment regex");
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").expect("valid whitespace regex");
}

/// Value normalizers applied before an operator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Base64Decode,
    Base64Encode,
    CompressWhitespace,
    RemoveWhitespace,
    HtmlDecode,
    Lowercase,
    RemoveComments,
    ReplaceComments,
    UriDecode,
    Trim,
    Length,
    RemoveNulls,
}

impl Transform {
    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::Base64Decode => base64_decode(input),
            Self::Base64Encode => STANDARD.encode(input.as_bytes()),
            Self::CompressWhitespace => WHITESPACE_RUN.replace_all(input, " ").into_owned(),
            Self::RemoveWhitespace => input.chars().filter(|c| !c.is_whitespace()).collect(),
            Self::HtmlDecode => html_decode(input),
            Self::Lowercase => input.to_lowercase(),
            Self::RemoveComments => BLOCK_COMMENT.replace_all(input, "").into_owned(),
            Self::ReplaceComments => BLOCK_COMMENT.replace_all(input, " ").into_owned(),
            Self::UriDecode => uri_decode(input),
            Self::Trim => input.trim().to_string(),
            Self::Length => input.len().to_string(),
            Self::RemoveNulls => input.replace('\0', ""),
        }
    }
}

/// Run a transform chain over a value, element-wise for lists.
pub fn apply_all(transforms: &[Transform], value: &Value) -> Value {
    if transforms.is_empty() {
        return value.clone();
    }

    let run = |s: &str| {
        transforms
            .iter()
            .fold(s.to_string(), |acc, t| t.apply(&acc))
    };

    match value {
        Value::List(items) => Value::List(items.iter().map(|s| run(s.as_str())).collect()),
        Value::Str(s) => Value::Str(run(s.as_str())),
        Value::Num(n) => Value::Str(run(&n.to_string())),
    }
}

fn base64_decode(input: &str) -> String {
    match STANDARD.decode(input.trim()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("base64 decode failed, keeping original value: {}", e);
            input.to_string()
        }
    }
}

fn uri_decode(input: &str) -> String {
    match urlencoding::decode(input) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned(),
    }
}

/// Decode HTML entities: decimal, then hex, then named, then `&amp;`.
///
/// `&amp;` goes last so that `&amp;lt;` decodes to `&lt;` and not `<`.
pub fn html_decode(input: &str) -> String {
    let decode_with = |re: &Regex, s: &str, radix: u32| {
        re.replace_all(s, |caps: &Captures| {
            u32::from_str_radix(&caps[1], radix)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
    };

    let decoded = decode_with(&DECIMAL_ENTITY, input, 10);
    let decoded = decode_with(&HEX_ENTITY, &decoded, 16);

    decoded
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
