use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A single collection value, rule pattern or variable.
///
/// Map collections keep repeated keys (two `id` query args, a header sent
/// twice) as one [`Value::List`] so a key always contributes exactly one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Num(f64),
    Str(String),
    List(Vec<String>),
}

impl Value {
    /// Numeric view of the value. Strings are trimmed and parsed; lists never coerce.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => parse_number(s),
            Self::List(_) => None,
        }
    }

    /// Flat string view, one element per list member.
    pub fn strings(&self) -> Vec<Cow<'_, str>> {
        match self {
            Self::Num(n) => vec![Cow::Owned(n.to_string())],
            Self::Str(s) => vec![Cow::Borrowed(s.as_str())],
            Self::List(items) => items.iter().map(|s| Cow::Borrowed(s.as_str())).collect(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Append another value, turning `self` into a list when needed.
    pub fn extend(&mut self, other: &Value) {
        let mut items: Vec<String> = self.strings().into_iter().map(Cow::into_owned).collect();
        items.extend(other.strings().into_iter().map(Cow::into_owned));
        *self = Self::List(items);
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Num(_) => false,
            Self::Str(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }
}

/// Finite number in `s`, ignoring surrounding whitespace. `nan` and `inf`
/// are words here, not numbers.
pub(crate) fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{}", s),
            Self::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Num(n as f64)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Self::List(items.into_iter().map(str::to_string).collect())
    }
}
