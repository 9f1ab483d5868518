//! Match predicates. Every operator has a negated form that is computed as
//! the complement of the base result and never implemented separately.

use super::cidr::CidrCache;
use super::pm::PatternCache;
use aho_corasick::AhoCorasick;
use super::value::{parse_number, Value};
use crate::config::RegexOptions;
use crate::error::{Result, WafError};
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const NEGATION_PREFIX: &str = "NOT_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Regex,
    Equals,
    Greater,
    Exists,
    Contains,
    Pm,
    CidrMatch,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "REGEX",
            Self::Equals => "EQUALS",
            Self::Greater => "GREATER",
            Self::Exists => "EXISTS",
            Self::Contains => "CONTAINS",
            Self::Pm => "PM",
            Self::CidrMatch => "CIDR_MATCH",
        }
    }

    /// Base (non-negated) result. List subjects match if any element does.
    pub fn matches(&self, m: &Matchers, subject: &Value, pattern: Option<&Value>) -> Result<bool> {
        self.matches_with(m, subject, pattern, None)
    }

    /// Like [`Operator::matches`], with PM using `automaton` when the rule's
    /// literal set was compiled ahead of time.
    pub fn matches_with(
        &self,
        m: &Matchers,
        subject: &Value,
        pattern: Option<&Value>,
        automaton: Option<&AhoCorasick>,
    ) -> Result<bool> {
        let pattern = pattern.ok_or_else(|| self.bad_operand("missing pattern"))?;

        match self {
            Self::Regex => {
                let source = pattern.as_str().ok_or_else(|| self.bad_operand("pattern must be a string"))?;
                let re = m.regex(source)?;
                Ok(subject.strings().iter().any(|s| re.is_match(s)))
            }
            Self::Equals => {
                if let Value::List(_) = pattern {
                    return Err(self.bad_operand("pattern must be a scalar"));
                }
                Ok(subject.strings().iter().any(|s| equals(s, pattern)))
            }
            Self::Greater => {
                let Some(limit) = pattern.as_number() else {
                    return Ok(false);
                };
                Ok(subject
                    .strings()
                    .iter()
                    .filter_map(|s| parse_number(s))
                    .any(|n| n > limit))
            }
            Self::Contains => {
                if let Value::List(_) = pattern {
                    return Err(self.bad_operand("needle must be a scalar"));
                }
                Ok(member(subject, &pattern.to_string()))
            }
            Self::Exists => Ok(subject.strings().iter().any(|s| member(pattern, s))),
            Self::Pm => {
                let adhoc;
                let ac = match automaton {
                    Some(ac) => ac,
                    None => {
                        adhoc = PatternCache::compile(pattern)?;
                        &adhoc
                    }
                };
                Ok(subject.strings().iter().any(|s| ac.is_match(&**s)))
            }
            Self::CidrMatch => {
                let ranges = list(pattern);
                for s in subject.strings() {
                    if m.cidrs.matches(&s, &ranges)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn bad_operand(&self, reason: &str) -> WafError {
        WafError::BadOperand {
            operator: self.as_str().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Numeric comparison when both sides parse as numbers, string equality otherwise.
fn equals(subject: &str, pattern: &Value) -> bool {
    match (parse_number(subject), pattern.as_number()) {
        (Some(a), Some(b)) => a == b,
        _ => subject == pattern.to_string(),
    }
}

/// Membership shared by CONTAINS and EXISTS: list elements compare exactly,
/// a string haystack is searched for a substring.
fn member(haystack: &Value, needle: &str) -> bool {
    match haystack {
        Value::List(items) => items.iter().any(|item| item == needle),
        Value::Str(s) => s.contains(needle),
        Value::Num(_) => equals(needle, haystack),
    }
}

fn list(pattern: &Value) -> Vec<String> {
    pattern.strings().into_iter().map(|s| s.into_owned()).collect()
}

/// An operator together with its negation flag, e.g. `NOT_REGEX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOperator {
    pub operator: Operator,
    pub negated: bool,
}

impl RuleOperator {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            negated: false,
        }
    }

    pub fn negated(operator: Operator) -> Self {
        Self {
            operator,
            negated: true,
        }
    }

    pub fn evaluate(&self, m: &Matchers, subject: &Value, pattern: Option<&Value>) -> Result<bool> {
        self.evaluate_with(m, subject, pattern, None)
    }

    pub fn evaluate_with(
        &self,
        m: &Matchers,
        subject: &Value,
        pattern: Option<&Value>,
        automaton: Option<&AhoCorasick>,
    ) -> Result<bool> {
        let base = self.operator.matches_with(m, subject, pattern, automaton)?;
        Ok(base != self.negated)
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str(NEGATION_PREFIX)?;
        }
        f.write_str(self.operator.as_str())
    }
}

impl FromStr for RuleOperator {
    type Err = WafError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let (negated, name) = match upper.strip_prefix(NEGATION_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, upper.as_str()),
        };

        let operator = match name {
            "REGEX" => Operator::Regex,
            "EQUALS" => Operator::Equals,
            "GREATER" => Operator::Greater,
            "EXISTS" => Operator::Exists,
            "CONTAINS" => Operator::Contains,
            "PM" => Operator::Pm,
            "CIDR_MATCH" => Operator::CidrMatch,
            _ => {
                return Err(WafError::BadOperand {
                    operator: s.to_string(),
                    reason: "unknown operator".to_string(),
                })
            }
        };

        Ok(Self { operator, negated })
    }
}

/// Compiled matcher state shared by all requests of one firewall snapshot.
#[derive(Debug)]
pub struct Matchers {
    options: RegexOptions,
    regexes: RwLock<HashMap<String, Arc<Regex>>>,
    pub(crate) patterns: PatternCache,
    pub(crate) cidrs: Arc<CidrCache>,
}

impl Matchers {
    pub fn new(options: RegexOptions) -> Self {
        Self::with_cidrs(options, Arc::new(CidrCache::new()))
    }

    pub fn with_cidrs(options: RegexOptions, cidrs: Arc<CidrCache>) -> Self {
        Self {
            options,
            regexes: RwLock::new(HashMap::new()),
            patterns: PatternCache::new(),
            cidrs,
        }
    }

    /// Attach the PM automata compiled for a snapshot's rules.
    pub fn with_patterns(mut self, patterns: PatternCache) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn regex(&self, pattern: &str) -> Result<Arc<Regex>> {
        if let Some(re) = self.regexes.read().get(pattern) {
            return Ok(Arc::clone(re));
        }

        let re = RegexBuilder::new(pattern)
            .case_insensitive(self.options.case_insensitive)
            .multi_line(self.options.multi_line)
            .dot_matches_new_line(self.options.dot_matches_new_line)
            .build()
            .map_err(|e| WafError::InvalidRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        let mut regexes = self.regexes.write();
        let re = regexes
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(re));
        Ok(Arc::clone(re))
    }

    pub fn cidrs(&self) -> &CidrCache {
        &self.cidrs
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Operator; 7] = [
        Operator::Regex,
        Operator::Equals,
        Operator::Greater,
        Operator::Exists,
        Operator::Contains,
        Operator::Pm,
        Operator::CidrMatch,
    ];

    fn matchers() -> Matchers {
        Matchers::new(RegexOptions::default())
    }

    fn eval(op: &str, subject: Value, pattern: Value) -> bool {
        let op: RuleOperator = op.parse().unwrap();
        op.evaluate(&matchers(), &subject, Some(&pattern)).unwrap()
    }

    #[test]
    fn test_negation_is_exact_complement() {
        let m = matchers();
        let subjects = [
            Value::from("10.0.0.5"),
            Value::from("union select"),
            Value::from("42"),
            Value::from("abc"),
            Value::from(""),
            Value::Num(7.0),
            Value::from(vec!["a", "10"]),
            Value::from(vec![] as Vec<String>),
        ];
        let patterns = [
            Value::from("10"),
            Value::from("select"),
            Value::Num(41.0),
            Value::from(vec!["a", "10.0.0.0/8"]),
            Value::from("10.0.0.0/24"),
        ];

        for op in ALL {
            for subject in &subjects {
                for pattern in &patterns {
                    let base = RuleOperator::new(op).evaluate(&m, subject, Some(pattern));
                    let negated = RuleOperator::negated(op).evaluate(&m, subject, Some(pattern));
                    match (base, negated) {
                        (Ok(b), Ok(n)) => assert_eq!(n, !b, "{:?} {:?} {:?}", op, subject, pattern),
                        (Err(_), Err(_)) => {}
                        other => panic!("inconsistent results for {:?}: {:?}", op, other),
                    }
                }
            }
        }
    }

    #[test]
    fn test_regex() {
        assert!(eval("REGEX", Value::from("1 UNION SELECT 2"), Value::from("union\\s+select")));
        assert!(!eval("REGEX", Value::from("hello"), Value::from("^world")));
        assert!(eval("NOT_REGEX", Value::from("hello"), Value::from("^world")));
    }

    #[test]
    fn test_regex_case_sensitive_when_configured() {
        let m = Matchers::new(RegexOptions {
            case_insensitive: false,
            ..RegexOptions::default()
        });
        let op = RuleOperator::new(Operator::Regex);
        assert!(!op
            .evaluate(&m, &Value::from("SELECT"), Some(&Value::from("select")))
            .unwrap());
    }

    #[test]
    fn test_invalid_regex_is_an_error() {
        let op = RuleOperator::negated(Operator::Regex);
        assert!(op
            .evaluate(&matchers(), &Value::from("x"), Some(&Value::from("(")))
            .is_err());
    }

    #[test]
    fn test_equals_numeric_then_string() {
        assert!(eval("EQUALS", Value::from("5.0"), Value::Num(5.0)));
        assert!(eval("EQUALS", Value::from(" 5 "), Value::from("5")));
        assert!(eval("EQUALS", Value::from("GET"), Value::from("GET")));
        assert!(!eval("EQUALS", Value::from("get"), Value::from("GET")));
        assert!(!eval("EQUALS", Value::from("5"), Value::from("five")));
    }

    #[test]
    fn test_greater_non_numeric_is_false() {
        assert!(eval("GREATER", Value::from("10"), Value::Num(5.0)));
        assert!(!eval("GREATER", Value::from("5"), Value::Num(5.0)));
        assert!(!eval("GREATER", Value::from("abc"), Value::Num(5.0)));
        assert!(!eval("GREATER", Value::from("10"), Value::from("abc")));
        assert!(eval("NOT_GREATER", Value::from("abc"), Value::Num(5.0)));
    }

    #[test]
    fn test_infinity_and_nan_compare_as_strings() {
        assert!(eval("EQUALS", Value::from("nan"), Value::from("nan")));
        assert!(eval("EQUALS", Value::from("inf"), Value::from("inf")));
        assert!(!eval("EQUALS", Value::from("inf"), Value::from("infinity")));
        assert!(!eval("GREATER", Value::from("inf"), Value::Num(1e300)));
        assert!(!eval("GREATER", Value::from("10"), Value::from("-infinity")));
        assert!(!eval("GREATER", Value::from("NaN"), Value::Num(0.0)));
    }

    #[test]
    fn test_contains_and_exists_swap_roles() {
        let methods = Value::from(vec!["GET", "POST"]);
        assert!(eval("CONTAINS", methods.clone(), Value::from("POST")));
        assert!(!eval("CONTAINS", methods.clone(), Value::from("PUT")));
        assert!(eval("EXISTS", Value::from("POST"), methods.clone()));
        assert!(!eval("EXISTS", Value::from("PUT"), methods));
        assert!(eval("CONTAINS", Value::from("/etc/passwd"), Value::from("passwd")));
    }

    #[test]
    fn test_pm() {
        let scanners = Value::from(vec!["sqlmap", "nikto"]);
        assert!(eval("PM", Value::from("sqlmap/1.7"), scanners.clone()));
        assert!(!eval("PM", Value::from("curl/8.0"), scanners.clone()));
        assert!(eval("NOT_PM", Value::from("curl/8.0"), scanners));
    }

    #[test]
    fn test_pm_uses_precompiled_automaton() {
        // the rule pattern is ignored once an automaton is supplied
        let ac = PatternCache::compile(&Value::from(vec!["nikto"])).unwrap();
        let op = RuleOperator::new(Operator::Pm);
        let pattern = Value::from(vec!["unused"]);
        assert!(op
            .evaluate_with(&matchers(), &Value::from("nikto/2.1"), Some(&pattern), Some(&ac))
            .unwrap());
        assert!(!op
            .evaluate(&matchers(), &Value::from("nikto/2.1"), Some(&pattern))
            .unwrap());
    }

    #[test]
    fn test_cidr_match() {
        let ranges = Value::from(vec!["10.0.0.0/24"]);
        assert!(eval("CIDR_MATCH", Value::from("10.0.0.5"), ranges.clone()));
        assert!(!eval("CIDR_MATCH", Value::from("11.0.0.5"), ranges));
    }

    #[test]
    fn test_missing_pattern_is_an_error() {
        let op = RuleOperator::new(Operator::Equals);
        assert!(op.evaluate(&matchers(), &Value::from("x"), None).is_err());
    }

    #[test]
    fn test_operator_names() {
        let op: RuleOperator = "not_cidr_match".parse().unwrap();
        assert_eq!(op, RuleOperator::negated(Operator::CidrMatch));
        assert_eq!(op.to_string(), "NOT_CIDR_MATCH");
        assert!("FUZZY".parse::<RuleOperator>().is_err());
    }
}
