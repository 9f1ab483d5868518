use super::actions::Action;
use super::collections::CollectionMap;
use super::rules::Severity;
use super::Phase;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest matched value kept in a match record.
const MAX_MATCH_LEN: usize = 256;

/// Per-request evaluation state, exclusively owned by one in-flight request.
#[derive(Debug)]
pub struct RequestContext {
    pub id: Uuid,
    /// Running score; only the SCORE action raises it.
    pub score: u64,
    /// Score delta of the rule currently being dispatched.
    pub rule_score: u32,
    /// Persistent variables written during this request. Store reads are not cached here.
    pub tx: CollectionMap,
    pub body_chunks: Vec<Bytes>,
    pub body_chunk_count: usize,
    /// Bytes currently held in `body_chunks`.
    pub body_len: usize,
    /// Set once the body is known to be uninspectable; never cleared.
    pub body_bypass: Option<&'static str>,
    pub short_circuit: bool,
    pub matches: Vec<MatchRecord>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            score: 0,
            rule_score: 0,
            tx: CollectionMap::new(),
            body_chunks: Vec::new(),
            body_chunk_count: 0,
            body_len: 0,
            body_bypass: None,
            short_circuit: false,
            matches: Vec::new(),
        }
    }

    /// Discard buffered body chunks without emitting them.
    pub fn discard_body(&mut self) {
        self.body_chunks.clear();
        self.body_chunk_count = 0;
        self.body_len = 0;
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One dispatched rule match, kept for the request's audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub rule_id: String,
    pub description: String,
    pub phase: Phase,
    pub action: Action,
    pub severity: Severity,
    pub score: u32,
    pub matched: String,
}

impl MatchRecord {
    pub fn new(
        rule_id: &str,
        description: &str,
        phase: Phase,
        action: Action,
        severity: Severity,
        score: u32,
        matched: &str,
    ) -> Self {
        let matched = match matched.char_indices().nth(MAX_MATCH_LEN) {
            Some((idx, _)) => matched[..idx].to_string(),
            None => matched.to_string(),
        };

        Self {
            rule_id: rule_id.to_string(),
            description: description.to_string(),
            phase,
            action,
            severity,
            score,
            matched,
        }
    }
}
