use super::value::Value;
use crate::error::{Result, WafError};
use aho_corasick::AhoCorasick;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Aho-Corasick automata compiled once per PM rule when a snapshot is built.
///
/// Keyed by the rule's position in the snapshot, so a lookup never touches
/// the literal set.
#[derive(Debug, Default)]
pub struct PatternCache {
    automata: HashMap<usize, Arc<AhoCorasick>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the automaton for the literals of `pattern`.
    pub fn compile(pattern: &Value) -> Result<AhoCorasick> {
        let literals = pattern.strings();
        let ac = AhoCorasick::new(literals.iter().map(|s| s.as_bytes()))
            .map_err(|e| WafError::InvalidPatternSet(e.to_string()))?;
        debug!("Built multi-pattern automaton over {} literals", literals.len());
        Ok(ac)
    }

    pub fn insert(&mut self, slot: usize, pattern: &Value) -> Result<()> {
        let ac = Self::compile(pattern)?;
        self.automata.insert(slot, Arc::new(ac));
        Ok(())
    }

    pub fn get(&self, slot: usize) -> Option<&Arc<AhoCorasick>> {
        self.automata.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.automata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.automata.is_empty()
    }
}
