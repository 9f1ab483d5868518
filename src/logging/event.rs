use crate::waf::context::{MatchRecord, RequestContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event emitted once per request that matched at least one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub client: String,
    pub method: String,
    pub uri: String,
    pub mode: String,
    pub score: u64,
    pub decision: String,
    pub alerts: Vec<MatchRecord>,
}

impl EventRecord {
    pub fn new(ctx: &RequestContext, client: &str, method: &str, uri: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: ctx.id.to_string(),
            client: client.to_string(),
            method: method.to_string(),
            uri: uri.to_string(),
            mode: String::new(),
            score: ctx.score,
            decision: String::new(),
            alerts: ctx.matches.clone(),
        }
    }

    pub fn with_mode(mut self, mode: impl ToString) -> Self {
        self.mode = mode.to_string();
        self
    }

    pub fn with_decision(mut self, decision: impl ToString) -> Self {
        self.decision = decision.to_string();
        self
    }

    /// Compact single-line JSON, as written to every sink.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waf::actions::Action;
    use crate::waf::rules::Severity;
    use crate::waf::Phase;

    #[test]
    fn test_event_json_is_one_line() {
        let mut ctx = RequestContext::new();
        ctx.score = 7;
        ctx.matches.push(MatchRecord::new(
            "SQL-001",
            "SQL Injection",
            Phase::Access,
            Action::Score,
            Severity::High,
            7,
            "union select",
        ));

        let record = EventRecord::new(&ctx, "10.0.0.1", "GET", "/search")
            .with_mode("active")
            .with_decision("deny");
        let json = record.to_json();
        assert!(!json.contains('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["request_id"], ctx.id.to_string());
        assert_eq!(parsed["score"], 7);
        assert_eq!(parsed["decision"], "deny");
        assert_eq!(parsed["alerts"][0]["rule_id"], "SQL-001");
        assert_eq!(parsed["alerts"][0]["phase"], "access");
    }
}
