use super::*;
use crate::waf::{Action, Phase};

pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn inc_rule_match(&self, rule_id: &str, action: Action) {
        WAF_RULE_MATCHES
            .with_label_values(&[rule_id, &action.to_string()])
            .inc();
    }

    pub fn inc_denied(&self, phase: Phase) {
        WAF_REQUESTS_DENIED.with_label_values(&[phase.as_str()]).inc();
    }

    pub fn inc_body_bypassed(&self, reason: &str) {
        WAF_BODY_BYPASSED.with_label_values(&[reason]).inc();
    }

    pub fn inc_event_dropped(&self, sink: &str) {
        WAF_EVENTS_DROPPED.with_label_values(&[sink]).inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
