pub mod collector;
pub mod exporter;

pub use collector::MetricsCollector;
pub use exporter::export_metrics;

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    pub static ref WAF_RULE_MATCHES: IntCounterVec = register_int_counter_vec!(
        "fe_waf_rule_matches_total",
        "Rules matched, by rule id and action",
        &["rule_id", "action"]
    )
    .expect("fe_waf_rule_matches_total can be registered");

    pub static ref WAF_REQUESTS_DENIED: IntCounterVec = register_int_counter_vec!(
        "fe_waf_requests_denied_total",
        "Requests denied, by phase",
        &["phase"]
    )
    .expect("fe_waf_requests_denied_total can be registered");

    pub static ref WAF_BODY_BYPASSED: IntCounterVec = register_int_counter_vec!(
        "fe_waf_body_inspection_bypassed_total",
        "Response bodies not inspected, by reason",
        &["reason"]
    )
    .expect("fe_waf_body_inspection_bypassed_total can be registered");

    pub static ref WAF_EVENTS_DROPPED: IntCounterVec = register_int_counter_vec!(
        "fe_waf_events_dropped_total",
        "Audit events a sink failed to write, by sink",
        &["sink"]
    )
    .expect("fe_waf_events_dropped_total can be registered");
}

/// Force registration so the counters show up before the first increment.
pub fn init_metrics() {
    lazy_static::initialize(&WAF_RULE_MATCHES);
    lazy_static::initialize(&WAF_REQUESTS_DENIED);
    lazy_static::initialize(&WAF_BODY_BYPASSED);
    lazy_static::initialize(&WAF_EVENTS_DROPPED);
}
