use prometheus::{Encoder, TextEncoder};
use anyhow::Result;

const PREFIX: &str = "fe_waf_";

/// Text exposition of the firewall counters only.
pub fn export_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families: Vec<_> = prometheus::gather()
        .into_iter()
        .filter(|family| family.get_name().starts_with(PREFIX))
        .collect();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::waf::Phase;

    #[test]
    fn test_export_contains_waf_counters() {
        MetricsCollector::new().inc_denied(Phase::Access);
        let text = export_metrics().unwrap();
        assert!(text.contains("fe_waf_requests_denied_total"));
    }
}
