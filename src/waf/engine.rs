use super::accessor;
use super::actions::{self, Action, Flow};
use super::collections::Collections;
use super::context::{MatchRecord, RequestContext};
use super::operators::Matchers;
use super::rules::{Rule, Severity};
use super::transforms;
use super::Phase;
use crate::config::options::FirewallBuilder;
use crate::config::{WafConfig, WafMode};
use crate::error::WafError;
use crate::logging::sinks::EventLogger;
use crate::metrics::MetricsCollector;
use crate::storage::{SharedStore, StoreRegistry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Immutable firewall snapshot shared by every in-flight request.
///
/// Built once by [`FirewallBuilder`]. Reconfiguration produces a new snapshot
/// through [`Firewall::reconfigure`]; a live snapshot is never mutated.
pub struct Firewall {
    pub(crate) config: WafConfig,
    pub(crate) rules: Vec<Rule>,
    pub(crate) matchers: Matchers,
    pub(crate) store: Option<Arc<dyn SharedStore>>,
    pub(crate) stores: StoreRegistry,
    pub(crate) sources: BTreeMap<String, Vec<Rule>>,
    pub(crate) event_logger: EventLogger,
}

impl Firewall {
    pub fn builder() -> FirewallBuilder {
        FirewallBuilder::new(WafConfig::default())
    }

    pub fn config(&self) -> &WafConfig {
        &self.config
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn matchers(&self) -> &Matchers {
        &self.matchers
    }

    pub fn store(&self) -> Option<&Arc<dyn SharedStore>> {
        self.store.as_ref()
    }

    pub fn event_logger(&self) -> &EventLogger {
        &self.event_logger
    }

    /// Builder seeded from this snapshot, for building its replacement.
    pub fn reconfigure(&self) -> FirewallBuilder {
        FirewallBuilder::from_snapshot(self)
    }

    /// Evaluate every rule of `phase` in order.
    ///
    /// A failed chain link skips the rest of its chain; a matched SKIP rule
    /// jumps over the next `skip` rules. Once all rules ran, a score at or
    /// above the threshold denies the request.
    pub fn run_phase(
        &self,
        phase: Phase,
        ctx: &mut RequestContext,
        collections: &mut Collections,
    ) -> Flow {
        if self.config.mode == WafMode::Inactive {
            return Flow::Continue;
        }
        if ctx.short_circuit {
            debug!("Skipping {} rules for request {}", phase, ctx.id);
            return Flow::Continue;
        }

        let rules: Vec<(usize, &Rule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.phase == phase)
            .collect();
        debug!("Running {} {} rules for request {}", rules.len(), phase, ctx.id);

        let mut i = 0;
        while i < rules.len() {
            let (slot, rule) = rules[i];
            match self.evaluate_rule(slot, rule, ctx, collections) {
                Some(matched) => {
                    ctx.rule_score = rule.score;
                    let flow = actions::execute(self, ctx, collections, rule, phase, &matched);
                    if flow.is_terminal() {
                        return flow;
                    }
                    i += 1;
                    if rule.action == Action::Skip {
                        i += rule.skip;
                    }
                }
                None => {
                    while i < rules.len() && rules[i].1.action == Action::Chain {
                        i += 1;
                    }
                    i += 1;
                }
            }
        }

        self.check_score(phase, ctx)
    }

    /// Matched value if `rule` matches, `None` otherwise. `slot` is the rule's
    /// position in the snapshot.
    fn evaluate_rule(
        &self,
        slot: usize,
        rule: &Rule,
        ctx: &RequestContext,
        collections: &Collections,
    ) -> Option<String> {
        if rule.targets.is_empty() {
            return Some(String::new());
        }

        let automaton = self.matchers.patterns.get(slot).map(|ac| &**ac);
        for target in &rule.targets {
            let values = match accessor::narrow(
                self,
                ctx,
                collections,
                target.collection,
                target.accessor,
                target.key.as_deref(),
            ) {
                Ok(values) => values,
                Err(e) => match self.anomaly(rule, &e) {
                    Some(matched) => return Some(matched),
                    None => continue,
                },
            };

            for value in values {
                let value = transforms::apply_all(&rule.transforms, &value);
                match rule.operator.evaluate_with(
                    &self.matchers,
                    &value,
                    rule.pattern.as_ref(),
                    automaton,
                ) {
                    Ok(true) => {
                        debug!("Rule {} matched {} on {}", rule.id, rule.operator, target.collection);
                        return Some(value.to_string());
                    }
                    Ok(false) => {}
                    Err(e) => {
                        if let Some(matched) = self.anomaly(rule, &e) {
                            return Some(matched);
                        }
                    }
                }
            }
        }

        None
    }

    /// Fail-open unless the firewall is configured fail-closed.
    fn anomaly(&self, rule: &Rule, err: &WafError) -> Option<String> {
        if err.is_fatal() {
            error!("Rule {} could not be evaluated: {}", rule.id, err);
        } else {
            warn!("Rule {} could not be evaluated: {}", rule.id, err);
        }
        if self.config.fail_closed {
            Some(format!("evaluation error: {}", err))
        } else {
            None
        }
    }

    fn check_score(&self, phase: Phase, ctx: &mut RequestContext) -> Flow {
        let threshold = self.config.score_threshold;
        if threshold == 0 || ctx.score < threshold {
            return Flow::Continue;
        }

        ctx.matches.push(MatchRecord::new(
            "SCORE-THRESHOLD",
            "Anomaly score threshold reached",
            phase,
            Action::Deny,
            Severity::Critical,
            0,
            &ctx.score.to_string(),
        ));

        if self.config.mode == WafMode::Active {
            warn!(
                "Request {} denied: score {} reached threshold {}",
                ctx.id, ctx.score, threshold
            );
            MetricsCollector::new().inc_denied(phase);
            return Flow::Deny;
        }

        info!(
            "Request {} would be denied: score {} reached threshold {}",
            ctx.id, ctx.score, threshold
        );
        Flow::Continue
    }
}

impl fmt::Debug for Firewall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Firewall")
            .field("mode", &self.config.mode)
            .field("rules", &self.rules.len())
            .field("storage_zone", &self.config.storage_zone)
            .finish()
    }
}
