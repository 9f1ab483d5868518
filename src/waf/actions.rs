use super::collections::Collections;
use super::context::{MatchRecord, RequestContext};
use super::rules::Rule;
use super::{Firewall, Phase};
use crate::config::WafMode;
use crate::metrics::MetricsCollector;
use crate::storage::variables;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Accept,
    Deny,
    Score,
    Chain,
    Skip,
    Ignore,
    SetVar,
    SetTx,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accept => "ACCEPT",
            Self::Deny => "DENY",
            Self::Score => "SCORE",
            Self::Chain => "CHAIN",
            Self::Skip => "SKIP",
            Self::Ignore => "IGNORE",
            Self::SetVar => "SETVAR",
            Self::SetTx => "SETTX",
        };
        f.write_str(name)
    }
}

/// Phase flow after an action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Accept,
    Deny,
}

impl Flow {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Execute the action of a matched rule.
///
/// `ctx.rule_score` must already hold the rule's score delta.
pub fn execute(
    fw: &Firewall,
    ctx: &mut RequestContext,
    collections: &mut Collections,
    rule: &Rule,
    phase: Phase,
    matched: &str,
) -> Flow {
    let enforcing = fw.config().mode == WafMode::Active;

    ctx.matches.push(MatchRecord::new(
        &rule.id,
        &rule.description,
        phase,
        rule.action,
        rule.severity,
        ctx.rule_score,
        matched,
    ));
    MetricsCollector::new().inc_rule_match(&rule.id, rule.action);

    match rule.action {
        Action::Accept => {
            if enforcing {
                info!("Rule {} accepted request {}", rule.id, ctx.id);
                return Flow::Accept;
            }
            info!("Rule {} would accept request {} (mode {})", rule.id, ctx.id, fw.config().mode);
        }
        Action::Deny => {
            if enforcing {
                warn!("Rule {} denied request {}: {}", rule.id, ctx.id, rule.description);
                MetricsCollector::new().inc_denied(phase);
                return Flow::Deny;
            }
            info!("Rule {} would deny request {} (mode {})", rule.id, ctx.id, fw.config().mode);
        }
        Action::Score => {
            ctx.score += u64::from(ctx.rule_score);
            debug!("Rule {} raised score by {} to {}", rule.id, ctx.rule_score, ctx.score);
        }
        Action::Chain | Action::Skip | Action::Ignore => {
            debug!("Rule {} matched ({})", rule.id, rule.action);
        }
        Action::SetVar | Action::SetTx => {
            let persistent = rule.action == Action::SetTx;
            match &rule.setvar {
                Some(var) => {
                    if let Err(e) = variables::set(fw, ctx, collections, var, persistent) {
                        warn!("Rule {} could not write variable '{}': {}", rule.id, var.key, e);
                    }
                }
                None => warn!("Rule {} uses {} without a setvar block", rule.id, rule.action),
            }
        }
    }

    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::FirewallBuilder;
    use crate::config::WafConfig;
    use crate::waf::operators::{Operator, RuleOperator};
    use crate::waf::rules::{SetVar, Severity};
    use crate::waf::value::Value;
    use std::sync::Arc;

    fn firewall(mode: &str) -> Arc<Firewall> {
        let mut builder = FirewallBuilder::new(WafConfig::default());
        builder.set_option("mode", mode).unwrap();
        builder.set_option("ignore_ruleset", "default").unwrap();
        builder.build().unwrap()
    }

    fn rule(action: Action, score: u32) -> Rule {
        Rule {
            id: format!("T-{}", action),
            description: "test".to_string(),
            phase: Phase::Access,
            targets: Vec::new(),
            transforms: Vec::new(),
            operator: RuleOperator::new(Operator::Equals),
            pattern: None,
            action,
            score,
            skip: 0,
            setvar: None,
            severity: Severity::Low,
        }
    }

    fn run(fw: &Firewall, ctx: &mut RequestContext, c: &mut Collections, rule: &Rule) -> Flow {
        ctx.rule_score = rule.score;
        execute(fw, ctx, c, rule, Phase::Access, "")
    }

    #[test]
    fn test_score_accumulates() {
        let fw = firewall("active");
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        assert_eq!(run(&fw, &mut ctx, &mut collections, &rule(Action::Score, 5)), Flow::Continue);
        assert_eq!(run(&fw, &mut ctx, &mut collections, &rule(Action::Score, 3)), Flow::Continue);
        assert_eq!(ctx.score, 8);
        assert_eq!(ctx.matches.len(), 2);
    }

    #[test]
    fn test_accept_deny_terminal_only_when_active() {
        let active = firewall("active");
        let simulate = firewall("simulate");
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        assert_eq!(run(&active, &mut ctx, &mut collections, &rule(Action::Deny, 0)), Flow::Deny);
        assert_eq!(run(&active, &mut ctx, &mut collections, &rule(Action::Accept, 0)), Flow::Accept);
        assert_eq!(run(&simulate, &mut ctx, &mut collections, &rule(Action::Deny, 0)), Flow::Continue);
        assert_eq!(run(&simulate, &mut ctx, &mut collections, &rule(Action::Accept, 0)), Flow::Continue);
        assert_eq!(ctx.matches.len(), 4);
    }

    #[test]
    fn test_record_only_actions() {
        let fw = firewall("active");
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        for action in [Action::Chain, Action::Skip, Action::Ignore] {
            assert_eq!(run(&fw, &mut ctx, &mut collections, &rule(action, 9)), Flow::Continue);
        }
        assert_eq!(ctx.score, 0);
        assert_eq!(ctx.matches.len(), 3);
    }

    #[test]
    fn test_setvar_writes_ephemeral_variable() {
        let fw = firewall("active");
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        let mut r = rule(Action::SetVar, 0);
        r.setvar = Some(SetVar {
            key: "seen".to_string(),
            value: Some(Value::from("yes")),
            increment: false,
        });
        run(&fw, &mut ctx, &mut collections, &r);

        assert_eq!(
            variables::get(&fw, &ctx, &collections, "seen", false),
            Some(Value::from("yes"))
        );
    }

    #[test]
    fn test_settx_without_zone_is_not_fatal() {
        let fw = firewall("active");
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        let mut r = rule(Action::SetTx, 0);
        r.setvar = Some(SetVar {
            key: "hits".to_string(),
            value: None,
            increment: true,
        });
        assert_eq!(run(&fw, &mut ctx, &mut collections, &r), Flow::Continue);
        assert!(ctx.tx.is_empty());
    }
}
