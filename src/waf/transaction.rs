use super::actions::Flow;
use super::collections::{self, BodyFilterOutcome, Collections};
use super::context::RequestContext;
use super::request::{RequestParts, ResponseHead};
use super::{Firewall, Phase};
use crate::logging::event::EventRecord;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What the host should do with the request after a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    Continue,
    /// Allowed; later phases are not evaluated.
    Accept,
    /// Respond with `status` instead of the upstream response.
    Deny { status: u16 },
}

impl Decision {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Accept => write!(f, "accept"),
            Self::Deny { status } => write!(f, "deny ({})", status),
        }
    }
}

/// One request's pass through the firewall.
///
/// Holds the snapshot the request started with, so a reconfiguration in the
/// middle of a request does not affect it.
pub struct Transaction {
    fw: Arc<Firewall>,
    ctx: RequestContext,
    collections: Collections,
    decision: Decision,
    client: String,
    method: String,
    uri: String,
}

impl Transaction {
    pub fn new(fw: Arc<Firewall>) -> Self {
        Self {
            fw,
            ctx: RequestContext::new(),
            collections: Collections::new(),
            decision: Decision::Continue,
            client: String::new(),
            method: String::new(),
            uri: String::new(),
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn access(&mut self, req: &RequestParts) -> Decision {
        self.client = req.remote_addr.clone();
        self.method = req.method.clone();
        self.uri = req.uri.clone();

        collections::build_access(self.fw.config(), req, &mut self.collections);
        self.run(Phase::Access)
    }

    pub fn header_filter(&mut self, resp: &ResponseHead) -> Decision {
        if self.decision.is_final() {
            return self.decision;
        }
        collections::build_header_filter(resp, &mut self.collections);
        self.run(Phase::HeaderFilter)
    }

    /// Feed one response body chunk. Rules run once, on the final chunk.
    ///
    /// Nothing is emitted once the request is denied; an accepted request
    /// passes chunks through unchanged.
    pub fn body_filter(&mut self, chunk: Bytes, eof: bool) -> (BodyFilterOutcome, Decision) {
        match self.decision {
            Decision::Continue => {}
            Decision::Accept => {
                let outcome = BodyFilterOutcome {
                    emit: Some(chunk),
                    short_circuit: true,
                };
                return (outcome, self.decision);
            }
            Decision::Deny { .. } => {
                self.ctx.discard_body();
                let outcome = BodyFilterOutcome {
                    emit: None,
                    short_circuit: true,
                };
                return (outcome, self.decision);
            }
        }

        let outcome = collections::body_filter(
            self.fw.config(),
            &mut self.ctx,
            &mut self.collections,
            chunk,
            eof,
        );
        if outcome.short_circuit {
            return (outcome, self.decision);
        }

        let decision = self.run(Phase::BodyFilter);
        if let Decision::Deny { .. } = decision {
            let outcome = BodyFilterOutcome {
                emit: None,
                short_circuit: outcome.short_circuit,
            };
            return (outcome, decision);
        }
        (outcome, decision)
    }

    fn run(&mut self, phase: Phase) -> Decision {
        let flow = self.fw.run_phase(phase, &mut self.ctx, &mut self.collections);
        self.decision = match flow {
            Flow::Continue => Decision::Continue,
            Flow::Accept => Decision::Accept,
            Flow::Deny => Decision::Deny {
                status: self.fw.config().deny_status,
            },
        };
        debug!("Request {} {} phase: {}", self.ctx.id, phase, self.decision);
        self.decision
    }

    /// End the request and emit its audit event if any rule matched.
    ///
    /// Buffered body chunks not yet emitted are discarded.
    pub fn finish(mut self) -> Option<EventRecord> {
        self.ctx.discard_body();
        if self.ctx.matches.is_empty() {
            return None;
        }

        let record = EventRecord::new(&self.ctx, &self.client, &self.method, &self.uri)
            .with_mode(self.fw.config().mode)
            .with_decision(self.decision);
        self.fw.event_logger().emit(&record);
        Some(record)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.ctx.id)
            .field("score", &self.ctx.score)
            .field("decision", &self.decision)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firewall(mode: &str) -> Arc<Firewall> {
        let mut builder = Firewall::builder();
        builder.set_option("mode", mode).unwrap();
        builder.set_option("score_threshold", 5i64).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_clean_request_has_no_event() {
        let mut tx = Transaction::new(firewall("active"));
        let decision = tx.access(&RequestParts::new("GET", "/index.html?page=2"));
        assert_eq!(decision, Decision::Continue);
        assert!(tx.finish().is_none());
    }

    #[test]
    fn test_attack_denied_with_status() {
        let mut tx = Transaction::new(firewall("active"));
        let decision = tx.access(&RequestParts::new("GET", "/search?q=1%20UNION%20SELECT%20pass"));
        assert_eq!(decision, Decision::Deny { status: 403 });

        let head = ResponseHead::new(200);
        assert_eq!(tx.header_filter(&head), Decision::Deny { status: 403 });

        let record = tx.finish().unwrap();
        assert!(record.alerts.iter().any(|a| a.rule_id == "SQL-001"));
        assert_eq!(record.decision, "deny (403)");
        assert_eq!(record.mode, "active");
    }

    #[test]
    fn test_simulate_records_without_denying() {
        let mut tx = Transaction::new(firewall("simulate"));
        let decision = tx.access(&RequestParts::new("GET", "/search?q=1%20UNION%20SELECT%20pass"));
        assert_eq!(decision, Decision::Continue);
        assert!(tx.context().score >= 5);
        assert!(tx.finish().is_some());
    }

    #[test]
    fn test_denied_request_emits_no_body() {
        let mut tx = Transaction::new(firewall("active"));
        tx.access(&RequestParts::new("GET", "/search?q=1%20UNION%20SELECT%20pass"));

        for eof in [false, true] {
            let (outcome, decision) = tx.body_filter(Bytes::from_static(b"chunk"), eof);
            assert_eq!(outcome.emit, None);
            assert!(outcome.short_circuit);
            assert_eq!(decision, Decision::Deny { status: 403 });
        }
    }

    #[test]
    fn test_simulate_passes_body_through() {
        let mut tx = Transaction::new(firewall("simulate"));
        tx.access(&RequestParts::new("GET", "/search?q=1%20UNION%20SELECT%20pass"));
        let head = ResponseHead::new(200)
            .header("Content-Type", "text/html")
            .header("Content-Length", "5");
        tx.header_filter(&head);

        let (outcome, decision) = tx.body_filter(Bytes::from_static(b"chunk"), true);
        assert_eq!(outcome.emit, Some(Bytes::from_static(b"chunk")));
        assert_eq!(decision, Decision::Continue);
    }
}
