pub mod accessor;
pub mod actions;
pub mod body;
pub mod cidr;
pub mod collections;
pub mod context;
pub mod engine;
pub mod operators;
pub mod pm;
pub mod request;
pub mod rules;
pub mod transaction;
pub mod transforms;
pub mod value;

pub use actions::{Action, Flow};
pub use collections::{BodyFilterOutcome, CollectionKey, Collections};
pub use context::{MatchRecord, RequestContext};
pub use engine::Firewall;
pub use operators::{Operator, RuleOperator};
pub use request::{RequestParts, ResponseHead};
pub use rules::{Rule, RuleTarget, Severity};
pub use transaction::{Decision, Transaction};
pub use transforms::Transform;
pub use value::Value;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Request processing phases, always run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Access,
    HeaderFilter,
    BodyFilter,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::HeaderFilter => "header_filter",
            Self::BodyFilter => "body_filter",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holder of the current firewall snapshot.
///
/// Requests take a snapshot with [`load`](Self::load) and keep it until they
/// finish; [`store`](Self::store) only affects requests started afterwards.
#[derive(Debug)]
pub struct SharedFirewall {
    current: RwLock<Arc<Firewall>>,
}

impl SharedFirewall {
    pub fn new(fw: Arc<Firewall>) -> Self {
        Self {
            current: RwLock::new(fw),
        }
    }

    pub fn load(&self) -> Arc<Firewall> {
        Arc::clone(&self.current.read())
    }

    pub fn store(&self, fw: Arc<Firewall>) {
        *self.current.write() = fw;
    }

    /// Start a transaction on the current snapshot.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.load())
    }
}
