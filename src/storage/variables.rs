use crate::error::{Result, WafError};
use crate::waf::collections::Collections;
use crate::waf::context::RequestContext;
use crate::waf::rules::SetVar;
use crate::waf::value::Value;
use crate::waf::Firewall;
use tracing::debug;

/// Read a rule variable. Unset variables read as `None`.
///
/// Ephemeral variables live in the collection snapshot. Persistent ones are
/// looked up in the request's transaction table first, then in the store.
pub fn get(
    fw: &Firewall,
    ctx: &RequestContext,
    collections: &Collections,
    name: &str,
    persistent: bool,
) -> Option<Value> {
    if !persistent {
        return collections.vars.get(name).cloned();
    }

    if let Some(value) = ctx.tx.get(name) {
        return Some(value.clone());
    }

    fw.store().and_then(|store| store.get(name))
}

/// Write a rule variable.
///
/// Persistent writes go to the transaction table and through to the store
/// zone; they fail when no zone is configured.
pub fn set(
    fw: &Firewall,
    ctx: &mut RequestContext,
    collections: &mut Collections,
    var: &SetVar,
    persistent: bool,
) -> Result<()> {
    let store = if persistent {
        Some(fw.store().ok_or(WafError::StorageZoneUnset)?)
    } else {
        None
    };

    let value = if var.increment {
        let current = get(fw, ctx, collections, &var.key, persistent)
            .and_then(|v| v.as_number())
            .unwrap_or(0.0);
        let step = var.value.as_ref().and_then(Value::as_number).unwrap_or(1.0);
        Value::Num(current + step)
    } else {
        var.value.clone().unwrap_or(Value::Num(1.0))
    };

    debug!(
        "Setting {} variable {} = {}",
        if persistent { "persistent" } else { "ephemeral" },
        var.key,
        value
    );

    match store {
        Some(store) => {
            store.set(&var.key, value.clone());
            ctx.tx.insert(var.key.clone(), value);
        }
        None => {
            collections.vars.insert(var.key.clone(), value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::options::FirewallBuilder;
    use crate::config::WafConfig;
    use crate::storage::{MemoryStore, SharedStore, StoreRegistry};
    use std::sync::Arc;

    fn firewall_with_store() -> (Arc<Firewall>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut zones = StoreRegistry::new();
        zones.register("waf", store.clone());

        let mut builder = FirewallBuilder::new(WafConfig::default()).with_stores(zones);
        builder.set_option("storage_zone", "waf").unwrap();
        (builder.build().unwrap(), store)
    }

    fn setvar(key: &str, value: Option<Value>, increment: bool) -> SetVar {
        SetVar {
            key: key.to_string(),
            value,
            increment,
        }
    }

    #[test]
    fn test_unset_reads_none() {
        let (fw, _) = firewall_with_store();
        let ctx = RequestContext::new();
        let collections = Collections::new();
        assert_eq!(get(&fw, &ctx, &collections, "missing", false), None);
        assert_eq!(get(&fw, &ctx, &collections, "missing", true), None);
    }

    #[test]
    fn test_ephemeral_round_trip_stays_in_snapshot() {
        let (fw, store) = firewall_with_store();
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        set(&fw, &mut ctx, &mut collections, &setvar("flag", Some(Value::from("on")), false), false).unwrap();
        assert_eq!(get(&fw, &ctx, &collections, "flag", false), Some(Value::from("on")));
        assert_eq!(get(&fw, &ctx, &collections, "flag", true), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_persistent_write_through() {
        let (fw, store) = firewall_with_store();
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        set(&fw, &mut ctx, &mut collections, &setvar("ip_hits", None, true), true).unwrap();
        set(&fw, &mut ctx, &mut collections, &setvar("ip_hits", Some(Value::Num(2.0)), true), true).unwrap();

        assert_eq!(get(&fw, &ctx, &collections, "ip_hits", true), Some(Value::Num(3.0)));
        assert_eq!(store.get("ip_hits"), Some(Value::Num(3.0)));

        // a later request sees the stored value through the store
        let next = RequestContext::new();
        assert_eq!(get(&fw, &next, &collections, "ip_hits", true), Some(Value::Num(3.0)));
    }

    #[test]
    fn test_store_reads_are_not_cached_in_tx() {
        let (fw, store) = firewall_with_store();
        store.set("seen", Value::Num(1.0));
        let ctx = RequestContext::new();
        let collections = Collections::new();

        assert_eq!(get(&fw, &ctx, &collections, "seen", true), Some(Value::Num(1.0)));
        assert!(ctx.tx.is_empty());

        store.set("seen", Value::Num(2.0));
        assert_eq!(get(&fw, &ctx, &collections, "seen", true), Some(Value::Num(2.0)));
    }

    #[test]
    fn test_persistent_write_requires_zone() {
        let fw = FirewallBuilder::new(WafConfig::default()).build().unwrap();
        let mut ctx = RequestContext::new();
        let mut collections = Collections::new();

        let err = set(&fw, &mut ctx, &mut collections, &setvar("k", None, false), true).unwrap_err();
        assert!(matches!(err, WafError::StorageZoneUnset));
    }
}
