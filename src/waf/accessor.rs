//! Narrowing of map collections to the subset a rule targets.

use super::collections::{CollectionKey, CollectionMap, Collections, Entry};
use super::context::RequestContext;
use super::value::Value;
use super::Firewall;
use crate::error::{Result, WafError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessor {
    Specific,
    Ignore,
    Keys,
    Values,
    All,
}

/// Value at `key`, `None` when absent.
pub fn specific<'a>(collection: &'a CollectionMap, key: &str) -> Option<&'a Value> {
    collection.get(key)
}

/// Copy of `collection` without `key`. The input is left untouched.
pub fn ignore(collection: &CollectionMap, key: &str) -> CollectionMap {
    let mut copy = collection.clone();
    copy.remove(key);
    copy
}

pub fn keys(collection: &CollectionMap) -> Vec<Value> {
    collection.keys().map(|k| Value::from(k.as_str())).collect()
}

pub fn values(collection: &CollectionMap) -> Vec<Value> {
    collection.values().cloned().collect()
}

/// Keys followed by values, `2 * len` entries.
pub fn all(collection: &CollectionMap) -> Vec<Value> {
    let mut out = keys(collection);
    out.extend(values(collection));
    out
}

/// Apply an accessor to a map collection.
pub fn apply(
    accessor: Accessor,
    name: CollectionKey,
    collection: &CollectionMap,
    key: Option<&str>,
) -> Result<Vec<Value>> {
    let need_key = || {
        key.ok_or_else(|| WafError::BadOperand {
            operator: format!("{:?}", accessor),
            reason: format!("accessor on {} requires a key", name),
        })
    };

    Ok(match accessor {
        Accessor::Specific => specific(collection, need_key()?).cloned().into_iter().collect(),
        Accessor::Ignore => values(&ignore(collection, need_key()?)),
        Accessor::Keys => keys(collection),
        Accessor::Values => values(collection),
        Accessor::All => all(collection),
    })
}

/// Resolve a rule target against the live collections.
///
/// Deferred entries are resolved first and behave as scalars. Map collections
/// without an accessor yield their values; with a key and no accessor, the
/// key is looked up directly.
pub fn narrow(
    fw: &Firewall,
    ctx: &RequestContext,
    collections: &Collections,
    name: CollectionKey,
    accessor: Option<Accessor>,
    key: Option<&str>,
) -> Result<Vec<Value>> {
    match (collections.get(name), accessor) {
        (None, _) => Ok(Vec::new()),
        (Some(Entry::Map(map)), Some(accessor)) => apply(accessor, name, map, key),
        (Some(Entry::Map(map)), None) => Ok(match key {
            Some(k) => specific(map, k).cloned().into_iter().collect(),
            None => values(map),
        }),
        (Some(Entry::Scalar(value)), None) => Ok(vec![value.clone()]),
        (Some(Entry::Deferred(resolve)), None) => {
            Ok(resolve(fw, ctx, collections, key).into_iter().collect())
        }
        (Some(_), Some(_)) => Err(WafError::UnsupportedCollection(name.to_string())),
    }
}
