//! Array-shape repair for stored case documents.
//!
//! Records created outside the ledger may carry subscription fields that are
//! absent, `null`, a bare scalar instead of an array, or arrays holding
//! duplicate and non-canonical references. Such documents may not even load
//! as a [`CaseRecord`](crate::record::CaseRecord), so repair works on the raw
//! JSON and touches only the fields the ledger owns.
//!
//! A field that is already well formed is left byte-for-byte alone, so a
//! clean document reports no change and is never rewritten.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use causa_core::{Error, Result};

use crate::ids::{FolderId, UserId};

const FOLDER_REFS: &str = "folderRefs";
const SUBSCRIBER_USER_REFS: &str = "subscriberUserRefs";
const SUBSCRIPTION_ENTRIES: &str = "subscriptionEntries";
const NEEDS_SYNC: &str = "needsSync";

fn canonical<T>(value: &Value) -> Option<String>
where
    T: DeserializeOwned + ToString,
{
    serde_json::from_value::<T>(value.clone())
        .ok()
        .map(|id| id.to_string())
}

/// Canonical, de-duplicated references from a field of any shape.
///
/// Returns the references in first-seen order and whether the stored field
/// was already exactly that array.
fn normalize_refs<T>(field: Option<&Value>) -> (Vec<String>, bool)
where
    T: DeserializeOwned + ToString,
{
    let items: &[Value] = match field {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return (Vec::new(), false),
        Some(scalar) => std::slice::from_ref(scalar),
    };

    let mut seen = BTreeSet::new();
    let mut refs = Vec::with_capacity(items.len());
    for item in items {
        if let Some(id) = canonical::<T>(item) {
            if seen.insert(id.clone()) {
                refs.push(id);
            }
        }
    }

    let well_formed = matches!(field, Some(Value::Array(_)))
        && items.len() == refs.len()
        && items
            .iter()
            .zip(&refs)
            .all(|(item, id)| item.as_str() == Some(id.as_str()));
    (refs, well_formed)
}

/// Merged subscription entries in first-seen order, plus whether the stored
/// field was already exactly that array.
fn normalize_entries(field: Option<&Value>) -> (Vec<(String, bool)>, bool) {
    let items: &[Value] = match field {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return (Vec::new(), false),
        Some(scalar) => std::slice::from_ref(scalar),
    };

    let mut order: Vec<String> = Vec::new();
    let mut merged: BTreeMap<String, bool> = BTreeMap::new();
    for item in items {
        let Some(user) = item.get("userId").and_then(canonical::<UserId>) else {
            continue;
        };
        let enabled = item.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        match merged.get_mut(&user) {
            Some(existing) => *existing |= enabled,
            None => {
                merged.insert(user.clone(), enabled);
                order.push(user);
            }
        }
    }

    let entries: Vec<(String, bool)> = order
        .into_iter()
        .map(|user| {
            let enabled = merged.get(&user).copied().unwrap_or(false);
            (user, enabled)
        })
        .collect();

    let well_formed = matches!(field, Some(Value::Array(_)))
        && items.len() == entries.len()
        && items.iter().zip(&entries).all(|(item, (user, enabled))| {
            item.get("userId").and_then(Value::as_str) == Some(user.as_str())
                && item.get("enabled").and_then(Value::as_bool) == Some(*enabled)
        });
    (entries, well_formed)
}

fn entry_value(user: &str, enabled: bool) -> Value {
    let mut entry = Map::new();
    entry.insert("userId".into(), Value::String(user.to_string()));
    entry.insert("enabled".into(), Value::Bool(enabled));
    Value::Object(entry)
}

/// Normalizes the ledger-owned fields of a stored case document.
///
/// Afterwards `folderRefs` and `subscriberUserRefs` are arrays of unique
/// canonical references, every subscriber has exactly one entry, and
/// `needsSync` matches the entries. Unparseable references are dropped.
///
/// Returns whether the document changed.
///
/// # Errors
///
/// Returns `Error::Serialization` if the document is not a JSON object.
pub fn normalize_document(doc: &mut Value) -> Result<bool> {
    let Value::Object(map) = doc else {
        return Err(Error::Serialization {
            message: "case document is not a JSON object".into(),
        });
    };
    let mut changed = false;

    let (folders, folders_ok) = normalize_refs::<FolderId>(map.get(FOLDER_REFS));
    if !folders_ok {
        map.insert(
            FOLDER_REFS.into(),
            Value::Array(folders.into_iter().map(Value::String).collect()),
        );
        changed = true;
    }

    let (mut users, users_ok) = normalize_refs::<UserId>(map.get(SUBSCRIBER_USER_REFS));
    let (mut entries, entries_ok) = normalize_entries(map.get(SUBSCRIPTION_ENTRIES));

    let entry_users: BTreeSet<String> = entries.iter().map(|(u, _)| u.clone()).collect();
    let mut entries_grew = false;
    for user in &users {
        if !entry_users.contains(user) {
            entries.push((user.clone(), false));
            entries_grew = true;
        }
    }
    let user_set: BTreeSet<String> = users.iter().cloned().collect();
    let mut users_grew = false;
    for (user, _) in &entries {
        if !user_set.contains(user) {
            users.push(user.clone());
            users_grew = true;
        }
    }

    if !users_ok || users_grew {
        map.insert(
            SUBSCRIBER_USER_REFS.into(),
            Value::Array(users.into_iter().map(Value::String).collect()),
        );
        changed = true;
    }

    let needs_sync = entries.iter().any(|(_, enabled)| *enabled);
    if !entries_ok || entries_grew {
        map.insert(
            SUBSCRIPTION_ENTRIES.into(),
            Value::Array(
                entries
                    .iter()
                    .map(|(user, enabled)| entry_value(user, *enabled))
                    .collect(),
            ),
        );
        changed = true;
    }

    if map.get(NEEDS_SYNC).and_then(Value::as_bool) != Some(needs_sync) {
        map.insert(NEEDS_SYNC.into(), Value::Bool(needs_sync));
        changed = true;
    }

    Ok(changed)
}
