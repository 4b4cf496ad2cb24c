//! The case record and its subscription state.
//!
//! A [`CaseRecord`] is shared by every user who tracks the same docket. The
//! ledger owns the subscription fields (`folderRefs`, `subscriberUserRefs`,
//! `subscriptionEntries`, `needsSync`, `sourceTag`); everything else on the
//! document belongs to the sync worker and is carried through unchanged,
//! including fields this crate does not model.
//!
//! Every mutator ends in [`CaseRecord::restore_invariants`], which re-derives
//! `subscriberUserRefs` and `needsSync` from `subscriptionEntries`. The
//! invariants therefore hold after any call sequence, not by convention.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{CaseId, DocketKey, FolderId, UserId};

/// Provenance marker for records created or touched through the ledger.
pub const APP_SOURCE_TAG: &str = "app";

/// Derives the sync flag from subscription entries.
///
/// A case needs syncing exactly when at least one subscriber has updates
/// enabled.
#[must_use]
pub fn recompute_needs_sync(entries: &SubscriptionEntries) -> bool {
    entries.0.values().any(|enabled| *enabled)
}

/// Per-user update preferences on a case. At most one entry per user.
///
/// Stored as an array of `{userId, enabled}` objects. Duplicate entries in
/// stored data collapse on load; a user counts as enabled if any of their
/// duplicates was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionEntries(BTreeMap<UserId, bool>);

impl SubscriptionEntries {
    /// Returns the `enabled` flag for a user, if they have an entry.
    #[must_use]
    pub fn get(&self, user: &UserId) -> Option<bool> {
        self.0.get(user).copied()
    }

    /// Iterates entries in user order.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, bool)> {
        self.0.iter().map(|(user, enabled)| (user, *enabled))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set(&mut self, user: &UserId, enabled: bool) -> bool {
        self.0.insert(user.clone(), enabled) != Some(enabled)
    }

    fn remove(&mut self, user: &UserId) -> bool {
        self.0.remove(user).is_some()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryDoc {
    user_id: UserId,
    #[serde(default)]
    enabled: bool,
}

impl Serialize for SubscriptionEntries {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (user, enabled) in &self.0 {
            seq.serialize_element(&EntryDoc {
                user_id: user.clone(),
                enabled: *enabled,
            })?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SubscriptionEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let docs = Option::<Vec<EntryDoc>>::deserialize(deserializer)?.unwrap_or_default();
        let mut entries = BTreeMap::new();
        for doc in docs {
            let slot = entries.entry(doc.user_id).or_insert(false);
            *slot |= doc.enabled;
        }
        Ok(Self(entries))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One docket movement, as written by the sync worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    /// Movement date as stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Value>,
    /// Worker-defined fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Movement {
    /// Parses the stored date.
    ///
    /// Accepts RFC 3339 timestamps, `YYYY-MM-DD`, `DD/MM/YYYY`, and epoch
    /// milliseconds. Anything else yields `None`.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.date.as_ref()? {
            Value::String(s) => {
                let s = s.trim();
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Some(ts.with_timezone(&Utc));
                }
                ["%Y-%m-%d", "%d/%m/%Y"]
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            _ => None,
        }
    }
}

/// A shared per-docket case record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    /// Record identifier.
    pub id: CaseId,
    /// Docket number.
    pub docket_number: String,
    /// Filing year.
    pub filing_year: String,
    #[serde(default, deserialize_with = "null_as_default")]
    folder_refs: BTreeSet<FolderId>,
    #[serde(default, deserialize_with = "null_as_default")]
    subscriber_user_refs: BTreeSet<UserId>,
    #[serde(default)]
    subscription_entries: SubscriptionEntries,
    #[serde(default)]
    needs_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_tag: Option<String>,
    /// Set by the sync worker once the docket has been confirmed upstream.
    #[serde(default)]
    pub verified: bool,
    /// Set by the sync worker when the docket exists and is readable.
    #[serde(default)]
    pub is_valid: bool,
    /// Docket movement history, newest first or in any order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub movement: Vec<Movement>,
    /// Case caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Court handling the case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    /// Case subject matter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// When the record was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the record was last written through the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Fields written by other parties that the ledger does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CaseRecord {
    /// Creates an empty, app-sourced record for a docket.
    #[must_use]
    pub fn new(id: CaseId, docket: &DocketKey, now: DateTime<Utc>) -> Self {
        Self {
            id,
            docket_number: docket.number().to_string(),
            filing_year: docket.year().to_string(),
            folder_refs: BTreeSet::new(),
            subscriber_user_refs: BTreeSet::new(),
            subscription_entries: SubscriptionEntries::default(),
            needs_sync: false,
            source_tag: Some(APP_SOURCE_TAG.to_string()),
            verified: false,
            is_valid: false,
            movement: Vec::new(),
            caption: None,
            court: None,
            subject: None,
            created_at: Some(now),
            updated_at: Some(now),
            extra: BTreeMap::new(),
        }
    }

    /// Folders linked to this case.
    #[must_use]
    pub fn folder_refs(&self) -> &BTreeSet<FolderId> {
        &self.folder_refs
    }

    /// Users subscribed to this case.
    #[must_use]
    pub fn subscriber_user_refs(&self) -> &BTreeSet<UserId> {
        &self.subscriber_user_refs
    }

    /// Per-user update preferences.
    #[must_use]
    pub fn subscription_entries(&self) -> &SubscriptionEntries {
        &self.subscription_entries
    }

    /// Derived sync flag.
    #[must_use]
    pub const fn needs_sync(&self) -> bool {
        self.needs_sync
    }

    /// Provenance marker, if any.
    #[must_use]
    pub fn source_tag(&self) -> Option<&str> {
        self.source_tag.as_deref()
    }

    /// Returns true if the folder is linked.
    #[must_use]
    pub fn has_folder(&self, folder: &FolderId) -> bool {
        self.folder_refs.contains(folder)
    }

    /// Returns true if the user is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, user: &UserId) -> bool {
        self.subscriber_user_refs.contains(user)
    }

    /// Returns true once the sync worker has verified the docket as valid.
    #[must_use]
    pub const fn is_displayable(&self) -> bool {
        self.verified && self.is_valid
    }

    /// Earliest parseable movement date.
    #[must_use]
    pub fn earliest_movement(&self) -> Option<DateTime<Utc>> {
        self.movement.iter().filter_map(Movement::timestamp).min()
    }

    /// Links a folder and subscribes its user.
    ///
    /// A new entry starts at `has_paid`. An existing entry can only be raised
    /// to enabled here, never lowered. Returns true if anything changed.
    pub fn link(&mut self, folder: &FolderId, user: &UserId, has_paid: bool) -> bool {
        let mut changed = self.folder_refs.insert(folder.clone());
        let enabled = self.subscription_entries.get(user).unwrap_or(false) || has_paid;
        changed |= self.subscription_entries.set(user, enabled);
        self.restore_invariants() || changed
    }

    /// Unlinks a folder and removes its user's subscription.
    ///
    /// Absent folders or users are not an error. Returns true if anything
    /// changed.
    pub fn unlink(&mut self, folder: &FolderId, user: &UserId) -> bool {
        let mut changed = self.folder_refs.remove(folder);
        changed |= self.subscriber_user_refs.remove(user);
        changed |= self.subscription_entries.remove(user);
        self.restore_invariants() || changed
    }

    /// Sets a subscribed user's update preference.
    ///
    /// Does nothing for users not subscribed to this case. Returns true if
    /// anything changed.
    pub fn set_preference(&mut self, user: &UserId, enabled: bool) -> bool {
        let mut changed = self.restore_invariants();
        if self.is_subscribed(user) {
            changed |= self.subscription_entries.set(user, enabled);
        }
        self.restore_invariants() || changed
    }

    /// Enables exactly the subscribers present in `active`.
    ///
    /// Returns true if anything changed.
    pub fn apply_roster(&mut self, active: &BTreeSet<UserId>) -> bool {
        let mut changed = self.restore_invariants();
        for (user, enabled) in &mut self.subscription_entries.0 {
            let wanted = active.contains(user);
            if *enabled != wanted {
                *enabled = wanted;
                changed = true;
            }
        }
        self.restore_invariants() || changed
    }

    /// Sets the provenance marker. Returns true if it changed.
    pub fn mark_app_source(&mut self) -> bool {
        if self.source_tag.as_deref() == Some(APP_SOURCE_TAG) {
            return false;
        }
        self.source_tag = Some(APP_SOURCE_TAG.to_string());
        true
    }

    /// Re-derives the subscriber set and sync flag from the entries.
    ///
    /// Subscribers without an entry get a disabled one. Returns true if
    /// anything changed.
    pub fn restore_invariants(&mut self) -> bool {
        let mut changed = false;
        for user in &self.subscriber_user_refs {
            if self.subscription_entries.get(user).is_none() {
                self.subscription_entries.0.insert(user.clone(), false);
                changed = true;
            }
        }
        let keys: BTreeSet<UserId> = self.subscription_entries.0.keys().cloned().collect();
        if keys != self.subscriber_user_refs {
            self.subscriber_user_refs = keys;
            changed = true;
        }
        let needs_sync = recompute_needs_sync(&self.subscription_entries);
        if needs_sync != self.needs_sync {
            self.needs_sync = needs_sync;
            changed = true;
        }
        changed
    }
}
