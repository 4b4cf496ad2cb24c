//! Identifiers used by the ledger.
//!
//! Folder and user references arrive from callers and from legacy records in
//! several shapes: plain strings, bare numbers, or structured object ids such
//! as `{"$oid": "..."}`. Every shape is reduced to one canonical string form
//! before comparison or storage, so two spellings of the same reference
//! never count as distinct set members.
//!
//! Case records are identified by a ULID ([`CaseId`]) and addressed in
//! storage by their docket ([`DocketKey`]).

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::LedgerError;

const MAX_REF_LEN: usize = 128;
const OBJECT_ID_HEX_LEN: usize = 24;

/// Reduces a caller-supplied reference to its canonical form.
///
/// Trims whitespace, unwraps a textual `ObjectId("...")` wrapper, and
/// lowercases 24-digit hex object ids. The result is restricted to
/// `[A-Za-z0-9_-]` since references are also used as index keys.
fn canonical_ref(kind: &str, raw: &str) -> Result<String, LedgerError> {
    let mut value = raw.trim();
    if let Some(inner) = value
        .strip_prefix("ObjectId(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        value = inner.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    }

    if value.is_empty() {
        return Err(LedgerError::validation(format!("{kind} cannot be empty")));
    }
    if value.len() > MAX_REF_LEN {
        return Err(LedgerError::validation(format!(
            "{kind} exceeds {MAX_REF_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(LedgerError::validation(format!(
            "{kind} '{value}' contains invalid characters"
        )));
    }

    if value.len() == OBJECT_ID_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(value.to_ascii_lowercase())
    } else {
        Ok(value.to_string())
    }
}

/// Every wire shape a reference may take.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRef {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Oid {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl RawRef {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) | Self::Oid { oid: s } => s,
            Self::Unsigned(n) => n.to_string(),
            Self::Signed(n) => n.to_string(),
        }
    }
}

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parses and canonicalizes a reference.
            ///
            /// # Errors
            ///
            /// Returns `LedgerError::Validation` if the reference is empty,
            /// too long, or contains characters outside `[A-Za-z0-9_-]`.
            pub fn parse(raw: &str) -> Result<Self, LedgerError> {
                canonical_ref($kind, raw).map(Self)
            }

            /// Returns the canonical string form.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = RawRef::deserialize(deserializer)?.into_string();
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

opaque_ref!(
    /// Reference to a client folder that tracks a case.
    FolderId,
    "folderId"
);

opaque_ref!(
    /// Reference to an end user.
    UserId,
    "userId"
);

/// Unique identifier for a case record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(Ulid);

impl CaseId {
    /// Generates a new case ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CaseId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|e| LedgerError::validation(format!("invalid causaId '{s}': {e}")))
    }
}

/// Natural key of a case: docket number plus filing year.
///
/// At most one record per partition exists for a given key; the storage path
/// of a record is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocketKey {
    number: String,
    year: String,
}

impl DocketKey {
    /// Builds a docket key.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Validation` if the number is empty or not
    /// alphanumeric, or if the year is not a four-digit number.
    pub fn new(number: &str, year: &str) -> Result<Self, LedgerError> {
        let number = number.trim();
        let year = year.trim();

        if number.is_empty() {
            return Err(LedgerError::validation("docket number cannot be empty"));
        }
        if number.len() > 32 || !number.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LedgerError::validation(format!(
                "docket number '{number}' must be 1-32 alphanumeric characters"
            )));
        }
        if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
            return Err(LedgerError::validation(format!(
                "filing year '{year}' must be a four-digit year"
            )));
        }

        Ok(Self {
            number: number.to_string(),
            year: year.to_string(),
        })
    }

    /// Docket number.
    #[must_use]
    pub fn number(&self) -> &str {
        &self.number
    }

    /// Filing year.
    #[must_use]
    pub fn year(&self) -> &str {
        &self.year
    }

    /// Storage slug, `{number}-{year}`.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}-{}", self.number, self.year)
    }
}

impl fmt::Display for DocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_lowercased() {
        let a = FolderId::parse("65A1B2C3D4E5F6A7B8C9D0E1").unwrap();
        let b = FolderId::parse(" 65a1b2c3d4e5f6a7b8c9d0e1 ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "65a1b2c3d4e5f6a7b8c9d0e1");
    }

    #[test]
    fn textual_object_id_wrapper_is_unwrapped() {
        let wrapped = UserId::parse("ObjectId(\"65a1b2c3d4e5f6a7b8c9d0e1\")").unwrap();
        assert_eq!(wrapped.as_str(), "65a1b2c3d4e5f6a7b8c9d0e1");
    }

    #[test]
    fn non_hex_refs_keep_their_case() {
        assert_eq!(UserId::parse("User_42").unwrap().as_str(), "User_42");
    }

    #[test]
    fn rejects_empty_and_unsafe_refs() {
        assert!(FolderId::parse("   ").is_err());
        assert!(FolderId::parse("../x").is_err());
        assert!(FolderId::parse("a/b").is_err());
        assert!(UserId::parse(&"x".repeat(MAX_REF_LEN + 1)).is_err());
    }

    #[test]
    fn deserializes_every_wire_shape() {
        let refs: Vec<UserId> = serde_json::from_str(
            r#"["65A1B2C3D4E5F6A7B8C9D0E1", {"$oid": "65a1b2c3d4e5f6a7b8c9d0e1"}, 42, "u-7"]"#,
        )
        .unwrap();
        assert_eq!(refs[0], refs[1]);
        assert_eq!(refs[2].as_str(), "42");
        assert_eq!(refs[3].as_str(), "u-7");

        let json = serde_json::to_string(&refs[1]).unwrap();
        assert_eq!(json, r#""65a1b2c3d4e5f6a7b8c9d0e1""#);
    }

    #[test]
    fn case_id_parses_and_rejects() {
        let id = CaseId::generate();
        assert_eq!(id.to_string().parse::<CaseId>().unwrap(), id);
        assert!(matches!(
            "not-a-ulid".parse::<CaseId>(),
            Err(LedgerError::Validation { .. })
        ));
    }

    #[test]
    fn docket_key_validation() {
        let key = DocketKey::new(" 12345 ", "2024").unwrap();
        assert_eq!(key.slug(), "12345-2024");
        assert_eq!(key.to_string(), "12345/2024");

        assert!(DocketKey::new("", "2024").is_err());
        assert!(DocketKey::new("12/34", "2024").is_err());
        assert!(DocketKey::new("1234", "24").is_err());
        assert!(DocketKey::new("1234", "20x4").is_err());
    }
}
