//! Jurisdiction partitions.
//!
//! Cases live in four independent collections, one per fuero. Callers name a
//! partition with any of several spellings (jurisdiction name, short code, or
//! canonical collection name); all of them resolve here, before any storage
//! access happens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// One of the four case partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Civil jurisdiction.
    Civil,
    /// Labor jurisdiction.
    Labor,
    /// Social-security jurisdiction.
    SocialSecurity,
    /// Commercial jurisdiction.
    Commercial,
}

impl Partition {
    /// Every partition, in a stable order.
    pub const ALL: [Self; 4] = [
        Self::Civil,
        Self::Labor,
        Self::SocialSecurity,
        Self::Commercial,
    ];

    /// Canonical collection name for this partition.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Civil => "causas-civil",
            Self::Labor => "causas-trabajo",
            Self::SocialSecurity => "causas-segsocial",
            Self::Commercial => "causas-comercial",
        }
    }

    /// Short jurisdiction code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Civil => "CIV",
            Self::Labor => "CNT",
            Self::SocialSecurity => "CSS",
            Self::Commercial => "COM",
        }
    }

    /// Resolves a caller-supplied type token.
    ///
    /// Matching ignores case, surrounding whitespace, and the choice of
    /// separator (`-`, `_`, space).
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidPartition` for unknown tokens.
    pub fn resolve(token: &str) -> Result<Self, LedgerError> {
        let normalized: String = token
            .trim()
            .chars()
            .map(|c| match c {
                '_' | ' ' => '-',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        let partition = match normalized.as_str() {
            "civ" | "civil" | "causas-civil" => Self::Civil,
            "cnt" | "trabajo" | "laboral" | "labor" | "causas-trabajo" => Self::Labor,
            "css" | "seguridad-social" | "segsocial" | "previsional" | "causas-segsocial" => {
                Self::SocialSecurity
            }
            "com" | "comercial" | "causas-comercial" => Self::Commercial,
            _ => {
                return Err(LedgerError::InvalidPartition {
                    token: token.to_string(),
                });
            }
        };
        Ok(partition)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for Partition {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_surface_spelling() {
        let cases = [
            ("CIV", Partition::Civil),
            ("civil", Partition::Civil),
            ("causas-civil", Partition::Civil),
            ("  Civil ", Partition::Civil),
            ("CNT", Partition::Labor),
            ("Trabajo", Partition::Labor),
            ("laboral", Partition::Labor),
            ("causas_trabajo", Partition::Labor),
            ("CSS", Partition::SocialSecurity),
            ("Seguridad Social", Partition::SocialSecurity),
            ("seguridad_social", Partition::SocialSecurity),
            ("causas-segsocial", Partition::SocialSecurity),
            ("COM", Partition::Commercial),
            ("comercial", Partition::Commercial),
            ("CAUSAS-COMERCIAL", Partition::Commercial),
        ];
        for (token, expected) in cases {
            assert_eq!(Partition::resolve(token).unwrap(), expected, "{token}");
        }
    }

    #[test]
    fn unknown_token_is_invalid_partition() {
        for token in ["", "penal", "causas", "CIVX"] {
            let err = Partition::resolve(token).unwrap_err();
            assert!(
                matches!(err, LedgerError::InvalidPartition { token: ref t } if t == token),
                "{token}"
            );
        }
    }

    #[test]
    fn canonical_names_roundtrip() {
        for partition in Partition::ALL {
            assert_eq!(Partition::resolve(partition.collection()).unwrap(), partition);
            assert_eq!(Partition::resolve(partition.code()).unwrap(), partition);
            assert_eq!(partition.to_string(), partition.collection());
        }
    }
}
