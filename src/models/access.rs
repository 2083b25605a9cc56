//! The access-type lattice: `noAccess < read < write < admin`.

use crate::errors::CatalogError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Effective or granted right on a bucket or catalog object.
///
/// Variant order is the lattice order, so the derived `Ord` is the total
/// order every resolution step compares with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub enum AccessType {
    NoAccess,
    Read,
    Write,
    Admin,
}

impl AccessType {
    pub const ALL: [AccessType; 4] = [Self::NoAccess, Self::Read, Self::Write, Self::Admin];

    /// True iff `self` is at least `required`.
    ///
    /// `NoAccess` therefore satisfies only `NoAccess`, and `Admin` satisfies
    /// every level.
    pub fn satisfies(self, required: AccessType) -> bool {
        self >= required
    }

    /// The strictly higher of the two; the first argument wins ties.
    pub fn higher_of(a: AccessType, b: AccessType) -> AccessType {
        if b > a { b } else { a }
    }

    pub fn is_positive(self) -> bool {
        self != Self::NoAccess
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAccess => "noAccess",
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CatalogError::InvalidArgument(format!(
                    "unknown access type `{}`, expected one of noAccess, read, write, admin",
                    s
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfies_is_total_and_matches_the_order() {
        for current in AccessType::ALL {
            for required in AccessType::ALL {
                assert_eq!(current.satisfies(required), current >= required);
            }
            assert!(AccessType::Admin.satisfies(current));
        }
        assert!(AccessType::NoAccess.satisfies(AccessType::NoAccess));
        assert!(!AccessType::NoAccess.satisfies(AccessType::Read));
        assert!(!AccessType::Write.satisfies(AccessType::Admin));
    }

    #[test]
    fn higher_of_keeps_first_on_ties() {
        assert_eq!(
            AccessType::higher_of(AccessType::Read, AccessType::Write),
            AccessType::Write
        );
        assert_eq!(
            AccessType::higher_of(AccessType::Admin, AccessType::Read),
            AccessType::Admin
        );
        assert_eq!(
            AccessType::higher_of(AccessType::Read, AccessType::Read),
            AccessType::Read
        );
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("noAccess".parse::<AccessType>().unwrap(), AccessType::NoAccess);
        assert_eq!("WRITE".parse::<AccessType>().unwrap(), AccessType::Write);
        assert!("owner".parse::<AccessType>().is_err());
    }
}
