use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SecurityError;

/// Closed set of roles a user can hold inside its tenant.
///
/// Adding a role is a schema change: the `users.role` column is constrained to
/// exactly these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    AgencyOwner,
    Agent,
    Affiliate,
    Admin,
    Jamaah,
    Family,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::SuperAdmin,
        Role::AgencyOwner,
        Role::Agent,
        Role::Affiliate,
        Role::Admin,
        Role::Jamaah,
        Role::Family,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::AgencyOwner => "agency_owner",
            Role::Agent => "agent",
            Role::Affiliate => "affiliate",
            Role::Admin => "admin",
            Role::Jamaah => "jamaah",
            Role::Family => "family",
        }
    }

    /// Elevated roles see every row of their tenant without assignment narrowing.
    #[must_use]
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::SuperAdmin | Role::AgencyOwner | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| SecurityError::UnknownRole(s.to_owned()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
    }

    #[test]
    fn rejects_unknown_role() {
        assert_eq!(
            "owner".parse::<Role>(),
            Err(SecurityError::UnknownRole("owner".to_owned()))
        );
    }

    #[test]
    fn elevated_roles() {
        let elevated: Vec<Role> = Role::ALL.into_iter().filter(|r| r.is_elevated()).collect();
        assert_eq!(
            elevated,
            vec![Role::SuperAdmin, Role::AgencyOwner, Role::Admin]
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::AgencyOwner).unwrap();
        assert_eq!(json, "\"agency_owner\"");
    }
}
