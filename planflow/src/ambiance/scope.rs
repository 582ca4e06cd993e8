//! Tenant scope carried in an ambiance's setup abstractions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Abstraction key for the account.
pub const ACCOUNT_ID: &str = "accountId";
/// Abstraction key for the organization.
pub const ORG_IDENTIFIER: &str = "orgIdentifier";
/// Abstraction key for the project.
pub const PROJECT_IDENTIFIER: &str = "projectIdentifier";

/// Account, organization and project a plan runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Scope {
    /// Account id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Organization identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_identifier: Option<String>,
    /// Project identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_identifier: Option<String>,
}

impl Scope {
    /// Creates an account-level scope.
    #[must_use]
    pub fn account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            ..Self::default()
        }
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_org(mut self, org_identifier: impl Into<String>) -> Self {
        self.org_identifier = Some(org_identifier.into());
        self
    }

    /// Sets the project.
    #[must_use]
    pub fn with_project(mut self, project_identifier: impl Into<String>) -> Self {
        self.project_identifier = Some(project_identifier.into());
        self
    }

    /// Flattens the scope into setup abstraction entries.
    #[must_use]
    pub fn to_abstractions(&self) -> BTreeMap<String, String> {
        [
            (ACCOUNT_ID, &self.account_id),
            (ORG_IDENTIFIER, &self.org_identifier),
            (PROJECT_IDENTIFIER, &self.project_identifier),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
        .collect()
    }

    /// Reads a scope back from setup abstractions.
    #[must_use]
    pub fn from_abstractions(abstractions: &BTreeMap<String, String>) -> Self {
        Self {
            account_id: abstractions.get(ACCOUNT_ID).cloned(),
            org_identifier: abstractions.get(ORG_IDENTIFIER).cloned(),
            project_identifier: abstractions.get(PROJECT_IDENTIFIER).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_abstractions_skips_missing() {
        let scope = Scope::account("acc").with_project("proj");
        let map = scope.to_abstractions();

        assert_eq!(map.len(), 2);
        assert_eq!(map[ACCOUNT_ID], "acc");
        assert_eq!(map[PROJECT_IDENTIFIER], "proj");
        assert!(!map.contains_key(ORG_IDENTIFIER));
    }

    #[test]
    fn test_from_abstractions() {
        let scope = Scope::account("acc").with_org("org").with_project("proj");
        assert_eq!(Scope::from_abstractions(&scope.to_abstractions()), scope);
    }
}
