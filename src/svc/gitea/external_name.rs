//! # External name module
//!
//! This module holds how the external name of each gitea resource is derived.

use std::fmt::{self, Display, Formatter};

use serde_json::Value;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find identifier '{0}' in the observed state")]
    MissingIdentifier(&'static str),
}

// -----------------------------------------------------------------------------
// ExternalName enumeration

/// strategy to derive the identifier of a resource in gitea
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ExternalName {
    /// the name of the kubernetes object is the identifier
    NameAsIdentifier,
    /// the identifier is the one gitea returned, read from the state
    IdentifierFromProvider,
    /// same as [`Self::IdentifierFromProvider`] but yields an empty identifier
    /// instead of failing while the state has none
    IdentifierFromProviderWithStub,
}

impl Display for ExternalName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::NameAsIdentifier => write!(f, "NameAsIdentifier"),
            Self::IdentifierFromProvider => write!(f, "IdentifierFromProvider"),
            Self::IdentifierFromProviderWithStub => write!(f, "IdentifierFromProviderWithStub"),
        }
    }
}

impl ExternalName {
    pub const IDENTIFIER: &'static str = "id";

    /// returns the external name of the object named `name` with the given
    /// observed state
    pub fn get(&self, name: &str, state: Option<&Value>) -> Result<String, Error> {
        let id = state
            .and_then(|state| state.get(Self::IDENTIFIER))
            .and_then(|id| match id {
                Value::String(id) => Some(id.to_owned()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            });

        match self {
            Self::NameAsIdentifier => Ok(name.to_string()),
            Self::IdentifierFromProvider => id.ok_or(Error::MissingIdentifier(Self::IDENTIFIER)),
            Self::IdentifierFromProviderWithStub => Ok(id.unwrap_or_default()),
        }
    }
}

// -----------------------------------------------------------------------------
// Table

/// external name of every resource whose name is configured manually
pub static EXTERNAL_NAMES: &[(&str, ExternalName)] = &[
    // Organizations
    ("gitea_org", ExternalName::IdentifierFromProvider),
    // Teams and membership
    ("gitea_team", ExternalName::IdentifierFromProvider),
    ("gitea_team_membership", ExternalName::IdentifierFromProvider),
    ("gitea_team_members", ExternalName::IdentifierFromProvider),
    // Users
    ("gitea_user", ExternalName::IdentifierFromProvider),
    // Repositories
    ("gitea_repository", ExternalName::IdentifierFromProvider),
    ("gitea_repository_key", ExternalName::IdentifierFromProvider),
    ("gitea_repository_webhook", ExternalName::IdentifierFromProvider),
    ("gitea_repository_branch_protection", ExternalName::IdentifierFromProvider),
    ("gitea_repository_actions_secret", ExternalName::IdentifierFromProvider),
    ("gitea_repository_actions_variable", ExternalName::IdentifierFromProvider),
    // Tokens and keys
    ("gitea_token", ExternalName::IdentifierFromProvider),
    ("gitea_public_key", ExternalName::IdentifierFromProvider),
    ("gitea_gpg_key", ExternalName::IdentifierFromProvider),
    // Other resources
    ("gitea_fork", ExternalName::IdentifierFromProvider),
    ("gitea_git_hook", ExternalName::IdentifierFromProvider),
    ("gitea_oauth2_app", ExternalName::IdentifierFromProvider),
];

// -----------------------------------------------------------------------------
// ResourceConfig structure

/// per resource configuration, starts with [`ExternalName::NameAsIdentifier`]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ResourceConfig {
    pub name: String,
    pub external_name: ExternalName,
}

impl ResourceConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            external_name: ExternalName::NameAsIdentifier,
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

pub fn lookup(name: &str) -> Option<ExternalName> {
    EXTERNAL_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, external_name)| *external_name)
}

/// apply the external name of the table to the resource, if it is listed
pub fn configure(resource: &mut ResourceConfig) {
    if let Some(external_name) = lookup(&resource.name) {
        resource.external_name = external_name;
    }
}

/// returns the name of every listed resource as an anchored pattern
pub fn configured() -> Vec<String> {
    EXTERNAL_NAMES
        .iter()
        .map(|(name, _)| format!("{name}$"))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn table_has_no_duplicates() {
        let names: BTreeSet<_> = EXTERNAL_NAMES.iter().map(|(name, _)| name).collect();

        assert_eq!(EXTERNAL_NAMES.len(), names.len());
    }

    #[test]
    fn configure_applies_listed_resources_only() {
        let mut repository = ResourceConfig::new("gitea_repository");
        configure(&mut repository);
        assert_eq!(ExternalName::IdentifierFromProvider, repository.external_name);

        let mut unknown = ResourceConfig::new("gitea_release");
        configure(&mut unknown);
        assert_eq!(ExternalName::NameAsIdentifier, unknown.external_name);
    }

    #[test]
    fn configured_names_are_anchored() {
        let names = configured();

        assert_eq!(EXTERNAL_NAMES.len(), names.len());
        assert!(names.contains(&"gitea_org$".to_string()));
        assert!(names.iter().all(|name| name.ends_with('$')));
    }

    #[test]
    fn identifier_from_provider_reads_the_state() {
        let state = json!({ "id": "42", "name": "repo" });

        assert_eq!(
            "42",
            ExternalName::IdentifierFromProvider
                .get("repo", Some(&state))
                .expect("identifier to be present")
        );
        assert_eq!(
            "7",
            ExternalName::IdentifierFromProvider
                .get("repo", Some(&json!({ "id": 7 })))
                .expect("numeric identifier to be accepted")
        );
        assert!(ExternalName::IdentifierFromProvider
            .get("repo", Some(&json!({})))
            .is_err());
    }

    #[test]
    fn stub_yields_an_empty_name_without_state() {
        assert_eq!(
            "",
            ExternalName::IdentifierFromProviderWithStub
                .get("repo", None)
                .expect("stub never fails")
        );
        assert_eq!(
            "42",
            ExternalName::IdentifierFromProviderWithStub
                .get("repo", Some(&json!({ "id": "42" })))
                .expect("stub never fails")
        );
    }

    #[test]
    fn name_as_identifier_uses_the_object_name() {
        assert_eq!(
            "repo",
            ExternalName::NameAsIdentifier
                .get("repo", None)
                .expect("name to be used")
        );
    }
}
