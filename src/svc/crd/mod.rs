//! # Custom resource definition module
//!
//! This module provide custom resource definition managed by the provider,
//! their structures and the credentials shared by every provider config shape.

use std::fmt::{self, Display, Formatter};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod cluster;
pub mod legacy;
pub mod namespaced;

// -----------------------------------------------------------------------------
// Constants

/// api group of the legacy, cluster-scoped, provider config
pub const LEGACY_GROUP: &str = "gitea.crossplane.io";

/// api group of the modern provider configs
pub const MODERN_GROUP: &str = "gitea.m.crossplane.io";

pub const VERSION: &str = "v1beta1";

pub const PROVIDER_CONFIG_KIND: &str = "ProviderConfig";
pub const CLUSTER_PROVIDER_CONFIG_KIND: &str = "ClusterProviderConfig";

// -----------------------------------------------------------------------------
// CredentialsSource enumeration

/// where the provider should look for credentials, only [`Self::Secret`] is
/// handled by this provider
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum CredentialsSource {
    #[default]
    #[serde(rename = "None")]
    None,
    #[serde(rename = "Secret")]
    Secret,
    #[serde(rename = "InjectedIdentity")]
    InjectedIdentity,
    #[serde(rename = "Environment")]
    Environment,
    #[serde(rename = "Filesystem")]
    Filesystem,
}

impl Display for CredentialsSource {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Secret => write!(f, "Secret"),
            Self::InjectedIdentity => write!(f, "InjectedIdentity"),
            Self::Environment => write!(f, "Environment"),
            Self::Filesystem => write!(f, "Filesystem"),
        }
    }
}

// -----------------------------------------------------------------------------
// SecretKeySelector structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct SecretKeySelector {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "namespace", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "key")]
    pub key: String,
}

impl SecretKeySelector {
    pub fn new(namespace: Option<&str>, name: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(ToString::to_string),
            key: key.to_string(),
        }
    }
}

// -----------------------------------------------------------------------------
// ProviderCredentials structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ProviderCredentials {
    #[serde(rename = "source")]
    pub source: CredentialsSource,
    #[serde(rename = "secretRef", default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
}

impl ProviderCredentials {
    pub fn secret(selector: SecretKeySelector) -> Self {
        Self {
            source: CredentialsSource::Secret,
            secret_ref: Some(selector),
        }
    }
}

// -----------------------------------------------------------------------------
// Status structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Status {
    /// number of managed resources that use the provider config
    #[serde(rename = "users", default, skip_serializing_if = "Option::is_none")]
    pub users: Option<i64>,
}

// -----------------------------------------------------------------------------
// ProviderConfigReference structure

/// reference carried by a managed resource under `spec.providerConfigRef`
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ProviderConfigReference {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "kind", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ProviderConfigReference {
    pub fn new(name: &str, kind: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.map(ToString::to_string),
        }
    }
}

// -----------------------------------------------------------------------------
// ProviderConfig trait

/// common accessors over the three provider config shapes
pub trait ProviderConfigExt {
    fn credentials(&self) -> &ProviderCredentials;

    fn users(&self) -> Option<i64>;

    fn set_users(&mut self, users: i64);
}
