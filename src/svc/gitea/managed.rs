//! # Managed module
//!
//! This module provide the view of a managed resource needed to resolve its
//! provider config.

use std::fmt::{self, Display, Formatter};

use kube::{api::DynamicObject, ResourceExt};
use serde_json::Value;

use crate::svc::crd::{ProviderConfigReference, CLUSTER_PROVIDER_CONFIG_KIND};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_PROVIDER_CONFIG: &str = "default";

// -----------------------------------------------------------------------------
// Scope enumeration

/// api flavour of a managed resource
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum Scope {
    /// cluster-scoped managed resources of the legacy api groups
    Legacy,
    /// namespaced managed resources of the modern api groups
    Modern,
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Modern => write!(f, "modern"),
        }
    }
}

// -----------------------------------------------------------------------------
// Managed trait

pub trait Managed: Send + Sync {
    fn scope(&self) -> Scope;

    fn namespace(&self) -> Option<String>;

    fn name(&self) -> String;

    /// returns the reference as written on the resource, if any
    fn provider_config_reference(&self) -> Option<ProviderConfigReference>;

    /// returns the reference to follow: the written one or the default of the
    /// resource's scope
    fn provider_config_reference_or_default(&self) -> ProviderConfigReference {
        self.provider_config_reference()
            .unwrap_or_else(|| match self.scope() {
                Scope::Legacy => ProviderConfigReference::new(DEFAULT_PROVIDER_CONFIG, None),
                Scope::Modern => ProviderConfigReference::new(
                    DEFAULT_PROVIDER_CONFIG,
                    Some(CLUSTER_PROVIDER_CONFIG_KIND),
                ),
            })
    }
}

// -----------------------------------------------------------------------------
// ManagedObject structure

/// [`Managed`] implementation over an untyped kubernetes object
#[derive(Clone, Debug)]
pub struct ManagedObject<'a> {
    pub scope: Scope,
    pub obj: &'a DynamicObject,
}

impl<'a> ManagedObject<'a> {
    pub fn new(scope: Scope, obj: &'a DynamicObject) -> Self {
        Self { scope, obj }
    }

    /// returns the observed state of the resource, `status.atProvider`
    pub fn at_provider(&self) -> Option<&Value> {
        self.obj.data.get("status")?.get("atProvider")
    }
}

impl<'a> Managed for ManagedObject<'a> {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn namespace(&self) -> Option<String> {
        self.obj.namespace()
    }

    fn name(&self) -> String {
        self.obj.name_any()
    }

    fn provider_config_reference(&self) -> Option<ProviderConfigReference> {
        let reference = self.obj.data.get("spec")?.get("providerConfigRef")?;
        let name = reference
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let kind = reference.get("kind").and_then(Value::as_str);

        Some(ProviderConfigReference::new(name, kind))
    }
}
