//! # Store module
//!
//! This module provide a narrow read-only access to the kubernetes objects
//! needed to resolve the credentials of a managed resource: the three shapes of
//! provider config and secrets.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::svc::{
    crd::{cluster::ClusterProviderConfig, legacy, namespaced},
    k8s::resource,
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to find {0} '{}'", resource::display(.1, .2))]
    NotFound(&'static str, Option<String>, String),
    #[error("failed to retrieve {0} '{}' on kubernetes api, {3}", resource::display(.1, .2))]
    KubeClient(&'static str, Option<String>, String, kube::Error),
}

// -----------------------------------------------------------------------------
// Store trait

/// get-by-name capability over the objects read during credentials resolution
#[async_trait]
pub trait Store: Send + Sync {
    /// returns the legacy cluster-scoped provider config
    async fn legacy_provider_config(&self, name: &str) -> Result<legacy::ProviderConfig, Error>;

    /// returns the modern provider config living in the given namespace
    async fn provider_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<namespaced::ProviderConfig, Error>;

    /// returns the modern cluster-scoped provider config
    async fn cluster_provider_config(&self, name: &str) -> Result<ClusterProviderConfig, Error>;

    /// returns the secret living in the given namespace
    async fn secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;
}

// -----------------------------------------------------------------------------
// Store implementation for the kubernetes client

fn found<T>(
    kind: &'static str,
    namespace: Option<&str>,
    name: &str,
    result: Result<Option<T>, kube::Error>,
) -> Result<T, Error> {
    let namespace = namespace.map(ToString::to_string);

    match result {
        Ok(Some(obj)) => Ok(obj),
        Ok(None) => Err(Error::NotFound(kind, namespace, name.to_string())),
        Err(err) => Err(Error::KubeClient(kind, namespace, name.to_string(), err)),
    }
}

#[async_trait]
impl Store for Client {
    async fn legacy_provider_config(&self, name: &str) -> Result<legacy::ProviderConfig, Error> {
        let api: Api<legacy::ProviderConfig> = Api::all(self.to_owned());

        found("ProviderConfig", None, name, resource::get(&api, name).await)
    }

    async fn provider_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<namespaced::ProviderConfig, Error> {
        let api: Api<namespaced::ProviderConfig> = Api::namespaced(self.to_owned(), namespace);

        found(
            "ProviderConfig",
            Some(namespace),
            name,
            resource::get(&api, name).await,
        )
    }

    async fn cluster_provider_config(&self, name: &str) -> Result<ClusterProviderConfig, Error> {
        let api: Api<ClusterProviderConfig> = Api::all(self.to_owned());

        found(
            "ClusterProviderConfig",
            None,
            name,
            resource::get(&api, name).await,
        )
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.to_owned(), namespace);

        found("Secret", Some(namespace), name, resource::get(&api, name).await)
    }
}

// -----------------------------------------------------------------------------
// In-memory store

#[cfg(test)]
pub mod memory {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Secret;
    use kube::ResourceExt;

    use crate::svc::crd::{cluster::ClusterProviderConfig, legacy, namespaced};

    use super::{Error, Store};

    type Key = (Option<String>, String);

    fn key<T: ResourceExt>(obj: &T) -> Key {
        (obj.namespace(), obj.name_any())
    }

    /// store fake backed by maps, keyed by namespace and name
    #[derive(Clone, Debug, Default)]
    pub struct MemoryStore {
        legacy: BTreeMap<Key, legacy::ProviderConfig>,
        namespaced: BTreeMap<Key, namespaced::ProviderConfig>,
        cluster: BTreeMap<Key, ClusterProviderConfig>,
        secrets: BTreeMap<Key, Secret>,
    }

    impl MemoryStore {
        pub fn with_legacy(mut self, obj: legacy::ProviderConfig) -> Self {
            self.legacy.insert(key(&obj), obj);
            self
        }

        pub fn with_namespaced(mut self, obj: namespaced::ProviderConfig) -> Self {
            self.namespaced.insert(key(&obj), obj);
            self
        }

        pub fn with_cluster(mut self, obj: ClusterProviderConfig) -> Self {
            self.cluster.insert(key(&obj), obj);
            self
        }

        pub fn with_secret(mut self, obj: Secret) -> Self {
            self.secrets.insert(key(&obj), obj);
            self
        }
    }

    fn lookup<T: Clone>(
        map: &BTreeMap<Key, T>,
        kind: &'static str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<T, Error> {
        let key = (namespace.map(ToString::to_string), name.to_string());

        map.get(&key)
            .cloned()
            .ok_or(Error::NotFound(kind, key.0, key.1))
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn legacy_provider_config(
            &self,
            name: &str,
        ) -> Result<legacy::ProviderConfig, Error> {
            lookup(&self.legacy, "ProviderConfig", None, name)
        }

        async fn provider_config(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<namespaced::ProviderConfig, Error> {
            lookup(&self.namespaced, "ProviderConfig", Some(namespace), name)
        }

        async fn cluster_provider_config(
            &self,
            name: &str,
        ) -> Result<ClusterProviderConfig, Error> {
            lookup(&self.cluster, "ClusterProviderConfig", None, name)
        }

        async fn secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
            lookup(&self.secrets, "Secret", Some(namespace), name)
        }
    }
}
