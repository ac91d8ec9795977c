//! # Gitea module
//!
//! This module resolves the provider config referenced by a managed resource,
//! whatever its shape, into the reference of the secret holding the gitea
//! credentials.

use std::fmt::{self, Display, Formatter};

use tracing::debug;

use crate::svc::{
    crd::{
        CredentialsSource, ProviderConfigExt, ProviderCredentials, SecretKeySelector,
        CLUSTER_PROVIDER_CONFIG_KIND, LEGACY_GROUP, MODERN_GROUP, PROVIDER_CONFIG_KIND,
    },
    gitea::managed::{Managed, Scope},
    k8s::{resource, store},
};

pub mod external_name;
pub mod managed;
pub mod setup;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to resolve provider config of '{0}', unsupported kind '{1}'")]
    UnsupportedConfigKind(String, String),
    #[error("failed to get {0} '{1}', {2}")]
    ConfigNotFound(ConfigKind, String, store::Error),
    #[error("failed to extract credentials from {0} '{1}', unsupported source '{2}'")]
    UnsupportedCredentialSource(ConfigKind, String, CredentialsSource),
    #[error("failed to extract credentials from {0} '{1}', no secret reference")]
    MissingSecretReference(ConfigKind, String),
    #[error("failed to get credentials secret '{0}', {1}")]
    SecretNotFound(String, store::Error),
    #[error("failed to find key '{1}' in credentials secret '{0}'")]
    SecretKeyMissing(String, String),
    #[error("failed to parse credentials under key '{1}' of secret '{0}', {2}")]
    CredentialsUnparsable(String, String, setup::PayloadError),
}

// -----------------------------------------------------------------------------
// ConfigKind enumeration

/// shape of the provider config referenced by a managed resource
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum ConfigKind {
    /// cluster-scoped `ProviderConfig` of the legacy api group
    Legacy,
    /// `ProviderConfig` of the modern api group, in the resource's namespace
    Namespaced,
    /// cluster-scoped `ClusterProviderConfig` of the modern api group
    Cluster,
}

impl Display for ConfigKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "{PROVIDER_CONFIG_KIND}.{LEGACY_GROUP}"),
            Self::Namespaced => write!(f, "{PROVIDER_CONFIG_KIND}.{MODERN_GROUP}"),
            Self::Cluster => write!(f, "{CLUSTER_PROVIDER_CONFIG_KIND}.{MODERN_GROUP}"),
        }
    }
}

impl ConfigKind {
    /// maps the kind tag of a reference to the shape to fetch.
    ///
    /// A missing or empty tag always means the legacy shape. `ProviderConfig`
    /// means the legacy shape for legacy resources, they could not reference a
    /// namespaced object, and the namespaced shape for modern ones.
    pub fn from_reference(scope: Scope, kind: Option<&str>) -> Option<Self> {
        match (scope, kind.unwrap_or_default()) {
            (_, "") => Some(Self::Legacy),
            (Scope::Legacy, PROVIDER_CONFIG_KIND) => Some(Self::Legacy),
            (Scope::Modern, PROVIDER_CONFIG_KIND) => Some(Self::Namespaced),
            (_, CLUSTER_PROVIDER_CONFIG_KIND) => Some(Self::Cluster),
            _ => None,
        }
    }

    pub fn namespaced(&self) -> bool {
        matches!(self, Self::Namespaced)
    }
}

// -----------------------------------------------------------------------------
// ResolvedCredentials structure

/// normalized credentials of a provider config, independent of its shape
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ResolvedCredentials {
    pub kind: ConfigKind,
    /// namespace of the provider config object, only set for namespaced ones
    pub config_namespace: Option<String>,
    pub source: CredentialsSource,
    /// secret reference, exactly as written on the provider config
    pub secret_ref: SecretKeySelector,
}

impl ResolvedCredentials {
    /// returns the namespace to look up the secret in: the one of the secret
    /// reference, or the provider config's own namespace for namespaced
    /// provider configs
    pub fn secret_namespace(&self) -> Option<String> {
        match &self.secret_ref.namespace {
            Some(namespace) if !namespace.is_empty() => Some(namespace.to_owned()),
            _ if self.kind.namespaced() => self.config_namespace.to_owned(),
            _ => None,
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

fn extract(
    kind: ConfigKind,
    display: String,
    config_namespace: Option<String>,
    credentials: &ProviderCredentials,
) -> Result<ResolvedCredentials, Error> {
    if credentials.source != CredentialsSource::Secret {
        return Err(Error::UnsupportedCredentialSource(
            kind,
            display,
            credentials.source,
        ));
    }

    let secret_ref = credentials
        .secret_ref
        .to_owned()
        .ok_or_else(|| Error::MissingSecretReference(kind, display))?;

    Ok(ResolvedCredentials {
        kind,
        config_namespace,
        source: credentials.source,
        secret_ref,
    })
}

/// fetch the provider config referenced by the managed resource and returns its
/// credentials.
///
/// The store is only read, once. Errors are never retried here.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub async fn resolve<S, M>(store: &S, mg: &M) -> Result<ResolvedCredentials, Error>
where
    S: store::Store + ?Sized,
    M: Managed + ?Sized,
{
    let reference = mg.provider_config_reference_or_default();
    let kind = ConfigKind::from_reference(mg.scope(), reference.kind.as_deref()).ok_or_else(
        || {
            Error::UnsupportedConfigKind(
                resource::display(&mg.namespace(), &mg.name()),
                reference.kind.to_owned().unwrap_or_default(),
            )
        },
    )?;

    debug!(
        kind = kind.to_string(),
        name = &reference.name,
        namespace = ?mg.namespace(),
        resource = mg.name(),
        "Resolve provider config of managed resource",
    );

    match kind {
        ConfigKind::Legacy => {
            let display = reference.name.to_owned();
            let pc = store
                .legacy_provider_config(&reference.name)
                .await
                .map_err(|err| Error::ConfigNotFound(kind, display.to_owned(), err))?;

            extract(kind, display, None, pc.credentials())
        }
        ConfigKind::Namespaced => {
            let namespace = mg.namespace();
            let display = resource::display(&namespace, &reference.name);
            let namespace = namespace.ok_or_else(|| {
                Error::ConfigNotFound(
                    kind,
                    display.to_owned(),
                    store::Error::NotFound(PROVIDER_CONFIG_KIND, None, reference.name.to_owned()),
                )
            })?;

            let pc = store
                .provider_config(&namespace, &reference.name)
                .await
                .map_err(|err| Error::ConfigNotFound(kind, display.to_owned(), err))?;

            extract(kind, display, Some(namespace), pc.credentials())
        }
        ConfigKind::Cluster => {
            let display = reference.name.to_owned();
            let pc = store
                .cluster_provider_config(&reference.name)
                .await
                .map_err(|err| Error::ConfigNotFound(kind, display.to_owned(), err))?;

            extract(kind, display, None, pc.credentials())
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;

    use crate::svc::{
        crd::{cluster, legacy, namespaced, ProviderConfigReference},
        k8s::store::memory::MemoryStore,
    };

    use super::*;

    // -------------------------------------------------------------------------
    // fixtures

    struct Repository {
        scope: Scope,
        namespace: Option<String>,
        reference: Option<ProviderConfigReference>,
    }

    impl Repository {
        fn new(scope: Scope, namespace: Option<&str>, name: &str, kind: Option<&str>) -> Self {
            Self {
                scope,
                namespace: namespace.map(ToString::to_string),
                reference: Some(ProviderConfigReference::new(name, kind)),
            }
        }
    }

    impl Managed for Repository {
        fn scope(&self) -> Scope {
            self.scope
        }

        fn namespace(&self) -> Option<String> {
            self.namespace.to_owned()
        }

        fn name(&self) -> String {
            "repo".to_string()
        }

        fn provider_config_reference(&self) -> Option<ProviderConfigReference> {
            self.reference.to_owned()
        }
    }

    fn credentials(namespace: &str, name: &str) -> ProviderCredentials {
        ProviderCredentials::secret(SecretKeySelector::new(Some(namespace), name, "credentials"))
    }

    fn legacy_config(name: &str, credentials: ProviderCredentials) -> legacy::ProviderConfig {
        legacy::ProviderConfig::new(name, legacy::Spec { credentials })
    }

    fn namespaced_config(
        namespace: &str,
        name: &str,
        credentials: ProviderCredentials,
    ) -> namespaced::ProviderConfig {
        let mut pc = namespaced::ProviderConfig::new(name, namespaced::Spec { credentials });
        pc.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };

        pc
    }

    fn cluster_config(name: &str, credentials: ProviderCredentials) -> cluster::ClusterProviderConfig {
        cluster::ClusterProviderConfig::new(name, cluster::Spec { credentials })
    }

    // -------------------------------------------------------------------------
    // kind mapping

    #[test]
    fn empty_kind_falls_back_to_legacy() {
        for scope in [Scope::Legacy, Scope::Modern] {
            assert_eq!(Some(ConfigKind::Legacy), ConfigKind::from_reference(scope, None));
            assert_eq!(Some(ConfigKind::Legacy), ConfigKind::from_reference(scope, Some("")));
        }
    }

    #[test]
    fn provider_config_kind_depends_on_scope() {
        assert_eq!(
            Some(ConfigKind::Legacy),
            ConfigKind::from_reference(Scope::Legacy, Some("ProviderConfig"))
        );
        assert_eq!(
            Some(ConfigKind::Namespaced),
            ConfigKind::from_reference(Scope::Modern, Some("ProviderConfig"))
        );
        assert_eq!(
            Some(ConfigKind::Cluster),
            ConfigKind::from_reference(Scope::Modern, Some("ClusterProviderConfig"))
        );
        assert_eq!(None, ConfigKind::from_reference(Scope::Modern, Some("StoreConfig")));
    }

    // -------------------------------------------------------------------------
    // resolution

    #[tokio::test]
    async fn resolve_legacy_provider_config() {
        let store = MemoryStore::default().with_legacy(legacy_config(
            "default",
            credentials("crossplane-system", "provider-secret"),
        ));
        let mg = Repository::new(Scope::Legacy, None, "default", None);

        let got = resolve(&store, &mg).await.expect("legacy provider config to resolve");

        assert_eq!(ConfigKind::Legacy, got.kind);
        assert_eq!("provider-secret", got.secret_ref.name);
        assert_eq!(Some("crossplane-system".to_string()), got.secret_ref.namespace);
        assert_eq!("credentials", got.secret_ref.key);
    }

    #[tokio::test]
    async fn resolve_modern_namespaced_provider_config_preserves_secret_namespace() {
        let store = MemoryStore::default().with_namespaced(namespaced_config(
            "crossplane-examples",
            "app-pc",
            credentials("gitea", "crossplane-gitea-token"),
        ));
        let mg = Repository::new(
            Scope::Modern,
            Some("crossplane-examples"),
            "app-pc",
            Some("ProviderConfig"),
        );

        let got = resolve(&store, &mg)
            .await
            .expect("modern namespaced provider config to resolve");

        assert_eq!(ConfigKind::Namespaced, got.kind);
        assert_eq!(Some("gitea".to_string()), got.secret_ref.namespace);
        assert_eq!(Some("crossplane-examples".to_string()), got.config_namespace);
        assert_eq!(Some("gitea".to_string()), got.secret_namespace());
    }

    #[tokio::test]
    async fn namespaced_provider_config_is_looked_up_in_resource_namespace() {
        let store = MemoryStore::default().with_namespaced(namespaced_config(
            "other",
            "app-pc",
            credentials("gitea", "crossplane-gitea-token"),
        ));
        let mg = Repository::new(
            Scope::Modern,
            Some("crossplane-examples"),
            "app-pc",
            Some("ProviderConfig"),
        );

        let err = resolve(&store, &mg).await.expect_err("config of another namespace");

        assert!(matches!(err, Error::ConfigNotFound(ConfigKind::Namespaced, _, _)));
    }

    #[tokio::test]
    async fn resolve_modern_cluster_provider_config() {
        let store = MemoryStore::default().with_cluster(cluster_config(
            "cluster-pc",
            credentials("gitea", "crossplane-gitea-token"),
        ));
        let mg = Repository::new(Scope::Modern, None, "cluster-pc", Some("ClusterProviderConfig"));

        let got = resolve(&store, &mg)
            .await
            .expect("modern cluster provider config to resolve");

        assert_eq!(ConfigKind::Cluster, got.kind);
        assert_eq!(CredentialsSource::Secret, got.source);
    }

    #[tokio::test]
    async fn missing_reference_defaults_to_the_default_cluster_provider_config() {
        let store = MemoryStore::default().with_cluster(cluster_config(
            "default",
            credentials("gitea", "crossplane-gitea-token"),
        ));
        let mg = Repository {
            scope: Scope::Modern,
            namespace: Some("crossplane-examples".to_string()),
            reference: None,
        };

        let got = resolve(&store, &mg).await.expect("default config to resolve");

        assert_eq!(ConfigKind::Cluster, got.kind);
    }

    #[tokio::test]
    async fn missing_provider_config_is_not_found() {
        let store = MemoryStore::default();
        let mg = Repository::new(Scope::Legacy, None, "missing", None);

        let err = resolve(&store, &mg).await.expect_err("config to be missing");

        assert!(matches!(
            err,
            Error::ConfigNotFound(ConfigKind::Legacy, _, store::Error::NotFound(_, _, _))
        ));
    }

    #[tokio::test]
    async fn namespaced_reference_without_resource_namespace_is_not_found() {
        let store = MemoryStore::default();
        let mg = Repository::new(Scope::Modern, None, "app-pc", Some("ProviderConfig"));

        let err = resolve(&store, &mg).await.expect_err("no namespace to look in");

        assert!(matches!(err, Error::ConfigNotFound(ConfigKind::Namespaced, _, _)));
    }

    #[tokio::test]
    async fn unknown_kind_is_unsupported() {
        let store = MemoryStore::default();
        let mg = Repository::new(Scope::Modern, Some("ns"), "app-pc", Some("StoreConfig"));

        let err = resolve(&store, &mg).await.expect_err("kind to be unsupported");

        assert!(matches!(err, Error::UnsupportedConfigKind(_, kind) if kind == "StoreConfig"));
    }

    #[tokio::test]
    async fn non_secret_source_is_unsupported() {
        let store = MemoryStore::default().with_legacy(legacy_config(
            "default",
            ProviderCredentials {
                source: CredentialsSource::InjectedIdentity,
                secret_ref: None,
            },
        ));
        let mg = Repository::new(Scope::Legacy, None, "default", None);

        let err = resolve(&store, &mg).await.expect_err("source to be unsupported");

        assert!(matches!(
            err,
            Error::UnsupportedCredentialSource(_, _, CredentialsSource::InjectedIdentity)
        ));
    }

    #[tokio::test]
    async fn secret_source_without_reference_fails() {
        let store = MemoryStore::default().with_cluster(cluster_config(
            "cluster-pc",
            ProviderCredentials {
                source: CredentialsSource::Secret,
                secret_ref: None,
            },
        ));
        let mg = Repository::new(Scope::Modern, None, "cluster-pc", Some("ClusterProviderConfig"));

        let err = resolve(&store, &mg).await.expect_err("secret reference to be missing");

        assert!(matches!(err, Error::MissingSecretReference(ConfigKind::Cluster, _)));
    }

    #[test]
    fn secret_namespace_falls_back_to_config_namespace_for_namespaced_configs() {
        let mut resolved = ResolvedCredentials {
            kind: ConfigKind::Namespaced,
            config_namespace: Some("crossplane-examples".to_string()),
            source: CredentialsSource::Secret,
            secret_ref: SecretKeySelector::new(None, "token", "credentials"),
        };
        assert_eq!(Some("crossplane-examples".to_string()), resolved.secret_namespace());

        resolved.secret_ref.namespace = Some(String::new());
        assert_eq!(Some("crossplane-examples".to_string()), resolved.secret_namespace());

        resolved.kind = ConfigKind::Cluster;
        resolved.config_namespace = None;
        assert_eq!(None, resolved.secret_namespace());
    }
}
